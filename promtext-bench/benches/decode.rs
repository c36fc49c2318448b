use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

const MIXED: &str = include_str!("../../promtext/test-data/mixed/metrics");

const BOUNDS: &[&str] = &[
    "0.005", "0.01", "0.025", "0.05", "0.1", "0.25", "0.5", "1", "2.5", "5", "10", "+Inf",
];

/// A histogram with `series` label sets of twelve buckets each
fn histogram_exposition(series: usize) -> String {
    let mut data =
        String::from("# HELP latency_seconds Request latency.\n# TYPE latency_seconds histogram\n");
    for n in 0..series {
        let labels = format!("handler=\"/h{}\",method=\"GET\"", n);
        for (i, bound) in BOUNDS.iter().enumerate() {
            data.push_str(&format!("latency_seconds_bucket{{{},le=\"{}\"}} {}\n", labels, bound, i));
        }
        data.push_str(&format!("latency_seconds_sum{{{}}} 42.5\n", labels));
        data.push_str(&format!("latency_seconds_count{{{}}} {}\n", labels, BOUNDS.len() - 1));
    }
    data
}

fn bench_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("decode");

    group.throughput(Throughput::Bytes(MIXED.len() as u64));
    group.bench_function(BenchmarkId::new("mixed", "str"), |b| {
        b.iter(|| promtext::decode_str(MIXED).expect("mixed"))
    });
    group.bench_function(BenchmarkId::new("mixed", "stream"), |b| {
        b.iter(|| {
            let lines = futures::stream::iter(MIXED.lines().map(Ok::<_, std::io::Error>));
            futures::executor::block_on(promtext::decode_stream(lines)).expect("mixed")
        })
    });

    for series in [10, 100, 1000] {
        let data = histogram_exposition(series);
        group.throughput(Throughput::Bytes(data.len() as u64));
        group.bench_with_input(BenchmarkId::new("histogram", series), &data, |b, data| {
            b.iter(|| promtext::decode_str(data).expect("histogram"))
        });
    }

    group.finish();
}

criterion_group!(benches, bench_decode);
criterion_main!(benches);
