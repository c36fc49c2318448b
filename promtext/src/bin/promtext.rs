use std::{
    fs::File,
    io::{self, BufRead, BufReader},
};

use anyhow::Result;
use clap::Parser;
use itertools::Itertools;
use promtext::MetricData;

#[derive(Debug, Parser)]
struct Args {
    /// Exposition to decode, `-` for stdin
    #[clap(short, long, required = true)]
    input: String,

    /// Print the decoded metrics as JSON
    #[clap(long)]
    json: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let reader: Box<dyn BufRead> = match args.input.as_str() {
        "-" => Box::new(io::stdin().lock()),
        path => Box::new(BufReader::new(File::open(path)?)),
    };

    let metrics = promtext::try_decode_lines(reader.lines())?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&metrics)?);
        return Ok(());
    }

    for (name, metric) in metrics.iter().sorted_by(|a, b| a.0.cmp(b.0)) {
        println!("{} ({})", name, metric.metric_type);
        if !metric.help.is_empty() {
            println!("{}", metric.help);
        }

        match &metric.data {
            MetricData::Samples(samples) => samples.iter().for_each(|s| println!("  {:?}", s)),
            MetricData::Histograms(histograms) => {
                histograms.iter().for_each(|h| println!("  {:?}", h))
            }
            MetricData::Summaries(summaries) => summaries.iter().for_each(|s| println!("  {:?}", s)),
        }
        println!();
    }

    Ok(())
}
