#[allow(unused)]
use tracing::{debug, error, info, span, trace, warn, Instrument, Level};

use std::{borrow::Cow, collections::HashMap, convert::Infallible, fmt, str::FromStr};

use itertools::Itertools;
use lazy_static::lazy_static;
use regex::{Captures, Regex};
use serde::Serializer;
use serde_derive::Serialize;

use crate::lexer;

// Synthetic labels carried by the individual lines of a composite metric
const LABEL_LESS_OR_EQUAL: &str = "le";
const LABEL_QUANTILE: &str = "quantile";

const SUFFIX_BUCKET: &str = "_bucket";
const SUFFIX_COUNT: &str = "_count";
const SUFFIX_SUM: &str = "_sum";

// A histogram or summary is declared under its base name but its samples show up under one of
// these suffixed names.
const COMPOSITE_SUFFIXES: &[&str] = &[SUFFIX_BUCKET, SUFFIX_COUNT, SUFFIX_SUM];

const INF_BUCKET: &str = "+Inf";

lazy_static! {
    // Pattern used to check for escape characters
    static ref UNESCAPE_RE: Regex = Regex::new(r#"\\[n"\\]"#).unwrap();
}

#[cfg(feature = "hash_fnv")]
type Map<K, V> = fnv::FnvHashMap<K, V>;

#[cfg(not(feature = "hash_fnv"))]
type Map<K, V> = HashMap<K, V>;

/// Label name to unescaped label value
pub type Labels = HashMap<String, String>;

/// Decoded exposition, keyed on metric name
pub type Metrics = HashMap<String, Metric>;

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum ParseError {
    #[error("cannot parse label list {{{text}}}")]
    Label { text: String },

    #[error("unable to parse datapoint [{line}]")]
    Datapoint { line: String },

    #[error(
        "malformed histogram (bucket[+Inf]={}, count={count}, labels=[{index}])",
        .inf_bucket.map_or_else(|| "missing".to_string(), |bucket| bucket.to_string())
    )]
    Histogram {
        index: String,
        inf_bucket: Option<f64>,
        count: f64,
    },
}

pub type Result<T> = std::result::Result<T, ParseError>;

/// Metric type as declared by `# TYPE`.  The default is `Unknown`
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum MetricType {
    Counter,
    Gauge,
    Histogram,
    Summary,
    #[default]
    Unknown,
    /// Any other type string, kept verbatim.  Decoded like a counter.
    Other(String),
}

/// A plain datapoint: the only kind of record for counters, gauges and untyped metrics.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Sample {
    pub labels: Labels,
    #[serde(serialize_with = "serialize_number")]
    pub value: f64,
    pub timestamp: Option<i64>,
}

/// One label combination of a histogram.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct HistogramSample {
    /// Labels without `le`
    pub labels: Labels,
    /// Cumulative count per upper bound, the bound as written in the exposition.
    pub buckets: HashMap<String, f64>,
    /// Always equal to the `+Inf` bucket
    pub count: f64,
    pub sum: Option<f64>,
}

/// One label combination of a summary.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SummarySample {
    /// Labels without `quantile`
    pub labels: Labels,
    pub quantiles: HashMap<String, f64>,
    pub count: Option<f64>,
    pub sum: Option<f64>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum MetricData {
    Samples(Vec<Sample>),
    Histograms(Vec<HistogramSample>),
    Summaries(Vec<SummarySample>),
}

/// A decoded metric: its declared type and help along with every record seen for it.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Metric {
    pub metric_type: MetricType,
    /// Empty if there was no `# HELP`
    pub help: String,
    pub data: MetricData,
}

/// A datapoint tagged with the name it appeared under, which may carry a composite suffix.
#[derive(Debug)]
struct RawSample {
    name: String,
    sample: Sample,
}

/// Everything seen for one metric name up to now.
#[derive(Debug, Default)]
struct RawMetric {
    metric_type: MetricType,
    help: Option<String>,
    samples: Vec<RawSample>,
}

/// Accumulates the lines of an exposition.  Nothing is reconstructed until [`Builder::finalize`].
#[derive(Debug, Default)]
pub(crate) struct Builder {
    metrics: Map<String, RawMetric>,
}

impl Builder {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Feeds a single line.  Lines are order sensitive, see [`Builder::resolve_name`].
    pub(crate) fn line(self, line: &str) -> Result<Self> {
        trace!(line);

        match lexer::line(line) {
            Ok((_, lexer::LineToken::Descriptor(meta))) => Ok(self.meta(meta)),
            Ok((_, lexer::LineToken::Sample(sample))) => self.sample(sample),
            Ok((_, lexer::LineToken::Empty)) => Ok(self),
            Err(_) => Err(ParseError::Datapoint {
                line: line.trim().to_string(),
            }),
        }
    }

    fn raw_metric(&mut self, metric_name: &str) -> &mut RawMetric {
        self.metrics.entry(metric_name.to_string()).or_default()
    }

    fn meta(mut self, meta: lexer::MetricDescriptor) -> Self {
        match meta {
            lexer::MetricDescriptor::Type {
                metric_name,
                metric_type,
            } => {
                // A bare `# TYPE name` leaves nothing to go on
                self.raw_metric(metric_name).metric_type =
                    metric_type.map(MetricType::from).unwrap_or_default();
            }
            lexer::MetricDescriptor::Help {
                metric_name,
                help_text,
            } => {
                self.raw_metric(metric_name).help = Some(help_text.unwrap_or_default().to_string());
            }
            lexer::MetricDescriptor::Other { keyword } => trace!(keyword, "ignoring comment"),
        }

        self
    }

    fn sample(mut self, sample: lexer::Sample) -> Result<Self> {
        let labels = parse_labels(sample.labels)?;
        let metric_name = self.resolve_name(sample.name).to_string();
        debug!(name = sample.name, %metric_name);

        self.raw_metric(&metric_name).samples.push(RawSample {
            name: sample.name.to_string(),
            sample: Sample {
                labels,
                value: sample.value,
                timestamp: sample.timestamp,
            },
        });

        Ok(self)
    }

    /// Picks the metric a datapoint belongs to.  A known name is used as is.  Otherwise a
    /// `_bucket`, `_count` or `_sum` suffix is dropped if the base name is already known.
    ///
    /// The base name has to exist by the time the suffixed line shows up, a `# TYPE` after the
    /// samples does not pull them back in.
    fn resolve_name<'n>(&self, name: &'n str) -> &'n str {
        if self.metrics.contains_key(name) {
            return name;
        }

        COMPOSITE_SUFFIXES
            .iter()
            .filter_map(|suffix| name.strip_suffix(*suffix))
            .find(|base| self.metrics.contains_key(*base))
            .unwrap_or(name)
    }

    #[tracing::instrument(skip_all)]
    pub(crate) fn finalize(self) -> Result<Metrics> {
        self.metrics
            .into_iter()
            .map(|(name, raw)| -> Result<(String, Metric)> {
                debug!(%name, metric_type = %raw.metric_type, samples = raw.samples.len());
                Ok((name, raw.into_metric()?))
            })
            .collect()
    }
}

impl RawMetric {
    /// Only histograms and summaries are regrouped, anything else passes through untouched.
    fn into_metric(self) -> Result<Metric> {
        let data = match self.metric_type {
            MetricType::Histogram => MetricData::Histograms(histograms(self.samples)?),
            MetricType::Summary => MetricData::Summaries(summaries(self.samples)),
            _ => MetricData::Samples(self.samples.into_iter().map(|raw| raw.sample).collect()),
        };

        Ok(Metric {
            metric_type: self.metric_type,
            help: self.help.unwrap_or_default(),
            data,
        })
    }
}

fn histograms(samples: Vec<RawSample>) -> Result<Vec<HistogramSample>> {
    let histograms = group_samples(
        samples,
        LABEL_LESS_OR_EQUAL,
        |labels| HistogramSample {
            labels,
            buckets: HashMap::new(),
            count: 0.,
            sum: None,
        },
        |histogram: &mut HistogramSample, raw: RawSample, bound: String| {
            let value = raw.sample.value;
            if raw.name.ends_with(SUFFIX_BUCKET) {
                histogram.buckets.insert(bound, value);
            } else if raw.name.ends_with(SUFFIX_COUNT) {
                histogram.count = value;
            } else if raw.name.ends_with(SUFFIX_SUM) {
                histogram.sum = Some(value);
            }
        },
    );

    // The +Inf bucket counts every observation, so it has to be there and agree with _count
    for histogram in histograms.iter() {
        match histogram.buckets.get(INF_BUCKET) {
            Some(&inf_bucket) if inf_bucket == histogram.count => {}
            inf_bucket => Err(ParseError::Histogram {
                index: labels_index(&histogram.labels),
                inf_bucket: inf_bucket.copied(),
                count: histogram.count,
            })?,
        }
    }

    Ok(histograms)
}

fn summaries(samples: Vec<RawSample>) -> Vec<SummarySample> {
    group_samples(
        samples,
        LABEL_QUANTILE,
        |labels| SummarySample {
            labels,
            quantiles: HashMap::new(),
            count: None,
            sum: None,
        },
        |summary: &mut SummarySample, raw: RawSample, quantile: String| {
            let value = raw.sample.value;
            if raw.name.ends_with(SUFFIX_COUNT) {
                summary.count = Some(value);
            } else if raw.name.ends_with(SUFFIX_SUM) {
                summary.sum = Some(value);
            } else {
                summary.quantiles.insert(quantile, value);
            }
        },
    )
}

/// Groups samples on their labels minus `synthetic`, in order of first appearance.  `fold`
/// sees every sample along with the value of `synthetic` (empty when missing).  Later
/// samples overwrite earlier ones within a group.
fn group_samples<T>(
    samples: Vec<RawSample>,
    synthetic: &str,
    new: impl Fn(Labels) -> T,
    mut fold: impl FnMut(&mut T, RawSample, String),
) -> Vec<T> {
    let mut slots: Map<String, usize> = Map::default();
    let mut groups = Vec::new();

    for raw in samples {
        let (key, labels) = split_label(&raw.sample.labels, synthetic);
        let slot = *slots.entry(labels_index(&labels)).or_insert_with(|| {
            groups.push(new(labels));
            groups.len() - 1
        });
        fold(&mut groups[slot], raw, key);
    }

    groups
}

/// Copies `labels` without `name`, returning the value of `name` separately.
fn split_label(labels: &Labels, name: &str) -> (String, Labels) {
    let value = labels.get(name).cloned().unwrap_or_default();
    let rest = labels
        .iter()
        .filter(|(label, _)| label.as_str() != name)
        .map(|(label, value)| (label.clone(), value.clone()))
        .collect();

    (value, rest)
}

/// Order independent key for a label set: `a=1/b=2`
fn labels_index(labels: &Labels) -> String {
    labels
        .iter()
        .sorted()
        .map(|(name, value)| format!("{}={}", name, value))
        .join("/")
}

#[tracing::instrument]
fn parse_labels(text: &str) -> Result<Labels> {
    match lexer::labels(text) {
        Ok(("", labels)) => Ok(labels
            .into_iter()
            .map(|label| (label.name.to_string(), unescape_string(label.value).into_owned()))
            .collect()),
        leftover => {
            debug!(?leftover);
            Err(ParseError::Label {
                text: text.to_string(),
            })
        }
    }
}

/// Resolves `\"`, `\\` and `\n` in a single pass, so `\\n` is a backslash followed by `n`.
fn unescape_string(input: &str) -> Cow<'_, str> {
    UNESCAPE_RE.replace_all(input, |caps: &Captures| match &caps[0] {
        r"\n" => "\n",
        r#"\""# => r#"""#,
        _ => r"\",
    })
}

fn serialize_number<S>(n: &f64, s: S) -> std::result::Result<S::Ok, S::Error>
where
    S: Serializer,
{
    if n.is_infinite() && n.is_sign_positive() {
        s.serialize_str("+Inf")
    } else {
        s.serialize_f64(*n)
    }
}

impl FromStr for MetricType {
    type Err = Infallible;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(s.into())
    }
}

impl From<&str> for MetricType {
    fn from(s: &str) -> Self {
        match s {
            "counter" => Self::Counter,
            "gauge" => Self::Gauge,
            "histogram" => Self::Histogram,
            "summary" => Self::Summary,
            "unknown" => Self::Unknown,
            other => Self::Other(other.to_string()),
        }
    }
}

impl fmt::Display for MetricType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Counter => "counter",
            Self::Gauge => "gauge",
            Self::Histogram => "histogram",
            Self::Summary => "summary",
            Self::Unknown => "unknown",
            Self::Other(other) => other,
        })
    }
}

impl serde::Serialize for MetricType {
    fn serialize<S>(&self, s: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        s.collect_str(self)
    }
}

impl MetricData {
    pub fn len(&self) -> usize {
        match self {
            Self::Samples(samples) => samples.len(),
            Self::Histograms(histograms) => histograms.len(),
            Self::Summaries(summaries) => summaries.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn samples(&self) -> Option<&[Sample]> {
        match self {
            Self::Samples(samples) => Some(samples),
            _ => None,
        }
    }

    pub fn histograms(&self) -> Option<&[HistogramSample]> {
        match self {
            Self::Histograms(histograms) => Some(histograms),
            _ => None,
        }
    }

    pub fn summaries(&self) -> Option<&[SummarySample]> {
        match self {
            Self::Summaries(summaries) => Some(summaries),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(pairs: &[(&str, &str)]) -> Labels {
        pairs
            .iter()
            .map(|(name, value)| (name.to_string(), value.to_string()))
            .collect()
    }

    #[test]
    fn unescaping() {
        assert_eq!(unescape_string(r#"C:\\DIR\\FILE.TXT"#), r#"C:\DIR\FILE.TXT"#);
        assert_eq!(
            unescape_string(r#"Cannot find file:\n\"FILE.TXT\""#),
            "Cannot find file:\n\"FILE.TXT\""
        );
        assert_eq!(unescape_string(r#"trailing\\"#), r#"trailing\"#);
        assert_eq!(unescape_string(r#"\\n"#), r#"\n"#);
        assert_eq!(unescape_string(r#"\t"#), r#"\t"#);
    }

    #[test]
    fn label_sets() {
        assert_eq!(parse_labels(""), Ok(Labels::new()));
        assert_eq!(
            parse_labels(r#"k1="v1",k2="v2""#),
            Ok(labels(&[("k1", "v1"), ("k2", "v2")]))
        );
        assert_eq!(
            parse_labels(r#"path="C:\\DIR\\FILE.TXT",error="Cannot find file:\n\"FILE.TXT\"""#),
            Ok(labels(&[
                ("path", r#"C:\DIR\FILE.TXT"#),
                ("error", "Cannot find file:\n\"FILE.TXT\""),
            ]))
        );
        assert_eq!(parse_labels(r#"a="1",a="2""#), Ok(labels(&[("a", "2")])));
        assert_eq!(
            parse_labels(r#"a="1" b="2""#),
            Ok(labels(&[("a", "1"), ("b", "2")]))
        );
        assert_eq!(
            parse_labels(r#"a="1",b=2"#),
            Err(ParseError::Label {
                text: r#"a="1",b=2"#.to_string()
            })
        );
    }

    #[test]
    fn label_index() {
        assert_eq!(labels_index(&Labels::new()), "");
        assert_eq!(
            labels_index(&labels(&[("method", "post"), ("code", "200")])),
            "code=200/method=post"
        );
    }

    #[test]
    fn split_labels_leaves_source_alone() {
        let source = labels(&[("le", "0.5"), ("job", "api")]);
        let (bound, rest) = split_label(&source, "le");

        assert_eq!(bound, "0.5");
        assert_eq!(rest, labels(&[("job", "api")]));
        assert_eq!(source.len(), 2);

        let (bound, rest) = split_label(&rest, "le");
        assert_eq!(bound, "");
        assert_eq!(rest.len(), 1);
    }

    #[test]
    fn metric_types() {
        for name in ["counter", "gauge", "histogram", "summary", "unknown", "untyped"] {
            let metric_type: MetricType = name.parse().unwrap();
            assert_eq!(metric_type.to_string(), name);
        }
        assert_eq!("untyped".parse(), Ok(MetricType::Other("untyped".to_string())));
    }

    #[test]
    fn histogram_error_message() {
        let error = ParseError::Histogram {
            index: "job=api".to_string(),
            inf_bucket: None,
            count: 3.,
        };
        assert_eq!(
            error.to_string(),
            "malformed histogram (bucket[+Inf]=missing, count=3, labels=[job=api])"
        );
    }
}
