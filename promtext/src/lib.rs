//! `promtext` decodes the Prometheus text exposition format into typed metrics.
//!
//! Lines are accumulated per metric name first, histograms and summaries are reassembled
//! from their `_bucket`/`_count`/`_sum` and quantile lines once the input is exhausted.
//! Any error aborts the whole decode.

#[allow(unused)]
use tracing::{debug, error, info, span, trace, warn, Instrument, Level};

use futures::{io::AsyncBufRead, pin_mut, AsyncBufReadExt, Stream, StreamExt};

/// Tokenizes single lines of an exposition
pub mod lexer;

/// Accumulates the tokens and rebuilds them into typed metrics.
pub mod parser;

pub use parser::{
    HistogramSample, Labels, Metric, MetricData, MetricType, Metrics, ParseError, Sample,
    SummarySample,
};


/// Indicates that decoding failed, either on the input itself or in the source of the lines
#[derive(thiserror::Error, Debug)]
pub enum DecodeError<E> {
    #[error(transparent)]
    Parse(#[from] ParseError),

    /// The line source failed, passed along as is.
    #[error(transparent)]
    Source(E),
}

/// Decodes an exposition held in memory.  Both `\n` and `\r\n` line endings are accepted.
pub fn decode_str(data: &str) -> Result<Metrics, ParseError> {
    decode_lines(data.lines())
}

/// Decodes a sequence of lines, consumed to the end before anything is reconstructed.
#[tracing::instrument(skip_all)]
pub fn decode_lines<I>(lines: I) -> Result<Metrics, ParseError>
where
    I: IntoIterator,
    I::Item: AsRef<str>,
{
    lines
        .into_iter()
        .try_fold(parser::Builder::new(), |builder, line| {
            builder.line(line.as_ref())
        })?
        .finalize()
}

/// Like [`decode_lines`] for fallible line sources such as [`std::io::BufRead::lines`].
/// Stops at the first error from the source.
#[tracing::instrument(skip_all)]
pub fn try_decode_lines<I, L, E>(lines: I) -> Result<Metrics, DecodeError<E>>
where
    I: IntoIterator<Item = Result<L, E>>,
    L: AsRef<str>,
{
    let builder = lines.into_iter().try_fold(
        parser::Builder::new(),
        |builder, line| -> Result<_, DecodeError<E>> {
            Ok(builder.line(line.map_err(DecodeError::Source)?.as_ref())?)
        },
    )?;

    Ok(builder.finalize()?)
}

/// Decodes lines as they arrive from an asynchronous source.  Nothing is returned until the
/// stream ends, an error from the stream ends decoding right away.
#[tracing::instrument(skip_all)]
pub async fn decode_stream<S, L, E>(lines: S) -> Result<Metrics, DecodeError<E>>
where
    S: Stream<Item = Result<L, E>>,
    L: AsRef<str>,
{
    pin_mut!(lines);

    let mut builder = parser::Builder::new();
    while let Some(line) = lines.next().await {
        builder = builder.line(line.map_err(DecodeError::Source)?.as_ref())?;
    }

    Ok(builder.finalize()?)
}

/// Decodes everything an asynchronous reader produces, split into lines.
pub async fn decode_reader<R>(reader: R) -> Result<Metrics, DecodeError<std::io::Error>>
where
    R: AsyncBufRead,
{
    decode_stream(reader.lines()).await
}
