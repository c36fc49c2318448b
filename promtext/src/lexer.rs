#[allow(unused)]
use tracing::{debug, error, info, span, trace, warn, Instrument, Level};

use nom::{
    branch::alt,
    bytes::complete::{is_not, take_till},
    character::complete::{char, multispace0, multispace1},
    combinator::{eof, map, opt, peek, recognize, rest, value},
    multi::many0,
    sequence::{delimited, pair, preceded, terminated, tuple},
    IResult,
};

mod types;
use types::*;

/// A `name="value"` pair, the value still escaped
#[derive(Clone, Debug, PartialEq)]
pub struct Label<'a> {
    pub name: &'a str,
    pub value: &'a str,
}

/// A single datapoint line.  The label list is kept as raw text, see [`labels`].
#[derive(Clone, Debug, PartialEq)]
pub struct Sample<'a> {
    pub name: &'a str,
    pub labels: &'a str,
    pub value: f64,
    pub timestamp: Option<i64>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum MetricDescriptor<'a> {
    Type {
        metric_name: &'a str,
        metric_type: Option<&'a str>,
    },
    Help {
        metric_name: &'a str,
        help_text: Option<&'a str>,
    },
    /// Any other `# WORD name ...` comment.  Carries no meaning.
    Other { keyword: &'a str },
}

#[derive(Clone, Debug, PartialEq)]
pub enum LineToken<'a> {
    Descriptor(MetricDescriptor<'a>),
    Sample(Sample<'a>),
    /// Blank line or free-form comment
    Empty,
}

impl<'a> Label<'a> {
    /// ```abnf
    /// label = *WSP word "=" DQUOTE escaped-string DQUOTE *WSP [","]
    /// ```
    #[tracing::instrument]
    fn nom(input: &'a str) -> IResult<&'a str, Self> {
        map(
            tuple((
                multispace0,
                word1,
                char('='),
                quoted_string,
                multispace0,
                opt(char(',')),
            )),
            |(_, name, _, value, _, _)| {
                debug!(name, value);
                Self { name, value }
            },
        )(input)
    }
}

impl<'a> Sample<'a> {
    /// Everything between the braces.  Braces inside quoted values do not close the list.
    /// When the quotes do not balance the list ends at the first `}` and the label parser
    /// gets to reject it.
    fn label_list(input: &'a str) -> IResult<&'a str, &'a str> {
        delimited(
            char('{'),
            map(
                alt((
                    terminated(
                        recognize(many0(alt((recognize(quoted_string), is_not(r#""}"#))))),
                        peek(char('}')),
                    ),
                    take_till(|c| c == '}'),
                )),
                str::trim,
            ),
            char('}'),
        )(input)
    }

    /// ```abnf
    /// sample = *WSP word ["{" label-list "}"] 1*WSP value [1*WSP timestamp] *WSP
    /// ```
    fn nom(input: &'a str) -> IResult<&'a str, Self> {
        let (input, _) = multispace0(input)?;
        let (input, name) = word1(input)?;
        let (input, labels) = opt(Self::label_list)(input)?;
        let (input, value) = preceded(multispace1, sample_value)(input)?;
        let (input, timestamp) = opt(preceded(multispace1, timestamp))(input)?;
        let (input, _) = terminated(multispace0, eof)(input)?;

        Ok((
            input,
            Self {
                name,
                labels: labels.unwrap_or_default(),
                value,
                timestamp,
            },
        ))
    }
}

impl<'a> MetricDescriptor<'a> {
    /// ```abnf
    /// metric-descriptor = "#" 1*WSP word 1*WSP word [1*WSP text] *WSP
    /// ```
    ///
    /// Only `TYPE` and `HELP` are meaningful, other keywords are recognized so that they
    /// can be dropped.
    fn nom(input: &'a str) -> IResult<&'a str, Self> {
        let (input, _) = pair(char('#'), multispace1)(input)?;
        let (input, keyword) = word1(input)?;
        let (input, metric_name) = preceded(multispace1, word1)(input)?;
        let (input, text) = alt((
            value(None, pair(multispace0, eof)),
            map(preceded(multispace1, rest), |text: &str| Some(text.trim_end())),
        ))(input)?;

        let descriptor = match keyword {
            "TYPE" => Self::Type {
                metric_name,
                metric_type: text,
            },
            "HELP" => Self::Help {
                metric_name,
                help_text: text,
            },
            keyword => Self::Other { keyword },
        };

        Ok((input, descriptor))
    }
}

/// Classifies a single line of an exposition.
///
/// Descriptors are matched against the line as given.  Anything else is trimmed, then
/// discarded when empty or starting with `#`, and must otherwise be a datapoint.
#[tracing::instrument]
pub(crate) fn line<'a>(input: &'a str) -> IResult<&'a str, LineToken<'a>> {
    alt((
        map(MetricDescriptor::nom, LineToken::Descriptor),
        value(
            LineToken::Empty,
            pair(multispace0, alt((eof, preceded(char('#'), rest)))),
        ),
        map(Sample::nom, LineToken::Sample),
    ))(input)
}

/// Splits the text between the braces of a datapoint into its labels.  The caller decides
/// what to do with any text left over.
#[tracing::instrument]
pub(crate) fn labels<'a>(input: &'a str) -> IResult<&'a str, Vec<Label<'a>>> {
    terminated(many0(Label::nom), multispace0)(input)
}
