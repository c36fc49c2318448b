#[allow(unused)]
use tracing::{debug, error, info, span, trace, warn, Instrument, Level};

use nom::{
    branch::alt,
    bytes::complete::{escaped, is_not, tag, take_while1},
    character::complete::{anychar, char, digit0, digit1, one_of},
    combinator::{map, map_res, opt, recognize, value},
    sequence::{delimited, pair, tuple},
    IResult,
};

/// `\w`: ASCII letters, digits and the underscore
fn is_word_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// Metric names, label names and directive keywords all share the same charset.
///
/// ```abnf
/// word = 1*(ALPHA / DIGIT / "_")
/// ```
pub(super) fn word1(input: &str) -> IResult<&str, &str> {
    take_while1(is_word_char)(input)
}

/// ```abnf
/// escaped-string = 1*escaped-char
///
/// escaped-char = normal-char
/// escaped-char =/ BS any-char
/// ```
///
/// Escape sequences are recognized here but left intact, the parser unescapes them.
pub(super) fn escaped_string1(input: &str) -> IResult<&str, &str> {
    escaped(is_not(r#""\"#), '\\', anychar)(input)
}

/// A double quoted string, possibly empty.  Returns the raw contents between the quotes.
pub(super) fn quoted_string(input: &str) -> IResult<&str, &str> {
    map(
        delimited(char('"'), opt(escaped_string1), char('"')),
        Option::unwrap_or_default,
    )(input)
}

/// ```abnf
/// value = "+Inf"
/// value =/ ["-"] 1*DIGIT ["." 1*DIGIT] [("e" / "E") ["+" / "-"] *DIGIT]
/// ```
///
/// An exponent marker without digits is tolerated and ignored.
#[tracing::instrument]
pub(super) fn sample_value(input: &str) -> IResult<&str, f64> {
    alt((
        value(f64::INFINITY, tag("+Inf")),
        map_res(
            recognize(pair(
                tuple((opt(char('-')), digit1, opt(pair(char('.'), digit1)))),
                opt(tuple((one_of("eE"), opt(one_of("+-")), digit0))),
            )),
            |number: &str| {
                number
                    .trim_end_matches(|c| matches!(c, 'e' | 'E' | '+' | '-'))
                    .parse::<f64>()
            },
        ),
    ))(input)
}

/// Milliseconds since the epoch, may be negative.
///
/// ```abnf
/// timestamp = ["-"] 1*DIGIT
/// ```
pub(super) fn timestamp(input: &str) -> IResult<&str, i64> {
    map_res(recognize(pair(opt(char('-')), digit1)), str::parse::<i64>)(input)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn values() {
        assert_eq!(sample_value("73"), Ok(("", 73.)));
        assert_eq!(sample_value("-0.25 1"), Ok((" 1", -0.25)));
        assert_eq!(sample_value("1.458255915e9"), Ok(("", 1.458255915e9)));
        assert_eq!(sample_value("1.7560473e+07"), Ok(("", 1.7560473e7)));
        assert_eq!(sample_value("3e"), Ok(("", 3.)));
        assert_eq!(sample_value("+Inf"), Ok(("", f64::INFINITY)));

        assert!(sample_value("-Inf").is_err());
        assert!(sample_value("NaN").is_err());
        assert!(sample_value(".5").is_err());
        assert!(sample_value("+1").is_err());
    }

    #[test]
    fn timestamps() {
        assert_eq!(timestamp("1395066363000"), Ok(("", 1395066363000)));
        assert_eq!(timestamp("-3982045"), Ok(("", -3982045)));
        assert!(timestamp("99999999999999999999").is_err());
        assert_eq!(timestamp("1.5"), Ok((".5", 1)));
    }

    #[test]
    fn quoted_strings() {
        assert_eq!(quoted_string(r#""""#), Ok(("", "")));
        assert_eq!(quoted_string(r#""a\"b" x"#), Ok((" x", r#"a\"b"#)));
        assert_eq!(quoted_string(r#""C:\\DIR""#), Ok(("", r#"C:\\DIR"#)));
        assert!(quoted_string(r#""unterminated"#).is_err());
        assert!(quoted_string(r#""dangling\"#).is_err());
    }
}
