//! Media timestamps.
//!
//! Accepted inputs are `HH:MM:SS[.f]`, `MM:SS[.f]`, a plain number of seconds,
//! or a numeric string such as `"125.5"`. The colon decides which family a
//! string belongs to: `"12.5"` is twelve and a half seconds, never a
//! fractional `SS.f` field without minutes.
//!
//! The canonical form is zero-padded `HH:MM:SS` with the fraction dropped.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Above 2^53 whole seconds stop being exact in `f64`, and the clock fields
/// written by [`Timestamp::format`] would no longer parse back to the same value.
const MAX_SECONDS: f64 = (1_u64 << 53) as f64;

/// Non-negative offset from the start of the media.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(try_from = "RawTimestamp", into = "String")]
pub(crate) struct Timestamp(f64);

impl Timestamp {
    pub(crate) fn from_seconds(seconds: f64) -> Result<Self> {
        if !seconds.is_finite() {
            return Err(Error::format(seconds.to_string(), "not a finite number"));
        }
        if seconds < 0.0 {
            return Err(Error::format(seconds.to_string(), "negative duration"));
        }
        if seconds >= MAX_SECONDS {
            return Err(Error::format(seconds.to_string(), "too large"));
        }
        Ok(Self(seconds))
    }

    pub(crate) fn parse(value: &str) -> Result<Self> {
        let trimmed = value.trim();
        if !trimmed.contains(':') {
            return parse_seconds_field(trimmed)
                .ok_or_else(|| Error::format(value, "expected seconds, MM:SS or HH:MM:SS"))
                .and_then(|seconds| Self::checked(value, seconds));
        }

        let fields = trimmed.split(':').collect::<Vec<_>>();
        let seconds = match fields[..] {
            [mm, ss] => parse_whole_field(mm)
                .zip(parse_seconds_field(ss))
                .map(|(m, s)| m * 60.0 + s),
            [hh, mm, ss] => parse_whole_field(hh)
                .zip(parse_whole_field(mm))
                .zip(parse_seconds_field(ss))
                .map(|((h, m), s)| h * 3600.0 + m * 60.0 + s),
            _ => return Err(Error::format(value, "too many ':' separated fields")),
        };
        seconds
            .ok_or_else(|| Error::format(value, "non-numeric field"))
            .and_then(|seconds| Self::checked(value, seconds))
    }

    /// Range check that reports the text the caller gave.
    fn checked(value: &str, seconds: f64) -> Result<Self> {
        Self::from_seconds(seconds).map_err(|err| match err {
            Error::Format { reason, .. } => Error::format(value, reason),
            other => other,
        })
    }

    pub(crate) fn seconds(self) -> f64 {
        self.0
    }

    /// Canonical `HH:MM:SS`. Sub-second precision is truncated, so
    /// `parse(format(t))` may be earlier than `t` by less than a second.
    pub(crate) fn format(self) -> String {
        let total = self.0.floor() as u64;
        format!(
            "{:02}:{:02}:{:02}",
            total / 3600,
            (total % 3600) / 60,
            total % 60
        )
    }

    /// `HH:MM:SS` plus up to three fractional digits. Used where a range
    /// bound has to survive a round trip through a file.
    pub(crate) fn format_millis(self) -> String {
        let millis = (self.0 * 1000.0).round() as u64;
        let whole = Self((millis / 1000) as f64).format();
        match millis % 1000 {
            0 => whole,
            fraction => format!("{whole}.{}", format!("{fraction:03}").trim_end_matches('0')),
        }
    }
}

fn is_digits(field: &str) -> bool {
    !field.is_empty() && field.bytes().all(|b| b.is_ascii_digit())
}

fn parse_whole_field(field: &str) -> Option<f64> {
    is_digits(field).then(|| field.parse::<f64>().ok()).flatten()
}

/// Digits with at most one `.` and at least one digit somewhere.
fn parse_seconds_field(field: &str) -> Option<f64> {
    let (whole, fraction) = field.split_once('.').unwrap_or((field, ""));
    let digits_ok = (whole.is_empty() || is_digits(whole))
        && (fraction.is_empty() || is_digits(fraction))
        && !(whole.is_empty() && fraction.is_empty());
    if !digits_ok {
        return None;
    }
    field.parse::<f64>().ok()
}

impl FromStr for Timestamp {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.format())
    }
}

impl From<Timestamp> for String {
    fn from(value: Timestamp) -> Self {
        value.format()
    }
}

/// Wire form: transcripts carry numbers, caption files and LLM replies carry strings.
#[derive(Deserialize)]
#[serde(untagged)]
enum RawTimestamp {
    Seconds(f64),
    Text(String),
}

impl TryFrom<RawTimestamp> for Timestamp {
    type Error = Error;

    fn try_from(raw: RawTimestamp) -> Result<Self> {
        match raw {
            RawTimestamp::Seconds(seconds) => Timestamp::from_seconds(seconds),
            RawTimestamp::Text(text) => Timestamp::parse(&text),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secs(value: &str) -> f64 {
        Timestamp::parse(value).unwrap().seconds()
    }

    #[test]
    fn parses_clock_forms() {
        assert_eq!(secs("00:02:05"), 125.0);
        assert_eq!(secs("1:02:03.5"), 3723.5);
        assert_eq!(secs("02:30"), 150.0);
        assert_eq!(secs("0:07.25"), 7.25);
        assert_eq!(secs(" 00:00:09 "), 9.0);
    }

    #[test]
    fn numeric_string_and_number_agree() {
        assert_eq!(secs("125"), 125.0);
        assert_eq!(Timestamp::from_seconds(125.0).unwrap().seconds(), 125.0);
        assert_eq!(secs("125.0"), 125.0);
        assert_eq!(secs("12.5"), 12.5);
        assert_eq!(secs(".5"), 0.5);
    }

    #[test]
    fn rejects_malformed_values() {
        for bad in [
            "bad:value:string:extra",
            "1:2:3:4",
            "",
            "abc",
            "-5",
            "1e3",
            "1.2.3",
            "01:-2:00",
            "aa:10",
            "1.5:00",
            "00:00:",
            ".",
        ] {
            let err = Timestamp::parse(bad).unwrap_err();
            assert!(matches!(err, Error::Format { .. }), "{bad} -> {err}");
        }
        assert!(Timestamp::from_seconds(-1.0).is_err());
        assert!(Timestamp::from_seconds(f64::NAN).is_err());
        assert!(Timestamp::from_seconds(f64::INFINITY).is_err());
        assert!(Timestamp::from_seconds(1.0e20).is_err());
    }

    #[test]
    fn rejects_values_too_large_to_format() {
        let huge = "9".repeat(400);
        for bad in [huge.clone(), format!("00:00:{huge}"), "18446744073709551616".to_owned(), "9007199254740992".to_owned()] {
            let err = Timestamp::parse(&bad).unwrap_err();
            assert!(matches!(err, Error::Format { .. }), "{err}");
        }

        let largest = Timestamp::parse("999999999999").unwrap();
        let again = Timestamp::parse(&largest.format()).unwrap();
        assert_eq!(largest.seconds(), again.seconds());
    }

    #[test]
    fn formats_canonically_without_fraction() {
        assert_eq!(Timestamp::parse("1:02:03.5").unwrap().format(), "01:02:03");
        assert_eq!(Timestamp::from_seconds(59.999).unwrap().format(), "00:00:59");
        assert_eq!(Timestamp::parse("75:00").unwrap().format(), "01:15:00");
        assert_eq!(Timestamp::from_seconds(360_000.0).unwrap().format(), "100:00:00");
        assert_eq!(Timestamp::from_seconds(0.0).unwrap().to_string(), "00:00:00");
    }

    #[test]
    fn canonicalization_is_idempotent() {
        for input in ["125", "12.75", "1:02:03.5", "59:59", "00:00:00", "3:7"] {
            let once = Timestamp::parse(input).unwrap().format();
            let twice = Timestamp::parse(&once).unwrap().format();
            assert_eq!(once, twice, "{input}");
            assert_eq!(
                Timestamp::parse(&once).unwrap().seconds(),
                Timestamp::parse(&twice).unwrap().seconds()
            );
        }
    }

    #[test]
    fn deserializes_numbers_and_strings() {
        let values: Vec<Timestamp> =
            serde_json::from_str(r#"[125, 125.0, "125", "00:02:05"]"#).unwrap();
        assert!(values.iter().all(|t| t.seconds() == 125.0));

        assert!(serde_json::from_str::<Timestamp>("-3").is_err());
        assert!(serde_json::from_str::<Timestamp>(r#""x:y""#).is_err());
        assert!(serde_json::from_str::<Timestamp>("null").is_err());
    }

    #[test]
    fn millisecond_form_keeps_the_fraction() {
        assert_eq!(Timestamp::parse("00:03:30.9").unwrap().format_millis(), "00:03:30.9");
        assert_eq!(Timestamp::parse("150").unwrap().format_millis(), "00:02:30");
        assert_eq!(Timestamp::parse("1.25").unwrap().format_millis(), "00:00:01.25");
        assert_eq!(Timestamp::parse("59.9996").unwrap().format_millis(), "00:01:00");

        let t = Timestamp::parse("1:02:03.5").unwrap();
        assert_eq!(Timestamp::parse(&t.format_millis()).unwrap(), t);
    }

    #[test]
    fn serializes_to_canonical_string() {
        let t = Timestamp::parse("3723.9").unwrap();
        assert_eq!(serde_json::to_string(&t).unwrap(), r#""01:02:03""#);
    }
}
