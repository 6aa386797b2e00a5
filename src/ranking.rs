//! Validation of the ranking model's reply and the file handed to the cutter.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::error::{Error, Result};
use crate::timestamp::Timestamp;

const SERVICE: &str = "ranking model";

/// A time range picked by the ranking model. On the wire this is
/// `[start, end]` or `[start, end, title]`; bounds keep their millisecond part.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<Value>", into = "RawRange")]
pub(crate) struct ClipRange {
    pub(crate) start: Timestamp,
    pub(crate) end: Timestamp,
    pub(crate) title: Option<String>,
}

#[derive(Serialize)]
#[serde(untagged)]
enum RawRange {
    Titled(String, String, String),
    Bare(String, String),
}

impl From<ClipRange> for RawRange {
    fn from(range: ClipRange) -> Self {
        let (start, end) = (range.start.format_millis(), range.end.format_millis());
        match range.title {
            Some(title) => RawRange::Titled(start, end, title),
            None => RawRange::Bare(start, end),
        }
    }
}

impl TryFrom<Vec<Value>> for ClipRange {
    type Error = Error;

    fn try_from(items: Vec<Value>) -> Result<Self> {
        let (start, end, title) = match items.as_slice() {
            [start, end] => (start, end, None),
            [start, end, title] => (start, end, Some(title)),
            other => {
                return Err(Error::format(
                    Value::Array(other.to_vec()).to_string(),
                    "expected [start, end] or [start, end, title]",
                ))
            }
        };
        let title = match title {
            None | Some(Value::Null) => None,
            Some(Value::String(title)) => Some(title.clone()),
            Some(other) => {
                return Err(Error::format(other.to_string(), "clip title is not a string"))
            }
        };
        Ok(Self {
            start: timestamp_of(start)?,
            end: timestamp_of(end)?,
            title,
        })
    }
}

fn timestamp_of(value: &Value) -> Result<Timestamp> {
    match value {
        Value::String(text) => Timestamp::parse(text),
        Value::Number(number) => number
            .as_f64()
            .ok_or_else(|| Error::format(number.to_string(), "not a finite number"))
            .and_then(Timestamp::from_seconds),
        other => Err(Error::format(other.to_string(), "expected a string or number")),
    }
}

impl ClipRange {
    pub(crate) fn duration_secs(&self) -> f64 {
        self.end.seconds() - self.start.seconds()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct RankingResponse {
    pub(crate) full: Vec<ClipRange>,
    pub(crate) starts: Vec<Timestamp>,
}

/// Reply shape before timestamps are validated.
#[derive(Deserialize)]
struct RawResponse {
    funniest_timestamps_full: Vec<Vec<Value>>,
    funniest_start_timestamps_only: Vec<Value>,
}

/// Written by the rank stage and read by the cut stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct FunnyTimestamps {
    /// Start times in seconds, e.g. `"150.0"`.
    #[serde(default)]
    pub(crate) funniest_timestamps: Vec<String>,
    pub(crate) full_timestamps: Vec<ClipRange>,
}

/// Models like to wrap JSON in a fenced block even when told not to.
fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let body = match rest.split_once('\n') {
        Some((_, body)) => body,
        // ```json{...}``` on a single line: drop the language tag.
        None => rest.trim_start_matches(|c: char| c.is_ascii_alphanumeric()),
    };
    let body = body.trim_end();
    body.strip_suffix("```").unwrap_or(body).trim()
}

pub(crate) fn parse_response(text: &str, expected: usize) -> Result<RankingResponse> {
    let body = strip_code_fence(text);
    let value: Value = serde_json::from_str(body)
        .map_err(|e| Error::service(SERVICE, format!("reply is not JSON: {e}")))?;

    for key in ["funniest_timestamps_full", "funniest_start_timestamps_only"] {
        if value.get(key).is_none() {
            return Err(Error::service(SERVICE, format!("reply lacks '{key}'")));
        }
    }
    let raw: RawResponse =
        serde_json::from_value(value).map_err(|e| Error::service(SERVICE, e.to_string()))?;

    let response = RankingResponse {
        full: raw
            .funniest_timestamps_full
            .into_iter()
            .map(ClipRange::try_from)
            .collect::<Result<_>>()?,
        starts: raw
            .funniest_start_timestamps_only
            .iter()
            .map(timestamp_of)
            .collect::<Result<_>>()?,
    };

    if response.full.len() != expected {
        warn!(
            expected,
            received = response.full.len(),
            "ranking reply has an unexpected number of clips"
        );
    }
    Ok(response)
}

/// Drops ranges that cannot be cut and flags ones longer than `max_secs`.
pub(crate) fn usable_ranges(ranges: Vec<ClipRange>, max_secs: u32) -> Vec<ClipRange> {
    ranges
        .into_iter()
        .filter(|range| {
            if range.end <= range.start {
                warn!(start = %range.start, end = %range.end, "dropping empty or reversed clip range");
                return false;
            }
            if range.duration_secs() > f64::from(max_secs) {
                warn!(start = %range.start, end = %range.end, max_secs, "clip range is longer than requested");
            }
            true
        })
        .collect()
}

/// Float text with a fraction: `150` becomes `"150.0"`, `12.5` stays `"12.5"`.
fn seconds_text(seconds: f64) -> String {
    format!("{seconds:?}")
}

pub(crate) fn to_funny_timestamps(response: RankingResponse, max_secs: u32) -> FunnyTimestamps {
    FunnyTimestamps {
        funniest_timestamps: response
            .starts
            .iter()
            .map(|start| seconds_text(start.seconds()))
            .collect(),
        full_timestamps: usable_ranges(response.full, max_secs),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const REPLY: &str = r#"{
        "funniest_timestamps_full": [
            ["00:02:30", "00:03:30", "Kevin Outsmarts the Burglars"],
            ["05:15", "06:15"]
        ],
        "funniest_start_timestamps_only": ["00:02:30", "05:15"]
    }"#;

    #[test]
    fn parses_titled_and_bare_ranges() {
        let response = parse_response(REPLY, 2).unwrap();
        assert_eq!(response.full.len(), 2);
        assert_eq!(response.full[0].start.seconds(), 150.0);
        assert_eq!(response.full[0].end.seconds(), 210.0);
        assert_eq!(
            response.full[0].title.as_deref(),
            Some("Kevin Outsmarts the Burglars")
        );
        assert_eq!(response.full[1].title, None);
        assert_eq!(response.starts[1].seconds(), 315.0);
    }

    #[test]
    fn accepts_fenced_reply() {
        let fenced = format!("```json\n{REPLY}\n```");
        assert_eq!(
            parse_response(&fenced, 2).unwrap(),
            parse_response(REPLY, 2).unwrap()
        );
        let bare_fence = format!("```\n{REPLY}```\n");
        assert!(parse_response(&bare_fence, 2).is_ok());
    }

    #[test]
    fn accepts_single_line_fence() {
        let compact = r#"{"funniest_timestamps_full": [["00:00:10", "00:00:20"]], "funniest_start_timestamps_only": ["00:00:10"]}"#;
        for fenced in [format!("```{compact}```"), format!("```json{compact}```"), format!("```json {compact} ```")] {
            let response = parse_response(&fenced, 1).unwrap();
            assert_eq!(response.full[0].end.seconds(), 20.0, "{fenced}");
        }
        assert_eq!(strip_code_fence("``````"), "");
    }

    #[test]
    fn non_json_is_a_service_error() {
        let err = parse_response("Sure! The funniest moment is at 00:02:30.", 1).unwrap_err();
        assert!(matches!(err, Error::ExternalService { .. }));
    }

    #[test]
    fn missing_keys_are_a_service_error() {
        let err = parse_response(r#"{"funniest_timestamps": ["00:02:30"]}"#, 1).unwrap_err();
        assert!(matches!(err, Error::ExternalService { .. }));
        assert!(err.to_string().contains("funniest_timestamps_full"));
    }

    #[test]
    fn bad_timestamp_is_a_format_error() {
        let reply = r#"{"funniest_timestamps_full": [["soon", "later"]],
                        "funniest_start_timestamps_only": []}"#;
        let err = parse_response(reply, 1).unwrap_err();
        assert!(matches!(err, Error::Format { .. }), "{err}");
    }

    #[test]
    fn count_mismatch_is_tolerated() {
        assert_eq!(parse_response(REPLY, 10).unwrap().full.len(), 2);
    }

    #[test]
    fn converts_starts_to_seconds_text() {
        let response = parse_response(REPLY, 2).unwrap();
        let funny = to_funny_timestamps(response, 90);
        assert_eq!(funny.funniest_timestamps, vec!["150.0", "315.0"]);
        assert_eq!(funny.full_timestamps.len(), 2);
        assert_eq!(seconds_text(3723.5), "3723.5");
    }

    #[test]
    fn drops_reversed_ranges_keeps_long_ones() {
        let range = |start: &str, end: &str| ClipRange {
            start: Timestamp::parse(start).unwrap(),
            end: Timestamp::parse(end).unwrap(),
            title: None,
        };
        let kept = usable_ranges(
            vec![
                range("00:01:00", "00:00:30"),
                range("00:01:00", "00:01:00"),
                range("00:00:00", "00:05:00"),
                range("00:02:00", "00:02:20"),
            ],
            90,
        );
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].duration_secs(), 300.0);
    }

    #[test]
    fn funny_timestamps_file_shape() {
        let funny = FunnyTimestamps {
            funniest_timestamps: vec!["150.0".to_owned()],
            full_timestamps: vec![ClipRange {
                start: Timestamp::parse("150").unwrap(),
                end: Timestamp::parse("210.5").unwrap(),
                title: Some("Epic Slip".to_owned()),
            }],
        };
        let value = serde_json::to_value(&funny).unwrap();
        assert_eq!(
            value,
            serde_json::json!({
                "funniest_timestamps": ["150.0"],
                "full_timestamps": [["00:02:30", "00:03:30.5", "Epic Slip"]],
            })
        );

        let reread: FunnyTimestamps = serde_json::from_value(value).unwrap();
        assert_eq!(reread.full_timestamps[0].end.seconds(), 210.5);

        let cutter_input: FunnyTimestamps =
            serde_json::from_str(r#"{"full_timestamps": [["00:00:10", "00:00:20"]]}"#).unwrap();
        assert_eq!(cutter_input.full_timestamps[0].duration_secs(), 10.0);
    }
}
