//! JSON files exchanged between stages.

use std::fs;
use std::path::Path;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::align::{AudioSegment, FrameCaption, MergedEntry};
use crate::error::{Error, Result};

/// Speech transcript in the shape of Whisper's `verbose_json` output. Only
/// `segments` is required when reading; other keys are carried along for
/// inspection.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub(crate) struct Transcript {
    #[serde(default)]
    pub(crate) text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) language: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) duration: Option<f64>,
    pub(crate) segments: Vec<TranscriptSegment>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct TranscriptSegment {
    #[serde(default)]
    pub(crate) id: i64,
    pub(crate) start: f64,
    pub(crate) end: f64,
    pub(crate) text: String,
}

impl Transcript {
    /// Joins transcripts of consecutive windows of one track. Each part comes
    /// with the offset of its window; segment times are shifted by it and ids
    /// renumbered from zero.
    pub(crate) fn concat(parts: Vec<(f64, Transcript)>) -> Transcript {
        let mut joined = Transcript::default();
        for (offset, part) in parts {
            if joined.language.is_none() {
                joined.language = part.language;
            }
            if let Some(duration) = part.duration {
                joined.duration = Some(offset + duration);
            }
            let text = part.text.trim();
            if !text.is_empty() {
                if !joined.text.is_empty() {
                    joined.text.push(' ');
                }
                joined.text.push_str(text);
            }
            for segment in part.segments {
                joined.segments.push(TranscriptSegment {
                    id: joined.segments.len() as i64,
                    start: segment.start + offset,
                    end: segment.end + offset,
                    text: segment.text,
                });
            }
        }
        joined
    }
}

pub(crate) fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let raw = fs::read(path).map_err(|e| Error::read(path, e))?;
    serde_json::from_slice(&raw).map_err(|e| Error::schema(path, e))
}

/// Truncates and rewrites `path`. The parent directory must already exist.
pub(crate) fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let mut buf = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut serializer = serde_json::Serializer::with_formatter(&mut buf, formatter);
    value
        .serialize(&mut serializer)
        .map_err(|e| Error::schema(path, e))?;
    buf.push(b'\n');
    fs::write(path, buf).map_err(|e| Error::write(path, e))
}

/// Reads the audio segments out of a transcript file. Timestamps may be
/// numbers or strings.
pub(crate) fn read_segments(path: &Path) -> Result<Vec<AudioSegment>> {
    #[derive(Deserialize)]
    struct Segments {
        segments: Vec<AudioSegment>,
    }
    read_json::<Segments>(path).map(|doc| doc.segments)
}

pub(crate) fn read_frame_captions(path: &Path) -> Result<Vec<FrameCaption>> {
    read_json(path)
}

pub(crate) fn read_merged(path: &Path) -> Result<Vec<MergedEntry>> {
    read_json(path)
}

pub(crate) fn write_merged(path: &Path, entries: &[MergedEntry]) -> Result<()> {
    write_json(path, entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timestamp::Timestamp;

    fn entry(seconds: f64, audio: &str, video: &[&str]) -> MergedEntry {
        MergedEntry {
            time: Timestamp::from_seconds(seconds).unwrap(),
            audio_caption: audio.to_owned(),
            video_captions: video.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn writes_fixed_merged_shape() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("merged.json");
        write_merged(&path, &[entry(125.4, "hello", &["a dog", "a cat"])]).unwrap();

        let value: serde_json::Value = read_json(&path).unwrap();
        assert_eq!(
            value,
            serde_json::json!([{
                "time": "00:02:05",
                "audio_caption": "hello",
                "video_caption": ["a dog", "a cat"],
            }])
        );
        let text = fs::read_to_string(&path).unwrap();
        assert!(text.contains("\n    {"));
    }

    #[test]
    fn overwrites_previous_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("merged.json");
        fs::write(&path, "x".repeat(4096)).unwrap();

        write_merged(&path, &[]).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "[]\n");
    }

    #[test]
    fn missing_directory_is_a_write_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nope").join("merged.json");
        let err = write_merged(&path, &[entry(0.0, "a", &[])]).unwrap_err();
        assert!(matches!(err, Error::Write { .. }));
        assert!(!path.exists());
    }

    #[test]
    fn reads_transcript_segments_with_mixed_timestamps() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audio.json");
        fs::write(
            &path,
            r#"{"text": "hi there", "language": "en", "segments": [
                {"id": 0, "seek": 0, "start": 0.0, "end": 2.5, "text": " hi", "tokens": [1, 2]},
                {"start": "2.5", "end": "00:00:04", "text": " there"}
            ]}"#,
        )
        .unwrap();

        let segments = read_segments(&path).unwrap();
        assert_eq!(segments.len(), 2);
        assert_eq!(segments[0].end.seconds(), 2.5);
        assert_eq!(segments[1].start.seconds(), 2.5);
        assert_eq!(segments[1].end.seconds(), 4.0);
    }

    #[test]
    fn missing_key_is_a_schema_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audio.json");
        fs::write(&path, r#"{"text": "no segments here"}"#).unwrap();
        assert!(matches!(
            read_segments(&path).unwrap_err(),
            Error::Schema { .. }
        ));

        fs::write(&path, r#"[{"time": "00:00:01"}]"#).unwrap();
        assert!(matches!(
            read_frame_captions(&path).unwrap_err(),
            Error::Schema { .. }
        ));
    }

    #[test]
    fn bad_timestamp_in_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("video.json");
        fs::write(&path, r#"[{"time": "1:2:3:4", "caption": "x"}]"#).unwrap();
        let err = read_frame_captions(&path).unwrap_err();
        assert!(err.to_string().contains("1:2:3:4"), "{err}");
    }

    fn part(text: &str, duration: f64, segments: &[(f64, f64, &str)]) -> Transcript {
        Transcript {
            text: text.to_owned(),
            language: Some("english".to_owned()),
            duration: Some(duration),
            segments: segments
                .iter()
                .enumerate()
                .map(|(id, (start, end, text))| TranscriptSegment {
                    id: id as i64,
                    start: *start,
                    end: *end,
                    text: text.to_string(),
                })
                .collect(),
        }
    }

    #[test]
    fn window_transcripts_join_on_one_timeline() {
        let joined = Transcript::concat(vec![
            (0.0, part(" Hello.", 600.0, &[(0.0, 2.0, " Hello.")])),
            (600.0, part("Run! Now!", 580.5, &[(1.5, 3.0, " Run!"), (3.0, 4.25, " Now!")])),
        ]);

        assert_eq!(joined.text, "Hello. Run! Now!");
        assert_eq!(joined.language.as_deref(), Some("english"));
        assert_eq!(joined.duration, Some(1180.5));
        let times = joined
            .segments
            .iter()
            .map(|segment| (segment.id, segment.start, segment.end))
            .collect::<Vec<_>>();
        assert_eq!(times, vec![(0, 0.0, 2.0), (1, 601.5, 603.0), (2, 603.0, 604.25)]);
        assert_eq!(joined.segments[2].text, " Now!");
    }

    #[test]
    fn single_window_is_unchanged() {
        let original = part("Hi", 10.0, &[(0.5, 1.0, " Hi")]);
        let joined = Transcript::concat(vec![(0.0, original.clone())]);
        assert_eq!(joined.segments[0].start, original.segments[0].start);
        assert_eq!(joined.text, "Hi");
        assert!(Transcript::concat(Vec::new()).segments.is_empty());
    }

    #[test]
    fn missing_file_is_a_read_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = read_merged(&dir.path().join("absent.json")).unwrap_err();
        assert!(matches!(err, Error::Read { .. }));
    }
}
