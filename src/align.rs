use serde::{Deserialize, Serialize};

use crate::timestamp::Timestamp;

/// One transcribed utterance.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub(crate) struct AudioSegment {
    pub(crate) start: Timestamp,
    pub(crate) end: Timestamp,
    pub(crate) text: String,
}

/// Caption for a single sampled frame, as stored in the frame caption file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct FrameCaption {
    #[serde(rename = "time")]
    pub(crate) instant: Timestamp,
    #[serde(rename = "caption")]
    pub(crate) text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct MergedEntry {
    pub(crate) time: Timestamp,
    pub(crate) audio_caption: String,
    #[serde(rename = "video_caption")]
    pub(crate) video_captions: Vec<String>,
}

impl AudioSegment {
    /// Inclusive at both ends. A segment whose end precedes its start
    /// contains nothing.
    pub(crate) fn contains(&self, instant: Timestamp) -> bool {
        self.start <= instant && instant <= self.end
    }
}

/// Attaches to every audio segment the frame captions that fall inside it.
///
/// Produces exactly one entry per segment, in segment order, with captions in
/// their input order. Neither input needs to be sorted; a caption sitting on
/// a boundary shared by two segments lands in both.
pub(crate) fn merge(segments: &[AudioSegment], captions: &[FrameCaption]) -> Vec<MergedEntry> {
    segments
        .iter()
        .map(|segment| MergedEntry {
            time: segment.start,
            audio_caption: segment.text.clone(),
            video_captions: captions
                .iter()
                .filter(|caption| segment.contains(caption.instant))
                .map(|caption| caption.text.clone())
                .collect(),
        })
        .collect()
}
