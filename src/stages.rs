//! One function per pipeline stage. Each reads its inputs from disk, writes
//! its output file and reports what it produced.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::ai::OpenAi;
use crate::align::{self, FrameCaption};
use crate::capture::{self, CapturedFrame};
use crate::config::{CaptureSettings, ShortsSettings, ShowProfile};
use crate::error::Error;
use crate::prompt;
use crate::ranking::{self, FunnyTimestamps};
use crate::shorts;
use crate::store::{self, Transcript};
use crate::timestamp::Timestamp;
use crate::video;

/// Upper bound on the length of a single frame caption.
const CAPTION_MAX_TOKENS: u32 = 80;

/// Frames waiting for a caption while decoding runs ahead.
const FRAME_QUEUE: usize = 4;

/// Largest file the transcription endpoint accepts.
const MAX_UPLOAD_BYTES: u64 = 25 * 1024 * 1024;

/// Samples frames from `input` and captions each one as it is decoded.
/// Frames the model fails on are skipped.
pub(crate) async fn caption_frames(
    ai: &OpenAi,
    settings: &CaptureSettings,
    input: &Path,
    output: &Path,
) -> anyhow::Result<Vec<FrameCaption>> {
    let (sender, mut receiver) = mpsc::channel::<CapturedFrame>(FRAME_QUEUE);
    let capture_input = input.to_path_buf();
    let capture_settings = settings.clone();
    let capture = tokio::task::spawn_blocking(move || {
        capture::capture_frames(&capture_input, &capture_settings, |frame| {
            sender
                .blocking_send(frame)
                .map_err(|_| anyhow::anyhow!("Frame receiver closed"))
        })
    });

    let mut sampled = 0_usize;
    let mut captions = Vec::new();
    while let Some(frame) = receiver.recv().await {
        let index = sampled;
        sampled += 1;
        match ai
            .annotate_frames(&settings.prompt, vec![frame.data_url], CAPTION_MAX_TOKENS)
            .await
        {
            Ok(text) => captions.push(FrameCaption {
                instant: frame.instant,
                text: text.trim().to_owned(),
            }),
            Err(err) => warn!(frame = index, time = %frame.instant, "frame caption failed: {err:#}"),
        }
    }
    capture
        .await
        .context("frame capture task failed")?
        .with_context(|| format!("capturing frames from {}", input.display()))?;

    if sampled == 0 {
        return Err(anyhow::anyhow!("No frames captured from {}", input.display()));
    }
    if captions.is_empty() {
        return Err(Error::service("captioning model", "no frame could be captioned").into());
    }
    if captions.len() < sampled {
        warn!(captioned = captions.len(), total = sampled, "some frames have no caption");
    }

    store::write_json(output, &captions)?;
    info!(path = %output.display(), frames = captions.len(), "frame captions saved");
    Ok(captions)
}

/// Splits `duration` seconds of audio into equal windows small enough that
/// each stays under `max_bytes`, assuming a steady bitrate. Leaves a tenth of
/// the budget as headroom.
fn upload_windows(duration: f64, size: u64, max_bytes: u64) -> Vec<(f64, f64)> {
    let budget = (max_bytes / 10 * 9).max(1);
    let count = size.div_ceil(budget).max(1);
    let step = duration / count as f64;
    (0..count)
        .map(|i| {
            let end = if i + 1 == count {
                duration
            } else {
                (i + 1) as f64 * step
            };
            (i as f64 * step, end)
        })
        .collect()
}

async fn transcribe_track(ai: &OpenAi, audio: &Path) -> anyhow::Result<Transcript> {
    let size = fs::metadata(audio).map_err(|e| Error::read(audio, e))?.len();
    if size <= MAX_UPLOAD_BYTES {
        return ai.transcribe(audio).await;
    }

    let duration = video::media_duration(audio)?;
    let windows = upload_windows(duration, size, MAX_UPLOAD_BYTES);
    info!(bytes = size, windows = windows.len(), "audio exceeds the upload limit, transcribing in windows");

    let extension = audio.extension().and_then(|ext| ext.to_str()).unwrap_or("m4a");
    let mut parts = Vec::with_capacity(windows.len());
    for (index, (start, end)) in windows.into_iter().enumerate() {
        let part_path = audio.with_extension(format!("part{index}.{extension}"));
        video::extract_audio_window(audio, &part_path, start, end)
            .with_context(|| format!("splitting audio at {start:.1}s"))?;
        let part = ai.transcribe(&part_path).await;
        if let Err(err) = fs::remove_file(&part_path) {
            warn!(path = %part_path.display(), "could not remove audio window: {err}");
        }
        let part = part.with_context(|| format!("transcribing audio window {index}"))?;
        parts.push((start, part));
    }
    Ok(Transcript::concat(parts))
}

/// Extracts the audio track to `audio` and transcribes it.
pub(crate) async fn transcribe(
    ai: &OpenAi,
    input: &Path,
    audio: &Path,
    output: &Path,
    keep_audio: bool,
) -> anyhow::Result<usize> {
    video::extract_audio(input, audio)
        .with_context(|| format!("extracting audio from {}", input.display()))?;

    let transcript = transcribe_track(ai, audio).await;
    if !keep_audio {
        if let Err(err) = fs::remove_file(audio) {
            warn!(path = %audio.display(), "could not remove extracted audio: {err}");
        }
    }
    let transcript = transcript.context("transcribing audio")?;

    store::write_json(output, &transcript)?;
    info!(path = %output.display(), segments = transcript.segments.len(), "transcript saved");
    Ok(transcript.segments.len())
}

/// Aligns transcript segments with frame captions and writes the merged file.
pub(crate) fn merge(transcript: &Path, frame_captions: &Path, output: &Path) -> anyhow::Result<usize> {
    let segments = store::read_segments(transcript)?;
    let captions = store::read_frame_captions(frame_captions)?;
    let merged = align::merge(&segments, &captions);
    store::write_merged(output, &merged)?;
    info!(path = %output.display(), entries = merged.len(), "merged captions saved");
    Ok(merged.len())
}

/// Asks the chat model for the funniest ranges of the merged timeline.
pub(crate) async fn rank(
    ai: &OpenAi,
    profile: &ShowProfile,
    merged: &Path,
    output: &Path,
) -> anyhow::Result<FunnyTimestamps> {
    let entries = store::read_merged(merged)?;
    if entries.is_empty() {
        return Err(anyhow::anyhow!("{} has no segments to rank", merged.display()));
    }

    let request = prompt::build(profile, &entries).context("building ranking prompt")?;
    let reply = ai
        .complete_json(prompt::SYSTEM_PROMPT, &request)
        .await
        .context("requesting clip ranking")?;
    tracing::debug!(reply = %reply, "ranking reply");

    let response = ranking::parse_response(&reply, profile.num_clips)?;
    let funny = ranking::to_funny_timestamps(response, profile.max_clip_secs);
    store::write_json(output, &funny)?;
    info!(path = %output.display(), clips = funny.full_timestamps.len(), "clip ranking saved");
    Ok(funny)
}

/// One row of `clips.json`.
#[derive(Debug, Clone, Serialize)]
pub(crate) struct ClipRecord {
    pub(crate) file: PathBuf,
    pub(crate) start: Timestamp,
    pub(crate) end: Timestamp,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) title: Option<String>,
    /// Vertical rendition, when the shorts pass ran and succeeded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) short: Option<PathBuf>,
}

pub(crate) const MANIFEST_NAME: &str = "clips.json";

fn render_short(clip: &Path, title: Option<&str>, settings: &ShortsSettings) -> Option<PathBuf> {
    let path = shorts::short_path(clip);
    match shorts::render_short(clip, &path, title, settings) {
        Ok(()) => {
            info!(path = %path.display(), "short saved");
            Some(path)
        }
        Err(err) => {
            warn!(clip = %clip.display(), "short failed: {err:#}");
            None
        }
    }
}

/// Cuts every ranked range out of `input`. A failing clip is logged and
/// skipped; the rest are still produced. With the shorts pass enabled each
/// clip also gets a vertical, titled rendition.
pub(crate) fn cut(
    timestamps: &Path,
    input: &Path,
    clip_dir: &Path,
    shorts_settings: &ShortsSettings,
) -> anyhow::Result<Vec<ClipRecord>> {
    let funny: FunnyTimestamps = store::read_json(timestamps)?;
    let ranges = ranking::usable_ranges(funny.full_timestamps, u32::MAX);
    if ranges.is_empty() {
        warn!(path = %timestamps.display(), "no clip ranges to cut");
        return Ok(Vec::new());
    }

    fs::create_dir_all(clip_dir)
        .with_context(|| format!("creating {}", clip_dir.display()))?;
    if shorts_settings.enabled {
        let dir = clip_dir.join(shorts::SHORTS_DIR);
        fs::create_dir_all(&dir).with_context(|| format!("creating {}", dir.display()))?;
    }

    let requested = ranges.len();
    let mut records = Vec::new();
    for range in ranges {
        let path = video::clip_path(clip_dir, input, &range);
        match video::cut_clip(input, &path, range.start.seconds(), range.end.seconds()) {
            Ok(()) => {
                info!(path = %path.display(), start = %range.start, end = %range.end, "clip saved");
                let short = shorts_settings
                    .enabled
                    .then(|| render_short(&path, range.title.as_deref(), shorts_settings))
                    .flatten();
                records.push(ClipRecord {
                    file: path,
                    start: range.start,
                    end: range.end,
                    title: range.title,
                    short,
                });
            }
            Err(err) => warn!(start = %range.start, end = %range.end, "clip failed: {err:#}"),
        }
    }

    store::write_json(&clip_dir.join(MANIFEST_NAME), &records)?;
    if records.is_empty() {
        return Err(anyhow::anyhow!(
            "None of the {requested} clip ranges could be cut from {}",
            input.display()
        ));
    }
    info!(clips = records.len(), requested, "clips written");
    Ok(records)
}
