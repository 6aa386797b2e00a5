//! Stream-copy remuxing: clip cutting and audio extraction.

use std::path::{Path, PathBuf};

use ffmpeg::{codec, encoder, format, media, rescale, Dictionary, Rational, Rescale};
use ffmpeg_next::{self as ffmpeg};
use tracing::debug;

use crate::capture;
use crate::ranking::ClipRange;

/// How far past the clip end other streams may still carry packets we need.
const INTERLEAVE_SLACK_SECS: f64 = 10.0;

/// Which input streams end up in the output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Streams {
    AudioVideo,
    AudioOnly,
}

impl Streams {
    fn keeps(self, medium: media::Type) -> bool {
        match self {
            Streams::AudioVideo => medium == media::Type::Audio || medium == media::Type::Video,
            Streams::AudioOnly => medium == media::Type::Audio,
        }
    }
}

/// Copies `[start_sec, end_sec)` of the audio and video streams into
/// `output_path` without re-encoding. The clip begins at the keyframe at or
/// before `start_sec`.
pub(crate) fn cut_clip(
    input_path: &Path,
    output_path: &Path,
    start_sec: f64,
    end_sec: f64,
) -> anyhow::Result<()> {
    if end_sec <= start_sec {
        return Err(anyhow::anyhow!(
            "Empty clip range {start_sec}..{end_sec}"
        ));
    }
    remux(input_path, output_path, Streams::AudioVideo, start_sec, Some(end_sec))
}

/// Copies the audio track out of `input_path`, e.g. into an `.m4a` file.
pub(crate) fn extract_audio(input_path: &Path, output_path: &Path) -> anyhow::Result<()> {
    remux(input_path, output_path, Streams::AudioOnly, 0.0, None)
}

/// Copies `[start_sec, end_sec)` of the audio track. The window's own
/// timeline starts at zero.
pub(crate) fn extract_audio_window(
    input_path: &Path,
    output_path: &Path,
    start_sec: f64,
    end_sec: f64,
) -> anyhow::Result<()> {
    remux(input_path, output_path, Streams::AudioOnly, start_sec, Some(end_sec))
}

fn remux(
    input_path: &Path,
    output_path: &Path,
    streams: Streams,
    start_sec: f64,
    end_sec: Option<f64>,
) -> anyhow::Result<()> {
    capture::init()?;
    let mut input = format::input(&input_path)?;
    let mut output = format::output(&output_path)?;

    if start_sec > 0.0 {
        let start_pos = ((start_sec * 1_000_000.0) as i64).rescale((1, 1_000_000), rescale::TIME_BASE);
        input.seek(start_pos, ..start_pos)?;
    }

    let mut stream_mapping = vec![-1_i32; input.nb_streams() as _];
    let mut input_stream_time_base = vec![Rational(0, 1); input.nb_streams() as _];
    let mut output_stream_index = 0;
    for (ist_index, ist) in input.streams().enumerate() {
        if !streams.keeps(ist.parameters().medium()) {
            continue;
        }
        stream_mapping[ist_index] = output_stream_index;
        input_stream_time_base[ist_index] = ist.time_base();
        let mut ost = output.add_stream(encoder::find(codec::Id::None))?;
        ost.set_parameters(ist.parameters());
        clear_codec_tag(&mut ost.parameters());
        output_stream_index += 1;
    }
    if output_stream_index == 0 {
        return Err(anyhow::anyhow!(ffmpeg::Error::StreamNotFound));
    }

    output.set_metadata(input.metadata().to_owned());
    format::context::output::dump(
        &output,
        0,
        Some(
            output_path
                .to_str()
                .ok_or(anyhow::anyhow!("Invalid path"))?,
        ),
    );

    // Packets before the seek point keep negative timestamps after the
    // shift below; the muxer moves the whole clip back to zero.
    let mut opts = Dictionary::new();
    opts.set("avoid_negative_ts", "make_zero");
    output.write_header_with(opts)?;

    let mut output_stream_time_base = vec![Rational(0, 1); output_stream_index as usize];
    for (ost_index, ost) in output.streams().enumerate() {
        output_stream_time_base[ost_index] = ost.time_base();
    }

    let mut written = 0_usize;
    for (ist, mut packet) in input.packets() {
        let ist_index = ist.index();
        let ost_index = stream_mapping[ist_index];
        if ost_index < 0 {
            continue;
        }
        let ist_time_base = input_stream_time_base[ist_index];
        let tb: f64 = ist_time_base.into();
        let Some(pts) = packet.pts().or(packet.dts()) else {
            continue;
        };
        let secs = pts as f64 * tb;
        if let Some(end) = end_sec.filter(|end| secs >= *end) {
            if secs >= end + INTERLEAVE_SLACK_SECS {
                break;
            }
            continue;
        }
        if ist.parameters().medium() != media::Type::Video && secs < start_sec {
            continue;
        }

        let offset = (start_sec / tb).round() as i64;
        packet.set_pts(packet.pts().map(|pts| pts - offset));
        packet.set_dts(packet.dts().map(|dts| dts - offset));
        packet.rescale_ts(ist_time_base, output_stream_time_base[ost_index as usize]);
        packet.set_position(-1);
        packet.set_stream(ost_index as _);
        packet.write_interleaved(&mut output)?;
        written += 1;
    }

    output.write_trailer()?;
    debug!(output = %output_path.display(), packets = written, "remux finished");
    Ok(())
}

/// Lets the output muxer pick its own tag; a tag from another container
/// (e.g. mkv into mp4) is otherwise rejected.
pub(crate) fn clear_codec_tag(parameters: &mut codec::Parameters) {
    // SAFETY: `parameters` wraps a valid AVCodecParameters for its lifetime.
    unsafe {
        (*parameters.as_mut_ptr()).codec_tag = 0;
    }
}

/// Length of the container in seconds.
pub(crate) fn media_duration(path: &Path) -> anyhow::Result<f64> {
    capture::init()?;
    let input = format::input(&path)?;
    let duration = input.duration();
    if duration <= 0 {
        return Err(anyhow::anyhow!("Unknown duration for {}", path.display()));
    }
    Ok(duration as f64 / f64::from(ffmpeg::ffi::AV_TIME_BASE))
}

/// File name for a clip: `<stem>_<start>_<end>.mp4`, times in whole seconds.
pub(crate) fn clip_file_name(stem: &str, range: &ClipRange) -> String {
    format!(
        "{stem}_{}_{}.mp4",
        range.start.seconds().floor() as u64,
        range.end.seconds().floor() as u64
    )
}

pub(crate) fn clip_path(dir: &Path, input_path: &Path, range: &ClipRange) -> PathBuf {
    let stem = input_path
        .file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or("clip");
    dir.join(clip_file_name(stem, range))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timestamp::Timestamp;

    fn range(start: &str, end: &str) -> ClipRange {
        ClipRange {
            start: Timestamp::parse(start).unwrap(),
            end: Timestamp::parse(end).unwrap(),
            title: None,
        }
    }

    #[test]
    fn clip_names_use_whole_seconds() {
        assert_eq!(
            clip_file_name("home_alone", &range("00:02:30", "00:03:30.9")),
            "home_alone_150_210.mp4"
        );
    }

    #[test]
    fn clip_path_uses_input_stem() {
        let path = clip_path(
            Path::new("/work/clips"),
            Path::new("/videos/home_alone_4800_end.mp4"),
            &range("10", "20"),
        );
        assert_eq!(path, PathBuf::from("/work/clips/home_alone_4800_end_10_20.mp4"));
    }

    #[test]
    fn stream_selection() {
        assert!(Streams::AudioVideo.keeps(media::Type::Video));
        assert!(Streams::AudioVideo.keeps(media::Type::Audio));
        assert!(!Streams::AudioVideo.keeps(media::Type::Subtitle));
        assert!(Streams::AudioOnly.keeps(media::Type::Audio));
        assert!(!Streams::AudioOnly.keeps(media::Type::Video));
    }

    #[test]
    fn codec_tag_is_cleared() {
        let mut parameters = codec::Parameters::new();
        unsafe {
            (*parameters.as_mut_ptr()).codec_tag = u32::from_le_bytes(*b"avc1");
        }
        clear_codec_tag(&mut parameters);
        assert_eq!(unsafe { (*parameters.as_ptr()).codec_tag }, 0);
    }

    #[test]
    fn duration_of_missing_file_is_an_error() {
        assert!(media_duration(Path::new("missing.m4a")).is_err());
    }

    #[test]
    fn empty_range_is_rejected_before_touching_files() {
        let err = cut_clip(Path::new("missing.mp4"), Path::new("out.mp4"), 5.0, 5.0).unwrap_err();
        assert!(err.to_string().contains("Empty clip range"));
    }
}
