use std::path::Path;
use std::sync::OnceLock;

use base64::Engine;
use ffmpeg::util::frame::video::Video;
use ffmpeg::{format, media};
use ffmpeg_next::{self as ffmpeg};
use image::codecs::jpeg;
use image::ImageBuffer;
use tracing::debug;

use crate::config::CaptureSettings;
use crate::timestamp::Timestamp;

static INIT: OnceLock<Result<(), ffmpeg::Error>> = OnceLock::new();

pub(crate) fn init() -> anyhow::Result<()> {
    INIT.get_or_init(ffmpeg::init)
        .clone()
        .map_err(anyhow::Error::from)
}

/// A sampled frame encoded as a JPEG data URL.
pub(crate) struct CapturedFrame {
    pub(crate) instant: Timestamp,
    pub(crate) data_url: String,
}

/// Output size that keeps the aspect ratio and caps the width. Dimensions
/// stay even for the scaler.
pub(crate) fn scaled_size(width: u32, height: u32, max_width: u32) -> (u32, u32) {
    if width <= max_width || max_width == 0 {
        return (width, height);
    }
    let scaled_height = (u64::from(height) * u64::from(max_width) / u64::from(width)) as u32;
    (max_width & !1, (scaled_height & !1).max(2))
}

/// Samples one frame every `interval_ms` across the whole video and hands
/// each one to `on_frame` as soon as it is encoded. Returns the number of
/// frames delivered. An error from `on_frame` stops decoding.
pub(crate) fn capture_frames(
    input_path: &Path,
    settings: &CaptureSettings,
    mut on_frame: impl FnMut(CapturedFrame) -> anyhow::Result<()>,
) -> anyhow::Result<usize> {
    use base64::prelude::BASE64_STANDARD;

    init()?;
    let mut input = format::input(&input_path)?;
    let video_stream_index = input
        .streams()
        .best(media::Type::Video)
        .ok_or(anyhow::Error::from(ffmpeg::Error::StreamNotFound))?
        .index();

    let video_stream = input
        .stream(video_stream_index)
        .ok_or(anyhow::Error::from(ffmpeg::Error::StreamNotFound))?;
    let codec_params = video_stream.parameters();
    let time_base: f64 = video_stream.time_base().into();

    let context_decoder = ffmpeg::codec::context::Context::from_parameters(codec_params)?;
    let mut decoder = context_decoder.decoder().video()?;

    let (width, height) = scaled_size(decoder.width(), decoder.height(), settings.max_width);
    let mut scaler = ffmpeg::software::scaling::context::Context::get(
        decoder.format(),
        decoder.width(),
        decoder.height(),
        format::Pixel::RGB24,
        width,
        height,
        ffmpeg::software::scaling::Flags::BILINEAR,
    )?;

    let interval = f64::from(settings.interval_ms.max(1)) / 1000.0;
    let mut next_secs = 0.0;

    let mut delivered = 0_usize;
    let mut process_decoded_frames =
        |decoder: &mut ffmpeg::decoder::Video| -> Result<(), anyhow::Error> {
            let mut decoded = Video::empty();
            while decoder.receive_frame(&mut decoded).is_ok() {
                let pts = decoded
                    .timestamp()
                    .ok_or(anyhow::anyhow!("No pts"))?;
                let secs = (pts as f64 * time_base).max(0.0);
                if secs < next_secs {
                    continue;
                }
                next_secs += interval;
                while next_secs <= secs {
                    next_secs += interval;
                }

                let mut rgb_frame = Video::empty();
                scaler.run(&decoded, &mut rgb_frame)?;
                let jpeg_data = encode_jpeg(&rgb_frame, settings.jpeg_quality)?;

                debug!(frame = delivered, secs, bytes = jpeg_data.len(), "captured frame");
                on_frame(CapturedFrame {
                    instant: Timestamp::from_seconds(secs)?,
                    data_url: "data:image/jpeg;base64,".to_owned()
                        + &BASE64_STANDARD.encode(jpeg_data),
                })?;
                delivered += 1;
            }
            Ok(())
        };

    for (stream, packet) in input.packets() {
        if stream.index() == video_stream_index {
            decoder.send_packet(&packet)?;
            process_decoded_frames(&mut decoder)?;
        }
    }
    decoder.send_eof()?;
    process_decoded_frames(&mut decoder)?;

    Ok(delivered)
}

/// Rows of an RGB24 frame may be padded past `width * 3`.
fn encode_jpeg(frame: &Video, quality: u8) -> anyhow::Result<Vec<u8>> {
    let (width, height) = (frame.width(), frame.height());
    let row = width as usize * 3;
    let stride = frame.stride(0);
    let mut pixels = Vec::with_capacity(row * height as usize);
    for line in frame.data(0).chunks(stride).take(height as usize) {
        pixels.extend_from_slice(&line[..row]);
    }

    let image_buffer = ImageBuffer::<image::Rgb<u8>, _>::from_raw(width, height, pixels)
        .ok_or(anyhow::anyhow!("Failed to create image buffer"))?;

    let mut jpeg_data = Vec::new();
    let mut encoder = jpeg::JpegEncoder::new_with_quality(&mut jpeg_data, quality);
    encoder.encode(
        &image_buffer,
        image_buffer.width(),
        image_buffer.height(),
        image::ExtendedColorType::Rgb8,
    )?;
    Ok(jpeg_data)
}
