//! Vertical renditions of cut clips: the frame is padded to 9:16 and the
//! clip title is burned into its lower part. Video is re-encoded to H.264,
//! audio is copied as is.

use std::path::{Path, PathBuf};

use ffmpeg::encoder;
use ffmpeg::util::frame::video::Video;
use ffmpeg_next::{
    self as ffmpeg, codec, decoder, filter, format, media, picture, Dictionary, Packet, Rational,
};
use tracing::debug;

use crate::capture;
use crate::config::ShortsSettings;
use crate::video;

/// Fraction of the frame height where the title block starts.
const TITLE_TOP: f64 = 0.75;
const LINE_SPACING: u32 = 10;
pub(crate) const SHORTS_DIR: &str = "shorts";

/// Output size for a 9:16 letterbox of a `width`x`height` frame, or `None`
/// when the frame is already at least that tall.
pub(crate) fn letterbox_size(width: u32, height: u32) -> Option<(u32, u32)> {
    let target = (u64::from(width) * 16 / 9) as u32 & !1;
    (target > height).then_some((width, target))
}

/// Hashtags go on their own line under the title.
pub(crate) fn title_text(title: &str) -> String {
    let (head, tags) = match title.find('#') {
        Some(pos) => title.split_at(pos),
        None => (title, ""),
    };
    [head.trim(), tags.trim()]
        .into_iter()
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

fn escape(value: &str, special: &[char]) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        if special.contains(&c) {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// Escapes an option value for both levels of filtergraph parsing: the
/// option list of one filter, then the graph description around it.
fn filter_value(value: &str) -> String {
    let option = escape(value, &['\\', '\'', ':']);
    escape(&option, &['\\', '\'', '[', ']', ',', ';'])
}

/// A filter chain and the frame size it produces.
#[derive(Debug, PartialEq)]
pub(crate) struct FilterPlan {
    pub(crate) spec: String,
    pub(crate) width: u32,
    pub(crate) height: u32,
}

pub(crate) fn filter_plan(
    width: u32,
    height: u32,
    title: Option<&str>,
    settings: &ShortsSettings,
) -> FilterPlan {
    let mut filters = Vec::new();
    let (mut out_width, mut out_height) = (width, height);

    if let Some((padded_width, padded_height)) =
        letterbox_size(width, height).filter(|_| settings.letterbox)
    {
        let top = ((padded_height - height) / 2) & !1;
        filters.push(format!(
            "pad=width={padded_width}:height={padded_height}:x=0:y={top}:color=black"
        ));
        (out_width, out_height) = (padded_width, padded_height);
    }

    let text = title
        .filter(|_| settings.burn_titles)
        .map(title_text)
        .filter(|text| !text.is_empty());
    if let Some(text) = text {
        let font_size = (out_width / 15).max(8);
        let mut drawtext = format!(
            "drawtext=text={}:expansion=none:fontsize={font_size}:fontcolor=white:borderw={}:bordercolor=black:line_spacing={LINE_SPACING}:x=(w-text_w)/2:y={}",
            filter_value(&text),
            (font_size / 20).max(1),
            (f64::from(out_height) * TITLE_TOP) as u32
        );
        if let Some(font) = &settings.font_file {
            drawtext.push_str(":fontfile=");
            drawtext.push_str(&filter_value(&font.to_string_lossy()));
        }
        filters.push(drawtext);
    }

    filters.push("format=yuv420p".to_owned());
    FilterPlan {
        spec: filters.join(","),
        width: out_width,
        height: out_height,
    }
}

/// `<clip dir>/shorts/<clip file name>`.
pub(crate) fn short_path(clip_path: &Path) -> PathBuf {
    let dir = clip_path.parent().unwrap_or(Path::new("."));
    match clip_path.file_name() {
        Some(name) => dir.join(SHORTS_DIR).join(name),
        None => dir.join(SHORTS_DIR).join("short.mp4"),
    }
}

fn sample_aspect(decoder: &decoder::Video) -> Rational {
    let aspect = decoder.aspect_ratio();
    if aspect.numerator() == 0 {
        Rational(1, 1)
    } else {
        aspect
    }
}

struct ShortsTranscoder {
    output_stream_index: usize,
    decoder: decoder::Video,
    encoder: encoder::Video,
    filter_graph: filter::Graph,
    input_time_base: Rational,
}

impl ShortsTranscoder {
    fn new(
        input_stream: &format::stream::Stream,
        output: &mut format::context::Output,
        output_stream_index: usize,
        title: Option<&str>,
        settings: &ShortsSettings,
    ) -> anyhow::Result<Self> {
        let global_header = output
            .format()
            .flags()
            .contains(format::Flags::GLOBAL_HEADER);
        let decoder = codec::context::Context::from_parameters(input_stream.parameters())?
            .decoder()
            .video()?;

        let plan = filter_plan(decoder.width(), decoder.height(), title, settings);
        debug!(filters = %plan.spec, "shorts filter chain");

        let codec = encoder::find(codec::Id::H264);
        let mut output_stream = output.add_stream(codec)?;
        let mut encoder = codec::context::Context::new_with_codec(
            codec.ok_or(anyhow::anyhow!(ffmpeg::Error::EncoderNotFound))?,
        )
        .encoder()
        .video()?;
        encoder.set_width(plan.width);
        encoder.set_height(plan.height);
        encoder.set_aspect_ratio(sample_aspect(&decoder));
        encoder.set_format(format::Pixel::YUV420P);
        encoder.set_frame_rate(decoder.frame_rate());
        encoder.set_time_base(input_stream.time_base());

        if global_header {
            encoder.set_flags(codec::Flags::GLOBAL_HEADER);
        }

        let mut opts = Dictionary::new();
        opts.set("preset", &settings.preset);
        let opened_encoder = encoder.open_with(opts)?;
        output_stream.set_parameters(&opened_encoder);

        let filter_graph = Self::filter_graph(&plan.spec, &decoder, input_stream.time_base())?;

        Ok(Self {
            output_stream_index,
            decoder,
            encoder: opened_encoder,
            filter_graph,
            input_time_base: input_stream.time_base(),
        })
    }

    fn filter_graph(
        spec: &str,
        decoder: &decoder::Video,
        time_base: Rational,
    ) -> anyhow::Result<filter::Graph> {
        let mut filter_graph = filter::Graph::new();

        let pixel_format = decoder
            .format()
            .descriptor()
            .ok_or(anyhow::anyhow!("Unknown pixel format"))?
            .name();
        let args = format!(
            "video_size={}x{}:pix_fmt={}:time_base={}:pixel_aspect={}",
            decoder.width(),
            decoder.height(),
            pixel_format,
            time_base,
            sample_aspect(decoder)
        );

        filter_graph.add(
            &filter::find("buffer").ok_or(anyhow::anyhow!("Failed to find filter"))?,
            "in",
            &args,
        )?;
        filter_graph.add(
            &filter::find("buffersink").ok_or(anyhow::anyhow!("Failed to find filter"))?,
            "out",
            "",
        )?;

        {
            let mut out = filter_graph
                .get("out")
                .ok_or(anyhow::anyhow!("Failed to get filter"))?;
            out.set_pixel_format(format::Pixel::YUV420P);
        }

        filter_graph.output("in", 0)?.input("out", 0)?.parse(spec)?;
        filter_graph.validate()?;

        Ok(filter_graph)
    }

    fn send_packet_to_decoder(&mut self, packet: &Packet) -> anyhow::Result<()> {
        self.decoder
            .send_packet(packet)
            .map_err(anyhow::Error::from)
    }

    fn receive_and_process_decoded_frames(
        &mut self,
        output: &mut format::context::Output,
        output_stream_time_base: Rational,
    ) -> anyhow::Result<()> {
        let mut frame = Video::empty();
        while self.decoder.receive_frame(&mut frame).is_ok() {
            let timestamp = frame.timestamp();
            frame.set_pts(timestamp);
            frame.set_kind(picture::Type::None);
            self.filter_graph
                .get("in")
                .ok_or(anyhow::anyhow!("Failed to get filter"))?
                .source()
                .add(&frame)?;
            self.receive_and_process_filtered_frames(output, output_stream_time_base)?;
        }
        Ok(())
    }

    fn receive_and_process_filtered_frames(
        &mut self,
        output: &mut format::context::Output,
        output_stream_time_base: Rational,
    ) -> anyhow::Result<()> {
        let mut frame = Video::empty();
        while self
            .filter_graph
            .get("out")
            .ok_or(anyhow::anyhow!("Failed to get filter"))?
            .sink()
            .frame(&mut frame)
            .is_ok()
        {
            self.encoder.send_frame(&frame)?;
            self.receive_and_process_encoded_packets(output, output_stream_time_base)?;
        }
        Ok(())
    }

    fn receive_and_process_encoded_packets(
        &mut self,
        output: &mut format::context::Output,
        output_stream_time_base: Rational,
    ) -> anyhow::Result<()> {
        let mut packet = Packet::empty();
        while self.encoder.receive_packet(&mut packet).is_ok() {
            packet.set_stream(self.output_stream_index);
            packet.rescale_ts(self.input_time_base, output_stream_time_base);
            packet.write_interleaved(output)?;
        }
        Ok(())
    }

    /// Drains decoder, filter graph and encoder in that order.
    fn finish(
        &mut self,
        output: &mut format::context::Output,
        output_stream_time_base: Rational,
    ) -> anyhow::Result<()> {
        self.decoder.send_eof()?;
        self.receive_and_process_decoded_frames(output, output_stream_time_base)?;
        self.filter_graph
            .get("in")
            .ok_or(anyhow::anyhow!("Failed to get filter"))?
            .source()
            .flush()?;
        self.receive_and_process_filtered_frames(output, output_stream_time_base)?;
        self.encoder.send_eof()?;
        self.receive_and_process_encoded_packets(output, output_stream_time_base)
    }
}

/// Renders the shorts version of `input_path` into `output_path`.
pub(crate) fn render_short(
    input_path: &Path,
    output_path: &Path,
    title: Option<&str>,
    settings: &ShortsSettings,
) -> anyhow::Result<()> {
    capture::init()?;
    let mut input = format::input(&input_path)?;
    let mut output = format::output(&output_path)?;

    let mut stream_mapping = vec![-1_i32; input.nb_streams() as _];
    let mut input_stream_time_base = vec![Rational(0, 1); input.nb_streams() as _];
    let mut transcoder = None;
    let mut output_stream_index = 0;
    for (ist_index, ist) in input.streams().enumerate() {
        let medium = ist.parameters().medium();
        if medium == media::Type::Video && transcoder.is_none() {
            transcoder = Some((
                ist_index,
                ShortsTranscoder::new(&ist, &mut output, output_stream_index as _, title, settings)?,
            ));
        } else if medium == media::Type::Audio {
            let mut ost = output.add_stream(encoder::find(codec::Id::None))?;
            ost.set_parameters(ist.parameters());
            video::clear_codec_tag(&mut ost.parameters());
        } else {
            continue;
        }
        stream_mapping[ist_index] = output_stream_index;
        input_stream_time_base[ist_index] = ist.time_base();
        output_stream_index += 1;
    }
    let Some((video_stream_index, mut transcoder)) = transcoder else {
        return Err(anyhow::anyhow!(ffmpeg::Error::StreamNotFound));
    };

    output.set_metadata(input.metadata().to_owned());
    output.write_header()?;

    let output_stream_time_base = output
        .streams()
        .map(|ost| ost.time_base())
        .collect::<Vec<_>>();

    for (ist, mut packet) in input.packets() {
        let ist_index = ist.index();
        let ost_index = stream_mapping[ist_index];
        if ost_index < 0 {
            continue;
        }
        let ost_time_base = output_stream_time_base[ost_index as usize];
        if ist_index == video_stream_index {
            transcoder.send_packet_to_decoder(&packet)?;
            transcoder.receive_and_process_decoded_frames(&mut output, ost_time_base)?;
        } else {
            packet.rescale_ts(input_stream_time_base[ist_index], ost_time_base);
            packet.set_position(-1);
            packet.set_stream(ost_index as _);
            packet.write_interleaved(&mut output)?;
        }
    }

    let video_time_base = output_stream_time_base[stream_mapping[video_stream_index] as usize];
    transcoder.finish(&mut output, video_time_base)?;
    output.write_trailer()?;
    debug!(output = %output_path.display(), "short rendered");
    Ok(())
}
