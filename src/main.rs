mod ai;
mod align;
mod capture;
mod config;
mod error;
mod pipeline;
mod prompt;
mod ranking;
mod shorts;
mod stages;
mod store;
mod timestamp;
mod video;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::ai::OpenAi;
use crate::config::Config;
use crate::pipeline::Stage;

#[derive(Parser)]
#[command(name = "clipwit")]
#[command(about = "Find the funniest moments of a video and cut them into clips", long_about = None)]
struct Cli {
    /// TOML configuration file.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run every stage against a video.
    Run {
        input_file: PathBuf,
        #[arg(short, long)]
        work_dir: Option<PathBuf>,
        #[arg(short, long)]
        title: Option<String>,
        #[arg(short = 'n', long)]
        clips: Option<usize>,
        /// Start at this stage, reusing files already in the work directory.
        #[arg(long, value_enum, default_value_t = Stage::Caption)]
        from: Stage,
        /// Also render vertical, titled shorts of every clip.
        #[arg(long)]
        shorts: bool,
    },
    /// Caption sampled frames of a video.
    Caption {
        input_file: PathBuf,
        #[arg(short, long)]
        output: PathBuf,
        #[arg(short, long)]
        interval_ms: Option<u32>,
    },
    /// Transcribe the audio track of a video.
    Transcribe {
        input_file: PathBuf,
        #[arg(short, long)]
        output: PathBuf,
    },
    /// Align a transcript with frame captions.
    Merge {
        #[arg(short, long)]
        audio: PathBuf,
        #[arg(short, long)]
        video: PathBuf,
        #[arg(short, long)]
        output: PathBuf,
    },
    /// Ask the chat model for the funniest ranges of a merged timeline.
    Rank {
        merged_file: PathBuf,
        #[arg(short, long)]
        output: PathBuf,
        #[arg(short, long)]
        title: Option<String>,
        #[arg(short = 'n', long)]
        clips: Option<usize>,
    },
    /// Cut ranked ranges out of a video.
    Cut {
        timestamps_file: PathBuf,
        input_file: PathBuf,
        #[arg(short, long)]
        output: PathBuf,
        /// Also render vertical, titled shorts of every clip.
        #[arg(long)]
        shorts: bool,
    },
}

fn apply_profile_overrides(config: &mut Config, title: Option<String>, clips: Option<usize>) {
    if let Some(title) = title {
        config.profile.title = title;
    }
    if let Some(clips) = clips {
        config.profile.num_clips = clips;
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "clipwit=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let mut config = Config::load(cli.config.as_deref())?;

    match cli.command {
        Command::Run {
            input_file,
            work_dir,
            title,
            clips,
            from,
            shorts,
        } => {
            anyhow::ensure!(input_file.exists(), "{} does not exist", input_file.display());
            if let Some(work_dir) = work_dir {
                config.work_dir = work_dir;
            }
            if title.is_none() && config.profile.title.is_empty() {
                config.profile.title = input_file
                    .file_stem()
                    .map(|stem| stem.to_string_lossy().into_owned())
                    .unwrap_or_default();
            }
            apply_profile_overrides(&mut config, title, clips);
            config.shorts.enabled |= shorts;

            let summary = pipeline::run(&config, &input_file, from).await?;
            for clip in &summary.clips {
                println!("{}", clip.display());
            }
            let failed = u8::try_from(summary.failed.len()).unwrap_or(u8::MAX);
            return Ok(ExitCode::from(failed));
        }
        Command::Caption {
            input_file,
            output,
            interval_ms,
        } => {
            if let Some(interval_ms) = interval_ms {
                config.capture.interval_ms = interval_ms;
            }
            let ai = OpenAi::new(&config.openai);
            stages::caption_frames(&ai, &config.capture, &input_file, &output).await?;
        }
        Command::Transcribe { input_file, output } => {
            let ai = OpenAi::new(&config.openai);
            let audio = output.with_extension("m4a");
            stages::transcribe(&ai, &input_file, &audio, &output, config.keep_audio).await?;
        }
        Command::Merge {
            audio,
            video,
            output,
        } => {
            stages::merge(&audio, &video, &output)?;
        }
        Command::Rank {
            merged_file,
            output,
            title,
            clips,
        } => {
            apply_profile_overrides(&mut config, title, clips);
            let ai = OpenAi::new(&config.openai);
            let funny = stages::rank(&ai, &config.profile, &merged_file, &output).await?;
            for range in &funny.full_timestamps {
                println!(
                    "{} - {}  {}",
                    range.start,
                    range.end,
                    range.title.as_deref().unwrap_or_default()
                );
            }
        }
        Command::Cut {
            timestamps_file,
            input_file,
            output,
            shorts,
        } => {
            config.shorts.enabled |= shorts;
            for record in stages::cut(&timestamps_file, &input_file, &output, &config.shorts)? {
                println!("{}", record.file.display());
                if let Some(short) = &record.short {
                    println!("{}", short.display());
                }
            }
        }
    }

    Ok(ExitCode::SUCCESS)
}
