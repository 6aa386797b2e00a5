//! Run configuration, loaded from TOML.
//!
//! Every key is optional. Lookup order is an explicit `--config` path, then
//! `<config dir>/clipwit/config.toml` when present, then built-in defaults.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub(crate) struct Config {
    pub(crate) work_dir: PathBuf,
    /// Keep the extracted audio track after transcription.
    pub(crate) keep_audio: bool,
    pub(crate) openai: OpenAiSettings,
    pub(crate) capture: CaptureSettings,
    pub(crate) shorts: ShortsSettings,
    pub(crate) profile: ShowProfile,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub(crate) struct OpenAiSettings {
    /// Falls back to `OPENAI_API_KEY` when unset.
    pub(crate) api_key: Option<String>,
    pub(crate) chat_model: String,
    pub(crate) vision_model: String,
    pub(crate) transcription_model: String,
    pub(crate) language: Option<String>,
    pub(crate) max_tokens: u32,
    pub(crate) temperature: f32,
    pub(crate) timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub(crate) struct CaptureSettings {
    pub(crate) interval_ms: u32,
    /// Frames wider than this are scaled down before upload.
    pub(crate) max_width: u32,
    pub(crate) jpeg_quality: u8,
    pub(crate) prompt: String,
}

/// Vertical re-encode of each cut clip, with the ranked title burned in.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub(crate) struct ShortsSettings {
    pub(crate) enabled: bool,
    /// Pad to 9:16 with black bars above and below.
    pub(crate) letterbox: bool,
    pub(crate) burn_titles: bool,
    /// Font for titles; fontconfig's default when unset.
    pub(crate) font_file: Option<PathBuf>,
    /// x264 preset.
    pub(crate) preset: String,
}

/// Describes the show or movie being clipped. Drives the ranking prompt.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub(crate) struct ShowProfile {
    pub(crate) title: String,
    /// "movie", "TV show", ...
    pub(crate) kind: String,
    pub(crate) synopsis: String,
    pub(crate) elements: Vec<String>,
    pub(crate) characteristics: Vec<String>,
    pub(crate) title_examples: Vec<String>,
    pub(crate) num_clips: usize,
    pub(crate) max_clip_secs: u32,
    pub(crate) objective: Option<String>,
    /// Ask the model for a short title per clip.
    pub(crate) with_titles: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            work_dir: PathBuf::from("clipwit-work"),
            keep_audio: false,
            openai: OpenAiSettings::default(),
            capture: CaptureSettings::default(),
            shorts: ShortsSettings::default(),
            profile: ShowProfile::default(),
        }
    }
}

impl Default for OpenAiSettings {
    fn default() -> Self {
        Self {
            api_key: None,
            chat_model: "gpt-4-turbo".to_owned(),
            vision_model: "gpt-4o".to_owned(),
            transcription_model: "whisper-1".to_owned(),
            language: Some("en".to_owned()),
            max_tokens: 1024,
            temperature: 0.7,
            timeout_secs: 300,
        }
    }
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            interval_ms: 1000,
            max_width: 512,
            jpeg_quality: 85,
            prompt: "Describe what is happening in this video frame in one short sentence."
                .to_owned(),
        }
    }
}

impl Default for ShortsSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            letterbox: true,
            burn_titles: true,
            font_file: None,
            preset: "medium".to_owned(),
        }
    }
}

impl Default for ShowProfile {
    fn default() -> Self {
        Self {
            title: String::new(),
            kind: "video".to_owned(),
            synopsis: String::new(),
            elements: Vec::new(),
            characteristics: vec![
                "Exaggerated Reactions: over-the-top responses to mundane situations".to_owned(),
                "Unexpected Situations: misunderstandings or unusual predicaments".to_owned(),
                "Physical Comedy: slapstick moments and visual gags".to_owned(),
            ],
            title_examples: Vec::new(),
            num_clips: 10,
            max_clip_secs: 90,
            objective: None,
            with_titles: true,
        }
    }
}

impl Config {
    pub(crate) fn load(explicit: Option<&Path>) -> anyhow::Result<Self> {
        let path = match explicit {
            Some(path) => Some(path.to_path_buf()),
            None => Self::default_path().filter(|path| path.exists()),
        };
        match path {
            Some(path) => Self::from_file(&path),
            None => Ok(Self::default()),
        }
    }

    pub(crate) fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("clipwit").join("config.toml"))
    }

    pub(crate) fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        toml::from_str(&content).with_context(|| format!("parsing config {}", path.display()))
    }

    pub(crate) fn paths(&self) -> WorkPaths {
        WorkPaths::new(&self.work_dir)
    }
}

/// File layout inside the work directory.
#[derive(Debug, Clone)]
pub(crate) struct WorkPaths {
    pub(crate) root: PathBuf,
    pub(crate) frame_captions: PathBuf,
    pub(crate) audio: PathBuf,
    pub(crate) transcript: PathBuf,
    pub(crate) merged: PathBuf,
    pub(crate) funny_timestamps: PathBuf,
    pub(crate) clips: PathBuf,
}

impl WorkPaths {
    pub(crate) fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
            frame_captions: root.join("video_caption.json"),
            audio: root.join("audio_caption.m4a"),
            transcript: root.join("audio_caption.json"),
            merged: root.join("merged_caption.json"),
            funny_timestamps: root.join("funny_timestamps.json"),
            clips: root.join("clips"),
        }
    }
}
