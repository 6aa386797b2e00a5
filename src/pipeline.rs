//! Runs the stages in order. A failing stage is logged and recorded; stages
//! that depend on its output are skipped, everything else still runs.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::ValueEnum;
use tracing::{error, info, warn};

use crate::ai::OpenAi;
use crate::config::Config;
use crate::stages;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, ValueEnum)]
pub(crate) enum Stage {
    Caption,
    Transcribe,
    Merge,
    Rank,
    Cut,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Stage::Caption => "caption",
            Stage::Transcribe => "transcribe",
            Stage::Merge => "merge",
            Stage::Rank => "rank",
            Stage::Cut => "cut",
        })
    }
}

impl Stage {
    /// Stages whose output this one reads.
    fn inputs(self) -> &'static [Stage] {
        match self {
            Stage::Caption | Stage::Transcribe => &[],
            Stage::Merge => &[Stage::Caption, Stage::Transcribe],
            Stage::Rank => &[Stage::Merge],
            Stage::Cut => &[Stage::Rank],
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct RunSummary {
    pub(crate) failed: Vec<Stage>,
    pub(crate) skipped: Vec<Stage>,
    pub(crate) clips: Vec<PathBuf>,
}

impl RunSummary {
    fn blocked(&self, stage: Stage) -> bool {
        stage
            .inputs()
            .iter()
            .any(|input| self.failed.contains(input) || self.skipped.contains(input))
    }

    /// Logs the outcome of `stage` and keeps its value when it succeeded.
    fn settle<T>(&mut self, stage: Stage, result: anyhow::Result<T>) -> Option<T> {
        match result {
            Ok(value) => {
                info!(%stage, "stage finished");
                Some(value)
            }
            Err(err) => {
                error!(%stage, "stage failed: {err:#}");
                self.failed.push(stage);
                None
            }
        }
    }

    fn should_run(&mut self, stage: Stage, from: Stage) -> bool {
        if stage < from {
            return false;
        }
        if self.blocked(stage) {
            warn!(%stage, "skipping stage, an input stage did not complete");
            self.skipped.push(stage);
            return false;
        }
        true
    }
}

/// Runs every stage from `from` onwards against `input`, using the work
/// directory from `config`. Files from earlier stages are reused as they are.
pub(crate) async fn run(config: &Config, input: &Path, from: Stage) -> anyhow::Result<RunSummary> {
    let paths = config.paths();
    fs::create_dir_all(&paths.root)
        .with_context(|| format!("creating work directory {}", paths.root.display()))?;
    info!(input = %input.display(), work_dir = %paths.root.display(), %from, "starting run");

    let ai = OpenAi::new(&config.openai);
    let mut summary = RunSummary::default();

    if summary.should_run(Stage::Caption, from) {
        let result =
            stages::caption_frames(&ai, &config.capture, input, &paths.frame_captions).await;
        summary.settle(Stage::Caption, result);
    }

    if summary.should_run(Stage::Transcribe, from) {
        let result = stages::transcribe(
            &ai,
            input,
            &paths.audio,
            &paths.transcript,
            config.keep_audio,
        )
        .await;
        summary.settle(Stage::Transcribe, result);
    }

    if summary.should_run(Stage::Merge, from) {
        let result = stages::merge(&paths.transcript, &paths.frame_captions, &paths.merged);
        summary.settle(Stage::Merge, result);
    }

    if summary.should_run(Stage::Rank, from) {
        let result =
            stages::rank(&ai, &config.profile, &paths.merged, &paths.funny_timestamps).await;
        summary.settle(Stage::Rank, result);
    }

    if summary.should_run(Stage::Cut, from) {
        let result = stages::cut(&paths.funny_timestamps, input, &paths.clips, &config.shorts);
        if let Some(records) = summary.settle(Stage::Cut, result) {
            summary.clips = records
                .into_iter()
                .flat_map(|record| std::iter::once(record.file).chain(record.short))
                .collect();
        }
    }

    if summary.failed.is_empty() {
        info!(clips = summary.clips.len(), "run complete");
    } else {
        warn!(
            clips = summary.clips.len(),
            failed = summary.failed.len(),
            "run finished with failed stages"
        );
    }
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stages_are_ordered() {
        assert!(Stage::Caption < Stage::Transcribe);
        assert!(Stage::Merge < Stage::Rank);
        assert!(Stage::Rank < Stage::Cut);
    }

    #[test]
    fn failure_blocks_dependents_only() {
        let mut summary = RunSummary::default();
        assert!(summary.should_run(Stage::Caption, Stage::Caption));
        assert!(summary
            .settle::<()>(Stage::Caption, Err(anyhow::anyhow!("no frames")))
            .is_none());

        assert!(summary.should_run(Stage::Transcribe, Stage::Caption));
        assert!(!summary.should_run(Stage::Merge, Stage::Caption));
        assert!(!summary.should_run(Stage::Rank, Stage::Caption));
        assert!(!summary.should_run(Stage::Cut, Stage::Caption));
        assert_eq!(summary.failed, vec![Stage::Caption]);
        assert_eq!(summary.skipped, vec![Stage::Merge, Stage::Rank, Stage::Cut]);
    }

    #[test]
    fn resume_skips_earlier_stages_without_blocking() {
        let mut summary = RunSummary::default();
        assert!(!summary.should_run(Stage::Caption, Stage::Rank));
        assert!(!summary.should_run(Stage::Merge, Stage::Rank));
        assert!(summary.should_run(Stage::Rank, Stage::Rank));
        assert!(summary.skipped.is_empty());
    }

    #[tokio::test]
    async fn resumed_run_without_ranking_file_fails_cut_stage() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            work_dir: dir.path().join("work"),
            ..Config::default()
        };
        let summary = run(&config, Path::new("missing.mp4"), Stage::Cut)
            .await
            .unwrap();
        assert_eq!(summary.failed, vec![Stage::Cut]);
        assert!(summary.clips.is_empty());
        assert!(dir.path().join("work").is_dir());
    }
}
