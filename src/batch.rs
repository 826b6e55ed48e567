//! Directory scan driving the pipeline over every candidate video.

use crate::pipeline::{Outcome, Pipeline, Transcode, TEMP_SUFFIX};
use anyhow::{Context, Result};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::spawn_blocking;
use tracing::{debug, error, info, warn};
use walkdir::WalkDir;

pub const VIDEO_EXTENSIONS: [&str; 6] = [".mp4", ".mkv", ".avi", ".mov", ".wmv", ".flv"];

/// Emitted while a batch runs, for whoever presents progress.
#[derive(Debug, Clone)]
pub enum ProgressEvent {
    BatchStarted {
        source_dir: PathBuf,
        entries: usize,
        videos: usize,
    },
    FileStarted {
        index: usize,
        name: String,
    },
    FileFinished {
        index: usize,
        name: String,
        /// The outcome, or why the file could not be processed.
        result: Result<Outcome, String>,
    },
    BatchComplete(BatchSummary),
}

pub type ProgressSender = mpsc::UnboundedSender<ProgressEvent>;

/// Where progress goes and how a stop is requested.
///
/// The stop flag is only looked at between files; a file that has started is
/// always finished.
#[derive(Debug, Clone, Default)]
pub struct BatchHooks {
    events: Option<ProgressSender>,
    stop: Arc<AtomicBool>,
}

impl BatchHooks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_events(mut self, events: ProgressSender) -> Self {
        self.events = Some(events);
        self
    }

    pub fn with_stop(mut self, stop: Arc<AtomicBool>) -> Self {
        self.stop = stop;
        self
    }

    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    fn stop_requested(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    fn emit(&self, event: ProgressEvent) {
        if let Some(events) = &self.events {
            // Nobody listening is fine.
            let _ = events.send(event);
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileFailure {
    pub name: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default)]
pub struct BatchSummary {
    /// Every directory entry looked at, videos or not.
    pub entries: usize,
    pub videos: usize,
    pub processed: usize,
    pub reencoded: Vec<String>,
    pub shrunk: Vec<String>,
    pub failures: Vec<FileFailure>,
    pub outcomes: HashMap<Outcome, usize>,
    /// Set when a stop request ended the batch early.
    pub stopped: bool,
    pub elapsed: Duration,
}

impl BatchSummary {
    pub fn count(&self, outcome: Outcome) -> usize {
        self.outcomes.get(&outcome).copied().unwrap_or(0)
    }
}

impl fmt::Display for BatchSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Found {} files of which {} are videos",
            self.entries, self.videos
        )?;
        write!(
            f,
            "Checked {}/{} videos in {}",
            self.processed,
            self.videos,
            humantime::format_duration(Duration::from_secs(self.elapsed.as_secs()))
        )?;
        if self.stopped {
            write!(f, " (stopped early)")?;
        }
        if !self.reencoded.is_empty() {
            write!(f, "\nRe-encoded files:")?;
            for name in &self.reencoded {
                write!(f, "\n  {name}")?;
            }
        }
        if !self.shrunk.is_empty() {
            write!(f, "\nShrunk copies:")?;
            for name in &self.shrunk {
                write!(f, "\n  {name}")?;
            }
        }
        if !self.failures.is_empty() {
            write!(f, "\nFailures:")?;
            for failure in &self.failures {
                write!(f, "\n  {}: {}", failure.name, failure.reason)?;
            }
        }
        Ok(())
    }
}

/// True for names ending in one of [`VIDEO_EXTENSIONS`], ignoring case.
///
/// Leftover `*.temp.mp4` files from an interrupted re-encode are not videos of
/// their own.
pub fn is_video(path: &Path) -> bool {
    let Some(name) = path.file_name() else {
        return false;
    };
    let name = name.to_string_lossy().to_lowercase();
    !name.ends_with(TEMP_SUFFIX) && VIDEO_EXTENSIONS.iter().any(|ext| name.ends_with(ext))
}

/// Lists `source_dir` without descending. Returns the entry count and the
/// videos, sorted by name.
async fn discover(source_dir: &Path) -> Result<(usize, Vec<PathBuf>)> {
    let root = source_dir.to_path_buf();
    spawn_blocking(move || {
        let mut entries = 0;
        let mut videos = Vec::new();
        let walker = WalkDir::new(&root)
            .min_depth(1)
            .max_depth(1)
            .sort_by_file_name();
        for entry in walker {
            let entry = entry.with_context(|| format!("list '{}'", root.display()))?;
            entries += 1;
            let path = entry.path();
            // Links are followed: a linked clip is processed like any other.
            if !std::fs::metadata(path).is_ok_and(|m| m.is_file()) {
                debug!("skipping non-file: '{}'", path.display());
                continue;
            }
            if !is_video(path) {
                debug!("skipping non-video file '{}'", path.display());
                continue;
            }
            videos.push(path.to_path_buf());
        }
        anyhow::Ok((entries, videos))
    })
    .await
    .context("join directory listing")?
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// Processes every video directly inside `source_dir`, one at a time.
///
/// Only a failure to list the directory is returned as an error; anything
/// going wrong with a single file is logged, reported in the summary, and the
/// batch moves on.
pub async fn run_batch(
    pipeline: &mut Pipeline,
    source_dir: &Path,
    hooks: &BatchHooks,
) -> Result<BatchSummary> {
    let started = Instant::now();
    info!("Checking all files within '{}'", source_dir.display());
    let (entries, videos) = discover(source_dir).await?;
    info!("Found {entries} files of which {} are videos", videos.len());

    let mut summary = BatchSummary {
        entries,
        videos: videos.len(),
        ..BatchSummary::default()
    };
    hooks.emit(ProgressEvent::BatchStarted {
        source_dir: source_dir.to_path_buf(),
        entries,
        videos: videos.len(),
    });

    for (index, path) in videos.iter().enumerate() {
        if hooks.stop_requested() {
            warn!("stop requested, {} videos left unchecked", videos.len() - index);
            summary.stopped = true;
            break;
        }
        let name = display_name(path);
        hooks.emit(ProgressEvent::FileStarted {
            index,
            name: name.clone(),
        });

        let result = match pipeline.process_file(path).await {
            Ok(report) => {
                let outcome = report.outcome();
                *summary.outcomes.entry(outcome).or_default() += 1;
                if report.transcode == Transcode::Reencoded {
                    summary.reencoded.push(name.clone());
                }
                if let Some(shrunk) = report.shrunk_path() {
                    summary.shrunk.push(display_name(shrunk));
                }
                match outcome {
                    Outcome::ReencodeFailed => summary.failures.push(FileFailure {
                        name: name.clone(),
                        reason: "re-encode failed, original kept".to_owned(),
                    }),
                    Outcome::CompressionFailed => summary.failures.push(FileFailure {
                        name: name.clone(),
                        reason: "could not shrink under the size cap".to_owned(),
                    }),
                    _ => {}
                }
                info!(file = %name, %outcome, "checked");
                Ok(outcome)
            }
            Err(e) => {
                error!(file = %name, "failed to process: {e:?}");
                let reason = format!("{e:#}");
                summary.failures.push(FileFailure {
                    name: name.clone(),
                    reason: reason.clone(),
                });
                Err(reason)
            }
        };
        summary.processed += 1;
        hooks.emit(ProgressEvent::FileFinished {
            index,
            name,
            result,
        });
    }

    summary.elapsed = started.elapsed();
    info!(
        "All {} video files checked in {}",
        summary.processed,
        humantime::format_duration(Duration::from_secs(summary.elapsed.as_secs()))
    );
    hooks.emit(ProgressEvent::BatchComplete(summary.clone()));
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn video_extensions_ignore_case() {
        for name in ["a.mp4", "b.MKV", "c.Avi", "d.mov", "e.wmv", "f.FLV", "x.y.mp4"] {
            assert!(is_video(Path::new(name)), "{name}");
        }
        for name in ["notes.txt", "mp4", "clip.mp4.part", "clip.avi.temp.mp4", "clip.webm"] {
            assert!(!is_video(Path::new(name)), "{name}");
        }
    }

    #[test]
    fn summary_lists_reencoded_names() {
        let summary = BatchSummary {
            entries: 3,
            videos: 2,
            processed: 2,
            reencoded: vec!["clip.avi".into()],
            ..BatchSummary::default()
        };
        let text = summary.to_string();
        assert!(text.starts_with("Found 3 files of which 2 are videos"));
        assert!(text.contains("Re-encoded files:\n  clip.avi"));
        assert!(!text.contains("Failures"));
    }
}
