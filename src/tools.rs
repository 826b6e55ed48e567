use anyhow::{Context, Result};
use std::path::PathBuf;
use std::process::{Output, Stdio};
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

/// Locations of the external media tools and how long one invocation may run.
#[derive(Debug, Clone)]
pub struct Tools {
    pub ffmpeg: PathBuf,
    pub ffprobe: PathBuf,
    pub timeout: Option<Duration>,
}

impl Default for Tools {
    fn default() -> Self {
        Self {
            ffmpeg: PathBuf::from("ffmpeg"),
            ffprobe: PathBuf::from("ffprobe"),
            timeout: None,
        }
    }
}

impl Tools {
    /// Resolves the encoder on `PATH` (or as given, when it is a path).
    ///
    /// Nothing may be processed when this fails.
    pub fn require_encoder(&self) -> Result<PathBuf> {
        let resolved = which::which(&self.ffmpeg).with_context(|| {
            format!(
                "'{}' is not installed or not executable, install ffmpeg first",
                self.ffmpeg.display()
            )
        })?;
        debug!(ffmpeg = %resolved.display(), "found encoder");
        Ok(resolved)
    }
}

/// Runs `cmd` to completion with stdin detached, capturing its output.
///
/// With a timeout the child is killed once it elapses and an error is returned.
pub(crate) async fn run(mut cmd: Command, timeout: Option<Duration>) -> Result<Output> {
    cmd.stdin(Stdio::null()).kill_on_drop(true);
    let program = cmd.as_std().get_program().to_string_lossy().into_owned();

    let output = cmd.output();
    let output = match timeout {
        Some(limit) => tokio::time::timeout(limit, output).await.with_context(|| {
            format!(
                "{program} did not finish within {}",
                humantime::format_duration(limit)
            )
        })?,
        None => output.await,
    };
    output.with_context(|| format!("run {program}"))
}

/// Last few lines of a tool's stderr, enough to explain a failure in a log line.
pub(crate) fn stderr_tail(output: &Output) -> String {
    let stderr = String::from_utf8_lossy(&output.stderr);
    let lines: Vec<&str> = stderr.trim().lines().collect();
    lines[lines.len().saturating_sub(5)..].join(" | ")
}
