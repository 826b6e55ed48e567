//! Stream metadata via `ffprobe`.
//!
//! Failures never surface as errors here: a file whose codec cannot be read
//! reports an empty codec name, which never matches the target codec and so
//! sends the file to the encoder.

use crate::tools::{self, Tools};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::process::Command;
use tracing::warn;

/// Returned by [`Prober::frame_rate`] whenever the declared rate is unusable.
pub const DEFAULT_FRAME_RATE: f64 = 30.0;

#[derive(Debug, Clone)]
pub struct Prober {
    ffprobe: PathBuf,
    timeout: Option<Duration>,
}

impl Prober {
    pub fn new(tools: &Tools) -> Self {
        Self {
            ffprobe: tools.ffprobe.clone(),
            timeout: tools.timeout,
        }
    }

    /// Codec name of the first video stream, or `""` if it could not be read.
    pub async fn codec(&self, path: &Path) -> String {
        self.first_video_stream(path, "stream=codec_name")
            .await
            .unwrap_or_default()
    }

    /// Declared frame rate of the first video stream.
    pub async fn frame_rate(&self, path: &Path) -> f64 {
        self.first_video_stream(path, "stream=r_frame_rate")
            .await
            .map_or(DEFAULT_FRAME_RATE, |raw| parse_frame_rate(&raw))
    }

    async fn first_video_stream(&self, path: &Path, entry: &str) -> Option<String> {
        let mut cmd = Command::new(&self.ffprobe);

        #[rustfmt::skip]
        cmd.args([
            "-v", "error",
            "-select_streams", "v:0",
            "-show_entries", entry,
            "-of", "default=noprint_wrappers=1:nokey=1",
        ]);
        cmd.arg(path);

        match tools::run(cmd, self.timeout).await {
            Ok(output) if output.status.success() => {
                Some(String::from_utf8_lossy(&output.stdout).trim().to_owned())
            }
            Ok(output) => {
                warn!(
                    path = %path.display(),
                    status = %output.status,
                    "ffprobe failed: {}",
                    tools::stderr_tail(&output)
                );
                None
            }
            Err(e) => {
                warn!(path = %path.display(), "could not probe: {e:#}");
                None
            }
        }
    }
}

/// Parses an ffprobe rate such as `30000/1001`, falling back to
/// [`DEFAULT_FRAME_RATE`] for anything that is not a finite `num/den`.
pub fn parse_frame_rate(raw: &str) -> f64 {
    let Some((num, den)) = raw
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .and_then(|line| line.split_once('/'))
    else {
        return DEFAULT_FRAME_RATE;
    };

    match (num.trim().parse::<f64>(), den.trim().parse::<f64>()) {
        (Ok(num), Ok(den)) if den != 0.0 => {
            let fps = num / den;
            if fps.is_finite() {
                fps
            } else {
                DEFAULT_FRAME_RATE
            }
        }
        _ => DEFAULT_FRAME_RATE,
    }
}
