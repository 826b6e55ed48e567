//! H.264/AAC encoding via `ffmpeg`.

use crate::tools::{self, Tools};
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Codec name ffprobe reports for files that need no re-encode.
pub const TARGET_CODEC: &str = "h264";

pub const VIDEO_ENCODER: &str = "libx264";
pub const PRESET: &str = "slow";
pub const AUDIO_CODEC: &str = "aac";
pub const AUDIO_BITRATE: &str = "128k";

/// CRF used when normalizing a file in place; visually close to the source.
pub const TRANSCODE_CRF: u8 = 18;

#[derive(Debug, Clone)]
pub struct Encoder {
    ffmpeg: PathBuf,
    timeout: Option<Duration>,
}

impl Encoder {
    pub fn new(tools: &Tools) -> Self {
        Self {
            ffmpeg: tools.ffmpeg.clone(),
            timeout: tools.timeout,
        }
    }

    /// Encodes `input` into `output` at `crf`.
    ///
    /// Succeeds when `output` exists once ffmpeg is done, whatever its exit
    /// status. A run that could not start or hit the timeout is a failure and
    /// its output is removed.
    #[tracing::instrument(skip_all, fields(input = %input.display(), crf = crf))]
    pub async fn encode(&self, input: &Path, output: &Path, crf: u8) -> Result<()> {
        let crf_arg = crf.to_string();
        let mut cmd = Command::new(&self.ffmpeg);
        cmd.args(["-hide_banner", "-nostdin", "-y"]);
        cmd.arg("-i").arg(input);

        #[rustfmt::skip]
        cmd.args([
            "-c:v", VIDEO_ENCODER,
            "-preset", PRESET,
            "-crf", crf_arg.as_str(),
            "-c:a", AUDIO_CODEC,
            "-b:a", AUDIO_BITRATE,
        ]);
        cmd.arg(output);

        debug!(output = %output.display(), "encoding");
        match tools::run(cmd, self.timeout).await {
            Ok(out) if out.status.success() => {}
            // What ffmpeg left behind decides, not its exit status.
            Ok(out) => warn!(
                status = %out.status,
                "ffmpeg reported an error: {}",
                tools::stderr_tail(&out)
            ),
            // Never started, or killed on timeout: whatever exists is partial.
            Err(e) => {
                remove_if_exists(output).await.ok();
                return Err(e);
            }
        }

        if !tokio::fs::try_exists(output).await.unwrap_or(false) {
            anyhow::bail!("ffmpeg did not create '{}'", output.display());
        }
        info!(output = %output.display(), "encoded");
        Ok(())
    }
}

/// Removes `path`, treating an already missing file as success.
pub(crate) async fn remove_if_exists(path: &Path) -> Result<()> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e).with_context(|| format!("remove '{}'", path.display())),
    }
}
