//! One file's trip through dedup, probe, transcode and shrink.

use crate::encode::{remove_if_exists, Encoder, TARGET_CODEC, TRANSCODE_CRF};
use crate::fingerprint::{Fingerprint, FingerprintStore};
use crate::probe::Prober;
use crate::shrink::{self, CrfSearch, ShrinkOutcome};
use crate::tools::Tools;
use anyhow::{Context, Result};
use bytesize::ByteSize;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use strum::{AsRefStr, Display, EnumString};
use tracing::{debug, info, warn};

/// Appended to a file's path while its replacement is being encoded.
pub const TEMP_SUFFIX: &str = ".temp.mp4";

/// Name prefix of shrunk copies made by the headless runner.
pub const HEADLESS_PREFIX: &str = "shrunk_video_";
/// Name prefix of shrunk copies made by the interactive controller.
pub const INTERACTIVE_PREFIX: &str = "shrunk_";

#[derive(Debug, Clone)]
pub struct PipelineOptions {
    /// Directory receiving shrunk copies. Created on first use.
    pub output_dir: PathBuf,
    pub shrink_prefix: String,
    /// Files strictly larger than this get a shrunk copy.
    pub shrink_threshold: u64,
    /// Size the shrunk copy must not exceed.
    pub max_bytes: u64,
    pub crf_search: CrfSearch,
}

impl PipelineOptions {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
            shrink_prefix: HEADLESS_PREFIX.to_owned(),
            shrink_threshold: shrink::MAX_BYTES,
            max_bytes: shrink::MAX_BYTES,
            crf_search: CrfSearch::default(),
        }
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.shrink_prefix = prefix.into();
        self
    }

    fn shrunk_path(&self, file_name: &std::ffi::OsStr) -> PathBuf {
        let mut name = OsString::from(&self.shrink_prefix);
        name.push(file_name);
        self.output_dir.join(name)
    }
}

/// What the transcode step did with a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transcode {
    SkippedDuplicate,
    SkippedTargetCodec,
    Reencoded,
    ReencodeFailed,
}

/// Per-file result as reported to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, AsRefStr)]
#[strum(serialize_all = "kebab-case")]
pub enum Outcome {
    SkippedDuplicate,
    SkippedAlreadyTargetCodec,
    #[strum(serialize = "re-encoded")]
    Reencoded,
    #[strum(serialize = "re-encoded-and-compressed")]
    ReencodedAndCompressed,
    #[strum(serialize = "re-encode-failed")]
    ReencodeFailed,
    CompressionFailed,
}

#[derive(Debug, Clone)]
pub struct FileReport {
    pub path: PathBuf,
    pub transcode: Transcode,
    /// Size of the file after the transcode step.
    pub size: u64,
    /// Present when the file was large enough to need a shrunk copy.
    pub shrink: Option<ShrinkOutcome>,
}

impl FileReport {
    pub fn outcome(&self) -> Outcome {
        let shrink_failed = self.shrink.as_ref().is_some_and(|s| !s.is_success());
        match self.transcode {
            Transcode::SkippedDuplicate => Outcome::SkippedDuplicate,
            Transcode::ReencodeFailed => Outcome::ReencodeFailed,
            _ if shrink_failed => Outcome::CompressionFailed,
            Transcode::Reencoded if self.shrink.is_some() => Outcome::ReencodedAndCompressed,
            Transcode::Reencoded => Outcome::Reencoded,
            Transcode::SkippedTargetCodec => Outcome::SkippedAlreadyTargetCodec,
        }
    }

    pub fn shrunk_path(&self) -> Option<&Path> {
        match &self.shrink {
            Some(ShrinkOutcome::Fits { path, .. }) => Some(path),
            _ => None,
        }
    }
}

/// The processing steps for a single file, sharing one fingerprint store.
#[derive(Debug)]
pub struct Pipeline {
    prober: Prober,
    encoder: Encoder,
    store: FingerprintStore,
    options: PipelineOptions,
}

impl Pipeline {
    pub fn new(tools: &Tools, store: FingerprintStore, options: PipelineOptions) -> Self {
        Self {
            prober: Prober::new(tools),
            encoder: Encoder::new(tools),
            store,
            options,
        }
    }

    /// Loads the fingerprint store at `store_path` and builds a pipeline on it.
    pub async fn open(
        tools: &Tools,
        store_path: impl Into<PathBuf>,
        options: PipelineOptions,
    ) -> Result<Self> {
        let store = FingerprintStore::load(store_path).await?;
        Ok(Self::new(tools, store, options))
    }

    pub fn store(&self) -> &FingerprintStore {
        &self.store
    }

    pub fn options(&self) -> &PipelineOptions {
        &self.options
    }

    #[cfg_attr(doc, aquamarine::aquamarine)]
    /// Runs one file through the whole pipeline.
    ///
    /// ```mermaid
    /// flowchart TD
    ///     A[fingerprint] --> B{already recorded?}
    ///     B -- yes --> Z[skipped-duplicate]
    ///     B -- no --> C{codec is h264?}
    ///     C -- yes --> R[record fingerprint]
    ///     C -- no --> D[encode to temp sibling]
    ///     D -- ok --> E[rename over original] --> R
    ///     D -- failed --> S
    ///     R --> S{size > threshold?}
    ///     S -- yes --> T[shrink into output dir]
    ///     S -- no --> U[done]
    /// ```
    #[tracing::instrument(skip_all, fields(path = %path.display()))]
    pub async fn process_file(&mut self, path: &Path) -> Result<FileReport> {
        let transcode = self.reencode(path).await?;
        let size = tokio::fs::metadata(path)
            .await
            .with_context(|| format!("stat '{}'", path.display()))?
            .len();

        let shrink = if transcode != Transcode::SkippedDuplicate
            && size > self.options.shrink_threshold
        {
            info!(size = %ByteSize(size), "large video, making a shrunk copy");
            Some(self.shrink(path).await.unwrap_or_else(|e| {
                warn!("could not shrink: {e:#}");
                ShrinkOutcome::Failed {
                    crf: None,
                    reason: format!("{e:#}"),
                }
            }))
        } else {
            None
        };

        Ok(FileReport {
            path: path.to_path_buf(),
            transcode,
            size,
            shrink,
        })
    }

    /// Normalizes `path` to the target codec in place.
    ///
    /// The fingerprint of the original content is recorded once the file is
    /// known to be (or has just become) H.264. A failed encode records
    /// nothing, so the file is tried again on the next run.
    pub async fn reencode(&mut self, path: &Path) -> Result<Transcode> {
        let fingerprint = Fingerprint::compute(path).await?;
        if self.store.contains(&fingerprint) {
            debug!(%fingerprint, "already processed");
            return Ok(Transcode::SkippedDuplicate);
        }

        let codec = self.prober.codec(path).await;
        info!(codec = %codec, "found video");
        if codec == TARGET_CODEC {
            self.store.record(&fingerprint).await?;
            info!(%fingerprint, "already {TARGET_CODEC}, recorded without re-encoding");
            return Ok(Transcode::SkippedTargetCodec);
        }

        let temp = temp_path(path);
        remove_if_exists(&temp).await?;
        info!(from = %codec, "re-encoding to {TARGET_CODEC}");
        if let Err(e) = self.encoder.encode(path, &temp, TRANSCODE_CRF).await {
            warn!("re-encode failed, leaving the original untouched: {e:#}");
            return Ok(Transcode::ReencodeFailed);
        }

        tokio::fs::rename(&temp, path)
            .await
            .with_context(|| format!("replace '{}' with '{}'", path.display(), temp.display()))?;
        self.store.record(&fingerprint).await?;
        Ok(Transcode::Reencoded)
    }

    async fn shrink(&self, path: &Path) -> Result<ShrinkOutcome> {
        let file_name = path
            .file_name()
            .with_context(|| format!("'{}' has no file name", path.display()))?;
        tokio::fs::create_dir_all(&self.options.output_dir)
            .await
            .with_context(|| format!("create '{}'", self.options.output_dir.display()))?;
        let output = self.options.shrunk_path(file_name);

        shrink::compress_under(
            &self.encoder,
            self.options.crf_search,
            path,
            &output,
            self.options.max_bytes,
        )
        .await
    }
}

/// `clip.avi` is encoded into `clip.avi.temp.mp4` next to it.
pub fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(TEMP_SUFFIX);
    PathBuf::from(name)
}
