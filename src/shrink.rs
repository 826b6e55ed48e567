//! Size-capped copies: re-encode at rising CRF until the result fits.

use crate::encode::{remove_if_exists, Encoder};
use anyhow::{Context, Result};
use bytesize::ByteSize;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Upload cap for the shrunk copy, and the size above which one is made.
pub const MAX_BYTES: u64 = 10 * 1024 * 1024;

/// Linear CRF walk: `start`, `start + step`, ... while `<= ceiling`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CrfSearch {
    pub start: u8,
    pub step: u8,
    pub ceiling: u8,
}

impl Default for CrfSearch {
    fn default() -> Self {
        Self {
            start: 28,
            step: 2,
            ceiling: 51,
        }
    }
}

impl CrfSearch {
    pub fn steps(&self) -> impl Iterator<Item = u8> {
        (self.start..=self.ceiling).step_by(usize::from(self.step.max(1)))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShrinkOutcome {
    /// `path` holds an encode of `size <= budget` bytes.
    Fits { path: PathBuf, size: u64, crf: u8 },
    /// Every CRF in the search produced something too large.
    Exhausted { attempts: usize, smallest: Option<u64> },
    /// The copy could not be made at all.
    Failed { crf: Option<u8>, reason: String },
}

impl ShrinkOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, ShrinkOutcome::Fits { .. })
    }
}

/// Writes an encode of `input` no larger than `max_bytes` to `output`.
///
/// Attempts go to a hidden sibling of `output` (see [`candidate_path`]) and
/// only a fitting one is renamed over `output`, so a copy from an earlier run
/// survives a failed search. At most one candidate exists at any time: an
/// oversized attempt is deleted before the next one starts, and none is left
/// once the search ends. An attempt that produces no file ends the search
/// immediately.
#[tracing::instrument(skip_all, fields(input = %input.display(), budget = %ByteSize(max_bytes)))]
pub async fn compress_under(
    encoder: &Encoder,
    search: CrfSearch,
    input: &Path,
    output: &Path,
    max_bytes: u64,
) -> Result<ShrinkOutcome> {
    let source = tokio::fs::canonicalize(input)
        .await
        .with_context(|| format!("resolve '{}'", input.display()))?;
    if tokio::fs::canonicalize(output).await.ok().as_deref() == Some(source.as_path()) {
        anyhow::bail!("refusing to shrink '{}' onto itself", input.display());
    }
    let candidate = candidate_path(output)?;

    let mut attempts = 0;
    let mut smallest: Option<u64> = None;
    for crf in search.steps() {
        remove_if_exists(&candidate).await?;
        attempts += 1;

        if let Err(e) = encoder.encode(input, &candidate, crf).await {
            warn!(crf, "shrink attempt produced no output: {e:#}");
            remove_if_exists(&candidate).await?;
            return Ok(ShrinkOutcome::Failed {
                crf: Some(crf),
                reason: format!("{e:#}"),
            });
        }

        let size = tokio::fs::metadata(&candidate)
            .await
            .with_context(|| format!("stat '{}'", candidate.display()))?
            .len();
        if size <= max_bytes {
            tokio::fs::rename(&candidate, output)
                .await
                .with_context(|| format!("move '{}' into place", candidate.display()))?;
            info!(crf, size = %ByteSize(size), "fits under budget");
            return Ok(ShrinkOutcome::Fits {
                path: output.to_path_buf(),
                size,
                crf,
            });
        }

        debug!(crf, size = %ByteSize(size), "still too large, raising CRF");
        remove_if_exists(&candidate).await?;
        smallest = Some(smallest.map_or(size, |s| s.min(size)));
    }

    warn!(attempts, "CRF range exhausted without fitting");
    Ok(ShrinkOutcome::Exhausted { attempts, smallest })
}

/// `out/shrunk_clip.avi` is attempted as `out/.partial-shrunk_clip.avi`; the
/// extension is kept so ffmpeg picks the same container.
pub fn candidate_path(output: &Path) -> Result<PathBuf> {
    let name = output
        .file_name()
        .with_context(|| format!("'{}' has no file name", output.display()))?;
    let mut candidate = std::ffi::OsString::from(".partial-");
    candidate.push(name);
    Ok(output.with_file_name(candidate))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_search_walks_28_to_50() {
        let steps: Vec<u8> = CrfSearch::default().steps().collect();
        assert_eq!(steps.first(), Some(&28));
        assert_eq!(steps.last(), Some(&50));
        assert_eq!(steps.len(), 12);
        assert!(steps.windows(2).all(|w| w[1] == w[0] + 2));
    }

    #[test]
    fn ceiling_is_inclusive() {
        let search = CrfSearch {
            start: 45,
            step: 3,
            ceiling: 51,
        };
        assert_eq!(search.steps().collect::<Vec<_>>(), vec![45, 48, 51]);
    }

    #[test]
    fn candidate_keeps_the_extension() {
        assert_eq!(
            candidate_path(Path::new("/out/shrunk_clip.avi")).unwrap(),
            PathBuf::from("/out/.partial-shrunk_clip.avi")
        );
        assert!(candidate_path(Path::new("/")).is_err());
    }

    #[test]
    fn zero_step_still_advances() {
        let search = CrfSearch {
            start: 50,
            step: 0,
            ceiling: 51,
        };
        assert_eq!(search.steps().collect::<Vec<_>>(), vec![50, 51]);
    }
}
