//! Content fingerprints and the append-only record of processed ones.

use anyhow::{Context, Result};
use educe::Educe;
use std::collections::HashSet;
use std::fmt;
use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::task::spawn_blocking;
use tracing::{debug, trace};

pub const DEFAULT_STORE_FILE: &str = "processed_videos.txt";

const CHUNK_SIZE: usize = 8192;

/// BLAKE3 digest of a file's complete contents, in lowercase hex.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn from_line(line: &str) -> Option<Self> {
        let line = line.trim();
        (!line.is_empty()).then(|| Self(line.to_owned()))
    }

    /// Hashes `path` on the current thread, one chunk at a time.
    pub fn compute_blocking(path: &Path) -> io::Result<Self> {
        let mut file = File::open(path)?;
        let mut hasher = blake3::Hasher::new();
        let mut chunk = [0u8; CHUNK_SIZE];
        loop {
            let read = match file.read(&mut chunk) {
                Ok(0) => break,
                Ok(read) => read,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            };
            hasher.update(&chunk[..read]);
        }
        Ok(Self(hasher.finalize().to_hex().to_string()))
    }

    /// Hashes `path` on the blocking pool.
    pub async fn compute(path: &Path) -> Result<Self> {
        let owned = path.to_path_buf();
        let fingerprint = spawn_blocking(move || Fingerprint::compute_blocking(&owned))
            .await
            .context("join hashing task")?
            .with_context(|| format!("hash '{}'", path.display()))?;
        trace!(path = %path.display(), %fingerprint, "hashed");
        Ok(fingerprint)
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Set of fingerprints whose files were already handled, backed by a text
/// file holding one digest per line.
///
/// The file is only ever appended to, so it may hold the same digest more
/// than once; it is always read back as a set.
#[derive(Educe)]
#[educe(Debug)]
pub struct FingerprintStore {
    path: PathBuf,
    #[educe(Debug(ignore))]
    seen: HashSet<Fingerprint>,
}

impl FingerprintStore {
    /// Reads every recorded fingerprint. A store that does not exist yet is empty.
    pub async fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let seen = match tokio::fs::read_to_string(&path).await {
            Ok(text) => text.lines().filter_map(Fingerprint::from_line).collect(),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(store = %path.display(), "no fingerprint store yet");
                HashSet::new()
            }
            Err(e) => {
                return Err(e).with_context(|| format!("read '{}'", path.display()));
            }
        };
        debug!(store = %path.display(), entries = seen.len(), "loaded fingerprint store");
        Ok(Self { path, seen })
    }

    pub fn contains(&self, fingerprint: &Fingerprint) -> bool {
        self.seen.contains(fingerprint)
    }

    /// Appends `fingerprint` to the backing file and remembers it.
    pub async fn record(&mut self, fingerprint: &Fingerprint) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("create '{}'", parent.display()))?;
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .with_context(|| format!("open '{}'", self.path.display()))?;
        file.write_all(format!("{fingerprint}\n").as_bytes())
            .await
            .with_context(|| format!("append to '{}'", self.path.display()))?;
        file.sync_data().await.context("sync fingerprint store")?;

        self.seen.insert(fingerprint.clone());
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn identical_content_gives_identical_fingerprint() {
        let dir = TempDir::new().unwrap();
        let a = dir.path().join("a.mp4");
        let b = dir.path().join("b.mkv");
        let c = dir.path().join("c.mkv");
        let body = vec![7u8; CHUNK_SIZE * 3 + 11];
        std::fs::write(&a, &body).unwrap();
        std::fs::write(&b, &body).unwrap();
        std::fs::write(&c, b"something else").unwrap();

        let fa = Fingerprint::compute_blocking(&a).unwrap();
        assert_eq!(fa, Fingerprint::compute_blocking(&b).unwrap());
        assert_ne!(fa, Fingerprint::compute_blocking(&c).unwrap());
        assert_eq!(fa.as_str(), blake3::hash(&body).to_hex().as_str());
    }

    #[tokio::test]
    async fn missing_store_loads_empty() {
        let dir = TempDir::new().unwrap();
        let store = FingerprintStore::load(dir.path().join("nope.txt")).await.unwrap();
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn duplicate_and_blank_lines_are_tolerated() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("store.txt");
        std::fs::write(&path, "abc\n\n  def \nabc\n").unwrap();

        let store = FingerprintStore::load(&path).await.unwrap();
        assert_eq!(store.len(), 2);
        assert!(store.contains(&Fingerprint("def".into())));
    }

    #[tokio::test]
    async fn record_appends_without_rewriting() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("store.txt");
        let mut store = FingerprintStore::load(&path).await.unwrap();

        let fp = Fingerprint("0123abcd".into());
        store.record(&fp).await.unwrap();
        store.record(&fp).await.unwrap();
        assert!(store.contains(&fp));
        assert_eq!(store.len(), 1);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "0123abcd\n0123abcd\n");

        let reloaded = FingerprintStore::load(&path).await.unwrap();
        assert!(reloaded.contains(&fp));
    }
}
