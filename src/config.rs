//! The `paths.txt` configuration: a header line, then the source directory,
//! then the output directory for shrunk copies.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tracing::debug;

pub const DEFAULT_CONFIG_FILE: &str = "paths.txt";
pub const HEADER: &str = "# Paths configuration";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Config {
    pub source_dir: Option<PathBuf>,
    pub output_dir: Option<PathBuf>,
}

impl Config {
    /// The first line is never read. Empty or missing lines leave the field unset.
    pub fn parse(text: &str) -> Self {
        let mut lines = text.lines().skip(1).map(parse_dir);
        let source_dir = lines.next().flatten();
        let output_dir = lines.next().flatten();
        Self {
            source_dir,
            output_dir,
        }
    }

    /// Reads `path`; a missing file gives an empty configuration.
    pub fn load(path: &Path) -> Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(text) => {
                let config = Self::parse(&text);
                debug!(config = %path.display(), ?config, "loaded configuration");
                Ok(config)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(config = %path.display(), "no configuration file");
                Ok(Self::default())
            }
            Err(e) => Err(e).with_context(|| format!("read '{}'", path.display())),
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let text = format!(
            "{HEADER}\n{}\n{}\n",
            display_dir(self.source_dir.as_deref()),
            display_dir(self.output_dir.as_deref())
        );
        std::fs::write(path, text).with_context(|| format!("write '{}'", path.display()))?;
        debug!(config = %path.display(), "saved configuration");
        Ok(())
    }

    pub fn source_dir(&self) -> Result<&Path> {
        self.source_dir
            .as_deref()
            .context("no source directory configured (line 2 of the paths file, or --source)")
    }

    pub fn output_dir(&self) -> Result<&Path> {
        self.output_dir
            .as_deref()
            .context("no output directory configured (line 3 of the paths file, or --output)")
    }
}

/// Expands a leading `~` and drops surrounding whitespace.
pub fn parse_dir(raw: &str) -> Option<PathBuf> {
    let raw = raw.trim();
    (!raw.is_empty()).then(|| PathBuf::from(shellexpand::tilde(raw).into_owned()))
}

fn display_dir(dir: Option<&Path>) -> String {
    dir.map(|d| d.display().to_string()).unwrap_or_default()
}
