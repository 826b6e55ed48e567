//! Fake `ffmpeg`/`ffprobe` scripts and a scratch layout for driving the pipeline.
//!
//! The fake prober reports the first line of the file as its codec (`noprobe`
//! makes it fail). The fake encoder writes `h264` followed by zero padding so
//! the output is exactly `(40 - crf)` KiB, fails for inputs whose first line
//! is `broken`, writes its output but still exits 1 for inputs whose first
//! line is `grumpy`, and appends every CRF it is given to `ffmpeg.log` in the
//! scratch root.

#![allow(dead_code)]

use disconvert::shrink::CrfSearch;
use disconvert::{PipelineOptions, Tools};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;
use tempfile::TempDir;

pub const KIB: u64 = 1024;

/// Budget and threshold used by the tests in place of 10 MiB.
pub const LIMIT: u64 = 10 * KIB;

const FFPROBE: &str = r#"#!/bin/sh
for arg in "$@"; do last="$arg"; done
case "$*" in
  *r_frame_rate*) echo "30000/1001"; exit 0 ;;
esac
codec=$(head -n 1 "$last")
if [ "$codec" = "noprobe" ]; then
  echo "moov atom not found" >&2
  exit 1
fi
echo "$codec"
"#;

const FFMPEG: &str = r#"#!/bin/sh
input=""; crf=""; output=""
while [ $# -gt 0 ]; do
  case "$1" in
    -i) input="$2"; shift ;;
    -crf) crf="$2"; shift ;;
  esac
  output="$1"
  shift
done
echo "$crf" >> "$(dirname "$input")/../ffmpeg.log"
first=$(head -n 1 "$input")
if [ "$first" = "broken" ]; then
  echo "Invalid data found when processing input" >&2
  exit 1
fi
printf 'h264\n' > "$output"
pad=$(( (40 - crf) * 1024 - 5 ))
if [ "$pad" -gt 0 ]; then
  head -c "$pad" /dev/zero >> "$output"
fi
if [ "$first" = "grumpy" ]; then
  echo "Error while decoding stream #0:1" >&2
  exit 1
fi
exit 0
"#;

const FFPROBE_HANG: &str = "#!/bin/sh\nexec sleep 30\n";

/// Scripts are written once per test binary, before anything spawns them.
fn tool_dir() -> &'static Path {
    static DIR: OnceLock<TempDir> = OnceLock::new();
    DIR.get_or_init(|| {
        let dir = TempDir::new().unwrap();
        for (name, body) in [
            ("ffprobe", FFPROBE),
            ("ffmpeg", FFMPEG),
            ("ffprobe-hang", FFPROBE_HANG),
        ] {
            let path = dir.path().join(name);
            std::fs::write(&path, body).unwrap();
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        }
        dir
    })
    .path()
}

pub fn fake_tools() -> Tools {
    let dir = tool_dir();
    Tools {
        ffmpeg: dir.join("ffmpeg"),
        ffprobe: dir.join("ffprobe"),
        timeout: Some(Duration::from_secs(30)),
    }
}

pub fn hanging_prober_tools() -> Tools {
    Tools {
        ffprobe: tool_dir().join("ffprobe-hang"),
        timeout: Some(Duration::from_secs(1)),
        ..fake_tools()
    }
}

/// `root/src` holds the videos, `root/out` receives shrunk copies and
/// `root/processed.txt` is the fingerprint store.
pub struct Scratch {
    pub root: TempDir,
}

impl Scratch {
    pub fn new() -> Self {
        let root = TempDir::new().unwrap();
        std::fs::create_dir(root.path().join("src")).unwrap();
        Self { root }
    }

    pub fn src(&self) -> PathBuf {
        self.root.path().join("src")
    }

    pub fn out(&self) -> PathBuf {
        self.root.path().join("out")
    }

    pub fn store(&self) -> PathBuf {
        self.root.path().join("processed.txt")
    }

    pub fn options(&self) -> PipelineOptions {
        PipelineOptions {
            shrink_threshold: LIMIT,
            max_bytes: LIMIT,
            crf_search: CrfSearch::default(),
            ..PipelineOptions::new(self.out())
        }
    }

    /// Writes `codec` as the first line, padded with zeros to `size` bytes.
    pub fn video(&self, name: &str, codec: &str, size: u64) -> PathBuf {
        let path = self.src().join(name);
        std::fs::write(&path, video_bytes(codec, size)).unwrap();
        path
    }

    pub fn store_lines(&self) -> Vec<String> {
        std::fs::read_to_string(self.store())
            .map(|text| text.lines().map(str::to_owned).collect())
            .unwrap_or_default()
    }

    /// CRF values the fake encoder was run with, in order.
    pub fn encoder_runs(&self) -> Vec<u8> {
        std::fs::read_to_string(self.root.path().join("ffmpeg.log"))
            .map(|text| text.lines().map(|l| l.trim().parse().unwrap()).collect())
            .unwrap_or_default()
    }

    pub fn out_files(&self) -> Vec<String> {
        let Ok(entries) = std::fs::read_dir(self.out()) else {
            return Vec::new();
        };
        let mut names: Vec<String> = entries
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }
}

pub fn video_bytes(codec: &str, size: u64) -> Vec<u8> {
    let mut bytes = format!("{codec}\n").into_bytes();
    bytes.resize(size as usize, 0);
    bytes
}

/// What the fake encoder writes at `crf`.
pub fn encoded_bytes(crf: u8) -> Vec<u8> {
    video_bytes("h264", (40 - u64::from(crf)) * KIB)
}
