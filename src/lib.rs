//! Batch normalization of a video folder to H.264.
//!
//! Every candidate in a source directory is fingerprinted, probed with
//! `ffprobe`, re-encoded with `ffmpeg` when it is not already H.264, and, when
//! the result is larger than the upload cap, shrunk into a separate output
//! directory by walking the CRF upwards until it fits.

pub mod batch;
pub mod config;
pub mod encode;
pub mod fingerprint;
pub mod pipeline;
pub mod probe;
pub mod shrink;
pub mod tools;

pub use batch::{run_batch, BatchHooks, BatchSummary, ProgressEvent};
pub use config::Config;
pub use fingerprint::{Fingerprint, FingerprintStore};
pub use pipeline::{Outcome, Pipeline, PipelineOptions};
pub use tools::Tools;
