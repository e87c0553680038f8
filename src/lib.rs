//! Stratum - layer cache core for daemonless image builds
//!
//! Mounts image layers as metadata-only overlays so build steps can be
//! fingerprinted without extracting the image, replays cached step layers
//! onto the working root, and scaffolds build secrets for RUN commands.

pub mod cache;
pub mod cli;
pub mod config;
pub mod error;
pub mod fingerprint;
pub mod fs;
pub mod image;
pub mod overlay;
pub mod scoped;
pub mod secrets;
pub mod step;
pub mod ui;

pub use error::{StratumError, StratumResult};
