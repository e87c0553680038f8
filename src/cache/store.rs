//! Layer store backends

use crate::error::{StratumError, StratumResult};
use crate::image::{Image, Layer, LayeredImage, TarballLayer};
use chrono::{DateTime, Duration, Utc};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// gzip magic bytes
const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Upper bound for `ttl_hours` (about a century)
const MAX_TTL_HOURS: u64 = 24 * 365 * 100;

/// Source of cached step layers
pub trait LayerStore: Send + Sync {
    /// Image stored under `key`; `None` is a cache miss
    fn retrieve(&self, key: &str) -> StratumResult<Option<Arc<dyn Image>>>;
}

/// Layer store backed by a local directory of `<key>.tar` / `<key>.tar.gz` files
#[derive(Debug, Clone)]
pub struct DirectoryLayerStore {
    dir: PathBuf,
    ttl: Option<Duration>,
}

impl DirectoryLayerStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            ttl: None,
        }
    }

    /// Treat entries older than `hours` as misses; 0 disables expiry
    pub fn with_ttl_hours(mut self, hours: u64) -> Self {
        self.ttl = match hours {
            0 => None,
            h => Some(Duration::hours(h.min(MAX_TTL_HOURS) as i64)),
        };
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Reject keys that would escape the store directory
    fn check_key(key: &str) -> StratumResult<()> {
        let valid = !key.is_empty()
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | ':'))
            && !key.starts_with('.');
        if valid {
            Ok(())
        } else {
            Err(StratumError::PathInvalid {
                path: PathBuf::from(key),
                reason: "cache keys may only contain [A-Za-z0-9._:-]".to_string(),
            })
        }
    }

    fn candidates(&self, key: &str) -> [PathBuf; 2] {
        [
            self.dir.join(format!("{}.tar", key)),
            self.dir.join(format!("{}.tar.gz", key)),
        ]
    }

    /// Path of the stored entry for `key`, if any
    pub fn entry_path(&self, key: &str) -> StratumResult<Option<PathBuf>> {
        Self::check_key(key)?;
        Ok(self.candidates(key).into_iter().find(|p| p.is_file()))
    }

    fn is_expired(&self, path: &Path) -> StratumResult<bool> {
        let Some(ttl) = self.ttl else {
            return Ok(false);
        };
        let modified = fs::metadata(path)
            .and_then(|m| m.modified())
            .map_err(|e| StratumError::io(format!("reading {}", path.display()), e))?;
        let modified: DateTime<Utc> = modified.into();
        Ok(modified < Utc::now() - ttl)
    }

    /// Store a single-layer tarball (plain or gzip) under `key`
    pub fn store(&self, key: &str, layer: &[u8]) -> StratumResult<PathBuf> {
        Self::check_key(key)?;
        fs::create_dir_all(&self.dir)
            .map_err(|e| StratumError::io(format!("creating {}", self.dir.display()), e))?;

        let [plain, gzipped] = self.candidates(key);
        let (path, stale) = if layer.starts_with(&GZIP_MAGIC) {
            (gzipped, plain)
        } else {
            (plain, gzipped)
        };

        // Write then rename so readers never see a partial layer
        let partial = path.with_extension("partial");
        fs::write(&partial, layer)
            .map_err(|e| StratumError::io(format!("writing {}", partial.display()), e))?;
        fs::rename(&partial, &path)
            .map_err(|e| StratumError::io(format!("renaming {}", partial.display()), e))?;
        if stale.exists() {
            fs::remove_file(&stale)
                .map_err(|e| StratumError::io(format!("removing {}", stale.display()), e))?;
        }

        debug!("Stored layer {} ({} bytes)", path.display(), layer.len());
        Ok(path)
    }
}

impl LayerStore for DirectoryLayerStore {
    fn retrieve(&self, key: &str) -> StratumResult<Option<Arc<dyn Image>>> {
        let Some(path) = self.entry_path(key)? else {
            debug!("Layer cache miss for {}", key);
            return Ok(None);
        };
        if self.is_expired(&path)? {
            debug!("Layer cache entry {} expired", path.display());
            return Ok(None);
        }

        debug!("Layer cache hit for {} at {}", key, path.display());
        let layer: Arc<dyn Layer> = Arc::new(TarballLayer::open(path)?);
        Ok(Some(Arc::new(LayeredImage::single(layer))))
    }
}
