//! Composite cache keys
//!
//! A key is an ordered list of parts hashed with SHA256. File parts come
//! from [`Overlay::fingerprint`], so a key computed against cached image
//! metadata equals the key computed after the same image was extracted.

use crate::error::StratumResult;
use crate::overlay::Overlay;
use sha2::{Digest, Sha256};
use std::fmt;
use std::path::Path;
use tracing::trace;

/// Ordered key parts for one build step
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompositeKey {
    parts: Vec<String>,
}

impl CompositeKey {
    /// Start a key chained onto `base` (the previous step's key or the base image digest)
    pub fn new(base: impl Into<String>) -> Self {
        Self {
            parts: vec![base.into()],
        }
    }

    pub fn parts(&self) -> &[String] {
        &self.parts
    }

    /// Append a literal part, such as a command line
    pub fn add_key(&mut self, part: impl Into<String>) {
        self.parts.push(part.into());
    }

    /// Append the fingerprint of `path` as seen through `overlay`.
    ///
    /// Directories contribute every descendant's relative path and
    /// fingerprint in name order; the directories themselves contribute
    /// only their names.
    pub fn add_path(&mut self, overlay: &Overlay, path: impl AsRef<Path>) -> StratumResult<()> {
        let path = path.as_ref();
        let entry = overlay.stat(path)?;
        if !entry.info().is_dir() {
            let fingerprint = overlay.fingerprint(path)?;
            trace!("Cache key part {} = {}", path.display(), fingerprint);
            self.parts.push(fingerprint.to_hex());
            return Ok(());
        }

        let mut hasher = Sha256::new();
        hash_dir(overlay, path, Path::new(""), &mut hasher)?;
        let digest = hex::encode(hasher.finalize());
        trace!("Cache key part {}/ = {}", path.display(), digest);
        self.parts.push(digest);
        Ok(())
    }

    /// Hex SHA256 over all parts
    pub fn hash(&self) -> String {
        let mut hasher = Sha256::new();
        for part in &self.parts {
            hasher.update(part.as_bytes());
            hasher.update(b"\n");
        }
        hex::encode(hasher.finalize())
    }
}

fn hash_dir(overlay: &Overlay, dir: &Path, rel: &Path, hasher: &mut Sha256) -> StratumResult<()> {
    for child in overlay.read_dir(dir)? {
        let path = dir.join(&child.name);
        let child_rel = rel.join(&child.name);
        hasher.update(child_rel.as_os_str().as_encoded_bytes());
        hasher.update(b"\0");
        if child.is_dir() {
            hasher.update(b"/\n");
            hash_dir(overlay, &path, &child_rel, hasher)?;
        } else {
            hasher.update(overlay.fingerprint(&path)?.as_bytes());
            hasher.update(b"\n");
        }
    }
    Ok(())
}

impl fmt::Display for CompositeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.hash())
    }
}
