//! Glob patterns selecting which image files get content-cached

use crate::error::{StratumError, StratumResult};
use globset::{GlobBuilder, GlobMatcher};
use std::path::Path;

/// A compiled cache pattern, relative to the image root
#[derive(Debug, Clone)]
pub struct CachePattern {
    raw: String,
    /// `None` selects the image root itself
    matcher: Option<GlobMatcher>,
}

impl CachePattern {
    /// Compile a pattern. Leading and trailing `/` are ignored and `*`
    /// never crosses a path separator.
    pub fn new(pattern: &str) -> StratumResult<Self> {
        let raw = pattern.trim_start_matches('/').trim_end_matches('/').to_string();
        if raw.is_empty() {
            return Ok(Self { raw, matcher: None });
        }
        let glob = GlobBuilder::new(&raw)
            .literal_separator(true)
            .build()
            .map_err(|e| StratumError::PatternInvalid {
                pattern: pattern.to_string(),
                reason: e.to_string(),
            })?;
        Ok(Self {
            raw,
            matcher: Some(glob.compile_matcher()),
        })
    }

    /// Compile a list of patterns
    pub fn compile_all<S: AsRef<str>>(patterns: &[S]) -> StratumResult<Vec<Self>> {
        patterns.iter().map(|p| Self::new(p.as_ref())).collect()
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Whether the root-relative `path` is selected by this pattern
    pub fn matches(&self, path: &Path) -> bool {
        match &self.matcher {
            Some(m) => m.is_match(path),
            None => path.as_os_str().is_empty(),
        }
    }

    /// Whether `path` is a strict ancestor of what this pattern names
    pub fn is_beneath(&self, path: &Path) -> bool {
        let name = path.to_string_lossy();
        if name.is_empty() {
            return !self.raw.is_empty();
        }
        self.raw
            .strip_prefix(name.as_ref())
            .is_some_and(|rest| rest.starts_with('/'))
    }
}
