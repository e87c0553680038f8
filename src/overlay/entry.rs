//! Lookup results served by the overlay
//!
//! Each capability lives on its own type: every entry can be stat'ed,
//! only [`ContentEntry`] carries a fingerprint, and only base files can be
//! read. Callers pick the capability they need by matching.

use crate::error::{StratumError, StratumResult};
use crate::fingerprint::Fingerprint;
use crate::fs::FileInfo;
use std::fmt;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

/// A file explicitly requested for caching, with its content fingerprint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentEntry {
    pub(crate) path: PathBuf,
    pub(crate) info: FileInfo,
    pub(crate) fingerprint: Fingerprint,
}

impl ContentEntry {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn info(&self) -> &FileInfo {
        &self.info
    }

    /// Fingerprint computed from the tar entry at mount time
    pub fn content_fingerprint(&self) -> &Fingerprint {
        &self.fingerprint
    }
}

/// A directory kept only so paths below it resolve.
///
/// Ancestor entries carry metadata but no fingerprint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AncestorEntry {
    pub(crate) path: PathBuf,
    pub(crate) info: FileInfo,
}

impl AncestorEntry {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn info(&self) -> &FileInfo {
        &self.info
    }
}

/// An entry registered from an image root
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CachedEntry {
    Content(ContentEntry),
    Ancestor(AncestorEntry),
}

impl CachedEntry {
    pub fn path(&self) -> &Path {
        match self {
            Self::Content(e) => &e.path,
            Self::Ancestor(e) => &e.path,
        }
    }

    pub fn info(&self) -> &FileInfo {
        match self {
            Self::Content(e) => &e.info,
            Self::Ancestor(e) => &e.info,
        }
    }

    /// Fingerprint of a content entry; ancestor entries have none
    pub fn fingerprint(&self) -> StratumResult<&Fingerprint> {
        match self {
            Self::Content(e) => Ok(&e.fingerprint),
            Self::Ancestor(e) => Err(StratumError::UndefinedFingerprint(e.path.clone())),
        }
    }
}

/// Result of a stat through the overlay
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Entry {
    /// Served by the base filesystem
    Base(FileInfo),
    /// Served from a cached image root
    Cached(CachedEntry),
}

impl Entry {
    pub fn info(&self) -> &FileInfo {
        match self {
            Self::Base(info) => info,
            Self::Cached(entry) => entry.info(),
        }
    }

    pub fn is_cached(&self) -> bool {
        matches!(self, Self::Cached(_))
    }

    /// The content entry, if this lookup returned one
    pub fn as_content(&self) -> Option<&ContentEntry> {
        match self {
            Self::Cached(CachedEntry::Content(e)) => Some(e),
            _ => None,
        }
    }
}

/// A cached file handle: metadata only, reads are refused
#[derive(Debug, Clone)]
pub struct CachedFile {
    entry: CachedEntry,
}

impl CachedFile {
    pub(crate) fn new(entry: CachedEntry) -> Self {
        Self { entry }
    }

    pub fn entry(&self) -> &CachedEntry {
        &self.entry
    }

    pub fn info(&self) -> &FileInfo {
        self.entry.info()
    }
}

impl Read for CachedFile {
    fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            format!(
                "reading cached file is not allowed: {}",
                self.entry.path().display()
            ),
        ))
    }
}

/// Result of an open through the overlay
pub enum OpenFile<'a> {
    Base(Box<dyn Read + Send + 'a>),
    Cached(CachedFile),
}

impl<'a> OpenFile<'a> {
    pub fn is_cached(&self) -> bool {
        matches!(self, Self::Cached(_))
    }

    /// Reader over real content; cached files fail with `CachedRead`
    pub fn into_reader(self) -> StratumResult<Box<dyn Read + Send + 'a>> {
        match self {
            Self::Base(reader) => Ok(reader),
            Self::Cached(file) => Err(StratumError::CachedRead(file.entry.path().to_path_buf())),
        }
    }
}

impl fmt::Debug for OpenFile<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Base(_) => f.write_str("OpenFile::Base"),
            Self::Cached(file) => f.debug_tuple("OpenFile::Cached").field(file).finish(),
        }
    }
}
