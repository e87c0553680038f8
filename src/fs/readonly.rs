//! Read-only view over another filesystem

use super::{FileInfo, FileSystem};
use chrono::{DateTime, Utc};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::trace;

/// Forwards reads to the inner filesystem and rejects every write
pub struct ReadOnlyFs {
    inner: Arc<dyn FileSystem>,
}

impl ReadOnlyFs {
    pub fn new(inner: Arc<dyn FileSystem>) -> Self {
        Self { inner }
    }

    fn denied(op: &str, path: &Path) -> io::Error {
        trace!("read-only filesystem rejected {} on {}", op, path.display());
        io::Error::from_raw_os_error(libc::EROFS)
    }
}

impl FileSystem for ReadOnlyFs {
    fn open(&self, path: &Path) -> io::Result<Box<dyn Read + Send + '_>> {
        self.inner.open(path)
    }

    fn stat(&self, path: &Path) -> io::Result<FileInfo> {
        self.inner.stat(path)
    }

    fn lstat(&self, path: &Path) -> io::Result<FileInfo> {
        self.inner.lstat(path)
    }

    fn read_dir(&self, path: &Path) -> io::Result<Vec<FileInfo>> {
        self.inner.read_dir(path)
    }

    fn read_link(&self, path: &Path) -> io::Result<PathBuf> {
        self.inner.read_link(path)
    }

    fn mkdir(&self, path: &Path, _mode: u32) -> io::Result<()> {
        Err(Self::denied("mkdir", path))
    }

    fn create(&self, path: &Path, _mode: u32) -> io::Result<Box<dyn Write + Send + '_>> {
        Err(Self::denied("create", path))
    }

    fn remove(&self, path: &Path) -> io::Result<()> {
        Err(Self::denied("remove", path))
    }

    fn remove_all(&self, path: &Path) -> io::Result<()> {
        Err(Self::denied("remove_all", path))
    }

    fn symlink(&self, _target: &Path, link: &Path) -> io::Result<()> {
        Err(Self::denied("symlink", link))
    }

    fn hard_link(&self, _original: &Path, link: &Path) -> io::Result<()> {
        Err(Self::denied("hard_link", link))
    }

    fn set_mode(&self, path: &Path, _mode: u32) -> io::Result<()> {
        Err(Self::denied("set_mode", path))
    }

    fn set_owner(&self, path: &Path, _uid: u32, _gid: u32) -> io::Result<()> {
        Err(Self::denied("set_owner", path))
    }

    fn set_modified(&self, path: &Path, _modified: DateTime<Utc>) -> io::Result<()> {
        Err(Self::denied("set_modified", path))
    }
}
