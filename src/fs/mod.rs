//! Base filesystem abstraction
//!
//! Every component takes its filesystem as an explicit `Arc<dyn FileSystem>`
//! so tests can inject [`MemFs`] or wrap a backend in [`ReadOnlyFs`].
//! Errors follow POSIX semantics through `std::io::Error`.

mod mem;
mod os;
mod readonly;

pub use mem::MemFs;
pub use os::OsFs;
pub use readonly::ReadOnlyFs;

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::io::{self, Read, Write};
use std::path::{Component, Path, PathBuf};

/// Mask for permission bits including setuid, setgid and sticky
pub const MODE_MASK: u32 = 0o7777;

/// File type as seen by stat
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FileKind {
    File,
    Dir,
    Symlink,
    CharDevice,
    BlockDevice,
    Fifo,
    Socket,
}

impl FileKind {
    /// Single-character prefix used in mode strings
    pub fn mode_char(&self) -> char {
        match self {
            Self::File => '-',
            Self::Dir => 'd',
            Self::Symlink => 'L',
            Self::CharDevice => 'c',
            Self::BlockDevice => 'D',
            Self::Fifo => 'p',
            Self::Socket => 'S',
        }
    }
}

impl fmt::Display for FileKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::File => "file",
            Self::Dir => "dir",
            Self::Symlink => "symlink",
            Self::CharDevice => "chardev",
            Self::BlockDevice => "blockdev",
            Self::Fifo => "fifo",
            Self::Socket => "socket",
        };
        write!(f, "{}", name)
    }
}

/// Access, change and modification times
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Timestamps {
    pub accessed: DateTime<Utc>,
    pub changed: DateTime<Utc>,
    pub modified: DateTime<Utc>,
}

impl Timestamps {
    /// All three timestamps set to the same instant
    pub fn uniform(at: DateTime<Utc>) -> Self {
        Self {
            accessed: at,
            changed: at,
            modified: at,
        }
    }
}

/// Convert seconds + nanoseconds since the epoch, clamping invalid input to the epoch
pub fn unix_time(secs: i64, nanos: u32) -> DateTime<Utc> {
    DateTime::from_timestamp(secs, nanos).unwrap_or_default()
}

/// File metadata independent of the backing store
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileInfo {
    /// Base name of the file
    pub name: String,
    pub kind: FileKind,
    /// Permission bits including setuid/setgid/sticky
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    pub size: u64,
    pub times: Timestamps,
    /// Symlink target, when `kind` is `Symlink`
    pub link_target: Option<PathBuf>,
}

impl FileInfo {
    pub fn is_dir(&self) -> bool {
        self.kind == FileKind::Dir
    }

    pub fn is_file(&self) -> bool {
        self.kind == FileKind::File
    }

    pub fn is_symlink(&self) -> bool {
        self.kind == FileKind::Symlink
    }
}

/// Filesystem operations used by the cache core
pub trait FileSystem: Send + Sync {
    /// Open a file for reading, following symlinks
    fn open(&self, path: &Path) -> io::Result<Box<dyn Read + Send + '_>>;

    /// Metadata, following symlinks
    fn stat(&self, path: &Path) -> io::Result<FileInfo>;

    /// Metadata of the path itself
    fn lstat(&self, path: &Path) -> io::Result<FileInfo>;

    /// Directory entries (lstat metadata) sorted by name
    fn read_dir(&self, path: &Path) -> io::Result<Vec<FileInfo>>;

    fn read_link(&self, path: &Path) -> io::Result<PathBuf>;

    /// Create a single directory; the parent must exist
    fn mkdir(&self, path: &Path, mode: u32) -> io::Result<()>;

    /// Create or truncate a file for writing
    fn create(&self, path: &Path, mode: u32) -> io::Result<Box<dyn Write + Send + '_>>;

    /// Remove a file or an empty directory
    fn remove(&self, path: &Path) -> io::Result<()>;

    /// Remove a path and everything below it; a missing path is not an error
    fn remove_all(&self, path: &Path) -> io::Result<()>;

    fn symlink(&self, target: &Path, link: &Path) -> io::Result<()>;

    fn hard_link(&self, original: &Path, link: &Path) -> io::Result<()>;

    /// Set permission bits
    fn set_mode(&self, path: &Path, mode: u32) -> io::Result<()>;

    /// Change ownership without following symlinks
    fn set_owner(&self, path: &Path, uid: u32, gid: u32) -> io::Result<()>;

    /// Set the modification time (symlinks are left untouched)
    fn set_modified(&self, path: &Path, modified: DateTime<Utc>) -> io::Result<()>;

    /// Write `data` to `path`, creating or truncating it
    fn write_file(&self, path: &Path, data: &[u8], mode: u32) -> io::Result<()> {
        let mut file = self.create(path, mode)?;
        file.write_all(data)?;
        file.flush()
    }

    /// Read a whole file into memory
    fn read_file(&self, path: &Path) -> io::Result<Vec<u8>> {
        let mut buf = Vec::new();
        self.open(path)?.read_to_end(&mut buf)?;
        Ok(buf)
    }

    /// Create `path` and any missing ancestors
    fn mkdir_all(&self, path: &Path, mode: u32) -> io::Result<()> {
        let mut current = PathBuf::new();
        for component in path.components() {
            current.push(component);
            if matches!(component, Component::RootDir | Component::Prefix(_)) {
                continue;
            }
            match self.lstat(&current) {
                Ok(info) if info.is_dir() => {}
                Ok(_) => match self.stat(&current) {
                    Ok(info) if info.is_dir() => {}
                    _ => return Err(io::Error::from_raw_os_error(libc::ENOTDIR)),
                },
                Err(e) if e.kind() == io::ErrorKind::NotFound => self.mkdir(&current, mode)?,
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }
}

/// Whether `err` reports a non-empty directory
pub fn is_not_empty(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::DirectoryNotEmpty || err.raw_os_error() == Some(libc::ENOTEMPTY)
}

/// Whether `err` reports a missing path
pub fn is_not_found(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::NotFound
}

/// Lexically normalise an absolute path, resolving `.` and `..`
///
/// Relative input is anchored at `/`.
pub fn clean_path(path: &Path) -> PathBuf {
    let mut out = PathBuf::from("/");
    for component in path.components() {
        match component {
            Component::Normal(part) => out.push(part),
            Component::ParentDir => {
                out.pop();
            }
            Component::RootDir | Component::CurDir | Component::Prefix(_) => {}
        }
    }
    out
}

/// Base name of a path as a string (`/` for the root)
pub(crate) fn base_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "/".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_path_resolves_dots() {
        assert_eq!(clean_path(Path::new("/a/./b/../c")), PathBuf::from("/a/c"));
        assert_eq!(clean_path(Path::new("foo/bar.txt")), PathBuf::from("/foo/bar.txt"));
        assert_eq!(clean_path(Path::new("/../..")), PathBuf::from("/"));
    }

    #[test]
    fn not_empty_detection() {
        assert!(is_not_empty(&io::Error::from_raw_os_error(libc::ENOTEMPTY)));
        assert!(!is_not_empty(&io::Error::from_raw_os_error(libc::ENOENT)));
    }

    #[test]
    fn mkdir_all_creates_ancestors() {
        let fs = MemFs::new();
        fs.mkdir_all(Path::new("/a/b/c"), 0o755).unwrap();
        assert!(fs.stat(Path::new("/a/b")).unwrap().is_dir());
        assert!(fs.stat(Path::new("/a/b/c")).unwrap().is_dir());
        // Existing directories are fine
        fs.mkdir_all(Path::new("/a/b"), 0o755).unwrap();
    }

    #[test]
    fn mkdir_all_rejects_file_in_the_way() {
        let fs = MemFs::new();
        fs.write_file(Path::new("/a"), b"x", 0o644).unwrap();
        let err = fs.mkdir_all(Path::new("/a/b"), 0o755).unwrap_err();
        assert_eq!(err.raw_os_error(), Some(libc::ENOTDIR));
    }
}
