//! Host filesystem backed by `std::fs`

use super::{base_name, unix_time, FileInfo, FileKind, FileSystem, Timestamps, MODE_MASK};
use chrono::{DateTime, Utc};
use std::fs::{self, File, OpenOptions, Permissions};
use std::io::{self, BufWriter, Read, Write};
use std::os::unix::fs::{DirBuilderExt, FileTypeExt, MetadataExt, OpenOptionsExt, PermissionsExt};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// The real filesystem of the host
#[derive(Debug, Clone, Copy, Default)]
pub struct OsFs;

impl OsFs {
    pub fn new() -> Self {
        Self
    }
}

fn to_info(path: &Path, meta: &fs::Metadata, link_target: Option<PathBuf>) -> FileInfo {
    let ft = meta.file_type();
    let kind = if ft.is_dir() {
        FileKind::Dir
    } else if ft.is_symlink() {
        FileKind::Symlink
    } else if ft.is_char_device() {
        FileKind::CharDevice
    } else if ft.is_block_device() {
        FileKind::BlockDevice
    } else if ft.is_fifo() {
        FileKind::Fifo
    } else if ft.is_socket() {
        FileKind::Socket
    } else {
        FileKind::File
    };

    FileInfo {
        name: base_name(path),
        kind,
        mode: meta.mode() & MODE_MASK,
        uid: meta.uid(),
        gid: meta.gid(),
        size: meta.size(),
        times: Timestamps {
            accessed: unix_time(meta.atime(), meta.atime_nsec() as u32),
            changed: unix_time(meta.ctime(), meta.ctime_nsec() as u32),
            modified: unix_time(meta.mtime(), meta.mtime_nsec() as u32),
        },
        link_target,
    }
}

impl FileSystem for OsFs {
    fn open(&self, path: &Path) -> io::Result<Box<dyn Read + Send + '_>> {
        Ok(Box::new(File::open(path)?))
    }

    fn stat(&self, path: &Path) -> io::Result<FileInfo> {
        let meta = fs::metadata(path)?;
        Ok(to_info(path, &meta, None))
    }

    fn lstat(&self, path: &Path) -> io::Result<FileInfo> {
        let meta = fs::symlink_metadata(path)?;
        let target = if meta.file_type().is_symlink() {
            Some(fs::read_link(path)?)
        } else {
            None
        };
        Ok(to_info(path, &meta, target))
    }

    fn read_dir(&self, path: &Path) -> io::Result<Vec<FileInfo>> {
        let mut entries = Vec::new();
        for entry in fs::read_dir(path)? {
            let entry = entry?;
            entries.push(self.lstat(&entry.path())?);
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    fn read_link(&self, path: &Path) -> io::Result<PathBuf> {
        fs::read_link(path)
    }

    fn mkdir(&self, path: &Path, mode: u32) -> io::Result<()> {
        fs::DirBuilder::new().mode(mode).create(path)
    }

    fn create(&self, path: &Path, mode: u32) -> io::Result<Box<dyn Write + Send + '_>> {
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(mode)
            .open(path)?;
        Ok(Box::new(BufWriter::new(file)))
    }

    fn remove(&self, path: &Path) -> io::Result<()> {
        let meta = fs::symlink_metadata(path)?;
        if meta.is_dir() {
            fs::remove_dir(path)
        } else {
            fs::remove_file(path)
        }
    }

    fn remove_all(&self, path: &Path) -> io::Result<()> {
        let meta = match fs::symlink_metadata(path) {
            Ok(meta) => meta,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e),
        };
        if meta.is_dir() {
            fs::remove_dir_all(path)
        } else {
            fs::remove_file(path)
        }
    }

    fn symlink(&self, target: &Path, link: &Path) -> io::Result<()> {
        std::os::unix::fs::symlink(target, link)
    }

    fn hard_link(&self, original: &Path, link: &Path) -> io::Result<()> {
        fs::hard_link(original, link)
    }

    fn set_mode(&self, path: &Path, mode: u32) -> io::Result<()> {
        fs::set_permissions(path, Permissions::from_mode(mode & MODE_MASK))
    }

    fn set_owner(&self, path: &Path, uid: u32, gid: u32) -> io::Result<()> {
        std::os::unix::fs::lchown(path, Some(uid), Some(gid))
    }

    fn set_modified(&self, path: &Path, modified: DateTime<Utc>) -> io::Result<()> {
        if fs::symlink_metadata(path)?.file_type().is_symlink() {
            return Ok(());
        }
        let file = File::options().read(true).open(path)?;
        file.set_modified(SystemTime::from(modified))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn lstat_reports_symlink_target() {
        let dir = TempDir::new().unwrap();
        let link = dir.path().join("link");
        std::os::unix::fs::symlink("target", &link).unwrap();

        let info = OsFs.lstat(&link).unwrap();
        assert!(info.is_symlink());
        assert_eq!(info.link_target, Some(PathBuf::from("target")));
        assert_eq!(info.name, "link");
    }

    #[test]
    fn write_file_applies_mode() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("file");
        OsFs.write_file(&path, b"content", 0o600).unwrap();

        let info = OsFs.stat(&path).unwrap();
        assert_eq!(info.mode, 0o600);
        assert_eq!(info.size, 7);
        assert_eq!(OsFs.read_file(&path).unwrap(), b"content");
    }

    #[test]
    fn remove_non_empty_dir_reports_not_empty() {
        let dir = TempDir::new().unwrap();
        let sub = dir.path().join("sub");
        OsFs.mkdir(&sub, 0o755).unwrap();
        OsFs.write_file(&sub.join("f"), b"", 0o644).unwrap();

        let err = OsFs.remove(&sub).unwrap_err();
        assert!(super::super::is_not_empty(&err));
    }
}
