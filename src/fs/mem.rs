//! In-memory filesystem
//!
//! Used by tests and dry runs. Errors carry the same raw OS codes as the
//! host filesystem so callers can treat both identically.

use super::{base_name, clean_path, FileInfo, FileKind, FileSystem, Timestamps, MODE_MASK};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::io::{self, Cursor, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

const MAX_SYMLINK_HOPS: usize = 40;

#[derive(Debug, Clone)]
enum NodeData {
    Dir,
    File(Vec<u8>),
    Symlink(PathBuf),
}

#[derive(Debug, Clone)]
struct Node {
    data: NodeData,
    mode: u32,
    uid: u32,
    gid: u32,
    times: Timestamps,
}

impl Node {
    fn new(data: NodeData, mode: u32) -> Self {
        Self {
            data,
            mode: mode & MODE_MASK,
            uid: 0,
            gid: 0,
            times: Timestamps::uniform(Utc::now()),
        }
    }

    fn info(&self, path: &Path) -> FileInfo {
        let (kind, size, link_target) = match &self.data {
            NodeData::Dir => (FileKind::Dir, 0, None),
            NodeData::File(bytes) => (FileKind::File, bytes.len() as u64, None),
            NodeData::Symlink(target) => (
                FileKind::Symlink,
                target.as_os_str().len() as u64,
                Some(target.clone()),
            ),
        };
        FileInfo {
            name: base_name(path),
            kind,
            mode: self.mode,
            uid: self.uid,
            gid: self.gid,
            size,
            times: self.times,
            link_target,
        }
    }
}

fn errno(code: i32) -> io::Error {
    io::Error::from_raw_os_error(code)
}

/// Thread-safe in-memory directory tree rooted at `/`
#[derive(Debug)]
pub struct MemFs {
    nodes: Mutex<BTreeMap<PathBuf, Node>>,
}

impl Default for MemFs {
    fn default() -> Self {
        Self::new()
    }
}

impl MemFs {
    /// Create a filesystem containing only `/`
    pub fn new() -> Self {
        let mut nodes = BTreeMap::new();
        nodes.insert(PathBuf::from("/"), Node::new(NodeData::Dir, 0o755));
        Self {
            nodes: Mutex::new(nodes),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<PathBuf, Node>> {
        // A poisoned map is still structurally valid
        self.nodes.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Follow symlinks on the final component
    fn resolve(nodes: &BTreeMap<PathBuf, Node>, path: &Path) -> io::Result<PathBuf> {
        let mut current = clean_path(path);
        for _ in 0..MAX_SYMLINK_HOPS {
            let node = nodes.get(&current).ok_or_else(|| errno(libc::ENOENT))?;
            match &node.data {
                NodeData::Symlink(target) => {
                    let parent = current.parent().unwrap_or(Path::new("/"));
                    current = clean_path(&parent.join(target));
                }
                _ => return Ok(current),
            }
        }
        Err(errno(libc::ELOOP))
    }

    fn require_parent_dir(nodes: &BTreeMap<PathBuf, Node>, path: &Path) -> io::Result<()> {
        let parent = path.parent().ok_or_else(|| errno(libc::EEXIST))?;
        let parent = Self::resolve(nodes, parent)?;
        match nodes.get(&parent).map(|n| &n.data) {
            Some(NodeData::Dir) => Ok(()),
            Some(_) => Err(errno(libc::ENOTDIR)),
            None => Err(errno(libc::ENOENT)),
        }
    }

    fn has_children(nodes: &BTreeMap<PathBuf, Node>, path: &Path) -> bool {
        nodes.keys().any(|k| k.parent() == Some(path))
    }

    fn insert_new(&self, path: &Path, node: Node) -> io::Result<()> {
        let path = clean_path(path);
        let mut nodes = self.lock();
        if nodes.contains_key(&path) {
            return Err(errno(libc::EEXIST));
        }
        Self::require_parent_dir(&nodes, &path)?;
        nodes.insert(path, node);
        Ok(())
    }

    fn update<T>(&self, path: &Path, f: impl FnOnce(&mut Node) -> T) -> io::Result<T> {
        let path = clean_path(path);
        let mut nodes = self.lock();
        let node = nodes.get_mut(&path).ok_or_else(|| errno(libc::ENOENT))?;
        Ok(f(node))
    }
}

/// Writer appending to a file node on every write
struct MemWriter<'a> {
    fs: &'a MemFs,
    path: PathBuf,
}

impl Write for MemWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.fs.update(&self.path, |node| match &mut node.data {
            NodeData::File(bytes) => {
                bytes.extend_from_slice(buf);
                Ok(buf.len())
            }
            _ => Err(errno(libc::EISDIR)),
        })?
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl FileSystem for MemFs {
    fn open(&self, path: &Path) -> io::Result<Box<dyn Read + Send + '_>> {
        let nodes = self.lock();
        let resolved = Self::resolve(&nodes, path)?;
        match nodes.get(&resolved).map(|n| &n.data) {
            Some(NodeData::File(bytes)) => Ok(Box::new(Cursor::new(bytes.clone()))),
            Some(_) => Err(errno(libc::EISDIR)),
            None => Err(errno(libc::ENOENT)),
        }
    }

    fn stat(&self, path: &Path) -> io::Result<FileInfo> {
        let nodes = self.lock();
        let resolved = Self::resolve(&nodes, path)?;
        let node = nodes.get(&resolved).ok_or_else(|| errno(libc::ENOENT))?;
        let mut info = node.info(&resolved);
        info.name = base_name(path);
        Ok(info)
    }

    fn lstat(&self, path: &Path) -> io::Result<FileInfo> {
        let path = clean_path(path);
        let nodes = self.lock();
        let node = nodes.get(&path).ok_or_else(|| errno(libc::ENOENT))?;
        Ok(node.info(&path))
    }

    fn read_dir(&self, path: &Path) -> io::Result<Vec<FileInfo>> {
        let nodes = self.lock();
        let dir = Self::resolve(&nodes, path)?;
        match nodes.get(&dir).map(|n| &n.data) {
            Some(NodeData::Dir) => {}
            Some(_) => return Err(errno(libc::ENOTDIR)),
            None => return Err(errno(libc::ENOENT)),
        }
        // BTreeMap order is name order within one directory
        Ok(nodes
            .iter()
            .filter(|(k, _)| k.parent() == Some(dir.as_path()))
            .map(|(k, n)| n.info(k))
            .collect())
    }

    fn read_link(&self, path: &Path) -> io::Result<PathBuf> {
        let path = clean_path(path);
        let nodes = self.lock();
        match nodes.get(&path).map(|n| &n.data) {
            Some(NodeData::Symlink(target)) => Ok(target.clone()),
            Some(_) => Err(errno(libc::EINVAL)),
            None => Err(errno(libc::ENOENT)),
        }
    }

    fn mkdir(&self, path: &Path, mode: u32) -> io::Result<()> {
        self.insert_new(path, Node::new(NodeData::Dir, mode))
    }

    fn create(&self, path: &Path, mode: u32) -> io::Result<Box<dyn Write + Send + '_>> {
        let path = clean_path(path);
        let mut nodes = self.lock();
        let target = match Self::resolve(&nodes, &path) {
            Ok(resolved) => resolved,
            Err(e) if e.raw_os_error() == Some(libc::ENOENT) => path,
            Err(e) => return Err(e),
        };
        match nodes.get_mut(&target) {
            Some(node) => {
                if matches!(node.data, NodeData::Dir) {
                    return Err(errno(libc::EISDIR));
                }
                node.data = NodeData::File(Vec::new());
                node.times.modified = Utc::now();
            }
            None => {
                Self::require_parent_dir(&nodes, &target)?;
                nodes.insert(target.clone(), Node::new(NodeData::File(Vec::new()), mode));
            }
        }
        drop(nodes);
        Ok(Box::new(MemWriter {
            fs: self,
            path: target,
        }))
    }

    fn remove(&self, path: &Path) -> io::Result<()> {
        let path = clean_path(path);
        let mut nodes = self.lock();
        let node = nodes.get(&path).ok_or_else(|| errno(libc::ENOENT))?;
        if matches!(node.data, NodeData::Dir) && Self::has_children(&nodes, &path) {
            return Err(errno(libc::ENOTEMPTY));
        }
        if path.parent().is_none() {
            return Err(errno(libc::EBUSY));
        }
        nodes.remove(&path);
        Ok(())
    }

    fn remove_all(&self, path: &Path) -> io::Result<()> {
        let path = clean_path(path);
        let mut nodes = self.lock();
        nodes.retain(|k, _| k == Path::new("/") || !k.starts_with(&path));
        Ok(())
    }

    fn symlink(&self, target: &Path, link: &Path) -> io::Result<()> {
        self.insert_new(
            link,
            Node::new(NodeData::Symlink(target.to_path_buf()), 0o777),
        )
    }

    fn hard_link(&self, original: &Path, link: &Path) -> io::Result<()> {
        // Copies the node; the two paths do not share later writes
        let node = {
            let nodes = self.lock();
            let original = clean_path(original);
            nodes
                .get(&original)
                .cloned()
                .ok_or_else(|| errno(libc::ENOENT))?
        };
        if matches!(node.data, NodeData::Dir) {
            return Err(errno(libc::EPERM));
        }
        self.insert_new(link, node)
    }

    fn set_mode(&self, path: &Path, mode: u32) -> io::Result<()> {
        let nodes = self.lock();
        let resolved = Self::resolve(&nodes, path)?;
        drop(nodes);
        self.update(&resolved, |node| node.mode = mode & MODE_MASK)
    }

    fn set_owner(&self, path: &Path, uid: u32, gid: u32) -> io::Result<()> {
        self.update(path, |node| {
            node.uid = uid;
            node.gid = gid;
        })
    }

    fn set_modified(&self, path: &Path, modified: DateTime<Utc>) -> io::Result<()> {
        self.update(path, |node| {
            if !matches!(node.data, NodeData::Symlink(_)) {
                node.times.modified = modified;
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::is_not_empty;

    #[test]
    fn write_and_read_back() {
        let fs = MemFs::new();
        fs.write_file(Path::new("/hello"), b"world", 0o640).unwrap();

        assert_eq!(fs.read_file(Path::new("/hello")).unwrap(), b"world");
        let info = fs.stat(Path::new("/hello")).unwrap();
        assert_eq!(info.mode, 0o640);
        assert_eq!(info.size, 5);
    }

    #[test]
    fn create_requires_parent() {
        let fs = MemFs::new();
        let err = fs.write_file(Path::new("/missing/file"), b"", 0o644).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }

    #[test]
    fn mkdir_existing_fails() {
        let fs = MemFs::new();
        fs.mkdir(Path::new("/a"), 0o755).unwrap();
        let err = fs.mkdir(Path::new("/a"), 0o755).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::AlreadyExists);
    }

    #[test]
    fn remove_non_empty_dir_fails() {
        let fs = MemFs::new();
        fs.mkdir(Path::new("/a"), 0o755).unwrap();
        fs.write_file(Path::new("/a/f"), b"", 0o644).unwrap();

        let err = fs.remove(Path::new("/a")).unwrap_err();
        assert!(is_not_empty(&err));

        fs.remove(Path::new("/a/f")).unwrap();
        fs.remove(Path::new("/a")).unwrap();
        assert!(fs.lstat(Path::new("/a")).is_err());
    }

    #[test]
    fn stat_follows_symlink() {
        let fs = MemFs::new();
        fs.mkdir(Path::new("/dir"), 0o755).unwrap();
        fs.write_file(Path::new("/dir/real"), b"abc", 0o644).unwrap();
        fs.symlink(Path::new("real"), Path::new("/dir/link")).unwrap();

        assert!(fs.lstat(Path::new("/dir/link")).unwrap().is_symlink());
        let info = fs.stat(Path::new("/dir/link")).unwrap();
        assert!(info.is_file());
        assert_eq!(info.name, "link");
        assert_eq!(fs.read_file(Path::new("/dir/link")).unwrap(), b"abc");
    }

    #[test]
    fn read_dir_lists_direct_children() {
        let fs = MemFs::new();
        fs.mkdir_all(Path::new("/a/b/c"), 0o755).unwrap();
        fs.write_file(Path::new("/a/z"), b"", 0o644).unwrap();

        let names: Vec<String> = fs
            .read_dir(Path::new("/a"))
            .unwrap()
            .into_iter()
            .map(|i| i.name)
            .collect();
        assert_eq!(names, vec!["b", "z"]);
    }

    #[test]
    fn remove_all_drops_subtree() {
        let fs = MemFs::new();
        fs.mkdir_all(Path::new("/a/b"), 0o755).unwrap();
        fs.write_file(Path::new("/a/b/f"), b"", 0o644).unwrap();
        fs.write_file(Path::new("/ab"), b"", 0o644).unwrap();

        fs.remove_all(Path::new("/a")).unwrap();
        assert!(fs.lstat(Path::new("/a/b/f")).is_err());
        assert!(fs.lstat(Path::new("/ab")).is_ok());
        fs.remove_all(Path::new("/nothing")).unwrap();
    }
}
