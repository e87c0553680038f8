//! Cached filesystem overlay
//!
//! Presents a read-only view combining a base filesystem with metadata
//! cached from one or more image roots. Mounting a root streams the
//! image's layers once, hashing only the files selected by the cache
//! patterns, so later build steps can be fingerprinted without extracting
//! the image to disk.
//!
//! # Lookup order
//!
//! | Source | Wins when |
//! |--------|-----------|
//! | Base filesystem | the path exists there |
//! | Cached roots | the base lookup failed |
//! | Neither | `NotFound` |
//!
//! One overlay instance owns all of its roots; later build stages mount
//! additional roots on the same instance so earlier stages' files resolve
//! through one lookup surface.

mod entry;
mod pattern;

pub use entry::{AncestorEntry, CachedEntry, CachedFile, ContentEntry, Entry, OpenFile};
pub use pattern::CachePattern;

use crate::error::{StratumError, StratumResult};
use crate::fingerprint::{fingerprint_entry, Fingerprint};
use crate::fs::{base_name, clean_path, FileInfo, FileKind, FileSystem, ReadOnlyFs, Timestamps};
use crate::image::{walk_layers, EntryHeader, Image, Layer, LayerVisitor, LayeredImage, Whiteout};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, trace, warn};

/// Mode of ancestor directories the image never listed explicitly
const SYNTHETIC_DIR_MODE: u32 = 0o755;

/// Cached state of one image root
struct MountedRoot {
    image: Arc<dyn Image>,
    files: HashMap<PathBuf, CachedEntry>,
    dirs: HashMap<PathBuf, Vec<FileInfo>>,
}

/// Read-only filesystem over a base filesystem and cached image roots
pub struct Overlay {
    base: Arc<dyn FileSystem>,
    roots: RwLock<BTreeMap<PathBuf, MountedRoot>>,
}

/// Which entries of a walked layer get cached
#[derive(Clone, Copy)]
enum Selection<'a> {
    /// Entries matching (or below a directory matching) a pattern
    Patterns(&'a [CachePattern]),
    /// Every entry, as if the layer had been extracted
    Everything,
}

/// Metadata a hard link inherits from the file it points at
#[derive(Clone)]
struct LinkSource {
    info: FileInfo,
    fingerprint: Option<Fingerprint>,
    /// Regular file entry the link chain ends at, root-relative
    origin: PathBuf,
}

/// Collects cached entries while the layers of one root are walked
struct MountWalker<'a> {
    root: &'a Path,
    selection: Selection<'a>,
    /// Directories whose whole subtree is being cached, root-relative
    open_dirs: Vec<PathBuf>,
    files: HashMap<PathBuf, CachedEntry>,
    /// Regular files and hard links seen so far, root-relative
    sources: HashMap<PathBuf, LinkSource>,
    /// Cached hard links whose target was never hashed, mapped to that target
    pending: HashMap<PathBuf, PathBuf>,
}

fn whited_out(path: &Path, whiteout: &Whiteout) -> bool {
    path.starts_with(&whiteout.path) && !(whiteout.opaque && path == whiteout.path)
}

/// A hard link looks exactly like its target on disk, under its own name
fn linked_info(target: &FileInfo, link: &EntryHeader) -> FileInfo {
    FileInfo {
        name: link.info.name.clone(),
        ..target.clone()
    }
}

impl MountWalker<'_> {
    fn absolute(&self, rel: &Path) -> PathBuf {
        if rel.as_os_str().is_empty() {
            self.root.to_path_buf()
        } else {
            self.root.join(rel)
        }
    }

    /// Remember what a later hard link to this entry would resolve to
    fn track_link_source(&mut self, header: &EntryHeader) {
        let rel = header.path.clone();
        if !header.info.is_file() {
            self.sources.remove(&rel);
            return;
        }
        match &header.hard_link {
            None => {
                self.sources.insert(
                    rel.clone(),
                    LinkSource {
                        info: header.info.clone(),
                        fingerprint: None,
                        origin: rel,
                    },
                );
            }
            Some(target) => match self.sources.get(target).cloned() {
                Some(source) => {
                    self.sources.insert(rel, source);
                }
                None => {
                    self.sources.remove(&rel);
                }
            },
        }
    }

    fn cache_content(&mut self, header: &EntryHeader, content: &mut dyn Read) -> StratumResult<()> {
        let path = self.absolute(&header.path);
        trace!(
            "Found cacheable file {} ({}:{})",
            path.display(),
            header.info.uid,
            header.info.gid
        );

        if header.info.is_dir() {
            self.open_dirs.push(header.path.clone());
        }
        if let Some(target) = &header.hard_link {
            return self.cache_hard_link(header, target, path);
        }

        let fingerprint = fingerprint_entry(&header.info, content)
            .map_err(|e| StratumError::io(format!("hashing {}", path.display()), e))?;
        if let Some(source) = self.sources.get_mut(&header.path) {
            source.fingerprint = Some(fingerprint);
        }
        self.files.insert(
            path.clone(),
            CachedEntry::Content(ContentEntry {
                path,
                info: header.info.clone(),
                fingerprint,
            }),
        );
        Ok(())
    }

    /// The tar payload of a hard link is empty; its content is the target's
    fn cache_hard_link(&mut self, header: &EntryHeader, target: &Path, path: PathBuf) -> StratumResult<()> {
        match self.sources.get(&header.path) {
            Some(LinkSource {
                info,
                fingerprint: Some(fingerprint),
                ..
            }) => {
                let info = linked_info(info, header);
                let fingerprint = *fingerprint;
                self.files.insert(
                    path.clone(),
                    CachedEntry::Content(ContentEntry {
                        path,
                        info,
                        fingerprint,
                    }),
                );
            }
            Some(source) => {
                trace!(
                    "Hard link {} needs uncached target {}",
                    path.display(),
                    source.origin.display()
                );
                self.files.remove(&path);
                self.pending.insert(header.path.clone(), source.origin.clone());
            }
            None => {
                warn!(
                    "Hard link {} points at {}, which is not in the walked layers",
                    path.display(),
                    target.display()
                );
                self.files.remove(&path);
            }
        }
        Ok(())
    }
}

impl LayerVisitor for MountWalker<'_> {
    fn entry(&mut self, header: &EntryHeader, content: &mut dyn Read) -> StratumResult<()> {
        let rel = header.path.as_path();
        self.pending.remove(rel);
        self.track_link_source(header);

        let patterns = match self.selection {
            Selection::Everything => return self.cache_content(header, content),
            Selection::Patterns(patterns) => patterns,
        };

        // Everything below a cached directory is cached too
        if self
            .open_dirs
            .iter()
            .any(|dir| rel != dir.as_path() && rel.starts_with(dir))
        {
            return self.cache_content(header, content);
        }

        if patterns.iter().any(|p| p.matches(rel)) {
            return self.cache_content(header, content);
        }

        if let Some(pattern) = patterns.iter().find(|p| p.is_beneath(rel)) {
            let path = self.absolute(rel);
            if !self.files.contains_key(&path) {
                trace!(
                    "Found cacheable file parent {} (pattern /{})",
                    path.display(),
                    pattern.as_str()
                );
                self.files.insert(
                    path.clone(),
                    CachedEntry::Ancestor(AncestorEntry {
                        path,
                        info: header.info.clone(),
                    }),
                );
            }
        }
        Ok(())
    }

    fn whiteout(&mut self, whiteout: &Whiteout) -> StratumResult<()> {
        let target = self.absolute(&whiteout.path);
        let opaque = whiteout.opaque;
        self.files
            .retain(|path, _| !path.starts_with(&target) || (opaque && path == &target));
        self.sources.retain(|path, _| !whited_out(path, whiteout));
        self.pending.retain(|path, _| !whited_out(path, whiteout));
        Ok(())
    }
}

/// Second pass over the layers, hashing only the targets of pending hard links
struct LinkResolver {
    links: HashMap<PathBuf, PathBuf>,
    targets: HashSet<PathBuf>,
    hashed: HashMap<PathBuf, (FileInfo, Fingerprint)>,
    resolved: HashMap<PathBuf, (FileInfo, Fingerprint)>,
}

impl LayerVisitor for LinkResolver {
    fn entry(&mut self, header: &EntryHeader, content: &mut dyn Read) -> StratumResult<()> {
        if header.hard_link.is_some() {
            if let Some(origin) = self.links.get(&header.path) {
                if let Some((info, fingerprint)) = self.hashed.get(origin) {
                    self.resolved
                        .insert(header.path.clone(), (linked_info(info, header), *fingerprint));
                }
            }
        } else if header.info.is_file() && self.targets.contains(&header.path) {
            let fingerprint = fingerprint_entry(&header.info, content).map_err(|e| {
                StratumError::io(format!("hashing {}", header.path.display()), e)
            })?;
            self.hashed
                .insert(header.path.clone(), (header.info.clone(), fingerprint));
        }
        Ok(())
    }

    fn whiteout(&mut self, _: &Whiteout) -> StratumResult<()> {
        Ok(())
    }
}

/// Walk `layers` for `root`, adding the selected entries to `files`
fn cache_layers(
    root: &Path,
    layers: &[Arc<dyn Layer>],
    selection: Selection<'_>,
    files: HashMap<PathBuf, CachedEntry>,
) -> StratumResult<HashMap<PathBuf, CachedEntry>> {
    let mut walker = MountWalker {
        root,
        selection,
        open_dirs: Vec::new(),
        files,
        sources: HashMap::new(),
        pending: HashMap::new(),
    };
    walk_layers(layers, &mut walker)?;
    let MountWalker {
        mut files, pending, ..
    } = walker;
    if pending.is_empty() {
        return Ok(files);
    }

    debug!("Re-reading layers for {} hard link target(s)", pending.len());
    let mut resolver = LinkResolver {
        targets: pending.values().cloned().collect(),
        links: pending,
        hashed: HashMap::new(),
        resolved: HashMap::new(),
    };
    walk_layers(layers, &mut resolver)?;
    for (rel, (info, fingerprint)) in resolver.resolved {
        let path = root.join(&rel);
        files.insert(
            path.clone(),
            CachedEntry::Content(ContentEntry {
                path,
                info,
                fingerprint,
            }),
        );
    }
    Ok(files)
}

/// Fill in ancestors of cached entries the image did not list explicitly
fn add_missing_ancestors(root: &Path, files: &mut HashMap<PathBuf, CachedEntry>) {
    let mut missing = Vec::new();
    for path in files.keys() {
        for ancestor in path.ancestors().skip(1) {
            if !ancestor.starts_with(root) {
                break;
            }
            if !files.contains_key(ancestor) {
                missing.push(ancestor.to_path_buf());
            }
        }
    }
    for path in missing {
        if files.contains_key(&path) {
            continue;
        }
        trace!("Synthesizing ancestor directory {}", path.display());
        let info = FileInfo {
            name: base_name(&path),
            kind: FileKind::Dir,
            mode: SYNTHETIC_DIR_MODE,
            uid: 0,
            gid: 0,
            size: 0,
            times: Timestamps::default(),
            link_target: None,
        };
        files.insert(path.clone(), CachedEntry::Ancestor(AncestorEntry { path, info }));
    }
}

/// Group cached entries under their parent directory, sorted by name
fn group_directories(files: &HashMap<PathBuf, CachedEntry>) -> HashMap<PathBuf, Vec<FileInfo>> {
    let mut dirs: HashMap<PathBuf, Vec<FileInfo>> = files
        .iter()
        .filter(|(_, entry)| entry.info().is_dir())
        .map(|(path, _)| (path.clone(), Vec::new()))
        .collect();

    for (path, entry) in files {
        if let Some(children) = path.parent().and_then(|parent| dirs.get_mut(parent)) {
            children.push(entry.info().clone());
        }
    }
    for children in dirs.values_mut() {
        children.sort_by(|a, b| a.name.cmp(&b.name));
    }
    dirs
}

impl Overlay {
    /// Create an overlay with no cached roots
    pub fn new(base: Arc<dyn FileSystem>) -> Self {
        Self {
            base: Arc::new(ReadOnlyFs::new(base)),
            roots: RwLock::new(BTreeMap::new()),
        }
    }

    fn read_roots(&self) -> RwLockReadGuard<'_, BTreeMap<PathBuf, MountedRoot>> {
        // Entries are never left half-written, so a poisoned lock is still usable
        self.roots.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write_roots(&self) -> RwLockWriteGuard<'_, BTreeMap<PathBuf, MountedRoot>> {
        self.roots.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Cache `image` under `root`.
    ///
    /// Files whose image-relative path matches one of `patterns` are
    /// hashed; directories that match cache their whole subtree; ancestors
    /// of patterns are kept as metadata-only entries.
    pub fn mount<S: AsRef<str>>(
        &self,
        root: impl AsRef<Path>,
        image: Option<Arc<dyn Image>>,
        patterns: &[S],
    ) -> StratumResult<()> {
        let root_ref = root.as_ref();
        if root_ref.as_os_str().is_empty() {
            return Err(StratumError::EmptyPath);
        }
        let root = clean_path(root_ref);
        let image = image.ok_or_else(|| StratumError::ImageMissing(root.clone()))?;
        let patterns = CachePattern::compile_all(patterns)?;

        // Held for the whole walk: lookups wait until the root is complete
        let mut roots = self.write_roots();
        if roots.contains_key(&root) {
            return Err(StratumError::RootExists(root));
        }

        let layers = image.layers()?;
        debug!("Caching files for {} ({} layer(s))", root.display(), layers.len());
        let mut files = cache_layers(&root, &layers, Selection::Patterns(&patterns), HashMap::new())?;

        add_missing_ancestors(&root, &mut files);
        debug!("Creating cached directories for {}", root.display());
        let dirs = group_directories(&files);

        debug!(
            "Cached {} files in {} directories for {}",
            files.len(),
            dirs.len(),
            root.display()
        );
        roots.insert(root, MountedRoot { image, files, dirs });
        Ok(())
    }

    /// Register a cached step layer under `root` as if it had been extracted there.
    ///
    /// Every entry of the layer is cached with its fingerprint and whiteouts
    /// drop the cached entries they cover. A root that is not mounted yet is
    /// created. Base filesystem entries still win lookups.
    pub fn register_layer(&self, root: impl AsRef<Path>, layer: Arc<dyn Layer>) -> StratumResult<()> {
        let root_ref = root.as_ref();
        if root_ref.as_os_str().is_empty() {
            return Err(StratumError::EmptyPath);
        }
        let root = clean_path(root_ref);

        let mut roots = self.write_roots();
        let (mut layers, files) = match roots.get(&root) {
            Some(mounted) => (mounted.image.layers()?, mounted.files.clone()),
            None => (Vec::new(), HashMap::new()),
        };
        debug!("Registering layer {} on {}", layer.digest(), root.display());

        let mut files = cache_layers(&root, std::slice::from_ref(&layer), Selection::Everything, files)?;
        add_missing_ancestors(&root, &mut files);
        let dirs = group_directories(&files);

        layers.push(layer);
        let image: Arc<dyn Image> = Arc::new(LayeredImage::new(layers));
        roots.insert(root, MountedRoot { image, files, dirs });
        Ok(())
    }

    /// Read-only handle to the base filesystem
    pub fn base(&self) -> Arc<dyn FileSystem> {
        Arc::clone(&self.base)
    }

    /// Roots mounted so far, in path order
    pub fn roots(&self) -> Vec<PathBuf> {
        self.read_roots().keys().cloned().collect()
    }

    /// Image mounted at `root`
    pub fn image(&self, root: &Path) -> Option<Arc<dyn Image>> {
        self.read_roots()
            .get(&clean_path(root))
            .map(|r| Arc::clone(&r.image))
    }

    fn cached(&self, path: &Path) -> Option<CachedEntry> {
        self.read_roots()
            .values()
            .find_map(|root| root.files.get(path).cloned())
    }

    fn lookup(
        &self,
        op: &str,
        path: &Path,
        base: impl FnOnce(&dyn FileSystem, &Path) -> io::Result<FileInfo>,
    ) -> StratumResult<Entry> {
        let path = clean_path(path);
        match base(self.base.as_ref(), &path) {
            Ok(info) => return Ok(Entry::Base(info)),
            Err(e) => trace!("{} {} missed base filesystem: {}", op, path.display(), e),
        }
        match self.cached(&path) {
            Some(entry) => {
                trace!("{} cached file {}", op, path.display());
                Ok(Entry::Cached(entry))
            }
            None => Err(StratumError::NotFound(path)),
        }
    }

    /// Metadata following symlinks on the base filesystem
    pub fn stat(&self, path: impl AsRef<Path>) -> StratumResult<Entry> {
        self.lookup("Stat", path.as_ref(), |fs, p| fs.stat(p))
    }

    /// Metadata of the path itself
    pub fn lstat(&self, path: impl AsRef<Path>) -> StratumResult<Entry> {
        self.lookup("Lstat", path.as_ref(), |fs, p| fs.lstat(p))
    }

    /// Open a path; cached entries come back as metadata-only handles
    pub fn open(&self, path: impl AsRef<Path>) -> StratumResult<OpenFile<'_>> {
        let path = clean_path(path.as_ref());
        match self.base.open(&path) {
            Ok(reader) => return Ok(OpenFile::Base(reader)),
            Err(e) => trace!("Open {} missed base filesystem: {}", path.display(), e),
        }
        match self.cached(&path) {
            Some(entry) => {
                trace!("Open cached file {}", path.display());
                Ok(OpenFile::Cached(CachedFile::new(entry)))
            }
            None => Err(StratumError::NotFound(path)),
        }
    }

    /// List a directory; cached directories return the children grouped at mount time
    pub fn read_dir(&self, path: impl AsRef<Path>) -> StratumResult<Vec<FileInfo>> {
        let path = clean_path(path.as_ref());
        match self.base.read_dir(&path) {
            Ok(entries) => return Ok(entries),
            Err(e) => trace!("ReadDir {} missed base filesystem: {}", path.display(), e),
        }
        self.read_cached_dir(&path)
    }

    /// List a cached directory, ignoring the base filesystem
    pub fn read_cached_dir(&self, path: impl AsRef<Path>) -> StratumResult<Vec<FileInfo>> {
        let path = clean_path(path.as_ref());
        let roots = self.read_roots();
        match roots.values().find_map(|root| root.dirs.get(&path)) {
            Some(children) => {
                trace!("Reading cached directory {}", path.display());
                Ok(children.clone())
            }
            None => Err(StratumError::NotFound(path)),
        }
    }

    /// Content fingerprint of `path`.
    ///
    /// Real files are hashed from the base filesystem; cached content
    /// entries return the value computed at mount time. Ancestor entries
    /// have no fingerprint and yield `UndefinedFingerprint`.
    pub fn fingerprint(&self, path: impl AsRef<Path>) -> StratumResult<Fingerprint> {
        let path = clean_path(path.as_ref());
        match self.base.lstat(&path) {
            Ok(info) => {
                let context = || format!("hashing {}", path.display());
                if info.is_file() {
                    let mut reader = self
                        .base
                        .open(&path)
                        .map_err(|e| StratumError::io(context(), e))?;
                    fingerprint_entry(&info, &mut reader).map_err(|e| StratumError::io(context(), e))
                } else {
                    fingerprint_entry(&info, &mut io::empty())
                        .map_err(|e| StratumError::io(context(), e))
                }
            }
            Err(_) => match self.cached(&path) {
                Some(entry) => entry.fingerprint().copied(),
                None => Err(StratumError::NotFound(path)),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::fs::MemFs;
    use crate::image::testutil::TarFixture;
    use crate::image::{extract_layers, BytesLayer, ExtractOptions, Layer, LayeredImage};

    fn image(layers: Vec<Vec<u8>>) -> Arc<dyn Image> {
        let layers: Vec<Arc<dyn Layer>> = layers
            .into_iter()
            .map(|b| Arc::new(BytesLayer::new(b)) as Arc<dyn Layer>)
            .collect();
        Arc::new(LayeredImage::new(layers))
    }

    fn foo_image() -> Arc<dyn Image> {
        image(vec![TarFixture::new()
            .dir("foo", 0o755)
            .file("foo/bar.txt", b"bar", 0o644)
            .file("foo/baz.txt", b"baz", 0o644)
            .build()])
    }

    fn names(entries: &[FileInfo]) -> Vec<&str> {
        entries.iter().map(|e| e.name.as_str()).collect()
    }

    #[test]
    fn mount_requires_image() {
        let overlay = Overlay::new(Arc::new(MemFs::new()));
        let err = overlay.mount("/", None, &["foo"]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
    }

    #[test]
    fn mount_rejects_empty_root() {
        let overlay = Overlay::new(Arc::new(MemFs::new()));
        let err = overlay.mount("", Some(foo_image()), &["foo"]).unwrap_err();
        assert!(matches!(err, StratumError::EmptyPath));
    }

    #[test]
    fn cached_file_visible_uncached_sibling_not() {
        let overlay = Overlay::new(Arc::new(MemFs::new()));
        overlay
            .mount("/", Some(foo_image()), &["foo/bar.txt"])
            .unwrap();

        let bar = overlay.stat("foo/bar.txt").unwrap();
        assert!(bar.is_cached());
        assert!(bar.as_content().is_some());
        assert_eq!(bar.info().size, 3);

        let err = overlay.stat("foo/baz.txt").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotExist);

        let listing = overlay.read_dir("foo").unwrap();
        assert_eq!(names(&listing), vec!["bar.txt"]);
    }

    #[test]
    fn ancestors_are_metadata_only() {
        let overlay = Overlay::new(Arc::new(MemFs::new()));
        overlay
            .mount("/", Some(foo_image()), &["foo/bar.txt"])
            .unwrap();

        match overlay.stat("/foo").unwrap() {
            Entry::Cached(CachedEntry::Ancestor(dir)) => assert!(dir.info().is_dir()),
            other => panic!("expected ancestor entry, got {:?}", other),
        }
        let err = overlay.fingerprint("/foo").unwrap_err();
        assert!(matches!(err, StratumError::UndefinedFingerprint(_)));
        assert!(overlay.fingerprint("/foo/bar.txt").is_ok());
    }

    #[test]
    fn mounting_same_root_twice_fails() {
        let overlay = Overlay::new(Arc::new(MemFs::new()));
        overlay.mount("/", Some(foo_image()), &["foo"]).unwrap();
        let err = overlay.mount("/", Some(foo_image()), &["foo"]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AlreadyExists);
    }

    #[test]
    fn distinct_roots_stay_independent() {
        let overlay = Overlay::new(Arc::new(MemFs::new()));
        let a = image(vec![TarFixture::new().file("only-a", b"a", 0o644).build()]);
        let b = image(vec![TarFixture::new().file("only-b", b"b", 0o644).build()]);
        overlay.mount("/stages/a", Some(a), &["only-a"]).unwrap();
        overlay.mount("/stages/b", Some(b), &["only-b"]).unwrap();

        assert!(overlay.stat("/stages/a/only-a").is_ok());
        assert!(overlay.stat("/stages/b/only-a").is_err());
        assert!(overlay.stat("/stages/b/only-b").is_ok());
        assert_eq!(
            overlay.roots(),
            vec![PathBuf::from("/stages/a"), PathBuf::from("/stages/b")]
        );
    }

    #[test]
    fn base_filesystem_shadows_cache() {
        let base = Arc::new(MemFs::new());
        base.mkdir(Path::new("/foo"), 0o700).unwrap();
        base.write_file(Path::new("/foo/bar.txt"), b"real content", 0o600)
            .unwrap();

        let overlay = Overlay::new(base);
        overlay
            .mount("/", Some(foo_image()), &["foo/bar.txt"])
            .unwrap();

        let entry = overlay.stat("/foo/bar.txt").unwrap();
        assert!(!entry.is_cached());
        assert_eq!(entry.info().size, 12);

        let mut reader = overlay.open("/foo/bar.txt").unwrap().into_reader().unwrap();
        let mut content = String::new();
        reader.read_to_string(&mut content).unwrap();
        assert_eq!(content, "real content");
    }

    #[test]
    fn reading_cached_content_is_unsupported() {
        let overlay = Overlay::new(Arc::new(MemFs::new()));
        overlay
            .mount("/", Some(foo_image()), &["foo/bar.txt"])
            .unwrap();

        let mut file = overlay.open("/foo/bar.txt").unwrap();
        assert!(file.is_cached());
        if let OpenFile::Cached(cached) = &mut file {
            let mut buf = [0u8; 4];
            let err = cached.read(&mut buf).unwrap_err();
            assert_eq!(err.kind(), io::ErrorKind::Unsupported);
        }
        match file.into_reader() {
            Err(err) => assert_eq!(err.kind(), ErrorKind::Unsupported),
            Ok(_) => panic!("cached file handed out a reader"),
        };
    }

    #[test]
    fn cached_directory_caches_descendants() {
        let img = image(vec![TarFixture::new()
            .dir("app", 0o755)
            .dir("app/lib", 0o755)
            .file("app/lib/a.so", b"a", 0o755)
            .file("app/main", b"m", 0o755)
            .file("other", b"o", 0o644)
            .build()]);
        let overlay = Overlay::new(Arc::new(MemFs::new()));
        overlay.mount("/", Some(img), &["app"]).unwrap();

        assert!(overlay.stat("/app/lib/a.so").unwrap().as_content().is_some());
        assert!(overlay.stat("/app/main").unwrap().as_content().is_some());
        assert!(overlay.stat("/other").is_err());
        assert_eq!(names(&overlay.read_dir("/app").unwrap()), vec!["lib", "main"]);
    }

    #[test]
    fn read_dir_is_independent_of_archive_order() {
        let forward = image(vec![TarFixture::new()
            .dir("d", 0o755)
            .file("d/a", b"", 0o644)
            .file("d/b", b"", 0o644)
            .file("d/c", b"", 0o644)
            .build()]);
        let backward = image(vec![TarFixture::new()
            .dir("d", 0o755)
            .file("d/c", b"", 0o644)
            .file("d/b", b"", 0o644)
            .file("d/a", b"", 0o644)
            .build()]);

        let one = Overlay::new(Arc::new(MemFs::new()));
        one.mount("/", Some(forward), &["d"]).unwrap();
        let two = Overlay::new(Arc::new(MemFs::new()));
        two.mount("/", Some(backward), &["d"]).unwrap();

        assert_eq!(one.read_dir("/d").unwrap(), two.read_dir("/d").unwrap());
        assert_eq!(names(&one.read_dir("/d").unwrap()), vec!["a", "b", "c"]);
    }

    #[test]
    fn later_layers_override_and_whiteout() {
        let img = image(vec![
            TarFixture::new()
                .file("etc/conf", b"v1", 0o644)
                .file("etc/old", b"x", 0o644)
                .build(),
            TarFixture::new()
                .file("etc/conf", b"v2", 0o644)
                .whiteout("etc/old")
                .build(),
        ]);
        let overlay = Overlay::new(Arc::new(MemFs::new()));
        overlay.mount("/", Some(img), &["etc/*"]).unwrap();

        assert_eq!(overlay.stat("/etc/conf").unwrap().info().size, 2);
        assert!(overlay.stat("/etc/old").is_err());
        // etc was never listed in the tar but still resolves
        assert!(overlay.stat("/etc").unwrap().info().is_dir());
        assert_eq!(names(&overlay.read_dir("/etc").unwrap()), vec!["conf"]);
    }

    #[test]
    fn fingerprint_matches_extracted_file() {
        let tar = TarFixture::new()
            .dir("foo", 0o755)
            .file_owned("foo/bar.txt", b"payload", 0o640, 1000, 1000)
            .symlink("foo/link", "bar.txt")
            .build();

        let cached = Overlay::new(Arc::new(MemFs::new()));
        cached
            .mount("/", Some(image(vec![tar.clone()])), &["foo/*"])
            .unwrap();

        let disk = Arc::new(MemFs::new());
        let layer: Arc<dyn Layer> = Arc::new(BytesLayer::new(tar));
        extract_layers(disk.as_ref(), Path::new("/"), &[layer], ExtractOptions::default())
            .unwrap();
        let real = Overlay::new(disk);

        for path in ["/foo/bar.txt", "/foo/link"] {
            assert!(cached.stat(path).unwrap().is_cached());
            assert!(!real.stat(path).unwrap().is_cached());
            assert_eq!(
                cached.fingerprint(path).unwrap(),
                real.fingerprint(path).unwrap(),
                "fingerprint mismatch for {}",
                path
            );
        }
    }

    fn extracted(tar: Vec<u8>) -> Overlay {
        let disk = Arc::new(MemFs::new());
        let layer: Arc<dyn Layer> = Arc::new(BytesLayer::new(tar));
        extract_layers(disk.as_ref(), Path::new("/"), &[layer], ExtractOptions::default())
            .unwrap();
        Overlay::new(disk)
    }

    #[test]
    fn hard_link_fingerprint_matches_extracted_file() {
        let tar = TarFixture::new()
            .dir("d", 0o755)
            .file_owned("d/a", b"payload", 0o640, 1000, 1000)
            .hard_link("d/b", "d/a")
            .build();

        let cached = Overlay::new(Arc::new(MemFs::new()));
        cached
            .mount("/", Some(image(vec![tar.clone()])), &["d"])
            .unwrap();
        let real = extracted(tar);

        let link = cached.stat("/d/b").unwrap();
        assert!(link.is_cached());
        assert_eq!(link.info().name, "b");
        assert_eq!(link.info().size, 7);
        assert_eq!(link.info().uid, 1000);
        assert_eq!(
            cached.fingerprint("/d/b").unwrap(),
            real.fingerprint("/d/b").unwrap()
        );
        assert_eq!(
            cached.fingerprint("/d/b").unwrap(),
            cached.fingerprint("/d/a").unwrap()
        );
    }

    #[test]
    fn hard_link_to_uncached_target() {
        let tar = TarFixture::new()
            .file("lib/real.so", b"\x7fELF", 0o755)
            .file("lib/other.so", b"other", 0o755)
            .hard_link("bin/tool", "lib/real.so")
            .build();

        let cached = Overlay::new(Arc::new(MemFs::new()));
        cached
            .mount("/", Some(image(vec![tar.clone()])), &["bin/tool"])
            .unwrap();
        let real = extracted(tar);

        assert!(cached.stat("/lib/real.so").is_err());
        assert_eq!(cached.stat("/bin/tool").unwrap().info().size, 4);
        assert_eq!(
            cached.fingerprint("/bin/tool").unwrap(),
            real.fingerprint("/bin/tool").unwrap()
        );
    }

    #[test]
    fn registered_layer_behaves_like_extraction() {
        let step = TarFixture::new()
            .dir("out", 0o755)
            .file_owned("out/gen", b"generated", 0o600, 10, 20)
            .build();

        let overlay = Overlay::new(Arc::new(MemFs::new()));
        let layer: Arc<dyn Layer> = Arc::new(BytesLayer::new(step.clone()));
        overlay.register_layer("/", layer).unwrap();
        let real = extracted(step);

        assert!(overlay.stat("/out/gen").unwrap().as_content().is_some());
        assert_eq!(names(&overlay.read_dir("/out").unwrap()), vec!["gen"]);
        for path in ["/out", "/out/gen"] {
            assert_eq!(
                overlay.fingerprint(path).unwrap(),
                real.fingerprint(path).unwrap(),
                "fingerprint mismatch for {}",
                path
            );
        }
    }

    #[test]
    fn registered_layer_extends_mounted_root() {
        let overlay = Overlay::new(Arc::new(MemFs::new()));
        overlay
            .mount("/", Some(foo_image()), &["foo/*"])
            .unwrap();

        let step = TarFixture::new()
            .whiteout("foo/bar.txt")
            .file("foo/new.txt", b"new", 0o644)
            .build();
        overlay
            .register_layer("/", Arc::new(BytesLayer::new(step)))
            .unwrap();

        assert!(overlay.stat("/foo/bar.txt").is_err());
        assert_eq!(
            names(&overlay.read_dir("/foo").unwrap()),
            vec!["baz.txt", "new.txt"]
        );
        assert_eq!(overlay.image(Path::new("/")).unwrap().layers().unwrap().len(), 2);
    }

    #[test]
    fn register_layer_rejects_empty_root() {
        let overlay = Overlay::new(Arc::new(MemFs::new()));
        let layer: Arc<dyn Layer> = Arc::new(BytesLayer::new(TarFixture::new().build()));
        let err = overlay.register_layer("", layer).unwrap_err();
        assert!(matches!(err, StratumError::EmptyPath));
    }

    #[test]
    fn lookups_miss_everywhere() {
        let overlay = Overlay::new(Arc::new(MemFs::new()));
        assert_eq!(overlay.stat("/nope").unwrap_err().kind(), ErrorKind::NotExist);
        assert_eq!(overlay.read_dir("/nope").unwrap_err().kind(), ErrorKind::NotExist);
        assert_eq!(overlay.open("/nope").unwrap_err().kind(), ErrorKind::NotExist);
        assert_eq!(
            overlay.fingerprint("/nope").unwrap_err().kind(),
            ErrorKind::NotExist
        );
    }

    #[test]
    fn overlay_is_shareable_across_threads() {
        let overlay = Arc::new(Overlay::new(Arc::new(MemFs::new())));
        overlay
            .mount("/", Some(foo_image()), &["foo/bar.txt"])
            .unwrap();

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let overlay = Arc::clone(&overlay);
                std::thread::spawn(move || overlay.fingerprint("/foo/bar.txt").unwrap())
            })
            .collect();
        let results: Vec<Fingerprint> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(results.windows(2).all(|w| w[0] == w[1]));
    }
}
