//! Streaming walk over layer tarballs
//!
//! Each entry of each layer is visited exactly once, in archive order,
//! bottom layer first. Whiteout markers are decoded and delivered
//! separately so visitors never see `.wh.` names.

use super::Layer;
use crate::error::{StratumError, StratumResult};
use crate::fs::{unix_time, FileInfo, FileKind, Timestamps, MODE_MASK};
use chrono::{DateTime, Utc};
use std::io::Read;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, trace};

/// Prefix of whiteout marker names
pub const WHITEOUT_PREFIX: &str = ".wh.";

/// Marker hiding every lower-layer entry of its directory
pub const OPAQUE_WHITEOUT: &str = ".wh..wh..opq";

/// A decoded tar entry header
#[derive(Debug, Clone)]
pub struct EntryHeader {
    /// Path relative to the image root; empty for the root itself
    pub path: PathBuf,
    /// Metadata as the entry would appear on disk
    pub info: FileInfo,
    /// Target of a hard link entry, relative to the image root
    pub hard_link: Option<PathBuf>,
}

/// A deletion marker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Whiteout {
    /// Path relative to the image root that is deleted (or emptied)
    pub path: PathBuf,
    /// Opaque whiteouts empty the directory instead of deleting it
    pub opaque: bool,
}

/// Receives layer entries during a walk
pub trait LayerVisitor {
    /// Called for every non-whiteout entry; `content` yields the entry's bytes
    fn entry(&mut self, header: &EntryHeader, content: &mut dyn Read) -> StratumResult<()>;

    /// Called for every whiteout marker
    fn whiteout(&mut self, whiteout: &Whiteout) -> StratumResult<()>;
}

/// Normalise an archive name to a root-relative path.
///
/// Leading `/` and `./` are dropped, `.` components are skipped and `..`
/// is resolved lexically; a name that climbs above the root is rejected.
pub fn clean_entry_name(name: &Path) -> StratumResult<PathBuf> {
    let mut out = PathBuf::new();
    for component in name.components() {
        match component {
            Component::Normal(part) => out.push(part),
            Component::ParentDir => {
                if !out.pop() {
                    return Err(StratumError::PathInvalid {
                        path: name.to_path_buf(),
                        reason: "entry escapes the image root".to_string(),
                    });
                }
            }
            Component::RootDir | Component::CurDir | Component::Prefix(_) => {}
        }
    }
    Ok(out)
}

/// Decode a whiteout marker name, if `path` is one
fn as_whiteout(path: &Path) -> Option<Whiteout> {
    let name = path.file_name()?.to_str()?;
    let parent = path.parent().unwrap_or(Path::new(""));
    if name == OPAQUE_WHITEOUT {
        return Some(Whiteout {
            path: parent.to_path_buf(),
            opaque: true,
        });
    }
    name.strip_prefix(WHITEOUT_PREFIX).map(|target| Whiteout {
        path: parent.join(target),
        opaque: false,
    })
}

/// Parse a PAX time value such as `1600000000.123456789`
fn parse_pax_time(value: &str) -> Option<DateTime<Utc>> {
    let (secs, frac) = match value.split_once('.') {
        Some((s, f)) => (s, f),
        None => (value, ""),
    };
    let secs: i64 = secs.parse().ok()?;
    let mut nanos: u32 = 0;
    if !frac.is_empty() {
        let digits: String = frac.chars().take(9).collect();
        let scale = 10u32.pow(9 - digits.len() as u32);
        nanos = digits.parse::<u32>().ok()? * scale;
    }
    Some(unix_time(secs, nanos))
}

fn entry_kind(entry_type: tar::EntryType) -> Option<FileKind> {
    use tar::EntryType;
    match entry_type {
        EntryType::Regular | EntryType::Continuous | EntryType::GNUSparse | EntryType::Link => {
            Some(FileKind::File)
        }
        EntryType::Directory => Some(FileKind::Dir),
        EntryType::Symlink => Some(FileKind::Symlink),
        EntryType::Char => Some(FileKind::CharDevice),
        EntryType::Block => Some(FileKind::BlockDevice),
        EntryType::Fifo => Some(FileKind::Fifo),
        _ => None,
    }
}

fn decode_header<R: Read>(
    entry: &mut tar::Entry<'_, R>,
    digest: &str,
    path: PathBuf,
    kind: FileKind,
) -> StratumResult<EntryHeader> {
    let header = entry.header();
    let mode = header.mode().map_err(|e| StratumError::layer(digest, e))? & MODE_MASK;
    let uid = header.uid().map_err(|e| StratumError::layer(digest, e))? as u32;
    let gid = header.gid().map_err(|e| StratumError::layer(digest, e))? as u32;
    let mtime = header.mtime().map_err(|e| StratumError::layer(digest, e))?;
    let size = header.size().map_err(|e| StratumError::layer(digest, e))?;

    let modified = unix_time(mtime as i64, 0);
    let mut times = Timestamps::uniform(modified);
    if let Some(gnu) = header.as_gnu() {
        if let Ok(atime) = gnu.atime() {
            if atime != 0 {
                times.accessed = unix_time(atime as i64, 0);
            }
        }
        if let Ok(ctime) = gnu.ctime() {
            if ctime != 0 {
                times.changed = unix_time(ctime as i64, 0);
            }
        }
    }

    let is_hard_link = header.entry_type() == tar::EntryType::Link;
    let link_name = entry
        .link_name()
        .map_err(|e| StratumError::layer(digest, e))?
        .map(|l| l.into_owned());

    if let Ok(Some(extensions)) = entry.pax_extensions() {
        for ext in extensions.flatten() {
            let (Ok(key), Ok(value)) = (ext.key(), ext.value()) else {
                continue;
            };
            let Some(at) = parse_pax_time(value) else {
                continue;
            };
            match key {
                "atime" => times.accessed = at,
                "ctime" => times.changed = at,
                "mtime" => times.modified = at,
                _ => {}
            }
        }
    }

    let (link_target, hard_link) = match (kind, link_name) {
        (FileKind::Symlink, target) => (target, None),
        (_, Some(target)) if is_hard_link => (None, Some(clean_entry_name(&target)?)),
        _ => (None, None),
    };

    let size = match kind {
        FileKind::File if hard_link.is_none() => size,
        FileKind::Symlink => link_target
            .as_ref()
            .map(|t| t.as_os_str().len() as u64)
            .unwrap_or(0),
        _ => 0,
    };

    Ok(EntryHeader {
        info: FileInfo {
            name: crate::fs::base_name(&Path::new("/").join(&path)),
            kind,
            mode,
            uid,
            gid,
            size,
            times,
            link_target,
        },
        path,
        hard_link,
    })
}

/// Walk every entry of `layers` in order, handing each to `visitor`
pub fn walk_layers(layers: &[Arc<dyn Layer>], visitor: &mut dyn LayerVisitor) -> StratumResult<()> {
    for layer in layers {
        let digest = layer.digest();
        debug!("Walking layer {}", digest);

        let reader = layer.uncompressed()?;
        let mut archive = tar::Archive::new(reader);
        let entries = archive
            .entries()
            .map_err(|e| StratumError::layer(&digest, e))?;

        let mut count = 0usize;
        for entry in entries {
            let mut entry = entry.map_err(|e| StratumError::layer(&digest, e))?;
            let raw_path = entry
                .path()
                .map_err(|e| StratumError::layer(&digest, e))?
                .into_owned();
            let path = clean_entry_name(&raw_path)?;

            if let Some(whiteout) = as_whiteout(&path) {
                trace!("Whiteout {} (opaque: {})", whiteout.path.display(), whiteout.opaque);
                visitor.whiteout(&whiteout)?;
                count += 1;
                continue;
            }

            let Some(kind) = entry_kind(entry.header().entry_type()) else {
                trace!("Skipping unsupported tar entry {}", raw_path.display());
                continue;
            };

            let header = decode_header(&mut entry, &digest, path, kind)?;
            visitor.entry(&header, &mut entry)?;
            count += 1;
        }

        debug!("Walked {} entries in layer {}", count, digest);
    }
    Ok(())
}
