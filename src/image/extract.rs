//! Materialize layers onto a filesystem

use super::walk::{walk_layers, EntryHeader, LayerVisitor, Whiteout};
use super::Layer;
use crate::error::{StratumError, StratumResult};
use crate::fs::{is_not_found, FileKind, FileSystem};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

/// Mode for parent directories implied by an entry but absent from the tar
const IMPLIED_DIR_MODE: u32 = 0o755;

/// Extraction settings
#[derive(Debug, Clone, Copy)]
pub struct ExtractOptions {
    /// Apply tar uid/gid to extracted entries
    pub preserve_ownership: bool,
    /// Report whiteout targets in the returned file list
    pub include_whiteouts: bool,
}

impl Default for ExtractOptions {
    fn default() -> Self {
        Self {
            preserve_ownership: true,
            include_whiteouts: true,
        }
    }
}

struct Extractor<'a> {
    fs: &'a dyn FileSystem,
    root: &'a Path,
    options: ExtractOptions,
    touched: Vec<PathBuf>,
}

impl Extractor<'_> {
    fn dest(&self, rel: &Path) -> PathBuf {
        if rel.as_os_str().is_empty() {
            self.root.to_path_buf()
        } else {
            self.root.join(rel)
        }
    }

    fn ensure_parent(&self, dest: &Path) -> io::Result<()> {
        match dest.parent() {
            Some(parent) => self.fs.mkdir_all(parent, IMPLIED_DIR_MODE),
            None => Ok(()),
        }
    }

    /// Remove whatever sits at `dest` unless it is a directory and `keep_dir`
    fn clear(&self, dest: &Path, keep_dir: bool) -> io::Result<()> {
        match self.fs.lstat(dest) {
            Ok(info) if info.is_dir() && keep_dir => Ok(()),
            Ok(_) => self.fs.remove_all(dest),
            Err(e) if is_not_found(&e) => Ok(()),
            Err(e) => Err(e),
        }
    }

    fn write_entry(
        &self,
        header: &EntryHeader,
        dest: &Path,
        content: &mut dyn Read,
    ) -> io::Result<bool> {
        let info = &header.info;
        match info.kind {
            FileKind::Dir => {
                self.clear(dest, true)?;
                self.fs.mkdir_all(dest, info.mode)?;
            }
            FileKind::File => {
                self.ensure_parent(dest)?;
                self.clear(dest, false)?;
                if let Some(link) = &header.hard_link {
                    let original = self.dest(link);
                    self.fs.hard_link(&original, dest)?;
                    return Ok(true);
                }
                let mut file = self.fs.create(dest, info.mode)?;
                io::copy(content, &mut file)?;
                file.flush()?;
            }
            FileKind::Symlink => {
                self.ensure_parent(dest)?;
                self.clear(dest, false)?;
                let target = info.link_target.clone().unwrap_or_default();
                self.fs.symlink(&target, dest)?;
            }
            FileKind::CharDevice | FileKind::BlockDevice | FileKind::Fifo | FileKind::Socket => {
                warn!("Skipping special file {} ({})", dest.display(), info.kind);
                return Ok(false);
            }
        }

        if self.options.preserve_ownership {
            self.fs.set_owner(dest, info.uid, info.gid)?;
        }
        if info.kind != FileKind::Symlink {
            self.fs.set_mode(dest, info.mode)?;
            self.fs.set_modified(dest, info.times.modified)?;
        }
        Ok(true)
    }
}

impl LayerVisitor for Extractor<'_> {
    fn entry(&mut self, header: &EntryHeader, content: &mut dyn Read) -> StratumResult<()> {
        let dest = self.dest(&header.path);
        let written = self
            .write_entry(header, &dest, content)
            .map_err(|e| StratumError::io(format!("extracting {}", dest.display()), e))?;
        if written {
            self.touched.push(dest);
        }
        Ok(())
    }

    fn whiteout(&mut self, whiteout: &Whiteout) -> StratumResult<()> {
        let target = self.dest(&whiteout.path);
        let result = if whiteout.opaque {
            match self.fs.read_dir(&target) {
                Ok(children) => children
                    .iter()
                    .try_for_each(|child| self.fs.remove_all(&target.join(&child.name))),
                Err(e) if is_not_found(&e) => Ok(()),
                Err(e) => Err(e),
            }
        } else {
            self.fs.remove_all(&target)
        };
        result.map_err(|e| StratumError::io(format!("applying whiteout {}", target.display()), e))?;

        if self.options.include_whiteouts {
            self.touched.push(target);
        }
        Ok(())
    }
}

/// Extract `layers` onto `root` and return every path written or removed,
/// in archive order.
pub fn extract_layers(
    fs: &dyn FileSystem,
    root: &Path,
    layers: &[Arc<dyn Layer>],
    options: ExtractOptions,
) -> StratumResult<Vec<PathBuf>> {
    let mut extractor = Extractor {
        fs,
        root,
        options,
        touched: Vec::new(),
    };
    walk_layers(layers, &mut extractor)?;
    debug!(
        "Extracted {} paths from {} layer(s) into {}",
        extractor.touched.len(),
        layers.len(),
        root.display()
    );
    Ok(extractor.touched)
}
