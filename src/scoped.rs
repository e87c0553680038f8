//! Build-time scaffold files with guaranteed cleanup
//!
//! [`ScopedFiles`] records every file and directory it creates so they can
//! be removed again, newest first, once the owning command finishes.
//! Directories that existed beforehand are never recorded and therefore
//! never removed.

use crate::error::{StratumError, StratumResult};
use crate::fs::{clean_path, is_not_empty, is_not_found, FileSystem};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// Ledger of files and directories created for one command
pub struct ScopedFiles {
    fs: Arc<dyn FileSystem>,
    files: Vec<PathBuf>,
    dirs: Vec<PathBuf>,
}

impl ScopedFiles {
    pub fn new(fs: Arc<dyn FileSystem>) -> Self {
        Self {
            fs,
            files: Vec::new(),
            dirs: Vec::new(),
        }
    }

    /// Files created so far, in creation order
    pub fn files(&self) -> &[PathBuf] {
        &self.files
    }

    /// Directories created so far, in creation order
    pub fn dirs(&self) -> &[PathBuf] {
        &self.dirs
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty() && self.dirs.is_empty()
    }

    /// Write `content` to `path`, creating missing ancestors with `dir_mode`.
    ///
    /// Anything created before a failure stays in the ledger so [`clean`]
    /// still removes it.
    ///
    /// [`clean`]: ScopedFiles::clean
    pub fn create_with_parents(
        &mut self,
        path: impl AsRef<Path>,
        content: &[u8],
        dir_mode: u32,
        file_mode: u32,
    ) -> StratumResult<()> {
        let path = path.as_ref();
        if path.as_os_str().is_empty() {
            return Err(StratumError::EmptyPath);
        }
        let path = clean_path(path);

        if let Some(parent) = path.parent() {
            let mut ancestors: Vec<&Path> = parent.ancestors().collect();
            ancestors.reverse();
            for dir in ancestors {
                match self.fs.stat(dir) {
                    Ok(_) => {}
                    Err(e) if is_not_found(&e) => {
                        self.fs
                            .mkdir(dir, dir_mode)
                            .map_err(|e| StratumError::io(format!("creating {}", dir.display()), e))?;
                        // mkdir is subject to the umask
                        self.fs
                            .set_mode(dir, dir_mode)
                            .map_err(|e| StratumError::io(format!("chmod {}", dir.display()), e))?;
                        trace!("Created scaffold directory {}", dir.display());
                        self.dirs.push(dir.to_path_buf());
                    }
                    Err(e) => {
                        return Err(StratumError::io(format!("checking {}", dir.display()), e));
                    }
                }
            }
        }

        let context = || format!("writing {}", path.display());
        self.fs
            .write_file(&path, content, file_mode)
            .map_err(|e| StratumError::io(context(), e))?;
        self.files.push(path.clone());
        self.fs
            .set_mode(&path, file_mode)
            .map_err(|e| StratumError::io(context(), e))?;
        trace!("Created scaffold file {}", path.display());
        Ok(())
    }

    /// Remove ledgered files, then ledgered directories, newest first.
    ///
    /// A directory that is no longer empty is left in place. Any other
    /// failure stops the cleanup and is returned; entries not yet removed
    /// stay in the ledger.
    pub fn clean(&mut self) -> StratumResult<()> {
        debug!(
            "Cleaning {} scaffold files and {} directories",
            self.files.len(),
            self.dirs.len()
        );

        while let Some(file) = self.files.last() {
            self.fs
                .remove(file)
                .map_err(|e| StratumError::io(format!("removing {}", file.display()), e))?;
            self.files.pop();
        }

        while let Some(dir) = self.dirs.last() {
            match self.fs.remove(dir) {
                Ok(()) => {}
                Err(e) if is_not_empty(&e) => {
                    debug!("Keeping non-empty directory {}", dir.display());
                }
                Err(e) => return Err(StratumError::io(format!("removing {}", dir.display()), e)),
            }
            self.dirs.pop();
        }
        Ok(())
    }
}

/// Cleans a [`ScopedFiles`] ledger when dropped.
///
/// [`finish`](CleanupGuard::finish) cleans explicitly and returns the
/// error. A guard dropped without it, because the command panicked or its
/// future was cancelled, still cleans and logs any failure.
pub struct CleanupGuard {
    ledger: ScopedFiles,
    finished: bool,
}

impl CleanupGuard {
    pub fn new(ledger: ScopedFiles) -> Self {
        Self {
            ledger,
            finished: false,
        }
    }

    pub fn ledger(&mut self) -> &mut ScopedFiles {
        &mut self.ledger
    }

    /// Clean now and report the outcome
    pub fn finish(mut self) -> StratumResult<()> {
        self.finished = true;
        self.ledger.clean()
    }
}

impl Drop for CleanupGuard {
    fn drop(&mut self) {
        if self.finished || self.ledger.is_empty() {
            return;
        }
        if let Err(e) = self.ledger.clean() {
            warn!("Failed to remove scaffold files: {}", e);
        }
    }
}

impl std::fmt::Debug for ScopedFiles {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScopedFiles")
            .field("files", &self.files)
            .field("dirs", &self.dirs)
            .finish()
    }
}
