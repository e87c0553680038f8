//! Image source abstraction
//!
//! An image is an ordered list of layers, bottom to top. Each layer is a
//! tar stream (optionally gzip-compressed) of additions, modifications and
//! whiteout markers.

pub mod extract;
pub mod walk;

pub use extract::{extract_layers, ExtractOptions};
pub use walk::{walk_layers, EntryHeader, LayerVisitor, Whiteout};

use crate::error::{StratumError, StratumResult};
use flate2::read::GzDecoder;
use sha2::{Digest, Sha256};
use std::fmt;
use std::fs::File;
use std::io::{self, BufRead, BufReader, Cursor, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// One layer of an image
pub trait Layer: Send + Sync {
    /// Stable identifier of the layer content (`sha256:<hex>`)
    fn digest(&self) -> String;

    /// Decompressed tar stream of the layer
    fn uncompressed(&self) -> StratumResult<Box<dyn Read + Send + '_>>;
}

/// An image: layers in bottom-to-top order
pub trait Image: Send + Sync {
    fn layers(&self) -> StratumResult<Vec<Arc<dyn Layer>>>;
}

/// Wrap a buffered reader in a gzip decoder when it starts with the gzip magic
fn maybe_decompress<'a, R: BufRead + Send + 'a>(mut reader: R) -> io::Result<Box<dyn Read + Send + 'a>> {
    let is_gzip = reader.fill_buf()?.starts_with(&GZIP_MAGIC);
    if is_gzip {
        Ok(Box::new(GzDecoder::new(reader)))
    } else {
        Ok(Box::new(reader))
    }
}

fn sha256_digest(reader: &mut dyn Read) -> io::Result<String> {
    let mut hasher = Sha256::new();
    io::copy(reader, &mut hasher)?;
    Ok(format!("sha256:{}", hex::encode(hasher.finalize())))
}

/// A layer stored as a tarball on disk
#[derive(Debug, Clone)]
pub struct TarballLayer {
    path: PathBuf,
    digest: String,
}

impl TarballLayer {
    /// Open a tarball and compute its digest
    pub fn open(path: impl Into<PathBuf>) -> StratumResult<Self> {
        let path = path.into();
        let mut file = File::open(&path)
            .map_err(|e| StratumError::io(format!("opening layer {}", path.display()), e))?;
        let digest = sha256_digest(&mut file)
            .map_err(|e| StratumError::io(format!("hashing layer {}", path.display()), e))?;
        Ok(Self { path, digest })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Layer for TarballLayer {
    fn digest(&self) -> String {
        self.digest.clone()
    }

    fn uncompressed(&self) -> StratumResult<Box<dyn Read + Send + '_>> {
        let file = File::open(&self.path).map_err(|e| StratumError::layer(&self.digest, e))?;
        maybe_decompress(BufReader::new(file)).map_err(|e| StratumError::layer(&self.digest, e))
    }
}

/// A layer held in memory
#[derive(Clone)]
pub struct BytesLayer {
    bytes: Arc<[u8]>,
    digest: String,
}

impl BytesLayer {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        let bytes: Vec<u8> = bytes.into();
        let digest = sha256_digest(&mut bytes.as_slice()).unwrap_or_default();
        Self {
            bytes: bytes.into(),
            digest,
        }
    }
}

impl fmt::Debug for BytesLayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BytesLayer")
            .field("digest", &self.digest)
            .field("len", &self.bytes.len())
            .finish()
    }
}

impl Layer for BytesLayer {
    fn digest(&self) -> String {
        self.digest.clone()
    }

    fn uncompressed(&self) -> StratumResult<Box<dyn Read + Send + '_>> {
        maybe_decompress(Cursor::new(&self.bytes[..]))
            .map_err(|e| StratumError::layer(&self.digest, e))
    }
}

/// An image assembled from an explicit list of layers
#[derive(Clone, Default)]
pub struct LayeredImage {
    layers: Vec<Arc<dyn Layer>>,
}

impl LayeredImage {
    pub fn new(layers: Vec<Arc<dyn Layer>>) -> Self {
        Self { layers }
    }

    /// Image with a single layer, the shape of every cache entry
    pub fn single(layer: Arc<dyn Layer>) -> Self {
        Self {
            layers: vec![layer],
        }
    }

    /// Build an image from tarball paths, bottom layer first
    pub fn from_tarballs<P: AsRef<Path>>(paths: &[P]) -> StratumResult<Self> {
        let mut layers: Vec<Arc<dyn Layer>> = Vec::with_capacity(paths.len());
        for path in paths {
            layers.push(Arc::new(TarballLayer::open(path.as_ref())?));
        }
        Ok(Self { layers })
    }
}

impl fmt::Debug for LayeredImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let digests: Vec<String> = self.layers.iter().map(|l| l.digest()).collect();
        f.debug_struct("LayeredImage")
            .field("layers", &digests)
            .finish()
    }
}

impl Image for LayeredImage {
    fn layers(&self) -> StratumResult<Vec<Arc<dyn Layer>>> {
        Ok(self.layers.clone())
    }
}

#[cfg(test)]
pub(crate) mod testutil {
    //! Tar fixtures for tests

    use std::path::Path;

    /// Builder for in-memory layer tarballs
    pub struct TarFixture {
        builder: tar::Builder<Vec<u8>>,
    }

    impl TarFixture {
        pub fn new() -> Self {
            Self {
                builder: tar::Builder::new(Vec::new()),
            }
        }

        fn header(kind: tar::EntryType, mode: u32, uid: u64, gid: u64, size: u64) -> tar::Header {
            let mut header = tar::Header::new_gnu();
            header.set_entry_type(kind);
            header.set_mode(mode);
            header.set_uid(uid);
            header.set_gid(gid);
            header.set_size(size);
            header.set_mtime(1_600_000_000);
            header
        }

        pub fn dir(mut self, path: &str, mode: u32) -> Self {
            let mut header = Self::header(tar::EntryType::Directory, mode, 0, 0, 0);
            self.builder
                .append_data(&mut header, Path::new(path), std::io::empty())
                .unwrap();
            self
        }

        pub fn file(self, path: &str, content: &[u8], mode: u32) -> Self {
            self.file_owned(path, content, mode, 0, 0)
        }

        pub fn file_owned(mut self, path: &str, content: &[u8], mode: u32, uid: u64, gid: u64) -> Self {
            let mut header =
                Self::header(tar::EntryType::Regular, mode, uid, gid, content.len() as u64);
            self.builder
                .append_data(&mut header, Path::new(path), content)
                .unwrap();
            self
        }

        pub fn symlink(mut self, path: &str, target: &str) -> Self {
            let mut header = Self::header(tar::EntryType::Symlink, 0o777, 0, 0, 0);
            self.builder
                .append_link(&mut header, Path::new(path), Path::new(target))
                .unwrap();
            self
        }

        pub fn hard_link(mut self, path: &str, target: &str) -> Self {
            let mut header = Self::header(tar::EntryType::Link, 0o644, 0, 0, 0);
            self.builder
                .append_link(&mut header, Path::new(path), Path::new(target))
                .unwrap();
            self
        }

        /// Whiteout marker for `path` (`dir/.wh.name`)
        pub fn whiteout(self, path: &str) -> Self {
            let p = Path::new(path);
            let name = p.file_name().unwrap().to_string_lossy();
            let marker = match p.parent() {
                Some(parent) if !parent.as_os_str().is_empty() => {
                    format!("{}/.wh.{}", parent.display(), name)
                }
                _ => format!(".wh.{}", name),
            };
            self.file(&marker, b"", 0o644)
        }

        /// Opaque whiteout marker inside `dir`
        pub fn opaque(self, dir: &str) -> Self {
            self.file(&format!("{}/.wh..wh..opq", dir.trim_end_matches('/')), b"", 0o644)
        }

        pub fn build(self) -> Vec<u8> {
            self.builder.into_inner().unwrap()
        }
    }
}
