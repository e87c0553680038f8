//! Content fingerprints for cache keys
//!
//! A fingerprint covers a file's mode string, owner, group and either its
//! bytes (regular files) or its link target (symlinks). The same function
//! hashes cached tar entries and real files, so a layer that is only
//! registered in the overlay fingerprints exactly like one that was
//! extracted to disk.

use crate::fs::{FileInfo, FileKind};
use serde::{Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::fmt;
use std::io::{self, Read};

/// SHA-256 digest of a file's identity and content
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Lowercase hex rendering
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({})", &self.to_hex()[..12])
    }
}

impl Serialize for Fingerprint {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

/// Render permission bits the way `ls -l` does, with single-letter
/// prefixes for the file type and the setuid/setgid/sticky bits.
///
/// Regular files render as `-rw-r--r--`, directories as `drwxr-xr-x`,
/// symlinks as `Lrwxrwxrwx`, a setuid binary as `urwxr-xr-x`.
/// Character devices are devices too and render as `Dcrw-rw-rw-`.
pub fn mode_string(kind: FileKind, mode: u32) -> String {
    const RWX: &[u8; 9] = b"rwxrwxrwx";

    let mut out = String::with_capacity(13);
    match kind {
        FileKind::File => {}
        FileKind::CharDevice => out.push('D'),
        other => out.push(other.mode_char()),
    }
    if mode & 0o4000 != 0 {
        out.push('u');
    }
    if mode & 0o2000 != 0 {
        out.push('g');
    }
    if kind == FileKind::CharDevice {
        out.push('c');
    }
    if mode & 0o1000 != 0 {
        out.push('t');
    }
    if out.is_empty() {
        out.push('-');
    }
    for (i, c) in RWX.iter().enumerate() {
        if mode & (1 << (8 - i)) != 0 {
            out.push(*c as char);
        } else {
            out.push('-');
        }
    }
    out
}

/// Format an id in base 36
fn base36(mut n: u32) -> String {
    const DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if n == 0 {
        return "0".to_string();
    }
    let mut buf = Vec::new();
    while n > 0 {
        buf.push(DIGITS[(n % 36) as usize]);
        n /= 36;
    }
    buf.reverse();
    String::from_utf8(buf).unwrap_or_default()
}

/// Fingerprint a file from its metadata and a reader over its content.
///
/// `content` is consumed only for regular files; for symlinks the
/// target recorded in `info` is hashed instead.
pub fn fingerprint_entry(info: &FileInfo, content: &mut dyn Read) -> io::Result<Fingerprint> {
    let mut hasher = Sha256::new();
    hasher.update(mode_string(info.kind, info.mode).as_bytes());
    hasher.update(base36(info.uid).as_bytes());
    hasher.update(b",");
    hasher.update(base36(info.gid).as_bytes());

    match info.kind {
        FileKind::File => {
            let mut buf = [0u8; 32 * 1024];
            loop {
                let n = content.read(&mut buf)?;
                if n == 0 {
                    break;
                }
                hasher.update(&buf[..n]);
            }
        }
        FileKind::Symlink => {
            if let Some(target) = &info.link_target {
                hasher.update(target.as_os_str().as_encoded_bytes());
            }
        }
        _ => {}
    }

    Ok(Fingerprint(hasher.finalize().into()))
}
