//! Build secrets exposed to RUN commands
//!
//! Secrets are passed in as `ID=VALUE` pairs and surfaced to a command
//! through `--mount=type=secret` style mounts: either as a file (by default
//! `/run/secrets/<id>`), as an environment variable, or both. Files are
//! written through [`ScopedFiles`] so they disappear once the command ends.

use crate::error::{StratumError, StratumResult};
use crate::scoped::ScopedFiles;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::str::FromStr;
use tracing::debug;

/// Where and how secret files are written
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecretSettings {
    /// Directory for mounts without an explicit target
    pub secrets_dir: PathBuf,
    /// Working directory that relative targets resolve against
    pub workdir: PathBuf,
    pub dir_mode: u32,
    pub file_mode: u32,
}

impl Default for SecretSettings {
    fn default() -> Self {
        Self {
            secrets_dir: PathBuf::from("/run/secrets"),
            workdir: PathBuf::from("/"),
            dir_mode: 0o700,
            file_mode: 0o600,
        }
    }
}

/// A secret mount request for one command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SecretMount {
    pub id: String,
    /// File to write the secret to
    pub target: Option<PathBuf>,
    /// Environment variable to expose the secret as; empty means the id
    pub env: Option<String>,
    /// Fail when no secret with this id was provided
    pub required: bool,
}

impl SecretMount {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }

    /// Whether this mount writes a file
    pub fn writes_file(&self) -> bool {
        self.env.is_none() || self.target.is_some()
    }

    /// Absolute file path for this mount
    pub fn target_path(&self, settings: &SecretSettings) -> PathBuf {
        let target = self
            .target
            .clone()
            .unwrap_or_else(|| settings.secrets_dir.join(&self.id));
        if target.is_absolute() {
            target
        } else {
            settings.workdir.join(target)
        }
    }

    /// Name of the environment variable, if the mount sets one
    pub fn env_name(&self) -> Option<&str> {
        self.env
            .as_deref()
            .map(|name| if name.is_empty() { self.id.as_str() } else { name })
    }
}

impl FromStr for SecretMount {
    type Err = StratumError;

    /// Parse `id[,target=PATH][,env[=NAME]][,required[=BOOL]]`.
    /// The id may also be given as `id=ID` anywhere in the list.
    fn from_str(spec: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: &str| StratumError::SecretMountInvalid {
            spec: spec.to_string(),
            reason: reason.to_string(),
        };

        let mut mount = SecretMount::default();
        for (index, field) in spec.split(',').map(str::trim).enumerate() {
            let (key, value) = match field.split_once('=') {
                Some((k, v)) => (k.trim(), Some(v.trim())),
                None => (field, None),
            };
            match (key, value) {
                ("id", Some(v)) => mount.id = v.to_string(),
                ("target" | "dst" | "destination", Some(v)) if !v.is_empty() => {
                    mount.target = Some(PathBuf::from(v))
                }
                ("env", v) => mount.env = Some(v.unwrap_or_default().to_string()),
                ("required", None) => mount.required = true,
                ("required", Some(v)) => {
                    mount.required = v
                        .parse()
                        .map_err(|_| invalid("required must be true or false"))?
                }
                (id, None) if index == 0 && !id.is_empty() => mount.id = id.to_string(),
                _ => return Err(invalid(&format!("unknown option '{}'", field))),
            }
        }

        if mount.id.is_empty() {
            return Err(invalid("missing secret id"));
        }
        Ok(mount)
    }
}

/// Parse `ID=VALUE` secrets; later duplicates win
pub fn parse_build_secrets<S: AsRef<str>>(secrets: &[S]) -> StratumResult<BTreeMap<String, String>> {
    secrets
        .iter()
        .map(|s| {
            let s = s.as_ref();
            s.split_once('=')
                .map(|(id, value)| (id.to_string(), value.to_string()))
                .ok_or_else(|| StratumError::SecretInvalid(s.to_string()))
        })
        .collect()
}

/// Write secret files into `files` and return the environment variables
/// the command should see, in mount order.
///
/// A mount whose secret was not provided gets an empty value unless it is
/// marked required.
pub fn apply_secret_mounts(
    files: &mut ScopedFiles,
    secrets: &BTreeMap<String, String>,
    mounts: &[SecretMount],
    settings: &SecretSettings,
) -> StratumResult<Vec<(String, String)>> {
    let mut env = Vec::new();
    for mount in mounts {
        let value = match secrets.get(&mount.id) {
            Some(value) => value.as_str(),
            None if mount.required => return Err(StratumError::SecretRequired(mount.id.clone())),
            None => "",
        };

        if mount.writes_file() {
            let target = mount.target_path(settings);
            debug!("Mounting secret {} at {}", mount.id, target.display());
            files.create_with_parents(&target, value.as_bytes(), settings.dir_mode, settings.file_mode)?;
        }

        if let Some(name) = mount.env_name() {
            debug!("Exposing secret {} as ${}", mount.id, name);
            env.push((name.to_string(), value.to_string()));
        }
    }
    Ok(env)
}
