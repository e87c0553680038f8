//! Error types for Stratum
//!
//! All modules use `StratumResult<T>` as their return type. Every variant
//! maps onto one [`ErrorKind`] so callers can branch on the category
//! without matching individual variants.

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for Stratum operations
pub type StratumResult<T> = Result<T, StratumError>;

/// Coarse error categories
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Caller misuse (missing image, empty path, bad pattern)
    InvalidInput,
    /// Duplicate registration
    AlreadyExists,
    /// Lookup miss across base filesystem and cache
    NotExist,
    /// Layer-count mismatch or conflicting state
    InvariantViolation,
    /// Reading raw bytes of a cached entry
    Unsupported,
    /// Underlying disk or transport failure
    IoFailure,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::InvalidInput => "invalid input",
            Self::AlreadyExists => "already exists",
            Self::NotExist => "not exist",
            Self::InvariantViolation => "invariant violation",
            Self::Unsupported => "unsupported",
            Self::IoFailure => "io failure",
        };
        write!(f, "{}", name)
    }
}

/// All errors that can occur in Stratum
#[derive(Error, Debug)]
pub enum StratumError {
    // Input errors
    #[error("No image provided for root {0}")]
    ImageMissing(PathBuf),

    #[error("No cache candidate attached to step: {0}")]
    CandidateMissing(String),

    #[error("Path must not be empty")]
    EmptyPath,

    #[error("Invalid path: {path}: {reason}")]
    PathInvalid { path: PathBuf, reason: String },

    #[error("Invalid cache pattern '{pattern}': {reason}")]
    PatternInvalid { pattern: String, reason: String },

    #[error("No fingerprint for ancestor entry {0}: only requested files are hashed")]
    UndefinedFingerprint(PathBuf),

    #[error("Invalid secret '{0}': expected ID=VALUE")]
    SecretInvalid(String),

    #[error("Required secret {0} not found")]
    SecretRequired(String),

    #[error("Invalid secret mount '{spec}': {reason}")]
    SecretMountInvalid { spec: String, reason: String },

    // Overlay errors
    #[error("Root already mounted: {0}")]
    RootExists(PathBuf),

    #[error("Path not found: {0}")]
    NotFound(PathBuf),

    #[error("Reading content of cached file is not allowed: {0}")]
    CachedRead(PathBuf),

    // Step errors
    #[error("Expected {expected} layer(s) in cached image but got {actual}")]
    LayerCount { expected: usize, actual: usize },

    #[error("Step '{command}' is already {state}")]
    StepState { command: String, state: String },

    #[error("Uncached step: {0}")]
    UncachedStep(String),

    // Layer errors
    #[error("Failed to read layer {digest}")]
    Layer {
        digest: String,
        #[source]
        source: std::io::Error,
    },

    // Configuration errors
    #[error("Invalid configuration at {path}: {reason}")]
    ConfigInvalid { path: PathBuf, reason: String },

    #[error("Invalid build plan {path}: {reason}")]
    PlanInvalid { path: PathBuf, reason: String },

    #[error("Failed to create config directory {path}: {source}")]
    ConfigDirCreate {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // IO errors
    #[error("IO error: {context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    // Process errors
    #[error("Command failed: {command}")]
    CommandFailed {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Command exited with status {code}: {command}")]
    CommandExit { command: String, code: i32 },

    #[error("No command given")]
    NoCommand,

    #[error("Interrupted while running: {0}")]
    Interrupted(String),

    // Serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
}

impl StratumError {
    /// Create an IO error with context
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Create a layer read error
    pub fn layer(digest: impl Into<String>, source: std::io::Error) -> Self {
        Self::Layer {
            digest: digest.into(),
            source,
        }
    }

    /// Create a command failed error
    pub fn command_failed(command: impl Into<String>, source: std::io::Error) -> Self {
        Self::CommandFailed {
            command: command.into(),
            source,
        }
    }

    /// Category of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::ImageMissing(_)
            | Self::CandidateMissing(_)
            | Self::EmptyPath
            | Self::PathInvalid { .. }
            | Self::PatternInvalid { .. }
            | Self::UndefinedFingerprint(_)
            | Self::SecretInvalid(_)
            | Self::SecretRequired(_)
            | Self::SecretMountInvalid { .. }
            | Self::ConfigInvalid { .. }
            | Self::PlanInvalid { .. }
            | Self::NoCommand => ErrorKind::InvalidInput,
            Self::RootExists(_) => ErrorKind::AlreadyExists,
            Self::NotFound(_) | Self::UncachedStep(_) => ErrorKind::NotExist,
            Self::LayerCount { .. } | Self::StepState { .. } => ErrorKind::InvariantViolation,
            Self::CachedRead(_) => ErrorKind::Unsupported,
            Self::Layer { .. }
            | Self::ConfigDirCreate { .. }
            | Self::Io { .. }
            | Self::CommandFailed { .. }
            | Self::CommandExit { .. }
            | Self::Interrupted(_)
            | Self::Json(_)
            | Self::TomlParse(_)
            | Self::TomlSerialize(_) => ErrorKind::IoFailure,
        }
    }

    /// Fatal errors abort the current step and are never retried internally
    pub fn is_fatal(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::InvalidInput | ErrorKind::InvariantViolation
        )
    }

    /// Get actionable hint for the error
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            Self::LayerCount { .. } => {
                Some("The cached image was stored incorrectly; remove it from the layer store")
            }
            Self::SecretInvalid(_) => Some("Pass secrets as --secret ID=VALUE"),
            Self::UncachedStep(_) => Some("Run a full build to populate the layer cache"),
            Self::RootExists(_) => Some("Each root can only be mounted once per overlay"),
            Self::NoCommand => Some("Pass the command after --, e.g. stratum run -- make"),
            Self::SecretRequired(_) => Some("Provide it with --secret ID=VALUE"),
            Self::ConfigInvalid { .. } => Some("Run 'stratum config init --force' to write a fresh config"),
            Self::PlanInvalid { .. } => {
                Some("A plan needs base_key and [[steps]] with command and kind = \"run\" or \"copy\"")
            }
            _ => None,
        }
    }
}
