//! Whole-build cache probe
//!
//! Walks a planned build step by step, computing each step's chained cache
//! key and accepting the stored layer as a simulated hit. The probe never
//! writes to the filesystem: it answers "would this build be fully cached"
//! and "which layers would the result consist of".

use super::key::CompositeKey;
use super::store::LayerStore;
use crate::error::{StratumError, StratumResult};
use crate::overlay::Overlay;
use crate::step::CachedStep;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// What a planned step does to the cache key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum StepKind {
    /// Keyed by the command only
    Run,
    /// Keyed by the command and the fingerprints of its sources
    Copy { sources: Vec<PathBuf> },
}

/// One step of a build plan
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlannedStep {
    pub command: String,
    #[serde(flatten)]
    pub kind: StepKind,
}

impl PlannedStep {
    pub fn run(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            kind: StepKind::Run,
        }
    }

    pub fn copy(command: impl Into<String>, sources: Vec<PathBuf>) -> Self {
        Self {
            command: command.into(),
            kind: StepKind::Copy { sources },
        }
    }
}

/// A build plan as read from a TOML file
///
/// ```toml
/// base_key = "sha256:..."
/// layers = ["base.tar"]
/// patterns = ["ctx"]
///
/// [[steps]]
/// command = "COPY ctx /app"
/// kind = "copy"
/// sources = ["/ctx"]
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildPlan {
    /// Key the first step chains onto, usually the base image digest
    pub base_key: String,
    /// Root the base image is mounted at
    #[serde(default = "default_root")]
    pub root: PathBuf,
    /// Base image layer tarballs, bottom first
    #[serde(default)]
    pub layers: Vec<PathBuf>,
    /// Cache patterns for the base image; empty uses the configured defaults
    #[serde(default)]
    pub patterns: Vec<String>,
    #[serde(default)]
    pub steps: Vec<PlannedStep>,
}

fn default_root() -> PathBuf {
    PathBuf::from("/")
}

/// Outcome of probing one step
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProbedStep {
    pub command: String,
    /// Composite key the layer was found under
    pub key: String,
    /// Digest of the cached layer
    pub layer: String,
}

/// Outcome of a fully cached probe
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProbeReport {
    pub base_key: String,
    pub steps: Vec<ProbedStep>,
}

impl ProbeReport {
    /// Key of the last step, or the base key for an empty plan
    pub fn final_key(&self) -> &str {
        self.steps
            .last()
            .map(|s| s.key.as_str())
            .unwrap_or(self.base_key.as_str())
    }
}

/// Simulate every step of a build against `store`.
///
/// Each hit's layer is registered on `root` of the overlay, so a later
/// step's key sees the files earlier steps would have written there.
/// Fails with `UncachedStep` at the first step without a cached layer.
pub fn probe(
    overlay: &Overlay,
    store: &dyn LayerStore,
    root: &Path,
    base_key: &str,
    steps: &[PlannedStep],
) -> StratumResult<ProbeReport> {
    let mut previous = base_key.to_string();
    let mut probed = Vec::with_capacity(steps.len());

    for step in steps {
        let mut key = CompositeKey::new(previous.as_str());
        key.add_key(step.command.as_str());
        if let StepKind::Copy { sources } = &step.kind {
            for source in sources {
                key.add_path(overlay, source)?;
            }
        }
        let digest = key.hash();
        debug!("Checking cache for '{}' with key {}", step.command, digest);

        let candidate = store.retrieve(&digest)?;
        if candidate.is_none() {
            info!("No cached layer found for cmd {}", step.command);
            return Err(StratumError::UncachedStep(step.command.clone()));
        }

        let mut executor = CachedStep::new(step.command.as_str(), overlay.base(), root);
        executor.simulate_hit(candidate)?;
        let layer = match executor.layer() {
            Some(layer) => {
                overlay.register_layer(root, Arc::clone(layer))?;
                layer.digest()
            }
            None => String::new(),
        };
        info!("Using cached layer {} for '{}'", layer, step.command);

        probed.push(ProbedStep {
            command: step.command.clone(),
            key: digest.clone(),
            layer,
        });
        previous = digest;
    }

    Ok(ProbeReport {
        base_key: base_key.to_string(),
        steps: probed,
    })
}
