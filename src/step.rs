//! Cache-aware step execution
//!
//! A build step with a cache candidate either materializes the candidate's
//! single layer onto the working root, or accepts it as a simulated hit
//! without touching disk. Both modes retain the consumed layer so callers
//! can ask which layer produced the step's output.

use crate::error::{StratumError, StratumResult};
use crate::fs::FileSystem;
use crate::image::{extract_layers, ExtractOptions, Image, Layer};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Number of layers a cache candidate must carry
const CANDIDATE_LAYERS: usize = 1;

/// Lifecycle of a cached step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepState {
    /// No candidate consumed yet
    Uncached,
    /// Extraction in progress
    Materializing,
    /// Layer extracted onto the working root
    Materialized,
    /// Layer accepted without filesystem writes
    SimulatedHit,
    /// Validation or extraction failed
    Failed,
}

impl StepState {
    /// Whether a candidate has been consumed, successfully or not
    pub fn is_settled(&self) -> bool {
        !matches!(self, Self::Uncached)
    }
}

impl fmt::Display for StepState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Uncached => write!(f, "uncached"),
            Self::Materializing => write!(f, "materializing"),
            Self::Materialized => write!(f, "materialized"),
            Self::SimulatedHit => write!(f, "simulated-hit"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// A build step backed by a cache candidate
pub struct CachedStep {
    command: String,
    fs: Arc<dyn FileSystem>,
    root: PathBuf,
    options: ExtractOptions,
    state: StepState,
    layer: Option<Arc<dyn Layer>>,
    files: Vec<PathBuf>,
}

impl CachedStep {
    /// Create a step that extracts onto `root` of `fs`
    pub fn new(command: impl Into<String>, fs: Arc<dyn FileSystem>, root: impl Into<PathBuf>) -> Self {
        Self {
            command: command.into(),
            fs,
            root: root.into(),
            options: ExtractOptions::default(),
            state: StepState::Uncached,
            layer: None,
            files: Vec::new(),
        }
    }

    /// Override extraction settings
    pub fn with_options(mut self, options: ExtractOptions) -> Self {
        self.options = options;
        self
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn state(&self) -> StepState {
        self.state
    }

    /// Layer consumed by this step, once a candidate has been accepted
    pub fn layer(&self) -> Option<&Arc<dyn Layer>> {
        self.layer.as_ref()
    }

    /// Paths written or removed by this step
    pub fn files_to_snapshot(&self) -> &[PathBuf] {
        &self.files
    }

    /// Extract the candidate's layer onto the working root and return the
    /// paths it wrote or removed.
    pub fn materialize(&mut self, candidate: Option<Arc<dyn Image>>) -> StratumResult<Vec<PathBuf>> {
        let layer = self.accept(candidate)?;
        self.state = StepState::Materializing;
        info!("Found cached layer, extracting to filesystem");

        match extract_layers(
            self.fs.as_ref(),
            &self.root,
            std::slice::from_ref(&layer),
            self.options,
        ) {
            Ok(files) => {
                if files.is_empty() {
                    warn!(
                        "Cached layer {} for '{}' contains no entries",
                        layer.digest(),
                        self.command
                    );
                }
                debug!("Materialized {} paths for '{}'", files.len(), self.command);
                self.files = files.clone();
                self.layer = Some(layer);
                self.state = StepState::Materialized;
                Ok(files)
            }
            Err(e) => {
                self.state = StepState::Failed;
                Err(e)
            }
        }
    }

    /// Accept the candidate without writing anything. Returns an empty
    /// changed-file list but retains the layer.
    pub fn simulate_hit(&mut self, candidate: Option<Arc<dyn Image>>) -> StratumResult<Vec<PathBuf>> {
        let layer = self.accept(candidate)?;
        info!("Found cached layer, skipping extraction");
        debug!("Simulated hit for '{}' with layer {}", self.command, layer.digest());

        self.layer = Some(layer);
        self.files.clear();
        self.state = StepState::SimulatedHit;
        Ok(Vec::new())
    }

    /// Shared validation: the step must be fresh and the candidate must
    /// hold exactly one layer.
    fn accept(&mut self, candidate: Option<Arc<dyn Image>>) -> StratumResult<Arc<dyn Layer>> {
        if self.state.is_settled() {
            return Err(StratumError::StepState {
                command: self.command.clone(),
                state: self.state.to_string(),
            });
        }

        // No candidate was attached, so the step stays uncached
        let image = candidate.ok_or_else(|| StratumError::CandidateMissing(self.command.clone()))?;

        let result = image.layers().and_then(|mut layers| {
            if layers.len() != CANDIDATE_LAYERS {
                return Err(StratumError::LayerCount {
                    expected: CANDIDATE_LAYERS,
                    actual: layers.len(),
                });
            }
            Ok(layers.remove(0))
        });
        if result.is_err() {
            self.state = StepState::Failed;
        }
        result
    }
}

impl fmt::Debug for CachedStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CachedStep")
            .field("command", &self.command)
            .field("root", &self.root)
            .field("state", &self.state)
            .field("layer", &self.layer.as_ref().map(|l| l.digest()))
            .field("files", &self.files.len())
            .finish()
    }
}
