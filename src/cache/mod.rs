//! Layer cache: storage, keys and probing
//!
//! Every cached build step is stored as a single-layer image keyed by a
//! content-addressed composite key. The key of step N chains the key of
//! step N-1 with the step's command and, for COPY steps, the fingerprints
//! of the copied files, so any upstream change invalidates everything
//! after it.
//!
//! # Lookup outcomes
//!
//! | Store result | Meaning |
//! |--------------|---------|
//! | no entry | cache miss, step must run |
//! | one layer | cache hit |
//! | zero or several layers | stored incorrectly, fatal |

pub mod key;
pub mod probe;
pub mod store;

pub use key::CompositeKey;
pub use probe::{probe, BuildPlan, PlannedStep, ProbeReport, ProbedStep, StepKind};
pub use store::{DirectoryLayerStore, LayerStore};
