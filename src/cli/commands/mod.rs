//! CLI command implementations

pub mod config;
pub mod extract;
pub mod inspect;
pub mod probe;
pub mod run;

pub use config::execute as config;
pub use extract::execute as extract;
pub use inspect::execute as inspect;
pub use probe::execute as probe;
pub use run::execute as run;
