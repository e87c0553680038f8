//! Terminal output for the CLI
//!
//! Status lines go through `cliclack` when attached to a terminal and fall
//! back to plain `[OK]`/`[WARN]` prefixes in CI. Everything here writes to
//! stderr so command results on stdout stay pipeable.

mod context;
mod output;
mod progress;

pub use context::UiContext;
pub use output::{
    intro, key_value, outro_success, remark, step_error, step_info, step_ok, step_ok_detail,
    step_warn, step_warn_hint,
};
pub use progress::TaskSpinner;
