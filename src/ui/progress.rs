//! Spinner for long-running steps (layer walks, extraction)

use super::context::UiContext;
use console::style;

/// A spinner that degrades to plain lines in CI
pub struct TaskSpinner {
    spinner: Option<cliclack::ProgressBar>,
    fancy: bool,
}

impl TaskSpinner {
    pub fn new(ctx: &UiContext) -> Self {
        Self {
            spinner: None,
            fancy: ctx.use_fancy_output(),
        }
    }

    pub fn start(&mut self, message: &str) {
        if self.fancy {
            let spinner = cliclack::spinner();
            spinner.start(message);
            self.spinner = Some(spinner);
        } else {
            eprintln!("{} {}", style("...").dim(), message);
        }
    }

    pub fn stop(&mut self, message: &str) {
        match self.spinner.take() {
            Some(spinner) => spinner.stop(message),
            None => eprintln!("{} {}", style("[OK]").green(), message),
        }
    }

    pub fn stop_error(&mut self, message: &str) {
        match self.spinner.take() {
            Some(spinner) => spinner.error(message),
            None => eprintln!("{} {}", style("[FAIL]").red(), message),
        }
    }
}

impl Drop for TaskSpinner {
    fn drop(&mut self) {
        // An error path may skip stop(); leave the terminal clean
        if let Some(spinner) = self.spinner.take() {
            spinner.clear();
        }
    }
}
