//! Detect whether status output can be decorated

use std::io::IsTerminal;

/// CI systems that set their own marker variable
const CI_VARS: &[&str] = &[
    "CI",
    "GITHUB_ACTIONS",
    "GITLAB_CI",
    "BUILDKITE",
    "JENKINS_URL",
    "TEKTON_PIPELINE_RUN",
    "TF_BUILD",
];

/// Output mode for one CLI invocation
#[derive(Debug, Clone, Copy)]
pub struct UiContext {
    fancy: bool,
}

impl UiContext {
    /// Decorate only when stderr is a terminal outside CI
    pub fn detect() -> Self {
        let in_ci = CI_VARS.iter().any(|var| std::env::var_os(var).is_some());
        Self {
            fancy: std::io::stderr().is_terminal() && !in_ci,
        }
    }

    /// Plain output regardless of environment
    pub fn plain() -> Self {
        Self { fancy: false }
    }

    /// Whether to use spinners and cliclack framing
    pub fn use_fancy_output(&self) -> bool {
        self.fancy
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_context() {
        assert!(!UiContext::plain().use_fancy_output());
    }
}
