//! Run command - execute a build command with secrets mounted

use crate::cli::args::RunArgs;
use crate::config::Config;
use crate::error::{StratumError, StratumResult};
use crate::fs::OsFs;
use crate::scoped::{CleanupGuard, ScopedFiles};
use crate::secrets::{apply_secret_mounts, parse_build_secrets};
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use tokio::process::Command;
use tracing::{debug, info, warn};

enum Outcome {
    Exited(std::io::Result<ExitStatus>),
    Interrupted,
}

/// Execute the run command
pub async fn execute(args: RunArgs, config: &Config) -> StratumResult<()> {
    let secrets = parse_build_secrets(&args.secrets)?;
    let mut settings = config.build.secret_settings();
    if let Some(workdir) = &args.workdir {
        settings.workdir = workdir.clone();
    }

    // Scaffolding is removed whatever the command did, even if this future is dropped
    let mut guard = CleanupGuard::new(ScopedFiles::new(Arc::new(OsFs)));
    let result = match apply_secret_mounts(guard.ledger(), &secrets, &args.mounts, &settings) {
        Ok(env) => run_command(&args.command, &settings.workdir, env).await,
        Err(e) => Err(e),
    };

    let cleaned = guard.finish();
    match (result, cleaned) {
        (Err(e), Err(clean_err)) => {
            warn!("Failed to remove secret files: {}", clean_err);
            Err(e)
        }
        (Err(e), Ok(())) => Err(e),
        (Ok(()), cleaned) => cleaned,
    }
}

async fn run_command(command: &[String], workdir: &Path, env: Vec<(String, String)>) -> StratumResult<()> {
    let (program, rest) = command.split_first().ok_or(StratumError::NoCommand)?;
    let shown = command.join(" ");
    info!("Running: {}", shown);
    debug!("Working directory {}, {} secret env var(s)", workdir.display(), env.len());

    let mut child = Command::new(program)
        .args(rest)
        .envs(env)
        .current_dir(workdir)
        .stdin(Stdio::inherit())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| StratumError::command_failed(shown.as_str(), e))?;

    let outcome = tokio::select! {
        status = child.wait() => Outcome::Exited(status),
        _ = tokio::signal::ctrl_c() => Outcome::Interrupted,
    };

    match outcome {
        Outcome::Exited(status) => {
            let status = status.map_err(|e| StratumError::command_failed(shown.as_str(), e))?;
            if status.success() {
                Ok(())
            } else {
                Err(StratumError::CommandExit {
                    command: shown,
                    code: status.code().unwrap_or(-1),
                })
            }
        }
        Outcome::Interrupted => {
            warn!("Interrupted, stopping '{}'", shown);
            if let Err(e) = child.kill().await {
                debug!("Failed to kill child: {}", e);
            }
            Err(StratumError::Interrupted(shown))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::secrets::SecretMount;
    use std::time::Duration;
    use tempfile::TempDir;

    fn args(workdir: &Path, mounts: &[&str], secrets: &[&str], command: &[&str]) -> RunArgs {
        RunArgs {
            secrets: secrets.iter().map(|s| s.to_string()).collect(),
            mounts: mounts.iter().map(|m| m.parse::<SecretMount>().unwrap()).collect(),
            workdir: Some(workdir.to_path_buf()),
            command: command.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn config_in(temp: &TempDir) -> Config {
        let mut config = Config::default();
        config.build.secrets_dir = temp.path().join("secrets");
        config
    }

    #[tokio::test]
    async fn run_removes_secret_files_after_success() {
        let temp = TempDir::new().unwrap();
        let config = config_in(&temp);
        let args = args(
            temp.path(),
            &["token,target=conf/token"],
            &["token=abc"],
            &["sh", "-c", "test \"$(cat conf/token)\" = abc"],
        );

        execute(args, &config).await.unwrap();
        assert!(!temp.path().join("conf/token").exists());
        assert!(!temp.path().join("conf").exists());
    }

    #[tokio::test]
    async fn run_exposes_env_secret() {
        let temp = TempDir::new().unwrap();
        let config = config_in(&temp);
        let args = args(
            temp.path(),
            &["token,env=TOKEN"],
            &["token=abc"],
            &["sh", "-c", "test \"$TOKEN\" = abc"],
        );

        execute(args, &config).await.unwrap();
    }

    #[tokio::test]
    async fn run_cleans_up_after_failure() {
        let temp = TempDir::new().unwrap();
        let config = config_in(&temp);
        let args = args(temp.path(), &["token"], &["token=abc"], &["sh", "-c", "exit 3"]);

        let err = execute(args, &config).await.unwrap_err();
        assert!(matches!(err, StratumError::CommandExit { code: 3, .. }));
        assert!(!temp.path().join("secrets/token").exists());
        assert!(!temp.path().join("secrets").exists());
    }

    #[tokio::test]
    async fn run_cleans_up_when_cancelled() {
        let temp = TempDir::new().unwrap();
        let config = config_in(&temp);
        let args = args(temp.path(), &["token"], &["token=abc"], &["sleep", "5"]);

        let outcome = tokio::time::timeout(Duration::from_millis(300), execute(args, &config)).await;
        assert!(outcome.is_err());
        assert!(!temp.path().join("secrets/token").exists());
        assert!(!temp.path().join("secrets").exists());
    }

    #[tokio::test]
    async fn run_missing_required_secret() {
        let temp = TempDir::new().unwrap();
        let config = config_in(&temp);
        let args = args(temp.path(), &["a", "b,required"], &["a=1"], &["true"]);

        let err = execute(args, &config).await.unwrap_err();
        assert!(matches!(err, StratumError::SecretRequired(ref id) if id == "b"));
        // The first mount was written before the failure and is gone again
        assert!(!temp.path().join("secrets/a").exists());
    }

    #[tokio::test]
    async fn run_empty_command() {
        let temp = TempDir::new().unwrap();
        let config = config_in(&temp);
        let args = args(temp.path(), &[], &[], &[]);

        let err = execute(args, &config).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
    }

    #[tokio::test]
    async fn run_spawn_failure() {
        let temp = TempDir::new().unwrap();
        let config = config_in(&temp);
        let args = args(temp.path(), &[], &[], &["/nonexistent/stratum-test-binary"]);

        let err = execute(args, &config).await.unwrap_err();
        assert!(matches!(err, StratumError::CommandFailed { .. }));
    }
}
