//! Extract command - apply a cached step layer onto the working root

use crate::cli::args::{ExtractArgs, OutputFormat};
use crate::config::Config;
use crate::error::{StratumError, StratumResult};
use crate::fs::{FileSystem, OsFs};
use crate::image::{Image, LayeredImage};
use crate::step::CachedStep;
use crate::ui::{self, TaskSpinner, UiContext};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Serialize)]
struct ExtractReport {
    step: String,
    root: PathBuf,
    state: String,
    layer: Option<String>,
    files: Vec<PathBuf>,
}

/// Execute the extract command
pub async fn execute(args: ExtractArgs, config: &Config) -> StratumResult<()> {
    let ctx = UiContext::detect();
    let root = args.root.clone().unwrap_or_else(|| config.build.root_dir.clone());

    let mut options = config.build.extract_options();
    if args.no_chown {
        options.preserve_ownership = false;
    }
    debug!(
        "Extracting {} layer(s) onto {} (chown: {})",
        args.layers.len(),
        root.display(),
        options.preserve_ownership
    );

    let fs: Arc<dyn FileSystem> = Arc::new(OsFs);
    let candidate: Arc<dyn Image> = Arc::new(LayeredImage::from_tarballs(&args.layers)?);
    let mut step = CachedStep::new(args.step.as_str(), fs, root.clone()).with_options(options);
    let simulate = args.simulate;

    let mut spinner = TaskSpinner::new(&ctx);
    spinner.start(&format!("Applying cached layer for '{}'", args.step));
    let result = tokio::task::spawn_blocking(move || {
        let files = if simulate {
            step.simulate_hit(Some(candidate))
        } else {
            step.materialize(Some(candidate))
        };
        (step, files)
    })
    .await
    .map_err(|e| StratumError::io("extract task", std::io::Error::other(e)))?;

    let (step, files) = result;
    let files = match files {
        Ok(files) => {
            spinner.stop(&format!("Step '{}' {}", step.command(), step.state()));
            files
        }
        Err(e) => {
            spinner.stop_error(&format!("Step '{}' {}", step.command(), step.state()));
            return Err(e);
        }
    };

    let report = ExtractReport {
        step: step.command().to_string(),
        root,
        state: step.state().to_string(),
        layer: step.layer().map(|l| l.digest()),
        files,
    };

    match args.format {
        OutputFormat::Table => print_table(&ctx, &report),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
        OutputFormat::Plain => {
            for file in &report.files {
                println!("{}", file.display());
            }
        }
    }

    Ok(())
}

fn print_table(ctx: &UiContext, report: &ExtractReport) {
    ui::intro(ctx, &format!("Step '{}'", report.step));
    ui::key_value(ctx, "Root", &report.root.display().to_string());
    ui::key_value(ctx, "State", &report.state);
    ui::key_value(ctx, "Layer", report.layer.as_deref().unwrap_or("-"));
    ui::key_value(ctx, "Changed", &report.files.len().to_string());
    for file in &report.files {
        ui::remark(ctx, &file.display().to_string());
    }
    ui::outro_success(ctx, "Done");
}
