//! Probe command - check a build plan against the layer store

use crate::cache::{probe, BuildPlan, DirectoryLayerStore, ProbeReport};
use crate::cli::args::{OutputFormat, ProbeArgs};
use crate::config::Config;
use crate::error::{StratumError, StratumResult};
use crate::fs::{clean_path, OsFs};
use crate::image::{Image, LayeredImage};
use crate::overlay::Overlay;
use crate::ui::{self, TaskSpinner, UiContext};
use console::style;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

/// Execute the probe command
pub async fn execute(args: ProbeArgs, config: &Config) -> StratumResult<()> {
    let ctx = UiContext::detect();
    let plan = load_plan(&args.plan).await?;

    if !config.cache.enabled {
        ui::step_warn_hint(
            &ctx,
            "Layer cache is disabled in config",
            "Set cache.enabled = true to use cached layers in builds",
        );
    }

    let store_dir = args.store.clone().unwrap_or_else(|| config.cache.dir.clone());
    let store = DirectoryLayerStore::new(store_dir).with_ttl_hours(config.cache.ttl_hours);
    debug!("Probing {} step(s) against {}", plan.steps.len(), store.dir().display());

    let patterns = if plan.patterns.is_empty() {
        config.cache.patterns.clone()
    } else {
        plan.patterns.clone()
    };
    let image: Option<Arc<dyn Image>> = if plan.layers.is_empty() {
        None
    } else {
        // Relative layer paths resolve against the plan's directory
        let plan_dir = args.plan.parent().unwrap_or_else(|| Path::new("."));
        let layers: Vec<_> = plan.layers.iter().map(|l| plan_dir.join(l)).collect();
        Some(Arc::new(LayeredImage::from_tarballs(&layers)?))
    };

    let mut spinner = TaskSpinner::new(&ctx);
    spinner.start(&format!("Probing {} step(s)", plan.steps.len()));
    let result = tokio::task::spawn_blocking(move || -> StratumResult<ProbeReport> {
        let root = clean_path(&plan.root);
        let overlay = Overlay::new(Arc::new(OsFs));
        if let Some(image) = image {
            overlay.mount(&root, Some(image), &patterns)?;
        }
        probe(&overlay, &store, &root, &plan.base_key, &plan.steps)
    })
    .await
    .map_err(|e| StratumError::io("probe task", std::io::Error::other(e)))?;

    let report = match result {
        Ok(report) => {
            spinner.stop(&format!("All {} step(s) cached", report.steps.len()));
            report
        }
        Err(StratumError::UncachedStep(command)) => {
            spinner.stop_error("Probe stopped at an uncached step");
            ui::step_warn_hint(
                &ctx,
                &format!("No cached layer for '{}'", command),
                "Later steps were not checked",
            );
            return Err(StratumError::UncachedStep(command));
        }
        Err(e) => {
            spinner.stop_error("Probe failed");
            return Err(e);
        }
    };

    match args.format {
        OutputFormat::Table => print_table(&ctx, &report),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
        OutputFormat::Plain => println!("{}", report.final_key()),
    }

    Ok(())
}

async fn load_plan(path: &Path) -> StratumResult<BuildPlan> {
    let content = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| StratumError::io(format!("reading build plan {}", path.display()), e))?;

    toml::from_str(&content).map_err(|e| StratumError::PlanInvalid {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

fn print_table(ctx: &UiContext, report: &ProbeReport) {
    ui::intro(ctx, "Cache probe");

    println!(
        "{:<4} {:<36} {:<18} {:<18}",
        style("#").bold(),
        style("COMMAND").bold(),
        style("KEY").bold(),
        style("LAYER").bold()
    );
    println!("{}", "-".repeat(78));

    for (i, step) in report.steps.iter().enumerate() {
        println!(
            "{:<4} {:<36} {:<18} {:<18}",
            i + 1,
            truncate(&step.command, 36),
            short(&step.key),
            style(short(&step.layer)).green()
        );
    }

    println!();
    println!("Final key: {}", report.final_key());
}

fn short(digest: &str) -> &str {
    let hex = digest.strip_prefix("sha256:").unwrap_or(digest);
    &hex[..hex.len().min(16)]
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let head: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{}...", head)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_strips_algorithm() {
        assert_eq!(short("sha256:0123456789abcdef0123"), "0123456789abcdef");
        assert_eq!(short("abc"), "abc");
    }

    #[test]
    fn truncate_long_command() {
        assert_eq!(truncate("RUN make", 36), "RUN make");
        let long = "RUN apt-get update && apt-get install -y build-essential";
        let t = truncate(long, 20);
        assert_eq!(t.chars().count(), 20);
        assert!(t.ends_with("..."));
    }
}
