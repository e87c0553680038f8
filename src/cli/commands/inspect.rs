//! Inspect command - mount layers as cached metadata and look paths up

use crate::cli::args::{InspectArgs, OutputFormat};
use crate::config::Config;
use crate::error::{StratumError, StratumResult};
use crate::fingerprint::mode_string;
use crate::fs::{clean_path, FileSystem, MemFs, OsFs};
use crate::image::{Image, LayeredImage};
use crate::overlay::{CachedEntry, Entry, Overlay};
use crate::ui::{self, TaskSpinner, UiContext};
use console::style;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// One looked-up path
#[derive(Debug, Serialize)]
struct InspectRow {
    path: PathBuf,
    source: &'static str,
    kind: Option<String>,
    mode: Option<String>,
    uid: Option<u32>,
    gid: Option<u32>,
    size: Option<u64>,
    fingerprint: Option<String>,
}

/// Execute the inspect command
pub async fn execute(args: InspectArgs, config: &Config) -> StratumResult<()> {
    let ctx = UiContext::detect();
    let patterns = if args.patterns.is_empty() {
        config.cache.patterns.clone()
    } else {
        args.patterns.clone()
    };
    if patterns.is_empty() {
        ui::step_warn_hint(
            &ctx,
            "No cache patterns given, only the image root will be visible",
            "Pass --pattern or set cache.patterns",
        );
    }

    let base: Arc<dyn FileSystem> = if args.isolated {
        Arc::new(MemFs::new())
    } else {
        Arc::new(OsFs)
    };
    let overlay = Arc::new(Overlay::new(base));
    let image: Arc<dyn Image> = Arc::new(LayeredImage::from_tarballs(&args.layers)?);
    let root = clean_path(&args.root);

    let mut spinner = TaskSpinner::new(&ctx);
    spinner.start(&format!("Caching {} layer(s) at {}", args.layers.len(), root.display()));
    let mounted = {
        let overlay = Arc::clone(&overlay);
        let root = root.clone();
        tokio::task::spawn_blocking(move || overlay.mount(&root, Some(image), &patterns))
            .await
            .map_err(|e| StratumError::io("mount task", std::io::Error::other(e)))?
    };
    match mounted {
        Ok(()) => spinner.stop(&format!("Cached {}", root.display())),
        Err(e) => {
            spinner.stop_error("Caching failed");
            return Err(e);
        }
    }

    let paths = if args.paths.is_empty() {
        match overlay.read_cached_dir(&root) {
            Ok(children) => children.into_iter().map(|info| root.join(info.name)).collect(),
            Err(StratumError::NotFound(_)) => Vec::new(),
            Err(e) => return Err(e),
        }
    } else {
        args.paths.iter().map(|p| clean_path(p)).collect::<Vec<_>>()
    };

    let rows = paths
        .iter()
        .map(|path| inspect_path(&overlay, path))
        .collect::<StratumResult<Vec<_>>>()?;

    match args.format {
        OutputFormat::Table => print_table(&ctx, &rows),
        OutputFormat::Json => print_json(&rows)?,
        OutputFormat::Plain => print_plain(&rows),
    }

    Ok(())
}

fn inspect_path(overlay: &Overlay, path: &Path) -> StratumResult<InspectRow> {
    let entry = match overlay.lstat(path) {
        Ok(entry) => entry,
        Err(StratumError::NotFound(_)) => {
            return Ok(InspectRow {
                path: path.to_path_buf(),
                source: "missing",
                kind: None,
                mode: None,
                uid: None,
                gid: None,
                size: None,
                fingerprint: None,
            })
        }
        Err(e) => return Err(e),
    };

    let source = match &entry {
        Entry::Base(_) => "base",
        Entry::Cached(CachedEntry::Content(_)) => "cache",
        Entry::Cached(CachedEntry::Ancestor(_)) => "ancestor",
    };
    let fingerprint = match overlay.fingerprint(path) {
        Ok(fp) => Some(fp.to_hex()),
        Err(StratumError::UndefinedFingerprint(_)) => None,
        Err(e) => return Err(e),
    };

    let info = entry.info();
    Ok(InspectRow {
        path: path.to_path_buf(),
        source,
        kind: Some(info.kind.to_string()),
        mode: Some(mode_string(info.kind, info.mode)),
        uid: Some(info.uid),
        gid: Some(info.gid),
        size: Some(info.size),
        fingerprint,
    })
}

fn print_table(ctx: &UiContext, rows: &[InspectRow]) {
    ui::intro(ctx, "Overlay lookup");

    println!(
        "{:<40} {:<9} {:<11} {:<11} {:<14}",
        style("PATH").bold(),
        style("SOURCE").bold(),
        style("MODE").bold(),
        style("OWNER").bold(),
        style("FINGERPRINT").bold()
    );
    println!("{}", "-".repeat(89));

    for row in rows {
        let source = match row.source {
            "cache" => style(row.source).green(),
            "ancestor" => style(row.source).cyan(),
            "missing" => style(row.source).red(),
            _ => style(row.source).dim(),
        };
        let owner = match (row.uid, row.gid) {
            (Some(uid), Some(gid)) => format!("{}:{}", uid, gid),
            _ => "-".to_string(),
        };
        let fingerprint = row
            .fingerprint
            .as_deref()
            .map(|fp| fp[..12].to_string())
            .unwrap_or_else(|| "-".to_string());

        println!(
            "{:<40} {:<9} {:<11} {:<11} {:<14}",
            row.path.display(),
            source,
            row.mode.as_deref().unwrap_or("-"),
            owner,
            fingerprint
        );
    }

    println!();
    println!("{} path(s)", rows.len());
}

fn print_json(rows: &[InspectRow]) -> StratumResult<()> {
    let json = serde_json::to_string_pretty(rows)?;
    println!("{}", json);
    Ok(())
}

fn print_plain(rows: &[InspectRow]) {
    for row in rows {
        println!(
            "{}\t{}\t{}",
            row.path.display(),
            row.source,
            row.fingerprint.as_deref().unwrap_or("-")
        );
    }
}
