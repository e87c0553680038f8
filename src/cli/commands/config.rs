//! Config command - show or initialize configuration

use crate::cli::args::{ConfigAction, ConfigArgs};
use crate::config::{Config, ConfigManager};
use crate::error::StratumResult;
use crate::ui::{self, UiContext};

/// Execute the config command
pub async fn execute(args: ConfigArgs, config: &Config, manager: &ConfigManager) -> StratumResult<()> {
    let ctx = UiContext::detect();
    match args.action {
        None | Some(ConfigAction::Show) => show(&ctx, config, manager).await,
        Some(ConfigAction::Path) => {
            println!("{}", manager.path().display());
            Ok(())
        }
        Some(ConfigAction::Init { force }) => init(&ctx, manager, force).await,
    }
}

/// Effective configuration on stdout, its origin on stderr
async fn show(ctx: &UiContext, config: &Config, manager: &ConfigManager) -> StratumResult<()> {
    let origin = if exists(manager).await {
        manager.path().display().to_string()
    } else {
        format!("built-in defaults ({} not found)", manager.path().display())
    };
    ui::remark(ctx, &format!("Source: {}", origin));
    print!("{}", toml::to_string_pretty(config)?);
    Ok(())
}

async fn init(ctx: &UiContext, manager: &ConfigManager, force: bool) -> StratumResult<()> {
    if exists(manager).await && !force {
        ui::step_warn_hint(
            ctx,
            &format!("Config already exists at {}", manager.path().display()),
            "Use --force to overwrite",
        );
        return Ok(());
    }

    let config = Config::default();
    manager.save(&config).await?;

    ui::step_ok_detail(ctx, "Configuration initialized", &manager.path().display().to_string());
    ui::key_value(ctx, "layer store", &config.cache.dir.display().to_string());
    if config.cache.patterns.is_empty() {
        ui::remark(ctx, "No cache patterns set; add cache.patterns to content-cache image files");
    }
    Ok(())
}

async fn exists(manager: &ConfigManager) -> bool {
    tokio::fs::try_exists(manager.path()).await.unwrap_or(false)
}
