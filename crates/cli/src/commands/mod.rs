//! Subcommand implementations.

pub mod config_cmd;
pub mod run;
pub mod scripts;
pub mod status;

use std::path::Path;
use std::sync::Arc;

use deskpilot_config::{AppConfig, ConfigError};
use deskpilot_core::UserInterface;
use deskpilot_orchestrator::{Collaborators, Orchestrator};

use crate::cli::{Cli, Commands};
use crate::dry_run::{DryRunDesktop, NoScreen, OfflinePlanner};

pub type CommandResult = Result<(), Box<dyn std::error::Error>>;

pub fn dispatch(cli: &Cli) -> CommandResult {
    match &cli.command {
        Commands::Config => config_cmd::run(),
        Commands::Run(args) => run::run(load_config(cli.config.as_deref())?, args),
        Commands::Scripts => scripts::run(&load_config(cli.config.as_deref())?),
        Commands::Status => status::run(cli.config.as_deref()),
    }
}

/// Load `path` if given, otherwise the default location. Environment
/// overrides apply either way.
pub fn load_config(path: Option<&Path>) -> Result<AppConfig, ConfigError> {
    let Some(path) = path else {
        return AppConfig::load();
    };
    let mut config = AppConfig::load_from(path)?;
    config.apply_overrides(|key| std::env::var(key).ok())?;
    config.validate()?;
    Ok(config)
}

/// An orchestrator wired to the dry-run desktop with no planner backend.
pub fn dry_run_orchestrator(
    config: AppConfig,
    desktop: Arc<DryRunDesktop>,
    ui: Arc<dyn UserInterface>,
) -> deskpilot_core::Result<Orchestrator> {
    Orchestrator::new(
        config,
        Collaborators {
            desktop,
            perception: Arc::new(NoScreen),
            planner: Arc::new(OfflinePlanner),
            ui,
        },
    )
}
