//! `deskpilot status`: show the effective settings.

use std::path::Path;
use std::sync::Arc;

use deskpilot_config::AppConfig;
use deskpilot_engine::ScriptManager;

use super::{CommandResult, dry_run_orchestrator, load_config};
use crate::console::ConsoleUi;
use crate::dry_run::DryRunDesktop;

fn on_off(flag: bool) -> &'static str {
    if flag { "enabled" } else { "disabled" }
}

pub fn run(config_path: Option<&Path>) -> CommandResult {
    let config = load_config(config_path).map_err(|e| format!("Failed to load config: {e}"))?;
    let path = config_path
        .map(Path::to_path_buf)
        .unwrap_or_else(|| AppConfig::config_dir().join("config.toml"));
    let scripts = ScriptManager::from_config(&config.scripts).list_available_scripts().len();

    println!("deskpilot status");
    println!("================");
    println!("  Config file:    {}{}", path.display(), if path.exists() { "" } else { " (defaults)" });
    println!("  Script dir:     {} ({scripts} scripts)", config.scripts.directory.display());
    println!("  Max nesting:    {}", config.scripts.max_nesting_level);
    println!("  Step delay:     {} ms", config.execution.default_delay_ms);
    println!("  Sequence limit: {} ms", config.execution.sequence_timeout_ms);
    println!("  Confirmation:   {}", on_off(config.execution.confirmation_required));
    println!("  Loop cap:       {}", config.execution.max_loop_iterations);
    println!(
        "  Workers:        {} threads, {} planner connections",
        config.pool.worker_threads, config.pool.planner_connections
    );
    println!(
        "  Recovery:       {} (max {} retries)",
        on_off(config.recovery.enabled),
        config.recovery.max_retries
    );
    println!("  Conversation:   max {} turns", config.conversation.max_turns);
    println!(
        "  Feedback:       {} (every {} ms)",
        on_off(config.feedback.enabled),
        config.feedback.check_interval_ms
    );
    println!("  Queue workers:  {}", config.queue.workers);

    let orchestrator = dry_run_orchestrator(config, Arc::new(DryRunDesktop::new()), Arc::new(ConsoleUi::stdin(false)))?;
    let status = orchestrator.status();
    orchestrator.shutdown();
    println!();
    println!("{}", serde_json::to_string_pretty(&status)?);
    Ok(())
}
