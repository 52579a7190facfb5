//! `deskpilot run`: execute a script against the dry-run desktop.

use std::sync::Arc;

use deskpilot_config::AppConfig;
use deskpilot_core::{ExecutionResult, UserInterface};

use super::{CommandResult, dry_run_orchestrator};
use crate::cli::RunArgs;
use crate::console::ConsoleUi;
use crate::dry_run::DryRunDesktop;

pub fn run(config: AppConfig, args: &RunArgs) -> CommandResult {
    let ui = Arc::new(ConsoleUi::stdin(args.yes));
    let (result, actions) = execute(config, args, ui)?;

    println!("Dry-run actions for {}:", args.script);
    if actions.is_empty() {
        println!("  (none)");
    }
    for (index, action) in actions.iter().enumerate() {
        println!("  {:>3}. {action}", index + 1);
    }
    println!();

    if result.success {
        println!("Completed in {} ms", result.execution_time_ms);
        if !result.output.is_empty() {
            println!("{}", result.output);
        }
        Ok(())
    } else {
        Err(format!("Script failed: {}", result.error_message).into())
    }
}

/// Run the script and return its result with the dry-run transcript.
pub fn execute(
    config: AppConfig,
    args: &RunArgs,
    ui: Arc<dyn UserInterface>,
) -> Result<(ExecutionResult, Vec<String>), deskpilot_core::Error> {
    let desktop = Arc::new(DryRunDesktop::new());
    let orchestrator = dry_run_orchestrator(config, Arc::clone(&desktop), ui)?;
    let result = orchestrator.execute_script_file_with(&args.script, args.variables());
    orchestrator.shutdown();
    Ok((result, desktop.actions()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    use crate::console::ConsoleUi;

    fn config(dir: &std::path::Path) -> AppConfig {
        let mut config = AppConfig::default();
        config.scripts.directory = dir.to_path_buf();
        config.execution.default_delay_ms = 0;
        config.feedback.enabled = false;
        config
    }

    #[test]
    fn runs_script_with_vars() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("hello.json"),
            json!({
                "metadata": {"description": "Type a greeting"},
                "commands": [
                    {"command": "TYPE_TEXT", "parameters": {"text": "hello ${name}"}},
                    {"command": "KEY_PRESS", "parameters": {"key": "enter"}}
                ]
            })
            .to_string(),
        )
        .unwrap();

        let args = RunArgs {
            script: "hello.json".into(),
            vars: vec![("name".into(), "world".into())],
            yes: true,
        };
        let ui = Arc::new(ConsoleUi::with_input(Box::new(std::io::empty()), true));
        let (result, actions) = execute(config(dir.path()), &args, ui).unwrap();

        assert!(result.success, "{}", result.error_message);
        assert_eq!(actions, vec!["type \"hello world\"", "press enter"]);
    }
}
