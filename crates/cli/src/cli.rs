//! Command-line argument definitions.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use serde_json::{Map, Value};

/// deskpilot: LLM-driven desktop automation, run from scripts.
#[derive(Parser, Debug)]
#[command(name = "deskpilot", author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub json_logs: bool,

    /// Read configuration from this file instead of ~/.deskpilot/config.toml
    #[arg(long, global = true, env = "DESKPILOT_CONFIG")]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a script against the dry-run desktop
    Run(RunArgs),

    /// List available scripts with their metadata
    Scripts,

    /// Print the default configuration as TOML
    Config,

    /// Show the effective settings
    Status,
}

#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Script path, relative to the script directory
    pub script: String,

    /// Script parameter as name=value (repeatable)
    #[arg(long = "var", value_name = "NAME=VALUE", value_parser = parse_var)]
    pub vars: Vec<(String, String)>,

    /// Answer yes to every confirmation prompt
    #[arg(short, long)]
    pub yes: bool,
}

impl RunArgs {
    /// `--var` pairs as script variables. Later pairs win.
    pub fn variables(&self) -> Map<String, Value> {
        self.vars
            .iter()
            .map(|(name, value)| (name.clone(), Value::String(value.clone())))
            .collect()
    }
}

/// Parse one `name=value` pair. The value may itself contain `=`.
pub fn parse_var(raw: &str) -> Result<(String, String), String> {
    let (name, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected NAME=VALUE, got '{raw}'"))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(format!("variable name is empty in '{raw}'"));
    }
    Ok((name.to_string(), value.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_var_splits_on_first_equals() {
        assert_eq!(parse_var("query=a=b").unwrap(), ("query".into(), "a=b".into()));
        assert_eq!(parse_var("empty=").unwrap(), ("empty".into(), String::new()));
        assert!(parse_var("novalue").is_err());
        assert!(parse_var("=x").is_err());
    }
}
