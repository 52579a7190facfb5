//! `deskpilot config`: print the default configuration.

use deskpilot_config::AppConfig;

use super::CommandResult;

pub fn run() -> CommandResult {
    println!("# {}", AppConfig::config_dir().join("config.toml").display());
    print!("{}", AppConfig::default_toml());
    Ok(())
}
