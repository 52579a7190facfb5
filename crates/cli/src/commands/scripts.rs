//! `deskpilot scripts`: list scripts with their metadata.

use deskpilot_config::AppConfig;
use deskpilot_engine::{ScriptManager, ScriptSummary};

use super::CommandResult;

pub fn run(config: &AppConfig) -> CommandResult {
    let manager = ScriptManager::from_config(&config.scripts);
    let scripts = manager.list_available_scripts();

    if scripts.is_empty() {
        println!("No scripts found in {}", manager.directory().display());
        return Ok(());
    }

    println!("Scripts in {}:", manager.directory().display());
    for summary in &scripts {
        println!("{}", describe(summary));
    }
    Ok(())
}

/// One listing entry: path and description, then parameters if any.
pub fn describe(summary: &ScriptSummary) -> String {
    let meta = &summary.metadata;
    let mut line = format!("  {}", summary.path);
    if !meta.version.is_empty() {
        line.push_str(&format!(" (v{})", meta.version));
    }
    if !meta.description.is_empty() {
        line.push_str(&format!(": {}", meta.description));
    }
    if !meta.required_parameters.is_empty() {
        line.push_str(&format!("\n      requires: {}", meta.required_parameters.join(", ")));
    }
    if !meta.optional_parameters.is_empty() {
        line.push_str(&format!("\n      optional: {}", meta.optional_parameters.join(", ")));
    }
    line
}

#[cfg(test)]
mod tests {
    use super::*;
    use deskpilot_engine::ScriptMetadata;

    #[test]
    fn describe_includes_parameters() {
        let summary = ScriptSummary {
            path: "office/save.json".into(),
            metadata: ScriptMetadata {
                description: "Save the document".into(),
                version: "1.2".into(),
                required_parameters: vec!["filename".into()],
                ..ScriptMetadata::default()
            },
        };
        assert_eq!(
            describe(&summary),
            "  office/save.json (v1.2): Save the document\n      requires: filename"
        );
    }
}
