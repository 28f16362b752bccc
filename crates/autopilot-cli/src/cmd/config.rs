use crate::output::print_json;
use anyhow::Context;
use autopilot_core::config::{AutopilotConfig, WarnLevel};
use clap::Subcommand;
use std::path::Path;

#[derive(Subcommand)]
pub enum ConfigSubcommand {
    /// Write a config file with default settings
    Init {
        /// Market identity of this agent
        #[arg(long)]
        agent_id: String,
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Print the effective config, defaults included
    Show,

    /// Validate the config for common mistakes
    Validate,
}

pub fn run(config_path: &Path, subcmd: ConfigSubcommand, json: bool) -> anyhow::Result<()> {
    match subcmd {
        ConfigSubcommand::Init { agent_id, force } => init(config_path, &agent_id, force),
        ConfigSubcommand::Show => show(config_path, json),
        ConfigSubcommand::Validate => validate(config_path, json),
    }
}

fn init(config_path: &Path, agent_id: &str, force: bool) -> anyhow::Result<()> {
    if config_path.exists() && !force {
        anyhow::bail!(
            "{} already exists (use --force to overwrite)",
            config_path.display()
        );
    }
    AutopilotConfig::new(agent_id)
        .save(config_path)
        .with_context(|| format!("failed to write {}", config_path.display()))?;
    println!("Wrote {}", config_path.display());
    Ok(())
}

fn show(config_path: &Path, json: bool) -> anyhow::Result<()> {
    let config = super::load_config(config_path)?;
    if json {
        return print_json(&config);
    }
    print!("{}", serde_yaml::to_string(&config)?);
    Ok(())
}

fn validate(config_path: &Path, json: bool) -> anyhow::Result<()> {
    let config = super::load_config(config_path)?;
    let warnings = config.validate();

    if json {
        print_json(&serde_json::json!({ "warnings": warnings }))?;
    } else if warnings.is_empty() {
        println!("Config is valid. No warnings.");
    } else {
        for w in &warnings {
            let prefix = match w.level {
                WarnLevel::Warning => "warning",
                WarnLevel::Error => "error",
            };
            println!("[{prefix}] {}", w.message);
        }
    }

    if warnings.iter().any(|w| w.level == WarnLevel::Error) {
        anyhow::bail!("config validation found errors");
    }
    Ok(())
}
