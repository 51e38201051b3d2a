//! Configuration view and validation commands: `cards config`.

use anyhow::Result;

use super::super::ConfigCommands;
use hardcore_cards::config::{CardsConfig, CardsToml};

pub fn cmd_config(config: &CardsConfig, command: Option<ConfigCommands>) -> Result<()> {
    match command {
        None | Some(ConfigCommands::Show) => {
            println!();
            println!("Cards Configuration");
            println!("===================");
            println!();

            match &config.source {
                Some(path) => println!("Config file: {}", path.display()),
                None => match CardsToml::default_path() {
                    Some(path) => println!("No cards.toml found at {}", path.display()),
                    None => println!("No config directory on this platform"),
                },
            }
            println!();

            println!("Effective values (with env/CLI overrides):");
            println!("[service]");
            println!("  base_url = \"{}\"", config.base_url());
            println!("  timeout_ms = {}", config.timeout_ms());
            println!("  client_id = \"{}\"", config.toml.service.client_id);
            println!("  seal_password = {}", config.toml.service.seal_password);
            println!();
            println!("[session]");
            println!("  expiry_skew_ms = {}", config.expiry_skew_ms());
            println!("  storage_path = \"{}\"", config.storage_path.display());
            println!();
            println!("[logging]");
            println!("  filter = \"{}\"", config.log_filter);
            println!("  json = {}", config.json_logs);
            if let Some(dir) = config.log_dir() {
                println!("  file_dir = \"{}\"", dir.display());
            }
            println!();
        }
        Some(ConfigCommands::Validate) => {
            println!();
            println!("Validating configuration...");
            println!();

            let warnings = config.validate();
            if warnings.is_empty() {
                println!("Configuration is valid.");
            } else {
                println!("Configuration warnings:");
                for warning in warnings {
                    println!("  - {}", warning);
                }
            }
            println!();
        }
    }

    Ok(())
}
