//! Configuration view and validation commands: `workbench config`.

use anyhow::Result;

use workbench::config::{WorkbenchConfig, WorkbenchToml};

use super::super::ConfigCommands;

fn print_toml(toml: &WorkbenchToml) {
    println!("[llm]");
    println!("  model = \"{}\"", toml.llm.model);
    println!("  max_tokens = {}", toml.llm.max_tokens);
    println!("  temperature = {}", toml.llm.temperature);
    println!("  timeout_secs = {}", toml.llm.timeout_secs);
    println!("  api_key_env = \"{}\"", toml.llm.api_key_env);
    if let Some(url) = &toml.llm.base_url {
        println!("  base_url = \"{}\"", url);
    }
    println!();
    println!("[orchestration]");
    println!("  mode = \"{}\"", toml.orchestration.mode);
    println!("  entry_phase = \"{}\"", toml.orchestration.entry_phase);
    println!();
    println!("[logging]");
    println!("  level = \"{}\"", toml.logging.level);
    println!("  format = \"{:?}\"", toml.logging.format);
    if let Some(dir) = &toml.logging.dir {
        println!("  dir = \"{}\"", dir.display());
    }
    println!();
}

pub fn cmd_config(config: &WorkbenchConfig, command: Option<ConfigCommands>) -> Result<()> {
    let config_path = config.config_file();

    match command {
        None | Some(ConfigCommands::Show) => {
            println!();
            println!("Workbench Configuration");
            println!("=======================");
            println!();

            if config_path.exists() {
                println!("Config file: {}", config_path.display());
            } else {
                println!("No workbench.toml found at {}", config_path.display());
                println!("Using default configuration.");
            }
            println!();
            print_toml(&config.toml);

            println!("Effective values (with env/CLI overrides):");
            println!("  mode = \"{}\"", config.orchestration_mode());
            println!("  model = \"{}\"", config.model());
            println!("  database = \"{}\"", config.db_path().display());
            println!();
        }
        Some(ConfigCommands::Validate) => {
            println!();
            println!("Validating configuration...");
            println!();

            if !config_path.exists() {
                println!("No workbench.toml found. Using defaults (valid).");
                return Ok(());
            }

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
        Some(ConfigCommands::Init) => {
            if config_path.exists() {
                println!("workbench.toml already exists at {}", config_path.display());
                println!("Delete it first if you want to recreate it.");
                return Ok(());
            }

            std::fs::create_dir_all(&config.workbench_dir)?;
            WorkbenchToml::default().save(&config_path)?;

            println!("Created workbench.toml at {}", config_path.display());
            println!();
            println!("You can now customize:");
            println!("  - [llm] model, max_tokens, temperature, timeout_secs");
            println!("  - [orchestration] mode, entry_phase");
            println!("  - [logging] level, format, dir");
            println!();
        }
    }

    Ok(())
}
