//! Role prompt commands: `workbench prompts`.

use anyhow::{Context, Result};

use workbench::config::WorkbenchConfig;

use super::super::PromptsCommands;
use super::open_store;

pub fn cmd_prompts(config: &WorkbenchConfig, command: PromptsCommands) -> Result<()> {
    let store = open_store(config)?;
    let db = store.handle().lock_sync()?;

    match command {
        PromptsCommands::Add {
            role,
            bootstrap,
            instructions,
            version,
            inactive,
        } => {
            let bootstrap_text = std::fs::read_to_string(&bootstrap)
                .with_context(|| format!("Failed to read {}", bootstrap.display()))?;
            let instructions_text = std::fs::read_to_string(&instructions)
                .with_context(|| format!("Failed to read {}", instructions.display()))?;

            let prompt =
                db.insert_role_prompt(&role, &version, &bootstrap_text, &instructions_text, !inactive)?;
            println!(
                "Added prompt {} for role '{}' (version {}{})",
                prompt.prompt_id,
                prompt.role_name,
                prompt.version,
                if prompt.is_active { ", active" } else { "" }
            );
        }
        PromptsCommands::List => {
            let prompts = db.list_role_prompts()?;
            if prompts.is_empty() {
                println!("No role prompts stored.");
                return Ok(());
            }
            println!();
            println!("{:<12} {:<10} {:<8} {:<38} Created", "Role", "Version", "Active", "Prompt id");
            for p in prompts {
                println!(
                    "{:<12} {:<10} {:<8} {:<38} {}",
                    p.role_name,
                    p.version,
                    if p.is_active { "yes" } else { "no" },
                    p.prompt_id,
                    p.created_at.format("%Y-%m-%d %H:%M")
                );
            }
            println!();
        }
    }

    Ok(())
}
