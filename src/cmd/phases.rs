//! Phase configuration commands: `workbench phases`.

use anyhow::Result;

use workbench::config::WorkbenchConfig;
use workbench::store::PhaseConfig;

use super::super::PhasesCommands;
use super::open_store;

pub fn cmd_phases(config: &WorkbenchConfig, command: PhasesCommands) -> Result<()> {
    let store = open_store(config)?;
    let db = store.handle().lock_sync()?;

    match command {
        PhasesCommands::List => {
            let configs = db.list_phase_configs()?;
            if configs.is_empty() {
                println!("No phase configurations. Run 'workbench init' to seed the defaults.");
                return Ok(());
            }
            println!();
            println!(
                "{:<16} {:<12} {:<16} {:<16} Active",
                "Phase", "Role", "Artifact", "Next"
            );
            println!(
                "{:<16} {:<12} {:<16} {:<16} ------",
                "-----", "----", "--------", "----"
            );
            for c in configs {
                let active = if c.is_active {
                    console::style("yes").green()
                } else {
                    console::style("no").red()
                };
                println!(
                    "{:<16} {:<12} {:<16} {:<16} {}",
                    c.phase_name,
                    c.role_name,
                    c.artifact_type,
                    c.next_phase.as_deref().unwrap_or("(terminal)"),
                    active
                );
            }
            println!();
        }
        PhasesCommands::Set {
            name,
            role,
            artifact_type,
            next,
            inactive,
        } => {
            if let Some(next) = &next
                && db.get_phase_config(next)?.is_none()
            {
                println!(
                    "Warning: next phase '{}' has no configuration yet; advancing into it will fail until it does.",
                    next
                );
            }
            db.upsert_phase_config(&PhaseConfig {
                phase_name: name.clone(),
                role_name: role,
                artifact_type,
                next_phase: next,
                is_active: !inactive,
            })?;
            println!("Saved phase configuration '{}'", name);
        }
    }

    Ok(())
}
