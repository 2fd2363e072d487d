//! Project initialization: `workbench init`.

use anyhow::{Context, Result};

use workbench::config::{WorkbenchConfig, WorkbenchToml};
use workbench::store::WorkbenchDb;

pub fn cmd_init(config: &WorkbenchConfig) -> Result<()> {
    std::fs::create_dir_all(&config.workbench_dir).with_context(|| {
        format!(
            "Failed to create {}",
            config.workbench_dir.display()
        )
    })?;

    let config_path = config.config_file();
    if !config_path.exists() {
        WorkbenchToml::default().save(&config_path)?;
        println!("Created {}", config_path.display());
    }

    let db_path = config.db_path();
    let db = WorkbenchDb::new(&db_path)?;
    let seeded = db.seed_default_phases()?;

    println!("Initialized workbench project at {}", config.project_dir.display());
    println!("  database: {}", db_path.display());
    if seeded > 0 {
        println!("  seeded {} default phase configurations", seeded);
    } else {
        println!("  phase configurations already present");
    }
    println!();
    println!("Next steps:");
    println!("  workbench prompts add <ROLE> --bootstrap <FILE> --instructions <FILE>");
    println!("  workbench start --epic-id <ID> --description <TEXT>");

    Ok(())
}
