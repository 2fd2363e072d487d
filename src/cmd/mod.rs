//! CLI command implementations.
//!
//! | Module     | Commands handled              |
//! |------------|-------------------------------|
//! | `project`  | `Init`                        |
//! | `pipeline` | `Start`, `Advance`, `Status`  |
//! | `phases`   | `Phases`                      |
//! | `prompts`  | `Prompts`                     |
//! | `config`   | `Config`                      |

pub mod config;
pub mod phases;
pub mod pipeline;
pub mod project;
pub mod prompts;

pub use config::cmd_config;
pub use phases::cmd_phases;
pub use pipeline::{cmd_advance, cmd_start, cmd_status};
pub use project::cmd_init;
pub use prompts::cmd_prompts;

use anyhow::Result;
use workbench::config::WorkbenchConfig;
use workbench::store::SqliteStore;

/// Open the configured database, refusing to run before `workbench init`.
pub(crate) fn open_store(config: &WorkbenchConfig) -> Result<SqliteStore> {
    let db_path = config.db_path();
    if !db_path.exists() {
        anyhow::bail!(
            "No database found at {}. Run 'workbench init' first.",
            db_path.display()
        );
    }
    SqliteStore::open(&db_path)
}
