//! Persistence boundary.
//!
//! The phase-execution core only sees the traits below; [`db::SqliteStore`]
//! implements all of them on one SQLite database.
//!
//! | Trait                   | Backing table            |
//! |-------------------------|--------------------------|
//! | `PhaseConfigRepository` | `phase_configurations`   |
//! | `RolePromptRepository`  | `role_prompts`           |
//! | `PipelineStore`         | `pipelines`, `phase_transitions` |
//! | `UsageRepository`       | `pipeline_prompt_usage`  |

pub mod db;
pub mod models;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;

pub use db::{DbHandle, SqliteStore, WorkbenchDb};
pub use models::*;

/// Keyed lookup of phase definitions.
#[async_trait]
pub trait PhaseConfigRepository: Send + Sync {
    async fn get_by_phase_name(&self, phase_name: &str) -> Result<Option<PhaseConfig>>;
}

/// Active prompt templates per role.
#[async_trait]
pub trait RolePromptRepository: Send + Sync {
    async fn get_active_prompt(&self, role_name: &str) -> Result<Option<RolePrompt>>;
}

/// Pipeline records and their transition history.
#[async_trait]
pub trait PipelineStore: Send + Sync {
    async fn create_pipeline(
        &self,
        epic_id: &str,
        initial_context: Option<Value>,
        initial_phase: &str,
    ) -> Result<Pipeline>;

    async fn get_pipeline(&self, pipeline_id: &str) -> Result<Option<Pipeline>>;

    /// Persist state, phase and transition record together, or nothing.
    async fn commit_advance(&self, commit: AdvanceCommit) -> Result<CommitOutcome>;

    async fn list_transitions(&self, pipeline_id: &str) -> Result<Vec<PhaseTransition>>;
}

/// Append-only prompt usage audit. Returns the new usage id.
#[async_trait]
pub trait UsageRepository: Send + Sync {
    async fn record_usage(
        &self,
        pipeline_id: &str,
        prompt_id: &str,
        role_name: &str,
        phase_name: &str,
    ) -> Result<String>;
}
