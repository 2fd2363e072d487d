//! Atomic phase transitions.
//!
//! [`TransitionCommitter`] is the only writer of a pipeline's
//! `current_phase` and `state`. A commit stores the merged state, the new
//! phase and the transition record together, or stores nothing.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{error, info};

use crate::errors::{ErrorContext, PhaseError, PhaseErrorKind};
use crate::execution::{ConfigResolver, PhaseExecutionResult};
use crate::pipeline::legacy::LegacyPhase;
use crate::store::{AdvanceCommit, COMPLETE_PHASE, CommitOutcome, Pipeline, PipelineStore};

pub const DATA_DRIVEN_REASON: &str = "Data-driven phase execution";
pub const LEGACY_REASON: &str = "Phase advancement (legacy)";

/// What an advance did, as reported to callers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PhaseAdvanced {
    pub pipeline_id: String,
    pub previous_phase: String,
    pub current_phase: String,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// One async mutex per pipeline id, held across execute-and-commit.
///
/// Entries nobody holds or waits on are pruned on the next `acquire`.
#[derive(Default)]
pub struct PipelineLocks {
    locks: std::sync::Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl PipelineLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, pipeline_id: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
            // Holders and waiters keep a clone, so a count of 1 means idle.
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            locks
                .entry(pipeline_id.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }

    /// Number of pipeline ids currently tracked.
    pub fn tracked(&self) -> usize {
        self.locks.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

pub struct TransitionCommitter {
    store: Arc<dyn PipelineStore>,
    resolver: Arc<dyn ConfigResolver>,
}

impl TransitionCommitter {
    pub fn new(store: Arc<dyn PipelineStore>, resolver: Arc<dyn ConfigResolver>) -> Self {
        Self { store, resolver }
    }

    /// Commit a data-driven phase result.
    ///
    /// The artifact is merged into a working copy of the state. A non-null
    /// `next_phase` must resolve to an active configuration before anything
    /// is written; a terminal result moves the pipeline to `complete`.
    pub async fn commit_execution(
        &self,
        pipeline: &Pipeline,
        result: &PhaseExecutionResult,
    ) -> Result<PhaseAdvanced, PhaseError> {
        let previous_phase = pipeline.current_phase.as_str();
        let state = pipeline
            .state
            .with_artifact(&result.artifact_type, result.artifact.clone());

        let new_phase = match &result.next_phase {
            Some(next_phase) => {
                if let Err(e) = self.resolver.resolve(next_phase).await {
                    error!(
                        pipeline_id = %pipeline.pipeline_id,
                        previous_phase = %previous_phase,
                        next_phase = %next_phase,
                        reason = %e.kind,
                        "Invalid next_phase, pipeline left unchanged"
                    );
                    return Err(PhaseError::new(
                        ErrorContext::new(&pipeline.pipeline_id, previous_phase),
                        PhaseErrorKind::InvalidNextPhase {
                            next_phase: next_phase.clone(),
                            previous_phase: previous_phase.to_string(),
                            reason: e.kind.to_string(),
                        },
                    ));
                }
                next_phase.clone()
            }
            None => COMPLETE_PHASE.to_string(),
        };

        self.apply(AdvanceCommit {
            pipeline_id: pipeline.pipeline_id.clone(),
            expected_phase: previous_phase.to_string(),
            new_phase,
            state,
            reason: DATA_DRIVEN_REASON.to_string(),
        })
        .await
    }

    /// Commit a legacy table step. State is carried over unchanged.
    pub async fn commit_legacy(
        &self,
        pipeline: &Pipeline,
        next: LegacyPhase,
    ) -> Result<PhaseAdvanced, PhaseError> {
        self.apply(AdvanceCommit {
            pipeline_id: pipeline.pipeline_id.clone(),
            expected_phase: pipeline.current_phase.clone(),
            new_phase: next.as_str().to_string(),
            state: pipeline.state.clone(),
            reason: LEGACY_REASON.to_string(),
        })
        .await
    }

    async fn apply(&self, commit: AdvanceCommit) -> Result<PhaseAdvanced, PhaseError> {
        let context = ErrorContext::new(&commit.pipeline_id, &commit.expected_phase);
        let pipeline_id = commit.pipeline_id.clone();
        let previous_phase = commit.expected_phase.clone();

        let outcome = self
            .store
            .commit_advance(commit)
            .await
            .map_err(|e| PhaseError::unexpected(context.clone(), "store", format!("{:#}", e)))?;

        match outcome {
            CommitOutcome::Committed(updated) => {
                info!(
                    pipeline_id = %pipeline_id,
                    from = %previous_phase,
                    to = %updated.current_phase,
                    "Pipeline advanced"
                );
                Ok(PhaseAdvanced {
                    pipeline_id,
                    previous_phase,
                    current_phase: updated.current_phase,
                    updated_at: updated.updated_at,
                    completed_at: updated.completed_at,
                })
            }
            CommitOutcome::Conflict { actual_phase: None } => Err(PhaseError::new(
                context,
                PhaseErrorKind::PipelineNotFound { pipeline_id },
            )),
            CommitOutcome::Conflict {
                actual_phase: Some(actual),
            } => Err(PhaseError::new(
                context,
                PhaseErrorKind::ConcurrentModification {
                    expected: previous_phase,
                    actual,
                },
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::ConfigurationLoader;
    use crate::store::{DbHandle, PhaseConfig, SqliteStore, WorkbenchDb};
    use serde_json::json;

    fn setup() -> (SqliteStore, TransitionCommitter) {
        let db = WorkbenchDb::new_in_memory().unwrap();
        db.seed_default_phases().unwrap();
        let store = SqliteStore::new(DbHandle::new(db));
        let resolver = Arc::new(ConfigurationLoader::new(Arc::new(store.clone())));
        let committer = TransitionCommitter::new(Arc::new(store.clone()), resolver);
        (store, committer)
    }

    fn result(next_phase: Option<&str>) -> PhaseExecutionResult {
        PhaseExecutionResult {
            success: true,
            artifact: json!({"title": "Test Epic"}),
            artifact_type: "epic".into(),
            next_phase: next_phase.map(String::from),
            prompt_id: "rp_1".into(),
            llm_response_raw: r#"{"title": "Test Epic"}"#.into(),
            execution_time_ms: 10,
            parse_strategy: "direct",
            token_usage: None,
        }
    }

    #[tokio::test]
    async fn test_commit_merges_artifact_and_records_transition() {
        let (store, committer) = setup();
        let pipeline = store.create_pipeline("EPIC-1", None, "pm_phase").await.unwrap();

        let advanced = committer
            .commit_execution(&pipeline, &result(Some("arch_phase")))
            .await
            .unwrap();
        assert_eq!(advanced.previous_phase, "pm_phase");
        assert_eq!(advanced.current_phase, "arch_phase");
        assert!(advanced.completed_at.is_none());

        let stored = store.get_pipeline(&pipeline.pipeline_id).await.unwrap().unwrap();
        assert_eq!(stored.state.artifacts["epic"], json!({"title": "Test Epic"}));
        let history = store.list_transitions(&pipeline.pipeline_id).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].reason, DATA_DRIVEN_REASON);
    }

    #[tokio::test]
    async fn test_terminal_result_maps_to_complete() {
        let (store, committer) = setup();
        let pipeline = store
            .create_pipeline("EPIC-1", None, "commit_phase")
            .await
            .unwrap();
        let advanced = committer.commit_execution(&pipeline, &result(None)).await.unwrap();
        assert_eq!(advanced.current_phase, COMPLETE_PHASE);
        assert!(advanced.completed_at.is_some());
    }

    #[tokio::test]
    async fn test_invalid_next_phase_leaves_pipeline_untouched() {
        let (store, committer) = setup();
        let pipeline = store.create_pipeline("EPIC-1", None, "pm_phase").await.unwrap();

        let err = committer
            .commit_execution(&pipeline, &result(Some("ghost_phase")))
            .await
            .unwrap_err();
        assert!(matches!(
            err.kind,
            PhaseErrorKind::InvalidNextPhase { ref next_phase, ref previous_phase, .. }
                if next_phase == "ghost_phase" && previous_phase == "pm_phase"
        ));
        assert!(err.to_string().contains(&pipeline.pipeline_id));

        let stored = store.get_pipeline(&pipeline.pipeline_id).await.unwrap().unwrap();
        assert_eq!(stored.current_phase, "pm_phase");
        assert!(stored.state.artifacts.is_empty());
        assert!(store.list_transitions(&pipeline.pipeline_id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_inactive_next_phase_is_invalid() {
        let (store, committer) = setup();
        store
            .handle()
            .lock_sync()
            .unwrap()
            .upsert_phase_config(&PhaseConfig {
                phase_name: "arch_phase".into(),
                role_name: "architect".into(),
                artifact_type: "architecture".into(),
                next_phase: Some("ba_phase".into()),
                is_active: false,
            })
            .unwrap();
        let pipeline = store.create_pipeline("EPIC-1", None, "pm_phase").await.unwrap();
        let err = committer
            .commit_execution(&pipeline, &result(Some("arch_phase")))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "invalid_next_phase");
    }

    #[tokio::test]
    async fn test_stale_snapshot_is_concurrent_modification() {
        let (store, committer) = setup();
        let pipeline = store.create_pipeline("EPIC-1", None, "pm_phase").await.unwrap();
        committer
            .commit_execution(&pipeline, &result(Some("arch_phase")))
            .await
            .unwrap();

        // Same snapshot again: the stored phase has already moved on.
        let err = committer
            .commit_execution(&pipeline, &result(Some("arch_phase")))
            .await
            .unwrap_err();
        assert!(matches!(
            err.kind,
            PhaseErrorKind::ConcurrentModification { ref expected, ref actual }
                if expected == "pm_phase" && actual == "arch_phase"
        ));
        assert_eq!(store.list_transitions(&pipeline.pipeline_id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_legacy_commit_keeps_state() {
        let (store, committer) = setup();
        let pipeline = store.create_pipeline("EPIC-1", None, "idle").await.unwrap();
        let advanced = committer
            .commit_legacy(&pipeline, LegacyPhase::PmPhase)
            .await
            .unwrap();
        assert_eq!(advanced.current_phase, "pm_phase");
        let history = store.list_transitions(&pipeline.pipeline_id).await.unwrap();
        assert_eq!(history[0].reason, LEGACY_REASON);
    }

    #[tokio::test]
    async fn test_locks_serialize_same_pipeline() {
        let locks = Arc::new(PipelineLocks::new());
        let guard = locks.acquire("pip_1").await;

        // A different pipeline is not blocked.
        let _other = locks.acquire("pip_2").await;

        let contender = {
            let locks = locks.clone();
            tokio::spawn(async move {
                let _g = locks.acquire("pip_1").await;
            })
        };
        tokio::task::yield_now().await;
        assert!(!contender.is_finished());

        drop(guard);
        contender.await.unwrap();
    }

    #[tokio::test]
    async fn test_released_locks_are_pruned() {
        let locks = PipelineLocks::new();
        for i in 0..50 {
            let _guard = locks.acquire(&format!("pip_{i}")).await;
        }
        assert_eq!(locks.tracked(), 1);

        let held = locks.acquire("pip_held").await;
        let _other = locks.acquire("pip_other").await;
        assert_eq!(locks.tracked(), 2);
        drop(held);
    }
}
