use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Terminal sentinel written to `current_phase` once no successor remains.
pub const COMPLETE_PHASE: &str = "complete";

/// One phase definition from the configuration store.
///
/// `next_phase = None` marks a terminal phase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseConfig {
    pub phase_name: String,
    pub role_name: String,
    pub artifact_type: String,
    pub next_phase: Option<String>,
    pub is_active: bool,
}

/// Persisted pipeline state: artifacts keyed by artifact type, plus any
/// extra keys callers stored alongside them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineState {
    #[serde(default)]
    pub artifacts: BTreeMap<String, Value>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

impl PipelineState {
    /// Working copy with `artifact` stored under `artifact_type`.
    pub fn with_artifact(&self, artifact_type: &str, artifact: Value) -> Self {
        let mut merged = self.clone();
        merged.artifacts.insert(artifact_type.to_string(), artifact);
        merged
    }

    /// Whole state as a JSON value, as handed to prompt construction.
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pipeline {
    pub pipeline_id: String,
    pub epic_id: String,
    pub current_phase: String,
    pub state: PipelineState,
    pub initial_context: Option<Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Pipeline {
    /// Epic description recorded when the pipeline was started.
    pub fn epic_description(&self) -> &str {
        self.initial_context
            .as_ref()
            .and_then(|ctx| ctx.get("epic_description"))
            .and_then(Value::as_str)
            .unwrap_or("")
    }

    pub fn is_complete(&self) -> bool {
        self.current_phase == COMPLETE_PHASE
    }
}

/// Append-only audit record of a committed phase change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseTransition {
    pub id: i64,
    pub pipeline_id: String,
    pub from_state: String,
    pub to_state: String,
    pub timestamp: DateTime<Utc>,
    pub reason: String,
}

/// Versioned role prompt template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RolePrompt {
    pub prompt_id: String,
    pub role_name: String,
    pub version: String,
    pub bootstrap: String,
    pub instructions: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

/// One prompt-usage audit row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptUsage {
    pub usage_id: String,
    pub pipeline_id: String,
    pub prompt_id: String,
    pub role_name: String,
    pub phase_name: String,
    pub used_at: DateTime<Utc>,
}

/// Everything persisted by one phase advance, written as a single unit.
#[derive(Debug, Clone, PartialEq)]
pub struct AdvanceCommit {
    pub pipeline_id: String,
    /// Phase the pipeline must still be in for the commit to apply
    pub expected_phase: String,
    pub new_phase: String,
    pub state: PipelineState,
    pub reason: String,
}

impl AdvanceCommit {
    pub fn completes_pipeline(&self) -> bool {
        self.new_phase == COMPLETE_PHASE
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CommitOutcome {
    Committed(Pipeline),
    /// Nothing was written: the pipeline is gone or moved on (`actual_phase`).
    Conflict { actual_phase: Option<String> },
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn with_artifact_leaves_original_untouched() {
        let state = PipelineState::default();
        let merged = state.with_artifact("epic", json!({"title": "T"}));
        assert!(state.artifacts.is_empty());
        assert_eq!(merged.artifacts["epic"], json!({"title": "T"}));
    }

    #[test]
    fn with_artifact_replaces_same_type_and_keeps_others() {
        let state = PipelineState::default()
            .with_artifact("epic", json!({"v": 1}))
            .with_artifact("architecture", json!({"a": true}));
        let merged = state.with_artifact("epic", json!({"v": 2}));
        assert_eq!(merged.artifacts.len(), 2);
        assert_eq!(merged.artifacts["epic"], json!({"v": 2}));
    }

    #[test]
    fn state_preserves_extra_keys() {
        let raw = json!({"artifacts": {"epic": {"x": 1}}, "notes": "keep me"});
        let state: PipelineState = serde_json::from_value(raw.clone()).unwrap();
        assert_eq!(state.extra["notes"], json!("keep me"));
        assert_eq!(state.to_value(), raw);
    }

    #[test]
    fn state_without_artifacts_key_parses() {
        let state: PipelineState = serde_json::from_value(json!({})).unwrap();
        assert!(state.artifacts.is_empty());
    }

    #[test]
    fn epic_description_defaults_to_empty() {
        let now = Utc::now();
        let mut pipeline = Pipeline {
            pipeline_id: "pip_1".into(),
            epic_id: "EPIC-1".into(),
            current_phase: "pm_phase".into(),
            state: PipelineState::default(),
            initial_context: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        };
        assert_eq!(pipeline.epic_description(), "");
        pipeline.initial_context = Some(json!({"epic_description": "Build auth"}));
        assert_eq!(pipeline.epic_description(), "Build auth");
        assert!(!pipeline.is_complete());
    }
}
