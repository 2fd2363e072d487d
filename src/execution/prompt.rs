//! Role prompt assembly.
//!
//! A prompt is the active [`RolePrompt`] for the phase's role plus the
//! pipeline context the role needs: epic description, current state and
//! the artifacts produced by earlier phases.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::store::{RolePrompt, RolePromptRepository};

#[derive(Debug, Error)]
pub enum PromptError {
    #[error("No active prompt found for role: {role}")]
    NoActiveTemplate { role: String },

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

/// Inputs for one prompt build. State and artifacts are read-only views.
#[derive(Debug, Clone, Copy)]
pub struct PromptRequest<'a> {
    pub role_name: &'a str,
    pub pipeline_id: &'a str,
    pub phase: &'a str,
    pub epic_context: &'a str,
    pub pipeline_state: &'a Value,
    pub artifacts: &'a BTreeMap<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuiltPrompt {
    pub prompt_text: String,
    /// Version of the role prompt the text was built from
    pub prompt_id: String,
}

#[async_trait]
pub trait PromptBuilder: Send + Sync {
    async fn build(&self, request: PromptRequest<'_>) -> Result<BuiltPrompt, PromptError>;
}

/// Builds prompts from the active role prompt in the database.
pub struct RolePromptService {
    repo: Arc<dyn RolePromptRepository>,
}

impl RolePromptService {
    pub fn new(repo: Arc<dyn RolePromptRepository>) -> Self {
        Self { repo }
    }
}

#[async_trait]
impl PromptBuilder for RolePromptService {
    async fn build(&self, request: PromptRequest<'_>) -> Result<BuiltPrompt, PromptError> {
        let prompt = self
            .repo
            .get_active_prompt(request.role_name)
            .await?
            .ok_or_else(|| PromptError::NoActiveTemplate {
                role: request.role_name.to_string(),
            })?;

        Ok(BuiltPrompt {
            prompt_text: render_prompt(&prompt, &request),
            prompt_id: prompt.prompt_id,
        })
    }
}

fn pretty(value: &impl serde::Serialize) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| "{}".to_string())
}

/// Render the system prompt for one phase.
pub fn render_prompt(prompt: &RolePrompt, request: &PromptRequest<'_>) -> String {
    let mut out = String::new();

    let _ = writeln!(
        out,
        "You are the {} for pipeline {}, executing {}.\n",
        prompt.role_name, request.pipeline_id, request.phase
    );

    if !prompt.bootstrap.trim().is_empty() {
        out.push_str(prompt.bootstrap.trim());
        out.push_str("\n\n");
    }
    if !prompt.instructions.trim().is_empty() {
        out.push_str(prompt.instructions.trim());
        out.push_str("\n\n");
    }

    out.push_str("# Epic Context\n\n");
    if request.epic_context.trim().is_empty() {
        out.push_str("(no epic description provided)\n\n");
    } else {
        out.push_str(request.epic_context.trim());
        out.push_str("\n\n");
    }

    out.push_str("# Pipeline State\n\n```json\n");
    out.push_str(&pretty(request.pipeline_state));
    out.push_str("\n```\n\n");

    out.push_str("# Previous Artifacts\n\n");
    if request.artifacts.is_empty() {
        out.push_str("(none yet)\n\n");
    } else {
        for (artifact_type, artifact) in request.artifacts {
            let _ = writeln!(out, "## {}\n\n```json\n{}\n```\n", artifact_type, pretty(artifact));
        }
    }

    out.push_str(
        "# Output\n\nRespond with a single JSON object containing the artifact for this phase. \
         Do not include any other top-level values.\n",
    );

    out
}
