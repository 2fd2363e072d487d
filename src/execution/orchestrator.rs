//! Single-phase execution.
//!
//! Runs resolve → prompt → LLM → parse → usage in order, each step once,
//! and returns either a [`PhaseExecutionResult`] or one [`PhaseError`].
//! Pipeline state and artifacts are borrowed immutably; persisting the
//! result is the transition committer's job.

use std::any::Any;
use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::config::WorkbenchConfig;
use crate::errors::{ErrorContext, PhaseError, PhaseErrorKind};
use crate::execution::config_loader::ConfigResolver;
use crate::execution::llm::{LlmInvoker, LlmRequest, TokenUsage};
use crate::execution::parser::ArtifactParser;
use crate::execution::prompt::{PromptBuilder, PromptError, PromptRequest};
use crate::execution::usage::{UsageRecord, UsageSink};

/// Model parameters applied to every phase call.
#[derive(Debug, Clone, PartialEq)]
pub struct LlmSettings {
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub user_message: String,
}

impl LlmSettings {
    pub fn from_config(config: &WorkbenchConfig) -> Self {
        Self {
            model: config.model(),
            max_tokens: config.toml.llm.max_tokens,
            temperature: config.toml.llm.temperature as f32,
            user_message: config.toml.llm.user_message.clone(),
        }
    }
}

impl Default for LlmSettings {
    fn default() -> Self {
        let llm = crate::config::LlmSection::default();
        Self {
            model: llm.model,
            max_tokens: llm.max_tokens,
            temperature: llm.temperature as f32,
            user_message: llm.user_message,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PhaseExecutionResult {
    pub success: bool,
    pub artifact: Value,
    pub artifact_type: String,
    /// `None` when the executed phase is terminal
    pub next_phase: Option<String>,
    pub prompt_id: String,
    pub llm_response_raw: String,
    pub execution_time_ms: u64,
    pub parse_strategy: &'static str,
    pub token_usage: Option<TokenUsage>,
}

pub struct PhaseExecutionOrchestrator {
    config: Arc<dyn ConfigResolver>,
    prompts: Arc<dyn PromptBuilder>,
    llm: Arc<dyn LlmInvoker>,
    parser: Arc<dyn ArtifactParser>,
    usage: Arc<dyn UsageSink>,
    settings: LlmSettings,
}

impl PhaseExecutionOrchestrator {
    pub fn new(
        config: Arc<dyn ConfigResolver>,
        prompts: Arc<dyn PromptBuilder>,
        llm: Arc<dyn LlmInvoker>,
        parser: Arc<dyn ArtifactParser>,
        usage: Arc<dyn UsageSink>,
        settings: LlmSettings,
    ) -> Self {
        Self {
            config,
            prompts,
            llm,
            parser,
            usage,
            settings,
        }
    }

    /// Execute one phase for a pipeline.
    ///
    /// Typed failures pass through unchanged. A panic anywhere in the
    /// sequence surfaces as `Unexpected { kind: "panic" }` with the same
    /// pipeline and phase context.
    pub async fn execute(
        &self,
        pipeline_id: &str,
        phase_name: &str,
        epic_context: &str,
        pipeline_state: &Value,
        artifacts: &BTreeMap<String, Value>,
    ) -> Result<PhaseExecutionResult, PhaseError> {
        info!(pipeline_id = %pipeline_id, phase = %phase_name, "Executing phase");

        let run = self.run(pipeline_id, phase_name, epic_context, pipeline_state, artifacts);
        let outcome = match AssertUnwindSafe(run).catch_unwind().await {
            Ok(outcome) => outcome,
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                error!(
                    pipeline_id = %pipeline_id,
                    phase = %phase_name,
                    panic = %message,
                    "Unexpected internal error during phase execution"
                );
                Err(PhaseError::unexpected(
                    ErrorContext::new(pipeline_id, phase_name),
                    "panic",
                    message,
                ))
            }
        };

        if let Err(e) = &outcome {
            error!(code = e.code(), error = %e, "Phase execution failed");
        }
        outcome
    }

    async fn run(
        &self,
        pipeline_id: &str,
        phase_name: &str,
        epic_context: &str,
        pipeline_state: &Value,
        artifacts: &BTreeMap<String, Value>,
    ) -> Result<PhaseExecutionResult, PhaseError> {
        let context = ErrorContext::new(pipeline_id, phase_name);

        let config = self
            .config
            .resolve(phase_name)
            .await
            .map_err(|e| e.with_pipeline(pipeline_id))?;
        debug!(role = %config.role_name, artifact_type = %config.artifact_type, "Loaded config");

        let prompt = self
            .prompts
            .build(PromptRequest {
                role_name: &config.role_name,
                pipeline_id,
                phase: phase_name,
                epic_context,
                pipeline_state,
                artifacts,
            })
            .await
            .map_err(|e| match e {
                PromptError::NoActiveTemplate { .. } => PhaseError::new(
                    context.clone(),
                    PhaseErrorKind::PromptBuild {
                        message: e.to_string(),
                    },
                ),
                PromptError::Internal(inner) => {
                    PhaseError::unexpected(context.clone(), "prompt_store", format!("{:#}", inner))
                }
            })?;
        debug!(prompt_id = %prompt.prompt_id, "Built prompt");

        let llm_result = self
            .llm
            .call(&LlmRequest {
                system_prompt: prompt.prompt_text,
                user_message: self.settings.user_message.clone(),
                model: self.settings.model.clone(),
                max_tokens: self.settings.max_tokens,
                temperature: self.settings.temperature,
            })
            .await;
        let Some(response_text) = llm_result.response_text() else {
            return Err(PhaseError::new(
                context,
                PhaseErrorKind::LlmInvocation {
                    message: llm_result.error().unwrap_or("unknown error").to_string(),
                },
            ));
        };
        debug!(elapsed_ms = llm_result.execution_time_ms, "LLM responded");

        let parsed = self.parser.parse(response_text);
        let (Some(artifact), Some(strategy)) = (parsed.data, parsed.strategy_used) else {
            return Err(PhaseError::new(
                context,
                PhaseErrorKind::ResponseParse {
                    message: parsed.error_messages.join("; "),
                },
            ));
        };
        debug!(strategy, "Parsed artifact");

        let recorded = self
            .usage
            .record(&UsageRecord {
                pipeline_id: pipeline_id.to_string(),
                prompt_id: prompt.prompt_id.clone(),
                role_name: config.role_name.clone(),
                phase_name: phase_name.to_string(),
            })
            .await;
        if !recorded {
            warn!(pipeline_id = %pipeline_id, phase = %phase_name, "Failed to record usage (non-fatal)");
        }

        Ok(PhaseExecutionResult {
            success: true,
            artifact,
            artifact_type: config.artifact_type,
            next_phase: config.next_phase,
            prompt_id: prompt.prompt_id,
            llm_response_raw: response_text.to_string(),
            execution_time_ms: llm_result.execution_time_ms,
            parse_strategy: strategy,
            token_usage: llm_result.token_usage(),
        })
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
