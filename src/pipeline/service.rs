//! Pipeline lifecycle: start, status and phase advance.
//!
//! How a pipeline advances is decided once, when the service is built, by
//! choosing a [`PhaseAdvancer`]. Both advancers commit through the same
//! [`TransitionCommitter`].

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Serialize;
use serde_json::json;
use tracing::{info, warn};

use crate::config::{OrchestrationMode, WorkbenchConfig};
use crate::errors::{ErrorContext, PhaseError, PhaseErrorKind};
use crate::execution::{
    AnthropicClient, ConfigResolver, ConfigurationLoader, LlmCaller, LlmClient, LlmSettings,
    PhaseExecutionOrchestrator, ResponseParser, RolePromptService, UsageRecorder,
};
use crate::pipeline::committer::{PhaseAdvanced, PipelineLocks, TransitionCommitter};
use crate::pipeline::legacy::LegacyPhase;
use crate::store::{PhaseTransition, Pipeline, PipelineStore, SqliteStore};

/// One way of moving a pipeline to its next phase.
#[async_trait]
pub trait PhaseAdvancer: Send + Sync {
    fn mode(&self) -> OrchestrationMode;

    /// Phase a newly started pipeline begins in.
    async fn initial_phase(&self) -> Result<String, PhaseError>;

    async fn advance(&self, pipeline: &Pipeline) -> Result<PhaseAdvanced, PhaseError>;
}

/// Fixed phase table, no LLM involvement.
pub struct LegacyAdvancer {
    committer: Arc<TransitionCommitter>,
}

impl LegacyAdvancer {
    pub fn new(committer: Arc<TransitionCommitter>) -> Self {
        Self { committer }
    }
}

#[async_trait]
impl PhaseAdvancer for LegacyAdvancer {
    fn mode(&self) -> OrchestrationMode {
        OrchestrationMode::Legacy
    }

    async fn initial_phase(&self) -> Result<String, PhaseError> {
        Ok(LegacyPhase::Idle.as_str().to_string())
    }

    async fn advance(&self, pipeline: &Pipeline) -> Result<PhaseAdvanced, PhaseError> {
        warn!(
            pipeline_id = %pipeline.pipeline_id,
            "Using legacy orchestration; set mode = \"data_driven\" for LLM-backed phases"
        );
        let next = pipeline
            .current_phase
            .parse::<LegacyPhase>()
            .ok()
            .and_then(|phase| phase.next())
            .ok_or_else(|| {
                PhaseError::new(
                    ErrorContext::new(&pipeline.pipeline_id, &pipeline.current_phase),
                    PhaseErrorKind::NoSuccessor {
                        phase: pipeline.current_phase.clone(),
                    },
                )
            })?;
        self.committer.commit_legacy(pipeline, next).await
    }
}

/// Phase definitions from the configuration store, artifacts from the LLM.
pub struct DataDrivenAdvancer {
    orchestrator: PhaseExecutionOrchestrator,
    committer: Arc<TransitionCommitter>,
    resolver: Arc<dyn ConfigResolver>,
    entry_phase: String,
}

impl DataDrivenAdvancer {
    pub fn new(
        orchestrator: PhaseExecutionOrchestrator,
        committer: Arc<TransitionCommitter>,
        resolver: Arc<dyn ConfigResolver>,
        entry_phase: String,
    ) -> Self {
        Self {
            orchestrator,
            committer,
            resolver,
            entry_phase,
        }
    }
}

#[async_trait]
impl PhaseAdvancer for DataDrivenAdvancer {
    fn mode(&self) -> OrchestrationMode {
        OrchestrationMode::DataDriven
    }

    /// The entry phase, which must resolve to an active configuration.
    async fn initial_phase(&self) -> Result<String, PhaseError> {
        let config = self.resolver.resolve(&self.entry_phase).await?;
        Ok(config.phase_name)
    }

    async fn advance(&self, pipeline: &Pipeline) -> Result<PhaseAdvanced, PhaseError> {
        info!(pipeline_id = %pipeline.pipeline_id, "Using data-driven orchestration");
        let state = pipeline.state.to_value();
        let result = self
            .orchestrator
            .execute(
                &pipeline.pipeline_id,
                &pipeline.current_phase,
                pipeline.epic_description(),
                &state,
                &pipeline.state.artifacts,
            )
            .await?;
        self.committer.commit_execution(pipeline, &result).await
    }
}

/// Settings for the data-driven advancer.
#[derive(Debug, Clone)]
pub struct DataDrivenOptions {
    pub settings: LlmSettings,
    pub timeout: Duration,
    pub entry_phase: String,
}

impl DataDrivenOptions {
    pub fn from_config(config: &WorkbenchConfig) -> Self {
        Self {
            settings: LlmSettings::from_config(config),
            timeout: Duration::from_secs(config.toml.llm.timeout_secs),
            entry_phase: config.toml.orchestration.entry_phase.clone(),
        }
    }
}

/// Pipeline record plus its transition history.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineStatus {
    pub pipeline: Pipeline,
    pub transitions: Vec<PhaseTransition>,
}

pub struct PipelineService {
    store: Arc<dyn PipelineStore>,
    advancer: Arc<dyn PhaseAdvancer>,
    locks: PipelineLocks,
}

impl PipelineService {
    pub fn new(store: Arc<dyn PipelineStore>, advancer: Arc<dyn PhaseAdvancer>) -> Self {
        Self {
            store,
            advancer,
            locks: PipelineLocks::new(),
        }
    }

    fn committer(store: &SqliteStore) -> Arc<TransitionCommitter> {
        let resolver = Arc::new(ConfigurationLoader::new(Arc::new(store.clone())));
        Arc::new(TransitionCommitter::new(Arc::new(store.clone()), resolver))
    }

    /// Legacy-mode service over a SQLite store.
    pub fn legacy(store: SqliteStore) -> Self {
        let advancer = LegacyAdvancer::new(Self::committer(&store));
        Self::new(Arc::new(store), Arc::new(advancer))
    }

    /// Data-driven service over a SQLite store and an LLM provider.
    pub fn data_driven(
        store: SqliteStore,
        client: Arc<dyn LlmClient>,
        options: DataDrivenOptions,
    ) -> Self {
        let resolver: Arc<dyn ConfigResolver> =
            Arc::new(ConfigurationLoader::new(Arc::new(store.clone())));
        let orchestrator = PhaseExecutionOrchestrator::new(
            resolver.clone(),
            Arc::new(RolePromptService::new(Arc::new(store.clone()))),
            Arc::new(LlmCaller::new(client, options.timeout)),
            Arc::new(ResponseParser::default()),
            Arc::new(UsageRecorder::new(Arc::new(store.clone()))),
            options.settings,
        );
        let advancer = DataDrivenAdvancer::new(
            orchestrator,
            Self::committer(&store),
            resolver,
            options.entry_phase,
        );
        Self::new(Arc::new(store), Arc::new(advancer))
    }

    /// Build the service for the configured orchestration mode.
    pub fn from_config(config: &WorkbenchConfig, store: SqliteStore) -> Result<Self> {
        match config.orchestration_mode() {
            OrchestrationMode::Legacy => Ok(Self::legacy(store)),
            OrchestrationMode::DataDriven => {
                let api_key = config.api_key()?;
                let client = AnthropicClient::new(api_key, config.toml.llm.base_url.clone())?;
                Ok(Self::data_driven(
                    store,
                    Arc::new(client),
                    DataDrivenOptions::from_config(config),
                ))
            }
        }
    }

    pub fn mode(&self) -> OrchestrationMode {
        self.advancer.mode()
    }

    pub async fn start_pipeline(
        &self,
        epic_id: &str,
        epic_description: Option<&str>,
    ) -> Result<Pipeline> {
        let initial_phase = self.advancer.initial_phase().await?;
        let initial_context = epic_description.map(|d| json!({ "epic_description": d }));
        let pipeline = self
            .store
            .create_pipeline(epic_id, initial_context, &initial_phase)
            .await
            .with_context(|| format!("Failed to start pipeline for epic {}", epic_id))?;
        info!(
            pipeline_id = %pipeline.pipeline_id,
            epic_id = %epic_id,
            phase = %pipeline.current_phase,
            "Pipeline created"
        );
        Ok(pipeline)
    }

    pub async fn get_status(&self, pipeline_id: &str) -> Result<Option<PipelineStatus>> {
        let Some(pipeline) = self.store.get_pipeline(pipeline_id).await? else {
            return Ok(None);
        };
        let transitions = self.store.list_transitions(pipeline_id).await?;
        Ok(Some(PipelineStatus {
            pipeline,
            transitions,
        }))
    }

    /// Advance a pipeline by one phase.
    ///
    /// Calls for the same pipeline are serialized; the store additionally
    /// rejects a commit whose expected phase is stale.
    pub async fn advance_phase(&self, pipeline_id: &str) -> Result<PhaseAdvanced, PhaseError> {
        let _guard = self.locks.acquire(pipeline_id).await;

        let pipeline = self
            .store
            .get_pipeline(pipeline_id)
            .await
            .map_err(|e| {
                PhaseError::unexpected(ErrorContext::pipeline(pipeline_id), "store", format!("{:#}", e))
            })?
            .ok_or_else(|| {
                PhaseError::new(
                    ErrorContext::pipeline(pipeline_id),
                    PhaseErrorKind::PipelineNotFound {
                        pipeline_id: pipeline_id.to_string(),
                    },
                )
            })?;

        if pipeline.is_complete() {
            return Err(PhaseError::new(
                ErrorContext::new(pipeline_id, &pipeline.current_phase),
                PhaseErrorKind::NoSuccessor {
                    phase: pipeline.current_phase.clone(),
                },
            ));
        }

        self.advancer.advance(&pipeline).await
    }
}
