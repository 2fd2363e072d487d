//! Data-driven phase execution.
//!
//! Leaves first: [`config_loader`] resolves phase definitions, [`prompt`]
//! assembles the role prompt, [`llm`] calls the model, [`parser`] extracts
//! the artifact and [`usage`] audits which prompt was used.
//! [`orchestrator`] composes them into one phase execution.

pub mod config_loader;
pub mod llm;
pub mod orchestrator;
pub mod parser;
pub mod prompt;
pub mod usage;

pub use config_loader::{ConfigResolver, ConfigurationLoader};
pub use llm::{
    AnthropicClient, LlmCallResult, LlmCaller, LlmClient, LlmClientError, LlmInvoker, TokenUsage,
};
pub use orchestrator::{LlmSettings, PhaseExecutionOrchestrator, PhaseExecutionResult};
pub use parser::{ArtifactParser, ParseResult, ParsingStrategy, ResponseParser};
pub use prompt::{PromptBuilder, RolePromptService};
pub use usage::{UsageRecord, UsageRecorder, UsageSink};
