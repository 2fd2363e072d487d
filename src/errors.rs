//! Typed error taxonomy for phase execution.
//!
//! Every failure that can escape a phase advance is a [`PhaseError`]: a
//! shared [`ErrorContext`] (pipeline id and phase name) plus one
//! [`PhaseErrorKind`] variant per failure class. Rendering is always
//! `"[pipeline:phase] message"` so consumers can correlate failures without
//! digging through logs, and [`PhaseError::code`] gives a stable
//! machine-readable classification.

use std::fmt;

use thiserror::Error;

/// Correlation context attached to every propagated phase error.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ErrorContext {
    pub pipeline_id: Option<String>,
    pub phase_name: Option<String>,
}

impl ErrorContext {
    pub fn new(pipeline_id: &str, phase_name: &str) -> Self {
        Self {
            pipeline_id: Some(pipeline_id.to_string()),
            phase_name: Some(phase_name.to_string()),
        }
    }

    pub fn phase(phase_name: &str) -> Self {
        Self {
            pipeline_id: None,
            phase_name: Some(phase_name.to_string()),
        }
    }

    pub fn pipeline(pipeline_id: &str) -> Self {
        Self {
            pipeline_id: Some(pipeline_id.to_string()),
            phase_name: None,
        }
    }
}

impl fmt::Display for ErrorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.pipeline_id, &self.phase_name) {
            (Some(pipeline), Some(phase)) => write!(f, "[{}:{}]", pipeline, phase),
            (None, Some(phase)) => write!(f, "[{}]", phase),
            (Some(pipeline), None) => write!(f, "[{}]", pipeline),
            (None, None) => Ok(()),
        }
    }
}

/// One variant per failure class of a phase advance.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum PhaseErrorKind {
    #[error("Phase configuration not found: {phase}")]
    ConfigNotFound { phase: String },

    #[error("Phase configuration not active: {phase}")]
    ConfigInactive { phase: String },

    #[error("Failed to load configuration: {message}")]
    ConfigRepository { message: String },

    #[error("{message}")]
    PromptBuild { message: String },

    #[error("LLM call failed: {message}")]
    LlmInvocation { message: String },

    #[error("Parse failed: {message}")]
    ResponseParse { message: String },

    #[error("Invalid next_phase configuration: {next_phase} (from {previous_phase})")]
    InvalidNextPhase {
        next_phase: String,
        previous_phase: String,
        reason: String,
    },

    #[error("Pipeline not found: {pipeline_id}")]
    PipelineNotFound { pipeline_id: String },

    #[error("Pipeline moved from {expected} to {actual} while advancing")]
    ConcurrentModification { expected: String, actual: String },

    #[error("Cannot advance from {phase}: no successor defined")]
    NoSuccessor { phase: String },

    #[error("Unexpected internal error: {kind}: {message}")]
    Unexpected { kind: String, message: String },
}

impl PhaseErrorKind {
    /// Stable identifier for downstream tooling.
    pub fn code(&self) -> &'static str {
        match self {
            Self::ConfigNotFound { .. } => "config_not_found",
            Self::ConfigInactive { .. } => "config_inactive",
            Self::ConfigRepository { .. } => "config_repository_failure",
            Self::PromptBuild { .. } => "prompt_build_failure",
            Self::LlmInvocation { .. } => "llm_invocation_failure",
            Self::ResponseParse { .. } => "response_parse_failure",
            Self::InvalidNextPhase { .. } => "invalid_next_phase",
            Self::PipelineNotFound { .. } => "pipeline_not_found",
            Self::ConcurrentModification { .. } => "concurrent_modification",
            Self::NoSuccessor { .. } => "no_successor",
            Self::Unexpected { .. } => "unexpected_internal_failure",
        }
    }
}

/// A phase failure with its correlation context.
#[derive(Debug, Clone, Error, PartialEq)]
pub struct PhaseError {
    pub context: ErrorContext,
    pub kind: PhaseErrorKind,
}

impl fmt::Display for PhaseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.context == ErrorContext::default() {
            write!(f, "{}", self.kind)
        } else {
            write!(f, "{} {}", self.context, self.kind)
        }
    }
}

impl PhaseError {
    pub fn new(context: ErrorContext, kind: PhaseErrorKind) -> Self {
        Self { context, kind }
    }

    /// Wrap an arbitrary fault as the catch-all kind, keeping its type name.
    pub fn unexpected(context: ErrorContext, kind: &str, message: impl fmt::Display) -> Self {
        Self::new(
            context,
            PhaseErrorKind::Unexpected {
                kind: kind.to_string(),
                message: message.to_string(),
            },
        )
    }

    /// Attach (or replace) the pipeline id, keeping the phase already recorded.
    pub fn with_pipeline(mut self, pipeline_id: &str) -> Self {
        self.context.pipeline_id = Some(pipeline_id.to_string());
        self
    }

    pub fn code(&self) -> &'static str {
        self.kind.code()
    }

    pub fn pipeline_id(&self) -> Option<&str> {
        self.context.pipeline_id.as_deref()
    }

    pub fn phase_name(&self) -> Option<&str> {
        self.context.phase_name.as_deref()
    }

    /// Configuration-layer failure (not found, inactive, store fault).
    pub fn is_configuration(&self) -> bool {
        matches!(
            self.kind,
            PhaseErrorKind::ConfigNotFound { .. }
                | PhaseErrorKind::ConfigInactive { .. }
                | PhaseErrorKind::ConfigRepository { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_pipeline_and_phase_prefix() {
        let err = PhaseError::new(
            ErrorContext::new("pip_1", "pm_phase"),
            PhaseErrorKind::ConfigInactive {
                phase: "pm_phase".into(),
            },
        );
        assert_eq!(
            err.to_string(),
            "[pip_1:pm_phase] Phase configuration not active: pm_phase"
        );
    }

    #[test]
    fn renders_phase_only_prefix() {
        let err = PhaseError::new(
            ErrorContext::phase("arch_phase"),
            PhaseErrorKind::ConfigNotFound {
                phase: "arch_phase".into(),
            },
        );
        assert_eq!(
            err.to_string(),
            "[arch_phase] Phase configuration not found: arch_phase"
        );
    }

    #[test]
    fn renders_bare_message_without_context() {
        let err = PhaseError::unexpected(ErrorContext::default(), "io", "disk full");
        assert_eq!(err.to_string(), "Unexpected internal error: io: disk full");
    }

    #[test]
    fn with_pipeline_keeps_phase() {
        let err = PhaseError::new(
            ErrorContext::phase("pm_phase"),
            PhaseErrorKind::ConfigNotFound {
                phase: "pm_phase".into(),
            },
        )
        .with_pipeline("pip_9");
        assert_eq!(err.pipeline_id(), Some("pip_9"));
        assert_eq!(err.phase_name(), Some("pm_phase"));
        assert!(err.to_string().starts_with("[pip_9:pm_phase]"));
    }

    #[test]
    fn codes_are_distinct_per_kind() {
        let kinds = vec![
            PhaseErrorKind::ConfigNotFound { phase: "a".into() },
            PhaseErrorKind::ConfigInactive { phase: "a".into() },
            PhaseErrorKind::ConfigRepository { message: "m".into() },
            PhaseErrorKind::PromptBuild { message: "m".into() },
            PhaseErrorKind::LlmInvocation { message: "m".into() },
            PhaseErrorKind::ResponseParse { message: "m".into() },
            PhaseErrorKind::InvalidNextPhase {
                next_phase: "n".into(),
                previous_phase: "p".into(),
                reason: "r".into(),
            },
            PhaseErrorKind::PipelineNotFound {
                pipeline_id: "x".into(),
            },
            PhaseErrorKind::ConcurrentModification {
                expected: "a".into(),
                actual: "b".into(),
            },
            PhaseErrorKind::NoSuccessor { phase: "complete".into() },
            PhaseErrorKind::Unexpected {
                kind: "k".into(),
                message: "m".into(),
            },
        ];
        let mut codes: Vec<&str> = kinds.iter().map(|k| k.code()).collect();
        codes.sort();
        codes.dedup();
        assert_eq!(codes.len(), kinds.len());
    }

    #[test]
    fn invalid_next_phase_names_both_phases() {
        let err = PhaseError::new(
            ErrorContext::new("pip_2", "pm_phase"),
            PhaseErrorKind::InvalidNextPhase {
                next_phase: "ghost_phase".into(),
                previous_phase: "pm_phase".into(),
                reason: "not found".into(),
            },
        );
        let rendered = err.to_string();
        assert!(rendered.contains("ghost_phase"));
        assert!(rendered.contains("pm_phase"));
        assert!(rendered.contains("pip_2"));
    }

    #[test]
    fn configuration_classification() {
        let cfg = PhaseError::new(
            ErrorContext::phase("x"),
            PhaseErrorKind::ConfigInactive { phase: "x".into() },
        );
        let llm = PhaseError::new(
            ErrorContext::phase("x"),
            PhaseErrorKind::LlmInvocation { message: "boom".into() },
        );
        assert!(cfg.is_configuration());
        assert!(!llm.is_configuration());
    }

    #[test]
    fn implements_std_error() {
        fn assert_std_error<E: std::error::Error>(_: &E) {}
        let err = PhaseError::unexpected(ErrorContext::pipeline("p"), "panic", "boom");
        assert_std_error(&err);
    }
}
