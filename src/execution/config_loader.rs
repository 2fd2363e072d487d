//! Phase configuration resolution.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, error};

use crate::errors::{ErrorContext, PhaseError, PhaseErrorKind};
use crate::store::{PhaseConfig, PhaseConfigRepository};

/// Resolves a phase name to an active phase definition.
///
/// Errors carry the phase name only; callers attach the pipeline id.
#[async_trait]
pub trait ConfigResolver: Send + Sync {
    async fn resolve(&self, phase_name: &str) -> Result<PhaseConfig, PhaseError>;
}

pub struct ConfigurationLoader {
    repo: Arc<dyn PhaseConfigRepository>,
}

impl ConfigurationLoader {
    pub fn new(repo: Arc<dyn PhaseConfigRepository>) -> Self {
        Self { repo }
    }
}

#[async_trait]
impl ConfigResolver for ConfigurationLoader {
    async fn resolve(&self, phase_name: &str) -> Result<PhaseConfig, PhaseError> {
        let context = ErrorContext::phase(phase_name);

        let config = match self.repo.get_by_phase_name(phase_name).await {
            Ok(Some(config)) => config,
            Ok(None) => {
                error!(phase = %phase_name, "Phase config not found");
                return Err(PhaseError::new(
                    context,
                    PhaseErrorKind::ConfigNotFound {
                        phase: phase_name.to_string(),
                    },
                ));
            }
            Err(e) => {
                error!(phase = %phase_name, error = %format!("{:#}", e), "Failed to load phase config");
                return Err(PhaseError::new(
                    context,
                    PhaseErrorKind::ConfigRepository {
                        message: format!("{:#}", e),
                    },
                ));
            }
        };

        if !config.is_active {
            error!(phase = %phase_name, "Phase config not active");
            return Err(PhaseError::new(
                context,
                PhaseErrorKind::ConfigInactive {
                    phase: phase_name.to_string(),
                },
            ));
        }

        debug!(
            phase = %phase_name,
            role = %config.role_name,
            artifact_type = %config.artifact_type,
            "Loaded phase config"
        );
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    struct MapRepo {
        configs: HashMap<String, PhaseConfig>,
        fail: bool,
    }

    #[async_trait]
    impl PhaseConfigRepository for MapRepo {
        async fn get_by_phase_name(&self, phase_name: &str) -> anyhow::Result<Option<PhaseConfig>> {
            if self.fail {
                anyhow::bail!("connection refused");
            }
            Ok(self.configs.get(phase_name).cloned())
        }
    }

    fn config(phase: &str, active: bool) -> PhaseConfig {
        PhaseConfig {
            phase_name: phase.into(),
            role_name: "pm".into(),
            artifact_type: "epic".into(),
            next_phase: Some("arch_phase".into()),
            is_active: active,
        }
    }

    fn loader(configs: Vec<PhaseConfig>, fail: bool) -> ConfigurationLoader {
        let configs = configs
            .into_iter()
            .map(|c| (c.phase_name.clone(), c))
            .collect();
        ConfigurationLoader::new(Arc::new(MapRepo { configs, fail }))
    }

    #[tokio::test]
    async fn test_resolves_active_config() {
        let loader = loader(vec![config("pm_phase", true)], false);
        let resolved = loader.resolve("pm_phase").await.unwrap();
        assert_eq!(resolved.role_name, "pm");
        assert_eq!(resolved.next_phase.as_deref(), Some("arch_phase"));
    }

    #[tokio::test]
    async fn test_missing_config_is_not_found() {
        let loader = loader(vec![], false);
        let err = loader.resolve("ghost_phase").await.unwrap_err();
        assert!(matches!(err.kind, PhaseErrorKind::ConfigNotFound { ref phase } if phase == "ghost_phase"));
        assert_eq!(err.to_string(), "[ghost_phase] Phase configuration not found: ghost_phase");
    }

    #[tokio::test]
    async fn test_inactive_config_is_rejected() {
        let loader = loader(vec![config("pm_phase", false)], false);
        let err = loader.resolve("pm_phase").await.unwrap_err().with_pipeline("pip_1");
        assert!(matches!(err.kind, PhaseErrorKind::ConfigInactive { .. }));
        let rendered = err.to_string();
        assert!(rendered.contains("not active"));
        assert!(rendered.starts_with("[pip_1:pm_phase]"));
    }

    #[tokio::test]
    async fn test_repository_fault_is_wrapped() {
        let loader = loader(vec![config("pm_phase", true)], true);
        let err = loader.resolve("pm_phase").await.unwrap_err();
        assert!(err.is_configuration());
        assert!(matches!(
            err.kind,
            PhaseErrorKind::ConfigRepository { ref message } if message.contains("connection refused")
        ));
    }
}
