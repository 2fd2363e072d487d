//! Best-effort prompt usage auditing.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::store::UsageRepository;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsageRecord {
    pub pipeline_id: String,
    pub prompt_id: String,
    pub role_name: String,
    pub phase_name: String,
}

/// Audit sink. Returns whether the record was stored; never fails.
#[async_trait]
pub trait UsageSink: Send + Sync {
    async fn record(&self, usage: &UsageRecord) -> bool;
}

pub struct UsageRecorder {
    repo: Arc<dyn UsageRepository>,
}

impl UsageRecorder {
    pub fn new(repo: Arc<dyn UsageRepository>) -> Self {
        Self { repo }
    }
}

#[async_trait]
impl UsageSink for UsageRecorder {
    async fn record(&self, usage: &UsageRecord) -> bool {
        match self
            .repo
            .record_usage(
                &usage.pipeline_id,
                &usage.prompt_id,
                &usage.role_name,
                &usage.phase_name,
            )
            .await
        {
            Ok(usage_id) => {
                debug!(usage_id = %usage_id, "Recorded prompt usage");
                true
            }
            Err(e) => {
                warn!(
                    event = "usage_record_failure",
                    pipeline_id = %usage.pipeline_id,
                    phase_name = %usage.phase_name,
                    role_name = %usage.role_name,
                    prompt_id = %usage.prompt_id,
                    error = %format!("{:#}", e),
                    "Usage record failure"
                );
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::Mutex;

    /// Log sink shared between the subscriber and the test.
    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl Write for Captured {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    struct Repo {
        fail: bool,
        calls: Mutex<Vec<(String, String)>>,
    }

    #[async_trait]
    impl UsageRepository for Repo {
        async fn record_usage(
            &self,
            pipeline_id: &str,
            prompt_id: &str,
            _role_name: &str,
            _phase_name: &str,
        ) -> anyhow::Result<String> {
            self.calls
                .lock()
                .unwrap()
                .push((pipeline_id.to_string(), prompt_id.to_string()));
            if self.fail {
                anyhow::bail!("disk I/O error");
            }
            Ok("pu_1".to_string())
        }
    }

    fn record() -> UsageRecord {
        UsageRecord {
            pipeline_id: "pip_1".into(),
            prompt_id: "rp_1".into(),
            role_name: "pm".into(),
            phase_name: "pm_phase".into(),
        }
    }

    #[tokio::test]
    async fn test_success_returns_true() {
        let repo = Arc::new(Repo {
            fail: false,
            calls: Mutex::new(Vec::new()),
        });
        let recorder = UsageRecorder::new(repo.clone());
        assert!(recorder.record(&record()).await);
        assert_eq!(
            repo.calls.lock().unwrap()[0],
            ("pip_1".to_string(), "rp_1".to_string())
        );
    }

    #[tokio::test]
    async fn test_failure_is_absorbed() {
        let recorder = UsageRecorder::new(Arc::new(Repo {
            fail: true,
            calls: Mutex::new(Vec::new()),
        }));
        assert!(!recorder.record(&record()).await);
    }

    #[tokio::test]
    async fn test_failure_event_is_structured_json() {
        let captured = Captured::default();
        let writer = captured.clone();
        let subscriber = tracing_subscriber::fmt()
            .json()
            .flatten_event(true)
            .with_writer(move || writer.clone())
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        let recorder = UsageRecorder::new(Arc::new(Repo {
            fail: true,
            calls: Mutex::new(Vec::new()),
        }));
        assert!(!recorder.record(&record()).await);

        let output = String::from_utf8(captured.0.lock().unwrap().clone()).unwrap();
        let line = output
            .lines()
            .find(|line| line.contains("usage_record_failure"))
            .expect("usage failure event logged");
        let event: serde_json::Value = serde_json::from_str(line).unwrap();
        assert_eq!(event["level"], "WARN");
        assert_eq!(event["event"], "usage_record_failure");
        assert_eq!(event["pipeline_id"], "pip_1");
        assert_eq!(event["phase_name"], "pm_phase");
        assert_eq!(event["role_name"], "pm");
        assert_eq!(event["prompt_id"], "rp_1");
        assert_eq!(event["error"], "disk I/O error");
    }
}
