//! Unified configuration for Workbench.
//!
//! Settings are read from `.workbench/workbench.toml` and layered
//! file → environment → CLI.
//!
//! # Configuration File Format
//!
//! ```toml
//! [llm]
//! model = "claude-sonnet-4-20250514"
//! max_tokens = 4096
//! temperature = 0.7
//! timeout_secs = 120
//! api_key_env = "ANTHROPIC_API_KEY"
//!
//! [orchestration]
//! mode = "data_driven"
//! entry_phase = "pm_phase"
//!
//! [database]
//! path = ".workbench/workbench.db"
//!
//! [logging]
//! level = "info"
//! format = "json"
//! dir = ".workbench/logs"
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// The name of the workbench directory inside a project.
pub const WORKBENCH_DIR: &str = ".workbench";

/// How `advance_phase` moves a pipeline forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrchestrationMode {
    /// Fixed phase table, no LLM involvement
    #[default]
    Legacy,
    /// Phase definitions from the configuration store, artifacts from the LLM
    DataDriven,
}

impl std::fmt::Display for OrchestrationMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrchestrationMode::Legacy => write!(f, "legacy"),
            OrchestrationMode::DataDriven => write!(f, "data_driven"),
        }
    }
}

impl std::str::FromStr for OrchestrationMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "legacy" => Ok(OrchestrationMode::Legacy),
            "data_driven" => Ok(OrchestrationMode::DataDriven),
            _ => anyhow::bail!(
                "Invalid orchestration mode '{}'. Valid values: legacy, data_driven",
                s
            ),
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// LLM provider settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmSection {
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    /// Upper bound on a single provider call
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Environment variable holding the API key
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    /// Custom Messages API endpoint
    #[serde(default)]
    pub base_url: Option<String>,
    /// User turn sent alongside the role prompt
    #[serde(default = "default_user_message")]
    pub user_message: String,
}

fn default_model() -> String {
    "claude-sonnet-4-20250514".to_string()
}

fn default_max_tokens() -> u32 {
    4096
}

fn default_temperature() -> f64 {
    0.7
}

fn default_timeout_secs() -> u64 {
    120
}

fn default_api_key_env() -> String {
    "ANTHROPIC_API_KEY".to_string()
}

fn default_user_message() -> String {
    "Please proceed with this phase.".to_string()
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            model: default_model(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            timeout_secs: default_timeout_secs(),
            api_key_env: default_api_key_env(),
            base_url: None,
            user_message: default_user_message(),
        }
    }
}

/// Orchestration settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestrationSection {
    #[serde(default)]
    pub mode: OrchestrationMode,
    /// First phase of a data-driven pipeline
    #[serde(default = "default_entry_phase")]
    pub entry_phase: String,
}

fn default_entry_phase() -> String {
    "pm_phase".to_string()
}

impl Default for OrchestrationSection {
    fn default() -> Self {
        Self {
            mode: OrchestrationMode::default(),
            entry_phase: default_entry_phase(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DatabaseSection {
    /// Database path, relative to the project directory
    #[serde(default)]
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSection {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
    /// Enables daily rolling log files in this directory
    #[serde(default)]
    pub dir: Option<PathBuf>,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
            dir: None,
        }
    }
}

/// The complete workbench.toml structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkbenchToml {
    #[serde(default)]
    pub llm: LlmSection,
    #[serde(default)]
    pub orchestration: OrchestrationSection,
    #[serde(default)]
    pub database: DatabaseSection,
    #[serde(default)]
    pub logging: LoggingSection,
}

impl WorkbenchToml {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::parse(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse workbench.toml")
    }

    /// Load `workbench.toml` from the workbench directory, or defaults if absent.
    pub fn load_or_default(workbench_dir: &Path) -> Result<Self> {
        let config_path = workbench_dir.join("workbench.toml");
        if config_path.exists() {
            Self::load(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content =
            toml::to_string_pretty(self).context("Failed to serialize workbench.toml")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// Validate the configuration and return any warnings.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.llm.model.trim().is_empty() {
            warnings.push("llm.model is empty".to_string());
        }
        if self.llm.max_tokens == 0 {
            warnings.push("llm.max_tokens must be greater than 0".to_string());
        }
        if !(0.0..=1.0).contains(&self.llm.temperature) {
            warnings.push(format!(
                "llm.temperature {} is outside the range 0.0-1.0",
                self.llm.temperature
            ));
        }
        if self.llm.timeout_secs == 0 {
            warnings.push("llm.timeout_secs must be greater than 0".to_string());
        }
        if self.orchestration.entry_phase.trim().is_empty() {
            warnings.push("orchestration.entry_phase is empty".to_string());
        }
        if !matches!(
            self.logging.level.to_lowercase().as_str(),
            "trace" | "debug" | "info" | "warn" | "error"
        ) {
            warnings.push(format!(
                "Unknown logging.level '{}'. Valid values: trace, debug, info, warn, error",
                self.logging.level
            ));
        }

        warnings
    }
}

/// Configuration combining workbench.toml with environment and CLI overrides.
#[derive(Debug, Clone)]
pub struct WorkbenchConfig {
    pub project_dir: PathBuf,
    pub workbench_dir: PathBuf,
    pub toml: WorkbenchToml,
    pub verbose: bool,
    /// CLI override of the orchestration mode
    pub cli_mode: Option<OrchestrationMode>,
}

impl WorkbenchConfig {
    pub fn new(project_dir: PathBuf) -> Result<Self> {
        let project_dir = project_dir
            .canonicalize()
            .context("Failed to resolve project directory")?;
        let workbench_dir = project_dir.join(WORKBENCH_DIR);
        let toml = WorkbenchToml::load_or_default(&workbench_dir)?;

        Ok(Self {
            project_dir,
            workbench_dir,
            toml,
            verbose: false,
            cli_mode: None,
        })
    }

    pub fn with_cli_args(
        project_dir: PathBuf,
        verbose: bool,
        mode: Option<OrchestrationMode>,
    ) -> Result<Self> {
        let mut config = Self::new(project_dir)?;
        config.verbose = verbose;
        config.cli_mode = mode;
        Ok(config)
    }

    /// Orchestration mode (CLI → env → file → default).
    pub fn orchestration_mode(&self) -> OrchestrationMode {
        if let Some(mode) = self.cli_mode {
            return mode;
        }
        if let Ok(flag) = std::env::var("DATA_DRIVEN_ORCHESTRATION") {
            return if flag.eq_ignore_ascii_case("true") {
                OrchestrationMode::DataDriven
            } else {
                OrchestrationMode::Legacy
            };
        }
        self.toml.orchestration.mode
    }

    /// Model id (env → file).
    pub fn model(&self) -> String {
        std::env::var("WORKBENCH_MODEL").unwrap_or_else(|_| self.toml.llm.model.clone())
    }

    /// Database path (env → file → default).
    pub fn db_path(&self) -> PathBuf {
        if let Ok(path) = std::env::var("WORKBENCH_DB_PATH") {
            return PathBuf::from(path);
        }
        match &self.toml.database.path {
            Some(path) if path.is_absolute() => path.clone(),
            Some(path) => self.project_dir.join(path),
            None => self.workbench_dir.join("workbench.db"),
        }
    }

    /// Log directory, resolved against the project directory.
    pub fn log_dir(&self) -> Option<PathBuf> {
        self.toml.logging.dir.as_ref().map(|dir| {
            if dir.is_absolute() {
                dir.clone()
            } else {
                self.project_dir.join(dir)
            }
        })
    }

    pub fn config_file(&self) -> PathBuf {
        self.workbench_dir.join("workbench.toml")
    }

    /// Read the provider API key from the configured environment variable.
    pub fn api_key(&self) -> Result<String> {
        let var = &self.toml.llm.api_key_env;
        std::env::var(var).with_context(|| {
            format!(
                "LLM API key not found in environment variable '{}'. \
                 Set it or configure a different [llm] api_key_env.",
                var
            )
        })
    }

    pub fn validate(&self) -> Vec<String> {
        self.toml.validate()
    }
}
