use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use serde_json::Value;
use uuid::Uuid;

use super::models::*;
use super::{PhaseConfigRepository, PipelineStore, RolePromptRepository, UsageRepository};

/// Async-safe handle to the workbench database.
///
/// Wraps `WorkbenchDb` behind `Arc<Mutex>` and runs all access on tokio's
/// blocking thread pool via `spawn_blocking`, so synchronous SQLite I/O
/// never ties up async worker threads.
#[derive(Clone)]
pub struct DbHandle {
    inner: Arc<std::sync::Mutex<WorkbenchDb>>,
}

impl DbHandle {
    pub fn new(db: WorkbenchDb) -> Self {
        Self {
            inner: Arc::new(std::sync::Mutex::new(db)),
        }
    }

    /// Run a closure with access to the database on a blocking thread.
    /// All data passed into `f` must be owned (`'static`).
    pub async fn call<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&WorkbenchDb) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let db = self.inner.clone();
        tokio::task::spawn_blocking(move || {
            let guard = db.lock().map_err(|e| anyhow::anyhow!("DB lock poisoned: {}", e))?;
            f(&guard)
        })
        .await
        .context("DB task panicked")?
    }

    /// Acquire the database mutex synchronously. For startup, CLI admin
    /// commands and tests; never from a hot async path.
    pub fn lock_sync(&self) -> Result<std::sync::MutexGuard<'_, WorkbenchDb>> {
        self.inner
            .lock()
            .map_err(|e| anyhow::anyhow!("DB lock poisoned: {}", e))
    }
}

/// Default data-driven phase chain installed by `seed_default_phases`.
pub const DEFAULT_PHASES: &[(&str, &str, &str, Option<&str>)] = &[
    ("pm_phase", "pm", "epic", Some("arch_phase")),
    ("arch_phase", "architect", "architecture", Some("ba_phase")),
    ("ba_phase", "ba", "backlog", Some("dev_phase")),
    ("dev_phase", "developer", "code", Some("qa_phase")),
    ("qa_phase", "qa", "qa_report", Some("commit_phase")),
    ("commit_phase", "commit", "commit_summary", None),
];

fn new_id(prefix: &str) -> String {
    format!("{}_{}", prefix, Uuid::new_v4().simple())
}

pub struct WorkbenchDb {
    conn: Connection,
}

impl WorkbenchDb {
    /// Open (or create) a SQLite database at the given path and run migrations.
    pub fn new(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let conn = Connection::open(path).context("Failed to open SQLite database")?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    /// Create an in-memory SQLite database (for testing).
    pub fn new_in_memory() -> Result<Self> {
        let conn =
            Connection::open_in_memory().context("Failed to open in-memory SQLite database")?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    fn init(&self) -> Result<()> {
        self.conn
            .execute_batch("PRAGMA foreign_keys = ON;")
            .context("Failed to enable foreign keys")?;
        self.run_migrations().context("Failed to run migrations")?;
        Ok(())
    }

    fn run_migrations(&self) -> Result<()> {
        self.conn
            .execute_batch(
                "
                CREATE TABLE IF NOT EXISTS phase_configurations (
                    phase_name TEXT PRIMARY KEY,
                    role_name TEXT NOT NULL,
                    artifact_type TEXT NOT NULL,
                    next_phase TEXT,
                    is_active INTEGER NOT NULL DEFAULT 1,
                    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
                );

                CREATE TABLE IF NOT EXISTS role_prompts (
                    prompt_id TEXT PRIMARY KEY,
                    role_name TEXT NOT NULL,
                    version TEXT NOT NULL,
                    bootstrap TEXT NOT NULL DEFAULT '',
                    instructions TEXT NOT NULL DEFAULT '',
                    is_active INTEGER NOT NULL DEFAULT 0,
                    created_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS pipelines (
                    pipeline_id TEXT PRIMARY KEY,
                    epic_id TEXT NOT NULL,
                    current_phase TEXT NOT NULL,
                    state TEXT NOT NULL DEFAULT '{}',
                    initial_context TEXT,
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL,
                    completed_at TEXT
                );

                CREATE TABLE IF NOT EXISTS phase_transitions (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    pipeline_id TEXT NOT NULL REFERENCES pipelines(pipeline_id) ON DELETE CASCADE,
                    from_state TEXT NOT NULL,
                    to_state TEXT NOT NULL,
                    timestamp TEXT NOT NULL,
                    reason TEXT NOT NULL DEFAULT ''
                );

                CREATE TABLE IF NOT EXISTS pipeline_prompt_usage (
                    usage_id TEXT PRIMARY KEY,
                    pipeline_id TEXT NOT NULL,
                    prompt_id TEXT NOT NULL,
                    role_name TEXT NOT NULL,
                    phase_name TEXT NOT NULL,
                    used_at TEXT NOT NULL
                );

                CREATE INDEX IF NOT EXISTS idx_role_prompts_role ON role_prompts(role_name, is_active);
                CREATE INDEX IF NOT EXISTS idx_transitions_pipeline ON phase_transitions(pipeline_id);
                CREATE INDEX IF NOT EXISTS idx_usage_pipeline ON pipeline_prompt_usage(pipeline_id);
                ",
            )
            .context("Failed to create tables")?;
        Ok(())
    }

    // ── Phase configuration ───────────────────────────────────────────

    pub fn upsert_phase_config(&self, config: &PhaseConfig) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO phase_configurations (phase_name, role_name, artifact_type, next_phase, is_active)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(phase_name) DO UPDATE SET
                    role_name = excluded.role_name,
                    artifact_type = excluded.artifact_type,
                    next_phase = excluded.next_phase,
                    is_active = excluded.is_active,
                    updated_at = datetime('now')",
                params![
                    config.phase_name,
                    config.role_name,
                    config.artifact_type,
                    config.next_phase,
                    config.is_active
                ],
            )
            .context("Failed to upsert phase configuration")?;
        Ok(())
    }

    pub fn get_phase_config(&self, phase_name: &str) -> Result<Option<PhaseConfig>> {
        self.conn
            .query_row(
                "SELECT phase_name, role_name, artifact_type, next_phase, is_active
                 FROM phase_configurations WHERE phase_name = ?1",
                params![phase_name],
                |row| {
                    Ok(PhaseConfig {
                        phase_name: row.get(0)?,
                        role_name: row.get(1)?,
                        artifact_type: row.get(2)?,
                        next_phase: row.get(3)?,
                        is_active: row.get(4)?,
                    })
                },
            )
            .optional()
            .context("Failed to query phase configuration")
    }

    pub fn list_phase_configs(&self) -> Result<Vec<PhaseConfig>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT phase_name, role_name, artifact_type, next_phase, is_active
                 FROM phase_configurations ORDER BY phase_name",
            )
            .context("Failed to prepare list_phase_configs")?;
        let rows = stmt
            .query_map([], |row| {
                Ok(PhaseConfig {
                    phase_name: row.get(0)?,
                    role_name: row.get(1)?,
                    artifact_type: row.get(2)?,
                    next_phase: row.get(3)?,
                    is_active: row.get(4)?,
                })
            })
            .context("Failed to query phase configurations")?;
        let mut configs = Vec::new();
        for row in rows {
            configs.push(row.context("Failed to read phase configuration row")?);
        }
        Ok(configs)
    }

    /// Install the default phase chain, leaving existing rows alone.
    /// Returns how many rows were inserted.
    pub fn seed_default_phases(&self) -> Result<usize> {
        let mut inserted = 0;
        for (phase, role, artifact, next) in DEFAULT_PHASES {
            inserted += self
                .conn
                .execute(
                    "INSERT OR IGNORE INTO phase_configurations (phase_name, role_name, artifact_type, next_phase, is_active)
                     VALUES (?1, ?2, ?3, ?4, 1)",
                    params![phase, role, artifact, next],
                )
                .context("Failed to seed phase configuration")?;
        }
        Ok(inserted)
    }

    // ── Role prompts ──────────────────────────────────────────────────

    /// Store a new prompt version. Activating it deactivates the role's
    /// other versions in the same transaction.
    pub fn insert_role_prompt(
        &self,
        role_name: &str,
        version: &str,
        bootstrap: &str,
        instructions: &str,
        activate: bool,
    ) -> Result<RolePrompt> {
        let prompt_id = new_id("rp");
        let tx = self
            .conn
            .unchecked_transaction()
            .context("Failed to begin transaction")?;
        if activate {
            tx.execute(
                "UPDATE role_prompts SET is_active = 0 WHERE role_name = ?1",
                params![role_name],
            )
            .context("Failed to deactivate previous prompts")?;
        }
        tx.execute(
            "INSERT INTO role_prompts (prompt_id, role_name, version, bootstrap, instructions, is_active, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![prompt_id, role_name, version, bootstrap, instructions, activate, Utc::now()],
        )
        .context("Failed to insert role prompt")?;
        tx.commit().context("Failed to commit role prompt")?;

        self.get_role_prompt(&prompt_id)?
            .context("Role prompt not found after insert")
    }

    pub fn get_role_prompt(&self, prompt_id: &str) -> Result<Option<RolePrompt>> {
        self.conn
            .query_row(
                "SELECT prompt_id, role_name, version, bootstrap, instructions, is_active, created_at
                 FROM role_prompts WHERE prompt_id = ?1",
                params![prompt_id],
                read_role_prompt,
            )
            .optional()
            .context("Failed to query role prompt")
    }

    pub fn get_active_prompt(&self, role_name: &str) -> Result<Option<RolePrompt>> {
        self.conn
            .query_row(
                "SELECT prompt_id, role_name, version, bootstrap, instructions, is_active, created_at
                 FROM role_prompts WHERE role_name = ?1 AND is_active = 1
                 ORDER BY created_at DESC LIMIT 1",
                params![role_name],
                read_role_prompt,
            )
            .optional()
            .context("Failed to query active role prompt")
    }

    pub fn list_role_prompts(&self) -> Result<Vec<RolePrompt>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT prompt_id, role_name, version, bootstrap, instructions, is_active, created_at
                 FROM role_prompts ORDER BY role_name, created_at",
            )
            .context("Failed to prepare list_role_prompts")?;
        let rows = stmt
            .query_map([], read_role_prompt)
            .context("Failed to query role prompts")?;
        let mut prompts = Vec::new();
        for row in rows {
            prompts.push(row.context("Failed to read role prompt row")?);
        }
        Ok(prompts)
    }

    // ── Pipelines ─────────────────────────────────────────────────────

    pub fn create_pipeline(
        &self,
        epic_id: &str,
        initial_context: Option<&Value>,
        initial_phase: &str,
    ) -> Result<Pipeline> {
        let pipeline_id = new_id("pip");
        let now = Utc::now();
        let state = serde_json::to_string(&PipelineState::default())
            .context("Failed to serialize pipeline state")?;
        let context = initial_context
            .map(serde_json::to_string)
            .transpose()
            .context("Failed to serialize initial context")?;
        self.conn
            .execute(
                "INSERT INTO pipelines (pipeline_id, epic_id, current_phase, state, initial_context, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
                params![pipeline_id, epic_id, initial_phase, state, context, now],
            )
            .context("Failed to insert pipeline")?;
        self.get_pipeline(&pipeline_id)?
            .context("Pipeline not found after insert")
    }

    pub fn get_pipeline(&self, pipeline_id: &str) -> Result<Option<Pipeline>> {
        let row = self
            .conn
            .query_row(
                "SELECT pipeline_id, epic_id, current_phase, state, initial_context, created_at, updated_at, completed_at
                 FROM pipelines WHERE pipeline_id = ?1",
                params![pipeline_id],
                |row| {
                    Ok(PipelineRow {
                        pipeline_id: row.get(0)?,
                        epic_id: row.get(1)?,
                        current_phase: row.get(2)?,
                        state: row.get(3)?,
                        initial_context: row.get(4)?,
                        created_at: row.get(5)?,
                        updated_at: row.get(6)?,
                        completed_at: row.get(7)?,
                    })
                },
            )
            .optional()
            .context("Failed to query pipeline")?;
        row.map(PipelineRow::into_pipeline).transpose()
    }

    /// Apply an advance atomically.
    ///
    /// The update only matches while the pipeline is still in
    /// `expected_phase`; on a mismatch the transaction is rolled back and
    /// `CommitOutcome::Conflict` reports the phase actually stored.
    pub fn commit_advance(&self, commit: &AdvanceCommit) -> Result<CommitOutcome> {
        let state = serde_json::to_string(&commit.state)
            .context("Failed to serialize pipeline state")?;
        let now = Utc::now();
        let completed_at = commit.completes_pipeline().then_some(now);

        // unchecked_transaction is fine: DbHandle's Mutex already serializes access.
        let tx = self
            .conn
            .unchecked_transaction()
            .context("Failed to begin transaction")?;

        let changed = tx
            .execute(
                "UPDATE pipelines
                 SET current_phase = ?1, state = ?2, updated_at = ?3,
                     completed_at = COALESCE(?4, completed_at)
                 WHERE pipeline_id = ?5 AND current_phase = ?6",
                params![
                    commit.new_phase,
                    state,
                    now,
                    completed_at,
                    commit.pipeline_id,
                    commit.expected_phase
                ],
            )
            .context("Failed to update pipeline")?;

        if changed == 0 {
            drop(tx);
            let actual_phase = self
                .get_pipeline(&commit.pipeline_id)?
                .map(|p| p.current_phase);
            return Ok(CommitOutcome::Conflict { actual_phase });
        }

        tx.execute(
            "INSERT INTO phase_transitions (pipeline_id, from_state, to_state, timestamp, reason)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                commit.pipeline_id,
                commit.expected_phase,
                commit.new_phase,
                now,
                commit.reason
            ],
        )
        .context("Failed to record phase transition")?;

        tx.commit().context("Failed to commit phase advance")?;

        let pipeline = self
            .get_pipeline(&commit.pipeline_id)?
            .context("Pipeline not found after commit")?;
        Ok(CommitOutcome::Committed(pipeline))
    }

    pub fn list_transitions(&self, pipeline_id: &str) -> Result<Vec<PhaseTransition>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, pipeline_id, from_state, to_state, timestamp, reason
                 FROM phase_transitions WHERE pipeline_id = ?1 ORDER BY id",
            )
            .context("Failed to prepare list_transitions")?;
        let rows = stmt
            .query_map(params![pipeline_id], |row| {
                Ok(PhaseTransition {
                    id: row.get(0)?,
                    pipeline_id: row.get(1)?,
                    from_state: row.get(2)?,
                    to_state: row.get(3)?,
                    timestamp: row.get(4)?,
                    reason: row.get(5)?,
                })
            })
            .context("Failed to query phase transitions")?;
        let mut transitions = Vec::new();
        for row in rows {
            transitions.push(row.context("Failed to read phase transition row")?);
        }
        Ok(transitions)
    }

    // ── Prompt usage ──────────────────────────────────────────────────

    pub fn record_usage(
        &self,
        pipeline_id: &str,
        prompt_id: &str,
        role_name: &str,
        phase_name: &str,
    ) -> Result<String> {
        let usage_id = new_id("pu");
        self.conn
            .execute(
                "INSERT INTO pipeline_prompt_usage (usage_id, pipeline_id, prompt_id, role_name, phase_name, used_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![usage_id, pipeline_id, prompt_id, role_name, phase_name, Utc::now()],
            )
            .context("Failed to insert prompt usage")?;
        Ok(usage_id)
    }

    pub fn list_usage(&self, pipeline_id: &str) -> Result<Vec<PromptUsage>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT usage_id, pipeline_id, prompt_id, role_name, phase_name, used_at
                 FROM pipeline_prompt_usage WHERE pipeline_id = ?1 ORDER BY used_at, rowid",
            )
            .context("Failed to prepare list_usage")?;
        let rows = stmt
            .query_map(params![pipeline_id], |row| {
                Ok(PromptUsage {
                    usage_id: row.get(0)?,
                    pipeline_id: row.get(1)?,
                    prompt_id: row.get(2)?,
                    role_name: row.get(3)?,
                    phase_name: row.get(4)?,
                    used_at: row.get(5)?,
                })
            })
            .context("Failed to query prompt usage")?;
        let mut usage = Vec::new();
        for row in rows {
            usage.push(row.context("Failed to read prompt usage row")?);
        }
        Ok(usage)
    }

    #[cfg(test)]
    pub(crate) fn execute_batch(&self, sql: &str) -> Result<()> {
        self.conn.execute_batch(sql).context("Failed to execute batch")
    }
}

fn read_role_prompt(row: &rusqlite::Row<'_>) -> rusqlite::Result<RolePrompt> {
    Ok(RolePrompt {
        prompt_id: row.get(0)?,
        role_name: row.get(1)?,
        version: row.get(2)?,
        bootstrap: row.get(3)?,
        instructions: row.get(4)?,
        is_active: row.get(5)?,
        created_at: row.get(6)?,
    })
}

/// Raw pipeline row; JSON columns are decoded in `into_pipeline`.
struct PipelineRow {
    pipeline_id: String,
    epic_id: String,
    current_phase: String,
    state: String,
    initial_context: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
}

impl PipelineRow {
    fn into_pipeline(self) -> Result<Pipeline> {
        let state: PipelineState = serde_json::from_str(&self.state)
            .with_context(|| format!("Corrupt state for pipeline {}", self.pipeline_id))?;
        let initial_context = self
            .initial_context
            .as_deref()
            .map(serde_json::from_str)
            .transpose()
            .with_context(|| {
                format!("Corrupt initial context for pipeline {}", self.pipeline_id)
            })?;
        Ok(Pipeline {
            pipeline_id: self.pipeline_id,
            epic_id: self.epic_id,
            current_phase: self.current_phase,
            state,
            initial_context,
            created_at: self.created_at,
            updated_at: self.updated_at,
            completed_at: self.completed_at,
        })
    }
}

/// Every store trait implemented over one `DbHandle`.
#[derive(Clone)]
pub struct SqliteStore {
    db: DbHandle,
}

impl SqliteStore {
    pub fn new(db: DbHandle) -> Self {
        Self { db }
    }

    /// Open the database file at `path`, creating and migrating it as needed.
    pub fn open(path: &Path) -> Result<Self> {
        let db = WorkbenchDb::new(path)
            .with_context(|| format!("Failed to open database at {}", path.display()))?;
        Ok(Self::new(DbHandle::new(db)))
    }

    pub fn handle(&self) -> &DbHandle {
        &self.db
    }
}

#[async_trait]
impl PhaseConfigRepository for SqliteStore {
    async fn get_by_phase_name(&self, phase_name: &str) -> Result<Option<PhaseConfig>> {
        let phase_name = phase_name.to_string();
        self.db.call(move |db| db.get_phase_config(&phase_name)).await
    }
}

#[async_trait]
impl RolePromptRepository for SqliteStore {
    async fn get_active_prompt(&self, role_name: &str) -> Result<Option<RolePrompt>> {
        let role_name = role_name.to_string();
        self.db.call(move |db| db.get_active_prompt(&role_name)).await
    }
}

#[async_trait]
impl PipelineStore for SqliteStore {
    async fn create_pipeline(
        &self,
        epic_id: &str,
        initial_context: Option<Value>,
        initial_phase: &str,
    ) -> Result<Pipeline> {
        let epic_id = epic_id.to_string();
        let initial_phase = initial_phase.to_string();
        self.db
            .call(move |db| db.create_pipeline(&epic_id, initial_context.as_ref(), &initial_phase))
            .await
    }

    async fn get_pipeline(&self, pipeline_id: &str) -> Result<Option<Pipeline>> {
        let pipeline_id = pipeline_id.to_string();
        self.db.call(move |db| db.get_pipeline(&pipeline_id)).await
    }

    async fn commit_advance(&self, commit: AdvanceCommit) -> Result<CommitOutcome> {
        self.db.call(move |db| db.commit_advance(&commit)).await
    }

    async fn list_transitions(&self, pipeline_id: &str) -> Result<Vec<PhaseTransition>> {
        let pipeline_id = pipeline_id.to_string();
        self.db.call(move |db| db.list_transitions(&pipeline_id)).await
    }
}

#[async_trait]
impl UsageRepository for SqliteStore {
    async fn record_usage(
        &self,
        pipeline_id: &str,
        prompt_id: &str,
        role_name: &str,
        phase_name: &str,
    ) -> Result<String> {
        let (pipeline_id, prompt_id, role_name, phase_name) = (
            pipeline_id.to_string(),
            prompt_id.to_string(),
            role_name.to_string(),
            phase_name.to_string(),
        );
        self.db
            .call(move |db| db.record_usage(&pipeline_id, &prompt_id, &role_name, &phase_name))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn db() -> WorkbenchDb {
        WorkbenchDb::new_in_memory().unwrap()
    }

    #[test]
    fn test_seed_default_phases_is_idempotent() {
        let db = db();
        assert_eq!(db.seed_default_phases().unwrap(), DEFAULT_PHASES.len());
        assert_eq!(db.seed_default_phases().unwrap(), 0);

        let pm = db.get_phase_config("pm_phase").unwrap().unwrap();
        assert_eq!(pm.role_name, "pm");
        assert_eq!(pm.artifact_type, "epic");
        assert_eq!(pm.next_phase.as_deref(), Some("arch_phase"));
        assert!(pm.is_active);

        let last = db.get_phase_config("commit_phase").unwrap().unwrap();
        assert!(last.next_phase.is_none());
    }

    #[test]
    fn test_upsert_phase_config_overwrites() {
        let db = db();
        db.seed_default_phases().unwrap();
        db.upsert_phase_config(&PhaseConfig {
            phase_name: "pm_phase".into(),
            role_name: "pm".into(),
            artifact_type: "epic".into(),
            next_phase: None,
            is_active: false,
        })
        .unwrap();
        let pm = db.get_phase_config("pm_phase").unwrap().unwrap();
        assert!(!pm.is_active);
        assert!(pm.next_phase.is_none());
        assert!(db.get_phase_config("nope").unwrap().is_none());
        assert_eq!(db.list_phase_configs().unwrap().len(), DEFAULT_PHASES.len());
    }

    #[test]
    fn test_activating_prompt_deactivates_previous_version() {
        let db = db();
        let v1 = db.insert_role_prompt("pm", "1", "boot", "do it", true).unwrap();
        let v2 = db.insert_role_prompt("pm", "2", "boot2", "do it better", true).unwrap();
        assert!(v1.prompt_id.starts_with("rp_"));

        let active = db.get_active_prompt("pm").unwrap().unwrap();
        assert_eq!(active.prompt_id, v2.prompt_id);
        let stored_v1 = db.get_role_prompt(&v1.prompt_id).unwrap().unwrap();
        assert!(!stored_v1.is_active);

        db.insert_role_prompt("pm", "3", "draft", "draft", false).unwrap();
        let active = db.get_active_prompt("pm").unwrap().unwrap();
        assert_eq!(active.version, "2");
        assert!(db.get_active_prompt("qa").unwrap().is_none());
        assert_eq!(db.list_role_prompts().unwrap().len(), 3);
    }

    #[test]
    fn test_create_and_get_pipeline() {
        let db = db();
        let ctx = json!({"epic_description": "Build auth"});
        let pipeline = db.create_pipeline("EPIC-1", Some(&ctx), "pm_phase").unwrap();
        assert!(pipeline.pipeline_id.starts_with("pip_"));
        assert_eq!(pipeline.current_phase, "pm_phase");
        assert_eq!(pipeline.epic_description(), "Build auth");
        assert!(pipeline.state.artifacts.is_empty());
        assert!(pipeline.completed_at.is_none());

        let loaded = db.get_pipeline(&pipeline.pipeline_id).unwrap().unwrap();
        assert_eq!(loaded.epic_id, "EPIC-1");
        assert!(db.get_pipeline("pip_missing").unwrap().is_none());
    }

    #[test]
    fn test_commit_advance_persists_state_phase_and_transition() {
        let db = db();
        let pipeline = db.create_pipeline("EPIC-1", None, "pm_phase").unwrap();
        let commit = AdvanceCommit {
            pipeline_id: pipeline.pipeline_id.clone(),
            expected_phase: "pm_phase".into(),
            new_phase: "arch_phase".into(),
            state: pipeline.state.with_artifact("epic", json!({"title": "T"})),
            reason: "Data-driven phase execution".into(),
        };
        let outcome = db.commit_advance(&commit).unwrap();
        let CommitOutcome::Committed(updated) = outcome else {
            panic!("Expected Committed");
        };
        assert_eq!(updated.current_phase, "arch_phase");
        assert_eq!(updated.state.artifacts["epic"], json!({"title": "T"}));
        assert!(updated.completed_at.is_none());

        let transitions = db.list_transitions(&pipeline.pipeline_id).unwrap();
        assert_eq!(transitions.len(), 1);
        assert_eq!(transitions[0].from_state, "pm_phase");
        assert_eq!(transitions[0].to_state, "arch_phase");
        assert_eq!(transitions[0].reason, "Data-driven phase execution");
    }

    #[test]
    fn test_commit_to_complete_sets_completed_at() {
        let db = db();
        let pipeline = db.create_pipeline("EPIC-1", None, "commit_phase").unwrap();
        let outcome = db
            .commit_advance(&AdvanceCommit {
                pipeline_id: pipeline.pipeline_id.clone(),
                expected_phase: "commit_phase".into(),
                new_phase: COMPLETE_PHASE.into(),
                state: pipeline.state.clone(),
                reason: "done".into(),
            })
            .unwrap();
        let CommitOutcome::Committed(updated) = outcome else {
            panic!("Expected Committed");
        };
        assert!(updated.is_complete());
        assert!(updated.completed_at.is_some());
    }

    #[test]
    fn test_commit_with_stale_phase_writes_nothing() {
        let db = db();
        let pipeline = db.create_pipeline("EPIC-1", None, "arch_phase").unwrap();
        let outcome = db
            .commit_advance(&AdvanceCommit {
                pipeline_id: pipeline.pipeline_id.clone(),
                expected_phase: "pm_phase".into(),
                new_phase: "arch_phase".into(),
                state: pipeline.state.with_artifact("epic", json!({})),
                reason: "stale".into(),
            })
            .unwrap();
        assert_eq!(
            outcome,
            CommitOutcome::Conflict {
                actual_phase: Some("arch_phase".into())
            }
        );
        let stored = db.get_pipeline(&pipeline.pipeline_id).unwrap().unwrap();
        assert!(stored.state.artifacts.is_empty());
        assert!(db.list_transitions(&pipeline.pipeline_id).unwrap().is_empty());
    }

    #[test]
    fn test_commit_for_missing_pipeline_is_conflict() {
        let db = db();
        let outcome = db
            .commit_advance(&AdvanceCommit {
                pipeline_id: "pip_ghost".into(),
                expected_phase: "pm_phase".into(),
                new_phase: "arch_phase".into(),
                state: PipelineState::default(),
                reason: "x".into(),
            })
            .unwrap();
        assert_eq!(outcome, CommitOutcome::Conflict { actual_phase: None });
    }

    #[test]
    fn test_failed_transition_insert_rolls_back_pipeline_update() {
        let db = db();
        let pipeline = db.create_pipeline("EPIC-1", None, "pm_phase").unwrap();
        db.execute_batch(
            "CREATE TRIGGER audit_down BEFORE INSERT ON phase_transitions
             BEGIN SELECT RAISE(ABORT, 'audit sink unavailable'); END;",
        )
        .unwrap();

        let result = db.commit_advance(&AdvanceCommit {
            pipeline_id: pipeline.pipeline_id.clone(),
            expected_phase: "pm_phase".into(),
            new_phase: "arch_phase".into(),
            state: pipeline.state.with_artifact("epic", json!({"title": "T"})),
            reason: "x".into(),
        });
        assert!(result.is_err());

        let stored = db.get_pipeline(&pipeline.pipeline_id).unwrap().unwrap();
        assert_eq!(stored.current_phase, "pm_phase");
        assert!(stored.state.artifacts.is_empty());
    }

    #[test]
    fn test_record_and_list_usage() {
        let db = db();
        let id = db.record_usage("pip_1", "rp_1", "pm", "pm_phase").unwrap();
        assert!(id.starts_with("pu_"));
        let usage = db.list_usage("pip_1").unwrap();
        assert_eq!(usage.len(), 1);
        assert_eq!(usage[0].prompt_id, "rp_1");
        assert_eq!(usage[0].phase_name, "pm_phase");
    }

    #[tokio::test]
    async fn test_sqlite_store_through_traits() {
        let store = SqliteStore::new(DbHandle::new(db()));
        store.handle().lock_sync().unwrap().seed_default_phases().unwrap();

        let config = store.get_by_phase_name("qa_phase").await.unwrap().unwrap();
        assert_eq!(config.artifact_type, "qa_report");

        let pipeline = store
            .create_pipeline("EPIC-2", Some(json!({"epic_description": "x"})), "pm_phase")
            .await
            .unwrap();
        let fetched = store.get_pipeline(&pipeline.pipeline_id).await.unwrap();
        assert_eq!(fetched.unwrap().epic_id, "EPIC-2");

        let usage_id = store
            .record_usage(&pipeline.pipeline_id, "rp_x", "pm", "pm_phase")
            .await
            .unwrap();
        assert!(usage_id.starts_with("pu_"));
        assert!(store.get_active_prompt("pm").await.unwrap().is_none());
    }
}
