//! SQLite repository.
//!
//! One database file holds every session. Tables:
//! - `sessions`, `agents`, `agent_capabilities`
//! - `messages`: `seq` is the autoincrement rowid and breaks timestamp ties
//! - `checkpoints`, `capabilities`, `proposals`
//!
//! Timestamps are stored as fixed-width RFC 3339 text (microseconds, `Z`) so
//! lexical order equals chronological order.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use parley_core::agent::{Agent, AgentUpdate, NewAgent};
use parley_core::capability::{Capability, CapabilityProposal, NewCapability, ProposalStatus};
use parley_core::checkpoint::SummaryCheckpoint;
use parley_core::error::StoreError;
use parley_core::message::{Message, NewMessage};
use parley_core::repository::Repository;
use parley_core::session::{NewSession, Session, SessionSettings, SessionStatus, TurnCommit};
use parley_core::template::{AgentTemplate, NewAgentTemplate};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow, SqliteSynchronous,
};
use sqlx::{Row, SqlitePool};
use std::path::Path;
use std::str::FromStr;
use tracing::{debug, info};
use uuid::Uuid;

type Result<T> = std::result::Result<T, StoreError>;

const SCHEMA: &[(&str, &str)] = &[
    (
        "sessions table",
        r#"
        CREATE TABLE IF NOT EXISTS sessions (
            id                 TEXT PRIMARY KEY,
            name               TEXT NOT NULL,
            turn_order         TEXT NOT NULL,
            memory_strategy    TEXT NOT NULL,
            window_size        INTEGER NOT NULL,
            status             TEXT NOT NULL,
            current_turn_index INTEGER NOT NULL DEFAULT 0,
            is_infinite        INTEGER NOT NULL DEFAULT 0,
            is_slow            INTEGER NOT NULL DEFAULT 0,
            router_model       TEXT NOT NULL,
            pending_approval   TEXT,
            run_lease          INTEGER NOT NULL DEFAULT 0,
            created_at         TEXT NOT NULL,
            updated_at         TEXT NOT NULL
        )
        "#,
    ),
    (
        "agents table",
        r#"
        CREATE TABLE IF NOT EXISTS agents (
            id            TEXT PRIMARY KEY,
            session_id    TEXT NOT NULL REFERENCES sessions(id) ON DELETE CASCADE,
            name          TEXT NOT NULL,
            model         TEXT NOT NULL,
            system_prompt TEXT NOT NULL,
            order_index   INTEGER NOT NULL,
            color         TEXT NOT NULL,
            created_at    TEXT NOT NULL
        )
        "#,
    ),
    (
        "agent_capabilities table",
        r#"
        CREATE TABLE IF NOT EXISTS agent_capabilities (
            agent_id   TEXT NOT NULL REFERENCES agents(id) ON DELETE CASCADE,
            capability TEXT NOT NULL,
            PRIMARY KEY (agent_id, capability)
        )
        "#,
    ),
    (
        "messages table",
        r#"
        CREATE TABLE IF NOT EXISTS messages (
            seq        INTEGER PRIMARY KEY AUTOINCREMENT,
            id         TEXT UNIQUE NOT NULL,
            session_id TEXT NOT NULL REFERENCES sessions(id) ON DELETE CASCADE,
            role       TEXT NOT NULL,
            agent_id   TEXT,
            content    TEXT NOT NULL,
            tool_name  TEXT,
            tool_args  TEXT,
            created_at TEXT NOT NULL
        )
        "#,
    ),
    (
        "messages index",
        "CREATE INDEX IF NOT EXISTS idx_messages_session_order ON messages(session_id, created_at, seq)",
    ),
    (
        "checkpoints table",
        r#"
        CREATE TABLE IF NOT EXISTS checkpoints (
            id            TEXT PRIMARY KEY,
            session_id    TEXT NOT NULL REFERENCES sessions(id) ON DELETE CASCADE,
            summary       TEXT NOT NULL,
            from_at       TEXT NOT NULL,
            from_seq      INTEGER NOT NULL,
            to_at         TEXT NOT NULL,
            to_seq        INTEGER NOT NULL,
            message_count INTEGER NOT NULL,
            created_at    TEXT NOT NULL
        )
        "#,
    ),
    (
        "capabilities table",
        r#"
        CREATE TABLE IF NOT EXISTS capabilities (
            id          TEXT PRIMARY KEY,
            name        TEXT UNIQUE NOT NULL,
            description TEXT NOT NULL,
            parameters  TEXT NOT NULL,
            code        TEXT NOT NULL,
            interpreter TEXT,
            builtin     INTEGER NOT NULL DEFAULT 0,
            created_at  TEXT NOT NULL
        )
        "#,
    ),
    (
        "proposals table",
        r#"
        CREATE TABLE IF NOT EXISTS proposals (
            id          TEXT PRIMARY KEY,
            session_id  TEXT NOT NULL,
            agent_id    TEXT NOT NULL,
            name        TEXT NOT NULL,
            description TEXT NOT NULL,
            parameters  TEXT NOT NULL,
            code        TEXT NOT NULL,
            interpreter TEXT,
            status      TEXT NOT NULL,
            created_at  TEXT NOT NULL,
            decided_at  TEXT
        )
        "#,
    ),
    (
        "agent templates table",
        r#"
        CREATE TABLE IF NOT EXISTS agent_templates (
            id            TEXT PRIMARY KEY,
            name          TEXT NOT NULL UNIQUE,
            model         TEXT NOT NULL,
            system_prompt TEXT NOT NULL,
            tool_ids      TEXT NOT NULL DEFAULT '[]',
            created_at    TEXT NOT NULL,
            updated_at    TEXT NOT NULL
        )
        "#,
    ),
];

/// A durable SQLite repository.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (or create) the database at `path`.
    ///
    /// Pass `":memory:"` for an in-process ephemeral database (useful for tests).
    pub async fn open(path: &str) -> Result<Self> {
        let in_memory = path.contains(":memory:");
        let base = if in_memory || path.starts_with("sqlite:") {
            SqliteConnectOptions::from_str(path)
                .map_err(|e| StoreError::Storage(format!("Invalid SQLite path: {e}")))?
        } else {
            if let Some(parent) = Path::new(path).parent().filter(|p| !p.as_os_str().is_empty()) {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| StoreError::Storage(format!("Cannot create {}: {e}", parent.display())))?;
            }
            SqliteConnectOptions::new().filename(path)
        };
        let options = base
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .pragma("foreign_keys", "ON");

        let pool = SqlitePoolOptions::new()
            .max_connections(if in_memory { 1 } else { 4 })
            .connect_with(options)
            .await
            .map_err(|e| StoreError::Storage(format!("Failed to open SQLite: {e}")))?;

        let store = Self { pool };
        store.run_migrations().await?;
        info!("SQLite store initialized at {path}");
        Ok(store)
    }

    /// Create from an existing pool (useful for testing).
    pub async fn from_pool(pool: SqlitePool) -> Result<Self> {
        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    async fn run_migrations(&self) -> Result<()> {
        for (what, sql) in SCHEMA {
            sqlx::query(*sql)
                .execute(&self.pool)
                .await
                .map_err(|e| StoreError::MigrationFailed(format!("{what}: {e}")))?;
        }
        debug!("SQLite migrations complete");
        Ok(())
    }

    async fn fetch_session(&self, id: &str) -> Result<Session> {
        self.get_session(id)
            .await?
            .ok_or_else(|| StoreError::not_found("session", id))
    }

    async fn ensure_idle(&self, session_id: &str) -> Result<()> {
        let session = self.fetch_session(session_id).await?;
        if session.run_lease {
            return Err(StoreError::SessionBusy(session_id.to_string()));
        }
        Ok(())
    }

    async fn name_taken(&self, session_id: &str, name: &str, except: &str) -> Result<bool> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS n FROM agents WHERE session_id = ?1 AND lower(name) = lower(?2) AND id != ?3",
        )
        .bind(session_id)
        .bind(name)
        .bind(except)
        .fetch_one(&self.pool)
        .await
        .map_err(query_failed("agent name check"))?;
        let n: i64 = get(&row, "n")?;
        Ok(n > 0)
    }

    async fn capabilities_of(&self, agent_id: &str) -> Result<Vec<String>> {
        let rows = sqlx::query(
            "SELECT capability FROM agent_capabilities WHERE agent_id = ?1 ORDER BY capability",
        )
        .bind(agent_id)
        .fetch_all(&self.pool)
        .await
        .map_err(query_failed("agent capabilities"))?;
        rows.iter().map(|r| get(r, "capability")).collect()
    }

    async fn hydrate_agent(&self, row: &SqliteRow) -> Result<Agent> {
        let id: String = get(row, "id")?;
        let capabilities = self.capabilities_of(&id).await?;
        Ok(Agent {
            session_id: get(row, "session_id")?,
            name: get(row, "name")?,
            model: get(row, "model")?,
            system_prompt: get(row, "system_prompt")?,
            order_index: get(row, "order_index")?,
            color: get(row, "color")?,
            capabilities,
            created_at: get_time(row, "created_at")?,
            id,
        })
    }

    async fn replace_capabilities(&self, agent_id: &str, names: &[String]) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(query_failed("begin"))?;
        sqlx::query("DELETE FROM agent_capabilities WHERE agent_id = ?1")
            .bind(agent_id)
            .execute(&mut *tx)
            .await
            .map_err(query_failed("clear agent capabilities"))?;
        for name in names {
            sqlx::query("INSERT OR IGNORE INTO agent_capabilities (agent_id, capability) VALUES (?1, ?2)")
                .bind(agent_id)
                .bind(name)
                .execute(&mut *tx)
                .await
                .map_err(query_failed("insert agent capability"))?;
        }
        tx.commit().await.map_err(query_failed("commit"))?;
        Ok(())
    }

    fn row_to_session(row: &SqliteRow) -> Result<Session> {
        Ok(Session {
            id: get(row, "id")?,
            name: get(row, "name")?,
            turn_order: get::<String>(row, "turn_order")?.parse()?,
            memory_strategy: get::<String>(row, "memory_strategy")?.parse()?,
            window_size: get::<i64>(row, "window_size")? as usize,
            status: get::<String>(row, "status")?.parse()?,
            current_turn_index: get::<i64>(row, "current_turn_index")? as u64,
            is_infinite: get(row, "is_infinite")?,
            is_slow: get(row, "is_slow")?,
            router_model: get(row, "router_model")?,
            pending_approval: get(row, "pending_approval")?,
            run_lease: get(row, "run_lease")?,
            created_at: get_time(row, "created_at")?,
            updated_at: get_time(row, "updated_at")?,
        })
    }

    fn row_to_message(row: &SqliteRow) -> Result<Message> {
        let tool_args: Option<String> = get(row, "tool_args")?;
        Ok(Message {
            id: get(row, "id")?,
            session_id: get(row, "session_id")?,
            seq: get(row, "seq")?,
            role: get::<String>(row, "role")?.parse()?,
            agent_id: get(row, "agent_id")?,
            content: get(row, "content")?,
            tool_name: get(row, "tool_name")?,
            tool_args: tool_args.map(|t| parse_json(&t)).transpose()?,
            created_at: get_time(row, "created_at")?,
        })
    }

    fn row_to_checkpoint(row: &SqliteRow) -> Result<SummaryCheckpoint> {
        Ok(SummaryCheckpoint {
            id: get(row, "id")?,
            session_id: get(row, "session_id")?,
            summary: get(row, "summary")?,
            from_at: get_time(row, "from_at")?,
            from_seq: get(row, "from_seq")?,
            to_at: get_time(row, "to_at")?,
            to_seq: get(row, "to_seq")?,
            message_count: get::<i64>(row, "message_count")? as usize,
            created_at: get_time(row, "created_at")?,
        })
    }

    fn row_to_capability(row: &SqliteRow) -> Result<Capability> {
        Ok(Capability {
            id: get(row, "id")?,
            name: get(row, "name")?,
            description: get(row, "description")?,
            parameters: parse_json(&get::<String>(row, "parameters")?)?,
            code: get(row, "code")?,
            interpreter: get(row, "interpreter")?,
            builtin: get(row, "builtin")?,
            created_at: get_time(row, "created_at")?,
        })
    }

    fn row_to_proposal(row: &SqliteRow) -> Result<CapabilityProposal> {
        let decided_at: Option<String> = get(row, "decided_at")?;
        Ok(CapabilityProposal {
            id: get(row, "id")?,
            session_id: get(row, "session_id")?,
            agent_id: get(row, "agent_id")?,
            name: get(row, "name")?,
            description: get(row, "description")?,
            parameters: parse_json(&get::<String>(row, "parameters")?)?,
            code: get(row, "code")?,
            interpreter: get(row, "interpreter")?,
            status: get::<String>(row, "status")?.parse()?,
            created_at: get_time(row, "created_at")?,
            decided_at: decided_at.map(|t| parse_time(&t)).transpose()?,
        })
    }

    fn row_to_template(row: &SqliteRow) -> Result<AgentTemplate> {
        let tool_ids: Vec<String> = serde_json::from_str(&get::<String>(row, "tool_ids")?)
            .map_err(|e| StoreError::Storage(format!("Corrupt template tool list: {e}")))?;
        Ok(AgentTemplate {
            id: get(row, "id")?,
            name: get(row, "name")?,
            model: get(row, "model")?,
            system_prompt: get(row, "system_prompt")?,
            tool_ids,
            created_at: get_time(row, "created_at")?,
            updated_at: get_time(row, "updated_at")?,
        })
    }
}

fn query_failed(what: &'static str) -> impl FnOnce(sqlx::Error) -> StoreError {
    move |e| StoreError::QueryFailed(format!("{what}: {e}"))
}

fn get<'r, T>(row: &'r SqliteRow, column: &str) -> Result<T>
where
    T: sqlx::Decode<'r, sqlx::Sqlite> + sqlx::Type<sqlx::Sqlite>,
{
    row.try_get(column)
        .map_err(|e| StoreError::QueryFailed(format!("{column} column: {e}")))
}

fn get_time(row: &SqliteRow, column: &str) -> Result<DateTime<Utc>> {
    parse_time(&get::<String>(row, column)?)
}

fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

fn fmt_time(t: &DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_time(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::Invalid(format!("timestamp '{s}': {e}")))
}

fn parse_json(s: &str) -> Result<serde_json::Value> {
    serde_json::from_str(s).map_err(|e| StoreError::Invalid(format!("stored JSON: {e}")))
}

fn is_unique_violation(e: &sqlx::Error) -> bool {
    e.as_database_error().is_some_and(|d| d.is_unique_violation())
}

#[async_trait]
impl Repository for SqliteStore {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn create_session(&self, new: NewSession) -> Result<Session> {
        new.validate()?;
        let mut session = new.into_session();
        session.created_at = now();
        session.updated_at = session.created_at;

        sqlx::query(
            r#"
            INSERT INTO sessions (id, name, turn_order, memory_strategy, window_size, status,
                current_turn_index, is_infinite, is_slow, router_model, pending_approval,
                run_lease, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, NULL, 0, ?11, ?11)
            "#,
        )
        .bind(&session.id)
        .bind(&session.name)
        .bind(session.turn_order.as_str())
        .bind(session.memory_strategy.as_str())
        .bind(session.window_size as i64)
        .bind(session.status.as_str())
        .bind(session.current_turn_index as i64)
        .bind(session.is_infinite)
        .bind(session.is_slow)
        .bind(&session.router_model)
        .bind(fmt_time(&session.created_at))
        .execute(&self.pool)
        .await
        .map_err(query_failed("insert session"))?;

        debug!(session_id = %session.id, "Created session");
        Ok(session)
    }

    async fn get_session(&self, id: &str) -> Result<Option<Session>> {
        let row = sqlx::query("SELECT * FROM sessions WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(query_failed("select session"))?;
        row.as_ref().map(Self::row_to_session).transpose()
    }

    async fn list_sessions(&self) -> Result<Vec<Session>> {
        let rows = sqlx::query("SELECT * FROM sessions ORDER BY created_at DESC")
            .fetch_all(&self.pool)
            .await
            .map_err(query_failed("list sessions"))?;
        rows.iter().map(Self::row_to_session).collect()
    }

    async fn update_session_settings(&self, id: &str, settings: SessionSettings) -> Result<Session> {
        let mut session = self.fetch_session(id).await?;
        if session.run_lease {
            return Err(StoreError::SessionBusy(id.to_string()));
        }
        settings.apply_to(&mut session)?;
        session.updated_at = now();

        let result = sqlx::query(
            r#"
            UPDATE sessions SET turn_order = ?2, memory_strategy = ?3, window_size = ?4,
                is_infinite = ?5, is_slow = ?6, router_model = ?7, updated_at = ?8
            WHERE id = ?1 AND run_lease = 0
            "#,
        )
        .bind(id)
        .bind(session.turn_order.as_str())
        .bind(session.memory_strategy.as_str())
        .bind(session.window_size as i64)
        .bind(session.is_infinite)
        .bind(session.is_slow)
        .bind(&session.router_model)
        .bind(fmt_time(&session.updated_at))
        .execute(&self.pool)
        .await
        .map_err(query_failed("update session"))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::SessionBusy(id.to_string()));
        }
        Ok(session)
    }

    async fn commit_turn(&self, id: &str, commit: TurnCommit) -> Result<(Session, Message)> {
        let reply = commit.reply;
        if reply.session_id != id {
            return Err(StoreError::Invalid(format!("reply belongs to session {}", reply.session_id)));
        }
        self.fetch_session(id).await?;

        let mut tx = self.pool.begin().await.map_err(query_failed("begin"))?;
        let result = sqlx::query(
            r#"
            UPDATE sessions SET current_turn_index = current_turn_index + 1, status = ?2, updated_at = ?3
            WHERE id = ?1 AND current_turn_index = ?4
            "#,
        )
        .bind(id)
        .bind(commit.status.as_str())
        .bind(fmt_time(&now()))
        .bind(commit.expected_index as i64)
        .execute(&mut *tx)
        .await
        .map_err(query_failed("commit turn"))?;
        if result.rows_affected() == 0 {
            // Dropping the transaction rolls it back.
            return Err(StoreError::Conflict {
                entity: "turn",
                key: format!("{id}@{}", commit.expected_index),
            });
        }

        let message_id = Uuid::new_v4().to_string();
        let created_at = now();
        let tool_args = reply.tool_args.as_ref().map(|v| v.to_string());
        let inserted = sqlx::query(
            r#"
            INSERT INTO messages (id, session_id, role, agent_id, content, tool_name, tool_args, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
        )
        .bind(&message_id)
        .bind(&reply.session_id)
        .bind(reply.role.as_str())
        .bind(&reply.agent_id)
        .bind(&reply.content)
        .bind(&reply.tool_name)
        .bind(&tool_args)
        .bind(fmt_time(&created_at))
        .execute(&mut *tx)
        .await
        .map_err(query_failed("insert reply"))?;
        tx.commit().await.map_err(query_failed("commit"))?;

        let message = reply.into_message(message_id, inserted.last_insert_rowid(), created_at);
        Ok((self.fetch_session(id).await?, message))
    }

    async fn set_session_status(&self, id: &str, status: SessionStatus) -> Result<Session> {
        sqlx::query("UPDATE sessions SET status = ?2, updated_at = ?3 WHERE id = ?1")
            .bind(id)
            .bind(status.as_str())
            .bind(fmt_time(&now()))
            .execute(&self.pool)
            .await
            .map_err(query_failed("set status"))?;
        self.fetch_session(id).await
    }

    async fn acquire_run_lease(&self, id: &str) -> Result<bool> {
        let result = sqlx::query("UPDATE sessions SET run_lease = 1 WHERE id = ?1 AND run_lease = 0")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(query_failed("acquire lease"))?;
        if result.rows_affected() == 1 {
            return Ok(true);
        }
        self.fetch_session(id).await?;
        Ok(false)
    }

    async fn release_run_lease(&self, id: &str) -> Result<()> {
        let result = sqlx::query("UPDATE sessions SET run_lease = 0 WHERE id = ?1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(query_failed("release lease"))?;
        if result.rows_affected() == 0 {
            return Err(StoreError::not_found("session", id));
        }
        Ok(())
    }

    async fn set_pending_approval(&self, id: &str, proposal_id: Option<&str>) -> Result<()> {
        let result = sqlx::query("UPDATE sessions SET pending_approval = ?2, updated_at = ?3 WHERE id = ?1")
            .bind(id)
            .bind(proposal_id)
            .bind(fmt_time(&now()))
            .execute(&self.pool)
            .await
            .map_err(query_failed("set pending approval"))?;
        if result.rows_affected() == 0 {
            return Err(StoreError::not_found("session", id));
        }
        Ok(())
    }

    async fn create_agent(&self, session_id: &str, new: NewAgent) -> Result<Agent> {
        self.ensure_idle(session_id).await?;
        if new.name.trim().is_empty() {
            return Err(StoreError::Invalid("agent name must not be empty".into()));
        }
        if self.name_taken(session_id, &new.name, "").await? {
            return Err(StoreError::Conflict {
                entity: "agent",
                key: new.name,
            });
        }

        let row = sqlx::query("SELECT COUNT(*) AS n FROM agents WHERE session_id = ?1")
            .bind(session_id)
            .fetch_one(&self.pool)
            .await
            .map_err(query_failed("count agents"))?;
        let existing: i64 = get(&row, "n")?;

        let mut agent = new.into_agent(session_id, existing as usize);
        agent.created_at = now();

        sqlx::query(
            r#"
            INSERT INTO agents (id, session_id, name, model, system_prompt, order_index, color, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
        )
        .bind(&agent.id)
        .bind(&agent.session_id)
        .bind(&agent.name)
        .bind(&agent.model)
        .bind(&agent.system_prompt)
        .bind(agent.order_index)
        .bind(&agent.color)
        .bind(fmt_time(&agent.created_at))
        .execute(&self.pool)
        .await
        .map_err(query_failed("insert agent"))?;

        self.replace_capabilities(&agent.id, &agent.capabilities).await?;
        debug!(session_id, agent = %agent.name, "Created agent");
        Ok(agent)
    }

    async fn get_agent(&self, id: &str) -> Result<Option<Agent>> {
        let row = sqlx::query("SELECT * FROM agents WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(query_failed("select agent"))?;
        match row {
            Some(row) => Ok(Some(self.hydrate_agent(&row).await?)),
            None => Ok(None),
        }
    }

    async fn list_agents(&self, session_id: &str) -> Result<Vec<Agent>> {
        let rows = sqlx::query("SELECT * FROM agents WHERE session_id = ?1 ORDER BY order_index, created_at")
            .bind(session_id)
            .fetch_all(&self.pool)
            .await
            .map_err(query_failed("list agents"))?;
        let mut agents = Vec::with_capacity(rows.len());
        for row in &rows {
            agents.push(self.hydrate_agent(row).await?);
        }
        Ok(agents)
    }

    async fn update_agent(&self, id: &str, update: AgentUpdate) -> Result<Agent> {
        let mut agent = self
            .get_agent(id)
            .await?
            .ok_or_else(|| StoreError::not_found("agent", id))?;
        self.ensure_idle(&agent.session_id).await?;
        if let Some(name) = &update.name {
            if self.name_taken(&agent.session_id, name, id).await? {
                return Err(StoreError::Conflict {
                    entity: "agent",
                    key: name.clone(),
                });
            }
        }

        let capabilities_changed = update.capabilities.is_some();
        update.apply_to(&mut agent);

        sqlx::query(
            r#"
            UPDATE agents SET name = ?2, model = ?3, system_prompt = ?4, order_index = ?5, color = ?6
            WHERE id = ?1
            "#,
        )
        .bind(id)
        .bind(&agent.name)
        .bind(&agent.model)
        .bind(&agent.system_prompt)
        .bind(agent.order_index)
        .bind(&agent.color)
        .execute(&self.pool)
        .await
        .map_err(query_failed("update agent"))?;

        if capabilities_changed {
            self.replace_capabilities(id, &agent.capabilities).await?;
        }
        Ok(agent)
    }

    async fn grant_capability(&self, agent_id: &str, capability: &str) -> Result<()> {
        if self.get_agent(agent_id).await?.is_none() {
            return Err(StoreError::not_found("agent", agent_id));
        }
        sqlx::query("INSERT OR IGNORE INTO agent_capabilities (agent_id, capability) VALUES (?1, ?2)")
            .bind(agent_id)
            .bind(capability)
            .execute(&self.pool)
            .await
            .map_err(query_failed("grant capability"))?;
        Ok(())
    }

    async fn append_message(&self, new: NewMessage) -> Result<Message> {
        if self.get_session(&new.session_id).await?.is_none() {
            return Err(StoreError::not_found("session", new.session_id));
        }
        let id = Uuid::new_v4().to_string();
        let created_at = now();
        let tool_args = new.tool_args.as_ref().map(|v| v.to_string());

        let result = sqlx::query(
            r#"
            INSERT INTO messages (id, session_id, role, agent_id, content, tool_name, tool_args, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
        )
        .bind(&id)
        .bind(&new.session_id)
        .bind(new.role.as_str())
        .bind(&new.agent_id)
        .bind(&new.content)
        .bind(&new.tool_name)
        .bind(&tool_args)
        .bind(fmt_time(&created_at))
        .execute(&self.pool)
        .await
        .map_err(query_failed("insert message"))?;

        Ok(new.into_message(id, result.last_insert_rowid(), created_at))
    }

    async fn list_messages(&self, session_id: &str) -> Result<Vec<Message>> {
        let rows = sqlx::query("SELECT * FROM messages WHERE session_id = ?1 ORDER BY created_at, seq")
            .bind(session_id)
            .fetch_all(&self.pool)
            .await
            .map_err(query_failed("list messages"))?;
        rows.iter().map(Self::row_to_message).collect()
    }

    async fn recent_messages(&self, session_id: &str, limit: usize) -> Result<Vec<Message>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM (
                SELECT * FROM messages WHERE session_id = ?1
                ORDER BY created_at DESC, seq DESC LIMIT ?2
            ) ORDER BY created_at, seq
            "#,
        )
        .bind(session_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(query_failed("recent messages"))?;
        rows.iter().map(Self::row_to_message).collect()
    }

    async fn create_checkpoint(&self, checkpoint: SummaryCheckpoint) -> Result<()> {
        let existing = self.list_checkpoints(&checkpoint.session_id).await?;
        if existing.iter().any(|c| c.overlaps(&checkpoint)) {
            return Err(StoreError::Conflict {
                entity: "checkpoint",
                key: checkpoint.id,
            });
        }

        sqlx::query(
            r#"
            INSERT INTO checkpoints (id, session_id, summary, from_at, from_seq, to_at, to_seq,
                message_count, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
        )
        .bind(&checkpoint.id)
        .bind(&checkpoint.session_id)
        .bind(&checkpoint.summary)
        .bind(fmt_time(&checkpoint.from_at))
        .bind(checkpoint.from_seq)
        .bind(fmt_time(&checkpoint.to_at))
        .bind(checkpoint.to_seq)
        .bind(checkpoint.message_count as i64)
        .bind(fmt_time(&checkpoint.created_at))
        .execute(&self.pool)
        .await
        .map_err(query_failed("insert checkpoint"))?;
        Ok(())
    }

    async fn list_checkpoints(&self, session_id: &str) -> Result<Vec<SummaryCheckpoint>> {
        let rows = sqlx::query("SELECT * FROM checkpoints WHERE session_id = ?1 ORDER BY from_at, from_seq")
            .bind(session_id)
            .fetch_all(&self.pool)
            .await
            .map_err(query_failed("list checkpoints"))?;
        rows.iter().map(Self::row_to_checkpoint).collect()
    }

    async fn create_capability(&self, new: NewCapability) -> Result<Capability> {
        let mut capability = new.into_capability();
        capability.created_at = now();

        sqlx::query(
            r#"
            INSERT INTO capabilities (id, name, description, parameters, code, interpreter, builtin, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
        )
        .bind(&capability.id)
        .bind(&capability.name)
        .bind(&capability.description)
        .bind(capability.parameters.to_string())
        .bind(&capability.code)
        .bind(&capability.interpreter)
        .bind(capability.builtin)
        .bind(fmt_time(&capability.created_at))
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                StoreError::Conflict {
                    entity: "capability",
                    key: capability.name.clone(),
                }
            } else {
                StoreError::QueryFailed(format!("insert capability: {e}"))
            }
        })?;

        Ok(capability)
    }

    async fn get_capability(&self, name: &str) -> Result<Option<Capability>> {
        let row = sqlx::query("SELECT * FROM capabilities WHERE name = ?1")
            .bind(name)
            .fetch_optional(&self.pool)
            .await
            .map_err(query_failed("select capability"))?;
        row.as_ref().map(Self::row_to_capability).transpose()
    }

    async fn list_capabilities(&self) -> Result<Vec<Capability>> {
        let rows = sqlx::query("SELECT * FROM capabilities ORDER BY name")
            .fetch_all(&self.pool)
            .await
            .map_err(query_failed("list capabilities"))?;
        rows.iter().map(Self::row_to_capability).collect()
    }

    async fn delete_capability(&self, name: &str) -> Result<bool> {
        match self.get_capability(name).await? {
            None => return Ok(false),
            Some(c) if c.builtin => return Err(StoreError::BuiltinProtected(name.to_string())),
            Some(_) => {}
        }

        let mut tx = self.pool.begin().await.map_err(query_failed("begin"))?;
        sqlx::query("DELETE FROM agent_capabilities WHERE capability = ?1")
            .bind(name)
            .execute(&mut *tx)
            .await
            .map_err(query_failed("detach capability"))?;
        let result = sqlx::query("DELETE FROM capabilities WHERE name = ?1 AND builtin = 0")
            .bind(name)
            .execute(&mut *tx)
            .await
            .map_err(query_failed("delete capability"))?;
        tx.commit().await.map_err(query_failed("commit"))?;

        Ok(result.rows_affected() > 0)
    }

    async fn create_proposal(&self, proposal: CapabilityProposal) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO proposals (id, session_id, agent_id, name, description, parameters, code,
                interpreter, status, created_at, decided_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
            "#,
        )
        .bind(&proposal.id)
        .bind(&proposal.session_id)
        .bind(&proposal.agent_id)
        .bind(&proposal.name)
        .bind(&proposal.description)
        .bind(proposal.parameters.to_string())
        .bind(&proposal.code)
        .bind(&proposal.interpreter)
        .bind(proposal.status.as_str())
        .bind(fmt_time(&proposal.created_at))
        .bind(proposal.decided_at.as_ref().map(fmt_time))
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                StoreError::Conflict {
                    entity: "proposal",
                    key: proposal.id.clone(),
                }
            } else {
                StoreError::QueryFailed(format!("insert proposal: {e}"))
            }
        })?;
        Ok(())
    }

    async fn get_proposal(&self, id: &str) -> Result<Option<CapabilityProposal>> {
        let row = sqlx::query("SELECT * FROM proposals WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(query_failed("select proposal"))?;
        row.as_ref().map(Self::row_to_proposal).transpose()
    }

    async fn list_proposals(&self, status: Option<ProposalStatus>) -> Result<Vec<CapabilityProposal>> {
        let rows = match status {
            Some(status) => {
                sqlx::query("SELECT * FROM proposals WHERE status = ?1 ORDER BY created_at")
                    .bind(status.as_str())
                    .fetch_all(&self.pool)
                    .await
            }
            None => {
                sqlx::query("SELECT * FROM proposals ORDER BY created_at")
                    .fetch_all(&self.pool)
                    .await
            }
        }
        .map_err(query_failed("list proposals"))?;
        rows.iter().map(Self::row_to_proposal).collect()
    }

    async fn decide_proposal(&self, id: &str, status: ProposalStatus) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE proposals SET status = ?2, decided_at = ?3 WHERE id = ?1 AND status = 'pending'",
        )
        .bind(id)
        .bind(status.as_str())
        .bind(fmt_time(&now()))
        .execute(&self.pool)
        .await
        .map_err(query_failed("decide proposal"))?;

        if result.rows_affected() == 1 {
            return Ok(true);
        }
        if self.get_proposal(id).await?.is_none() {
            return Err(StoreError::not_found("proposal", id));
        }
        Ok(false)
    }

    async fn upsert_template(&self, new: NewAgentTemplate) -> Result<AgentTemplate> {
        new.validate()?;
        let existing = self.get_template(&new.name).await?;
        let template = new.into_template(existing.as_ref());
        let tool_ids = serde_json::to_string(&template.tool_ids)
            .map_err(|e| StoreError::Storage(format!("Cannot encode tool list: {e}")))?;

        sqlx::query(
            r#"
            INSERT INTO agent_templates (id, name, model, system_prompt, tool_ids, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ON CONFLICT(name) DO UPDATE SET
                model = excluded.model,
                system_prompt = excluded.system_prompt,
                tool_ids = excluded.tool_ids,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&template.id)
        .bind(&template.name)
        .bind(&template.model)
        .bind(&template.system_prompt)
        .bind(&tool_ids)
        .bind(fmt_time(&template.created_at))
        .bind(fmt_time(&template.updated_at))
        .execute(&self.pool)
        .await
        .map_err(query_failed("upsert template"))?;

        self.get_template(&template.name)
            .await?
            .ok_or_else(|| StoreError::not_found("template", template.name))
    }

    async fn get_template(&self, name: &str) -> Result<Option<AgentTemplate>> {
        let row = sqlx::query("SELECT * FROM agent_templates WHERE name = ?1")
            .bind(name.trim())
            .fetch_optional(&self.pool)
            .await
            .map_err(query_failed("get template"))?;
        row.as_ref().map(Self::row_to_template).transpose()
    }

    async fn list_templates(&self) -> Result<Vec<AgentTemplate>> {
        let rows = sqlx::query("SELECT * FROM agent_templates ORDER BY name")
            .fetch_all(&self.pool)
            .await
            .map_err(query_failed("list templates"))?;
        rows.iter().map(Self::row_to_template).collect()
    }

    async fn delete_template(&self, name: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM agent_templates WHERE name = ?1")
            .bind(name.trim())
            .execute(&self.pool)
            .await
            .map_err(query_failed("delete template"))?;
        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conformance;

    async fn test_store() -> SqliteStore {
        SqliteStore::open(":memory:").await.unwrap()
    }

    #[tokio::test]
    async fn sessions_and_leases() {
        conformance::sessions_and_leases(&test_store().await).await;
    }

    #[tokio::test]
    async fn turn_commit_is_compare_and_set() {
        conformance::turn_commit_is_compare_and_set(&test_store().await).await;
    }

    #[tokio::test]
    async fn agents_are_ordered_and_locked_while_running() {
        conformance::agents_are_ordered_and_locked_while_running(&test_store().await).await;
    }

    #[tokio::test]
    async fn messages_keep_transcript_order() {
        conformance::messages_keep_transcript_order(&test_store().await).await;
    }

    #[tokio::test]
    async fn sessions_are_isolated() {
        conformance::sessions_are_isolated(&test_store().await).await;
    }

    #[tokio::test]
    async fn checkpoints_reject_overlap() {
        conformance::checkpoints_reject_overlap(&test_store().await).await;
    }

    #[tokio::test]
    async fn capabilities_protect_builtins() {
        conformance::capabilities_protect_builtins(&test_store().await).await;
    }

    #[tokio::test]
    async fn proposals_decide_once() {
        conformance::proposals_decide_once(&test_store().await).await;
    }

    #[tokio::test]
    async fn templates_upsert_by_name() {
        conformance::templates_upsert_by_name(&test_store().await).await;
    }

    #[tokio::test]
    async fn data_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("parley.db");
        let path = path.to_str().unwrap();

        let session_id = {
            let store = SqliteStore::open(path).await.unwrap();
            let session = store.create_session(NewSession::named("durable")).await.unwrap();
            store
                .append_message(NewMessage::human(&session.id, "still here"))
                .await
                .unwrap();
            store.acquire_run_lease(&session.id).await.unwrap();
            session.id
        };

        let store = SqliteStore::open(path).await.unwrap();
        let session = store.get_session(&session_id).await.unwrap().unwrap();
        assert_eq!(session.name, "durable");
        assert!(session.run_lease);
        let messages = store.list_messages(&session_id).await.unwrap();
        assert_eq!(messages[0].content, "still here");
    }

    #[test]
    fn timestamps_sort_lexically() {
        let early = DateTime::parse_from_rfc3339("2026-01-01T00:00:00.5Z").unwrap().with_timezone(&Utc);
        let late = DateTime::parse_from_rfc3339("2026-01-01T00:00:01Z").unwrap().with_timezone(&Utc);
        assert!(fmt_time(&early) < fmt_time(&late));
        assert_eq!(parse_time(&fmt_time(&early)).unwrap(), early);
    }
}
