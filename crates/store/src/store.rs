//! The persistence gateway — the only component that issues SQL.
//!
//! Every write is a single statement or a short transaction; nothing
//! holds a transaction across an await point into another service.
//! Failures are classified into `PersistenceUnavailable` (retryable:
//! pool, network, io) and `PersistenceConflict` (caller bug: constraint
//! violations, illegal state transitions).

use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::Row;
use uuid::Uuid;

use sw_domain::cron::{CronEntry, CronExecution, CronOutcome, CronSessionMode};
use sw_domain::error::{Error, Result};
use sw_domain::llm::{ModelUsage, Role};
use sw_domain::session::{MessageRecord, SessionRecord, SessionStatus, SessionType};

use crate::hash::content_hash;

/// LLM call metadata attached to an assistant message on append.
#[derive(Debug, Clone)]
pub struct AppendMeta {
    pub model: String,
    pub input_tokens: i32,
    pub output_tokens: i32,
    pub cost_usd: f64,
    pub latency_ms: i64,
    pub finish_reason: Option<String>,
    pub tool_calls: Option<serde_json::Value>,
}

/// Per-agent session status counts, for the pool status endpoint.
#[derive(Debug, Clone, serde::Serialize)]
pub struct AgentSessionStat {
    pub agent_id: String,
    pub status: SessionStatus,
    pub count: i64,
}

pub struct Store {
    pool: PgPool,
}

impl Store {
    /// Connect and run embedded migrations.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(std::time::Duration::from_secs(5))
            .connect(database_url)
            .await
            .map_err(|e| Error::PersistenceUnavailable(e.to_string()))?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| Error::PersistenceUnavailable(format!("migrations: {e}")))?;

        Ok(Self { pool })
    }

    /// Wrap an existing pool (tests).
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Build without connecting; every operation fails with
    /// `PersistenceUnavailable` until the database is reachable. No
    /// migrations are run.
    pub fn connect_lazy(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(2)
            .acquire_timeout(std::time::Duration::from_secs(2))
            .connect_lazy(database_url)
            .map_err(|e| Error::PersistenceUnavailable(e.to_string()))?;
        Ok(Self { pool })
    }

    // ── Sessions ───────────────────────────────────────────────────

    /// Create a session. A supplied parent must exist and be active.
    pub async fn create_session(
        &self,
        agent_id: &str,
        session_type: SessionType,
        parent: Option<Uuid>,
        metadata: serde_json::Value,
    ) -> Result<Uuid> {
        let mut tx = self.pool.begin().await.map_err(map_err)?;

        if let Some(parent_id) = parent {
            let status: Option<String> =
                sqlx::query_scalar("SELECT status FROM sessions WHERE id = $1")
                    .bind(parent_id)
                    .fetch_optional(&mut *tx)
                    .await
                    .map_err(map_err)?;
            match status.as_deref() {
                Some("active") => {}
                Some(other) => {
                    return Err(Error::PersistenceConflict(format!(
                        "parent session {parent_id} is {other}, not active"
                    )));
                }
                None => {
                    return Err(Error::PersistenceConflict(format!(
                        "parent session {parent_id} does not exist"
                    )));
                }
            }
        }

        let id = Uuid::new_v4();
        sqlx::query(
            "INSERT INTO sessions (id, agent_id, session_type, status, parent_session_id, metadata)
             VALUES ($1, $2, $3, 'active', $4, $5)",
        )
        .bind(id)
        .bind(agent_id)
        .bind(session_type.as_str())
        .bind(parent)
        .bind(&metadata)
        .execute(&mut *tx)
        .await
        .map_err(map_err)?;

        tx.commit().await.map_err(map_err)?;
        Ok(id)
    }

    pub async fn get_session(&self, id: Uuid) -> Result<Option<SessionRecord>> {
        let row = sqlx::query(
            "SELECT id, agent_id, session_type, status, parent_session_id,
                    external_session_id, metadata, input_tokens, output_tokens,
                    cost_usd, created_at, ended_at
             FROM sessions WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_err)?;

        row.map(session_from_row).transpose()
    }

    /// Append a message, idempotent on `(session_id, content_hash)`.
    ///
    /// Duplicate appends return the existing message id and do not touch
    /// the session totals. Appending to a terminal session fails with
    /// `SessionClosed`. Assistant messages must carry `meta` so the
    /// model and token counts are never NULL.
    pub async fn append_message(
        &self,
        session_id: Uuid,
        role: Role,
        content: &str,
        meta: Option<&AppendMeta>,
    ) -> Result<Uuid> {
        if role == Role::Assistant && meta.is_none() {
            return Err(Error::PersistenceConflict(
                "assistant message without model/usage metadata".into(),
            ));
        }

        let hash = content_hash(role, content);
        let mut tx = self.pool.begin().await.map_err(map_err)?;

        // Serialize writers per session and check the status under lock.
        let status: Option<String> =
            sqlx::query_scalar("SELECT status FROM sessions WHERE id = $1 FOR UPDATE")
                .bind(session_id)
                .fetch_optional(&mut *tx)
                .await
                .map_err(map_err)?;
        match status.as_deref() {
            Some("active") => {}
            Some(_) => return Err(Error::SessionClosed(session_id)),
            None => {
                return Err(Error::PersistenceConflict(format!(
                    "session {session_id} does not exist"
                )));
            }
        }

        let id = Uuid::new_v4();
        let inserted: Option<Uuid> = sqlx::query_scalar(
            "INSERT INTO messages (id, session_id, role, content, content_hash,
                                   model, input_tokens, output_tokens, cost_usd,
                                   latency_ms, finish_reason, tool_calls)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
             ON CONFLICT (session_id, content_hash) DO NOTHING
             RETURNING id",
        )
        .bind(id)
        .bind(session_id)
        .bind(role.as_str())
        .bind(content)
        .bind(&hash)
        .bind(meta.map(|m| m.model.as_str()))
        .bind(meta.map(|m| m.input_tokens))
        .bind(meta.map(|m| m.output_tokens))
        .bind(meta.map(|m| m.cost_usd))
        .bind(meta.map(|m| m.latency_ms))
        .bind(meta.and_then(|m| m.finish_reason.as_deref()))
        .bind(meta.and_then(|m| m.tool_calls.as_ref()))
        .fetch_optional(&mut *tx)
        .await
        .map_err(map_err)?;

        let message_id = match inserted {
            Some(new_id) => {
                if let Some(m) = meta {
                    sqlx::query(
                        "UPDATE sessions
                         SET input_tokens = input_tokens + $2,
                             output_tokens = output_tokens + $3,
                             cost_usd = cost_usd + $4
                         WHERE id = $1",
                    )
                    .bind(session_id)
                    .bind(m.input_tokens as i64)
                    .bind(m.output_tokens as i64)
                    .bind(m.cost_usd)
                    .execute(&mut *tx)
                    .await
                    .map_err(map_err)?;
                }
                new_id
            }
            None => {
                // Coalesced duplicate: hand back the original id.
                sqlx::query_scalar(
                    "SELECT id FROM messages WHERE session_id = $1 AND content_hash = $2",
                )
                .bind(session_id)
                .bind(&hash)
                .fetch_one(&mut *tx)
                .await
                .map_err(map_err)?
            }
        };

        tx.commit().await.map_err(map_err)?;
        Ok(message_id)
    }

    pub async fn list_messages(&self, session_id: Uuid) -> Result<Vec<MessageRecord>> {
        let rows = sqlx::query(
            "SELECT id, session_id, role, content, content_hash, model,
                    input_tokens, output_tokens, cost_usd, latency_ms,
                    finish_reason, tool_calls, created_at
             FROM messages WHERE session_id = $1
             ORDER BY created_at, id",
        )
        .bind(session_id)
        .fetch_all(&self.pool)
        .await
        .map_err(map_err)?;

        rows.into_iter().map(message_from_row).collect()
    }

    /// End a session. `active -> ended | failed` only. Repeating the
    /// same terminal transition is a no-op; a different one conflicts.
    pub async fn end_session(&self, id: Uuid, status: SessionStatus) -> Result<()> {
        if !status.is_terminal() {
            return Err(Error::PersistenceConflict(
                "end_session requires a terminal status".into(),
            ));
        }

        let updated = sqlx::query(
            "UPDATE sessions SET status = $2, ended_at = now()
             WHERE id = $1 AND status = 'active'",
        )
        .bind(id)
        .bind(status.as_str())
        .execute(&self.pool)
        .await
        .map_err(map_err)?
        .rows_affected();

        if updated == 1 {
            return Ok(());
        }

        let current: Option<String> =
            sqlx::query_scalar("SELECT status FROM sessions WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await
                .map_err(map_err)?;
        match current.as_deref() {
            Some(s) if s == status.as_str() => Ok(()), // idempotent
            Some(other) => Err(Error::PersistenceConflict(format!(
                "session {id} already {other}"
            ))),
            None => Err(Error::PersistenceConflict(format!(
                "session {id} does not exist"
            ))),
        }
    }

    /// Sessions still active whose parent is the given session.
    pub async fn active_children(&self, parent_id: Uuid) -> Result<Vec<SessionRecord>> {
        let rows = sqlx::query(
            "SELECT id, agent_id, session_type, status, parent_session_id,
                    external_session_id, metadata, input_tokens, output_tokens,
                    cost_usd, created_at, ended_at
             FROM sessions WHERE parent_session_id = $1 AND status = 'active'",
        )
        .bind(parent_id)
        .fetch_all(&self.pool)
        .await
        .map_err(map_err)?;
        rows.into_iter().map(session_from_row).collect()
    }

    /// Sessions active since before `cutoff` (stale-sweep candidates).
    pub async fn list_stale_active_sessions(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<SessionRecord>> {
        let rows = sqlx::query(
            "SELECT id, agent_id, session_type, status, parent_session_id,
                    external_session_id, metadata, input_tokens, output_tokens,
                    cost_usd, created_at, ended_at
             FROM sessions WHERE status = 'active' AND created_at < $1",
        )
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await
        .map_err(map_err)?;
        rows.into_iter().map(session_from_row).collect()
    }

    /// The most recent active session tagged with the given cron id
    /// (for `session_mode = shared_by_job`).
    pub async fn find_shared_cron_session(&self, cron_id: &str) -> Result<Option<SessionRecord>> {
        let row = sqlx::query(
            "SELECT id, agent_id, session_type, status, parent_session_id,
                    external_session_id, metadata, input_tokens, output_tokens,
                    cost_usd, created_at, ended_at
             FROM sessions
             WHERE status = 'active' AND metadata->>'cron_id' = $1
             ORDER BY created_at DESC LIMIT 1",
        )
        .bind(cron_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_err)?;
        row.map(session_from_row).transpose()
    }

    /// The target agent's long-lived root session (for
    /// `session_mode = parent_of_agent`).
    pub async fn find_agent_root_session(&self, agent_id: &str) -> Result<Option<SessionRecord>> {
        let row = sqlx::query(
            "SELECT id, agent_id, session_type, status, parent_session_id,
                    external_session_id, metadata, input_tokens, output_tokens,
                    cost_usd, created_at, ended_at
             FROM sessions
             WHERE status = 'active' AND metadata->>'agent_root' = $1
             ORDER BY created_at DESC LIMIT 1",
        )
        .bind(agent_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_err)?;
        row.map(session_from_row).transpose()
    }

    pub async fn agent_session_stats(&self) -> Result<Vec<AgentSessionStat>> {
        let rows = sqlx::query(
            "SELECT agent_id, status, count(*) AS n
             FROM sessions GROUP BY agent_id, status ORDER BY agent_id",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(map_err)?;

        rows.into_iter()
            .map(|r| {
                let status: String = r.try_get("status").map_err(map_err)?;
                Ok(AgentSessionStat {
                    agent_id: r.try_get("agent_id").map_err(map_err)?,
                    status: status.parse()?,
                    count: r.try_get("n").map_err(map_err)?,
                })
            })
            .collect()
    }

    // ── Model usage ────────────────────────────────────────────────

    pub async fn record_model_usage(&self, usage: &ModelUsage) -> Result<()> {
        sqlx::query(
            "INSERT INTO model_usage (model, provider, input_tokens, output_tokens,
                                      cost_usd, latency_ms, success, error_message, session_id)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
        )
        .bind(&usage.model)
        .bind(&usage.provider)
        .bind(usage.input_tokens as i32)
        .bind(usage.output_tokens as i32)
        .bind(usage.cost_usd)
        .bind(usage.latency_ms as i64)
        .bind(usage.success)
        .bind(usage.error_message.as_deref())
        .bind(usage.session_id)
        .execute(&self.pool)
        .await
        .map_err(map_err)?;
        Ok(())
    }

    // ── Cron jobs ──────────────────────────────────────────────────

    pub async fn upsert_cron(&self, entry: &CronEntry) -> Result<()> {
        sqlx::query(
            "INSERT INTO cron_jobs (id, name, schedule, enabled, payload, agent_id,
                                    session_mode, max_duration_secs, retry_count,
                                    last_run_at, next_run_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
             ON CONFLICT (id) DO UPDATE SET
                 name = EXCLUDED.name,
                 schedule = EXCLUDED.schedule,
                 enabled = EXCLUDED.enabled,
                 payload = EXCLUDED.payload,
                 agent_id = EXCLUDED.agent_id,
                 session_mode = EXCLUDED.session_mode,
                 max_duration_secs = EXCLUDED.max_duration_secs,
                 retry_count = EXCLUDED.retry_count,
                 next_run_at = EXCLUDED.next_run_at,
                 updated_at = now()",
        )
        .bind(&entry.id)
        .bind(&entry.name)
        .bind(&entry.schedule)
        .bind(entry.enabled)
        .bind(&entry.payload)
        .bind(&entry.agent_id)
        .bind(entry.session_mode.as_str())
        .bind(entry.max_duration_secs)
        .bind(entry.retry_count)
        .bind(entry.last_run_at)
        .bind(entry.next_run_at)
        .execute(&self.pool)
        .await
        .map_err(map_err)?;
        Ok(())
    }

    pub async fn delete_cron(&self, id: &str) -> Result<bool> {
        let n = sqlx::query("DELETE FROM cron_jobs WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(map_err)?
            .rows_affected();
        Ok(n > 0)
    }

    pub async fn get_cron(&self, id: &str) -> Result<Option<CronEntry>> {
        let row = sqlx::query(
            "SELECT id, name, schedule, enabled, payload, agent_id, session_mode,
                    max_duration_secs, retry_count, last_run_at, next_run_at,
                    created_at, updated_at
             FROM cron_jobs WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_err)?;
        row.map(cron_from_row).transpose()
    }

    pub async fn list_crons(&self) -> Result<Vec<CronEntry>> {
        let rows = sqlx::query(
            "SELECT id, name, schedule, enabled, payload, agent_id, session_mode,
                    max_duration_secs, retry_count, last_run_at, next_run_at,
                    created_at, updated_at
             FROM cron_jobs ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(map_err)?;
        rows.into_iter().map(cron_from_row).collect()
    }

    pub async fn set_cron_enabled(&self, id: &str, enabled: bool) -> Result<bool> {
        let n = sqlx::query(
            "UPDATE cron_jobs SET enabled = $2, updated_at = now() WHERE id = $1",
        )
        .bind(id)
        .bind(enabled)
        .execute(&self.pool)
        .await
        .map_err(map_err)?
        .rows_affected();
        Ok(n > 0)
    }

    /// Stamp only the next fire time (fresh or re-enabled entries).
    pub async fn set_cron_next_run(
        &self,
        id: &str,
        next_run_at: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query("UPDATE cron_jobs SET next_run_at = $2, updated_at = now() WHERE id = $1")
            .bind(id)
            .bind(next_run_at)
            .execute(&self.pool)
            .await
            .map_err(map_err)?;
        Ok(())
    }

    /// Stamp a fire: last_run_at plus the recomputed next_run_at.
    pub async fn record_cron_run(
        &self,
        id: &str,
        last_run_at: DateTime<Utc>,
        next_run_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE cron_jobs SET last_run_at = $2, next_run_at = $3, updated_at = now()
             WHERE id = $1",
        )
        .bind(id)
        .bind(last_run_at)
        .bind(next_run_at)
        .execute(&self.pool)
        .await
        .map_err(map_err)?;
        Ok(())
    }

    pub async fn append_cron_history(&self, exec: &CronExecution) -> Result<()> {
        sqlx::query(
            "INSERT INTO cron_executions (cron_id, started_at, ended_at, outcome, session_id)
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(&exec.cron_id)
        .bind(exec.started_at)
        .bind(exec.ended_at)
        .bind(exec.outcome.as_str())
        .bind(exec.session_id)
        .execute(&self.pool)
        .await
        .map_err(map_err)?;
        Ok(())
    }

    /// Keep only the most recent `keep` executions for a job.
    pub async fn trim_cron_history(&self, id: &str, keep: i64) -> Result<u64> {
        let n = sqlx::query(
            "DELETE FROM cron_executions
             WHERE cron_id = $1 AND id NOT IN (
                 SELECT id FROM cron_executions
                 WHERE cron_id = $1
                 ORDER BY started_at DESC, id DESC
                 LIMIT $2
             )",
        )
        .bind(id)
        .bind(keep)
        .execute(&self.pool)
        .await
        .map_err(map_err)?
        .rows_affected();
        Ok(n)
    }

    pub async fn list_cron_history(&self, id: &str, limit: i64) -> Result<Vec<CronExecution>> {
        let rows = sqlx::query(
            "SELECT cron_id, started_at, ended_at, outcome, session_id
             FROM cron_executions WHERE cron_id = $1
             ORDER BY started_at DESC, id DESC LIMIT $2",
        )
        .bind(id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(map_err)?;

        rows.into_iter()
            .map(|r| {
                let outcome: String = r.try_get("outcome").map_err(map_err)?;
                Ok(CronExecution {
                    cron_id: r.try_get("cron_id").map_err(map_err)?,
                    started_at: r.try_get("started_at").map_err(map_err)?,
                    ended_at: r.try_get("ended_at").map_err(map_err)?,
                    outcome: outcome.parse()?,
                    session_id: r.try_get("session_id").map_err(map_err)?,
                })
            })
            .collect()
    }

    // ── Agent state ────────────────────────────────────────────────

    pub async fn touch_agent_state(&self, agent_id: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO agent_state (agent_id, last_used_at) VALUES ($1, now())
             ON CONFLICT (agent_id) DO UPDATE SET last_used_at = now()",
        )
        .bind(agent_id)
        .execute(&self.pool)
        .await
        .map_err(map_err)?;
        Ok(())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Row mapping
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn session_from_row(r: sqlx::postgres::PgRow) -> Result<SessionRecord> {
    let session_type: String = r.try_get("session_type").map_err(map_err)?;
    let status: String = r.try_get("status").map_err(map_err)?;
    Ok(SessionRecord {
        id: r.try_get("id").map_err(map_err)?,
        agent_id: r.try_get("agent_id").map_err(map_err)?,
        session_type: session_type.parse()?,
        status: status.parse()?,
        parent_session_id: r.try_get("parent_session_id").map_err(map_err)?,
        external_session_id: r.try_get("external_session_id").map_err(map_err)?,
        metadata: r.try_get("metadata").map_err(map_err)?,
        input_tokens: r.try_get("input_tokens").map_err(map_err)?,
        output_tokens: r.try_get("output_tokens").map_err(map_err)?,
        cost_usd: r.try_get("cost_usd").map_err(map_err)?,
        created_at: r.try_get("created_at").map_err(map_err)?,
        ended_at: r.try_get("ended_at").map_err(map_err)?,
    })
}

fn message_from_row(r: sqlx::postgres::PgRow) -> Result<MessageRecord> {
    let role: String = r.try_get("role").map_err(map_err)?;
    Ok(MessageRecord {
        id: r.try_get("id").map_err(map_err)?,
        session_id: r.try_get("session_id").map_err(map_err)?,
        role: role.parse()?,
        content: r.try_get("content").map_err(map_err)?,
        content_hash: r.try_get("content_hash").map_err(map_err)?,
        model: r.try_get("model").map_err(map_err)?,
        input_tokens: r.try_get("input_tokens").map_err(map_err)?,
        output_tokens: r.try_get("output_tokens").map_err(map_err)?,
        cost_usd: r.try_get("cost_usd").map_err(map_err)?,
        latency_ms: r.try_get("latency_ms").map_err(map_err)?,
        finish_reason: r.try_get("finish_reason").map_err(map_err)?,
        tool_calls: r.try_get("tool_calls").map_err(map_err)?,
        created_at: r.try_get("created_at").map_err(map_err)?,
    })
}

fn cron_from_row(r: sqlx::postgres::PgRow) -> Result<CronEntry> {
    let mode: String = r.try_get("session_mode").map_err(map_err)?;
    Ok(CronEntry {
        id: r.try_get("id").map_err(map_err)?,
        name: r.try_get("name").map_err(map_err)?,
        schedule: r.try_get("schedule").map_err(map_err)?,
        enabled: r.try_get("enabled").map_err(map_err)?,
        payload: r.try_get("payload").map_err(map_err)?,
        agent_id: r.try_get("agent_id").map_err(map_err)?,
        session_mode: mode.parse::<CronSessionMode>()?,
        max_duration_secs: r.try_get("max_duration_secs").map_err(map_err)?,
        retry_count: r.try_get("retry_count").map_err(map_err)?,
        last_run_at: r.try_get("last_run_at").map_err(map_err)?,
        next_run_at: r.try_get("next_run_at").map_err(map_err)?,
        created_at: r.try_get("created_at").map_err(map_err)?,
        updated_at: r.try_get("updated_at").map_err(map_err)?,
    })
}

/// Classify sqlx failures per the error taxonomy.
fn map_err(e: sqlx::Error) -> Error {
    match e {
        sqlx::Error::Database(db) => {
            if db.is_unique_violation() || db.is_foreign_key_violation() || db.is_check_violation()
            {
                Error::PersistenceConflict(db.to_string())
            } else {
                Error::PersistenceUnavailable(db.to_string())
            }
        }
        sqlx::Error::RowNotFound => Error::PersistenceConflict("row not found".into()),
        sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
            Error::PersistenceConflict(e.to_string())
        }
        other => Error::PersistenceUnavailable(other.to_string()),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests (require a live PostgreSQL — run with `DATABASE_URL=... cargo
// test -- --ignored`)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
