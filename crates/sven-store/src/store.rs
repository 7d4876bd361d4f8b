// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

use crate::error::StoreError;
use crate::models::{
    AuditEntry, DeadLetterEntry, PendingApproval, SessionContext, Task, TaskStatus, ThreadSession,
};

const SCHEMA_VERSION: i64 = 1;

fn open(db_path: &Path) -> rusqlite::Result<Connection> {
    let conn = Connection::open(db_path)?;
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "busy_timeout", 5000)?;
    conn.pragma_update(None, "foreign_keys", true)?;

    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS meta (
            key   TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS tasks (
            id               TEXT PRIMARY KEY,
            task_type        TEXT NOT NULL,
            params           TEXT NOT NULL,
            caller_id        TEXT NOT NULL,
            status           TEXT NOT NULL,
            result           TEXT,
            error            TEXT,
            response_channel TEXT,
            response_thread  TEXT,
            created_at       TEXT NOT NULL,
            updated_at       TEXT NOT NULL,
            completed_at     TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_tasks_status ON tasks(status);

        CREATE TABLE IF NOT EXISTS pending_approvals (
            request_id  TEXT PRIMARY KEY,
            task_id     TEXT NOT NULL,
            caller_id   TEXT NOT NULL,
            permission  TEXT NOT NULL,
            action      TEXT NOT NULL,
            resource    TEXT NOT NULL,
            channel     TEXT,
            thread      TEXT,
            created_at  TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS session_contexts (
            session_id  TEXT PRIMARY KEY,
            channel     TEXT NOT NULL,
            thread      TEXT,
            created_at  TEXT NOT NULL,
            last_seen   TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS thread_sessions (
            thread_id   TEXT PRIMARY KEY,
            session_key TEXT NOT NULL,
            created_at  TEXT NOT NULL,
            last_used   TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS dead_letters (
            id             TEXT PRIMARY KEY,
            kind           TEXT NOT NULL,
            payload        TEXT NOT NULL,
            attempts       INTEGER NOT NULL,
            last_error     TEXT,
            next_retry_at  TEXT NOT NULL,
            resolved       INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_dead_letters_resolved ON dead_letters(resolved);

        CREATE TABLE IF NOT EXISTS audit_log (
            id         TEXT PRIMARY KEY,
            timestamp  TEXT NOT NULL,
            user_id    TEXT NOT NULL,
            user_name  TEXT NOT NULL,
            action     TEXT NOT NULL,
            resource   TEXT NOT NULL,
            result     TEXT NOT NULL,
            details    TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_audit_log_timestamp ON audit_log(timestamp);
        ",
    )?;

    conn.execute(
        "INSERT OR IGNORE INTO meta (key, value) VALUES ('schema_version', ?1)",
        params![SCHEMA_VERSION.to_string()],
    )?;

    Ok(conn)
}

fn row_to_task(row: &rusqlite::Row<'_>) -> rusqlite::Result<Task> {
    let id: String = row.get("id")?;
    let params_raw: String = row.get("params")?;
    let status_raw: String = row.get("status")?;
    let created_at: String = row.get("created_at")?;
    let updated_at: String = row.get("updated_at")?;
    let completed_at: Option<String> = row.get("completed_at")?;

    Ok(Task {
        id: Uuid::parse_str(&id).unwrap_or_default(),
        task_type: row.get("task_type")?,
        params: serde_json::from_str(&params_raw).unwrap_or(serde_json::Value::Null),
        caller_id: row.get("caller_id")?,
        status: TaskStatus::from_db_str(&status_raw).unwrap_or(TaskStatus::Failed),
        result: row.get("result")?,
        error: row.get("error")?,
        response_channel: row.get("response_channel")?,
        response_thread: row.get("response_thread")?,
        created_at: parse_ts(&created_at),
        updated_at: parse_ts(&updated_at),
        completed_at: completed_at.as_deref().map(parse_ts),
    })
}

fn parse_ts(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

/// Report of rows purged by a single [`Store::run_retention`] pass, broken
/// down per table so callers can log and assert on it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetentionReport {
    pub tasks_purged: usize,
    pub approvals_purged: usize,
    pub orphan_tasks_failed: usize,
    pub session_contexts_purged: usize,
    pub thread_sessions_purged: usize,
    pub dead_letters_purged: usize,
    pub audit_entries_purged: usize,
}

/// Single-file sqlite-backed store for everything the executor and channel
/// bridge need to survive a restart: tasks, pending approvals, conversation
/// context, dead letters and the audit trail.
///
/// Every operation opens a fresh connection inside `spawn_blocking` rather
/// than holding one across an await point, matching `sven-memory`'s store.
pub struct Store {
    db_path: PathBuf,
}

impl Store {
    pub async fn open(db_path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let db_path = db_path.into();
        let path_for_open = db_path.clone();
        tokio::task::spawn_blocking(move || open(&path_for_open).map(|_| ()))
            .await
            .map_err(|e| StoreError::Internal(e.to_string()))??;
        Ok(Self { db_path })
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&Connection) -> Result<T, StoreError> + Send + 'static,
        T: Send + 'static,
    {
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let conn = open(&db_path)?;
            f(&conn)
        })
        .await
        .map_err(|e| StoreError::Internal(e.to_string()))?
    }

    // -- tasks ---------------------------------------------------------

    pub async fn upsert_task(&self, task: Task) -> Result<(), StoreError> {
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO tasks
                    (id, task_type, params, caller_id, status, result, error,
                     response_channel, response_thread, created_at, updated_at, completed_at)
                 VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12)
                 ON CONFLICT(id) DO UPDATE SET
                    task_type = excluded.task_type,
                    params = excluded.params,
                    caller_id = excluded.caller_id,
                    status = excluded.status,
                    result = excluded.result,
                    error = excluded.error,
                    response_channel = excluded.response_channel,
                    response_thread = excluded.response_thread,
                    updated_at = excluded.updated_at,
                    completed_at = excluded.completed_at",
                params![
                    task.id.to_string(),
                    task.task_type,
                    serde_json::to_string(&task.params)?,
                    task.caller_id,
                    task.status.as_db_str(),
                    task.result,
                    task.error,
                    task.response_channel,
                    task.response_thread,
                    task.created_at.to_rfc3339(),
                    task.updated_at.to_rfc3339(),
                    task.completed_at.map(|t| t.to_rfc3339()),
                ],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn get_task(&self, id: Uuid) -> Result<Option<Task>, StoreError> {
        self.with_conn(move |conn| {
            conn.query_row("SELECT * FROM tasks WHERE id = ?1", params![id.to_string()], row_to_task)
                .optional()
                .map_err(StoreError::from)
        })
        .await
    }

    pub async fn update_task_status(&self, id: Uuid, status: TaskStatus) -> Result<(), StoreError> {
        self.with_conn(move |conn| {
            conn.execute(
                "UPDATE tasks SET status = ?1, updated_at = ?2 WHERE id = ?3",
                params![status.as_db_str(), Utc::now().to_rfc3339(), id.to_string()],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn complete_task(
        &self,
        id: Uuid,
        status: TaskStatus,
        result: Option<String>,
        error: Option<String>,
    ) -> Result<(), StoreError> {
        self.with_conn(move |conn| {
            let now = Utc::now().to_rfc3339();
            conn.execute(
                "UPDATE tasks SET status = ?1, result = ?2, error = ?3, updated_at = ?4, completed_at = ?4
                 WHERE id = ?5",
                params![status.as_db_str(), result, error, now, id.to_string()],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn list_tasks_by_status(&self, status: TaskStatus) -> Result<Vec<Task>, StoreError> {
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare("SELECT * FROM tasks WHERE status = ?1 ORDER BY created_at")?;
            let rows = stmt
                .query_map(params![status.as_db_str()], row_to_task)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
        .await
    }

    /// Startup recovery: any task left `running` by an unclean shutdown is
    /// marked `failed` with a note that the runtime restarted mid-task.
    pub async fn fail_stuck(&self) -> Result<usize, StoreError> {
        self.with_conn(|conn| {
            let now = Utc::now().to_rfc3339();
            let n = conn.execute(
                "UPDATE tasks SET status = ?1, error = ?2, updated_at = ?3
                 WHERE status = ?4",
                params![
                    TaskStatus::Failed.as_db_str(),
                    "task was running when the runtime restarted",
                    now,
                    TaskStatus::Running.as_db_str(),
                ],
            )?;
            Ok(n)
        })
        .await
    }

    /// Returns the ids of tasks left `pending` across a restart so the
    /// dispatcher can re-enqueue them before consuming new events.
    pub async fn requeue_pending(&self) -> Result<Vec<Uuid>, StoreError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT id FROM tasks WHERE status = ?1 ORDER BY created_at")?;
            let ids = stmt
                .query_map(params![TaskStatus::Pending.as_db_str()], |row| {
                    let id: String = row.get(0)?;
                    Ok(id)
                })?
                .collect::<Result<Vec<_>, _>>()?
                .into_iter()
                .filter_map(|s| Uuid::parse_str(&s).ok())
                .collect();
            Ok(ids)
        })
        .await
    }

    // -- pending approvals ----------------------------------------------

    pub async fn save_approval(&self, approval: PendingApproval) -> Result<(), StoreError> {
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT OR REPLACE INTO pending_approvals
                    (request_id, task_id, caller_id, permission, action, resource, channel, thread, created_at)
                 VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9)",
                params![
                    approval.request_id.to_string(),
                    approval.task_id.to_string(),
                    approval.caller_id,
                    approval.permission,
                    approval.action,
                    approval.resource,
                    approval.channel,
                    approval.thread,
                    approval.created_at.to_rfc3339(),
                ],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn get_approval(&self, request_id: Uuid) -> Result<Option<PendingApproval>, StoreError> {
        self.with_conn(move |conn| {
            conn.query_row(
                "SELECT * FROM pending_approvals WHERE request_id = ?1",
                params![request_id.to_string()],
                row_to_approval,
            )
            .optional()
            .map_err(StoreError::from)
        })
        .await
    }

    pub async fn delete_approval(&self, request_id: Uuid) -> Result<(), StoreError> {
        self.with_conn(move |conn| {
            conn.execute(
                "DELETE FROM pending_approvals WHERE request_id = ?1",
                params![request_id.to_string()],
            )?;
            Ok(())
        })
        .await
    }

    // -- session / thread context ----------------------------------------

    pub async fn save_session_context(&self, ctx: SessionContext) -> Result<(), StoreError> {
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO session_contexts (session_id, channel, thread, created_at, last_seen)
                 VALUES (?1,?2,?3,?4,?5)
                 ON CONFLICT(session_id) DO UPDATE SET
                    channel = excluded.channel,
                    thread = excluded.thread,
                    last_seen = excluded.last_seen",
                params![
                    ctx.session_id,
                    ctx.channel,
                    ctx.thread,
                    ctx.created_at.to_rfc3339(),
                    ctx.last_seen.to_rfc3339(),
                ],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn get_session_context(&self, session_id: &str) -> Result<Option<SessionContext>, StoreError> {
        let session_id = session_id.to_string();
        self.with_conn(move |conn| {
            conn.query_row(
                "SELECT * FROM session_contexts WHERE session_id = ?1",
                params![session_id],
                row_to_session_context,
            )
            .optional()
            .map_err(StoreError::from)
        })
        .await
    }

    pub async fn touch_session_context(&self, session_id: &str) -> Result<(), StoreError> {
        let session_id = session_id.to_string();
        self.with_conn(move |conn| {
            conn.execute(
                "UPDATE session_contexts SET last_seen = ?1 WHERE session_id = ?2",
                params![Utc::now().to_rfc3339(), session_id],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn save_thread_session(&self, ts: ThreadSession) -> Result<(), StoreError> {
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO thread_sessions (thread_id, session_key, created_at, last_used)
                 VALUES (?1,?2,?3,?4)
                 ON CONFLICT(thread_id) DO UPDATE SET
                    session_key = excluded.session_key,
                    last_used = excluded.last_used",
                params![
                    ts.thread_id,
                    ts.session_key,
                    ts.created_at.to_rfc3339(),
                    ts.last_used.to_rfc3339(),
                ],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn get_thread_session(&self, thread_id: &str) -> Result<Option<ThreadSession>, StoreError> {
        let thread_id = thread_id.to_string();
        self.with_conn(move |conn| {
            conn.query_row(
                "SELECT * FROM thread_sessions WHERE thread_id = ?1",
                params![thread_id],
                row_to_thread_session,
            )
            .optional()
            .map_err(StoreError::from)
        })
        .await
    }

    pub async fn touch_thread_session(&self, thread_id: &str) -> Result<(), StoreError> {
        let thread_id = thread_id.to_string();
        self.with_conn(move |conn| {
            conn.execute(
                "UPDATE thread_sessions SET last_used = ?1 WHERE thread_id = ?2",
                params![Utc::now().to_rfc3339(), thread_id],
            )?;
            Ok(())
        })
        .await
    }

    // -- dead letters ------------------------------------------------------

    pub async fn save_dead_letter(&self, entry: DeadLetterEntry) -> Result<(), StoreError> {
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO dead_letters
                    (id, kind, payload, attempts, last_error, next_retry_at, resolved)
                 VALUES (?1,?2,?3,?4,?5,?6,?7)",
                params![
                    entry.id.to_string(),
                    entry.kind,
                    serde_json::to_string(&entry.payload)?,
                    entry.attempts,
                    entry.last_error,
                    entry.next_retry_at.to_rfc3339(),
                    entry.resolved as i64,
                ],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn list_retryable(&self, now: DateTime<Utc>) -> Result<Vec<DeadLetterEntry>, StoreError> {
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT * FROM dead_letters WHERE resolved = 0 AND next_retry_at <= ?1 ORDER BY next_retry_at",
            )?;
            let rows = stmt
                .query_map(params![now.to_rfc3339()], row_to_dead_letter)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
        .await
    }

    pub async fn increment_retry(
        &self,
        id: Uuid,
        error: String,
        next_retry_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.with_conn(move |conn| {
            conn.execute(
                "UPDATE dead_letters SET attempts = attempts + 1, last_error = ?1, next_retry_at = ?2
                 WHERE id = ?3",
                params![error, next_retry_at.to_rfc3339(), id.to_string()],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn resolve_dead_letter(&self, id: Uuid) -> Result<(), StoreError> {
        self.with_conn(move |conn| {
            conn.execute(
                "UPDATE dead_letters SET resolved = 1 WHERE id = ?1",
                params![id.to_string()],
            )?;
            Ok(())
        })
        .await
    }

    // -- audit ---------------------------------------------------------

    pub async fn record_audit(&self, entry: AuditEntry) -> Result<(), StoreError> {
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO audit_log (id, timestamp, user_id, user_name, action, resource, result, details)
                 VALUES (?1,?2,?3,?4,?5,?6,?7,?8)",
                params![
                    entry.id.to_string(),
                    entry.timestamp.to_rfc3339(),
                    entry.user_id,
                    entry.user_name,
                    entry.action,
                    entry.resource,
                    entry.result,
                    entry.details,
                ],
            )?;
            Ok(())
        })
        .await
    }

    // -- retention -------------------------------------------------------

    /// Purges rows past their fixed age thresholds. Pending approvals older
    /// than an hour also fail their originating task with an explicit
    /// "approval timed out" error so it does not linger orphaned.
    pub async fn run_retention(&self, now: DateTime<Utc>) -> Result<RetentionReport, StoreError> {
        self.with_conn(move |conn| {
            let tx = conn.unchecked_transaction()?;
            let mut report = RetentionReport::default();

            let tasks_cutoff = (now - Duration::days(7)).to_rfc3339();
            report.tasks_purged = tx.execute(
                "DELETE FROM tasks WHERE status = ?1 AND completed_at IS NOT NULL AND completed_at < ?2",
                params![TaskStatus::Completed.as_db_str(), tasks_cutoff],
            )?;

            let approvals_cutoff = (now - Duration::hours(1)).to_rfc3339();
            {
                let mut stmt = tx.prepare(
                    "SELECT request_id, task_id FROM pending_approvals WHERE created_at < ?1",
                )?;
                let expired: Vec<(String, String)> = stmt
                    .query_map(params![approvals_cutoff], |row| {
                        Ok((row.get(0)?, row.get(1)?))
                    })?
                    .collect::<Result<Vec<_>, _>>()?;
                for (request_id, task_id) in &expired {
                    tx.execute(
                        "UPDATE tasks SET status = ?1, error = ?2, updated_at = ?3 WHERE id = ?4",
                        params![
                            TaskStatus::Failed.as_db_str(),
                            "approval timed out",
                            now.to_rfc3339(),
                            task_id,
                        ],
                    )?;
                    tx.execute(
                        "DELETE FROM pending_approvals WHERE request_id = ?1",
                        params![request_id],
                    )?;
                }
                report.approvals_purged = expired.len();
                report.orphan_tasks_failed = expired.len();
            }

            let session_cutoff = (now - Duration::hours(24)).to_rfc3339();
            report.session_contexts_purged = tx.execute(
                "DELETE FROM session_contexts WHERE last_seen < ?1",
                params![session_cutoff],
            )?;

            let thread_cutoff = (now - Duration::days(7)).to_rfc3339();
            report.thread_sessions_purged = tx.execute(
                "DELETE FROM thread_sessions WHERE last_used < ?1",
                params![thread_cutoff],
            )?;

            let dead_letter_cutoff = (now - Duration::hours(24)).to_rfc3339();
            report.dead_letters_purged = tx.execute(
                "DELETE FROM dead_letters WHERE resolved = 1 AND next_retry_at < ?1",
                params![dead_letter_cutoff],
            )?;

            let audit_cutoff = (now - Duration::days(30)).to_rfc3339();
            report.audit_entries_purged = tx.execute(
                "DELETE FROM audit_log WHERE timestamp < ?1",
                params![audit_cutoff],
            )?;

            tx.commit()?;
            Ok(report)
        })
        .await
    }
}

fn row_to_approval(row: &rusqlite::Row<'_>) -> rusqlite::Result<PendingApproval> {
    let request_id: String = row.get("request_id")?;
    let task_id: String = row.get("task_id")?;
    let created_at: String = row.get("created_at")?;
    Ok(PendingApproval {
        request_id: Uuid::parse_str(&request_id).unwrap_or_default(),
        task_id: Uuid::parse_str(&task_id).unwrap_or_default(),
        caller_id: row.get("caller_id")?,
        permission: row.get("permission")?,
        action: row.get("action")?,
        resource: row.get("resource")?,
        channel: row.get("channel")?,
        thread: row.get("thread")?,
        created_at: parse_ts(&created_at),
    })
}

fn row_to_session_context(row: &rusqlite::Row<'_>) -> rusqlite::Result<SessionContext> {
    let created_at: String = row.get("created_at")?;
    let last_seen: String = row.get("last_seen")?;
    Ok(SessionContext {
        session_id: row.get("session_id")?,
        channel: row.get("channel")?,
        thread: row.get("thread")?,
        created_at: parse_ts(&created_at),
        last_seen: parse_ts(&last_seen),
    })
}

fn row_to_thread_session(row: &rusqlite::Row<'_>) -> rusqlite::Result<ThreadSession> {
    let created_at: String = row.get("created_at")?;
    let last_used: String = row.get("last_used")?;
    Ok(ThreadSession {
        thread_id: row.get("thread_id")?,
        session_key: row.get("session_key")?,
        created_at: parse_ts(&created_at),
        last_used: parse_ts(&last_used),
    })
}

fn row_to_dead_letter(row: &rusqlite::Row<'_>) -> rusqlite::Result<DeadLetterEntry> {
    let id: String = row.get("id")?;
    let payload_raw: String = row.get("payload")?;
    let next_retry_at: String = row.get("next_retry_at")?;
    let resolved: i64 = row.get("resolved")?;
    Ok(DeadLetterEntry {
        id: Uuid::parse_str(&id).unwrap_or_default(),
        kind: row.get("kind")?,
        payload: serde_json::from_str(&payload_raw).unwrap_or(serde_json::Value::Null),
        attempts: row.get("attempts")?,
        last_error: row.get("last_error")?,
        next_retry_at: parse_ts(&next_retry_at),
        resolved: resolved != 0,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn tmp_store() -> (Store, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sven-store-test.db");
        let store = Store::open(path).await.unwrap();
        (store, dir)
    }

    #[tokio::test]
    async fn upsert_and_get_task_round_trips() {
        let (store, _dir) = tmp_store().await;
        let task = Task::new("scm.read", json!({"path": "README.md"}), "user-1");
        let id = task.id;
        store.upsert_task(task).await.unwrap();

        let fetched = store.get_task(id).await.unwrap().unwrap();
        assert_eq!(fetched.task_type, "scm.read");
        assert_eq!(fetched.status, TaskStatus::Pending);
    }

    #[tokio::test]
    async fn complete_task_sets_result_and_completed_at() {
        let (store, _dir) = tmp_store().await;
        let task = Task::new("chat.send", json!({}), "user-1");
        let id = task.id;
        store.upsert_task(task).await.unwrap();

        store
            .complete_task(id, TaskStatus::Completed, Some("ok".into()), None)
            .await
            .unwrap();

        let fetched = store.get_task(id).await.unwrap().unwrap();
        assert_eq!(fetched.status, TaskStatus::Completed);
        assert_eq!(fetched.result.as_deref(), Some("ok"));
        assert!(fetched.completed_at.is_some());
    }

    #[tokio::test]
    async fn fail_stuck_only_touches_running_tasks() {
        let (store, _dir) = tmp_store().await;
        let mut running = Task::new("cluster.read", json!({}), "user-1");
        running.status = TaskStatus::Running;
        let running_id = running.id;
        let pending = Task::new("cluster.read", json!({}), "user-1");
        let pending_id = pending.id;

        store.upsert_task(running).await.unwrap();
        store.upsert_task(pending).await.unwrap();

        let n = store.fail_stuck().await.unwrap();
        assert_eq!(n, 1);

        assert_eq!(store.get_task(running_id).await.unwrap().unwrap().status, TaskStatus::Failed);
        assert_eq!(store.get_task(pending_id).await.unwrap().unwrap().status, TaskStatus::Pending);
    }

    #[tokio::test]
    async fn requeue_pending_returns_pending_ids_in_order() {
        let (store, _dir) = tmp_store().await;
        let a = Task::new("issue.read", json!({}), "user-1");
        let b = Task::new("issue.read", json!({}), "user-1");
        let a_id = a.id;
        let b_id = b.id;
        store.upsert_task(a).await.unwrap();
        store.upsert_task(b).await.unwrap();

        let ids = store.requeue_pending().await.unwrap();
        assert_eq!(ids, vec![a_id, b_id]);
    }

    #[tokio::test]
    async fn approval_save_get_delete_round_trip() {
        let (store, _dir) = tmp_store().await;
        let approval = PendingApproval {
            request_id: Uuid::new_v4(),
            task_id: Uuid::new_v4(),
            caller_id: "user-1".into(),
            permission: "scm.write".into(),
            action: "commit".into(),
            resource: "repo/app".into(),
            channel: Some("slack".into()),
            thread: None,
            created_at: Utc::now(),
        };
        let request_id = approval.request_id;
        store.save_approval(approval).await.unwrap();

        assert!(store.get_approval(request_id).await.unwrap().is_some());
        store.delete_approval(request_id).await.unwrap();
        assert!(store.get_approval(request_id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn retention_purges_old_rows_and_fails_orphan_task() {
        let (store, _dir) = tmp_store().await;
        let now = Utc::now();

        let mut old_task = Task::new("scm.read", json!({}), "user-1");
        old_task.status = TaskStatus::Completed;
        old_task.completed_at = Some(now - Duration::days(10));
        let old_id = old_task.id;
        store.upsert_task(old_task).await.unwrap();

        let orphan_task = Task::new("scm.read", json!({}), "user-1");
        let orphan_id = orphan_task.id;
        store.upsert_task(orphan_task).await.unwrap();

        let approval = PendingApproval {
            request_id: Uuid::new_v4(),
            task_id: orphan_id,
            caller_id: "user-1".into(),
            permission: "scm.write".into(),
            action: "commit".into(),
            resource: "repo/app".into(),
            channel: None,
            thread: None,
            created_at: now - Duration::hours(2),
        };
        store.save_approval(approval).await.unwrap();

        let report = store.run_retention(now).await.unwrap();
        assert_eq!(report.tasks_purged, 1);
        assert_eq!(report.approvals_purged, 1);
        assert_eq!(report.orphan_tasks_failed, 1);

        assert!(store.get_task(old_id).await.unwrap().is_none());
        let orphan = store.get_task(orphan_id).await.unwrap().unwrap();
        assert_eq!(orphan.status, TaskStatus::Failed);
        assert_eq!(orphan.error.as_deref(), Some("approval timed out"));
    }

    #[tokio::test]
    async fn dead_letter_retry_cycle() {
        let (store, _dir) = tmp_store().await;
        let entry = DeadLetterEntry::new("chat.inbound", json!({"text": "hi"}));
        let id = entry.id;
        store.save_dead_letter(entry).await.unwrap();

        let retryable = store.list_retryable(Utc::now()).await.unwrap();
        assert_eq!(retryable.len(), 1);

        store
            .increment_retry(id, "timeout".into(), Utc::now() + Duration::minutes(5))
            .await
            .unwrap();
        let retryable = store.list_retryable(Utc::now()).await.unwrap();
        assert!(retryable.is_empty());

        store.resolve_dead_letter(id).await.unwrap();
        let retryable = store.list_retryable(Utc::now() + Duration::hours(1)).await.unwrap();
        assert!(retryable.is_empty());
    }
}
