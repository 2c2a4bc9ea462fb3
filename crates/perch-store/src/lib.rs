//! SQLite-backed persistence for accounts, session records, content, and
//! scheduled tasks. Survives restarts, supports the single-process
//! scheduler polling it once per interval.
//!
//! All task + content writes that the scheduler performs mid-execution go
//! through single transactions: a crash must never leave the two tables
//! disagreeing about a post's fate.

use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension};

use perch_core::error::{PerchError, Result};
use perch_core::models::{
    Account, AccountStatus, ActionKind, Content, ContentStatus, Fingerprint, ScheduledTask,
    SessionRecord, TaskStatus,
};
use perch_core::traits::PostedEvent;

/// Durable store shared by the queue service and the scheduler.
pub struct Store {
    conn: Mutex<Connection>,
}

impl Store {
    /// Open or create the database at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)
            .map_err(|e| PerchError::Store(format!("DB open: {e}")))?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.migrate()?;
        Ok(store)
    }

    /// Run migrations to create tables.
    fn migrate(&self) -> Result<()> {
        let conn = self.lock()?;
        conn.execute_batch(
            "
            -- Managed profiles
            CREATE TABLE IF NOT EXISTS accounts (
                id TEXT PRIMARY KEY,
                handle TEXT NOT NULL UNIQUE,
                status TEXT NOT NULL DEFAULT 'active',
                created_at TEXT NOT NULL
            );

            -- Encrypted browser-session snapshots, one per account
            CREATE TABLE IF NOT EXISTS session_records (
                account_id TEXT PRIMARY KEY,
                cookies TEXT NOT NULL,           -- salt:iv:ciphertext
                local_storage TEXT NOT NULL,     -- salt:iv:ciphertext
                user_agent TEXT NOT NULL,
                viewport_width INTEGER NOT NULL,
                viewport_height INTEGER NOT NULL,
                saved_at TEXT NOT NULL
            );

            -- Content to publish (tweets, replies, likes, reposts)
            CREATE TABLE IF NOT EXISTS content (
                id TEXT PRIMARY KEY,
                account_id TEXT NOT NULL,
                body TEXT NOT NULL,
                kind TEXT NOT NULL,              -- 'tweet', 'reply', 'like', 'repost'
                target_url TEXT,
                generator TEXT,
                style_score REAL,
                status TEXT NOT NULL DEFAULT 'draft',
                thread_id TEXT,
                thread_position INTEGER,         -- 1-based within a thread
                external_id TEXT,
                external_url TEXT,
                posted_at TEXT,
                created_at TEXT NOT NULL
            );

            -- One intended execution per content row
            CREATE TABLE IF NOT EXISTS scheduled_tasks (
                id TEXT PRIMARY KEY,
                content_id TEXT NOT NULL,
                account_id TEXT NOT NULL,
                scheduled_for TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'pending',
                retry_count INTEGER NOT NULL DEFAULT 0,
                last_error TEXT,
                executed_at TEXT,
                created_at TEXT NOT NULL,
                FOREIGN KEY (content_id) REFERENCES content(id)
            );

            -- Posted-event history for the analytics consumer
            CREATE TABLE IF NOT EXISTS analytics_events (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                content_id TEXT NOT NULL,
                event_type TEXT NOT NULL DEFAULT 'posted',
                external_id TEXT NOT NULL,
                posted_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_tasks_status_time
                ON scheduled_tasks(status, scheduled_for);
            CREATE INDEX IF NOT EXISTS idx_content_thread
                ON content(thread_id, thread_position);
            ",
        )
        .map_err(|e| PerchError::Store(format!("Migration: {e}")))?;
        Ok(())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| PerchError::Store(e.to_string()))
    }

    // ─── Accounts ─────────────────────────────────────────

    pub fn upsert_account(&self, account: &Account) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT OR REPLACE INTO accounts (id, handle, status, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            rusqlite::params![
                account.id,
                account.handle,
                account.status.as_str(),
                account.created_at.to_rfc3339(),
            ],
        )
        .map_err(|e| PerchError::Store(format!("Save account: {e}")))?;
        Ok(())
    }

    pub fn get_account(&self, id: &str) -> Result<Option<Account>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare("SELECT id, handle, status, created_at FROM accounts WHERE id = ?1")
            .map_err(|e| PerchError::Store(format!("Get account: {e}")))?;
        stmt.query_row([id], |row| {
            Ok(Account {
                id: row.get(0)?,
                handle: row.get(1)?,
                status: AccountStatus::parse(&row.get::<_, String>(2)?),
                created_at: parse_ts(&row.get::<_, String>(3)?),
            })
        })
        .optional()
        .map_err(|e| PerchError::Store(format!("Get account: {e}")))
    }

    pub fn set_account_status(&self, id: &str, status: AccountStatus) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "UPDATE accounts SET status = ?1 WHERE id = ?2",
            rusqlite::params![status.as_str(), id],
        )
        .map_err(|e| PerchError::Store(format!("Update account status: {e}")))?;
        Ok(())
    }

    // ─── Session records ──────────────────────────────────

    /// Upsert the encrypted session snapshot for an account.
    pub fn upsert_session_record(&self, record: &SessionRecord) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT OR REPLACE INTO session_records
             (account_id, cookies, local_storage, user_agent, viewport_width, viewport_height, saved_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            rusqlite::params![
                record.account_id,
                record.cookies,
                record.local_storage,
                record.fingerprint.user_agent,
                record.fingerprint.viewport_width,
                record.fingerprint.viewport_height,
                record.saved_at.to_rfc3339(),
            ],
        )
        .map_err(|e| PerchError::Store(format!("Save session record: {e}")))?;
        Ok(())
    }

    pub fn get_session_record(&self, account_id: &str) -> Result<Option<SessionRecord>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT account_id, cookies, local_storage, user_agent, viewport_width,
                        viewport_height, saved_at
                 FROM session_records WHERE account_id = ?1",
            )
            .map_err(|e| PerchError::Store(format!("Get session record: {e}")))?;
        stmt.query_row([account_id], |row| {
            Ok(SessionRecord {
                account_id: row.get(0)?,
                cookies: row.get(1)?,
                local_storage: row.get(2)?,
                fingerprint: Fingerprint {
                    user_agent: row.get(3)?,
                    viewport_width: row.get(4)?,
                    viewport_height: row.get(5)?,
                },
                saved_at: parse_ts(&row.get::<_, String>(6)?),
            })
        })
        .optional()
        .map_err(|e| PerchError::Store(format!("Get session record: {e}")))
    }

    // ─── Content ──────────────────────────────────────────

    pub fn get_content(&self, id: &str) -> Result<Option<Content>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(&format!("{CONTENT_SELECT} WHERE id = ?1"))
            .map_err(|e| PerchError::Store(format!("Get content: {e}")))?;
        stmt.query_row([id], content_from_row)
            .optional()
            .map_err(|e| PerchError::Store(format!("Get content: {e}")))
    }

    /// Look up one thread item by position. Used for predecessor checks.
    pub fn get_thread_item(&self, thread_id: &str, position: i64) -> Result<Option<Content>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(&format!(
                "{CONTENT_SELECT} WHERE thread_id = ?1 AND thread_position = ?2"
            ))
            .map_err(|e| PerchError::Store(format!("Get thread item: {e}")))?;
        stmt.query_row(rusqlite::params![thread_id, position], content_from_row)
            .optional()
            .map_err(|e| PerchError::Store(format!("Get thread item: {e}")))
    }

    // ─── Scheduled tasks ──────────────────────────────────

    pub fn get_task(&self, id: &str) -> Result<Option<ScheduledTask>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(&format!("{TASK_SELECT} WHERE t.id = ?1"))
            .map_err(|e| PerchError::Store(format!("Get task: {e}")))?;
        stmt.query_row([id], task_from_row)
            .optional()
            .map_err(|e| PerchError::Store(format!("Get task: {e}")))
    }

    /// True if the content row has a non-terminal task (single-flight guard).
    pub fn has_open_task(&self, content_id: &str) -> Result<bool> {
        let conn = self.lock()?;
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM scheduled_tasks
                 WHERE content_id = ?1 AND status IN ('pending', 'running')",
                [content_id],
                |r| r.get(0),
            )
            .map_err(|e| PerchError::Store(format!("Open task check: {e}")))?;
        Ok(count > 0)
    }

    /// All due pending tasks, ordered by scheduled time and then by thread
    /// position so thread items come out in posting order.
    pub fn due_tasks(&self, now: DateTime<Utc>) -> Result<Vec<ScheduledTask>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(&format!(
                "{TASK_SELECT}
                 JOIN content c ON c.id = t.content_id
                 WHERE t.status = 'pending' AND t.scheduled_for <= ?1
                 ORDER BY t.scheduled_for ASC, COALESCE(c.thread_position, 0) ASC"
            ))
            .map_err(|e| PerchError::Store(format!("Due tasks: {e}")))?;
        let rows = stmt
            .query_map([now.to_rfc3339()], task_from_row)
            .map_err(|e| PerchError::Store(format!("Due tasks: {e}")))?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| PerchError::Store(format!("Due tasks: {e}")))
    }

    /// Pending tasks for one account, in scheduled order. Used by reorder.
    pub fn pending_tasks_for_account(&self, account_id: &str) -> Result<Vec<ScheduledTask>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(&format!(
                "{TASK_SELECT}
                 WHERE t.account_id = ?1 AND t.status = 'pending'
                 ORDER BY t.scheduled_for ASC"
            ))
            .map_err(|e| PerchError::Store(format!("Pending tasks: {e}")))?;
        let rows = stmt
            .query_map([account_id], task_from_row)
            .map_err(|e| PerchError::Store(format!("Pending tasks: {e}")))?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| PerchError::Store(format!("Pending tasks: {e}")))
    }

    /// Running tasks whose claim is older than the cutoff — crashed
    /// executions that the startup sweep must reconcile.
    pub fn stale_running_tasks(&self, cutoff: DateTime<Utc>) -> Result<Vec<ScheduledTask>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(&format!(
                "{TASK_SELECT}
                 WHERE t.status = 'running' AND COALESCE(t.executed_at, t.created_at) <= ?1"
            ))
            .map_err(|e| PerchError::Store(format!("Stale tasks: {e}")))?;
        let rows = stmt
            .query_map([cutoff.to_rfc3339()], task_from_row)
            .map_err(|e| PerchError::Store(format!("Stale tasks: {e}")))?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| PerchError::Store(format!("Stale tasks: {e}")))
    }

    /// Move a pending task's scheduled time. Throttle reschedules go
    /// through here — no retry cost, no error recorded.
    pub fn update_task_schedule(&self, task_id: &str, new_time: DateTime<Utc>) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "UPDATE scheduled_tasks SET scheduled_for = ?1 WHERE id = ?2 AND status = 'pending'",
            rusqlite::params![new_time.to_rfc3339(), task_id],
        )
        .map_err(|e| PerchError::Store(format!("Update schedule: {e}")))?;
        Ok(())
    }

    /// Batch variant of [`update_task_schedule`], one transaction.
    pub fn update_task_schedules(&self, updates: &[(String, DateTime<Utc>)]) -> Result<()> {
        let mut conn = self.lock()?;
        let tx = conn
            .transaction()
            .map_err(|e| PerchError::Store(format!("Reorder tx: {e}")))?;
        for (task_id, new_time) in updates {
            tx.execute(
                "UPDATE scheduled_tasks SET scheduled_for = ?1 WHERE id = ?2 AND status = 'pending'",
                rusqlite::params![new_time.to_rfc3339(), task_id],
            )
            .map_err(|e| PerchError::Store(format!("Reorder: {e}")))?;
        }
        tx.commit()
            .map_err(|e| PerchError::Store(format!("Reorder commit: {e}")))?;
        Ok(())
    }

    // ─── Transactional pipeline writes ────────────────────

    /// Persist content + its task together. Content lands `scheduled`.
    pub fn insert_content_and_task(&self, content: &Content, task: &ScheduledTask) -> Result<()> {
        let mut conn = self.lock()?;
        let tx = conn
            .transaction()
            .map_err(|e| PerchError::Store(format!("Enqueue tx: {e}")))?;
        insert_content_tx(&tx, content)?;
        insert_task_tx(&tx, task)?;
        tx.commit()
            .map_err(|e| PerchError::Store(format!("Enqueue commit: {e}")))?;
        Ok(())
    }

    /// Persist a whole thread atomically — either every row lands or none.
    pub fn insert_thread(&self, items: &[(Content, ScheduledTask)]) -> Result<()> {
        let mut conn = self.lock()?;
        let tx = conn
            .transaction()
            .map_err(|e| PerchError::Store(format!("Thread tx: {e}")))?;
        for (content, task) in items {
            insert_content_tx(&tx, content)?;
            insert_task_tx(&tx, task)?;
        }
        tx.commit()
            .map_err(|e| PerchError::Store(format!("Thread commit: {e}")))?;
        Ok(())
    }

    /// Claim a due task: task → running, content → posting, atomically.
    /// Returns false if the task was no longer pending (lost the claim).
    pub fn claim_task(&self, task_id: &str, content_id: &str, now: DateTime<Utc>) -> Result<bool> {
        let mut conn = self.lock()?;
        let tx = conn
            .transaction()
            .map_err(|e| PerchError::Store(format!("Claim tx: {e}")))?;
        let changed = tx
            .execute(
                "UPDATE scheduled_tasks SET status = 'running', executed_at = ?1
                 WHERE id = ?2 AND status = 'pending'",
                rusqlite::params![now.to_rfc3339(), task_id],
            )
            .map_err(|e| PerchError::Store(format!("Claim task: {e}")))?;
        if changed == 0 {
            // Someone else moved it; nothing to commit.
            return Ok(false);
        }
        tx.execute(
            "UPDATE content SET status = 'posting' WHERE id = ?1",
            [content_id],
        )
        .map_err(|e| PerchError::Store(format!("Claim content: {e}")))?;
        tx.commit()
            .map_err(|e| PerchError::Store(format!("Claim commit: {e}")))?;
        Ok(true)
    }

    /// Terminal success: task completed, content posted with external id.
    pub fn complete_task(
        &self,
        task_id: &str,
        content_id: &str,
        external_id: Option<&str>,
        external_url: Option<&str>,
        posted_at: DateTime<Utc>,
    ) -> Result<()> {
        let mut conn = self.lock()?;
        let tx = conn
            .transaction()
            .map_err(|e| PerchError::Store(format!("Complete tx: {e}")))?;
        tx.execute(
            "UPDATE scheduled_tasks SET status = 'completed', executed_at = ?1, last_error = NULL
             WHERE id = ?2",
            rusqlite::params![posted_at.to_rfc3339(), task_id],
        )
        .map_err(|e| PerchError::Store(format!("Complete task: {e}")))?;
        tx.execute(
            "UPDATE content SET status = 'posted', external_id = ?1, external_url = ?2, posted_at = ?3
             WHERE id = ?4",
            rusqlite::params![external_id, external_url, posted_at.to_rfc3339(), content_id],
        )
        .map_err(|e| PerchError::Store(format!("Complete content: {e}")))?;
        tx.commit()
            .map_err(|e| PerchError::Store(format!("Complete commit: {e}")))?;
        Ok(())
    }

    /// Terminal failure: task failed with message + retry bump, content failed.
    pub fn fail_task(&self, task_id: &str, content_id: &str, error: &str) -> Result<()> {
        let mut conn = self.lock()?;
        let tx = conn
            .transaction()
            .map_err(|e| PerchError::Store(format!("Fail tx: {e}")))?;
        tx.execute(
            "UPDATE scheduled_tasks
             SET status = 'failed', retry_count = retry_count + 1, last_error = ?1
             WHERE id = ?2",
            rusqlite::params![error, task_id],
        )
        .map_err(|e| PerchError::Store(format!("Fail task: {e}")))?;
        tx.execute(
            "UPDATE content SET status = 'failed' WHERE id = ?1",
            [content_id],
        )
        .map_err(|e| PerchError::Store(format!("Fail content: {e}")))?;
        tx.commit()
            .map_err(|e| PerchError::Store(format!("Fail commit: {e}")))?;
        Ok(())
    }

    /// Cancel a pending task + its content. Returns false when the task was
    /// not pending (the caller decides whether that is an error).
    pub fn cancel_task(&self, task_id: &str, content_id: &str) -> Result<bool> {
        let mut conn = self.lock()?;
        let tx = conn
            .transaction()
            .map_err(|e| PerchError::Store(format!("Cancel tx: {e}")))?;
        let changed = tx
            .execute(
                "UPDATE scheduled_tasks SET status = 'cancelled'
                 WHERE id = ?1 AND status = 'pending'",
                [task_id],
            )
            .map_err(|e| PerchError::Store(format!("Cancel task: {e}")))?;
        if changed == 0 {
            return Ok(false);
        }
        tx.execute(
            "UPDATE content SET status = 'cancelled' WHERE id = ?1",
            [content_id],
        )
        .map_err(|e| PerchError::Store(format!("Cancel content: {e}")))?;
        tx.commit()
            .map_err(|e| PerchError::Store(format!("Cancel commit: {e}")))?;
        Ok(true)
    }

    /// Re-arm a pending or failed task: back to pending at a new time with
    /// the prior error cleared. Content goes back to scheduled.
    pub fn rearm_task(
        &self,
        task_id: &str,
        content_id: &str,
        new_time: DateTime<Utc>,
    ) -> Result<()> {
        let mut conn = self.lock()?;
        let tx = conn
            .transaction()
            .map_err(|e| PerchError::Store(format!("Rearm tx: {e}")))?;
        tx.execute(
            "UPDATE scheduled_tasks
             SET status = 'pending', scheduled_for = ?1, last_error = NULL, executed_at = NULL
             WHERE id = ?2",
            rusqlite::params![new_time.to_rfc3339(), task_id],
        )
        .map_err(|e| PerchError::Store(format!("Rearm task: {e}")))?;
        tx.execute(
            "UPDATE content SET status = 'scheduled' WHERE id = ?1",
            [content_id],
        )
        .map_err(|e| PerchError::Store(format!("Rearm content: {e}")))?;
        tx.commit()
            .map_err(|e| PerchError::Store(format!("Rearm commit: {e}")))?;
        Ok(())
    }

    /// Purge terminal tasks older than the cutoff. Returns rows removed.
    pub fn cleanup_tasks(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let conn = self.lock()?;
        let removed = conn
            .execute(
                "DELETE FROM scheduled_tasks
                 WHERE status IN ('completed', 'failed', 'cancelled')
                   AND COALESCE(executed_at, created_at) <= ?1",
                [cutoff.to_rfc3339()],
            )
            .map_err(|e| PerchError::Store(format!("Cleanup: {e}")))?;
        Ok(removed)
    }

    // ─── Analytics events ─────────────────────────────────

    pub fn insert_posted_event(&self, event: &PostedEvent) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO analytics_events (content_id, event_type, external_id, posted_at)
             VALUES (?1, 'posted', ?2, ?3)",
            rusqlite::params![
                event.content_id,
                event.external_id,
                event.posted_at.to_rfc3339(),
            ],
        )
        .map_err(|e| PerchError::Store(format!("Save event: {e}")))?;
        Ok(())
    }

    pub fn recent_posted_events(&self, limit: usize) -> Result<Vec<PostedEvent>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT content_id, external_id, posted_at FROM analytics_events
                 ORDER BY id DESC LIMIT ?1",
            )
            .map_err(|e| PerchError::Store(format!("Recent events: {e}")))?;
        let rows = stmt
            .query_map([limit as i64], |row| {
                Ok(PostedEvent {
                    content_id: row.get(0)?,
                    external_id: row.get(1)?,
                    posted_at: parse_ts(&row.get::<_, String>(2)?),
                })
            })
            .map_err(|e| PerchError::Store(format!("Recent events: {e}")))?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| PerchError::Store(format!("Recent events: {e}")))
    }
}

const CONTENT_SELECT: &str = "SELECT id, account_id, body, kind, target_url, generator, \
     style_score, status, thread_id, thread_position, external_id, external_url, posted_at, \
     created_at FROM content";

const TASK_SELECT: &str = "SELECT t.id, t.content_id, t.account_id, t.scheduled_for, t.status, \
     t.retry_count, t.last_error, t.executed_at, t.created_at FROM scheduled_tasks t";

fn insert_content_tx(tx: &rusqlite::Transaction<'_>, content: &Content) -> Result<()> {
    tx.execute(
        "INSERT INTO content
         (id, account_id, body, kind, target_url, generator, style_score, status,
          thread_id, thread_position, external_id, external_url, posted_at, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
        rusqlite::params![
            content.id,
            content.account_id,
            content.text,
            content.kind.as_str(),
            content.target_url,
            content.generator,
            content.style_score,
            content.status.as_str(),
            content.thread_id,
            content.thread_position,
            content.external_id,
            content.external_url,
            content.posted_at.map(|t| t.to_rfc3339()),
            content.created_at.to_rfc3339(),
        ],
    )
    .map_err(|e| PerchError::Store(format!("Insert content: {e}")))?;
    Ok(())
}

fn insert_task_tx(tx: &rusqlite::Transaction<'_>, task: &ScheduledTask) -> Result<()> {
    tx.execute(
        "INSERT INTO scheduled_tasks
         (id, content_id, account_id, scheduled_for, status, retry_count, last_error,
          executed_at, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        rusqlite::params![
            task.id,
            task.content_id,
            task.account_id,
            task.scheduled_for.to_rfc3339(),
            task.status.as_str(),
            task.retry_count,
            task.last_error,
            task.executed_at.map(|t| t.to_rfc3339()),
            task.created_at.to_rfc3339(),
        ],
    )
    .map_err(|e| PerchError::Store(format!("Insert task: {e}")))?;
    Ok(())
}

fn content_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Content> {
    Ok(Content {
        id: row.get(0)?,
        account_id: row.get(1)?,
        text: row.get(2)?,
        kind: ActionKind::parse(&row.get::<_, String>(3)?),
        target_url: row.get(4)?,
        generator: row.get(5)?,
        style_score: row.get(6)?,
        status: ContentStatus::parse(&row.get::<_, String>(7)?),
        thread_id: row.get(8)?,
        thread_position: row.get(9)?,
        external_id: row.get(10)?,
        external_url: row.get(11)?,
        posted_at: row.get::<_, Option<String>>(12)?.map(|s| parse_ts(&s)),
        created_at: parse_ts(&row.get::<_, String>(13)?),
    })
}

fn task_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ScheduledTask> {
    Ok(ScheduledTask {
        id: row.get(0)?,
        content_id: row.get(1)?,
        account_id: row.get(2)?,
        scheduled_for: parse_ts(&row.get::<_, String>(3)?),
        status: TaskStatus::parse(&row.get::<_, String>(4)?),
        retry_count: row.get(5)?,
        last_error: row.get(6)?,
        executed_at: row.get::<_, Option<String>>(7)?.map(|s| parse_ts(&s)),
        created_at: parse_ts(&row.get::<_, String>(8)?),
    })
}

fn parse_ts(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|d| d.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn temp_store(name: &str) -> (Store, std::path::PathBuf) {
        let dir = std::env::temp_dir().join(format!("perch-store-test-{name}"));
        std::fs::remove_dir_all(&dir).ok();
        std::fs::create_dir_all(&dir).ok();
        (Store::open(&dir.join("test.db")).unwrap(), dir)
    }

    fn scheduled(account: &str, text: &str) -> (Content, ScheduledTask) {
        let mut content = Content::new(account, text, ActionKind::Tweet);
        content.status = ContentStatus::Scheduled;
        let task = ScheduledTask::new(&content.id, account, Utc::now() - Duration::seconds(1));
        (content, task)
    }

    #[test]
    fn test_open_and_migrate() {
        let (store, dir) = temp_store("migrate");
        assert!(store.due_tasks(Utc::now()).unwrap().is_empty());
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_enqueue_and_due_ordering() {
        let (store, dir) = temp_store("due");
        let (c1, mut t1) = scheduled("a1", "first");
        let (c2, mut t2) = scheduled("a1", "second");
        t1.scheduled_for = Utc::now() - Duration::seconds(30);
        t2.scheduled_for = Utc::now() - Duration::seconds(60);
        store.insert_content_and_task(&c1, &t1).unwrap();
        store.insert_content_and_task(&c2, &t2).unwrap();

        let due = store.due_tasks(Utc::now()).unwrap();
        assert_eq!(due.len(), 2);
        // Earlier scheduled_for first
        assert_eq!(due[0].id, t2.id);
        assert_eq!(due[1].id, t1.id);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_claim_is_single_shot() {
        let (store, dir) = temp_store("claim");
        let (content, task) = scheduled("a1", "hello");
        store.insert_content_and_task(&content, &task).unwrap();

        assert!(store.claim_task(&task.id, &content.id, Utc::now()).unwrap());
        // Second claim loses — task is running now
        assert!(!store.claim_task(&task.id, &content.id, Utc::now()).unwrap());

        let loaded = store.get_task(&task.id).unwrap().unwrap();
        assert_eq!(loaded.status, TaskStatus::Running);
        let c = store.get_content(&content.id).unwrap().unwrap();
        assert_eq!(c.status, ContentStatus::Posting);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_complete_writes_both_rows() {
        let (store, dir) = temp_store("complete");
        let (content, task) = scheduled("a1", "hello");
        store.insert_content_and_task(&content, &task).unwrap();
        store.claim_task(&task.id, &content.id, Utc::now()).unwrap();

        let posted_at = Utc::now();
        store
            .complete_task(&task.id, &content.id, Some("abc"), Some("https://x.com/x/status/abc"), posted_at)
            .unwrap();

        let t = store.get_task(&task.id).unwrap().unwrap();
        assert_eq!(t.status, TaskStatus::Completed);
        let c = store.get_content(&content.id).unwrap().unwrap();
        assert_eq!(c.status, ContentStatus::Posted);
        assert_eq!(c.external_id.as_deref(), Some("abc"));
        assert!(c.posted_at.is_some());
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_fail_bumps_retry_and_records_error() {
        let (store, dir) = temp_store("fail");
        let (content, task) = scheduled("a1", "hello");
        store.insert_content_and_task(&content, &task).unwrap();
        store.claim_task(&task.id, &content.id, Utc::now()).unwrap();
        store.fail_task(&task.id, &content.id, "network timeout").unwrap();

        let t = store.get_task(&task.id).unwrap().unwrap();
        assert_eq!(t.status, TaskStatus::Failed);
        assert_eq!(t.retry_count, 1);
        assert_eq!(t.last_error.as_deref(), Some("network timeout"));
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_cancel_only_pending() {
        let (store, dir) = temp_store("cancel");
        let (content, task) = scheduled("a1", "hello");
        store.insert_content_and_task(&content, &task).unwrap();

        assert!(store.cancel_task(&task.id, &content.id).unwrap());
        // Already cancelled — not pending any more
        assert!(!store.cancel_task(&task.id, &content.id).unwrap());
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_single_flight_guard() {
        let (store, dir) = temp_store("singleflight");
        let (content, task) = scheduled("a1", "hello");
        store.insert_content_and_task(&content, &task).unwrap();
        assert!(store.has_open_task(&content.id).unwrap());

        store.cancel_task(&task.id, &content.id).unwrap();
        assert!(!store.has_open_task(&content.id).unwrap());
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_thread_insert_and_lookup() {
        let (store, dir) = temp_store("thread");
        let mut items = Vec::new();
        for pos in 1..=3 {
            let (mut c, t) = scheduled("a1", &format!("part {pos}"));
            c.thread_id = Some("th-1".into());
            c.thread_position = Some(pos);
            items.push((c, t));
        }
        store.insert_thread(&items).unwrap();

        let second = store.get_thread_item("th-1", 2).unwrap().unwrap();
        assert_eq!(second.text, "part 2");
        assert!(store.get_thread_item("th-1", 4).unwrap().is_none());
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_cleanup_purges_only_old_terminal() {
        let (store, dir) = temp_store("cleanup");
        let (c1, mut t1) = scheduled("a1", "old done");
        t1.created_at = Utc::now() - Duration::days(45);
        let (c2, t2) = scheduled("a1", "still pending");
        store.insert_content_and_task(&c1, &t1).unwrap();
        store.insert_content_and_task(&c2, &t2).unwrap();
        store.cancel_task(&t1.id, &c1.id).unwrap();

        let removed = store.cleanup_tasks(Utc::now() - Duration::days(30)).unwrap();
        assert_eq!(removed, 1);
        assert!(store.get_task(&t1.id).unwrap().is_none());
        assert!(store.get_task(&t2.id).unwrap().is_some());
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_missing_rows_are_none_not_err() {
        let (store, dir) = temp_store("missing");
        // No-row lookups stay Ok(None); only real SQLite failures are Err
        assert!(store.get_account("nope").unwrap().is_none());
        assert!(store.get_content("nope").unwrap().is_none());
        assert!(store.get_task("nope").unwrap().is_none());
        assert!(store.get_thread_item("nope", 1).unwrap().is_none());
        assert!(store.get_session_record("nope").unwrap().is_none());
        assert!(store.recent_posted_events(10).unwrap().is_empty());
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_session_record_roundtrip() {
        let (store, dir) = temp_store("session");
        let record = SessionRecord {
            account_id: "a1".into(),
            cookies: "c2FsdA:aXY:Y2lwaGVy".into(),
            local_storage: "c2FsdA:aXY:bHM".into(),
            fingerprint: Fingerprint {
                user_agent: "Mozilla/5.0".into(),
                viewport_width: 1920,
                viewport_height: 1080,
            },
            saved_at: Utc::now(),
        };
        store.upsert_session_record(&record).unwrap();
        let loaded = store.get_session_record("a1").unwrap().unwrap();
        assert_eq!(loaded.cookies, record.cookies);
        assert_eq!(loaded.fingerprint, record.fingerprint);

        // Overwrite on save
        let mut updated = record.clone();
        updated.cookies = "bmV3:aXY:Y2lwaGVy".into();
        store.upsert_session_record(&updated).unwrap();
        let loaded = store.get_session_record("a1").unwrap().unwrap();
        assert_eq!(loaded.cookies, updated.cookies);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_stale_running_sweep_query() {
        let (store, dir) = temp_store("stale");
        let (content, task) = scheduled("a1", "crashed mid-flight");
        store.insert_content_and_task(&content, &task).unwrap();
        store
            .claim_task(&task.id, &content.id, Utc::now() - Duration::seconds(300))
            .unwrap();

        let stale = store
            .stale_running_tasks(Utc::now() - Duration::seconds(120))
            .unwrap();
        assert_eq!(stale.len(), 1);
        assert_eq!(stale[0].id, task.id);
        std::fs::remove_dir_all(&dir).ok();
    }
}
