//! Data model for the posting pipeline: accounts, content, scheduled tasks,
//! session records, and the status vocabularies stored in SQLite.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A managed external profile the pipeline posts on behalf of.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub id: String,
    pub handle: String,
    pub status: AccountStatus,
    pub created_at: DateTime<Utc>,
}

impl Account {
    pub fn new(handle: &str) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            handle: handle.to_string(),
            status: AccountStatus::Active,
            created_at: Utc::now(),
        }
    }
}

/// Account activity status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccountStatus {
    Active,
    Suspended,
    Error,
}

impl AccountStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountStatus::Active => "active",
            AccountStatus::Suspended => "suspended",
            AccountStatus::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "suspended" => AccountStatus::Suspended,
            "error" => AccountStatus::Error,
            _ => AccountStatus::Active,
        }
    }
}

/// What kind of write action a content row asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ActionKind {
    Tweet,
    Reply,
    Like,
    Repost,
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::Tweet => "tweet",
            ActionKind::Reply => "reply",
            ActionKind::Like => "like",
            ActionKind::Repost => "repost",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "reply" => ActionKind::Reply,
            "like" => ActionKind::Like,
            "repost" => ActionKind::Repost,
            _ => ActionKind::Tweet,
        }
    }
}

impl std::fmt::Display for ActionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Content lifecycle — the vocabulary callers see.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContentStatus {
    Draft,
    Scheduled,
    Posting,
    Posted,
    Failed,
    Cancelled,
}

impl ContentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentStatus::Draft => "draft",
            ContentStatus::Scheduled => "scheduled",
            ContentStatus::Posting => "posting",
            ContentStatus::Posted => "posted",
            ContentStatus::Failed => "failed",
            ContentStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "scheduled" => ContentStatus::Scheduled,
            "posting" => ContentStatus::Posting,
            "posted" => ContentStatus::Posted,
            "failed" => ContentStatus::Failed,
            "cancelled" => ContentStatus::Cancelled,
            _ => ContentStatus::Draft,
        }
    }
}

/// Scheduled-task lifecycle — the scheduler's internal vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "running" => TaskStatus::Running,
            "completed" => TaskStatus::Completed,
            "failed" => TaskStatus::Failed,
            "cancelled" => TaskStatus::Cancelled,
            _ => TaskStatus::Pending,
        }
    }

    /// Terminal states never transition again.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }

    /// The content status a task status maps onto while the scheduler
    /// drives execution. Single source of truth for the two vocabularies.
    pub fn content_status(&self) -> ContentStatus {
        match self {
            TaskStatus::Pending => ContentStatus::Scheduled,
            TaskStatus::Running => ContentStatus::Posting,
            TaskStatus::Completed => ContentStatus::Posted,
            TaskStatus::Failed => ContentStatus::Failed,
            TaskStatus::Cancelled => ContentStatus::Cancelled,
        }
    }
}

/// A unit of text to publish (a "tweet"), standalone or part of a thread.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Content {
    pub id: String,
    pub account_id: String,
    pub text: String,
    pub kind: ActionKind,
    /// Reply/like/repost target. Ignored for plain tweets.
    pub target_url: Option<String>,
    /// Which generator produced the text.
    pub generator: Option<String>,
    /// Style-match score reported by the generator.
    pub style_score: Option<f64>,
    pub status: ContentStatus,
    pub thread_id: Option<String>,
    /// 1-based position inside a thread.
    pub thread_position: Option<i64>,
    /// Platform-assigned id once posted. Reply target for the next thread item.
    pub external_id: Option<String>,
    pub external_url: Option<String>,
    pub posted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Content {
    pub fn new(account_id: &str, text: &str, kind: ActionKind) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            account_id: account_id.to_string(),
            text: text.to_string(),
            kind,
            target_url: None,
            generator: None,
            style_score: None,
            status: ContentStatus::Draft,
            thread_id: None,
            thread_position: None,
            external_id: None,
            external_url: None,
            posted_at: None,
            created_at: Utc::now(),
        }
    }
}

/// The durable record of one intended execution: time, outcome, retries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledTask {
    pub id: String,
    pub content_id: String,
    pub account_id: String,
    pub scheduled_for: DateTime<Utc>,
    pub status: TaskStatus,
    pub retry_count: u32,
    pub last_error: Option<String>,
    pub executed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl ScheduledTask {
    pub fn new(content_id: &str, account_id: &str, scheduled_for: DateTime<Utc>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            content_id: content_id.to_string(),
            account_id: account_id.to_string(),
            scheduled_for,
            status: TaskStatus::Pending,
            retry_count: 0,
            last_error: None,
            executed_at: None,
            created_at: Utc::now(),
        }
    }
}

/// Browser device fingerprint pinned to a live session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fingerprint {
    pub user_agent: String,
    pub viewport_width: u32,
    pub viewport_height: u32,
}

/// Durable session record. Cookie and local-storage blobs are stored
/// encrypted (salt:iv:ciphertext) — never plaintext.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    pub account_id: String,
    pub cookies: String,
    pub local_storage: String,
    pub fingerprint: Fingerprint,
    pub saved_at: DateTime<Utc>,
}

/// Opaque handle pair for a live browser context + page, owned by the
/// session manager and passed to the executor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrowserHandle {
    pub context_id: String,
    pub page_id: String,
}
