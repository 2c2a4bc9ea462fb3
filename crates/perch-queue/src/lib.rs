//! The queue service — the write-side API used by the dashboard and the
//! generation pipeline. Everything is validated before any durable write;
//! thread enqueues are all-or-nothing.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use rand::Rng;

use perch_core::config::SchedulerConfig;
use perch_core::error::{PerchError, Result};
use perch_core::models::{ActionKind, Content, ContentStatus, ScheduledTask, TaskStatus};
use perch_pacing::PacingGovernor;
use perch_store::Store;

/// Platform hard limit on post length.
pub const MAX_CONTENT_LEN: usize = 280;
/// A thread is at least two parts, at most twenty-five.
pub const MIN_THREAD_LEN: usize = 2;
pub const MAX_THREAD_LEN: usize = 25;

/// When an enqueued action should run.
#[derive(Debug, Clone)]
pub enum SchedulePolicy {
    /// Explicit timestamp, must be strictly in the future.
    At(DateTime<Utc>),
    /// Delegate to the governor's posting-pattern heuristic.
    Optimal,
    /// Soon: now plus a governor-computed human delay.
    Default,
}

/// Write-side API over the shared store.
pub struct QueueService {
    store: Arc<Store>,
    governor: Arc<PacingGovernor>,
    config: SchedulerConfig,
}

impl QueueService {
    pub fn new(store: Arc<Store>, governor: Arc<PacingGovernor>, config: SchedulerConfig) -> Self {
        Self {
            store,
            governor,
            config,
        }
    }

    /// Enqueue one content item: Content (`scheduled`) + ScheduledTask
    /// (`pending`), created atomically.
    pub fn enqueue(&self, mut content: Content, policy: SchedulePolicy) -> Result<ScheduledTask> {
        validate_text(content.kind, &content.text)?;
        if content.kind != ActionKind::Tweet && content.target_url.is_none() {
            return Err(PerchError::Validation(format!(
                "{} needs a target URL",
                content.kind
            )));
        }
        if self.store.has_open_task(&content.id)? {
            return Err(PerchError::Validation(format!(
                "Content {} already has an open task",
                content.id
            )));
        }

        let scheduled_for = self.resolve_policy(&policy, content.kind)?;
        content.status = ContentStatus::Scheduled;
        let task = ScheduledTask::new(&content.id, &content.account_id, scheduled_for);
        self.store.insert_content_and_task(&content, &task)?;
        tracing::info!(
            "📬 Enqueued {} for {} at {}",
            content.kind,
            content.account_id,
            scheduled_for
        );
        Ok(task)
    }

    /// Enqueue an ordered thread. Items share a thread id; each one is
    /// spaced `thread_interval + jitter` after the previous. Any
    /// validation failure rolls the whole thread back — no partial thread
    /// ever reaches the store.
    pub fn enqueue_thread(
        &self,
        account_id: &str,
        texts: &[String],
        policy: SchedulePolicy,
    ) -> Result<Vec<ScheduledTask>> {
        if texts.len() < MIN_THREAD_LEN || texts.len() > MAX_THREAD_LEN {
            return Err(PerchError::Validation(format!(
                "Thread length {} outside [{MIN_THREAD_LEN}, {MAX_THREAD_LEN}]",
                texts.len()
            )));
        }

        let thread_id = uuid::Uuid::new_v4().to_string();
        let mut scheduled_for = self.resolve_policy(&policy, ActionKind::Tweet)?;
        let mut rng = rand::thread_rng();
        let mut items = Vec::with_capacity(texts.len());

        for (i, text) in texts.iter().enumerate() {
            // Position 1 opens the thread; the rest reply to their predecessor.
            let kind = if i == 0 { ActionKind::Tweet } else { ActionKind::Reply };
            validate_text(kind, text)?;

            let mut content = Content::new(account_id, text, kind);
            content.status = ContentStatus::Scheduled;
            content.thread_id = Some(thread_id.clone());
            content.thread_position = Some(i as i64 + 1);

            let task = ScheduledTask::new(&content.id, account_id, scheduled_for);
            items.push((content, task));

            let jitter = rng.gen_range(0..=self.config.thread_jitter_secs);
            scheduled_for += Duration::seconds(self.config.thread_interval_secs + jitter);
        }

        // One transaction: every row lands or none do.
        self.store.insert_thread(&items)?;
        tracing::info!(
            "🧵 Enqueued {}-part thread {thread_id} for {account_id}",
            items.len()
        );
        Ok(items.into_iter().map(|(_, task)| task).collect())
    }

    /// Cancel a pending task. Cancelling an already-cancelled task is a
    /// no-op; cancelling a running or finished one is an error.
    pub fn cancel(&self, task_id: &str) -> Result<()> {
        let task = self
            .store
            .get_task(task_id)?
            .ok_or_else(|| PerchError::Validation(format!("Unknown task {task_id}")))?;

        match task.status {
            TaskStatus::Cancelled => Ok(()),
            TaskStatus::Pending => {
                if self.store.cancel_task(&task.id, &task.content_id)? {
                    tracing::info!("🚫 Cancelled task {task_id}");
                    Ok(())
                } else {
                    // Lost a race with the scheduler; report the real state.
                    Err(PerchError::Validation(format!(
                        "Task {task_id} is no longer pending"
                    )))
                }
            }
            other => Err(PerchError::Validation(format!(
                "Only pending tasks can be cancelled, {task_id} is {}",
                other.as_str()
            ))),
        }
    }

    /// Re-arm a pending or failed task at a new time, clearing its prior
    /// error. Subject to the retry ceiling — this is the only path that
    /// brings a failed task back to pending.
    pub fn reschedule(
        &self,
        task_id: &str,
        new_time: Option<DateTime<Utc>>,
    ) -> Result<ScheduledTask> {
        let task = self
            .store
            .get_task(task_id)?
            .ok_or_else(|| PerchError::Validation(format!("Unknown task {task_id}")))?;

        if !matches!(task.status, TaskStatus::Pending | TaskStatus::Failed) {
            return Err(PerchError::Validation(format!(
                "Task {task_id} is {}, cannot reschedule",
                task.status.as_str()
            )));
        }
        if task.retry_count >= self.config.max_retries {
            return Err(PerchError::Validation(format!(
                "Task {task_id} exhausted its {} retries",
                self.config.max_retries
            )));
        }

        let when = match new_time {
            Some(t) => {
                if t <= Utc::now() {
                    return Err(PerchError::Validation(
                        "Reschedule time must be in the future".into(),
                    ));
                }
                t
            }
            None => {
                let kind = self
                    .store
                    .get_content(&task.content_id)?
                    .map(|c| c.kind)
                    .unwrap_or(ActionKind::Tweet);
                Utc::now() + Duration::from_std(self.governor.delay_for(kind)).unwrap_or_default()
            }
        };

        self.store.rearm_task(&task.id, &task.content_id, when)?;
        tracing::info!("🔄 Rescheduled task {task_id} to {when}");
        self.store
            .get_task(task_id)?
            .ok_or_else(|| PerchError::Store(format!("Task {task_id} vanished")))
    }

    /// Recompute scheduled times for every pending task of the account,
    /// preserving relative order, spacing them `interval + jitter` apart.
    pub fn reorder_queue(
        &self,
        account_id: &str,
        start_time: DateTime<Utc>,
        interval_secs: i64,
    ) -> Result<usize> {
        let tasks = self.store.pending_tasks_for_account(account_id)?;
        let mut rng = rand::thread_rng();
        let mut when = start_time;
        let mut updates = Vec::with_capacity(tasks.len());
        for task in &tasks {
            updates.push((task.id.clone(), when));
            let jitter = rng.gen_range(0..=self.config.thread_jitter_secs);
            when += Duration::seconds(interval_secs + jitter);
        }
        self.store.update_task_schedules(&updates)?;
        tracing::info!("📐 Reordered {} pending task(s) for {account_id}", tasks.len());
        Ok(tasks.len())
    }

    /// Purge terminal tasks older than the threshold. Returns rows removed.
    pub fn cleanup(&self, older_than_days: i64) -> Result<usize> {
        let cutoff = Utc::now() - Duration::days(older_than_days);
        let removed = self.store.cleanup_tasks(cutoff)?;
        if removed > 0 {
            tracing::info!("🧹 Purged {removed} terminal task(s) older than {older_than_days}d");
        }
        Ok(removed)
    }

    fn resolve_policy(&self, policy: &SchedulePolicy, kind: ActionKind) -> Result<DateTime<Utc>> {
        match policy {
            SchedulePolicy::At(t) => {
                if *t <= Utc::now() {
                    return Err(PerchError::Validation(
                        "Scheduled time must be strictly in the future".into(),
                    ));
                }
                Ok(*t)
            }
            SchedulePolicy::Optimal => Ok(self.governor.optimal_time()),
            SchedulePolicy::Default => Ok(Utc::now()
                + Duration::from_std(self.governor.delay_for(kind)).unwrap_or_default()),
        }
    }
}

/// Validate content text for the action kind. Likes carry no text.
fn validate_text(kind: ActionKind, text: &str) -> Result<()> {
    if kind == ActionKind::Like {
        return Ok(());
    }
    if text.trim().is_empty() {
        return Err(PerchError::Validation("Content text is empty".into()));
    }
    let chars = text.chars().count();
    if chars > MAX_CONTENT_LEN {
        return Err(PerchError::Validation(format!(
            "Content length {chars} exceeds platform limit {MAX_CONTENT_LEN}"
        )));
    }
    Ok(())
}
