//! The scheduler engine: one `tick` per poll interval, driving due tasks
//! through the gates (thread order, pacing budget), the transactional
//! claim, the session, and the executor.

use std::sync::Arc;

use chrono::Utc;
use tokio::time::sleep;

use perch_core::config::SchedulerConfig;
use perch_core::error::{PerchError, Result};
use perch_core::models::{ActionKind, Content, ContentStatus, ScheduledTask};
use perch_core::traits::{AnalyticsSink, ExecutionResult, Executor, PostedEvent};
use perch_pacing::PacingGovernor;
use perch_session::SessionManager;
use perch_store::Store;

pub struct Scheduler {
    store: Arc<Store>,
    sessions: Arc<SessionManager>,
    governor: Arc<PacingGovernor>,
    executor: Arc<dyn Executor>,
    analytics: Arc<dyn AnalyticsSink>,
    config: SchedulerConfig,
}

impl Scheduler {
    pub fn new(
        store: Arc<Store>,
        sessions: Arc<SessionManager>,
        governor: Arc<PacingGovernor>,
        executor: Arc<dyn Executor>,
        analytics: Arc<dyn AnalyticsSink>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            store,
            sessions,
            governor,
            executor,
            analytics,
            config,
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Whether the governor considers this a plausible moment to be online.
    /// The polling loop skips whole cycles outside the window; `tick` itself
    /// stays unconditional so direct callers keep deterministic behavior.
    pub fn in_active_window(&self) -> bool {
        self.governor.is_active_window()
    }

    /// One polling cycle. Returns how many tasks were claimed and driven to
    /// a terminal outcome this cycle. Deferrals (thread order, budget) are
    /// not counted and cost no retry.
    pub async fn tick(&self) -> Result<usize> {
        let now = Utc::now();
        let due = self.store.due_tasks(now)?;
        if due.is_empty() {
            return Ok(0);
        }
        tracing::debug!("🔔 {} due task(s)", due.len());

        let mut processed = 0;
        for task in due {
            if let Some(pause) = self.governor.needs_break() {
                tracing::info!(
                    "😴 Recent burst too dense, ending the cycle ({}s break)",
                    pause.as_secs()
                );
                break;
            }

            let Some(content) = self.store.get_content(&task.content_id)? else {
                self.store
                    .fail_task(&task.id, &task.content_id, "Content row missing")?;
                continue;
            };

            // Thread gate: a reply in a thread waits for its predecessor to
            // actually post. No writes on deferral.
            if !self.predecessor_posted(&content)? {
                tracing::debug!("⏸️ Task {} waiting on thread predecessor", task.id);
                continue;
            }

            // Budget gate: denial moves the task to the governor's resume
            // time. Throttling is pacing, not failure.
            let decision = self.governor.check_budget(content.kind);
            if !decision.allowed {
                if let Some(wait) = decision.wait_until {
                    tracing::debug!(
                        "⏳ Budget exhausted for {}, deferring task {} to {wait}",
                        content.kind,
                        task.id
                    );
                    self.store.update_task_schedule(&task.id, wait)?;
                }
                continue;
            }

            // Claim loses mean someone else already moved the task.
            if !self.store.claim_task(&task.id, &task.content_id, now)? {
                continue;
            }
            processed += 1;

            match self.execute(&task, &content).await {
                Ok(result) if result.success => {
                    let posted_at = Utc::now();
                    self.store.complete_task(
                        &task.id,
                        &content.id,
                        result.external_id.as_deref(),
                        result.external_url.as_deref(),
                        posted_at,
                    )?;
                    self.governor.record(content.kind);
                    if let Err(e) = self.sessions.persist(&task.account_id).await {
                        tracing::warn!(
                            "⚠️ Failed to persist session for {}: {e}",
                            task.account_id
                        );
                    }
                    if let Some(external_id) = result.external_id {
                        self.analytics.posted(&PostedEvent {
                            content_id: content.id.clone(),
                            external_id,
                            posted_at,
                        });
                    }
                    tracing::info!(
                        "✅ Posted {} for {} (task {})",
                        content.kind,
                        task.account_id,
                        task.id
                    );
                }
                Ok(result) => {
                    let msg = result
                        .error
                        .unwrap_or_else(|| "Executor reported failure".into());
                    tracing::warn!("⚠️ Task {} failed: {msg}", task.id);
                    self.store.fail_task(&task.id, &content.id, &msg)?;
                }
                Err(e) => {
                    tracing::warn!("⚠️ Task {} errored: {e}", task.id);
                    self.store.fail_task(&task.id, &content.id, &e.to_string())?;
                }
            }
        }
        Ok(processed)
    }

    /// Startup sweep: `Running` tasks older than the stale threshold were
    /// interrupted mid-flight. Mark them failed for manual reconciliation
    /// rather than blindly re-posting.
    pub fn recover_stale_running(&self) -> Result<usize> {
        let cutoff = Utc::now() - chrono::Duration::seconds(self.config.stale_running_secs);
        let stale = self.store.stale_running_tasks(cutoff)?;
        for task in &stale {
            tracing::warn!(
                "🔁 Recovering stale running task {} (scheduled {})",
                task.id,
                task.scheduled_for
            );
            self.store
                .fail_task(&task.id, &task.content_id, "Interrupted: found running at startup")?;
        }
        Ok(stale.len())
    }

    /// Purge terminal tasks past the retention window.
    pub fn cleanup(&self) -> Result<usize> {
        let cutoff = Utc::now() - chrono::Duration::days(self.config.cleanup_after_days);
        self.store.cleanup_tasks(cutoff)
    }

    fn predecessor_posted(&self, content: &Content) -> Result<bool> {
        let (Some(thread_id), Some(pos)) = (&content.thread_id, content.thread_position) else {
            return Ok(true);
        };
        if pos <= 1 {
            return Ok(true);
        }
        match self.store.get_thread_item(thread_id, pos - 1)? {
            Some(prev) => Ok(prev.status == ContentStatus::Posted),
            None => Ok(false),
        }
    }

    /// Acquire the account session, pace like a human, call the executor.
    /// Expected platform failures come back inside the result; `Err` here
    /// means infrastructure (session, missing target).
    async fn execute(&self, task: &ScheduledTask, content: &Content) -> Result<ExecutionResult> {
        let handle = self.sessions.acquire(&task.account_id).await?;
        sleep(self.governor.delay_for(content.kind)).await;

        match content.kind {
            ActionKind::Tweet => {
                sleep(self.governor.typing_duration(&content.text)).await;
                self.executor.post_content(&handle, &content.text).await
            }
            ActionKind::Reply => {
                let target = self.reply_target(content)?;
                sleep(self.governor.reading_duration(&content.text)).await;
                sleep(self.governor.typing_duration(&content.text)).await;
                self.executor.post_reply(&handle, &target, &content.text).await
            }
            ActionKind::Like => {
                let target = content.target_url.clone().ok_or_else(|| {
                    PerchError::Validation(format!("Like {} has no target URL", content.id))
                })?;
                sleep(self.governor.reading_duration(&content.text)).await;
                self.executor.like(&handle, &target).await
            }
            ActionKind::Repost => {
                let target = content.target_url.clone().ok_or_else(|| {
                    PerchError::Validation(format!("Repost {} has no target URL", content.id))
                })?;
                sleep(self.governor.reading_duration(&content.text)).await;
                let quote = (!content.text.trim().is_empty()).then_some(content.text.as_str());
                if let Some(q) = quote {
                    sleep(self.governor.typing_duration(q)).await;
                }
                self.executor.repost(&handle, &target, quote).await
            }
        }
    }

    /// Thread items reply to their freshly-posted predecessor; standalone
    /// replies use their stored target URL.
    fn reply_target(&self, content: &Content) -> Result<String> {
        if let (Some(thread_id), Some(pos @ 2..)) =
            (&content.thread_id, content.thread_position)
        {
            let prev = self
                .store
                .get_thread_item(thread_id, pos - 1)?
                .ok_or_else(|| {
                    PerchError::Store(format!("Thread {thread_id} item {} missing", pos - 1))
                })?;
            return prev.external_url.or(prev.external_id).ok_or_else(|| {
                PerchError::Executor(format!(
                    "Thread {thread_id} item {} posted without an external id",
                    pos - 1
                ))
            });
        }
        content.target_url.clone().ok_or_else(|| {
            PerchError::Validation(format!("Reply {} has no target URL", content.id))
        })
    }
}

/// Spawn the scheduler loop as a background tokio task: a startup stale
/// sweep, then one `tick` per poll interval, with an hourly retention purge.
pub fn spawn_scheduler(scheduler: Arc<Scheduler>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        match scheduler.recover_stale_running() {
            Ok(0) => {}
            Ok(n) => tracing::warn!("🔁 Recovered {n} stale running task(s) at startup"),
            Err(e) => tracing::warn!("⚠️ Stale-task recovery failed: {e}"),
        }

        let poll = scheduler.config().poll_interval_secs;
        tracing::info!("⏰ Scheduler started (poll every {poll}s)");
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(poll.max(1)));
        let mut ticks: u64 = 0;

        loop {
            interval.tick().await;
            ticks += 1;
            if !scheduler.in_active_window() {
                tracing::debug!("🌙 Outside active hours, skipping cycle");
                continue;
            }
            match scheduler.tick().await {
                Ok(0) => {}
                Ok(n) => tracing::info!("📣 Cycle processed {n} task(s)"),
                Err(e) => tracing::warn!("⚠️ Scheduler cycle failed: {e}"),
            }
            if ticks % 60 == 0 {
                match scheduler.cleanup() {
                    Ok(0) | Err(_) => {}
                    Ok(n) => tracing::info!("🧹 Purged {n} old task(s)"),
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::StoreSink;
    use async_trait::async_trait;
    use perch_core::config::{PacingConfig, SessionConfig};
    use perch_core::models::{BrowserHandle, Fingerprint, TaskStatus};
    use perch_core::traits::BrowserDriver;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct StubDriver {
        created: AtomicUsize,
    }

    #[async_trait]
    impl BrowserDriver for StubDriver {
        async fn create_context(&self, _fingerprint: &Fingerprint) -> Result<BrowserHandle> {
            let n = self.created.fetch_add(1, Ordering::SeqCst);
            Ok(BrowserHandle {
                context_id: format!("ctx-{n}"),
                page_id: format!("page-{n}"),
            })
        }

        async fn inject_stealth(&self, _handle: &BrowserHandle) -> Result<()> {
            Ok(())
        }

        async fn restore_state(
            &self,
            _handle: &BrowserHandle,
            _cookies: &str,
            _local_storage: &str,
        ) -> Result<()> {
            Ok(())
        }

        async fn export_state(&self, _handle: &BrowserHandle) -> Result<(String, String)> {
            Ok(("[]".into(), "{}".into()))
        }

        async fn is_alive(&self, _handle: &BrowserHandle) -> bool {
            true
        }

        async fn fetch_page(&self, _handle: &BrowserHandle, _url: &str) -> Result<String> {
            Ok(String::new())
        }

        async fn close(&self, _handle: &BrowserHandle) -> Result<()> {
            Ok(())
        }
    }

    /// Records every call; pops scripted results first, then defaults to
    /// success with a generated id.
    struct StubExecutor {
        script: Mutex<VecDeque<ExecutionResult>>,
        calls: Mutex<Vec<(String, String)>>,
        counter: AtomicUsize,
    }

    impl StubExecutor {
        fn new() -> Self {
            Self {
                script: Mutex::new(VecDeque::new()),
                calls: Mutex::new(Vec::new()),
                counter: AtomicUsize::new(0),
            }
        }

        fn push_result(&self, result: ExecutionResult) {
            self.script.lock().unwrap().push_back(result);
        }

        fn calls(&self) -> Vec<(String, String)> {
            self.calls.lock().unwrap().clone()
        }

        fn next_result(&self) -> ExecutionResult {
            if let Some(r) = self.script.lock().unwrap().pop_front() {
                return r;
            }
            let n = self.counter.fetch_add(1, Ordering::SeqCst);
            ExecutionResult::ok(&format!("ext-{n}"), &format!("https://x.com/u/status/{n}"))
        }

        fn record(&self, action: &str, detail: &str) {
            self.calls
                .lock()
                .unwrap()
                .push((action.to_string(), detail.to_string()));
        }
    }

    #[async_trait]
    impl Executor for StubExecutor {
        async fn post_content(
            &self,
            _session: &BrowserHandle,
            text: &str,
        ) -> Result<ExecutionResult> {
            self.record("post", text);
            Ok(self.next_result())
        }

        async fn post_reply(
            &self,
            _session: &BrowserHandle,
            reply_to_url: &str,
            _text: &str,
        ) -> Result<ExecutionResult> {
            self.record("reply", reply_to_url);
            Ok(self.next_result())
        }

        async fn like(&self, _session: &BrowserHandle, url: &str) -> Result<ExecutionResult> {
            self.record("like", url);
            let mut result = self.next_result();
            result.external_id = None;
            result.external_url = None;
            Ok(result)
        }

        async fn repost(
            &self,
            _session: &BrowserHandle,
            url: &str,
            _quote_text: Option<&str>,
        ) -> Result<ExecutionResult> {
            self.record("repost", url);
            Ok(self.next_result())
        }
    }

    fn fast_pacing() -> PacingConfig {
        PacingConfig {
            like_delay_ms: (0, 1),
            reply_delay_ms: (0, 1),
            tweet_delay_ms: (0, 1),
            repost_delay_ms: (0, 1),
            typing_wpm: 60_000,
            reading_wpm: 60_000,
            ..PacingConfig::default()
        }
    }

    struct Harness {
        scheduler: Scheduler,
        store: Arc<Store>,
        executor: Arc<StubExecutor>,
        dir: std::path::PathBuf,
    }

    fn setup(name: &str, pacing: PacingConfig) -> Harness {
        let dir = std::env::temp_dir().join(format!("perch-sched-test-{name}"));
        std::fs::remove_dir_all(&dir).ok();
        std::fs::create_dir_all(&dir).ok();
        let store = Arc::new(Store::open(&dir.join("test.db")).unwrap());
        let driver = Arc::new(StubDriver {
            created: AtomicUsize::new(0),
        });
        let sessions = Arc::new(SessionManager::new(
            driver,
            store.clone(),
            SessionConfig::default(),
        ));
        let governor = Arc::new(PacingGovernor::new(pacing));
        let executor = Arc::new(StubExecutor::new());
        let analytics = Arc::new(StoreSink::new(store.clone()));
        let scheduler = Scheduler::new(
            store.clone(),
            sessions,
            governor,
            executor.clone(),
            analytics,
            SchedulerConfig::default(),
        );
        Harness {
            scheduler,
            store,
            executor,
            dir,
        }
    }

    fn due_content(account: &str, text: &str, kind: ActionKind) -> (Content, ScheduledTask) {
        let mut content = Content::new(account, text, kind);
        content.status = ContentStatus::Scheduled;
        let task = ScheduledTask::new(
            &content.id,
            account,
            Utc::now() - chrono::Duration::seconds(1),
        );
        (content, task)
    }

    #[tokio::test]
    async fn test_simple_post_completes_in_one_cycle() {
        let h = setup("simple-post", fast_pacing());
        let (content, task) = due_content("a1", "hello from the pipeline", ActionKind::Tweet);
        h.store.insert_content_and_task(&content, &task).unwrap();

        assert_eq!(h.scheduler.tick().await.unwrap(), 1);

        let done = h.store.get_task(&task.id).unwrap().unwrap();
        assert_eq!(done.status, TaskStatus::Completed);
        let posted = h.store.get_content(&content.id).unwrap().unwrap();
        assert_eq!(posted.status, ContentStatus::Posted);
        assert!(posted.external_id.is_some());
        assert!(posted.posted_at.is_some());
        assert_eq!(h.store.recent_posted_events(10).unwrap().len(), 1);
        std::fs::remove_dir_all(&h.dir).ok();
    }

    #[tokio::test]
    async fn test_throttled_reply_defers_without_retry_cost() {
        let pacing = PacingConfig {
            max_replies_per_hour: 0,
            ..fast_pacing()
        };
        let h = setup("throttled-reply", pacing);
        let (mut content, task) = due_content("a1", "nice take", ActionKind::Reply);
        content.target_url = Some("https://x.com/someone/status/42".into());
        h.store.insert_content_and_task(&content, &task).unwrap();

        let before = Utc::now();
        assert_eq!(h.scheduler.tick().await.unwrap(), 0);

        let deferred = h.store.get_task(&task.id).unwrap().unwrap();
        assert_eq!(deferred.status, TaskStatus::Pending);
        assert_eq!(deferred.retry_count, 0);
        assert!(deferred.last_error.is_none());
        assert!(deferred.scheduled_for > before);
        assert!(h.executor.calls().is_empty());
        std::fs::remove_dir_all(&h.dir).ok();
    }

    #[tokio::test]
    async fn test_failed_thread_head_keeps_tail_pending() {
        let h = setup("failed-head", fast_pacing());
        let thread_id = uuid::Uuid::new_v4().to_string();
        let mut items = Vec::new();
        for (i, text) in ["opening take", "the follow-up"].iter().enumerate() {
            let kind = if i == 0 { ActionKind::Tweet } else { ActionKind::Reply };
            let mut content = Content::new("a1", text, kind);
            content.status = ContentStatus::Scheduled;
            content.thread_id = Some(thread_id.clone());
            content.thread_position = Some(i as i64 + 1);
            let task = ScheduledTask::new(
                &content.id,
                "a1",
                Utc::now() - chrono::Duration::seconds(2 - i as i64),
            );
            items.push((content, task));
        }
        h.store.insert_thread(&items).unwrap();
        h.executor.push_result(ExecutionResult::fail("element not found"));

        assert_eq!(h.scheduler.tick().await.unwrap(), 1);

        let head = h.store.get_task(&items[0].1.id).unwrap().unwrap();
        assert_eq!(head.status, TaskStatus::Failed);
        assert_eq!(head.retry_count, 1);

        // Tail stays pending across further cycles, untouched.
        assert_eq!(h.scheduler.tick().await.unwrap(), 0);
        let tail = h.store.get_task(&items[1].1.id).unwrap().unwrap();
        assert_eq!(tail.status, TaskStatus::Pending);
        assert_eq!(tail.retry_count, 0);
        assert_eq!(h.executor.calls().len(), 1);
        std::fs::remove_dir_all(&h.dir).ok();
    }

    #[tokio::test]
    async fn test_thread_reply_targets_predecessor() {
        let h = setup("thread-chain", fast_pacing());
        let thread_id = uuid::Uuid::new_v4().to_string();
        let mut items = Vec::new();
        for (i, text) in ["part one", "part two"].iter().enumerate() {
            let kind = if i == 0 { ActionKind::Tweet } else { ActionKind::Reply };
            let mut content = Content::new("a1", text, kind);
            content.status = ContentStatus::Scheduled;
            content.thread_id = Some(thread_id.clone());
            content.thread_position = Some(i as i64 + 1);
            let task = ScheduledTask::new(
                &content.id,
                "a1",
                Utc::now() - chrono::Duration::seconds(2 - i as i64),
            );
            items.push((content, task));
        }
        h.store.insert_thread(&items).unwrap();

        // Head posts, then the tail chains off its fresh URL in order.
        h.scheduler.tick().await.unwrap();
        h.scheduler.tick().await.unwrap();

        let head = h.store.get_content(&items[0].0.id).unwrap().unwrap();
        assert_eq!(head.status, ContentStatus::Posted);
        let head_url = head.external_url.unwrap();

        let tail = h.store.get_content(&items[1].0.id).unwrap().unwrap();
        assert_eq!(tail.status, ContentStatus::Posted);

        let calls = h.executor.calls();
        assert_eq!(calls[0].0, "post");
        assert_eq!(calls[1], ("reply".to_string(), head_url));
        std::fs::remove_dir_all(&h.dir).ok();
    }

    #[tokio::test]
    async fn test_missing_reply_target_fails_task() {
        let h = setup("missing-target", fast_pacing());
        let (content, task) = due_content("a1", "orphan reply", ActionKind::Reply);
        h.store.insert_content_and_task(&content, &task).unwrap();

        assert_eq!(h.scheduler.tick().await.unwrap(), 1);

        let failed = h.store.get_task(&task.id).unwrap().unwrap();
        assert_eq!(failed.status, TaskStatus::Failed);
        assert!(failed.last_error.unwrap().contains("target"));
        assert!(h.executor.calls().is_empty());
        std::fs::remove_dir_all(&h.dir).ok();
    }

    #[tokio::test]
    async fn test_like_completes_without_posted_event() {
        let h = setup("like", fast_pacing());
        let (mut content, task) = due_content("a1", "", ActionKind::Like);
        content.target_url = Some("https://x.com/someone/status/7".into());
        h.store.insert_content_and_task(&content, &task).unwrap();

        assert_eq!(h.scheduler.tick().await.unwrap(), 1);

        let done = h.store.get_task(&task.id).unwrap().unwrap();
        assert_eq!(done.status, TaskStatus::Completed);
        // Likes create no post, so no analytics row.
        assert!(h.store.recent_posted_events(10).unwrap().is_empty());
        std::fs::remove_dir_all(&h.dir).ok();
    }

    #[tokio::test]
    async fn test_active_window_gate_delegates_to_governor() {
        let pacing = PacingConfig {
            active_hours_start: 0,
            active_hours_end: 24,
            ..fast_pacing()
        };
        let h = setup("active-window", pacing);
        // Full-day window: only the stochastic weekend dip can say no, and
        // it cannot do so a hundred times in a row.
        assert!((0..100).any(|_| h.scheduler.in_active_window()));
        std::fs::remove_dir_all(&h.dir).ok();
    }

    #[tokio::test]
    async fn test_recover_stale_running() {
        let h = setup("stale", fast_pacing());
        let (content, task) = due_content("a1", "crashed mid-flight", ActionKind::Tweet);
        h.store.insert_content_and_task(&content, &task).unwrap();
        let long_ago = Utc::now() - chrono::Duration::minutes(30);
        assert!(h.store.claim_task(&task.id, &content.id, long_ago).unwrap());

        assert_eq!(h.scheduler.recover_stale_running().unwrap(), 1);

        let recovered = h.store.get_task(&task.id).unwrap().unwrap();
        assert_eq!(recovered.status, TaskStatus::Failed);
        assert!(recovered.last_error.unwrap().contains("Interrupted"));
        std::fs::remove_dir_all(&h.dir).ok();
    }

    #[tokio::test]
    async fn test_running_task_is_not_repicked() {
        let h = setup("single-flight", fast_pacing());
        let (content, task) = due_content("a1", "already in flight", ActionKind::Tweet);
        h.store.insert_content_and_task(&content, &task).unwrap();
        assert!(h.store.claim_task(&task.id, &content.id, Utc::now()).unwrap());

        // The running task is invisible to the due query.
        assert_eq!(h.scheduler.tick().await.unwrap(), 0);
        assert!(h.executor.calls().is_empty());
        std::fs::remove_dir_all(&h.dir).ok();
    }
}
