//! # Perch — autonomous posting pipeline
//!
//! Queues content, paces it like a human, and drives it through a browser
//! session at the scheduled time.
//!
//! Usage:
//!   perch run                                  # Start the scheduler loop
//!   perch enqueue -a ACCOUNT -t "text"         # Queue a post
//!   perch thread -a ACCOUNT -t "1/" -t "2/"    # Queue a thread
//!   perch cancel TASK_ID
//!   perch reschedule TASK_ID [--at RFC3339]
//!   perch cleanup [--days 30]
//!
//! The DOM-level browser driver and platform executor are separate
//! components wired in at deployment; this binary ships with a dry-run
//! pair that logs every action instead of performing it.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use perch_core::PerchConfig;
use perch_core::models::{ActionKind, BrowserHandle, Content, Fingerprint};
use perch_core::traits::{BrowserDriver, ExecutionResult, Executor};
use perch_pacing::PacingGovernor;
use perch_queue::{QueueService, SchedulePolicy};
use perch_scheduler::{Scheduler, StoreSink, spawn_scheduler};
use perch_session::SessionManager;
use perch_store::Store;

#[derive(Parser)]
#[command(name = "perch", version, about = "🐦 Perch — autonomous posting pipeline")]
struct Cli {
    /// Config file path (default: ~/.perch/config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Database path (default: ~/.perch/perch.db)
    #[arg(long)]
    db: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start the scheduling loop
    Run,
    /// Queue a single post, reply, like, or repost
    Enqueue {
        /// Account id to post as
        #[arg(short, long)]
        account: String,
        /// Post text (empty for likes)
        #[arg(short, long, default_value = "")]
        text: String,
        /// Action kind: tweet, reply, like, repost
        #[arg(short, long, default_value = "tweet")]
        kind: String,
        /// Target URL for replies, likes, and reposts
        #[arg(long)]
        target: Option<String>,
        /// Explicit RFC 3339 time (default: soon, with a human delay)
        #[arg(long)]
        at: Option<String>,
        /// Let the pacing governor pick the next good slot
        #[arg(long)]
        optimal: bool,
    },
    /// Queue an ordered thread (repeat --text per item, in order)
    Thread {
        #[arg(short, long)]
        account: String,
        #[arg(short, long, required = true)]
        text: Vec<String>,
        #[arg(long)]
        at: Option<String>,
        #[arg(long)]
        optimal: bool,
    },
    /// Cancel a pending task
    Cancel { task_id: String },
    /// Re-arm a pending or failed task at a new time
    Reschedule {
        task_id: String,
        /// RFC 3339 time (default: soon, with a human delay)
        #[arg(long)]
        at: Option<String>,
    },
    /// Respace every pending task of an account
    Reorder {
        #[arg(short, long)]
        account: String,
        /// Seconds between consecutive tasks
        #[arg(long, default_value = "600")]
        interval: i64,
    },
    /// Show pending tasks for an account
    Pending {
        #[arg(short, long)]
        account: String,
    },
    /// Purge terminal tasks older than N days
    Cleanup {
        #[arg(long, default_value = "30")]
        days: i64,
    },
}

// ─── Dry-run seams ───────────────────────────────────────

/// Browser driver that fabricates handles and never touches a real DOM.
struct DryRunDriver;

#[async_trait]
impl BrowserDriver for DryRunDriver {
    async fn create_context(&self, fingerprint: &Fingerprint) -> perch_core::Result<BrowserHandle> {
        tracing::info!("🧪 [dry-run] context created ({})", fingerprint.user_agent);
        let id = uuid_like();
        Ok(BrowserHandle {
            context_id: format!("dry-ctx-{id}"),
            page_id: format!("dry-page-{id}"),
        })
    }

    async fn inject_stealth(&self, _handle: &BrowserHandle) -> perch_core::Result<()> {
        Ok(())
    }

    async fn restore_state(
        &self,
        _handle: &BrowserHandle,
        _cookies: &str,
        _local_storage: &str,
    ) -> perch_core::Result<()> {
        Ok(())
    }

    async fn export_state(&self, _handle: &BrowserHandle) -> perch_core::Result<(String, String)> {
        Ok(("[]".into(), "{}".into()))
    }

    async fn is_alive(&self, _handle: &BrowserHandle) -> bool {
        true
    }

    async fn fetch_page(&self, _handle: &BrowserHandle, url: &str) -> perch_core::Result<String> {
        tracing::info!("🧪 [dry-run] fetch {url}");
        Ok(String::new())
    }

    async fn close(&self, _handle: &BrowserHandle) -> perch_core::Result<()> {
        Ok(())
    }
}

/// Executor that logs and succeeds. Swapped for the real DOM executor at
/// deployment.
struct DryRunExecutor;

#[async_trait]
impl Executor for DryRunExecutor {
    async fn post_content(
        &self,
        _session: &BrowserHandle,
        text: &str,
    ) -> perch_core::Result<ExecutionResult> {
        tracing::info!("🧪 [dry-run] post: {text}");
        let id = uuid_like();
        Ok(ExecutionResult::ok(&id, &format!("https://x.com/dry/status/{id}")))
    }

    async fn post_reply(
        &self,
        _session: &BrowserHandle,
        reply_to_url: &str,
        text: &str,
    ) -> perch_core::Result<ExecutionResult> {
        tracing::info!("🧪 [dry-run] reply to {reply_to_url}: {text}");
        let id = uuid_like();
        Ok(ExecutionResult::ok(&id, &format!("https://x.com/dry/status/{id}")))
    }

    async fn like(&self, _session: &BrowserHandle, url: &str) -> perch_core::Result<ExecutionResult> {
        tracing::info!("🧪 [dry-run] like {url}");
        Ok(ExecutionResult::ok_empty())
    }

    async fn repost(
        &self,
        _session: &BrowserHandle,
        url: &str,
        quote_text: Option<&str>,
    ) -> perch_core::Result<ExecutionResult> {
        tracing::info!("🧪 [dry-run] repost {url} (quote: {quote_text:?})");
        let id = uuid_like();
        Ok(ExecutionResult::ok(&id, &format!("https://x.com/dry/status/{id}")))
    }
}

fn uuid_like() -> String {
    format!("{:x}", std::process::id() as u64 ^ Utc::now().timestamp_micros() as u64)
}

fn parse_time(s: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(s)
        .map_err(|e| anyhow::anyhow!("Invalid RFC 3339 time '{s}': {e}"))?
        .with_timezone(&Utc))
}

fn policy(at: Option<&str>, optimal: bool) -> Result<SchedulePolicy> {
    Ok(match at {
        Some(s) => SchedulePolicy::At(parse_time(s)?),
        None if optimal => SchedulePolicy::Optimal,
        None => SchedulePolicy::Default,
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "perch=debug" } else { "perch=info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_target(false)
        .init();

    let config = match &cli.config {
        Some(path) => PerchConfig::load_from(path)?,
        None => PerchConfig::load()?,
    };
    if config.session.secret.is_empty() {
        tracing::warn!("⚠️ No session secret configured; session records use a weak default key");
    }

    let db_path = cli
        .db
        .clone()
        .unwrap_or_else(|| PerchConfig::home_dir().join("perch.db"));
    let store = Arc::new(Store::open(&db_path)?);

    let governor = Arc::new(PacingGovernor::new(config.pacing.clone()));
    let queue = QueueService::new(store.clone(), governor.clone(), config.scheduler.clone());

    match cli.command {
        Command::Run => {
            let driver: Arc<dyn BrowserDriver> = Arc::new(DryRunDriver);
            let sessions = Arc::new(SessionManager::new(
                driver,
                store.clone(),
                config.session.clone(),
            ));
            let executor: Arc<dyn Executor> = Arc::new(DryRunExecutor);
            let analytics = Arc::new(StoreSink::new(store.clone()));
            let scheduler = Arc::new(Scheduler::new(
                store,
                sessions.clone(),
                governor,
                executor,
                analytics,
                config.scheduler.clone(),
            ));

            // Idle sweep: flush and close sessions nobody has touched.
            let sweep_sessions = sessions.clone();
            let idle = std::time::Duration::from_secs(config.session.idle_timeout_secs.max(60));
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(idle);
                interval.tick().await;
                loop {
                    interval.tick().await;
                    sweep_sessions
                        .close_idle(chrono::Duration::seconds(idle.as_secs() as i64))
                        .await;
                }
            });

            let handle = spawn_scheduler(scheduler);
            tokio::select! {
                _ = handle => {}
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("👋 Shutting down, flushing sessions");
                    sessions.release_all().await;
                }
            }
        }
        Command::Enqueue {
            account,
            text,
            kind,
            target,
            at,
            optimal,
        } => {
            let mut content = Content::new(&account, &text, ActionKind::parse(&kind));
            content.target_url = target;
            let task = queue.enqueue(content, policy(at.as_deref(), optimal)?)?;
            println!("📬 Queued task {} for {}", task.id, task.scheduled_for);
        }
        Command::Thread {
            account,
            text,
            at,
            optimal,
        } => {
            let tasks = queue.enqueue_thread(&account, &text, policy(at.as_deref(), optimal)?)?;
            println!("🧵 Queued {}-part thread:", tasks.len());
            for task in tasks {
                println!("   {} at {}", task.id, task.scheduled_for);
            }
        }
        Command::Cancel { task_id } => {
            queue.cancel(&task_id)?;
            println!("🚫 Cancelled {task_id}");
        }
        Command::Reschedule { task_id, at } => {
            let when = at.as_deref().map(parse_time).transpose()?;
            let task = queue.reschedule(&task_id, when)?;
            println!("🔄 Rescheduled {} to {}", task.id, task.scheduled_for);
        }
        Command::Reorder { account, interval } => {
            let moved = queue.reorder_queue(&account, Utc::now(), interval)?;
            println!("📐 Respaced {moved} pending task(s)");
        }
        Command::Pending { account } => {
            let tasks = store.pending_tasks_for_account(&account)?;
            if tasks.is_empty() {
                println!("Queue is empty for {account}");
            }
            for task in tasks {
                println!(
                    "{}  {}  retries={}  {}",
                    task.scheduled_for,
                    task.status.as_str(),
                    task.retry_count,
                    task.id
                );
            }
        }
        Command::Cleanup { days } => {
            let removed = queue.cleanup(days)?;
            println!("🧹 Purged {removed} old task(s)");
        }
    }

    Ok(())
}
