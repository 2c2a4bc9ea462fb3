//! The human-pacing governor — answers "is this action allowed right now"
//! and "how long should I wait while doing it".
//!
//! All state is in-memory and process-wide: daily/hourly counters reset
//! lazily on the first check after a calendar boundary, and a bounded ring
//! of recent actions backs the burst/break heuristic. A restart zeroes
//! every budget; that risk is accepted and documented.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Datelike, NaiveDate, TimeZone, Timelike, Utc, Weekday};
use rand::Rng;

use perch_core::config::PacingConfig;
use perch_core::models::ActionKind;

/// How many recent actions the ring remembers.
const RING_CAPACITY: usize = 50;

/// Outcome of a budget check. Denials carry a concrete resume time.
#[derive(Debug, Clone, PartialEq)]
pub struct BudgetDecision {
    pub allowed: bool,
    pub wait_until: Option<DateTime<Utc>>,
}

impl BudgetDecision {
    fn allow() -> Self {
        Self {
            allowed: true,
            wait_until: None,
        }
    }

    fn deny(wait_until: DateTime<Utc>) -> Self {
        Self {
            allowed: false,
            wait_until: Some(wait_until),
        }
    }
}

struct PacingState {
    day_key: NaiveDate,
    hour_key: (NaiveDate, u32),
    tweets_today: u32,
    replies_this_hour: u32,
    likes_this_hour: u32,
    recent: VecDeque<(ActionKind, DateTime<Utc>)>,
}

impl PacingState {
    fn new(now: DateTime<Utc>) -> Self {
        Self {
            day_key: now.date_naive(),
            hour_key: (now.date_naive(), now.hour()),
            tweets_today: 0,
            replies_this_hour: 0,
            likes_this_hour: 0,
            recent: VecDeque::with_capacity(RING_CAPACITY),
        }
    }

    /// Lazy calendar rollover — no timers, just compare keys on access.
    fn roll(&mut self, now: DateTime<Utc>) {
        let day = now.date_naive();
        if day != self.day_key {
            self.day_key = day;
            self.tweets_today = 0;
        }
        let hour = (day, now.hour());
        if hour != self.hour_key {
            self.hour_key = hour;
            self.replies_this_hour = 0;
            self.likes_this_hour = 0;
        }
    }
}

/// Stateful timing + budget policy. Passed by handle to the scheduler and
/// the queue service; tests inject a fresh instance per run.
pub struct PacingGovernor {
    config: PacingConfig,
    state: Mutex<PacingState>,
}

impl PacingGovernor {
    pub fn new(config: PacingConfig) -> Self {
        Self {
            config,
            state: Mutex::new(PacingState::new(Utc::now())),
        }
    }

    // ─── Delays ───────────────────────────────────────────

    /// Randomized pre-action delay for the kind, with proportional jitter
    /// so repeated calls never land on identical timing.
    pub fn delay_for(&self, kind: ActionKind) -> Duration {
        let (min, max) = self.base_range(kind);
        let mut rng = rand::thread_rng();
        let base = rng.gen_range(min..=max) as f64;
        let jitter = base * self.config.jitter_pct * rng.gen_range(-1.0..=1.0);
        Duration::from_millis((base + jitter).max(0.0) as u64)
    }

    fn base_range(&self, kind: ActionKind) -> (u64, u64) {
        match kind {
            ActionKind::Like => self.config.like_delay_ms,
            ActionKind::Reply => self.config.reply_delay_ms,
            ActionKind::Tweet => self.config.tweet_delay_ms,
            ActionKind::Repost => self.config.repost_delay_ms,
        }
    }

    /// How long a human would take to type this text: WPM base plus a
    /// thinking pause every dozen-ish words and the occasional correction.
    /// The discrete pauses make long texts scale super-linearly instead of
    /// leaving a clean words-per-minute signature.
    pub fn typing_duration(&self, text: &str) -> Duration {
        let words = text.split_whitespace().count().max(1) as u64;
        let base_ms = words * 60_000 / self.config.typing_wpm.max(1) as u64;

        let mut rng = rand::thread_rng();
        let pauses = words / 12;
        let pause_ms: u64 = (0..pauses).map(|_| rng.gen_range(800..=2_500)).sum();
        let corrections = text.len() as u64 / 40;
        let correction_ms: u64 = (0..corrections).map(|_| rng.gen_range(300..=900)).sum();

        Duration::from_millis(base_ms + pause_ms + correction_ms)
    }

    /// How long a human would spend reading this text before acting on it.
    pub fn reading_duration(&self, text: &str) -> Duration {
        let words = text.split_whitespace().count().max(1) as u64;
        let base_ms = words * 60_000 / self.config.reading_wpm.max(1) as u64;
        let jitter = rand::thread_rng().gen_range(0..=400);
        Duration::from_millis((base_ms + jitter).max(500))
    }

    // ─── Budgets ──────────────────────────────────────────

    /// Check the rolling budget for the kind: daily for tweets/reposts,
    /// hourly for replies and likes.
    pub fn check_budget(&self, kind: ActionKind) -> BudgetDecision {
        self.check_budget_at(kind, Utc::now())
    }

    pub fn check_budget_at(&self, kind: ActionKind, now: DateTime<Utc>) -> BudgetDecision {
        let mut state = self.state.lock().unwrap();
        state.roll(now);

        match kind {
            ActionKind::Tweet | ActionKind::Repost => {
                if state.tweets_today < self.config.max_tweets_per_day {
                    BudgetDecision::allow()
                } else {
                    BudgetDecision::deny(next_day_boundary(now))
                }
            }
            ActionKind::Reply => {
                if state.replies_this_hour < self.config.max_replies_per_hour {
                    BudgetDecision::allow()
                } else {
                    BudgetDecision::deny(next_hour_boundary(now))
                }
            }
            ActionKind::Like => {
                if state.likes_this_hour < self.config.max_likes_per_hour {
                    BudgetDecision::allow()
                } else {
                    BudgetDecision::deny(next_hour_boundary(now))
                }
            }
        }
    }

    /// Count a performed action against its budget and the recent ring.
    pub fn record(&self, kind: ActionKind) {
        self.record_at(kind, Utc::now());
    }

    pub fn record_at(&self, kind: ActionKind, now: DateTime<Utc>) {
        let mut state = self.state.lock().unwrap();
        state.roll(now);
        match kind {
            ActionKind::Tweet | ActionKind::Repost => state.tweets_today += 1,
            ActionKind::Reply => state.replies_this_hour += 1,
            ActionKind::Like => state.likes_this_hour += 1,
        }
        if state.recent.len() == RING_CAPACITY {
            state.recent.pop_front();
        }
        state.recent.push_back((kind, now));
    }

    // ─── Session rhythm ───────────────────────────────────

    /// Probabilistic active-hours rule: mostly true inside the configured
    /// window, a small chance of being up late, a weekend chance of being
    /// away entirely. Never a hard gate.
    pub fn is_active_window(&self) -> bool {
        self.is_active_window_at(Utc::now())
    }

    pub fn is_active_window_at(&self, now: DateTime<Utc>) -> bool {
        let mut rng = rand::thread_rng();
        let hour = now.hour();
        let in_hours =
            hour >= self.config.active_hours_start && hour < self.config.active_hours_end;
        let weekend = matches!(now.weekday(), Weekday::Sat | Weekday::Sun);

        if weekend && rng.gen_bool(0.25) {
            return false;
        }
        if in_hours {
            true
        } else {
            // Occasionally up outside normal hours.
            rng.gen_bool(0.1)
        }
    }

    /// Suggest a break when the recent ring shows a burst: more than the
    /// configured threshold of actions inside the burst window.
    pub fn needs_break(&self) -> Option<Duration> {
        self.needs_break_at(Utc::now())
    }

    pub fn needs_break_at(&self, now: DateTime<Utc>) -> Option<Duration> {
        let state = self.state.lock().unwrap();
        let window_start = now - chrono::Duration::seconds(self.config.burst_window_secs);
        let burst = state
            .recent
            .iter()
            .filter(|(_, at)| *at >= window_start)
            .count();
        if burst > self.config.burst_threshold {
            Some(Duration::from_secs(self.config.break_secs))
        } else {
            None
        }
    }

    /// Next plausible posting slot: soon if we are inside active hours,
    /// otherwise shortly after the next window opens.
    pub fn optimal_time(&self) -> DateTime<Utc> {
        self.optimal_time_at(Utc::now())
    }

    pub fn optimal_time_at(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let mut rng = rand::thread_rng();
        let hour = now.hour();
        if hour >= self.config.active_hours_start && hour < self.config.active_hours_end {
            return now + chrono::Duration::minutes(rng.gen_range(5..=30));
        }
        let mut start = now
            .date_naive()
            .and_hms_opt(self.config.active_hours_start, 0, 0)
            .map(|dt| Utc.from_utc_datetime(&dt))
            .unwrap_or(now);
        if start <= now {
            start += chrono::Duration::days(1);
        }
        start + chrono::Duration::minutes(rng.gen_range(0..=60))
    }
}

/// 00:00 UTC of the next calendar day.
fn next_day_boundary(now: DateTime<Utc>) -> DateTime<Utc> {
    let next = now.date_naive() + chrono::Duration::days(1);
    next.and_hms_opt(0, 0, 0)
        .map(|dt| Utc.from_utc_datetime(&dt))
        .unwrap_or_else(|| now + chrono::Duration::days(1))
}

/// Top of the next hour.
fn next_hour_boundary(now: DateTime<Utc>) -> DateTime<Utc> {
    let truncated = now
        .with_minute(0)
        .and_then(|t| t.with_second(0))
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or(now);
    truncated + chrono::Duration::hours(1)
}
