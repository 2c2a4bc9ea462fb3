//! Perch configuration system.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::Result;

/// Root configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerchConfig {
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub pacing: PacingConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
}

impl Default for PerchConfig {
    fn default() -> Self {
        Self {
            session: SessionConfig::default(),
            pacing: PacingConfig::default(),
            scheduler: SchedulerConfig::default(),
        }
    }
}

impl PerchConfig {
    /// Load config from the default path (~/.perch/config.toml).
    pub fn load() -> Result<Self> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load config from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| crate::error::PerchError::Config(format!("Failed to read config: {e}")))?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| crate::error::PerchError::Config(format!("Failed to parse config: {e}")))?;
        Ok(config)
    }

    /// Save config to the default path.
    pub fn save(&self) -> Result<()> {
        let path = Self::default_path();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| crate::error::PerchError::Config(format!("Failed to serialize config: {e}")))?;
        std::fs::write(&path, content)?;
        Ok(())
    }

    /// Get the default config path.
    pub fn default_path() -> PathBuf {
        Self::home_dir().join("config.toml")
    }

    /// Get the Perch home directory.
    pub fn home_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".perch")
    }
}

/// Session lifecycle configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Process-wide secret keying the session record cipher.
    #[serde(default)]
    pub secret: String,
    /// Close live sessions idle longer than this.
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,
    /// Authenticated-only surface probed by is_authenticated.
    #[serde(default = "default_auth_url")]
    pub auth_check_url: String,
    /// Marker text that means the login wall is showing.
    #[serde(default = "default_login_marker")]
    pub login_marker: String,
    /// Marker text that means we are logged in.
    #[serde(default = "default_auth_marker")]
    pub auth_marker: String,
}

fn default_idle_timeout() -> u64 { 1800 }
fn default_auth_url() -> String { "https://x.com/home".into() }
fn default_login_marker() -> String { "Sign in to X".into() }
fn default_auth_marker() -> String { "Home timeline".into() }

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            secret: String::new(),
            idle_timeout_secs: default_idle_timeout(),
            auth_check_url: default_auth_url(),
            login_marker: default_login_marker(),
            auth_marker: default_auth_marker(),
        }
    }
}

/// Human-pacing configuration: rate budgets, timing ranges, active hours.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PacingConfig {
    #[serde(default = "default_max_tweets_per_day")]
    pub max_tweets_per_day: u32,
    #[serde(default = "default_max_replies_per_hour")]
    pub max_replies_per_hour: u32,
    #[serde(default = "default_max_likes_per_hour")]
    pub max_likes_per_hour: u32,

    /// Base pre-action delay ranges in milliseconds, per action kind.
    #[serde(default = "default_like_delay")]
    pub like_delay_ms: (u64, u64),
    #[serde(default = "default_reply_delay")]
    pub reply_delay_ms: (u64, u64),
    #[serde(default = "default_tweet_delay")]
    pub tweet_delay_ms: (u64, u64),
    #[serde(default = "default_repost_delay")]
    pub repost_delay_ms: (u64, u64),
    /// Proportional jitter added on top of every drawn delay.
    #[serde(default = "default_jitter_pct")]
    pub jitter_pct: f64,

    #[serde(default = "default_typing_wpm")]
    pub typing_wpm: u32,
    #[serde(default = "default_reading_wpm")]
    pub reading_wpm: u32,

    /// Active hours window (local hour of day, start inclusive, end exclusive).
    #[serde(default = "default_active_start")]
    pub active_hours_start: u32,
    #[serde(default = "default_active_end")]
    pub active_hours_end: u32,

    /// Recent-action ring: more than burst_threshold actions inside
    /// burst_window_secs suggests a break of break_secs.
    #[serde(default = "default_burst_threshold")]
    pub burst_threshold: usize,
    #[serde(default = "default_burst_window")]
    pub burst_window_secs: i64,
    #[serde(default = "default_break_secs")]
    pub break_secs: u64,
}

fn default_max_tweets_per_day() -> u32 { 15 }
fn default_max_replies_per_hour() -> u32 { 10 }
fn default_max_likes_per_hour() -> u32 { 30 }
fn default_like_delay() -> (u64, u64) { (800, 3_000) }
fn default_reply_delay() -> (u64, u64) { (2_000, 8_000) }
fn default_tweet_delay() -> (u64, u64) { (5_000, 15_000) }
fn default_repost_delay() -> (u64, u64) { (1_500, 6_000) }
fn default_jitter_pct() -> f64 { 0.15 }
fn default_typing_wpm() -> u32 { 65 }
fn default_reading_wpm() -> u32 { 220 }
fn default_active_start() -> u32 { 8 }
fn default_active_end() -> u32 { 23 }
fn default_burst_threshold() -> usize { 10 }
fn default_burst_window() -> i64 { 600 }
fn default_break_secs() -> u64 { 900 }

impl Default for PacingConfig {
    fn default() -> Self {
        Self {
            max_tweets_per_day: default_max_tweets_per_day(),
            max_replies_per_hour: default_max_replies_per_hour(),
            max_likes_per_hour: default_max_likes_per_hour(),
            like_delay_ms: default_like_delay(),
            reply_delay_ms: default_reply_delay(),
            tweet_delay_ms: default_tweet_delay(),
            repost_delay_ms: default_repost_delay(),
            jitter_pct: default_jitter_pct(),
            typing_wpm: default_typing_wpm(),
            reading_wpm: default_reading_wpm(),
            active_hours_start: default_active_start(),
            active_hours_end: default_active_end(),
            burst_threshold: default_burst_threshold(),
            burst_window_secs: default_burst_window(),
            break_secs: default_break_secs(),
        }
    }
}

/// Scheduler loop configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    /// A Running task older than this is treated as a crashed execution.
    /// Matches one polling interval: nothing legitimate runs that long.
    #[serde(default = "default_stale_running")]
    pub stale_running_secs: i64,
    /// Ceiling for explicit reschedules of a failed/pending task.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Base spacing between consecutive thread items.
    #[serde(default = "default_thread_interval")]
    pub thread_interval_secs: i64,
    /// Random jitter added to the thread spacing.
    #[serde(default = "default_thread_jitter")]
    pub thread_jitter_secs: i64,
    /// Terminal tasks older than this are purged by cleanup.
    #[serde(default = "default_cleanup_days")]
    pub cleanup_after_days: i64,
}

fn default_poll_interval() -> u64 { 60 }
fn default_stale_running() -> i64 { 60 }
fn default_max_retries() -> u32 { 3 }
fn default_thread_interval() -> i64 { 120 }
fn default_thread_jitter() -> i64 { 45 }
fn default_cleanup_days() -> i64 { 30 }

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval(),
            stale_running_secs: default_stale_running(),
            max_retries: default_max_retries(),
            thread_interval_secs: default_thread_interval(),
            thread_jitter_secs: default_thread_jitter(),
            cleanup_after_days: default_cleanup_days(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = PerchConfig::default();
        assert_eq!(config.pacing.max_tweets_per_day, 15);
        assert_eq!(config.scheduler.poll_interval_secs, 60);
        // Stale threshold is one polling interval
        assert_eq!(
            config.scheduler.stale_running_secs,
            config.scheduler.poll_interval_secs as i64
        );
        assert_eq!(config.session.idle_timeout_secs, 1800);
    }

    #[test]
    fn test_config_from_toml() {
        let toml_str = r#"
            [pacing]
            max_tweets_per_day = 5
            typing_wpm = 40

            [scheduler]
            poll_interval_secs = 30
        "#;

        let config: PerchConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.pacing.max_tweets_per_day, 5);
        assert_eq!(config.pacing.typing_wpm, 40);
        assert_eq!(config.scheduler.poll_interval_secs, 30);
        // Untouched sections keep defaults
        assert_eq!(config.pacing.max_likes_per_hour, 30);
    }

    #[test]
    fn test_config_missing_fields_use_defaults() {
        let toml_str = "";
        let config: PerchConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.pacing.max_replies_per_hour, 10);
        assert_eq!(config.scheduler.max_retries, 3);
    }

    #[test]
    fn test_home_dir() {
        let home = PerchConfig::home_dir();
        assert!(home.to_string_lossy().contains("perch"));
    }
}
