//! Analytics sink — successful posts emit one event; the consumer is out
//! of scope here.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Emitted once per successfully posted content row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostedEvent {
    pub content_id: String,
    pub external_id: String,
    pub posted_at: DateTime<Utc>,
}

pub trait AnalyticsSink: Send + Sync {
    fn posted(&self, event: &PostedEvent);
}
