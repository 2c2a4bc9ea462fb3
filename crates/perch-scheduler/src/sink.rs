//! Default analytics sink: one `analytics_events` row per posted content.

use std::sync::Arc;

use perch_core::traits::{AnalyticsSink, PostedEvent};
use perch_store::Store;

/// Writes posted events into the shared store. Sink failures are logged
/// and swallowed; analytics must never block the posting path.
pub struct StoreSink {
    store: Arc<Store>,
}

impl StoreSink {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }
}

impl AnalyticsSink for StoreSink {
    fn posted(&self, event: &PostedEvent) {
        if let Err(e) = self.store.insert_posted_event(event) {
            tracing::warn!("⚠️ Failed to record posted event: {e}");
        } else {
            tracing::debug!("📊 Recorded posted event for {}", event.content_id);
        }
    }
}
