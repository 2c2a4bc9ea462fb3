//! Browser driver seam — the DOM-level automation layer the session
//! manager builds live contexts on. Element lookup, clicking, and typing
//! live behind this trait; the pipeline only sees opaque handles.

use async_trait::async_trait;

use crate::error::Result;
use crate::models::{BrowserHandle, Fingerprint};

#[async_trait]
pub trait BrowserDriver: Send + Sync {
    /// Create a fresh context + page seeded with the given fingerprint.
    async fn create_context(&self, fingerprint: &Fingerprint) -> Result<BrowserHandle>;

    /// Suppress automation-identifying signals (webdriver flags, headless
    /// markers) before any navigation happens.
    async fn inject_stealth(&self, handle: &BrowserHandle) -> Result<()>;

    /// Load serialized cookies + local storage into the context.
    async fn restore_state(
        &self,
        handle: &BrowserHandle,
        cookies: &str,
        local_storage: &str,
    ) -> Result<()>;

    /// Export current cookies + local storage as serialized blobs.
    async fn export_state(&self, handle: &BrowserHandle) -> Result<(String, String)>;

    /// Liveness probe. False means the context must be recreated.
    async fn is_alive(&self, handle: &BrowserHandle) -> bool;

    /// Navigate the page and return its rendered text content.
    async fn fetch_page(&self, handle: &BrowserHandle, url: &str) -> Result<String>;

    /// Close page + context.
    async fn close(&self, handle: &BrowserHandle) -> Result<()>;
}
