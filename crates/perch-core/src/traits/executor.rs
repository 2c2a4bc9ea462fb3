//! Executor seam — the external capability that performs the actual
//! publish/like/reply against the target platform.
//!
//! Expected platform failures (rate-limit pages, missing elements, network
//! hiccups) are reported inside [`ExecutionResult`], never as `Err`: the
//! scheduler treats `Err` as a programming/environment fault, not a post
//! outcome.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::models::BrowserHandle;

/// Outcome of one executor call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub success: bool,
    /// Platform-assigned id of the created post, when one exists.
    pub external_id: Option<String>,
    pub external_url: Option<String>,
    pub error: Option<String>,
}

impl ExecutionResult {
    pub fn ok(external_id: &str, external_url: &str) -> Self {
        Self {
            success: true,
            external_id: Some(external_id.to_string()),
            external_url: Some(external_url.to_string()),
            error: None,
        }
    }

    /// Success without a created post (likes).
    pub fn ok_empty() -> Self {
        Self {
            success: true,
            external_id: None,
            external_url: None,
            error: None,
        }
    }

    pub fn fail(error: &str) -> Self {
        Self {
            success: false,
            external_id: None,
            external_url: None,
            error: Some(error.to_string()),
        }
    }
}

/// One capability per write action. All calls are awaited by the scheduler
/// and must return within the executor's own bounded time.
#[async_trait]
pub trait Executor: Send + Sync {
    /// Publish a standalone post.
    async fn post_content(&self, session: &BrowserHandle, text: &str) -> Result<ExecutionResult>;

    /// Publish a reply under the given post URL.
    async fn post_reply(
        &self,
        session: &BrowserHandle,
        reply_to_url: &str,
        text: &str,
    ) -> Result<ExecutionResult>;

    /// Like the post at the given URL.
    async fn like(&self, session: &BrowserHandle, url: &str) -> Result<ExecutionResult>;

    /// Repost the post at the given URL, optionally quoting it.
    async fn repost(
        &self,
        session: &BrowserHandle,
        url: &str,
        quote_text: Option<&str>,
    ) -> Result<ExecutionResult>;
}
