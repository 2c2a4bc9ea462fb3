//! The session lifecycle manager — owns every live automation session,
//! restores them from encrypted records, and flushes them back before
//! destruction.
//!
//! The in-memory registry is the one structure touched from multiple call
//! sites (scheduler and interactive callers). A registry mutex hands out
//! per-account slots; the slot mutex serializes everything that happens to
//! one account's session, so two acquires can never race a second context
//! into existence. A released slot is marked closed under its own lock
//! before the registry entry goes away, so a caller holding a stale slot
//! handle re-fetches instead of building a session nobody can find.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tokio::sync::Mutex;

use perch_core::config::SessionConfig;
use perch_core::error::{PerchError, Result};
use perch_core::models::{BrowserHandle, Fingerprint, SessionRecord};
use perch_core::traits::BrowserDriver;
use perch_store::Store;

use crate::crypto::SessionCipher;
use crate::fingerprint::random_fingerprint;

/// One live browser session, exclusively owned by the manager.
pub struct AutomationSession {
    pub account_id: String,
    pub handle: BrowserHandle,
    pub fingerprint: Fingerprint,
    pub last_activity: DateTime<Utc>,
}

#[derive(Default)]
struct Slot {
    session: Option<AutomationSession>,
    /// Set by `release` while the slot lock is held. A slot with this flag
    /// is no longer in the registry and must never host a new session.
    closed: bool,
}

/// Thread-safe session registry, one slot per account.
pub struct SessionManager {
    driver: Arc<dyn BrowserDriver>,
    store: Arc<Store>,
    cipher: SessionCipher,
    config: SessionConfig,
    slots: Mutex<HashMap<String, Arc<Mutex<Slot>>>>,
}

impl SessionManager {
    pub fn new(driver: Arc<dyn BrowserDriver>, store: Arc<Store>, config: SessionConfig) -> Self {
        let cipher = SessionCipher::new(&config.secret);
        Self {
            driver,
            store,
            cipher,
            config,
            slots: Mutex::new(HashMap::new()),
        }
    }

    async fn slot(&self, account_id: &str) -> Arc<Mutex<Slot>> {
        let mut slots = self.slots.lock().await;
        slots
            .entry(account_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(Slot::default())))
            .clone()
    }

    async fn existing_slot(&self, account_id: &str) -> Option<Arc<Mutex<Slot>>> {
        self.slots.lock().await.get(account_id).cloned()
    }

    /// Return a live, ready-to-use session for the account, reusing the
    /// in-memory one when it still answers the liveness probe.
    pub async fn acquire(&self, account_id: &str) -> Result<BrowserHandle> {
        loop {
            let slot = self.slot(account_id).await;
            let mut slot = slot.lock().await;

            // A concurrent release closed this slot between our registry
            // fetch and the lock; its entry is already gone, so re-fetch.
            if slot.closed {
                continue;
            }

            if let Some(session) = slot.session.as_mut() {
                if self.driver.is_alive(&session.handle).await {
                    session.last_activity = Utc::now();
                    return Ok(session.handle.clone());
                }
                // Dead context: close quietly and rebuild below.
                tracing::warn!("🔁 Session for {account_id} failed liveness probe, recreating");
                self.driver.close(&session.handle).await.ok();
                slot.session = None;
            }

            let session = self.create_session(account_id).await?;
            let handle = session.handle.clone();
            slot.session = Some(session);
            return Ok(handle);
        }
    }

    /// Build a fresh context, seeded from the durable record when one
    /// decrypts cleanly. A corrupt record degrades to an unauthenticated
    /// session instead of surfacing an error.
    async fn create_session(&self, account_id: &str) -> Result<AutomationSession> {
        let fingerprint = random_fingerprint();
        let handle = self.driver.create_context(&fingerprint).await?;
        self.driver.inject_stealth(&handle).await?;

        match self.store.get_session_record(account_id)? {
            Some(record) => match self.decrypt_record(&record) {
                Ok((cookies, local_storage)) => {
                    self.driver
                        .restore_state(&handle, &cookies, &local_storage)
                        .await?;
                    tracing::info!(
                        "🔓 Restored session for {account_id} (saved {})",
                        record.saved_at
                    );
                }
                Err(e) => {
                    tracing::warn!(
                        "⚠️ Session record for {account_id} undecryptable ({e}), starting fresh"
                    );
                }
            },
            None => {
                tracing::info!("🆕 No session record for {account_id}, starting fresh");
            }
        }

        Ok(AutomationSession {
            account_id: account_id.to_string(),
            handle,
            fingerprint,
            last_activity: Utc::now(),
        })
    }

    fn decrypt_record(&self, record: &SessionRecord) -> Result<(String, String)> {
        let cookies = self.cipher.decrypt(&record.cookies)?;
        let local_storage = self.cipher.decrypt(&record.local_storage)?;
        Ok((cookies, local_storage))
    }

    /// Serialize the live session's cookies + local storage, encrypt with
    /// fresh randomness, and upsert the durable record.
    pub async fn persist(&self, account_id: &str) -> Result<()> {
        let Some(slot) = self.existing_slot(account_id).await else {
            tracing::debug!("Nothing to persist for {account_id}: no live session");
            return Ok(());
        };
        let mut slot = slot.lock().await;
        let Some(session) = slot.session.as_mut() else {
            tracing::debug!("Nothing to persist for {account_id}: no live session");
            return Ok(());
        };
        self.flush(session).await
    }

    async fn flush(&self, session: &mut AutomationSession) -> Result<()> {
        let (cookies, local_storage) = self.driver.export_state(&session.handle).await?;
        let record = SessionRecord {
            account_id: session.account_id.clone(),
            cookies: self.cipher.encrypt(&cookies),
            local_storage: self.cipher.encrypt(&local_storage),
            fingerprint: session.fingerprint.clone(),
            saved_at: Utc::now(),
        };
        self.store.upsert_session_record(&record)?;
        session.last_activity = Utc::now();
        tracing::debug!("💾 Persisted session for {}", session.account_id);
        Ok(())
    }

    /// Persist, close, and drop the in-memory session.
    ///
    /// The slot is marked closed and unregistered while its lock is held:
    /// an acquire that raced us and still holds the old slot handle finds
    /// the closed flag and re-fetches instead of reviving the orphan.
    pub async fn release(&self, account_id: &str) -> Result<()> {
        let Some(slot) = self.existing_slot(account_id).await else {
            return Ok(());
        };
        let mut slot = slot.lock().await;
        if slot.closed {
            return Ok(());
        }
        if let Some(mut session) = slot.session.take() {
            if let Err(e) = self.flush(&mut session).await {
                tracing::warn!("⚠️ Failed to persist {account_id} on release: {e}");
            }
            self.driver.close(&session.handle).await.ok();
            tracing::info!("👋 Released session for {account_id}");
        }
        slot.closed = true;
        self.slots.lock().await.remove(account_id);
        Ok(())
    }

    /// Release every live session. Called on process shutdown.
    pub async fn release_all(&self) {
        let account_ids: Vec<String> = self.slots.lock().await.keys().cloned().collect();
        for account_id in account_ids {
            if let Err(e) = self.release(&account_id).await {
                tracing::warn!("⚠️ Failed to release {account_id}: {e}");
            }
        }
    }

    /// Release sessions idle longer than the cutoff. Returns how many.
    pub async fn close_idle(&self, max_idle: Duration) -> usize {
        let cutoff = Utc::now() - max_idle;
        let entries: Vec<(String, Arc<Mutex<Slot>>)> = self
            .slots
            .lock()
            .await
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        let mut closed = 0;
        for (account_id, slot) in entries {
            let idle = {
                let slot = slot.lock().await;
                slot.session
                    .as_ref()
                    .is_some_and(|s| s.last_activity < cutoff)
            };
            if idle {
                if self.release(&account_id).await.is_ok() {
                    closed += 1;
                }
            }
        }
        if closed > 0 {
            tracing::info!("🧹 Closed {closed} idle session(s)");
        }
        closed
    }

    /// Navigate to the authenticated-only surface and inspect markers.
    /// Side-effecting by design; never cached beyond the call.
    pub async fn is_authenticated(&self, account_id: &str) -> Result<bool> {
        let handle = self.acquire(account_id).await?;
        let body = self
            .driver
            .fetch_page(&handle, &self.config.auth_check_url)
            .await
            .map_err(|e| PerchError::Session(format!("Auth probe failed: {e}")))?;

        if body.contains(&self.config.login_marker) {
            return Ok(false);
        }
        Ok(body.contains(&self.config.auth_marker))
    }

    /// Number of live in-memory sessions.
    pub async fn live_count(&self) -> usize {
        let entries: Vec<Arc<Mutex<Slot>>> =
            self.slots.lock().await.values().cloned().collect();
        let mut count = 0;
        for slot in entries {
            if slot.lock().await.session.is_some() {
                count += 1;
            }
        }
        count
    }
}
