//! Single-slot handoff of a [`SessionGrant`] to whatever runs after login.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use facegate_core::{Clock, SessionGrant};

pub struct SessionSlot {
    ttl_ms: u64,
    clock: Arc<dyn Clock>,
    slot: Mutex<Option<(SessionGrant, u64)>>,
}

impl SessionSlot {
    pub fn new(ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            ttl_ms: ttl.as_millis() as u64,
            clock,
            slot: Mutex::new(None),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Option<(SessionGrant, u64)>> {
        // The slot holds plain data, a panicked holder cannot leave it half-written.
        self.slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Place a grant, replacing any unclaimed one.
    pub fn offer(&self, grant: SessionGrant) {
        let now = self.clock.now_ms();
        if let Some((previous, _)) = self.lock().replace((grant, now)) {
            tracing::debug!(key = %previous.key, "unclaimed session grant replaced");
        }
    }

    /// Claim the grant. Each grant can be taken once.
    pub fn take(&self) -> Option<SessionGrant> {
        let now = self.clock.now_ms();
        let (grant, offered_at) = self.lock().take()?;
        if self.expired(offered_at, now) {
            tracing::debug!(key = %grant.key, "session grant expired before pickup");
            return None;
        }
        Some(grant)
    }

    pub fn peek(&self) -> Option<SessionGrant> {
        let now = self.clock.now_ms();
        let mut slot = self.lock();
        match slot.as_ref() {
            Some((_, offered_at)) if self.expired(*offered_at, now) => {
                *slot = None;
                None
            }
            Some((grant, _)) => Some(grant.clone()),
            None => None,
        }
    }

    fn expired(&self, offered_at: u64, now: u64) -> bool {
        now.saturating_sub(offered_at) > self.ttl_ms
    }
}
