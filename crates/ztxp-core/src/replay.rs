//! Seen-set for `message_id` duplicate suppression.
//!
//! Entries live for the whole freshness span (`ttl + future_skew`), after
//! which the freshness check alone rejects the TAM.

use std::time::Duration;

use moka::sync::Cache;

const MAX_TRACKED_MESSAGES: u64 = 1_000_000;

#[derive(Clone)]
pub struct ReplayGuard {
    seen: Cache<String, ()>,
}

impl ReplayGuard {
    pub fn new(window: Duration) -> Self {
        Self::with_capacity(window, MAX_TRACKED_MESSAGES)
    }

    pub fn with_capacity(window: Duration, max_entries: u64) -> Self {
        Self {
            seen: Cache::builder()
                .max_capacity(max_entries)
                .time_to_live(window)
                .build(),
        }
    }

    /// Record `message_id`; `false` when it was already present.
    ///
    /// Check and insert happen as one operation, so two concurrent requests
    /// carrying the same id cannot both pass.
    pub fn check_and_record(&self, message_id: &str) -> bool {
        self.seen
            .entry(message_id.to_string())
            .or_insert(())
            .is_fresh()
    }

    /// Forget `message_id` so a retry after a backend failure is accepted.
    pub fn release(&self, message_id: &str) {
        self.seen.invalidate(message_id);
    }
}

impl std::fmt::Debug for ReplayGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplayGuard")
            .field("entries", &self.seen.entry_count())
            .finish()
    }
}
