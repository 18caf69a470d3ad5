//! Pre-origination correlation cache.
//!
//! An origination is registered here immediately before the request
//! goes on the wire, bridging the gap until the first event for the
//! call is observed. Entries expire after two minutes; an expired entry
//! is treated as absent and removed on the lookup that finds it.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use time::OffsetDateTime;
use tracing::debug;

/// Entry lifetime.
const TTL: time::Duration = time::Duration::seconds(120);

#[derive(Debug, Clone)]
struct PendingEntry {
    campaign_id: i64,
    action_token: String,
    registered_at: OffsetDateTime,
}

/// Recipient → (campaign, action token) registered just before dialing.
#[derive(Default)]
pub struct PendingCorrelations {
    inner: Mutex<HashMap<String, PendingEntry>>,
}

impl PendingCorrelations {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a call about to be originated.
    pub fn register(&self, phone_number: &str, campaign_id: i64, action_token: &str) {
        let mut map = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        map.insert(
            phone_number.to_string(),
            PendingEntry {
                campaign_id,
                action_token: action_token.to_string(),
                registered_at: OffsetDateTime::now_utc(),
            },
        );
        debug!(campaign_id, phone_number, action_token, "pending correlation registered");
    }

    /// The campaign registered for this recipient, unless expired.
    pub fn lookup(&self, phone_number: &str) -> Option<i64> {
        self.lookup_at(phone_number, OffsetDateTime::now_utc())
    }

    fn lookup_at(&self, phone_number: &str, now: OffsetDateTime) -> Option<i64> {
        let mut map = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let entry = map.get(phone_number)?;
        if now - entry.registered_at > TTL {
            map.remove(phone_number);
            return None;
        }
        Some(entry.campaign_id)
    }

    /// Resolve an acknowledgement token to (campaign, recipient),
    /// honoring the same expiry.
    pub fn find_by_token(&self, action_token: &str) -> Option<(i64, String)> {
        self.find_by_token_at(action_token, OffsetDateTime::now_utc())
    }

    fn find_by_token_at(&self, action_token: &str, now: OffsetDateTime) -> Option<(i64, String)> {
        let map = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        map.iter()
            .find(|(_, entry)| {
                entry.action_token == action_token && now - entry.registered_at <= TTL
            })
            .map(|(phone, entry)| (entry.campaign_id, phone.clone()))
    }

    /// Remove the entry after the first successful correlation.
    pub fn clear(&self, phone_number: &str) {
        let mut map = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        if map.remove(phone_number).is_some() {
            debug!(phone_number, "pending correlation cleared");
        }
    }

    pub fn len(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[cfg(test)]
    fn backdate(&self, phone_number: &str, by: time::Duration) {
        let mut map = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(entry) = map.get_mut(phone_number) {
            entry.registered_at -= by;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_lookup_clear() {
        let cache = PendingCorrelations::new();
        cache.register("5551234", 42, "tok-1");
        assert_eq!(cache.lookup("5551234"), Some(42));
        assert_eq!(cache.find_by_token("tok-1"), Some((42, "5551234".to_string())));

        cache.clear("5551234");
        assert_eq!(cache.lookup("5551234"), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn expired_entries_are_never_returned() {
        let cache = PendingCorrelations::new();
        cache.register("5551234", 42, "tok-1");
        cache.backdate("5551234", time::Duration::seconds(121));

        assert_eq!(cache.find_by_token("tok-1"), None);
        assert_eq!(cache.lookup("5551234"), None);
        // The expired entry was evicted by the lookup.
        assert!(cache.is_empty());
    }

    #[test]
    fn entries_just_inside_the_window_survive() {
        let cache = PendingCorrelations::new();
        cache.register("5551234", 42, "tok-1");
        cache.backdate("5551234", time::Duration::seconds(119));
        assert_eq!(cache.lookup("5551234"), Some(42));
    }

    #[test]
    fn re_registration_replaces_the_entry() {
        let cache = PendingCorrelations::new();
        cache.register("5551234", 42, "tok-1");
        cache.register("5551234", 43, "tok-2");
        assert_eq!(cache.lookup("5551234"), Some(43));
        assert_eq!(cache.find_by_token("tok-1"), None);
        assert_eq!(cache.len(), 1);
    }
}
