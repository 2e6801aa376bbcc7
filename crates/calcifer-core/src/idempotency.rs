// ── Idempotency filter ──
//
// Short-TTL dedup of inbound feedback. The key is the broker message id
// when present, else a content hash over (device, timestamp, payload).
// Only actuator feedback is filtered; sensor time-series flows through
// untouched.

use std::time::{Duration, Instant};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use sha2::{Digest, Sha256};

use calcifer_bus::FeedbackFrame;

/// Set-if-absent dedup window over message keys.
pub struct IdempotencyFilter {
    seen: DashMap<String, Instant>,
    ttl: Duration,
}

impl IdempotencyFilter {
    pub fn new(ttl: Duration) -> Self {
        Self {
            seen: DashMap::new(),
            ttl,
        }
    }

    /// Dedup key for a frame: broker id preferred, content hash fallback.
    pub fn key_for(frame: &FeedbackFrame) -> String {
        if let Some(ref message_id) = frame.message_id {
            return format!("msg:{message_id}");
        }
        let mut hasher = Sha256::new();
        hasher.update(frame.routing_key.as_bytes());
        hasher.update(frame.received_at.timestamp_millis().to_be_bytes());
        hasher.update(frame.payload.as_bytes());
        format!("sha:{:x}", hasher.finalize())
    }

    /// Atomic set-if-absent. `true` means first sighting inside the TTL
    /// window (accept); `false` means duplicate (drop).
    pub fn check_and_set(&self, key: &str) -> bool {
        match self.seen.entry(key.to_owned()) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().elapsed() >= self.ttl {
                    occupied.insert(Instant::now());
                    true
                } else {
                    false
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(Instant::now());
                true
            }
        }
    }

    /// Drop entries older than the TTL. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let before = self.seen.len();
        self.seen.retain(|_, inserted| inserted.elapsed() < self.ttl);
        before - self.seen.len()
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn first_sighting_accepts_duplicate_drops() {
        let filter = IdempotencyFilter::new(Duration::from_secs(300));
        assert!(filter.check_and_set("msg:a"));
        assert!(!filter.check_and_set("msg:a"));
        assert!(filter.check_and_set("msg:b"));
    }

    #[test]
    fn expired_keys_accept_again() {
        let filter = IdempotencyFilter::new(Duration::ZERO);
        assert!(filter.check_and_set("msg:a"));
        // TTL zero: the entry is immediately stale.
        assert!(filter.check_and_set("msg:a"));
    }

    #[test]
    fn key_prefers_broker_message_id() {
        let frame = FeedbackFrame::new("home.c1.fan.f1.state", Some("m-7".into()), "3");
        assert_eq!(IdempotencyFilter::key_for(&frame), "msg:m-7");
    }

    #[test]
    fn content_hash_fallback_is_stable_and_discriminating() {
        let frame_a = FeedbackFrame::new("home.c1.fan.f1.state", None, "3");
        let frame_b = FeedbackFrame {
            payload: "4".into(),
            ..frame_a.clone()
        };

        assert_eq!(
            IdempotencyFilter::key_for(&frame_a),
            IdempotencyFilter::key_for(&frame_a)
        );
        assert_ne!(
            IdempotencyFilter::key_for(&frame_a),
            IdempotencyFilter::key_for(&frame_b)
        );
    }

    #[test]
    fn purge_removes_stale_entries() {
        let filter = IdempotencyFilter::new(Duration::ZERO);
        filter.check_and_set("msg:a");
        filter.check_and_set("msg:b");
        assert_eq!(filter.purge_expired(), 2);
        assert!(filter.is_empty());
    }
}
