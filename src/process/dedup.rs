//! Message deduplication — suppresses duplicate resumes of the same worker.
//!
//! Tool calls are retried by agents often enough that the same message can
//! reach `send_to_worker` several times within a second. Each destination key
//! remembers the fingerprint of the last content sent; a repeat inside the
//! window is reported as a duplicate and must not trigger another resume.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use sha2::{Digest, Sha256};

type Fingerprint = [u8; 32];

#[derive(Debug, Clone, Copy)]
struct LastSent {
    fingerprint: Fingerprint,
    sent_at: Instant,
}

/// Per-key sliding-window deduplicator.
pub struct MessageDeduplicator {
    window: Duration,
    entries: Mutex<HashMap<String, LastSent>>,
}

impl MessageDeduplicator {
    /// Create a deduplicator with the given window.
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Check-and-record. Returns true if `content` was already sent to `key`
    /// inside the window; otherwise records it and returns false.
    ///
    /// The whole check happens under one lock, so among concurrent callers
    /// with identical `(key, content)` exactly one sees `false`.
    pub fn is_duplicate(&self, key: &str, content: &str) -> bool {
        self.is_duplicate_at(key, content, Instant::now())
    }

    fn is_duplicate_at(&self, key: &str, content: &str, now: Instant) -> bool {
        let fingerprint = fingerprint(content);
        let mut entries = self
            .entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        // Stale keys are dropped on the way through so the map stays bounded
        // by the number of recently-messaged workers.
        let window = self.window;
        entries.retain(|_, last| now.saturating_duration_since(last.sent_at) < window);

        if let Some(last) = entries.get(key)
            && last.fingerprint == fingerprint
        {
            tracing::debug!(key = %key, "Duplicate message suppressed");
            return true;
        }

        entries.insert(
            key.to_string(),
            LastSent {
                fingerprint,
                sent_at: now,
            },
        );
        false
    }

    /// Forget the record for `key`, so the next send goes through. Used when
    /// the delivery that was recorded failed.
    pub fn forget(&self, key: &str) {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(key);
    }

    /// Number of keys currently tracked.
    pub fn tracked(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }
}

fn fingerprint(content: &str) -> Fingerprint {
    Sha256::digest(content.as_bytes()).into()
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[test]
    fn first_send_is_not_duplicate() {
        let dedup = MessageDeduplicator::new(Duration::from_secs(5));
        assert!(!dedup.is_duplicate("worker-1", "hello"));
        assert!(dedup.is_duplicate("worker-1", "hello"));
    }

    #[test]
    fn different_content_or_key_passes() {
        let dedup = MessageDeduplicator::new(Duration::from_secs(5));
        assert!(!dedup.is_duplicate("worker-1", "hello"));
        assert!(!dedup.is_duplicate("worker-1", "goodbye"));
        assert!(!dedup.is_duplicate("worker-2", "goodbye"));
        // Last content for worker-1 is now "goodbye"; "hello" is new again.
        assert!(!dedup.is_duplicate("worker-1", "hello"));
    }

    #[test]
    fn window_expiry_allows_resend() {
        let dedup = MessageDeduplicator::new(Duration::from_secs(2));
        let start = Instant::now();
        assert!(!dedup.is_duplicate_at("worker-1", "hello", start));
        assert!(dedup.is_duplicate_at("worker-1", "hello", start + Duration::from_secs(1)));
        assert!(!dedup.is_duplicate_at("worker-1", "hello", start + Duration::from_secs(3)));
    }

    #[test]
    fn duplicate_does_not_rerecord() {
        let dedup = MessageDeduplicator::new(Duration::from_secs(2));
        let start = Instant::now();
        assert!(!dedup.is_duplicate_at("worker-1", "hello", start));
        // A duplicate at t+1.5s must not slide the window forward.
        assert!(dedup.is_duplicate_at("worker-1", "hello", start + Duration::from_millis(1500)));
        assert!(!dedup.is_duplicate_at("worker-1", "hello", start + Duration::from_millis(2100)));
    }

    #[test]
    fn forget_clears_key() {
        let dedup = MessageDeduplicator::new(Duration::from_secs(5));
        assert!(!dedup.is_duplicate("worker-1", "hello"));
        dedup.forget("worker-1");
        assert!(!dedup.is_duplicate("worker-1", "hello"));
        assert_eq!(dedup.tracked(), 1);
    }

    #[test]
    fn concurrent_identical_sends_pass_once() {
        let dedup = Arc::new(MessageDeduplicator::new(Duration::from_secs(5)));
        let handles: Vec<_> = (0..10)
            .map(|_| {
                let dedup = Arc::clone(&dedup);
                std::thread::spawn(move || dedup.is_duplicate("worker-1", "same content"))
            })
            .collect();

        let passed = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|dup| !dup)
            .count();
        assert_eq!(passed, 1);
    }
}
