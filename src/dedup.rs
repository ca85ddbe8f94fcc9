//! Duplicate report suppression
//!
//! Identical errors (same message, same leading stack text) arriving within a
//! fixed window after the first sighting are dropped before any expensive
//! work. The window is measured from first sighting and is not extended by
//! repeats. Entries remove themselves when their window ends. Recording a
//! new key also drops every entry whose window has already closed, so the
//! map stays bounded even without a Tokio runtime to run the timers.
//!
//! The cache is process-local, shared by every in-flight pipeline run, and
//! lost on restart.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;

/// Default suppression window.
pub const DEFAULT_TTL: Duration = Duration::from_millis(5000);

/// Characters of stack text folded into the key.
pub const STACK_PREFIX_CHARS: usize = 100;

/// Gate in front of the pipeline. Cloning shares the same cache.
#[derive(Debug, Clone)]
pub struct ErrorDeduplicator {
    entries: Arc<Mutex<HashMap<String, Instant>>>,
    ttl: Duration,
    stack_prefix_chars: usize,
}

impl Default for ErrorDeduplicator {
    fn default() -> Self {
        Self::new(DEFAULT_TTL)
    }
}

impl ErrorDeduplicator {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: Arc::new(Mutex::new(HashMap::new())),
            ttl,
            stack_prefix_chars: STACK_PREFIX_CHARS,
        }
    }

    pub fn with_stack_prefix(mut self, chars: usize) -> Self {
        self.stack_prefix_chars = chars;
        self
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Key = message followed by the first N characters of the stack.
    pub fn dedup_key(&self, message: &str, stack: &str) -> String {
        let prefix = crate::util::truncate_str(stack, self.stack_prefix_chars);
        format!("{}{}", message, prefix)
    }

    /// Returns `true` when this error was already seen inside the window.
    ///
    /// A first sighting is recorded (and scheduled to expire) and returns
    /// `false`. Repeats inside the window return `true` and leave the
    /// original expiry untouched.
    pub fn should_suppress(&self, message: &str, stack: &str) -> bool {
        let key = self.dedup_key(message, stack);
        let now = Instant::now();

        {
            let mut entries = self.lock();
            if let Some(inserted_at) = entries.get(&key) {
                if now.duration_since(*inserted_at) < self.ttl {
                    tracing::debug!(key = %crate::util::truncate(&key, 80), "duplicate error suppressed");
                    return true;
                }
            }
            let ttl = self.ttl;
            entries.retain(|_, inserted_at| now.duration_since(*inserted_at) < ttl);
            entries.insert(key.clone(), now);
        }

        self.schedule_expiry(key, now);
        false
    }

    /// Number of keys currently held.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Instant>> {
        // A panic while holding the lock cannot leave the map half-updated
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Remove the entry once its window ends, unless it was replaced by a
    /// newer sighting in the meantime. Outside a Tokio runtime nothing is
    /// scheduled; stale entries go on the next insert instead.
    fn schedule_expiry(&self, key: String, inserted_at: Instant) {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let entries = Arc::downgrade(&self.entries);
        let deadline = inserted_at + self.ttl;
        handle.spawn(async move {
            tokio::time::sleep_until(deadline).await;
            let Some(entries) = entries.upgrade() else {
                return;
            };
            let mut entries = entries
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            if entries.get(&key) == Some(&inserted_at) {
                entries.remove(&key);
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[tokio::test(start_paused = true)]
    async fn test_fixed_window_from_first_sighting() {
        let dedup = ErrorDeduplicator::default();
        assert!(!dedup.should_suppress("E", "S"));

        tokio::time::advance(Duration::from_millis(4999)).await;
        assert!(dedup.should_suppress("E", "S"));

        // The repeat at 4999ms did not extend the window
        tokio::time::advance(Duration::from_millis(2)).await;
        assert!(!dedup.should_suppress("E", "S"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_entries_expire_without_lookup() {
        let dedup = ErrorDeduplicator::default();
        assert!(!dedup.should_suppress("E", "S"));
        assert_eq!(dedup.len(), 1);

        tokio::time::advance(Duration::from_millis(5001)).await;
        for _ in 0..5 {
            tokio::task::yield_now().await;
        }
        assert!(dedup.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_old_timer_does_not_remove_fresh_entry() {
        let dedup = ErrorDeduplicator::new(Duration::from_millis(100));
        assert!(!dedup.should_suppress("E", "S"));
        tokio::time::advance(Duration::from_millis(100)).await;
        // Same key re-recorded before the first timer task got to run
        assert!(!dedup.should_suppress("E", "S"));
        for _ in 0..5 {
            tokio::task::yield_now().await;
        }
        assert!(dedup.should_suppress("E", "S"));
    }

    #[test]
    fn test_key_uses_bounded_stack_prefix() {
        let dedup = ErrorDeduplicator::default();
        let base = "x".repeat(STACK_PREFIX_CHARS);
        let a = format!("{}AAAA", base);
        let b = format!("{}BBBB", base);
        assert_eq!(dedup.dedup_key("m", &a), dedup.dedup_key("m", &b));
        assert!(!dedup.should_suppress("m", &a));
        assert!(dedup.should_suppress("m", &b));
    }

    #[test]
    fn test_different_messages_are_distinct() {
        let dedup = ErrorDeduplicator::default();
        assert!(!dedup.should_suppress("first", "S"));
        assert!(!dedup.should_suppress("second", "S"));
        assert_eq!(dedup.len(), 2);
    }

    #[test]
    fn test_stale_entries_evicted_without_runtime() {
        let dedup = ErrorDeduplicator::new(Duration::from_millis(10));
        assert!(!dedup.should_suppress("a", "S"));
        assert!(!dedup.should_suppress("b", "S"));
        assert_eq!(dedup.len(), 2);

        thread::sleep(Duration::from_millis(30));
        assert!(!dedup.should_suppress("c", "S"));
        assert_eq!(dedup.len(), 1);
        assert!(dedup.should_suppress("c", "S"));
    }

    #[test]
    fn test_concurrent_callers_accept_exactly_once() {
        let dedup = ErrorDeduplicator::default();
        let handles: Vec<_> = (0..16)
            .map(|_| {
                let dedup = dedup.clone();
                thread::spawn(move || dedup.should_suppress("race", "stack"))
            })
            .collect();
        let accepted = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|suppressed| !suppressed)
            .count();
        assert_eq!(accepted, 1);
    }
}
