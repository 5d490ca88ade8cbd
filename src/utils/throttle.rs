//! Log throttling utility
//!
//! A viewer pointed at a flapping network reconnects every couple of
//! seconds, and a corrupt source can fail to decode every frame. This keeps
//! such conditions from flooding the log while still counting what was
//! suppressed.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::{Duration, Instant};

struct Entry {
    last_logged: Instant,
    suppressed: u64,
}

/// Limits how often the same message key is logged
pub struct LogThrottler {
    entries: Mutex<HashMap<&'static str, Entry>>,
    interval: Duration,
}

impl LogThrottler {
    /// Create a new log throttler with the specified interval
    pub fn new(interval: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            interval,
        }
    }

    /// Create a new log throttler with interval specified in seconds
    pub fn with_secs(secs: u64) -> Self {
        Self::new(Duration::from_secs(secs))
    }

    /// Decide whether a message for `key` should be emitted now.
    ///
    /// Returns `Some(n)` when it should, where `n` is how many messages for
    /// the same key were swallowed since the last emitted one. Returns `None`
    /// while the key is throttled.
    pub fn check(&self, key: &'static str) -> Option<u64> {
        let now = Instant::now();
        let mut entries = self.entries.lock();

        match entries.get_mut(key) {
            Some(entry) if now.duration_since(entry.last_logged) < self.interval => {
                entry.suppressed += 1;
                None
            }
            Some(entry) => {
                let suppressed = entry.suppressed;
                entry.last_logged = now;
                entry.suppressed = 0;
                Some(suppressed)
            }
            None => {
                entries.insert(
                    key,
                    Entry {
                        last_logged: now,
                        suppressed: 0,
                    },
                );
                Some(0)
            }
        }
    }

    /// Forget `key`, so the next occurrence is logged immediately.
    ///
    /// Called when the condition recovers (e.g. the viewer reconnected).
    pub fn clear(&self, key: &'static str) {
        self.entries.lock().remove(key);
    }
}

impl Default for LogThrottler {
    /// Create a default log throttler with 5 second interval
    fn default() -> Self {
        Self::with_secs(5)
    }
}

/// Throttled `warn!`; appends the number of suppressed repeats when non-zero
#[macro_export]
macro_rules! warn_throttled {
    ($throttler:expr, $key:expr, $($arg:tt)*) => {
        if let Some(suppressed) = $throttler.check($key) {
            if suppressed > 0 {
                tracing::warn!("{} ({} similar messages suppressed)", format_args!($($arg)*), suppressed);
            } else {
                tracing::warn!($($arg)*);
            }
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_first_call_logs() {
        let throttler = LogThrottler::with_secs(1);
        assert_eq!(throttler.check("test_key"), Some(0));
    }

    #[test]
    fn test_throttling_counts_suppressed() {
        let throttler = LogThrottler::new(Duration::from_millis(100));

        assert_eq!(throttler.check("test_key"), Some(0));
        assert_eq!(throttler.check("test_key"), None);
        assert_eq!(throttler.check("test_key"), None);

        thread::sleep(Duration::from_millis(150));

        assert_eq!(throttler.check("test_key"), Some(2));
        assert_eq!(throttler.check("test_key"), None);
    }

    #[test]
    fn test_different_keys() {
        let throttler = LogThrottler::with_secs(10);

        assert!(throttler.check("key1").is_some());
        assert!(throttler.check("key2").is_some());
        assert!(throttler.check("key1").is_none());
        assert!(throttler.check("key2").is_none());
    }

    #[test]
    fn test_clear() {
        let throttler = LogThrottler::with_secs(10);

        assert!(throttler.check("test_key").is_some());
        assert!(throttler.check("test_key").is_none());

        throttler.clear("test_key");

        assert_eq!(throttler.check("test_key"), Some(0));
    }
}
