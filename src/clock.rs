//! Time source abstraction.
//!
//! Every current-time read in the engine goes through [`Clock`] so that
//! lifecycle timestamps and date-scheme version derivation are pinnable in
//! tests. Production code uses [`SystemClock`].

use chrono::{DateTime, Utc};
use std::sync::Mutex;

/// Injected time source.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock pinned to an explicit instant, advanced manually. Used by tests
/// that assert on `updated_at`/`published_at` values.
#[derive(Debug)]
pub struct FixedClock {
    now: Mutex<DateTime<Utc>>,
}

impl FixedClock {
    pub fn at(now: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    /// Move the clock forward by the given number of seconds.
    pub fn advance_secs(&self, secs: i64) {
        let mut guard = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *guard += chrono::Duration::seconds(secs);
    }

    pub fn set(&self, now: DateTime<Utc>) {
        let mut guard = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *guard = now;
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}
