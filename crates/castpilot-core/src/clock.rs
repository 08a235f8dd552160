//! Wall-clock time source and unique identifier minting (C1).
//!
//! All timestamps in this crate are UTC; all durations are integer
//! milliseconds. Production code takes `&dyn Clock` (or `SystemClock`
//! directly); tests use [`VirtualClock`] to pin or advance time
//! deterministically.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use ulid::Ulid;

/// A source of wall-clock time.
///
/// `now_utc()` is monotonically non-decreasing across calls on a single
/// clock instance; `SystemClock` derives this from the OS clock, which is
/// itself non-decreasing in practice on the platforms this crate targets.
pub trait Clock: Send + Sync {
    fn now_utc(&self) -> DateTime<Utc>;
}

/// The production clock, backed by the system wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_utc(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that returns a fixed or manually-advanced instant, for tests.
#[derive(Debug, Clone)]
pub struct VirtualClock {
    inner: Arc<Mutex<DateTime<Utc>>>,
}

impl VirtualClock {
    pub fn at(instant: DateTime<Utc>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(instant)),
        }
    }

    /// Advance the clock by `duration`, returning the new instant.
    pub fn advance(&self, duration: chrono::Duration) -> DateTime<Utc> {
        let mut guard = self.inner.lock().expect("virtual clock lock poisoned");
        *guard += duration;
        *guard
    }

    /// Set the clock to an absolute instant.
    pub fn set(&self, instant: DateTime<Utc>) {
        *self.inner.lock().expect("virtual clock lock poisoned") = instant;
    }
}

impl Clock for VirtualClock {
    fn now_utc(&self) -> DateTime<Utc> {
        *self.inner.lock().expect("virtual clock lock poisoned")
    }
}

/// Mint a globally unique, sortable, time-prefixed 128-bit identifier.
///
/// ULIDs encode the millisecond timestamp in their high bits, so ids sort
/// lexicographically in creation order — useful for the append-only
/// `PostOutcome` log and for cursoring `list_posts` results.
pub fn new_id() -> String {
    Ulid::new().to_string()
}

/// Mint an id using a specific clock, for deterministic tests that assert
/// on id ordering.
pub fn new_id_at(clock: &dyn Clock) -> String {
    let ms = clock.now_utc().timestamp_millis().max(0) as u64;
    Ulid::from_parts(ms, rand::random::<u128>() & ((1u128 << 80) - 1)).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn virtual_clock_advances_monotonically() {
        let start = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let clock = VirtualClock::at(start);
        assert_eq!(clock.now_utc(), start);

        let next = clock.advance(chrono::Duration::seconds(30));
        assert_eq!(next, start + chrono::Duration::seconds(30));
        assert_eq!(clock.now_utc(), next);
    }

    #[test]
    fn new_id_is_sortable_by_creation_time() {
        let early = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let late = early + chrono::Duration::seconds(1);
        let clock = VirtualClock::at(early);
        let id_early = new_id_at(&clock);
        clock.set(late);
        let id_late = new_id_at(&clock);
        assert!(id_early < id_late);
    }

    #[test]
    fn new_id_is_unique() {
        let a = new_id();
        let b = new_id();
        assert_ne!(a, b);
    }
}
