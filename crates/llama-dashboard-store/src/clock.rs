// crates/llama-dashboard-store/src/clock.rs
// ============================================================================
// Module: Store Clock
// Description: Millisecond time sources for store timestamps.
// Purpose: Let retention and timestamp logic run against a controllable clock.
// Dependencies: std
// ============================================================================

//! ## Overview
//! Every timestamp the store writes (`created_at`, `updated_at`, metric
//! sample times) comes from a [`Clock`]. Production code uses
//! [`SystemClock`]; tests drive [`ManualClock`] so retention windows can be
//! crossed without sleeping.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::atomic::AtomicI64;
use std::sync::atomic::Ordering;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

// ============================================================================
// SECTION: Clock Trait
// ============================================================================

/// Source of wall-clock time in unix epoch milliseconds.
pub trait Clock: Send + Sync {
    /// Returns the current time in unix epoch milliseconds.
    fn now_millis(&self) -> i64;
}

// ============================================================================
// SECTION: System Clock
// ============================================================================

/// Clock backed by [`SystemTime::now`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> i64 {
        unix_millis()
    }
}

// ============================================================================
// SECTION: Manual Clock
// ============================================================================

/// Clock that only moves when told to.
///
/// # Invariants
/// - Reads never observe a value that was not explicitly set or advanced to.
#[derive(Debug, Default)]
pub struct ManualClock {
    /// Current time in unix epoch milliseconds.
    now_ms: AtomicI64,
}

impl ManualClock {
    /// Creates a manual clock pinned at `now_ms`.
    #[must_use]
    pub const fn new(now_ms: i64) -> Self {
        Self {
            now_ms: AtomicI64::new(now_ms),
        }
    }

    /// Pins the clock at `now_ms`.
    pub fn set(&self, now_ms: i64) {
        self.now_ms.store(now_ms, Ordering::SeqCst);
    }

    /// Moves the clock forward by `delta_ms` and returns the new time.
    pub fn advance(&self, delta_ms: i64) -> i64 {
        self.now_ms.fetch_add(delta_ms, Ordering::SeqCst).saturating_add(delta_ms)
    }
}

impl Clock for ManualClock {
    fn now_millis(&self) -> i64 {
        self.now_ms.load(Ordering::SeqCst)
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Returns the current unix epoch in milliseconds.
#[must_use]
pub fn unix_millis() -> i64 {
    let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default();
    i64::try_from(now.as_millis()).unwrap_or(i64::MAX)
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::Clock;
    use super::ManualClock;
    use super::SystemClock;

    #[test]
    fn manual_clock_moves_only_when_advanced() {
        let clock = ManualClock::new(1_000);
        assert_eq!(clock.now_millis(), 1_000);
        assert_eq!(clock.advance(250), 1_250);
        assert_eq!(clock.now_millis(), 1_250);
        clock.set(10);
        assert_eq!(clock.now_millis(), 10);
    }

    #[test]
    fn system_clock_is_after_2020() {
        assert!(SystemClock.now_millis() > 1_577_836_800_000);
    }
}
