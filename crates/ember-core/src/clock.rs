//! Monotonic microsecond clock and delay primitives.
//!
//! The frame driver never reads [`std::time::Instant`] directly; it goes
//! through the [`Clock`] trait so that pacing and timer-sync behaviour can be
//! driven by a synthetic clock in tests. Two implementations ship here:
//!
//! - [`SystemClock`]: wall clock backed by [`Instant`], sleeping the thread.
//! - [`ManualClock`]: shared, settable clock whose `sleep_us` simply advances
//!   the reading. Clones observe the same time.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{Local, NaiveDate, NaiveDateTime, NaiveTime};

/// Tick source used by the bootstrapper and the frame driver.
///
/// `now_us` must be non-decreasing. `sleep_us(x)` must not return before `x`
/// microseconds have elapsed on this clock; no upper bound is implied.
pub trait Clock: Send + Sync {
    /// Microseconds since the clock was created.
    fn now_us(&self) -> u64;

    /// Block for at least `us` microseconds.
    fn sleep_us(&self, us: u64);

    /// Local calendar date and time.
    fn local_datetime(&self) -> NaiveDateTime {
        Local::now().naive_local()
    }

    /// Local calendar date.
    fn date(&self) -> NaiveDate {
        self.local_datetime().date()
    }

    /// Local time of day.
    fn time_of_day(&self) -> NaiveTime {
        self.local_datetime().time()
    }
}

// ---------------------------------------------------------------------------
// SystemClock
// ---------------------------------------------------------------------------

/// Wall clock relative to its creation instant.
#[derive(Debug, Clone)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    /// Start a new clock at zero.
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now_us(&self) -> u64 {
        self.origin.elapsed().as_micros() as u64
    }

    fn sleep_us(&self, us: u64) {
        if us == 0 {
            return;
        }
        let deadline = self.now_us().saturating_add(us);
        std::thread::sleep(Duration::from_micros(us));
        // `thread::sleep` may wake early on some platforms.
        while self.now_us() < deadline {
            std::thread::yield_now();
        }
    }
}

// ---------------------------------------------------------------------------
// ManualClock
// ---------------------------------------------------------------------------

/// Deterministic clock for tests and headless replays.
///
/// Time only moves when [`set`](Self::set), [`advance`](Self::advance) or
/// [`sleep_us`](Clock::sleep_us) is called. Setting a value lower than the
/// current reading is ignored so the clock stays monotonic.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Arc<AtomicU64>,
    slept: Arc<AtomicU64>,
}

impl ManualClock {
    /// Create a clock reading `start_us`.
    pub fn new(start_us: u64) -> Self {
        Self {
            now: Arc::new(AtomicU64::new(start_us)),
            slept: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Move the clock to `us` (never backwards).
    pub fn set(&self, us: u64) {
        self.now.fetch_max(us, Ordering::SeqCst);
    }

    /// Move the clock forward by `us`.
    pub fn advance(&self, us: u64) {
        self.now.fetch_add(us, Ordering::SeqCst);
    }

    /// Total microseconds spent inside `sleep_us`.
    pub fn total_slept_us(&self) -> u64 {
        self.slept.load(Ordering::SeqCst)
    }
}

impl Clock for ManualClock {
    fn now_us(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }

    fn sleep_us(&self, us: u64) {
        self.slept.fetch_add(us, Ordering::SeqCst);
        self.advance(us);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_clock_is_monotonic() {
        let clock = SystemClock::new();
        let mut last = clock.now_us();
        for _ in 0..1000 {
            let now = clock.now_us();
            assert!(now >= last);
            last = now;
        }
    }

    #[test]
    fn system_clock_sleep_waits_at_least_requested() {
        let clock = SystemClock::new();
        let before = clock.now_us();
        clock.sleep_us(2_000);
        assert!(clock.now_us() - before >= 2_000);
    }

    #[test]
    fn manual_clock_never_goes_backwards() {
        let clock = ManualClock::new(100);
        clock.set(50);
        assert_eq!(clock.now_us(), 100);
        clock.set(250);
        assert_eq!(clock.now_us(), 250);
    }

    #[test]
    fn manual_clock_sleep_advances_time_and_counts() {
        let clock = ManualClock::new(0);
        let shared = clock.clone();
        clock.sleep_us(16_667);
        assert_eq!(shared.now_us(), 16_667);
        assert_eq!(shared.total_slept_us(), 16_667);
    }

    #[test]
    fn calendar_accessors_agree() {
        let clock = SystemClock::new();
        let date = clock.date();
        let dt = clock.local_datetime();
        // Midnight rollover between the two reads is the only way these differ.
        assert!(dt.date() == date || dt.date() == date.succ_opt().unwrap());
    }
}
