//! Monotonic time source for deadline-driven loops.
//!
//! Every wait in the provisioning subsystem is a loop of short sleeps checked
//! against an explicit deadline. The loops take a [`Clock`] so tests can run
//! multi-second connection budgets instantly with a [`ManualClock`].
//!
//! # Example
//!
//! ```
//! use onboard_esp32::clock::{Clock, ManualClock};
//! use std::time::Duration;
//!
//! let clock = ManualClock::new();
//! let start = clock.now();
//! clock.sleep(Duration::from_secs(10));
//! assert_eq!(clock.now() - start, Duration::from_secs(10));
//! ```

use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Monotonic clock with a sleep primitive.
pub trait Clock: Send {
    /// Current monotonic instant.
    fn now(&self) -> Instant;

    /// Block the caller for `duration`.
    fn sleep(&self, duration: Duration);

    /// Instant `timeout` from now.
    fn deadline(&self, timeout: Duration) -> Instant {
        self.now() + timeout
    }
}

/// Wall-clock implementation backed by [`Instant`] and `thread::sleep`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Clock that only moves when slept on or advanced explicitly.
#[derive(Debug)]
pub struct ManualClock {
    base: Instant,
    offset: Mutex<Duration>,
}

impl ManualClock {
    /// Create a clock frozen at the current instant.
    pub fn new() -> Self {
        Self {
            base: Instant::now(),
            offset: Mutex::new(Duration::ZERO),
        }
    }

    /// Move the clock forward without sleeping.
    pub fn advance(&self, duration: Duration) {
        let mut offset = self.offset.lock().unwrap_or_else(|e| e.into_inner());
        *offset += duration;
    }

    /// Total time advanced since creation.
    pub fn elapsed(&self) -> Duration {
        *self.offset.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.base + self.elapsed()
    }

    fn sleep(&self, duration: Duration) {
        self.advance(duration);
    }
}

impl<C: Clock + Sync> Clock for std::sync::Arc<C> {
    fn now(&self) -> Instant {
        (**self).now()
    }

    fn sleep(&self, duration: Duration) {
        (**self).sleep(duration)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_manual_clock_starts_frozen() {
        let clock = ManualClock::new();
        let a = clock.now();
        let b = clock.now();
        assert_eq!(a, b);
        assert_eq!(clock.elapsed(), Duration::ZERO);
    }

    #[test]
    fn test_manual_clock_sleep_advances() {
        let clock = ManualClock::new();
        let start = clock.now();
        clock.sleep(Duration::from_millis(500));
        clock.advance(Duration::from_millis(250));
        assert_eq!(clock.now() - start, Duration::from_millis(750));
    }

    #[test]
    fn test_deadline() {
        let clock = ManualClock::new();
        let deadline = clock.deadline(Duration::from_secs(30));
        clock.advance(Duration::from_secs(29));
        assert!(clock.now() < deadline);
        clock.advance(Duration::from_secs(1));
        assert!(clock.now() >= deadline);
    }

    #[test]
    fn test_shared_clock_via_arc() {
        let clock = Arc::new(ManualClock::new());
        let shared = clock.clone();
        let start = shared.now();
        clock.advance(Duration::from_secs(3));
        assert_eq!(shared.now() - start, Duration::from_secs(3));
    }

    #[test]
    fn test_system_clock_monotonic() {
        let clock = SystemClock;
        let a = clock.now();
        clock.sleep(Duration::from_millis(1));
        assert!(clock.now() > a);
    }
}
