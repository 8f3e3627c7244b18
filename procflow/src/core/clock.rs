//! Wall-clock abstraction.
//!
//! Workflow code never reads the clock directly. Every timestamp that ends up
//! in the audit trail comes from a [`Clock`] handed to the engine, and every
//! timer deadline is recorded the moment it is computed, so replay never
//! consults the clock at all.

use chrono::{DateTime, Utc};

/// Source of "now" for audit timestamps and timer deadlines.
pub trait Clock: Send + Sync + std::fmt::Debug {
    fn now(&self) -> DateTime<Utc>;
}

/// Reads the system clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock driven by tokio's timer.
///
/// Returns `base + (tokio::time::Instant::now() - start)`. Under a paused
/// runtime (`#[tokio::test(start_paused = true)]`) this advances exactly as
/// far as `tokio::time::sleep` does, which lets a test cover fourteen days of
/// escalation in milliseconds of real time.
#[derive(Debug, Clone)]
pub struct TokioClock {
    base: DateTime<Utc>,
    start: tokio::time::Instant,
}

impl TokioClock {
    /// Must be called from within a tokio runtime.
    pub fn starting_at(base: DateTime<Utc>) -> Self {
        Self {
            base,
            start: tokio::time::Instant::now(),
        }
    }
}

impl Clock for TokioClock {
    fn now(&self) -> DateTime<Utc> {
        let elapsed = tokio::time::Instant::now().duration_since(self.start);
        match chrono::Duration::from_std(elapsed) {
            Ok(elapsed) => self.base + elapsed,
            Err(_) => self.base,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn test_tokio_clock_follows_virtual_time() {
        let base = Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap();
        let clock = TokioClock::starting_at(base);
        assert_eq!(clock.now(), base);

        tokio::time::sleep(Duration::from_secs(3 * 86_400)).await;
        assert_eq!(clock.now(), base + chrono::Duration::days(3));
    }
}
