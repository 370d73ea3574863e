//! Monotonic and wall-clock time sources for the telemetry context.
//!
//! Event timestamps and segment windows are expressed in milliseconds since
//! the owning context was created (the "uptime" axis), so they survive wall
//! clock adjustments. Wall-clock times are only recorded on segment
//! boundaries for the export payload.

use chrono::Utc;
use std::time::Instant;

/// Time source owned by a telemetry context. Cheap to share via `Arc`.
#[derive(Debug)]
pub struct Clock {
    origin: Instant,
    origin_wall: i64,
}

impl Clock {
    /// Create a clock whose uptime axis starts now.
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            origin_wall: Utc::now().timestamp_millis(),
        }
    }

    /// Milliseconds elapsed since this clock was created. Monotonic, and
    /// never zero, since zero marks an unwritten ring buffer slot.
    pub fn uptime_millis(&self) -> i64 {
        (self.origin.elapsed().as_millis() as i64).max(1)
    }

    /// Current Unix time in milliseconds.
    pub fn wall_millis(&self) -> i64 {
        Utc::now().timestamp_millis()
    }

    /// Unix time in milliseconds at which the uptime axis started.
    pub fn origin_wall_millis(&self) -> i64 {
        self.origin_wall
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_uptime_is_monotonic() {
        let clock = Clock::new();
        let a = clock.uptime_millis();
        thread::sleep(Duration::from_millis(10));
        let b = clock.uptime_millis();
        assert!(b > a);
        assert!(b >= 10);
    }

    #[test]
    fn test_uptime_starts_near_zero() {
        let clock = Clock::new();
        assert!(clock.uptime_millis() < 1000);
    }
}
