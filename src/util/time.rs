//! Time utilities for the room loops and health reporting

use std::time::{Duration, Instant};

/// Server start time for uptime tracking
static SERVER_START: std::sync::OnceLock<Instant> = std::sync::OnceLock::new();

/// Initialize server start time (call once at startup)
pub fn init_server_time() {
    SERVER_START.get_or_init(Instant::now);
}

/// Get server uptime in seconds
pub fn uptime_secs() -> u64 {
    SERVER_START
        .get()
        .map(|start| start.elapsed().as_secs())
        .unwrap_or(0)
}

/// Paces a blocking loop at a fixed tick rate.
///
/// Missed ticks are skipped rather than replayed, so a slow iteration shows
/// up as a larger measured delta instead of a burst of catch-up ticks.
#[derive(Debug)]
pub struct TickClock {
    period: Duration,
    next: Instant,
    last: Instant,
}

impl TickClock {
    pub fn new(tick_rate: u32) -> Self {
        let now = Instant::now();
        let period = Duration::from_micros(1_000_000 / u64::from(tick_rate.max(1)));
        Self {
            period,
            next: now + period,
            last: now,
        }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Sleep until the next tick boundary; returns seconds since the previous tick
    pub fn tick(&mut self) -> f32 {
        let now = Instant::now();
        if self.next > now {
            std::thread::sleep(self.next - now);
            self.next += self.period;
        } else {
            self.next = now + self.period;
        }

        let now = Instant::now();
        let delta = now.duration_since(self.last);
        self.last = now;
        delta.as_secs_f32()
    }
}
