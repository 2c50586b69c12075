//! Millisecond clocks driving the timing gate and beat phase.
//!
//! Timestamps must never go backward within a session.

use std::time::Instant;

pub trait Clock {
    fn now_ms(&self) -> f64;
}

/// Wall clock for live hosts, measured from construction.
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now_ms(&self) -> f64 {
        self.origin.elapsed().as_secs_f64() * 1000.0
    }
}

/// Offline clock that advances one fixed step per tick.
#[derive(Clone, Debug)]
pub struct FrameClock {
    tick: u64,
    tick_rate: f64,
}

impl FrameClock {
    pub fn new(tick_rate: f64) -> Self {
        Self { tick: 0, tick_rate }
    }

    pub fn advance(&mut self) {
        self.tick += 1;
    }

    pub fn tick(&self) -> u64 {
        self.tick
    }
}

impl Clock for FrameClock {
    fn now_ms(&self) -> f64 {
        self.tick as f64 * 1000.0 / self.tick_rate
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_clock_steps_by_tick_rate() {
        let mut clock = FrameClock::new(60.0);
        assert_eq!(clock.now_ms(), 0.0);
        for _ in 0..60 {
            clock.advance();
        }
        assert!((clock.now_ms() - 1000.0).abs() < 1e-9);
    }

    #[test]
    fn monotonic_clock_does_not_go_backward() {
        let clock = MonotonicClock::new();
        let a = clock.now_ms();
        let b = clock.now_ms();
        assert!(b >= a);
    }
}
