//! Cycle clock for a virtual board.

/// Converts elapsed simulated seconds into CPU cycles at a fixed frequency.
#[derive(Debug, Clone, PartialEq)]
pub struct VirtualClock {
    frequency_hz: f64,
    total_cycles: u64,
}

impl VirtualClock {
    pub fn new(frequency_hz: f64) -> Self {
        Self {
            frequency_hz,
            total_cycles: 0,
        }
    }

    /// Advance by `dt_seconds` and return the cycles elapsed.
    ///
    /// Any positive interval yields at least one cycle, so very short ticks
    /// still make forward progress. Non-positive intervals yield zero.
    pub fn advance(&mut self, dt_seconds: f64) -> u64 {
        if !(dt_seconds > 0.0) {
            return 0;
        }
        let cycles = ((dt_seconds * self.frequency_hz) as u64).max(1);
        self.total_cycles = self.total_cycles.saturating_add(cycles);
        cycles
    }

    pub fn frequency_hz(&self) -> f64 {
        self.frequency_hz
    }

    pub fn total_cycles(&self) -> u64 {
        self.total_cycles
    }

    /// Simulated time since construction, in microseconds.
    pub fn micros(&self) -> f64 {
        if self.frequency_hz <= 0.0 {
            return 0.0;
        }
        self.total_cycles as f64 / self.frequency_hz * 1_000_000.0
    }
}
