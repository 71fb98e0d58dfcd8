//! Simulation clock mapping real elapsed time to simulated time.

use std::time::{Duration, Instant};

/// Clock owned by the orchestrator and shared with every agent.
///
/// The tick cadence is real-time; the time rate only affects how much
/// simulated time one real interval represents.
#[derive(Debug, Clone, Copy)]
pub struct SimClock {
    origin: Instant,
    time_rate: f64,
}

impl SimClock {
    #[must_use]
    pub fn new(time_rate: f64) -> Self {
        Self {
            origin: Instant::now(),
            time_rate,
        }
    }

    /// Simulated seconds per real second.
    #[must_use]
    pub const fn time_rate(&self) -> f64 {
        self.time_rate
    }

    /// Real time elapsed since the run started.
    #[must_use]
    pub fn real_elapsed(&self) -> Duration {
        self.origin.elapsed()
    }

    /// Simulated seconds elapsed since the run started.
    #[must_use]
    pub fn sim_elapsed_secs(&self) -> f64 {
        self.origin.elapsed().as_secs_f64() * self.time_rate
    }

    /// Simulated minutes represented by a real interval.
    #[must_use]
    pub fn sim_minutes(&self, real: Duration) -> f64 {
        real.as_secs_f64() / 60.0 * self.time_rate
    }

    /// Simulated hours represented by a real interval.
    #[must_use]
    pub fn sim_hours(&self, real: Duration) -> f64 {
        real.as_secs_f64() / 3600.0 * self.time_rate
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn converts_real_intervals_to_simulated_time() {
        let clock = SimClock::new(120.0);
        let minute = Duration::from_secs(60);
        assert!((clock.sim_minutes(minute) - 120.0).abs() < 1e-9);
        assert!((clock.sim_hours(minute) - 2.0).abs() < 1e-9);
    }

    #[test]
    fn sim_elapsed_tracks_time_rate() {
        let clock = SimClock::new(1000.0);
        std::thread::sleep(Duration::from_millis(10));
        let sim = clock.sim_elapsed_secs();
        assert!(sim >= 10.0, "expected at least 10 simulated seconds, got {sim}");
    }
}
