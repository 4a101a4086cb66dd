use std::time::Instant;

/// Instantaneous frame-rate estimate from the gap between consecutive ticks.
///
/// A single sample, no smoothing: `round(1000 / max(elapsed_ms, 1))`. The
/// video sink floors the rate at 1 when building encoder arguments, so a
/// stalled tick cannot produce an invalid artifact.
#[derive(Debug)]
pub struct FpsEstimator {
    last_tick: Instant,
}

impl FpsEstimator {
    pub fn new(now: Instant) -> Self {
        Self { last_tick: now }
    }

    /// Record a tick at `now` and return the estimated rate since the
    /// previous one.
    pub fn sample(&mut self, now: Instant) -> u32 {
        let elapsed_ms = now.duration_since(self.last_tick).as_millis().max(1);
        self.last_tick = now;
        (1000.0 / elapsed_ms as f64).round() as u32
    }
}
