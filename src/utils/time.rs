use std::time::{Duration, Instant};

/// Timer for tracking frame timing and elapsed time.
///
/// Besides raw per-frame deltas it keeps an exponentially smoothed frame
/// time, which is what budget heuristics should read — raw deltas spike
/// whenever a page upload or sort lands.
pub struct Timer {
    start_time: Instant,
    last_update: Instant,
    /// Time since last tick
    pub delta: Duration,
    /// Total elapsed time since creation
    pub elapsed: Duration,
    /// Total number of ticks
    pub frame_count: u64,
    smoothed_secs: f32,
}

/// Smoothing factor for the running frame-time average.
const SMOOTHING: f32 = 0.05;

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}

impl Timer {
    /// Creates a new timer starting from now.
    #[must_use]
    pub fn new() -> Self {
        let now = Instant::now();
        Self {
            start_time: now,
            last_update: now,
            delta: Duration::ZERO,
            elapsed: Duration::ZERO,
            frame_count: 0,
            smoothed_secs: 0.0,
        }
    }

    /// Updates the timer (called internally by the engine each frame).
    pub fn tick(&mut self) {
        let now = Instant::now();
        self.delta = now - self.last_update;
        self.elapsed = now - self.start_time;
        self.last_update = now;
        self.frame_count += 1;

        let dt = self.delta.as_secs_f32();
        self.smoothed_secs = if self.frame_count == 1 {
            dt
        } else {
            self.smoothed_secs + (dt - self.smoothed_secs) * SMOOTHING
        };
    }

    #[must_use]
    pub fn dt_seconds(&self) -> f32 {
        self.delta.as_secs_f32()
    }

    /// Exponentially smoothed frame time in seconds.
    #[must_use]
    pub fn smoothed_dt_seconds(&self) -> f32 {
        self.smoothed_secs
    }

    /// The timestamp of the most recent tick.
    #[must_use]
    pub fn now(&self) -> Instant {
        self.last_update
    }
}
