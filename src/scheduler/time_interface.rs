use std::time::{Duration, Instant, SystemTime};

/// Source of host time. Monotonic time is expressed in seconds, the unit the
/// reactor and every `eventtime` in the host use.
pub trait TimeInterface: Send + Sync {
    fn now_monotonic(&self) -> f64;
    fn now_wallclock(&self) -> SystemTime;
}

/// Standard time source using std::time.
/// Monotonic time counts from the moment the clock was created.
#[derive(Debug, Clone)]
pub struct StdTimeSync {
    start: Instant,
}

impl StdTimeSync {
    pub fn new() -> Self {
        Self { start: Instant::now() }
    }

    /// Converts a monotonic timestamp back into an instant. Returns `None`
    /// for the reactor's `NEVER` sentinel.
    pub fn instant_at(&self, monotonic: f64) -> Option<Instant> {
        if !monotonic.is_finite() {
            return None;
        }
        Some(self.start + Duration::from_secs_f64(monotonic.max(0.0)))
    }
}

impl Default for StdTimeSync {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeInterface for StdTimeSync {
    fn now_monotonic(&self) -> f64 {
        self.start.elapsed().as_secs_f64()
    }

    fn now_wallclock(&self) -> SystemTime {
        SystemTime::now()
    }
}
