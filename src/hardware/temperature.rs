// src/hardware/temperature.rs - per-heater status
use serde::Serialize;

/// Status of one heater as seen by the host.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HeaterStatus {
    pub target: f64,
    pub max_temp: f64,
    /// Number of target changes since startup.
    pub target_changes: u32,
}

impl HeaterStatus {
    pub fn new(max_temp: f64) -> Self {
        Self {
            target: 0.0,
            max_temp,
            target_changes: 0,
        }
    }

    pub fn set_target(&mut self, target: f64) {
        if self.target != target {
            self.target_changes += 1;
        }
        self.target = target;
    }

    pub fn is_heating(&self) -> bool {
        self.target > 0.0
    }
}
