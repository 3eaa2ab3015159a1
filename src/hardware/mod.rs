// src/hardware/mod.rs - heater registry
pub mod temperature;

use crate::providers::HeaterRegistry;
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;
use temperature::HeaterStatus;
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum HardwareError {
    #[error("Unknown heater '{0}'")]
    UnknownHeater(String),
    #[error("Target {target} for heater '{heater}' is outside 0..={max}")]
    TargetOutOfRange { heater: String, target: f64, max: f64 },
}

/// Shared handle on every configured heater. Clones observe the same heaters.
#[derive(Debug, Clone, Default)]
pub struct HeaterBank {
    heaters: Rc<RefCell<BTreeMap<String, HeaterStatus>>>,
}

impl HeaterBank {
    pub fn new<I, S>(names: I, max_temp: f64) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let heaters = names
            .into_iter()
            .map(|name| (name.into(), HeaterStatus::new(max_temp)))
            .collect();
        Self {
            heaters: Rc::new(RefCell::new(heaters)),
        }
    }

    pub fn set_target(&self, heater: &str, target: f64) -> Result<(), HardwareError> {
        let mut heaters = self.heaters.borrow_mut();
        let status = heaters
            .get_mut(heater)
            .ok_or_else(|| HardwareError::UnknownHeater(heater.to_string()))?;
        if !(0.0..=status.max_temp).contains(&target) {
            return Err(HardwareError::TargetOutOfRange {
                heater: heater.to_string(),
                target,
                max: status.max_temp,
            });
        }
        status.set_target(target);
        tracing::info!("Heater '{}' target set to {:.1}°C", heater, target);
        Ok(())
    }

    pub fn status(&self, heater: &str) -> Option<HeaterStatus> {
        self.heaters.borrow().get(heater).cloned()
    }

    /// Turn every heater off.
    pub fn turn_off_all(&self) {
        for status in self.heaters.borrow_mut().values_mut() {
            status.set_target(0.0);
        }
    }
}

impl HeaterRegistry for HeaterBank {
    fn heater_names(&self) -> Vec<String> {
        self.heaters.borrow().keys().cloned().collect()
    }

    fn target_temperature(&self, name: &str) -> Option<f64> {
        self.heaters.borrow().get(name).map(|status| status.target)
    }
}
