// src/gcode/mod.rs - host G-code path and the execution lock
pub mod parser;
pub mod template;

pub use parser::{GCodeCommand, GCodeError, parse_line, parse_script};
pub use template::{ScriptTemplate, TemplateContext, TemplateError};

use crate::communication::HostEvent;
use crate::hardware::{HardwareError, HeaterBank};
use std::collections::VecDeque;

const MAX_RESPONSES: usize = 100;

/// Cooperative try-lock around the host's single command channel.
/// Never blocks: callers test it and back off when it is held.
#[derive(Debug, Default)]
pub struct ExecutionLock {
    holder: Option<String>,
}

impl ExecutionLock {
    pub fn is_locked(&self) -> bool {
        self.holder.is_some()
    }

    pub fn holder(&self) -> Option<&str> {
        self.holder.as_deref()
    }

    pub fn try_acquire(&mut self, holder: &str) -> bool {
        if self.holder.is_some() {
            return false;
        }
        self.holder = Some(holder.to_string());
        true
    }

    pub fn release(&mut self) {
        self.holder = None;
    }
}

/// Result of running one script.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScriptReport {
    pub commands: usize,
    /// Total `G4` dwell requested by the script, in seconds.
    pub dwell: f64,
}

/// Anything that can run a rendered script on behalf of the state engine.
pub trait ScriptRunner {
    /// Whether the execution lock is currently held.
    fn is_locked(&self) -> bool;

    fn run_script(&mut self, script: &str, eventtime: f64) -> Result<ScriptOutcome, GCodeError>;
}

/// What running a script caused.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScriptOutcome {
    pub commands: usize,
    /// Events raised synchronously while the script ran.
    pub raised: Vec<HostEvent>,
}

#[derive(Debug)]
pub struct GCodeDispatch {
    lock: ExecutionLock,
    heaters: HeaterBank,
    responses: VecDeque<String>,
    executed: u64,
}

impl GCodeDispatch {
    pub fn new(heaters: HeaterBank) -> Self {
        Self {
            lock: ExecutionLock::default(),
            heaters,
            responses: VecDeque::new(),
            executed: 0,
        }
    }

    pub fn lock(&self) -> &ExecutionLock {
        &self.lock
    }

    pub fn lock_mut(&mut self) -> &mut ExecutionLock {
        &mut self.lock
    }

    pub fn heaters(&self) -> &HeaterBank {
        &self.heaters
    }

    /// Total commands executed since startup.
    pub fn executed(&self) -> u64 {
        self.executed
    }

    pub fn respond_info(&mut self, message: &str) {
        tracing::info!("// {}", message);
        if self.responses.len() == MAX_RESPONSES {
            self.responses.pop_front();
        }
        self.responses.push_back(message.to_string());
    }

    pub fn responses(&self) -> impl Iterator<Item = &str> {
        self.responses.iter().map(String::as_str)
    }

    pub fn take_responses(&mut self) -> Vec<String> {
        self.responses.drain(..).collect()
    }

    /// Run a multi-line script. A malformed line rejects the whole script
    /// before anything runs; the first failing command aborts the rest.
    pub fn execute_script(&mut self, script: &str) -> Result<ScriptReport, GCodeError> {
        let mut report = ScriptReport::default();
        for command in parse_script(script)? {
            report.dwell += self.execute(&command)?;
            report.commands += 1;
        }
        Ok(report)
    }

    /// Execute one command, returning the dwell it requested.
    pub fn execute(&mut self, command: &GCodeCommand) -> Result<f64, GCodeError> {
        tracing::debug!("Processing G-code: {} {}", command.command, command.raw_args);
        let dwell = match command.command.as_str() {
            "G4" => {
                let millis = command.get_f64("P")?.unwrap_or(0.0);
                if millis < 0.0 {
                    return Err(GCodeError::InvalidParameter {
                        command: command.command.clone(),
                        param: "P".to_string(),
                        reason: "dwell must not be negative".to_string(),
                    });
                }
                millis / 1000.0
            }
            "M104" => {
                self.set_heater(command, "extruder", command.require_f64("S")?)?;
                0.0
            }
            "M140" => {
                self.set_heater(command, "heater_bed", command.require_f64("S")?)?;
                0.0
            }
            "SET_HEATER_TEMPERATURE" => {
                let heater = command.get("HEATER").ok_or_else(|| GCodeError::MissingParameter {
                    command: command.command.clone(),
                    param: "HEATER".to_string(),
                })?;
                let target = command.get_f64("TARGET")?.unwrap_or(0.0);
                self.set_heater(command, heater, target)?;
                0.0
            }
            "TURN_OFF_HEATERS" => {
                self.heaters.turn_off_all();
                0.0
            }
            "M117" => {
                let message = command.raw_args.clone();
                self.respond_info(&message);
                0.0
            }
            "RESPOND" => {
                let message = command.get("MSG").unwrap_or_default().to_string();
                self.respond_info(&message);
                0.0
            }
            other => return Err(GCodeError::UnknownCommand(other.to_string())),
        };
        self.executed += 1;
        Ok(dwell)
    }

    fn set_heater(&mut self, command: &GCodeCommand, heater: &str, target: f64) -> Result<(), GCodeError> {
        self.heaters.set_target(heater, target).map_err(|err| match err {
            HardwareError::UnknownHeater(name) => GCodeError::UnknownHeater(name),
            other @ HardwareError::TargetOutOfRange { .. } => GCodeError::InvalidParameter {
                command: command.command.clone(),
                param: "TARGET".to_string(),
                reason: other.to_string(),
            },
        })
    }
}
