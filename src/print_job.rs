// src/print_job.rs - print job tracking, the job-progress provider
use crate::providers::JobProvider;
use serde::Serialize;
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum PrintJobError {
    #[error("No job available")]
    NoJob,
    #[error("Invalid state transition: {0}")]
    InvalidTransition(String),
}

/// Job state as reported by the print statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    #[default]
    Standby,
    Printing,
    Paused,
    Complete,
    Cancelled,
    Error,
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Standby => "standby",
            Self::Printing => "printing",
            Self::Paused => "paused",
            Self::Complete => "complete",
            Self::Cancelled => "cancelled",
            Self::Error => "error",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Default)]
struct PrintJob {
    file_path: Option<String>,
    state: JobState,
    progress: f64,
}

/// Shared handle on the current print job. Clones observe the same job.
#[derive(Debug, Clone, Default)]
pub struct PrintJobTracker {
    inner: Rc<RefCell<PrintJob>>,
}

impl PrintJobTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> JobState {
        self.inner.borrow().state
    }

    pub fn file_path(&self) -> Option<String> {
        self.inner.borrow().file_path.clone()
    }

    pub fn progress(&self) -> f64 {
        self.inner.borrow().progress
    }

    pub fn start(&self, file_path: &str) -> Result<(), PrintJobError> {
        let mut job = self.inner.borrow_mut();
        match job.state {
            JobState::Printing | JobState::Paused => Err(PrintJobError::InvalidTransition(
                "A job is already in progress".to_string(),
            )),
            _ => {
                tracing::info!("Starting print job for file: {}", file_path);
                *job = PrintJob {
                    file_path: Some(file_path.to_string()),
                    state: JobState::Printing,
                    progress: 0.0,
                };
                Ok(())
            }
        }
    }

    pub fn pause(&self) -> Result<(), PrintJobError> {
        let mut job = self.inner.borrow_mut();
        match job.state {
            JobState::Printing => {
                job.state = JobState::Paused;
                tracing::info!("Print job paused");
                Ok(())
            }
            JobState::Paused => Err(PrintJobError::InvalidTransition(
                "Job is already paused".to_string(),
            )),
            _ if job.file_path.is_none() => Err(PrintJobError::NoJob),
            other => Err(PrintJobError::InvalidTransition(format!(
                "Cannot pause a {} job",
                other
            ))),
        }
    }

    pub fn resume(&self) -> Result<(), PrintJobError> {
        let mut job = self.inner.borrow_mut();
        match job.state {
            JobState::Paused => {
                job.state = JobState::Printing;
                tracing::info!("Print job resumed");
                Ok(())
            }
            JobState::Printing => Err(PrintJobError::InvalidTransition(
                "Job is already running".to_string(),
            )),
            _ if job.file_path.is_none() => Err(PrintJobError::NoJob),
            other => Err(PrintJobError::InvalidTransition(format!(
                "Cannot resume a {} job",
                other
            ))),
        }
    }

    pub fn cancel(&self) -> Result<(), PrintJobError> {
        let mut job = self.inner.borrow_mut();
        match job.state {
            JobState::Printing | JobState::Paused => {
                job.state = JobState::Cancelled;
                tracing::info!("Print job cancelled");
                Ok(())
            }
            _ => Err(PrintJobError::NoJob),
        }
    }

    /// Record progress in percent; reaching 100 completes the job.
    pub fn update_progress(&self, progress: f64) -> Result<(), PrintJobError> {
        let mut job = self.inner.borrow_mut();
        if !matches!(job.state, JobState::Printing | JobState::Paused) {
            return Err(PrintJobError::NoJob);
        }
        job.progress = progress.clamp(0.0, 100.0);
        if job.progress >= 100.0 {
            job.state = JobState::Complete;
            tracing::info!("Print job complete");
        }
        Ok(())
    }
}

impl JobProvider for PrintJobTracker {
    fn reported_state(&self) -> JobState {
        self.state()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_state_transitions() {
        let job = PrintJobTracker::new();
        job.start("benchy.gcode").unwrap();
        assert_eq!(job.state(), JobState::Printing);
        job.pause().unwrap();
        assert_eq!(job.state(), JobState::Paused);
        job.resume().unwrap();
        job.update_progress(100.0).unwrap();
        assert_eq!(job.state(), JobState::Complete);
    }

    #[test]
    fn test_invalid_state_transitions() {
        let job = PrintJobTracker::new();
        assert_eq!(job.pause(), Err(PrintJobError::NoJob));
        job.start("cube.gcode").unwrap();
        assert!(matches!(job.start("other.gcode"), Err(PrintJobError::InvalidTransition(_))));
        assert!(matches!(job.resume(), Err(PrintJobError::InvalidTransition(_))));
        job.cancel().unwrap();
        assert!(matches!(job.resume(), Err(PrintJobError::InvalidTransition(_))));
        assert_eq!(job.cancel(), Err(PrintJobError::NoJob));
    }

    #[test]
    fn test_clones_share_the_job() {
        let job = PrintJobTracker::new();
        let observer = job.clone();
        job.start("part.gcode").unwrap();
        assert_eq!(observer.reported_state(), JobState::Printing);
        assert_eq!(observer.file_path().as_deref(), Some("part.gcode"));
    }
}
