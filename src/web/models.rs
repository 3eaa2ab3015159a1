//! Contains the data models for API requests and responses.

use crate::communication::Event;
use serde::{Deserialize, Serialize};

/// Represents a request to execute a G-code command.
#[derive(Debug, Deserialize)]
pub struct GcodeCommandRequest {
    pub command: String,
}

/// Responses produced by a G-code command.
#[derive(Debug, Serialize, Deserialize)]
pub struct GcodeResponse {
    pub responses: Vec<String>,
}

/// Request body for starting a print job.
#[derive(Debug, Deserialize)]
pub struct StartJobRequest {
    pub file: String,
}

/// One entry of the event history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    pub name: String,
    pub eventtime: f64,
}

impl From<&Event> for EventRecord {
    fn from(event: &Event) -> Self {
        Self {
            name: event.kind.name(),
            eventtime: event.eventtime,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MenuResponse {
    pub changed: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}
