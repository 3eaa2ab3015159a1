//! Defines the communication channel messages between the web server and the printer task.

use super::models::EventRecord;
use crate::printer::{JobAction, Printer};
use crate::state_notify::StateNotifyStatus;
use tokio::sync::mpsc::Receiver;
use tokio::sync::oneshot;

/// Represents a request sent from a web handler to the main printer task.
#[derive(Debug)]
pub enum PrinterRequest {
    /// A request to get the current state.
    GetStatus {
        /// The channel to send the response back on.
        respond_to: oneshot::Sender<StateNotifyStatus>,
    },
    /// A request to execute a G-code command.
    ExecuteGcode {
        command: String,
        respond_to: oneshot::Sender<Result<Vec<String>, String>>,
    },
    /// Publish a named host event.
    PostEvent {
        name: String,
        respond_to: oneshot::Sender<Result<(), String>>,
    },
    /// Recent event history.
    GetEvents {
        respond_to: oneshot::Sender<Vec<EventRecord>>,
    },
    /// Start, pause, resume or cancel the print job.
    Job {
        action: JobAction,
        respond_to: oneshot::Sender<Result<(), String>>,
    },
    /// Open or close the display menu.
    Menu {
        open: bool,
        respond_to: oneshot::Sender<Result<bool, String>>,
    },
}

/// Apply one request to the printer and answer it.
pub fn handle_request(printer: &mut Printer, request: PrinterRequest) {
    match request {
        PrinterRequest::GetStatus { respond_to } => {
            let _ = respond_to.send(printer.status());
        }
        PrinterRequest::ExecuteGcode { command, respond_to } => {
            let result = printer.process_gcode(&command).map_err(|e| e.to_string());
            if let Err(e) = &result {
                tracing::warn!("G-code '{}' failed: {}", command, e);
            }
            let _ = respond_to.send(result);
        }
        PrinterRequest::PostEvent { name, respond_to } => {
            let _ = respond_to.send(printer.post_event(&name).map_err(|e| e.to_string()));
        }
        PrinterRequest::GetEvents { respond_to } => {
            let events = printer.events().iter().map(EventRecord::from).collect();
            let _ = respond_to.send(events);
        }
        PrinterRequest::Job { action, respond_to } => {
            let _ = respond_to.send(printer.job_action(action).map_err(|e| e.to_string()));
        }
        PrinterRequest::Menu { open, respond_to } => {
            let result = if printer.menu().is_some() {
                Ok(printer.set_menu_open(open))
            } else {
                Err("No display menu configured".to_string())
            };
            let _ = respond_to.send(result);
        }
    }
}

/// Serve requests until every sender is dropped. Time does not advance on
/// its own here; the caller owns the clock.
pub async fn serve_requests(printer: &mut Printer, mut printer_rx: Receiver<PrinterRequest>) {
    while let Some(request) = printer_rx.recv().await {
        handle_request(printer, request);
    }
}
