//! Defines the Axum API routes and handlers.

use crate::printer::JobAction;
use crate::state_notify::StateNotifyStatus;
use crate::web::models::{
    ErrorResponse, EventRecord, GcodeCommandRequest, GcodeResponse, MenuResponse, StartJobRequest,
};
use crate::web::printer_channel::PrinterRequest;
use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use tokio::sync::{mpsc::Sender, oneshot};

pub type AppState = Sender<PrinterRequest>;

/// Error returned by every handler: a status code with a JSON message.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn unavailable() -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: "Printer task unavailable".to_string(),
        }
    }

    fn rejected(message: String) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(ErrorResponse { error: self.message })).into_response()
    }
}

/// Creates the Axum router with all the API endpoints.
pub fn create_router(printer_tx: AppState) -> Router {
    Router::new()
        .route("/api/v1/status", get(get_status))
        .route("/api/v1/gcode", post(execute_gcode))
        .route("/api/v1/events", get(get_events))
        .route("/api/v1/events/{name}", post(post_event))
        .route("/api/v1/job/start", post(start_job))
        .route("/api/v1/job/pause", post(|state: State<AppState>| job_action(state, JobAction::Pause)))
        .route("/api/v1/job/resume", post(|state: State<AppState>| job_action(state, JobAction::Resume)))
        .route("/api/v1/job/cancel", post(|state: State<AppState>| job_action(state, JobAction::Cancel)))
        .route("/api/v1/menu/open", post(|state: State<AppState>| menu_action(state, true)))
        .route("/api/v1/menu/close", post(|state: State<AppState>| menu_action(state, false)))
        .with_state(printer_tx)
}

/// Send a request to the printer task and wait for its answer.
async fn request<T>(
    printer_tx: &AppState,
    build: impl FnOnce(oneshot::Sender<T>) -> PrinterRequest,
) -> Result<T, ApiError> {
    let (resp_tx, resp_rx) = oneshot::channel();
    if printer_tx.send(build(resp_tx)).await.is_err() {
        return Err(ApiError::unavailable());
    }
    resp_rx.await.map_err(|_| ApiError::unavailable())
}

/// Handler to get the current state.
async fn get_status(State(printer_tx): State<AppState>) -> Result<Json<StateNotifyStatus>, ApiError> {
    let status = request(&printer_tx, |respond_to| PrinterRequest::GetStatus { respond_to }).await?;
    Ok(Json(status))
}

/// Handler to execute a G-code command.
async fn execute_gcode(
    State(printer_tx): State<AppState>,
    Json(payload): Json<GcodeCommandRequest>,
) -> Result<Json<GcodeResponse>, ApiError> {
    let responses = request(&printer_tx, |respond_to| PrinterRequest::ExecuteGcode {
        command: payload.command,
        respond_to,
    })
    .await?
    .map_err(ApiError::rejected)?;
    Ok(Json(GcodeResponse { responses }))
}

async fn get_events(State(printer_tx): State<AppState>) -> Result<Json<Vec<EventRecord>>, ApiError> {
    let events = request(&printer_tx, |respond_to| PrinterRequest::GetEvents { respond_to }).await?;
    Ok(Json(events))
}

async fn post_event(
    State(printer_tx): State<AppState>,
    Path(name): Path<String>,
) -> Result<StatusCode, ApiError> {
    request(&printer_tx, |respond_to| PrinterRequest::PostEvent { name, respond_to })
        .await?
        .map_err(ApiError::rejected)?;
    Ok(StatusCode::ACCEPTED)
}

async fn start_job(
    State(printer_tx): State<AppState>,
    Json(payload): Json<StartJobRequest>,
) -> Result<StatusCode, ApiError> {
    job_action(State(printer_tx), JobAction::Start { file: payload.file }).await
}

async fn job_action(State(printer_tx): State<AppState>, action: JobAction) -> Result<StatusCode, ApiError> {
    request(&printer_tx, |respond_to| PrinterRequest::Job { action, respond_to })
        .await?
        .map_err(ApiError::rejected)?;
    Ok(StatusCode::OK)
}

async fn menu_action(State(printer_tx): State<AppState>, open: bool) -> Result<Json<MenuResponse>, ApiError> {
    let changed = request(&printer_tx, |respond_to| PrinterRequest::Menu { open, respond_to })
        .await?
        .map_err(ApiError::rejected)?;
    Ok(Json(MenuResponse { changed }))
}
