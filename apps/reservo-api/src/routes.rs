//! # Routes
//!
//! ```text
//! POST   /automation                  start (or join) a run, wait for the report
//! POST   /automation/launch           start a run in the background
//! DELETE /automation                  stop the active run
//! GET    /automation/progress         aggregate progress
//! POST   /automation/auth/{store_id}  deliver an auth confirmation
//! GET    /automation/events           server-sent engine events
//! GET    /time-sync                   current clock status
//! GET    /health                      liveness
//! ```

use std::convert::Infallible;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, KeepAliveStream, Sse};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use reservo_core::{AggregateProgress, AutomationResult, RunVerdict, TimeSyncStatus};
use reservo_engine::{AutomationSupervisor, RunTicket, StopSummary};

use crate::error::ApiError;

// =============================================================================
// State
// =============================================================================

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub supervisor: AutomationSupervisor,
    /// Cancelled when the server shuts down; ends open event streams.
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn new(supervisor: AutomationSupervisor) -> Self {
        AppState {
            supervisor,
            shutdown: CancellationToken::new(),
        }
    }
}

/// Builds the router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/automation", post(start_automation).delete(stop_automation))
        .route("/automation/launch", post(launch_automation))
        .route("/automation/progress", get(automation_progress))
        .route("/automation/auth/{store_id}", post(route_auth))
        .route("/automation/events", get(automation_events))
        .route("/time-sync", get(time_sync))
        .route("/health", get(health))
        .with_state(state)
}

// =============================================================================
// Payloads
// =============================================================================

/// Optional body of `POST /automation`.
#[derive(Debug, Default, Deserialize)]
pub struct StartRequest {
    /// Store IDs to run. All enabled stores when absent.
    #[serde(default)]
    pub stores: Option<Vec<String>>,
}

impl StartRequest {
    fn parse(body: &Bytes) -> Result<Self, ApiError> {
        if body.iter().all(u8::is_ascii_whitespace) {
            return Ok(StartRequest::default());
        }
        serde_json::from_slice(body).map_err(|e| ApiError::bad_request(format!("invalid request body: {}", e)))
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StartResponse {
    pub success: bool,
    pub run_id: String,
    pub verdict: RunVerdict,
    pub results: Vec<AutomationResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StopResponse {
    pub success: bool,
    #[serde(flatten)]
    pub summary: StopSummary,
}

#[derive(Debug, Serialize)]
pub struct AckResponse {
    pub success: bool,
}

// =============================================================================
// Handlers
// =============================================================================

pub async fn health() -> impl IntoResponse {
    "OK"
}

/// Runs (or joins) a run and responds with its report.
///
/// A run in which every store failed responds with 500 and `success:false`.
pub async fn start_automation(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<(StatusCode, Json<StartResponse>), ApiError> {
    let request = StartRequest::parse(&body)?;
    info!(stores = ?request.stores, "Automation start requested");

    let report = state.supervisor.start(request.stores).await?;
    let status = if report.success {
        StatusCode::OK
    } else {
        warn!(run_id = %report.run_id, "Every store failed");
        StatusCode::INTERNAL_SERVER_ERROR
    };

    Ok((
        status,
        Json(StartResponse {
            success: report.success,
            run_id: report.run_id.to_string(),
            verdict: report.verdict,
            error: (!report.success).then(|| "no store succeeded".to_string()),
            results: report.results,
        }),
    ))
}

/// Starts a run without waiting for it.
pub async fn launch_automation(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<(StatusCode, Json<RunTicket>), ApiError> {
    let request = StartRequest::parse(&body)?;
    let ticket = state.supervisor.launch(request.stores).await?;
    Ok((StatusCode::ACCEPTED, Json(ticket)))
}

pub async fn stop_automation(State(state): State<AppState>) -> Json<StopResponse> {
    let summary = state.supervisor.stop().await;
    Json(StopResponse {
        success: true,
        summary,
    })
}

pub async fn automation_progress(State(state): State<AppState>) -> Json<AggregateProgress> {
    Json(state.supervisor.aggregate_progress().await)
}

pub async fn route_auth(
    State(state): State<AppState>,
    Path(store_id): Path<String>,
    Json(payload): Json<Value>,
) -> Result<Json<AckResponse>, ApiError> {
    state.supervisor.route_auth(&store_id, payload).await?;
    Ok(Json(AckResponse { success: true }))
}

pub async fn time_sync(State(state): State<AppState>) -> Json<TimeSyncStatus> {
    Json(state.supervisor.clock().current_status())
}

/// Streams engine events. Each SSE event is named after the event type and
/// carries `{type, payload}` JSON. The stream ends on server shutdown.
pub async fn automation_events(
    State(state): State<AppState>,
) -> Sse<KeepAliveStream<ReceiverStream<Result<Event, Infallible>>>> {
    let (tx, rx) = mpsc::channel(32);
    let mut events = state.supervisor.events().subscribe();
    let shutdown = state.shutdown.clone();
    debug!("SSE subscriber connected");

    tokio::spawn(async move {
        loop {
            let event = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = tx.closed() => break,
                received = events.recv() => match received {
                    Ok(event) => event,
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "SSE subscriber lagged");
                        continue;
                    }
                    Err(RecvError::Closed) => break,
                },
            };
            let sse = match Event::default().event(event.name()).json_data(&event) {
                Ok(sse) => sse,
                Err(e) => {
                    warn!(error = %e, "Failed to encode event");
                    continue;
                }
            };
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                sent = tx.send(Ok(sse)) => {
                    if sent.is_err() {
                        break;
                    }
                }
            }
        }
        debug!("SSE subscriber closed");
    });

    Sse::new(ReceiverStream::new(rx)).keep_alive(KeepAlive::new().interval(Duration::from_secs(15)))
}
