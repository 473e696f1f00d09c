//! HTTP request handlers

use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse,
    },
    Json,
};
use futures::stream::{self, Stream, StreamExt};
use openapi_server::models::{
    DeployRequest, DeployResponse, DeploymentActionResponse, DeploymentStatusResponse,
    HealthResponse,
};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::watch;
use tracing::debug;

use crate::deploy::fsm::DeploymentStatus;
use crate::deploy::handle::DeploymentHandle;
use crate::deploy::logstream::LogEvent;
use crate::errors::DeployerError;
use crate::server::state::ServerState;
use crate::utils::version_info;

/// Health check handler
pub async fn health_handler() -> impl IntoResponse {
    let version = version_info();
    Json(HealthResponse {
        status: "healthy".to_string(),
        service: "iac-deployer".to_string(),
        version: version.version,
    })
}

/// Start a deployment
pub async fn create_handler(
    State(state): State<Arc<ServerState>>,
    payload: Result<Json<DeployRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<DeployResponse>), DeployerError> {
    let Json(request) =
        payload.map_err(|e| DeployerError::ValidationError(e.body_text()))?;
    let handle = state.manager.create(request)?;

    Ok((
        StatusCode::ACCEPTED,
        Json(DeployResponse {
            deployment_id: handle.id().to_string(),
            status: DeploymentStatus::Running.to_string(),
            message: "deployment started".to_string(),
        }),
    ))
}

/// Current record of a deployment
pub async fn status_handler(
    State(state): State<Arc<ServerState>>,
    Path(deployment_id): Path<String>,
) -> Result<Json<DeploymentStatusResponse>, DeployerError> {
    let handle = state.manager.get(&deployment_id)?;
    Ok(Json(handle.snapshot().to_status_response()))
}

pub async fn approve_handler(
    State(state): State<Arc<ServerState>>,
    Path(deployment_id): Path<String>,
) -> Result<Json<DeploymentActionResponse>, DeployerError> {
    let handle = state.manager.approve(&deployment_id)?;
    Ok(action_response(&handle, "plan approved; apply will start"))
}

pub async fn reject_handler(
    State(state): State<Arc<ServerState>>,
    Path(deployment_id): Path<String>,
) -> Result<Json<DeploymentActionResponse>, DeployerError> {
    let handle = state.manager.reject(&deployment_id)?;
    Ok(action_response(&handle, "plan rejected; deployment will be cancelled"))
}

pub async fn cancel_handler(
    State(state): State<Arc<ServerState>>,
    Path(deployment_id): Path<String>,
) -> Result<Json<DeploymentActionResponse>, DeployerError> {
    let handle = state.manager.cancel(&deployment_id)?;
    Ok(action_response(&handle, "cancellation requested"))
}

fn action_response(handle: &DeploymentHandle, message: &str) -> Json<DeploymentActionResponse> {
    Json(DeploymentActionResponse {
        deployment_id: handle.id().to_string(),
        message: message.to_string(),
    })
}

// ================================ LOG STREAM ==================================== //

/// Stream a deployment's log as server-sent events.
///
/// Every buffered line is replayed first, then live lines follow until the
/// deployment ends or the server shuts down. A subscriber that falls behind
/// gets a `dropped` event with the number of lines it missed.
pub async fn logs_handler(
    State(state): State<Arc<ServerState>>,
    Path(deployment_id): Path<String>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, DeployerError> {
    let handle = state.manager.get(&deployment_id)?;
    let subscription = handle.logs().subscribe();
    debug!(
        "Log subscriber attached to {} ({} buffered lines)",
        deployment_id,
        subscription.replay.len()
    );

    let replay = stream::iter(
        subscription
            .replay
            .into_iter()
            .map(|line| Ok::<_, Infallible>(log_event(&line))),
    );
    let tail = Tail {
        live: (!subscription.closed).then_some(subscription.live),
        handle,
        shutdown: state.shutdown.clone(),
        finished: false,
    };
    let live = stream::unfold(tail, next_live_event);

    Ok(Sse::new(replay.chain(live)).keep_alive(KeepAlive::default()))
}

struct Tail {
    /// `None` once the stream was already closed when subscribing
    live: Option<broadcast::Receiver<LogEvent>>,
    handle: Arc<DeploymentHandle>,
    shutdown: watch::Receiver<bool>,
    finished: bool,
}

async fn next_live_event(mut tail: Tail) -> Option<(Result<Event, Infallible>, Tail)> {
    if tail.finished {
        return None;
    }

    let event = match tail.live.as_mut() {
        None => None,
        Some(live) => tokio::select! {
            received = live.recv() => match received {
                Ok(LogEvent::Line(line)) => Some(log_event(&line)),
                Ok(LogEvent::Closed) | Err(RecvError::Closed) => None,
                Err(RecvError::Lagged(missed)) => {
                    Some(Event::default().event("dropped").data(missed.to_string()))
                }
            },
            _ = shutting_down(&mut tail.shutdown) => {
                debug!("Closing log stream of {} for shutdown", tail.handle.id());
                None
            }
        },
    };

    let event = match event {
        Some(event) => event,
        None => {
            tail.finished = true;
            Event::default()
                .event("end")
                .data(tail.handle.status().to_string())
        }
    };
    Some((Ok(event), tail))
}

/// Resolves once the server starts shutting down
async fn shutting_down(shutdown: &mut watch::Receiver<bool>) {
    if shutdown.wait_for(|stopping| *stopping).await.is_err() {
        // Sender dropped without a shutdown
        std::future::pending::<()>().await;
    }
}

fn log_event(line: &str) -> Event {
    // SSE data fields may not carry carriage returns
    Event::default().event("log").data(line.replace('\r', ""))
}
