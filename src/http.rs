//! HTTP surface.
//!
//! `POST /execute` takes `{"script": "..."}` and answers with the response
//! envelope. `GET /health` reports the primary strategy's status.

use std::sync::Arc;

use anyhow::Context;
use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::Value;
use tokio::net::TcpListener;
use tracing::{debug, info};

use crate::coordinator::{ExecutionCoordinator, HealthReport};
use crate::error::ExecError;
use crate::outcome::{ExecutionOutcome, ResponseEnvelope};
use crate::request::extract_script;

type AppState = Arc<ExecutionCoordinator>;

/// Build the application router.
pub fn router(coordinator: AppState) -> Router {
    Router::new()
        .route("/execute", post(execute))
        .route("/health", get(health))
        .with_state(coordinator)
}

/// Serve HTTP on `listener` until the process is interrupted.
pub async fn serve(listener: TcpListener, coordinator: AppState) -> anyhow::Result<()> {
    let addr = listener.local_addr().context("Failed to read listen address")?;
    info!(%addr, "Starting HTTP server");

    axum::serve(listener, router(coordinator))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server error")
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("Shutting down HTTP server");
    }
}

async fn execute(
    State(coordinator): State<AppState>,
    body: Result<Json<Value>, JsonRejection>,
) -> (StatusCode, Json<ResponseEnvelope>) {
    let outcome = match &body {
        Ok(Json(value)) => match extract_script(value) {
            Ok(script) => coordinator.execute(script).await,
            Err(e) => Err(e),
        },
        Err(rejection) => {
            debug!(%rejection, "Unreadable request body");
            Err(ExecError::BadRequest("Request must be JSON".into()))
        }
    };

    (
        status_for(&outcome),
        Json(ResponseEnvelope::from_outcome(&outcome)),
    )
}

async fn health(State(coordinator): State<AppState>) -> Json<HealthReport> {
    Json(coordinator.health().await)
}

fn status_for(outcome: &ExecutionOutcome) -> StatusCode {
    match outcome {
        Ok(_) => StatusCode::OK,
        Err(e) if e.is_internal() => StatusCode::INTERNAL_SERVER_ERROR,
        Err(_) => StatusCode::BAD_REQUEST,
    }
}
