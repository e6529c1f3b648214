// HTTP handlers for the service. `open_sesame` is the only route that does
// real work; the others expose health and Prometheus metrics.
use axum::{extract::Extension, http::StatusCode, response::{IntoResponse, Response}, Json};
use prometheus::{Encoder, Registry, TextEncoder};
use serde::Serialize;
use std::sync::Arc;
use tracing::error;

use crate::state::{Clicker, TriggerOutcome};

pub const OPENED: &str = "Opened";

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: &'static str,
    detail: String,
}

/// Trigger one door click.
///
/// The trigger runs in its own task so a client hanging up mid-request does
/// not cancel a session that already started. Unless strict responses are
/// enabled the caller always gets `200 Opened`.
pub async fn open_sesame(Extension(clicker): Extension<Arc<Clicker>>) -> Response {
    let strict = clicker.options().strict_responses;
    let outcome = tokio::spawn(async move { clicker.trigger().await }).await;

    let failure = match outcome {
        Ok(TriggerOutcome::Published(_)) => None,
        Ok(TriggerOutcome::ConfigMissing(e)) => {
            Some((StatusCode::INTERNAL_SERVER_ERROR, "config_missing", e.to_string()))
        }
        Ok(TriggerOutcome::ConnectionFailure(e)) => {
            Some((StatusCode::BAD_GATEWAY, "connection_failure", e.to_string()))
        }
        Err(e) => {
            error!(error = %e, "Trigger task failed");
            Some((StatusCode::INTERNAL_SERVER_ERROR, "internal", e.to_string()))
        }
    };

    match failure {
        Some((status, error, detail)) if strict => {
            (status, Json(ErrorBody { error, detail })).into_response()
        }
        _ => (StatusCode::OK, OPENED).into_response(),
    }
}

/// Expose Prometheus text-format metrics gathered from the `Registry`.
pub async fn metrics_handler(Extension(registry): Extension<Arc<Registry>>) -> Response {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&registry.gather(), &mut buffer) {
        error!(error = %e, "Failed to encode metrics");
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }
    (
        [(axum::http::header::CONTENT_TYPE, encoder.format_type().to_string())],
        buffer,
    )
        .into_response()
}
