//! HTTP transport over the admission layer.
//!
//! Routes:
//! - `POST /redact`: JSON `{"text", "mode"}` or a `text/plain` body (random mode)
//! - `GET /health`: liveness
//! - `GET /health/ready`: readiness, including a store ping
//!
//! The handlers only translate between HTTP and [`Gateway::process`]; every
//! policy decision lives in the gateway.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{ConnectInfo, DefaultBodyLimit, State};
use axum::http::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE, RETRY_AFTER};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::net::TcpListener;
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::admission::{ErrorKind, Failure, Gateway, Outcome, Rejection};
use crate::redaction::RedactMode;

/// Request correlation header, echoed when supplied and generated otherwise.
pub const REQUEST_ID_HEADER: HeaderName = HeaderName::from_static("x-request-id");

/// Client address header set by reverse proxies.
pub const FORWARDED_FOR_HEADER: HeaderName = HeaderName::from_static("x-forwarded-for");

/// Identity used when neither a forwarded address nor a peer is known.
pub const UNKNOWN_IDENTITY: &str = "unknown";

/// Extra body bytes allowed over the text limit for the JSON envelope.
const ENVELOPE_ALLOWANCE: usize = 65_536;

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    /// Admission layer.
    pub gateway: Arc<Gateway>,
    /// Cleared when the process starts shutting down.
    pub ready: Arc<AtomicBool>,
}

impl AppState {
    /// State that reports ready.
    pub fn new(gateway: Arc<Gateway>) -> Self {
        Self {
            gateway,
            ready: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Stop reporting ready.
    pub fn mark_unready(&self) {
        self.ready.store(false, Ordering::Release);
    }
}

/// JSON request body for `POST /redact`.
#[derive(Debug, Deserialize)]
pub struct RedactRequest {
    /// Text to scan.
    pub text: String,
    /// Surrogate mode, random when omitted.
    #[serde(default)]
    pub mode: RedactMode,
}

/// JSON response body for a completed redaction.
#[derive(Debug, Serialize, Deserialize)]
pub struct RedactResponse {
    /// Handle of the stored mapping.
    pub mapping_id: String,
    /// Text with identifiers replaced.
    pub redacted_text: String,
    /// Number of replaced identifiers.
    pub mapping_count: usize,
}

/// Build the router.
///
/// The body limit rejects oversized uploads with 413 before they are read in
/// full; the gateway re-checks the text itself.
pub fn router(state: AppState) -> Router {
    let body_limit = state
        .gateway
        .policy()
        .max_payload_bytes
        .saturating_add(ENVELOPE_ALLOWANCE);
    Router::new()
        .route("/redact", post(redact))
        .route("/health", get(health))
        .route("/health/ready", get(ready))
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state)
}

/// Serve `state` on `listener` until `shutdown` resolves.
///
/// # Errors
///
/// Returns an error if the server fails while accepting connections.
pub async fn serve(
    listener: TcpListener,
    state: AppState,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    let addr = listener.local_addr()?;
    info!(%addr, "netveil listening");
    axum::serve(
        listener,
        router(state).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown)
    .await?;
    Ok(())
}

/// Caller identity used as the rate-limit key.
///
/// First `X-Forwarded-For` entry, else the peer address, else
/// [`UNKNOWN_IDENTITY`].
pub fn client_identity(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    let forwarded = headers
        .get(&FORWARDED_FOR_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty());
    match (forwarded, peer) {
        (Some(first), _) => first.to_owned(),
        (None, Some(addr)) => addr.ip().to_string(),
        (None, None) => UNKNOWN_IDENTITY.to_owned(),
    }
}

fn request_id(headers: &HeaderMap) -> String {
    headers
        .get(&REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty() && v.len() <= 128)
        .map_or_else(|| Uuid::new_v4().to_string(), str::to_owned)
}

fn is_json(headers: &HeaderMap) -> bool {
    headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.trim_start().starts_with("application/json"))
}

/// POST /redact
async fn redact(
    State(state): State<AppState>,
    peer: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let request_id = request_id(&headers);
    let identity = client_identity(&headers, peer.map(|ConnectInfo(addr)| addr));
    let span = info_span!("request", request_id = %request_id, identity = %identity);

    let mut response = async {
        if is_json(&headers) {
            match serde_json::from_slice::<RedactRequest>(&body) {
                Ok(req) => {
                    let outcome = state
                        .gateway
                        .process(req.text.as_bytes(), req.mode, &identity)
                        .await;
                    outcome_response(outcome)
                }
                Err(e) => {
                    warn!(error = %e, "rejected malformed json body");
                    error_response(StatusCode::BAD_REQUEST, ErrorKind::MalformedInput, "invalid JSON body")
                }
            }
        } else {
            let outcome = state
                .gateway
                .process(&body, RedactMode::Random, &identity)
                .await;
            outcome_response(outcome)
        }
    }
    .instrument(span)
    .await;

    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    response
}

/// Map a gateway outcome onto HTTP.
pub fn outcome_response(outcome: Outcome) -> Response {
    match outcome {
        Outcome::Completed(done) => Json(RedactResponse {
            mapping_id: done.handle.to_string(),
            redacted_text: done.redacted_text,
            mapping_count: done.entry_count,
        })
        .into_response(),
        Outcome::Rejected(rejection) => {
            let status = rejection_status(&rejection);
            let mut response = error_response(status, rejection.kind(), &rejection.to_string());
            if let Rejection::RateLimited { retry_after } = rejection {
                let secs = retry_after
                    .as_secs()
                    .saturating_add(u64::from(retry_after.subsec_nanos() > 0))
                    .max(1);
                response
                    .headers_mut()
                    .insert(RETRY_AFTER, HeaderValue::from(secs));
            }
            response
        }
        Outcome::Failed(failure) => {
            let status = failure_status(&failure);
            // Failure details can carry backend errors; only the kind leaves.
            error_response(status, failure.kind(), failure.kind().as_str())
        }
    }
}

fn rejection_status(rejection: &Rejection) -> StatusCode {
    match rejection {
        Rejection::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
        Rejection::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
        Rejection::MalformedInput(_) | Rejection::ModeUnavailable(_) => StatusCode::BAD_REQUEST,
    }
}

fn failure_status(failure: &Failure) -> StatusCode {
    match failure {
        Failure::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        Failure::StoreUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        Failure::Engine(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_response(status: StatusCode, kind: ErrorKind, detail: &str) -> Response {
    (
        status,
        Json(json!({
            "error": kind.as_str(),
            "detail": detail,
        })),
    )
        .into_response()
}

/// GET /health
async fn health() -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// GET /health/ready
async fn ready(State(state): State<AppState>) -> Response {
    let backend = state.gateway.store().backend();
    if !state.ready.load(Ordering::Acquire) {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "status": "shutting_down", "backend": backend })),
        )
            .into_response();
    }
    match state.gateway.store().ping().await {
        Ok(()) => Json(json!({ "status": "ready", "backend": backend })).into_response(),
        Err(e) => {
            warn!(backend, error = %e, "readiness probe failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "status": "unavailable", "backend": backend })),
            )
                .into_response()
        }
    }
}
