//! HTTP server.
//!
//! # Endpoints
//!
//! - `POST /github_webhook` - Accepts GitHub webhook deliveries (always 200 OK)
//! - `GET /health` - Returns 200 if the server is running

use crate::dispatcher::{DispatchOutcome, Dispatcher, Envelope};
use crate::event::EVENT_KIND_HEADER;
use axum::body::Bytes;
use axum::extract::{DefaultBodyLimit, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::Router;
use std::sync::Arc;
use tracing::debug;

/// Path GitHub is configured to deliver to.
pub const WEBHOOK_PATH: &str = "/github_webhook";

/// Largest delivery accepted. GitHub caps webhook payloads at 25 MB.
pub const MAX_BODY_BYTES: usize = 25 * 1024 * 1024;

/// Shared application state, passed to handlers via Axum's `State` extractor.
#[derive(Clone)]
pub struct AppState {
    dispatcher: Arc<Dispatcher>,
}

impl AppState {
    pub fn new(dispatcher: Arc<Dispatcher>) -> Self {
        Self { dispatcher }
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }
}

/// Builds the axum Router with all endpoints.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route(WEBHOOK_PATH, post(webhook_handler))
        .route("/health", get(health_handler))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .with_state(state)
}

/// Webhook handler.
///
/// Runs every configured handler for the delivery before answering. The
/// response is 200 OK regardless of what the handlers did: GitHub only needs
/// to know the payload arrived.
pub async fn webhook_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> (StatusCode, &'static str) {
    let envelope = Envelope {
        event_kind: header_str(&headers, EVENT_KIND_HEADER),
        content_type: header_str(&headers, header::CONTENT_TYPE.as_str()),
        body: &body,
    };

    match state.dispatcher().dispatch(envelope).await {
        DispatchOutcome::Ignored(skip) => debug!(reason = %skip, "Webhook ignored"),
        DispatchOutcome::Delivered { outcomes, .. } => {
            debug!(handlers = outcomes.len(), "Webhook delivered")
        }
    }

    (StatusCode::OK, "OK")
}

/// Liveness probe.
pub async fn health_handler() -> &'static str {
    "OK"
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}
