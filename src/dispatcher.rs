//! Event dispatch.
//!
//! Turns one webhook delivery into handler invocations: classify the event
//! kind, decode the body, look up the repository, then run every handler
//! registered for that kind in order. A handler failure is recorded and logged
//! but never stops the handlers after it.

use crate::error::{DecodeError, HandlerError};
use crate::event::{decode_body, EventKind, InboundEvent};
use crate::handlers::{HandlerKind, HandlerResult};
use crate::registry::{Registry, Repo};
use crate::tracker::SessionCache;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// State shared by every dispatch, available to handlers.
#[derive(Default)]
pub struct DispatchContext {
    tracker: SessionCache,
}

impl DispatchContext {
    pub fn new(tracker: SessionCache) -> Self {
        Self { tracker }
    }

    /// The lazily authenticated issue tracker session.
    pub fn tracker(&self) -> &SessionCache {
        &self.tracker
    }
}

/// The transport-level parts of a webhook delivery.
#[derive(Debug, Clone, Copy)]
pub struct Envelope<'a> {
    /// Value of the `X-GitHub-Event` header
    pub event_kind: Option<&'a str>,
    /// Value of the `Content-Type` header
    pub content_type: Option<&'a str>,
    pub body: &'a [u8],
}

/// Result of running one handler.
#[derive(Debug)]
pub struct HandlerOutcome {
    pub handler: String,
    pub kind: HandlerKind,
    pub result: HandlerResult<()>,
}

impl HandlerOutcome {
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }

    pub fn error(&self) -> Option<&HandlerError> {
        self.result.as_ref().err()
    }
}

/// Why a delivery did not reach any handler.
#[derive(Debug)]
pub enum Skip {
    /// The delivery could not be classified or decoded.
    Decode(DecodeError),
    /// The repository is not in the registry.
    UnconfiguredRepository(String),
}

impl fmt::Display for Skip {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Skip::Decode(e) => write!(f, "{}", e),
            Skip::UnconfiguredRepository(name) => write!(f, "no repository configured for {}", name),
        }
    }
}

/// What happened to a delivery.
#[derive(Debug)]
pub enum DispatchOutcome {
    Ignored(Skip),
    Delivered {
        repository: String,
        event: EventKind,
        outcomes: Vec<HandlerOutcome>,
    },
}

impl DispatchOutcome {
    /// Handler outcomes, empty when the delivery was ignored.
    pub fn outcomes(&self) -> &[HandlerOutcome] {
        match self {
            DispatchOutcome::Ignored(_) => &[],
            DispatchOutcome::Delivered { outcomes, .. } => outcomes,
        }
    }
}

/// Routes webhook deliveries to the handlers in a [`Registry`].
pub struct Dispatcher {
    registry: Arc<Registry>,
    context: DispatchContext,
}

impl Dispatcher {
    pub fn new(registry: Arc<Registry>, context: DispatchContext) -> Self {
        Self { registry, context }
    }

    /// Processes one delivery. Never fails: every problem is logged and
    /// reflected in the returned outcome.
    pub async fn dispatch(&self, envelope: Envelope<'_>) -> DispatchOutcome {
        let event = match self.decode(envelope) {
            Ok(event) => event,
            Err(e) => return DispatchOutcome::Ignored(Skip::Decode(e)),
        };

        let full_name = event.repository_full_name().to_string();
        let Some(repo) = self.registry.get(&full_name) else {
            info!(repository = %full_name, event = %event.kind(), "No repository configured, ignoring");
            return DispatchOutcome::Ignored(Skip::UnconfiguredRepository(full_name));
        };

        let kind = event.kind();
        let outcomes = self.fan_out(repo, &event).await;

        let failed = outcomes.iter().filter(|o| !o.is_success()).count();
        info!(
            repository = %full_name,
            event = %kind,
            handlers = outcomes.len(),
            failed,
            "Event dispatched"
        );

        DispatchOutcome::Delivered {
            repository: full_name,
            event: kind,
            outcomes,
        }
    }

    fn decode(&self, envelope: Envelope<'_>) -> Result<InboundEvent, DecodeError> {
        let kind: EventKind = match envelope.event_kind {
            None => {
                warn!("Webhook without X-GitHub-Event header, ignoring");
                return Err(DecodeError::MissingEventKind);
            }
            Some(raw) => raw.parse().map_err(|e| {
                info!(event = %raw, "Unsupported event kind, ignoring");
                e
            })?,
        };

        let json = decode_body(envelope.content_type, envelope.body).map_err(|e| {
            warn!(event = %kind, error = %e, body = %String::from_utf8_lossy(envelope.body), "Failed to read webhook body");
            e
        })?;
        debug!(event = %kind, payload = %json, "Received notification");

        InboundEvent::decode(kind, &json).map_err(|e| {
            warn!(event = %kind, error = %e, body = %json, "Failed to decode notification");
            e
        })
    }

    async fn fan_out(&self, repo: &Repo, event: &InboundEvent) -> Vec<HandlerOutcome> {
        let descriptor = repo.descriptor();
        let mut outcomes = Vec::new();

        match event {
            InboundEvent::Release(release) => {
                for handler in repo.release_handlers() {
                    let result = handler.handle(descriptor, release).await;
                    outcomes.push(record(&descriptor.full_name, EventKind::Release, handler.name(), handler.kind(), result));
                }
            }
            InboundEvent::Push(push) => {
                for handler in repo.push_handlers() {
                    let result = handler.handle(&self.context, descriptor, push).await;
                    outcomes.push(record(&descriptor.full_name, EventKind::Push, handler.name(), handler.kind(), result));
                }
            }
        }

        outcomes
    }
}

fn record(
    repository: &str,
    event: EventKind,
    handler: &str,
    kind: HandlerKind,
    result: HandlerResult<()>,
) -> HandlerOutcome {
    match &result {
        Ok(()) => info!(repository, %event, handler, %kind, "Handler succeeded"),
        Err(e) => error!(repository, %event, handler, %kind, error = %e, error_kind = ?e.kind(), "Handler failed"),
    }

    HandlerOutcome {
        handler: handler.to_string(),
        kind,
        result,
    }
}
