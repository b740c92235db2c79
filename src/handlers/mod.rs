//! Notification handlers.
//!
//! This module defines the release and push handler traits, the closed set of
//! handler kinds, and the constructors that turn a [`HandlerConfig`] into a
//! concrete handler.

use crate::config::{HandlerConfig, TrackerCredentials};
use crate::dispatcher::DispatchContext;
use crate::error::HandlerError;
use crate::event::{EventKind, PushEvent, ReleaseEvent};
use crate::registry::RepositoryDescriptor;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

pub mod email;
pub mod fogbugz;

/// Result type for handler operations.
pub type HandlerResult<T> = std::result::Result<T, HandlerError>;

/// The handler types that can appear in configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandlerKind {
    /// Mails rendered release notes
    Email,
    /// Resolves tracker cases referenced by commit messages
    #[serde(alias = "issue_tracker_resolve")]
    FogbugzResolve,
}

impl HandlerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            HandlerKind::Email => "email",
            HandlerKind::FogbugzResolve => "fogbugz_resolve",
        }
    }

    /// Every handler kind, for listing.
    pub fn all() -> &'static [HandlerKind] {
        &[HandlerKind::Email, HandlerKind::FogbugzResolve]
    }

    /// Whether this kind can be registered for `event`.
    pub fn accepts(&self, event: EventKind) -> bool {
        matches!(
            (self, event),
            (HandlerKind::Email, EventKind::Release) | (HandlerKind::FogbugzResolve, EventKind::Push)
        )
    }
}

impl fmt::Display for HandlerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Trait for handlers triggered by release events.
#[async_trait]
pub trait ReleaseHandler: Send + Sync {
    /// Instance label used in logs.
    fn name(&self) -> &str;

    fn kind(&self) -> HandlerKind;

    /// Handles a release notification.
    ///
    /// # Arguments
    ///
    /// * `repo` - The configured repository the release belongs to
    /// * `event` - The decoded release event
    async fn handle(&self, repo: &RepositoryDescriptor, event: &ReleaseEvent) -> HandlerResult<()>;
}

/// Trait for handlers triggered by push events.
#[async_trait]
pub trait PushHandler: Send + Sync {
    /// Instance label used in logs.
    fn name(&self) -> &str;

    fn kind(&self) -> HandlerKind;

    /// Handles a push notification.
    ///
    /// # Arguments
    ///
    /// * `ctx` - Shared state for this dispatcher, such as the tracker session
    /// * `repo` - The configured repository that was pushed to
    /// * `event` - The decoded push event
    async fn handle(
        &self,
        ctx: &DispatchContext,
        repo: &RepositoryDescriptor,
        event: &PushEvent,
    ) -> HandlerResult<()>;
}

/// Inputs shared by all handler constructors.
#[derive(Debug, Clone, Default)]
pub struct BuildOptions {
    /// Log rendered mail instead of sending it
    pub debug: bool,

    /// Default tracker credentials from the `[tracker]` table
    pub tracker: Option<TrackerCredentials>,
}

/// Constructs a release handler from its configuration entry.
///
/// Returns a human-readable reason on failure; the registry attaches the
/// repository and handler names.
pub fn build_release_handler(
    config: &HandlerConfig,
    options: &BuildOptions,
) -> std::result::Result<Box<dyn ReleaseHandler>, String> {
    match config.kind {
        HandlerKind::Email => {
            let handler = email::EmailReleaseNotifier::from_config(config, options.debug)?;
            Ok(Box::new(handler))
        }
        HandlerKind::FogbugzResolve => Err(misplaced(config.kind, EventKind::Release)),
    }
}

/// Constructs a push handler from its configuration entry.
pub fn build_push_handler(
    config: &HandlerConfig,
    options: &BuildOptions,
) -> std::result::Result<Box<dyn PushHandler>, String> {
    match config.kind {
        HandlerKind::FogbugzResolve => {
            let handler = fogbugz::FogbugzResolveHandler::from_config(config, options.tracker.as_ref())?;
            Ok(Box::new(handler))
        }
        HandlerKind::Email => Err(misplaced(config.kind, EventKind::Push)),
    }
}

fn misplaced(kind: HandlerKind, event: EventKind) -> String {
    format!("{} handlers cannot handle {} events", kind, event)
}
