//! Error types for hookhub.
//!
//! Errors fall into four groups: configuration errors are fatal at startup,
//! decode errors discard a single webhook delivery, handler errors are logged
//! per handler and never leave the dispatcher, and tracker errors come from the
//! issue tracker client.

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while loading configuration or building the registry.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("Failed to read config file {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The configuration file is not valid TOML or does not match the schema.
    #[error("Invalid configuration: {0}")]
    Parse(#[from] toml::de::Error),

    /// A `{{env.*}}` or `{{file.*}}` reference could not be resolved.
    #[error("Failed to resolve secret: {0}")]
    Secret(String),

    /// A handler could not be constructed from its parameters.
    #[error("Invalid handler '{handler}' for {repository}: {reason}")]
    InvalidHandler {
        repository: String,
        handler: String,
        reason: String,
    },

    /// A handler kind was declared in a list for an event it cannot handle.
    #[error("Handler '{handler}' for {repository} has type '{kind}' which cannot be used as a {list} handler")]
    MisplacedHandler {
        repository: String,
        handler: String,
        kind: String,
        list: &'static str,
    },

    /// Two repository entries share the same full name.
    #[error("Repository {0} is configured more than once")]
    DuplicateRepository(String),
}

/// Errors raised while decoding an inbound webhook delivery.
#[derive(Error, Debug)]
pub enum DecodeError {
    /// The request carried no event kind header.
    #[error("missing X-GitHub-Event header")]
    MissingEventKind,

    /// The event kind is not one hookhub dispatches.
    #[error("unsupported event kind: {0}")]
    UnknownEventKind(String),

    /// A form-encoded body had no `payload` field.
    #[error("form body has no payload field")]
    MissingPayload,

    /// The JSON document did not match the event schema.
    #[error("invalid event JSON: {0}")]
    Json(String),
}

/// Category of a [`HandlerError`], used for logging and assertions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerErrorKind {
    Template,
    Transport,
    Remote,
}

/// Errors returned by a single handler invocation.
#[derive(Error, Debug)]
pub enum HandlerError {
    /// The notification body could not be rendered.
    #[error("Template rendering error: {0}")]
    Template(String),

    /// Sending to the external system failed.
    #[error("Transport error: {0}")]
    Transport(String),

    /// The external system answered with an error code.
    #[error("Remote error {code}: {message}")]
    Remote { code: i64, message: String },
}

impl HandlerError {
    pub fn kind(&self) -> HandlerErrorKind {
        match self {
            HandlerError::Template(_) => HandlerErrorKind::Template,
            HandlerError::Transport(_) => HandlerErrorKind::Transport,
            HandlerError::Remote { .. } => HandlerErrorKind::Remote,
        }
    }
}

/// Errors returned by the issue tracker client.
#[derive(Error, Debug)]
pub enum TrackerError {
    /// The HTTP request could not be completed.
    #[error("Network request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The tracker answered with a non-success HTTP status.
    #[error("Tracker returned HTTP {0}")]
    Status(u16),

    /// The tracker reported an API error in its response document.
    #[error("Tracker error {code}: {message}")]
    Remote { code: i64, message: String },

    /// The response document could not be understood.
    #[error("Malformed tracker response: {0}")]
    MalformedResponse(String),
}

impl From<TrackerError> for HandlerError {
    fn from(err: TrackerError) -> Self {
        match err {
            TrackerError::Remote { code, message } => HandlerError::Remote { code, message },
            other => HandlerError::Transport(other.to_string()),
        }
    }
}

/// Result type alias for configuration operations.
pub type Result<T> = std::result::Result<T, ConfigError>;
