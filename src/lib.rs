//! Hookhub - routes GitHub webhook events to notification handlers.
//!
//! The server receives `release` and `push` webhooks and runs the handlers
//! configured for the event's repository, in order. One handler failing never
//! stops the others, and GitHub always gets an acknowledgment.
//!
//! # Architecture
//!
//! - **Config**: Configuration from `hookhub.toml`
//! - **Event**: GitHub webhook payloads
//! - **Registry**: Repositories and their handlers, built once at startup
//! - **Dispatcher**: Decodes deliveries and fans them out to handlers
//! - **Handlers**: Pluggable notification targets (email, FogBugz)
//! - **Server**: The axum HTTP endpoint
//!
//! # Examples
//!
//! Dispatching a delivery without the HTTP layer:
//!
//! ```no_run
//! use hookhub::{BuildOptions, Config, DispatchContext, Dispatcher, Envelope, Registry};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("hookhub.toml")?;
//!     let options = BuildOptions { debug: true, tracker: config.tracker.clone() };
//!     let registry = Registry::from_config(&config, &options)?;
//!     let dispatcher = Dispatcher::new(Arc::new(registry), DispatchContext::default());
//!
//!     let body = br#"{"release": {"tag_name": "v1.0.0"}, "repository": {"full_name": "acme/widgets"}}"#;
//!     let outcome = dispatcher
//!         .dispatch(Envelope { event_kind: Some("release"), content_type: None, body })
//!         .await;
//!     println!("{:?}", outcome);
//!
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod event;
pub mod handlers;
pub mod registry;
pub mod server;
pub mod tracker;

// Re-export commonly used types at the crate root
pub use config::{Config, HandlerConfig, RepoConfig, TrackerCredentials};
pub use dispatcher::{DispatchContext, DispatchOutcome, Dispatcher, Envelope, HandlerOutcome, Skip};
pub use error::{ConfigError, DecodeError, HandlerError, HandlerErrorKind, TrackerError};
pub use event::{EventKind, InboundEvent, PushEvent, ReleaseEvent};
pub use handlers::{BuildOptions, HandlerKind, PushHandler, ReleaseHandler};
pub use registry::{Registry, Repo, RepositoryDescriptor};
pub use server::{build_router, AppState};
pub use tracker::{FogBugzClient, Session, SessionCache, TrackerClient};
