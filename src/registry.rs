//! Repository registry.
//!
//! Maps a repository's full name to the handlers configured for it. The
//! registry is built once at startup and only read afterwards.

use crate::config::{Config, HandlerConfig, RepoConfig};
use crate::error::{ConfigError, Result};
use crate::event::EventKind;
use crate::handlers::{self, BuildOptions, PushHandler, ReleaseHandler};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use tracing::info;

/// Identity of a configured repository, handed to handlers read-only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RepositoryDescriptor {
    pub name: String,
    /// "owner/repo"
    pub full_name: String,
}

impl RepositoryDescriptor {
    pub fn new(name: impl Into<String>, full_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            full_name: full_name.into(),
        }
    }
}

/// A repository and its handlers, in dispatch order.
pub struct Repo {
    descriptor: RepositoryDescriptor,
    release_handlers: Vec<Box<dyn ReleaseHandler>>,
    push_handlers: Vec<Box<dyn PushHandler>>,
}

impl Repo {
    pub fn new(
        descriptor: RepositoryDescriptor,
        release_handlers: Vec<Box<dyn ReleaseHandler>>,
        push_handlers: Vec<Box<dyn PushHandler>>,
    ) -> Self {
        Self {
            descriptor,
            release_handlers,
            push_handlers,
        }
    }

    /// Builds every handler declared for `config`.
    ///
    /// # Errors
    ///
    /// Fails on the first handler that cannot be constructed or that is
    /// declared for an event it cannot handle.
    pub fn from_config(config: &RepoConfig, options: &BuildOptions) -> Result<Self> {
        let release_handlers = config
            .release_handlers
            .iter()
            .map(|handler| -> Result<Box<dyn ReleaseHandler>> {
                check_placement(config, handler, EventKind::Release)?;
                handlers::build_release_handler(handler, options).map_err(|reason| invalid(config, handler, reason))
            })
            .collect::<Result<Vec<_>>>()?;

        let push_handlers = config
            .push_handlers
            .iter()
            .map(|handler| -> Result<Box<dyn PushHandler>> {
                check_placement(config, handler, EventKind::Push)?;
                handlers::build_push_handler(handler, options).map_err(|reason| invalid(config, handler, reason))
            })
            .collect::<Result<Vec<_>>>()?;

        let name = if config.name.is_empty() {
            config
                .full_name
                .rsplit('/')
                .next()
                .unwrap_or(&config.full_name)
                .to_string()
        } else {
            config.name.clone()
        };

        Ok(Self::new(
            RepositoryDescriptor::new(name, config.full_name.clone()),
            release_handlers,
            push_handlers,
        ))
    }

    pub fn descriptor(&self) -> &RepositoryDescriptor {
        &self.descriptor
    }

    pub fn release_handlers(&self) -> &[Box<dyn ReleaseHandler>] {
        &self.release_handlers
    }

    pub fn push_handlers(&self) -> &[Box<dyn PushHandler>] {
        &self.push_handlers
    }
}

impl fmt::Debug for Repo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let release: Vec<&str> = self.release_handlers.iter().map(|h| h.name()).collect();
        let push: Vec<&str> = self.push_handlers.iter().map(|h| h.name()).collect();
        f.debug_struct("Repo")
            .field("descriptor", &self.descriptor)
            .field("release_handlers", &release)
            .field("push_handlers", &push)
            .finish()
    }
}

fn check_placement(repo: &RepoConfig, handler: &HandlerConfig, event: EventKind) -> Result<()> {
    if handler.kind.accepts(event) {
        return Ok(());
    }
    Err(ConfigError::MisplacedHandler {
        repository: repo.full_name.clone(),
        handler: handler.display_name(),
        kind: handler.kind.to_string(),
        list: event.as_str(),
    })
}

fn invalid(repo: &RepoConfig, handler: &HandlerConfig, reason: String) -> ConfigError {
    ConfigError::InvalidHandler {
        repository: repo.full_name.clone(),
        handler: handler.display_name(),
        reason,
    }
}

/// Immutable mapping from repository full name to [`Repo`].
#[derive(Debug, Default)]
pub struct Registry {
    repos: HashMap<String, Repo>,
}

impl Registry {
    /// Builds the registry from configuration. Nothing is returned unless every
    /// handler of every repository was constructed.
    pub fn from_config(config: &Config, options: &BuildOptions) -> Result<Self> {
        let repos = config
            .repos
            .iter()
            .map(|repo_config| -> Result<Repo> {
                let repo = Repo::from_config(repo_config, options)?;
                info!(
                    repository = %repo.descriptor.full_name,
                    release_handlers = repo.release_handlers.len(),
                    push_handlers = repo.push_handlers.len(),
                    "Configuring repository"
                );
                Ok(repo)
            })
            .collect::<Result<Vec<_>>>()?;

        Self::from_repos(repos)
    }

    /// Builds a registry from already constructed repositories.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::DuplicateRepository`] if two repos share a full name.
    pub fn from_repos(repos: impl IntoIterator<Item = Repo>) -> Result<Self> {
        let mut map = HashMap::new();
        for repo in repos {
            let key = repo.descriptor.full_name.clone();
            if map.insert(key.clone(), repo).is_some() {
                return Err(ConfigError::DuplicateRepository(key));
            }
        }
        Ok(Self { repos: map })
    }

    pub fn get(&self, full_name: &str) -> Option<&Repo> {
        self.repos.get(full_name)
    }

    pub fn len(&self) -> usize {
        self.repos.len()
    }

    pub fn is_empty(&self) -> bool {
        self.repos.is_empty()
    }

    /// Full names of every configured repository.
    pub fn repository_names(&self) -> impl Iterator<Item = &str> {
        self.repos.keys().map(String::as_str)
    }
}
