//! Configuration system for hookhub.
//!
//! This module handles loading and parsing `hookhub.toml` configuration files.

use crate::error::{ConfigError, Result};
use crate::handlers::HandlerKind;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::Path;

/// Environment variable that overrides `bind_port`.
pub const PORT_ENV: &str = "PORT";

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_bind_port() -> u16 {
    8080
}

/// Main configuration structure.
#[derive(Clone, Serialize, Deserialize)]
pub struct Config {
    /// Address the webhook server listens on
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    /// Port the webhook server listens on (overridden by `$PORT`)
    #[serde(default = "default_bind_port")]
    pub bind_port: u16,

    /// Shared issue tracker credentials used by tracker handlers
    #[serde(default)]
    pub tracker: Option<TrackerCredentials>,

    /// Repositories and their handlers
    #[serde(default)]
    pub repos: Vec<RepoConfig>,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("bind_address", &self.bind_address)
            .field("bind_port", &self.bind_port)
            .field("repo_count", &self.repos.len())
            .field("repos", &self.repos)
            .finish_non_exhaustive()
    }
}

/// Login details for the issue tracker.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct TrackerCredentials {
    /// Tracker host, optionally with an `http://` or `https://` prefix
    pub host: String,
    pub email: String,
    pub password: String,
}

impl fmt::Debug for TrackerCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrackerCredentials")
            .field("host", &self.host)
            .field("email", &self.email)
            .finish_non_exhaustive()
    }
}

/// One repository entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepoConfig {
    /// Short repository name
    #[serde(default)]
    pub name: String,

    /// "owner/repo" name matched against inbound events
    pub full_name: String,

    /// Handlers run for release events, in order
    #[serde(default)]
    pub release_handlers: Vec<HandlerConfig>,

    /// Handlers run for push events, in order
    #[serde(default)]
    pub push_handlers: Vec<HandlerConfig>,
}

/// Configuration for a single handler instance.
#[derive(Clone, Serialize, Deserialize)]
pub struct HandlerConfig {
    /// Optional label used in logs (defaults to the handler type)
    #[serde(default)]
    pub name: Option<String>,

    /// Handler type
    #[serde(rename = "type")]
    pub kind: HandlerKind,

    /// Handler-specific parameters
    #[serde(default)]
    pub config: toml::Table,
}

impl HandlerConfig {
    /// The label this handler is logged under.
    pub fn display_name(&self) -> String {
        self.name
            .clone()
            .unwrap_or_else(|| self.kind.as_str().to_string())
    }

    /// Deserializes the parameter table into a handler's settings type.
    pub fn parameters<T: serde::de::DeserializeOwned>(&self) -> std::result::Result<T, toml::de::Error> {
        toml::Value::Table(self.config.clone()).try_into()
    }
}

impl fmt::Debug for HandlerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerConfig")
            .field("name", &self.name)
            .field("type", &self.kind)
            .finish_non_exhaustive()
    }
}

impl Config {
    /// Loads configuration from a file path and resolves secrets.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed, or secrets cannot be resolved.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref()).map_err(|e| ConfigError::Read {
            path: path.as_ref().to_path_buf(),
            source: e,
        })?;

        let mut config = Self::from_toml(&content)?;
        config.resolve_secrets()?;
        Ok(config)
    }

    /// Parses configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is invalid or names an unknown handler type.
    pub fn from_toml(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// The port to bind, honouring the `PORT` environment variable.
    pub fn effective_port(&self) -> u16 {
        Self::port_override(std::env::var(PORT_ENV).ok().as_deref()).unwrap_or(self.bind_port)
    }

    fn port_override(value: Option<&str>) -> Option<u16> {
        value.and_then(|v| v.trim().parse().ok())
    }

    /// Resolves secrets in configuration values.
    ///
    /// Supports:
    /// - `{{env.VAR_NAME}}` - Environment variables
    /// - `{{file.path/to/file}}` - Read from file
    ///
    /// Note: This is called automatically by `load()`. Only use this directly
    /// when working with configurations created via `from_toml()`.
    pub fn resolve_secrets(&mut self) -> Result<()> {
        if let Some(tracker) = &mut self.tracker {
            tracker.host = Self::resolve_secret_string(&tracker.host)?;
            tracker.email = Self::resolve_secret_string(&tracker.email)?;
            tracker.password = Self::resolve_secret_string(&tracker.password)?;
        }

        for repo in &mut self.repos {
            for handler in repo.release_handlers.iter_mut().chain(repo.push_handlers.iter_mut()) {
                for (_, value) in handler.config.iter_mut() {
                    resolve_value(value)?;
                }
            }
        }

        Ok(())
    }

    fn resolve_secret_string(s: &str) -> Result<String> {
        substitute(s, |reference| {
            // Environment variables: {{env.VAR_NAME}}
            if let Some(var_name) = reference.strip_prefix("env.") {
                return std::env::var(var_name)
                    .map(Some)
                    .map_err(|_| ConfigError::Secret(format!("Environment variable not found: {}", var_name)));
            }

            // File: {{file.path/to/file}}
            if let Some(file_path) = reference.strip_prefix("file.") {
                let expanded_path = shellexpand::tilde(file_path);
                return fs::read_to_string(expanded_path.as_ref())
                    .map(|value| Some(value.trim().to_string()))
                    .map_err(|e| ConfigError::Secret(format!("Failed to read file {}: {}", file_path, e)));
            }

            Ok(None)
        })
    }
}

/// Replaces every `{{KEY}}` in `input` for which `resolve(KEY)` returns a value.
/// Other braces are left as written.
///
/// Resolved values are not scanned again.
fn substitute<F>(input: &str, resolve: F) -> Result<String>
where
    F: Fn(&str) -> Result<Option<String>>,
{
    let mut result = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(start) = rest.find("{{") {
        let after = &rest[start + 2..];
        let Some(end) = after.find("}}") else {
            break;
        };
        result.push_str(&rest[..start]);
        match resolve(&after[..end])? {
            Some(value) => {
                result.push_str(&value);
                rest = &after[end + 2..];
            }
            None => {
                result.push_str("{{");
                rest = after;
            }
        }
    }

    result.push_str(rest);
    Ok(result)
}

fn resolve_value(value: &mut toml::Value) -> Result<()> {
    match value {
        toml::Value::String(s) => *s = Config::resolve_secret_string(s)?,
        toml::Value::Array(items) => {
            for item in items {
                resolve_value(item)?;
            }
        }
        toml::Value::Table(table) => {
            for (_, item) in table.iter_mut() {
                resolve_value(item)?;
            }
        }
        _ => {}
    }
    Ok(())
}
