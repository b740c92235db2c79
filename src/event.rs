//! GitHub webhook event types.
//!
//! This module defines the subset of the release and push payloads that handlers
//! use, and decodes inbound webhook bodies into them.

use crate::error::DecodeError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::str::FromStr;

/// Header carrying the event kind.
pub const EVENT_KIND_HEADER: &str = "x-github-event";

/// The event kinds hookhub dispatches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Release,
    Push,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Release => "release",
            EventKind::Push => "push",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventKind {
    type Err = DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "release" => Ok(EventKind::Release),
            "push" => Ok(EventKind::Push),
            other => Err(DecodeError::UnknownEventKind(other.to_string())),
        }
    }
}

/// GitHub sends `null` for unset names and bodies; treat it as empty.
fn nullable_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

/// Repository the event originated from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Repository {
    #[serde(default)]
    pub id: u64,
    #[serde(default, deserialize_with = "nullable_string")]
    pub name: String,
    pub full_name: String,
}

/// Commit author or pusher.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct User {
    #[serde(default, deserialize_with = "nullable_string")]
    pub name: String,
    #[serde(default, deserialize_with = "nullable_string")]
    pub email: String,
}

/// A single commit in a push.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Commit {
    pub id: String,
    #[serde(default, deserialize_with = "nullable_string")]
    pub message: String,
    #[serde(default, deserialize_with = "nullable_string")]
    pub url: String,
    #[serde(default)]
    pub author: User,
}

/// Payload of a `push` event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushEvent {
    #[serde(rename = "ref", default)]
    pub git_ref: String,
    #[serde(default)]
    pub commits: Vec<Commit>,
    #[serde(default)]
    pub head_commit: Option<Commit>,
    pub repository: Repository,
    #[serde(default)]
    pub pusher: Option<User>,
}

/// A downloadable file attached to a release.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReleaseAsset {
    #[serde(default)]
    pub id: u64,
    #[serde(default, deserialize_with = "nullable_string")]
    pub name: String,
    #[serde(default, deserialize_with = "nullable_string")]
    pub label: String,
    #[serde(default, deserialize_with = "nullable_string")]
    pub content_type: String,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub download_count: u64,
    #[serde(default, deserialize_with = "nullable_string")]
    pub browser_download_url: String,
}

/// The release an event refers to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Release {
    #[serde(default)]
    pub id: u64,
    pub tag_name: String,
    #[serde(default, deserialize_with = "nullable_string")]
    pub target_commitish: String,
    #[serde(default, deserialize_with = "nullable_string")]
    pub name: String,
    #[serde(default, deserialize_with = "nullable_string")]
    pub body: String,
    #[serde(default)]
    pub draft: bool,
    #[serde(default)]
    pub prerelease: bool,
    #[serde(default, deserialize_with = "nullable_string")]
    pub html_url: String,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub published_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub assets: Vec<ReleaseAsset>,
}

impl Release {
    /// Display title: the release name, or the tag when the name is empty.
    pub fn title(&self) -> &str {
        if self.name.trim().is_empty() {
            &self.tag_name
        } else {
            &self.name
        }
    }
}

/// Payload of a `release` event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReleaseEvent {
    #[serde(default)]
    pub action: String,
    pub release: Release,
    pub repository: Repository,
}

/// A decoded webhook delivery.
#[derive(Debug, Clone)]
pub enum InboundEvent {
    Release(ReleaseEvent),
    Push(PushEvent),
}

impl InboundEvent {
    /// Decodes a JSON document into the variant for `kind`.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError::Json`] with the path of the offending field.
    pub fn decode(kind: EventKind, json: &str) -> Result<Self, DecodeError> {
        match kind {
            EventKind::Release => parse_json(json).map(InboundEvent::Release),
            EventKind::Push => parse_json(json).map(InboundEvent::Push),
        }
    }

    pub fn kind(&self) -> EventKind {
        match self {
            InboundEvent::Release(_) => EventKind::Release,
            InboundEvent::Push(_) => EventKind::Push,
        }
    }

    /// Full name ("owner/repo") of the source repository.
    pub fn repository_full_name(&self) -> &str {
        match self {
            InboundEvent::Release(event) => &event.repository.full_name,
            InboundEvent::Push(event) => &event.repository.full_name,
        }
    }
}

fn parse_json<T: serde::de::DeserializeOwned>(json: &str) -> Result<T, DecodeError> {
    serde_path_to_error::deserialize(&mut serde_json::Deserializer::from_str(json))
        .map_err(|e| DecodeError::Json(e.to_string()))
}

/// Extracts the JSON document from a webhook body.
///
/// GitHub delivers either `application/json` bodies or
/// `application/x-www-form-urlencoded` bodies with the document in a
/// `payload` field.
pub fn decode_body(content_type: Option<&str>, body: &[u8]) -> Result<String, DecodeError> {
    let is_form = content_type
        .map(|ct| ct.trim().to_ascii_lowercase().starts_with("application/x-www-form-urlencoded"))
        .unwrap_or(false);

    if is_form {
        return url::form_urlencoded::parse(body)
            .find(|(key, _)| key == "payload")
            .map(|(_, value)| value.into_owned())
            .ok_or(DecodeError::MissingPayload);
    }

    String::from_utf8(body.to_vec()).map_err(|e| DecodeError::Json(format!("body is not UTF-8: {}", e)))
}
