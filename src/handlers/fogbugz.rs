//! FogBugz resolve handler.
//!
//! Resolves tracker cases that commit messages claim to fix, e.g.
//! `Fixes: https://example.fogbugz.com/default.asp?54393`.

use crate::config::{HandlerConfig, TrackerCredentials};
use crate::dispatcher::DispatchContext;
use crate::error::HandlerError;
use crate::event::PushEvent;
use crate::handlers::{HandlerKind, HandlerResult, PushHandler};
use crate::registry::RepositoryDescriptor;
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use tracing::{info, warn};

static FIXES_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)Fixes:? http[^?]+[?].*?(\d+)\b").expect("valid regex"));

/// Optional per-handler parameters; missing fields fall back to `[tracker]`.
#[derive(Debug, Default, Deserialize)]
struct ResolveSettings {
    #[serde(default)]
    host: Option<String>,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    password: Option<String>,
}

/// Handler that resolves cases referenced by pushed commits.
pub struct FogbugzResolveHandler {
    name: String,
    credentials: TrackerCredentials,
}

impl FogbugzResolveHandler {
    pub fn new(name: impl Into<String>, credentials: TrackerCredentials) -> Self {
        Self {
            name: name.into(),
            credentials,
        }
    }

    /// Creates a handler from its entry, filling gaps from the shared credentials.
    pub fn from_config(config: &HandlerConfig, defaults: Option<&TrackerCredentials>) -> Result<Self, String> {
        let settings: ResolveSettings = config.parameters().map_err(|e| e.to_string())?;

        let pick = |own: Option<String>, field: &str, default: Option<&String>| {
            own.or_else(|| default.cloned())
                .ok_or_else(|| format!("missing tracker '{}' (set it here or in [tracker])", field))
        };

        let credentials = TrackerCredentials {
            host: pick(settings.host, "host", defaults.map(|d| &d.host))?,
            email: pick(settings.email, "email", defaults.map(|d| &d.email))?,
            password: pick(settings.password, "password", defaults.map(|d| &d.password))?,
        };

        Ok(Self::new(config.display_name(), credentials))
    }
}

/// A case reference found in a commit message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FixReference {
    pub case_id: String,
}

/// Finds every case a commit message claims to fix. Ids that are not valid
/// case numbers are skipped.
pub fn fix_references(message: &str) -> Vec<FixReference> {
    FIXES_RE
        .captures_iter(message)
        .filter_map(|caps| {
            let raw = &caps[1];
            match raw.parse::<u64>() {
                Ok(id) => Some(FixReference {
                    case_id: id.to_string(),
                }),
                Err(e) => {
                    warn!(case = %raw, error = %e, "Skipping malformed case id");
                    None
                }
            }
        })
        .collect()
}

#[async_trait]
impl PushHandler for FogbugzResolveHandler {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> HandlerKind {
        HandlerKind::FogbugzResolve
    }

    async fn handle(
        &self,
        ctx: &DispatchContext,
        repo: &RepositoryDescriptor,
        event: &PushEvent,
    ) -> HandlerResult<()> {
        let references: Vec<(&str, FixReference)> = event
            .commits
            .iter()
            .flat_map(|commit| {
                fix_references(&commit.message)
                    .into_iter()
                    .map(move |reference| (commit.url.as_str(), reference))
            })
            .collect();

        if references.is_empty() {
            return Ok(());
        }

        let tracker = ctx.tracker();
        let session = tracker.session(&self.credentials).await?;

        let mut failures = Vec::new();
        for (commit_url, reference) in &references {
            info!(repository = %repo.full_name, case = %reference.case_id, "Resolving case");
            let comment = format!("This was fixed in GitHub: {}", commit_url);

            if let Err(e) = tracker.client().resolve_ticket(&session, &reference.case_id, &comment).await {
                warn!(
                    repository = %repo.full_name,
                    case = %reference.case_id,
                    error = %e,
                    "Failed to resolve case"
                );
                failures.push((reference.case_id.clone(), HandlerError::from(e)));
            }
        }

        match failures.len() {
            0 => Ok(()),
            1 => Err(failures.remove(0).1),
            n => {
                let cases: Vec<String> = failures.iter().map(|(id, e)| format!("#{} ({})", id, e)).collect();
                Err(HandlerError::Transport(format!(
                    "{} of {} cases failed to resolve: {}",
                    n,
                    references.len(),
                    cases.join(", ")
                )))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{HandlerErrorKind, TrackerError};
    use crate::event::{EventKind, InboundEvent};
    use crate::tracker::{Session, SessionCache, TrackerClient};
    use serde_json::json;
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct RecordingTracker {
        logins: Mutex<usize>,
        resolved: Mutex<Vec<(String, String)>>,
        targets: Mutex<Vec<(String, String)>>,
        fail_ids: Vec<String>,
    }

    #[async_trait]
    impl TrackerClient for RecordingTracker {
        async fn authenticate(&self, credentials: &TrackerCredentials) -> Result<Session, TrackerError> {
            *self.logins.lock().unwrap() += 1;
            Ok(Session::new(format!("https://{}", credentials.host), "tok"))
        }

        async fn resolve_ticket(&self, session: &Session, id: &str, comment: &str) -> Result<(), TrackerError> {
            self.resolved.lock().unwrap().push((id.to_string(), comment.to_string()));
            self.targets
                .lock()
                .unwrap()
                .push((session.base_url().to_string(), id.to_string()));
            if self.fail_ids.iter().any(|f| f == id) {
                return Err(TrackerError::Status(500));
            }
            Ok(())
        }
    }

    fn credentials() -> TrackerCredentials {
        credentials_for("tracker.example")
    }

    fn credentials_for(host: &str) -> TrackerCredentials {
        TrackerCredentials {
            host: host.to_string(),
            email: "bot@example.com".to_string(),
            password: "hunter2".to_string(),
        }
    }

    fn push_event(messages: &[&str]) -> PushEvent {
        let commits: Vec<_> = messages
            .iter()
            .enumerate()
            .map(|(i, message)| {
                json!({"id": format!("c{}", i), "message": message, "url": format!("https://github.com/acme/widgets/commit/c{}", i)})
            })
            .collect();
        let json = json!({
            "ref": "refs/heads/main",
            "commits": commits,
            "repository": {"name": "widgets", "full_name": "acme/widgets"}
        });
        match InboundEvent::decode(EventKind::Push, &json.to_string()).unwrap() {
            InboundEvent::Push(event) => event,
            other => panic!("unexpected event {:?}", other),
        }
    }

    fn context(tracker: Arc<RecordingTracker>) -> DispatchContext {
        DispatchContext::new(SessionCache::new(tracker))
    }

    fn repo() -> RepositoryDescriptor {
        RepositoryDescriptor::new("widgets", "acme/widgets")
    }

    #[test]
    fn test_fix_references() {
        let refs = fix_references("Fixes: https://tracker.example/case?id=54393 done");
        assert_eq!(refs, vec![FixReference { case_id: "54393".to_string() }]);

        let refs = fix_references("fixes http://x.fogbugz.com/default.asp?12\nFIXES: https://y/?34");
        let ids: Vec<_> = refs.iter().map(|r| r.case_id.as_str()).collect();
        assert_eq!(ids, vec!["12", "34"]);

        assert!(fix_references("Refactor the widget loader").is_empty());
        assert!(fix_references("Fixes #12").is_empty());
    }

    #[test]
    fn test_oversized_id_skipped() {
        let refs = fix_references("Fixes: https://tracker.example/?99999999999999999999999");
        assert!(refs.is_empty());
    }

    #[tokio::test]
    async fn test_resolves_referenced_case() {
        let tracker = Arc::new(RecordingTracker::default());
        let ctx = context(tracker.clone());
        let handler = FogbugzResolveHandler::new("fogbugz", credentials());

        let event = push_event(&["Fixes: https://tracker.example/case?id=54393 done"]);
        handler.handle(&ctx, &repo(), &event).await.unwrap();

        let resolved = tracker.resolved.lock().unwrap();
        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].0, "54393");
        assert!(resolved[0].1.contains("https://github.com/acme/widgets/commit/c0"));
    }

    #[tokio::test]
    async fn test_no_reference_no_calls() {
        let tracker = Arc::new(RecordingTracker::default());
        let ctx = context(tracker.clone());
        let handler = FogbugzResolveHandler::new("fogbugz", credentials());

        handler
            .handle(&ctx, &repo(), &push_event(&["Tidy up README"]))
            .await
            .unwrap();

        assert!(tracker.resolved.lock().unwrap().is_empty());
        assert_eq!(*tracker.logins.lock().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_failure_does_not_stop_other_cases() {
        let tracker = Arc::new(RecordingTracker {
            fail_ids: vec!["1".to_string()],
            ..Default::default()
        });
        let ctx = context(tracker.clone());
        let handler = FogbugzResolveHandler::new("fogbugz", credentials());

        let event = push_event(&["Fixes: https://t/?1", "Fixes: https://t/?2"]);
        let err = handler.handle(&ctx, &repo(), &event).await.unwrap_err();

        assert_eq!(err.kind(), HandlerErrorKind::Transport);
        let ids: Vec<String> = tracker.resolved.lock().unwrap().iter().map(|(id, _)| id.clone()).collect();
        assert_eq!(ids, vec!["1", "2"]);
    }

    #[tokio::test]
    async fn test_session_reused_across_pushes() {
        let tracker = Arc::new(RecordingTracker::default());
        let ctx = context(tracker.clone());
        let handler = FogbugzResolveHandler::new("fogbugz", credentials());

        for _ in 0..3 {
            handler
                .handle(&ctx, &repo(), &push_event(&["Fixes: https://t/?7"]))
                .await
                .unwrap();
        }

        assert_eq!(*tracker.logins.lock().unwrap(), 1);
        assert_eq!(tracker.resolved.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_handlers_resolve_on_their_own_tracker() {
        let tracker = Arc::new(RecordingTracker::default());
        let ctx = context(tracker.clone());
        let first = FogbugzResolveHandler::new("fa", credentials_for("tracker-a.example"));
        let second = FogbugzResolveHandler::new("fb", credentials_for("tracker-b.example"));

        let event = push_event(&["Fixes: https://x/?42"]);
        first.handle(&ctx, &repo(), &event).await.unwrap();
        second.handle(&ctx, &repo(), &event).await.unwrap();
        first.handle(&ctx, &repo(), &event).await.unwrap();

        let targets = tracker.targets.lock().unwrap().clone();
        assert_eq!(
            targets,
            vec![
                ("https://tracker-a.example".to_string(), "42".to_string()),
                ("https://tracker-b.example".to_string(), "42".to_string()),
                ("https://tracker-a.example".to_string(), "42".to_string()),
            ]
        );
        assert_eq!(*tracker.logins.lock().unwrap(), 2);
    }

    #[test]
    fn test_from_config_uses_defaults() {
        let config: HandlerConfig = toml::from_str(
            r#"
            type = "fogbugz_resolve"
            [config]
            email = "other@example.com"
            "#,
        )
        .unwrap();

        let handler = FogbugzResolveHandler::from_config(&config, Some(&credentials())).unwrap();
        assert_eq!(handler.credentials.host, "tracker.example");
        assert_eq!(handler.credentials.email, "other@example.com");
    }

    #[test]
    fn test_from_config_without_credentials() {
        let config: HandlerConfig = toml::from_str(r#"type = "fogbugz_resolve""#).unwrap();
        let err = FogbugzResolveHandler::from_config(&config, None).err().unwrap();
        assert!(err.contains("host"));
    }
}
