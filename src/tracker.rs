//! Issue tracker client and shared session.
//!
//! Talks to the FogBugz XML API (`/api.asp`). Handlers reach the tracker through
//! a [`SessionCache`] so that one login is shared by every request.

use crate::config::TrackerCredentials;
use crate::error::TrackerError;
use async_trait::async_trait;
use once_cell::sync::{Lazy, OnceCell};
use regex::Regex;
use reqwest::Client;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tracing::{debug, info};

/// Shared HTTP client with connection pooling.
static HTTP_CLIENT: OnceCell<Client> = OnceCell::new();

static TOKEN_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)<token>(.*?)</token>").expect("valid regex"));

static ERROR_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?s)<error\s+code="(-?\d+)"\s*>(.*?)</error>"#).expect("valid regex"));

/// Initialize or get the HTTP client.
fn get_http_client() -> Result<&'static Client, TrackerError> {
    HTTP_CLIENT.get_or_try_init(|| {
        Client::builder()
            .timeout(Duration::from_secs(30))
            .pool_max_idle_per_host(10)
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(TrackerError::Http)
    })
}

/// An authenticated tracker session.
#[derive(Clone, PartialEq)]
pub struct Session {
    base_url: String,
    token: String,
}

impl Session {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            token: token.into(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn token(&self) -> &str {
        &self.token
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

/// Operations hookhub needs from an issue tracker.
#[async_trait]
pub trait TrackerClient: Send + Sync {
    /// Logs in and returns a session token.
    async fn authenticate(&self, credentials: &TrackerCredentials) -> Result<Session, TrackerError>;

    /// Resolves ticket `id`, attaching `comment`.
    async fn resolve_ticket(&self, session: &Session, id: &str, comment: &str) -> Result<(), TrackerError>;
}

/// FogBugz API client.
#[derive(Debug, Clone, Copy, Default)]
pub struct FogBugzClient;

#[async_trait]
impl TrackerClient for FogBugzClient {
    async fn authenticate(&self, credentials: &TrackerCredentials) -> Result<Session, TrackerError> {
        let base_url = base_url(&credentials.host);
        let response = get_http_client()?
            .get(format!("{}/api.asp", base_url))
            .query(&[
                ("cmd", "logon"),
                ("email", credentials.email.as_str()),
                ("password", credentials.password.as_str()),
            ])
            .send()
            .await?;

        let body = read_response(response).await?;
        let token = TOKEN_RE
            .captures(&body)
            .map(|caps| strip_cdata(&caps[1]).trim().to_string())
            .filter(|token| !token.is_empty())
            .ok_or_else(|| TrackerError::MalformedResponse("logon response has no token".to_string()))?;

        Ok(Session::new(base_url, token))
    }

    async fn resolve_ticket(&self, session: &Session, id: &str, comment: &str) -> Result<(), TrackerError> {
        debug!(ticket = %id, "Resolving ticket");
        let response = get_http_client()?
            .post(format!("{}/api.asp", session.base_url()))
            .form(&[
                ("cmd", "resolve"),
                ("token", session.token()),
                ("ixBug", id),
                ("sEvent", comment),
            ])
            .send()
            .await?;

        read_response(response).await.map(|_| ())
    }
}

/// Reads a response body, turning HTTP and API errors into [`TrackerError`].
async fn read_response(response: reqwest::Response) -> Result<String, TrackerError> {
    let status = response.status();
    if !status.is_success() {
        return Err(TrackerError::Status(status.as_u16()));
    }

    let body = response.text().await?;
    if let Some(caps) = ERROR_RE.captures(&body) {
        let code = caps[1]
            .parse()
            .map_err(|_| TrackerError::MalformedResponse(format!("bad error code {}", &caps[1])))?;
        return Err(TrackerError::Remote {
            code,
            message: strip_cdata(&caps[2]).trim().to_string(),
        });
    }

    Ok(body)
}

fn strip_cdata(text: &str) -> &str {
    text.trim()
        .strip_prefix("<![CDATA[")
        .and_then(|inner| inner.strip_suffix("]]>"))
        .unwrap_or(text)
}

/// `https://` is assumed when the host carries no scheme.
fn base_url(host: &str) -> String {
    let host = host.trim().trim_end_matches('/');
    if host.starts_with("http://") || host.starts_with("https://") {
        host.to_string()
    } else {
        format!("https://{}", host)
    }
}

/// Lazily authenticated tracker sessions shared across requests.
///
/// One session is kept per distinct set of credentials, so handlers pointed at
/// different trackers or accounts never share a token. The first successful
/// login for a set of credentials is cached for the life of the process.
/// Concurrent first callers wait for a single login attempt; a failed attempt
/// leaves the slot empty so a later request can retry.
pub struct SessionCache {
    client: Arc<dyn TrackerClient>,
    sessions: Mutex<HashMap<TrackerCredentials, Arc<tokio::sync::OnceCell<Session>>>>,
}

impl SessionCache {
    pub fn new(client: Arc<dyn TrackerClient>) -> Self {
        Self {
            client,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the session for `credentials`, logging in on first use.
    pub async fn session(&self, credentials: &TrackerCredentials) -> Result<Session, TrackerError> {
        let slot = {
            let mut sessions = self.sessions.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(sessions.entry(credentials.clone()).or_default())
        };

        slot.get_or_try_init(|| async {
            info!(host = %credentials.host, email = %credentials.email, "Authenticating with issue tracker");
            self.client.authenticate(credentials).await
        })
        .await
        .cloned()
    }

    pub fn client(&self) -> &dyn TrackerClient {
        self.client.as_ref()
    }
}

impl Default for SessionCache {
    fn default() -> Self {
        Self::new(Arc::new(FogBugzClient))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::future::join_all;
    use mockito::Matcher;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn credentials(host: &str) -> TrackerCredentials {
        TrackerCredentials {
            host: host.to_string(),
            email: "bot@example.com".to_string(),
            password: "hunter2".to_string(),
        }
    }

    #[test]
    fn test_base_url() {
        assert_eq!(base_url("tracker.example"), "https://tracker.example");
        assert_eq!(base_url("http://127.0.0.1:8080/"), "http://127.0.0.1:8080");
    }

    #[test]
    fn test_strip_cdata() {
        assert_eq!(strip_cdata("<![CDATA[abc]]>"), "abc");
        assert_eq!(strip_cdata("abc"), "abc");
    }

    #[tokio::test]
    async fn test_authenticate() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/api.asp")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("cmd".into(), "logon".into()),
                Matcher::UrlEncoded("email".into(), "bot@example.com".into()),
                Matcher::UrlEncoded("password".into(), "hunter2".into()),
            ]))
            .with_status(200)
            .with_body("<?xml version=\"1.0\"?><response><token><![CDATA[tok123]]></token></response>")
            .create_async()
            .await;

        let session = FogBugzClient.authenticate(&credentials(&server.url())).await.unwrap();
        assert_eq!(session.token(), "tok123");
        assert_eq!(session.base_url(), server.url());
    }

    #[tokio::test]
    async fn test_authenticate_remote_error() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/api.asp")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body("<response><error code=\"1\">Incorrect password or username</error></response>")
            .create_async()
            .await;

        let err = FogBugzClient.authenticate(&credentials(&server.url())).await.unwrap_err();
        assert!(matches!(err, TrackerError::Remote { code: 1, .. }));
    }

    #[tokio::test]
    async fn test_resolve_ticket() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/api.asp")
            .match_body(Matcher::AllOf(vec![
                Matcher::UrlEncoded("cmd".into(), "resolve".into()),
                Matcher::UrlEncoded("token".into(), "tok123".into()),
                Matcher::UrlEncoded("ixBug".into(), "54393".into()),
            ]))
            .with_status(200)
            .with_body("<response><case ixBug=\"54393\"/></response>")
            .create_async()
            .await;

        let session = Session::new(server.url(), "tok123");
        FogBugzClient
            .resolve_ticket(&session, "54393", "This was fixed in GitHub: https://example.com/c/1")
            .await
            .unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_resolve_ticket_http_error() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/api.asp")
            .with_status(503)
            .create_async()
            .await;

        let session = Session::new(server.url(), "tok123");
        let err = FogBugzClient.resolve_ticket(&session, "1", "x").await.unwrap_err();
        assert!(matches!(err, TrackerError::Status(503)));
    }

    /// Counts logins and succeeds after a short delay.
    struct CountingClient {
        logins: AtomicUsize,
    }

    #[async_trait]
    impl TrackerClient for CountingClient {
        async fn authenticate(&self, credentials: &TrackerCredentials) -> Result<Session, TrackerError> {
            self.logins.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            Ok(Session::new(base_url(&credentials.host), "tok"))
        }

        async fn resolve_ticket(&self, _session: &Session, _id: &str, _comment: &str) -> Result<(), TrackerError> {
            Ok(())
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_session_created_once_under_concurrency() {
        let client = Arc::new(CountingClient {
            logins: AtomicUsize::new(0),
        });
        let cache = Arc::new(SessionCache::new(client.clone()));
        let creds = credentials("tracker.example");

        let tasks = (0..16).map(|_| {
            let cache = Arc::clone(&cache);
            let creds = creds.clone();
            tokio::spawn(async move { cache.session(&creds).await.map(|s| s.token().to_string()) })
        });
        let results = join_all(tasks).await;

        for result in results {
            assert_eq!(result.unwrap().unwrap(), "tok");
        }
        assert_eq!(client.logins.load(Ordering::SeqCst), 1);
    }

    /// Fails the first login, succeeds afterwards.
    struct FlakyClient {
        attempts: AtomicUsize,
    }

    #[async_trait]
    impl TrackerClient for FlakyClient {
        async fn authenticate(&self, _credentials: &TrackerCredentials) -> Result<Session, TrackerError> {
            if self.attempts.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(TrackerError::Status(500))
            } else {
                Ok(Session::new("https://tracker.example", "tok"))
            }
        }

        async fn resolve_ticket(&self, _session: &Session, _id: &str, _comment: &str) -> Result<(), TrackerError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_sessions_kept_per_tracker() {
        let client = Arc::new(CountingClient {
            logins: AtomicUsize::new(0),
        });
        let cache = SessionCache::new(client.clone());

        let a = cache.session(&credentials("tracker-a.example")).await.unwrap();
        let b = cache.session(&credentials("tracker-b.example")).await.unwrap();
        let a_again = cache.session(&credentials("tracker-a.example")).await.unwrap();

        assert_eq!(a.base_url(), "https://tracker-a.example");
        assert_eq!(b.base_url(), "https://tracker-b.example");
        assert_eq!(a_again, a);
        assert_eq!(client.logins.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_failed_login_is_not_cached() {
        let cache = SessionCache::new(Arc::new(FlakyClient {
            attempts: AtomicUsize::new(0),
        }));
        let creds = credentials("tracker.example");

        assert!(cache.session(&creds).await.is_err());
        assert_eq!(cache.session(&creds).await.unwrap().token(), "tok");
    }
}
