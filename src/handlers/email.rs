//! Email release notifier.
//!
//! Renders a Handlebars template with the release notes and sends it over SMTP.

use crate::config::HandlerConfig;
use crate::error::HandlerError;
use crate::event::{Release, ReleaseEvent};
use crate::handlers::{HandlerKind, HandlerResult, ReleaseHandler};
use crate::registry::RepositoryDescriptor;
use async_trait::async_trait;
use handlebars::Handlebars;
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};
use pulldown_cmark::{html, Options, Parser};
use serde::Deserialize;
use serde_json::json;
use std::fmt;
use std::path::PathBuf;
use tracing::{debug, info};

const TEMPLATE_NAME: &str = "release_email";

fn default_smtp_port() -> u16 {
    25
}

/// Parameters of an `email` handler entry.
#[derive(Clone, Deserialize)]
pub struct EmailSettings {
    pub smtp_server: String,
    #[serde(default = "default_smtp_port")]
    pub smtp_port: u16,
    #[serde(default)]
    pub smtp_username: Option<String>,
    #[serde(default)]
    pub smtp_password: Option<String>,
    pub from: String,
    pub to: String,
    /// Path to the Handlebars template for the mail body
    pub template: PathBuf,
}

impl fmt::Debug for EmailSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EmailSettings")
            .field("smtp_server", &self.smtp_server)
            .field("smtp_port", &self.smtp_port)
            .field("smtp_username", &self.smtp_username)
            .field("from", &self.from)
            .field("to", &self.to)
            .field("template", &self.template)
            .finish_non_exhaustive()
    }
}

/// A fully rendered message, ready for a [`Mailer`].
#[derive(Debug, Clone)]
pub struct OutgoingMail {
    pub from: Mailbox,
    pub to: Mailbox,
    pub subject: String,
    pub html: String,
}

/// Delivers rendered mail.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, mail: &OutgoingMail) -> HandlerResult<()>;
}

/// Sends mail through an SMTP server.
pub struct SmtpMailer {
    transport: SmtpTransport,
}

impl SmtpMailer {
    /// Builds the SMTP transport for `settings`.
    ///
    /// Local test servers get a plain connection, port 465 uses implicit TLS,
    /// anything else upgrades with STARTTLS.
    pub fn new(settings: &EmailSettings) -> Result<Self, String> {
        let server = settings.smtp_server.as_str();
        let port = settings.smtp_port;

        let mut builder = if port == 1025 || server == "localhost" || server == "127.0.0.1" {
            SmtpTransport::builder_dangerous(server).port(port)
        } else if port == 465 {
            SmtpTransport::relay(server)
                .map_err(|e| format!("Failed to configure SMTP relay {}: {}", server, e))?
                .port(port)
        } else {
            SmtpTransport::starttls_relay(server)
                .map_err(|e| format!("Failed to configure SMTP relay {}: {}", server, e))?
                .port(port)
        };

        if let (Some(user), Some(pass)) = (&settings.smtp_username, &settings.smtp_password) {
            builder = builder.credentials(Credentials::new(user.clone(), pass.clone()));
        }

        Ok(Self {
            transport: builder.build(),
        })
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send(&self, mail: &OutgoingMail) -> HandlerResult<()> {
        let message = Message::builder()
            .from(mail.from.clone())
            .to(mail.to.clone())
            .subject(mail.subject.clone())
            .header(ContentType::TEXT_HTML)
            .body(mail.html.clone())
            .map_err(|e| HandlerError::Transport(format!("Failed to build email: {}", e)))?;

        // lettre's SmtpTransport blocks
        let transport = self.transport.clone();
        tokio::task::spawn_blocking(move || transport.send(&message))
            .await
            .map_err(|e| HandlerError::Transport(format!("Email task failed: {}", e)))?
            .map_err(|e| HandlerError::Transport(format!("Failed to send email: {}", e)))?;

        Ok(())
    }
}

/// Logs rendered mail instead of sending it (debug mode).
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, mail: &OutgoingMail) -> HandlerResult<()> {
        info!(
            from = %mail.from,
            to = %mail.to,
            subject = %mail.subject,
            "Debug mode, not sending email:\n{}",
            mail.html
        );
        Ok(())
    }
}

/// Handler that mails rendered release notes.
pub struct EmailReleaseNotifier {
    name: String,
    from: Mailbox,
    to: Mailbox,
    templates: Handlebars<'static>,
    mailer: Box<dyn Mailer>,
}

impl EmailReleaseNotifier {
    /// Creates a notifier that delivers through `mailer`.
    ///
    /// # Errors
    ///
    /// Returns a reason if an address does not parse or the template cannot be
    /// read or compiled.
    pub fn new(
        name: impl Into<String>,
        settings: &EmailSettings,
        mailer: Box<dyn Mailer>,
    ) -> Result<Self, String> {
        let from: Mailbox = settings
            .from
            .parse()
            .map_err(|e| format!("Invalid 'from' address {:?}: {}", settings.from, e))?;
        let to: Mailbox = settings
            .to
            .parse()
            .map_err(|e| format!("Invalid 'to' address {:?}: {}", settings.to, e))?;

        let mut templates = Handlebars::new();
        templates.set_strict_mode(true);
        templates
            .register_template_file(TEMPLATE_NAME, &settings.template)
            .map_err(|e| format!("Failed to load template {}: {}", settings.template.display(), e))?;

        Ok(Self {
            name: name.into(),
            from,
            to,
            templates,
            mailer,
        })
    }

    /// Creates a notifier from a handler entry. In debug mode mail is logged
    /// instead of sent.
    pub fn from_config(config: &HandlerConfig, debug: bool) -> Result<Self, String> {
        let settings: EmailSettings = config.parameters().map_err(|e| e.to_string())?;

        let mailer: Box<dyn Mailer> = if debug {
            Box::new(LogMailer)
        } else {
            Box::new(SmtpMailer::new(&settings)?)
        };

        Self::new(config.display_name(), &settings, mailer)
    }

    /// Renders the mail for a release without sending it.
    pub fn render(&self, repo: &RepositoryDescriptor, event: &ReleaseEvent) -> HandlerResult<OutgoingMail> {
        let context = json!({
            "repository": repo,
            "action": event.action,
            "release": event.release,
            "release_notes": markdown_to_html(&event.release.body),
            "downloads": downloads_html(&event.release),
        });

        let html = self
            .templates
            .render(TEMPLATE_NAME, &context)
            .map_err(|e| HandlerError::Template(e.to_string()))?;

        Ok(OutgoingMail {
            from: self.from.clone(),
            to: self.to.clone(),
            subject: event.release.title().to_string(),
            html,
        })
    }
}

#[async_trait]
impl ReleaseHandler for EmailReleaseNotifier {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> HandlerKind {
        HandlerKind::Email
    }

    async fn handle(&self, repo: &RepositoryDescriptor, event: &ReleaseEvent) -> HandlerResult<()> {
        let mail = self.render(repo, event)?;
        debug!(handler = %self.name, to = %mail.to, subject = %mail.subject, "Sending release email");
        self.mailer.send(&mail).await
    }
}

/// Converts release notes from GitHub markdown to HTML.
pub fn markdown_to_html(markdown: &str) -> String {
    let options = Options::ENABLE_TABLES | Options::ENABLE_STRIKETHROUGH | Options::ENABLE_FOOTNOTES;
    let parser = Parser::new_ext(markdown, options);

    let mut output = String::new();
    html::push_html(&mut output, parser);
    output
}

fn downloads_html(release: &Release) -> String {
    if release.assets.is_empty() {
        return String::new();
    }

    let mut output = String::from("<ul>\n");
    for asset in &release.assets {
        let label = if asset.label.is_empty() { &asset.name } else { &asset.label };
        output.push_str(&format!(
            "<li><a href=\"{}\">{}</a> ({} bytes)</li>\n",
            handlebars::html_escape(&asset.browser_download_url),
            handlebars::html_escape(label),
            asset.size
        ));
    }
    output.push_str("</ul>\n");
    output
}
