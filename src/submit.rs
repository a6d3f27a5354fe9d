//! Outgoing mail submission
//!
//! The mailbox engine hands a normalized [`Envelope`] to a [`MailSubmitter`]
//! and gets back a delivery identifier. [`SmtpSubmitter`] is the production
//! implementation: it builds the message with `lettre` and relays it over
//! implicit TLS.

use std::time::Duration;

use async_trait::async_trait;
use lettre::message::{Mailbox, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use secrecy::ExposeSecret;
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::SmtpConfig;
use crate::errors::{AppError, AppResult};

/// Normalized outgoing message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    /// Configured sender identity
    pub from: String,
    pub to: Vec<String>,
    pub subject: String,
    /// Plain-text body
    pub text: String,
    /// Optional HTML alternative
    pub html: Option<String>,
    /// Comma-joined carbon-copy addresses
    pub cc: Option<String>,
    /// Comma-joined blind carbon-copy addresses
    pub bcc: Option<String>,
}

/// Delivers envelopes and reports a delivery identifier
#[async_trait]
pub trait MailSubmitter: Send + Sync {
    async fn submit(&self, envelope: &Envelope) -> AppResult<String>;
}

/// SMTP relay submitter
pub struct SmtpSubmitter {
    config: SmtpConfig,
    timeout: Duration,
}

impl SmtpSubmitter {
    pub fn new(config: SmtpConfig, timeout: Duration) -> Self {
        Self { config, timeout }
    }
}

#[async_trait]
impl MailSubmitter for SmtpSubmitter {
    async fn submit(&self, envelope: &Envelope) -> AppResult<String> {
        let message_id = generate_message_id(&envelope.from);
        let message = build_message(envelope, &message_id)?;

        let transport = AsyncSmtpTransport::<Tokio1Executor>::relay(&self.config.host)
            .map_err(|e| AppError::Submission(format!("invalid SMTP relay: {e}")))?
            .port(self.config.port)
            .timeout(Some(self.timeout))
            .credentials(Credentials::new(
                self.config.user.clone(),
                self.config.pass.expose_secret().to_owned(),
            ))
            .build();

        debug!(host = %self.config.host, port = self.config.port, "submitting message");
        let response = transport
            .send(message)
            .await
            .map_err(|e| AppError::Submission(format!("SMTP send failed: {e}")))?;
        info!(%message_id, code = %response.code(), "message submitted");
        Ok(message_id)
    }
}

/// Build the RFC 5322 message for an envelope
///
/// With an HTML body the message is `multipart/alternative`; otherwise a
/// single text part.
///
/// # Errors
///
/// Returns `InvalidInput` for unparseable addresses and `Submission` if the
/// message cannot be assembled.
pub fn build_message(envelope: &Envelope, message_id: &str) -> AppResult<Message> {
    let mut builder = Message::builder()
        .from(parse_mailbox(&envelope.from, "from")?)
        .subject(envelope.subject.as_str())
        .message_id(Some(message_id.to_owned()));

    for addr in &envelope.to {
        builder = builder.to(parse_mailbox(addr, "to")?);
    }
    for addr in split_addresses(envelope.cc.as_deref()) {
        builder = builder.cc(parse_mailbox(addr, "cc")?);
    }
    for addr in split_addresses(envelope.bcc.as_deref()) {
        builder = builder.bcc(parse_mailbox(addr, "bcc")?);
    }

    let built = match &envelope.html {
        Some(html) => builder.multipart(MultiPart::alternative_plain_html(
            envelope.text.clone(),
            html.clone(),
        )),
        None => builder.singlepart(SinglePart::plain(envelope.text.clone())),
    };
    built.map_err(|e| AppError::Submission(format!("cannot build message: {e}")))
}

/// `<uuid@domain>` using the sender's domain
pub fn generate_message_id(from: &str) -> String {
    let domain = from
        .rsplit_once('@')
        .map(|(_, d)| d.trim_end_matches('>').trim())
        .filter(|d| !d.is_empty())
        .unwrap_or("localhost");
    format!("<{}@{domain}>", Uuid::new_v4())
}

fn split_addresses(joined: Option<&str>) -> impl Iterator<Item = &str> {
    joined
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|a| !a.is_empty())
}

fn parse_mailbox(addr: &str, field: &str) -> AppResult<Mailbox> {
    addr.parse::<Mailbox>()
        .map_err(|e| AppError::InvalidInput(format!("invalid {field} address '{addr}': {e}")))
}

#[cfg(test)]
mod tests {
    use super::{Envelope, build_message, generate_message_id};

    fn envelope() -> Envelope {
        Envelope {
            from: "Me <me@example.com>".to_owned(),
            to: vec!["a@example.com".to_owned()],
            subject: "Hello".to_owned(),
            text: "plain body".to_owned(),
            html: None,
            cc: Some("b@example.com, c@example.com".to_owned()),
            bcc: Some("d@example.com".to_owned()),
        }
    }

    #[test]
    fn message_id_uses_sender_domain() {
        let id = generate_message_id("Me <me@example.com>");
        assert!(id.starts_with('<'));
        assert!(id.ends_with("@example.com>"));
        assert!(generate_message_id("nobody").ends_with("@localhost>"));
    }

    #[test]
    fn all_recipients_reach_the_envelope_but_bcc_stays_hidden() {
        let message = build_message(&envelope(), "<id-1@example.com>").expect("build");
        let recipients: Vec<String> = message
            .envelope()
            .to()
            .iter()
            .map(ToString::to_string)
            .collect();
        assert_eq!(
            recipients,
            vec![
                "a@example.com",
                "b@example.com",
                "c@example.com",
                "d@example.com"
            ]
        );

        let formatted = String::from_utf8(message.formatted()).expect("utf8");
        assert!(formatted.contains("Subject: Hello"));
        assert!(formatted.contains("<id-1@example.com>"));
        assert!(!formatted.contains("d@example.com"));
    }

    #[test]
    fn html_body_builds_alternative_parts() {
        let mut env = envelope();
        env.html = Some("<p>rich</p>".to_owned());
        let message = build_message(&env, "<id-2@example.com>").expect("build");
        let formatted = String::from_utf8(message.formatted()).expect("utf8");
        assert!(formatted.contains("multipart/alternative"));
    }

    #[test]
    fn invalid_address_is_rejected_as_input_error() {
        let mut env = envelope();
        env.to = vec!["not an address".to_owned()];
        let err = build_message(&env, "<id-3@example.com>").expect_err("invalid");
        assert!(err.to_string().contains("invalid to address"));
    }
}
