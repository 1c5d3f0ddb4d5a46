//! Send path: outbound mail for workflow actions, SMTP via lettre.

use async_trait::async_trait;
use lettre::message::Mailbox as LettreMailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};
use secrecy::{ExposeSecret, SecretString};

use crate::config::env_parse;
use crate::error::{ChannelError, ConfigError};

/// One outbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMail {
    pub to: Vec<String>,
    pub subject: String,
    pub body: String,
    /// Message-ID this mail replies to, without angle brackets.
    pub in_reply_to: Option<String>,
}

/// Notification / send-path collaborator used by workflow actions.
#[async_trait]
pub trait MailSender: Send + Sync {
    async fn send(&self, mail: &OutgoingMail) -> Result<(), ChannelError>;
}

// ── Configuration ───────────────────────────────────────────────────

/// Transport security for the SMTP connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SmtpTls {
    /// Plain connection (MailDev's default SMTP port).
    None,
    /// Upgrade with STARTTLS.
    StartTls,
    /// TLS from the first byte (SMTPS).
    Implicit,
}

impl std::str::FromStr for SmtpTls {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "none" | "plain" => Ok(Self::None),
            "starttls" | "tls" => Ok(Self::StartTls),
            "implicit" | "ssl" => Ok(Self::Implicit),
            other => Err(format!("expected none|starttls|implicit, got '{other}'")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<SecretString>,
    pub from_address: String,
    pub tls: SmtpTls,
}

impl Default for SmtpConfig {
    fn default() -> Self {
        Self {
            host: "localhost".into(),
            port: 1025,
            username: None,
            password: None,
            from_address: "mailflow@localhost".into(),
            tls: SmtpTls::None,
        }
    }
}

impl SmtpConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let non_empty = |key: &str| std::env::var(key).ok().filter(|v| !v.trim().is_empty());

        Ok(Self {
            host: non_empty("SMTP_HOST").unwrap_or(defaults.host),
            port: env_parse("SMTP_PORT", defaults.port)?,
            username: non_empty("SMTP_USERNAME"),
            password: non_empty("SMTP_PASSWORD").map(SecretString::from),
            from_address: non_empty("SMTP_FROM_ADDRESS").unwrap_or(defaults.from_address),
            tls: env_parse("SMTP_TLS", defaults.tls)?,
        })
    }
}

// ── SMTP sender ─────────────────────────────────────────────────────

pub struct SmtpSender {
    config: SmtpConfig,
}

impl SmtpSender {
    pub fn new(config: SmtpConfig) -> Self {
        Self { config }
    }

    fn send_failed(reason: String) -> ChannelError {
        ChannelError::SendFailed {
            name: "smtp".into(),
            reason,
        }
    }

    fn transport(&self) -> Result<SmtpTransport, ChannelError> {
        let builder = match self.config.tls {
            SmtpTls::None => SmtpTransport::builder_dangerous(&self.config.host),
            SmtpTls::StartTls => SmtpTransport::starttls_relay(&self.config.host)
                .map_err(|e| Self::send_failed(format!("SMTP relay error: {e}")))?,
            SmtpTls::Implicit => SmtpTransport::relay(&self.config.host)
                .map_err(|e| Self::send_failed(format!("SMTP relay error: {e}")))?,
        };
        let builder = builder.port(self.config.port);

        let builder = match (&self.config.username, &self.config.password) {
            (Some(user), Some(password)) => builder.credentials(Credentials::new(
                user.clone(),
                password.expose_secret().to_string(),
            )),
            _ => builder,
        };
        Ok(builder.build())
    }
}

/// Build the lettre message for an outgoing mail.
fn build_message(from: &str, mail: &OutgoingMail) -> Result<Message, ChannelError> {
    if mail.to.is_empty() {
        return Err(ChannelError::InvalidAddress("no recipients".into()));
    }

    let from: LettreMailbox = from
        .parse()
        .map_err(|e| ChannelError::InvalidAddress(format!("from '{from}': {e}")))?;
    let mut builder = Message::builder().from(from).subject(mail.subject.clone());
    for to in &mail.to {
        let mailbox: LettreMailbox = to
            .parse()
            .map_err(|e| ChannelError::InvalidAddress(format!("to '{to}': {e}")))?;
        builder = builder.to(mailbox);
    }
    if let Some(id) = &mail.in_reply_to {
        builder = builder
            .in_reply_to(format!("<{id}>"))
            .references(format!("<{id}>"));
    }

    builder
        .body(mail.body.clone())
        .map_err(|e| ChannelError::SendFailed {
            name: "smtp".into(),
            reason: format!("Failed to build email: {e}"),
        })
}

#[async_trait]
impl MailSender for SmtpSender {
    async fn send(&self, mail: &OutgoingMail) -> Result<(), ChannelError> {
        let message = build_message(&self.config.from_address, mail)?;
        let transport = self.transport()?;

        tokio::task::spawn_blocking(move || transport.send(&message))
            .await
            .map_err(|e| Self::send_failed(format!("send task panicked: {e}")))?
            .map_err(|e| Self::send_failed(format!("SMTP send failed: {e}")))?;

        tracing::info!(to = ?mail.to, subject = %mail.subject, "Email sent");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mail(to: &[&str]) -> OutgoingMail {
        OutgoingMail {
            to: to.iter().map(|s| s.to_string()).collect(),
            subject: "Re: Pedido #45".into(),
            body: "Recebido, obrigado.".into(),
            in_reply_to: Some("abc@example.com".into()),
        }
    }

    #[test]
    fn tls_mode_parsing() {
        assert_eq!("STARTTLS".parse::<SmtpTls>().unwrap(), SmtpTls::StartTls);
        assert_eq!("ssl".parse::<SmtpTls>().unwrap(), SmtpTls::Implicit);
        assert_eq!("none".parse::<SmtpTls>().unwrap(), SmtpTls::None);
        assert!("maybe".parse::<SmtpTls>().is_err());
    }

    #[test]
    fn message_carries_reply_headers() {
        let msg = build_message("bot@example.com", &mail(&["alice@example.com"])).unwrap();
        let raw = String::from_utf8(msg.formatted()).unwrap();
        assert!(raw.contains("In-Reply-To: <abc@example.com>"));
        assert!(raw.contains("To: alice@example.com"));
        assert!(raw.contains("Subject: Re: Pedido #45"));
    }

    #[test]
    fn multiple_recipients() {
        let msg = build_message("bot@example.com", &mail(&["a@x.com", "b@y.com"])).unwrap();
        let raw = String::from_utf8(msg.formatted()).unwrap();
        assert!(raw.contains("a@x.com"));
        assert!(raw.contains("b@y.com"));
    }

    #[test]
    fn rejects_empty_or_invalid_recipients() {
        assert!(matches!(
            build_message("bot@example.com", &mail(&[])),
            Err(ChannelError::InvalidAddress(_))
        ));
        assert!(matches!(
            build_message("bot@example.com", &mail(&["not an address"])),
            Err(ChannelError::InvalidAddress(_))
        ));
    }

    #[tokio::test]
    async fn unreachable_server_fails_send() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let sender = SmtpSender::new(SmtpConfig {
            host: "127.0.0.1".into(),
            port,
            ..SmtpConfig::default()
        });
        let err = sender.send(&mail(&["alice@example.com"])).await.unwrap_err();
        assert!(matches!(err, ChannelError::SendFailed { .. }));
    }
}
