//! SMTP email gateway (async lettre).
//!
//! Sends multipart/alternative messages so clients without HTML support
//! still get the plain-text body. Port 465 uses implicit TLS, anything else
//! STARTTLS.

use async_trait::async_trait;
use lettre::message::{Mailbox, MultiPart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use std::time::Duration;

use dripline_core::config::EmailConfig;
use dripline_core::error::{DriplineError, Result};
use dripline_core::traits::EmailGateway;

/// Email gateway backed by an SMTP relay.
pub struct SmtpEmailGateway {
    from: Mailbox,
    reply_to: Option<Mailbox>,
    mailer: AsyncSmtpTransport<Tokio1Executor>,
}

impl SmtpEmailGateway {
    pub fn new(config: &EmailConfig, timeout: Duration) -> Result<Self> {
        if config.smtp_host.is_empty() || config.from_address.is_empty() {
            return Err(DriplineError::Config(
                "SMTP host and from_address are required".into(),
            ));
        }

        let from = match config.from_name.as_deref() {
            Some(name) => format!("{name} <{}>", config.from_address),
            None => config.from_address.clone(),
        }
        .parse::<Mailbox>()
        .map_err(|e| DriplineError::Config(format!("Invalid from: {e}")))?;

        let reply_to = config
            .reply_to
            .as_deref()
            .map(|r| r.parse::<Mailbox>())
            .transpose()
            .map_err(|e| DriplineError::Config(format!("Invalid reply_to: {e}")))?;

        let relay = if config.smtp_port == 465 {
            AsyncSmtpTransport::<Tokio1Executor>::relay(&config.smtp_host)
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.smtp_host)
        }
        .map_err(|e| DriplineError::Config(format!("SMTP relay: {e}")))?;

        let username = if config.username.is_empty() {
            config.from_address.clone()
        } else {
            config.username.clone()
        };
        let mailer = relay
            .port(config.smtp_port)
            .credentials(Credentials::new(username, config.password.clone()))
            .timeout(Some(timeout))
            .build();

        Ok(Self {
            from,
            reply_to,
            mailer,
        })
    }

    fn build_message(&self, to: &str, subject: &str, html: &str, text: &str) -> Result<Message> {
        let to: Mailbox = to
            .parse()
            .map_err(|e| DriplineError::Channel(format!("Invalid to: {e}")))?;

        let mut builder = Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(subject);
        if let Some(reply_to) = &self.reply_to {
            builder = builder.reply_to(reply_to.clone());
        }

        builder
            .multipart(MultiPart::alternative_plain_html(
                text.to_string(),
                html.to_string(),
            ))
            .map_err(|e| DriplineError::Channel(format!("Build email: {e}")))
    }
}

#[async_trait]
impl EmailGateway for SmtpEmailGateway {
    fn name(&self) -> &str {
        "smtp"
    }

    async fn send(&self, to: &str, subject: &str, html: &str, text: &str) -> Result<()> {
        let message = self.build_message(to, subject, html, text)?;
        self.mailer
            .send(message)
            .await
            .map_err(|e| DriplineError::Channel(format!("SMTP send: {e}")))?;
        tracing::debug!("📤 Email sent to: {to}");
        Ok(())
    }
}
