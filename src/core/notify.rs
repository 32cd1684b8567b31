//! Delivery of rendered reports by email and webhook.

use std::time::Duration;

use lettre::message::{header::ContentType, Mailbox, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use serde::Serialize;
use serde_json::json;
use thiserror::Error;

use crate::core::config::{AppConfig, NotifyMethod, SmtpSettings};

#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("Invalid address '{address}': {source}")]
    Address {
        address: String,
        source: lettre::address::AddressError,
    },
    #[error("Email settings incomplete: {0}")]
    Incomplete(&'static str),
    #[error("Failed to build email: {0}")]
    Message(#[from] lettre::error::Error),
    #[error("SMTP: {0}")]
    Smtp(#[from] lettre::transport::smtp::Error),
    #[error("Webhook request failed: {0}")]
    Webhook(#[from] reqwest::Error),
    #[error("Webhook returned HTTP {0}")]
    WebhookStatus(u16),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Email,
    Webhook,
}

/// Outcome of one delivery attempt.
#[derive(Debug, Clone, Serialize)]
pub struct Delivery {
    pub channel: Channel,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Delivery {
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

fn mailbox(address: &str) -> Result<Mailbox, NotifyError> {
    address.trim().parse().map_err(|source| NotifyError::Address {
        address: address.to_string(),
        source,
    })
}

/// Build the HTML message with every `to` and `cc` recipient.
pub fn build_message(smtp: &SmtpSettings, subject: &str, html: &str) -> Result<Message, NotifyError> {
    let from = smtp.from.as_deref().ok_or(NotifyError::Incomplete("no sender"))?;
    if smtp.to.is_empty() {
        return Err(NotifyError::Incomplete("no recipients"));
    }

    let mut builder = Message::builder().from(mailbox(from)?).subject(subject);
    for address in &smtp.to {
        builder = builder.to(mailbox(address)?);
    }
    for address in &smtp.cc {
        builder = builder.cc(mailbox(address)?);
    }

    let message = builder.singlepart(
        SinglePart::builder()
            .header(ContentType::TEXT_HTML)
            .body(html.to_string()),
    )?;
    Ok(message)
}

pub struct Notifier {
    method: NotifyMethod,
    smtp: SmtpSettings,
    webhook_url: Option<String>,
    http: reqwest::Client,
}

impl Notifier {
    pub fn new(method: NotifyMethod, smtp: SmtpSettings, webhook_url: Option<String>, timeout: Duration) -> Result<Self, NotifyError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            method,
            smtp,
            webhook_url,
            http,
        })
    }

    pub fn from_config(config: &AppConfig) -> Result<Self, NotifyError> {
        Self::new(
            config.notify.method,
            config.smtp.clone(),
            config.notify.webhook_url.clone(),
            config.timeout(),
        )
    }

    /// Deliver through every channel the method selects. Failures are logged
    /// and reported back, never raised.
    pub async fn send(&self, subject: &str, html: &str) -> Vec<Delivery> {
        let mut deliveries = Vec::new();

        if self.method.sends_email() {
            let result = self.send_email(subject, html).await;
            deliveries.push(self.record(Channel::Email, result));
        }
        if self.method.sends_webhook() {
            let result = self.send_webhook(html).await;
            deliveries.push(self.record(Channel::Webhook, result));
        }
        if self.method == NotifyMethod::None {
            tracing::info!("Notification disabled");
        }
        deliveries
    }

    fn record(&self, channel: Channel, result: Result<(), NotifyError>) -> Delivery {
        match result {
            Ok(()) => {
                tracing::info!(channel = ?channel, "Notification sent");
                Delivery { channel, error: None }
            }
            Err(e) => {
                tracing::error!(channel = ?channel, error = %e, "Notification failed");
                Delivery {
                    channel,
                    error: Some(e.to_string()),
                }
            }
        }
    }

    async fn send_email(&self, subject: &str, html: &str) -> Result<(), NotifyError> {
        let message = build_message(&self.smtp, subject, html)?;
        let server = self
            .smtp
            .server
            .as_deref()
            .ok_or(NotifyError::Incomplete("no SMTP server"))?;

        let mut transport = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(server)?.port(self.smtp.port);
        if let Some(password) = &self.smtp.password {
            // Sender address doubles as the login when no username is set.
            let username = self
                .smtp
                .username
                .clone()
                .or_else(|| self.smtp.from.clone())
                .unwrap_or_default();
            transport = transport.credentials(Credentials::new(username, password.clone()));
        }

        transport.build().send(message).await?;
        tracing::debug!(
            to = self.smtp.to.len(),
            cc = self.smtp.cc.len(),
            subject,
            "Email delivered"
        );
        Ok(())
    }

    async fn send_webhook(&self, html: &str) -> Result<(), NotifyError> {
        let Some(url) = self.webhook_url.as_deref() else {
            tracing::warn!("Webhook selected but no URL configured");
            return Ok(());
        };

        let response = self.http.post(url).json(&json!({ "text": html })).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(NotifyError::WebhookStatus(status.as_u16()));
        }
        Ok(())
    }
}
