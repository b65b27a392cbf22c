//! Multi-channel alerting: Telegram primary, SMTP email fallback.
//!
//! Alert delivery is best-effort and never fails a run; every message
//! carries the run id so retried deliveries are idempotent for the
//! reader.

use std::time::Duration;

use anyhow::{Context, Result};
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};
use tracing::{info, warn};

use crate::config::{AlertingConfig, EmailConfig, TelegramConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertSeverity {
    Info,
    Warning,
    Critical,
}

impl AlertSeverity {
    pub fn prefix(self) -> &'static str {
        match self {
            AlertSeverity::Info => "[INFO]",
            AlertSeverity::Warning => "[WARNING]",
            AlertSeverity::Critical => "[CRITICAL]",
        }
    }
}

#[derive(Clone)]
pub struct Alerter {
    telegram: TelegramConfig,
    email: EmailConfig,
    http: reqwest::Client,
}

impl Alerter {
    pub fn new(config: &AlertingConfig) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_default();
        Self {
            telegram: config.telegram.clone(),
            email: config.email.clone(),
            http,
        }
    }

    /// Send over the primary channel, falling back to email. Returns
    /// whether at least one channel accepted the message.
    pub async fn send(&self, subject: &str, body: &str, severity: AlertSeverity) -> bool {
        if self.telegram.is_configured() {
            match self.send_telegram(subject, body, severity).await {
                Ok(()) => {
                    info!(subject, "alert sent via telegram");
                    return true;
                }
                Err(err) => warn!(subject, error = %err, "telegram alert failed"),
            }
        }

        if self.email.is_configured() {
            match self.send_email(subject, body, severity).await {
                Ok(()) => {
                    info!(subject, "alert sent via email fallback");
                    return true;
                }
                Err(err) => warn!(subject, error = %err, "email alert failed"),
            }
        }

        warn!(subject, "alert could not be delivered on any channel");
        false
    }

    async fn send_telegram(&self, subject: &str, body: &str, severity: AlertSeverity) -> Result<()> {
        let url = format!(
            "https://api.telegram.org/bot{}/sendMessage",
            self.telegram.bot_token
        );
        let text = format!("{} {subject}\n\n{body}", severity.prefix());

        let response = self
            .http
            .post(&url)
            .json(&serde_json::json!({
                "chat_id": self.telegram.chat_id,
                "text": text,
            }))
            .send()
            .await
            .context("posting to telegram bot api")?;

        response
            .error_for_status()
            .context("telegram bot api rejected the message")?;
        Ok(())
    }

    async fn send_email(&self, subject: &str, body: &str, severity: AlertSeverity) -> Result<()> {
        let email = self.email.clone();
        let subject = format!("{} {subject}", severity.prefix());
        let body = body.to_string();

        // lettre's SMTP transport is blocking; alerts are rare enough that
        // a blocking task is the simplest correct shape.
        tokio::task::spawn_blocking(move || -> Result<()> {
            let host = email
                .smtp_host
                .as_deref()
                .context("smtp host not configured")?;
            let from: Mailbox = email.from.parse().context("parsing from address")?;

            let mut builder = SmtpTransport::starttls_relay(host)
                .context("building smtp transport")?
                .port(email.smtp_port);
            if let (Some(user), Some(pass)) = (&email.username, &email.password) {
                builder = builder.credentials(Credentials::new(user.clone(), pass.clone()));
            }
            let transport = builder.build();

            for recipient in &email.to {
                let to: Mailbox = recipient.parse().context("parsing recipient address")?;
                let message = Message::builder()
                    .from(from.clone())
                    .to(to)
                    .subject(&subject)
                    .body(body.clone())
                    .context("building email")?;
                transport.send(&message).context("sending email")?;
            }
            Ok(())
        })
        .await
        .context("email task panicked")?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_prefixes_match_the_log_levels() {
        assert_eq!(AlertSeverity::Info.prefix(), "[INFO]");
        assert_eq!(AlertSeverity::Warning.prefix(), "[WARNING]");
        assert_eq!(AlertSeverity::Critical.prefix(), "[CRITICAL]");
    }

    #[tokio::test]
    async fn unconfigured_channels_fail_soft() {
        let alerter = Alerter::new(&AlertingConfig::default());
        let delivered = alerter
            .send("Pipeline run failed", "details", AlertSeverity::Critical)
            .await;
        assert!(!delivered);
    }
}
