// src/mailer/mod.rs

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use thiserror::Error;
use tracing::{error, info};

use crate::config::SmtpConfig;

#[derive(Debug, Error)]
pub enum MailError {
    #[error("invalid address: {0}")]
    InvalidAddress(String),

    #[error("smtp error: {0}")]
    Smtp(String),
}

/// Result of one send attempt. Transport and auth failures are reported here
/// rather than raised, so callers never need to catch anything to read the
/// status.
#[derive(Debug, Clone)]
pub struct SendOutcome {
    pub success: bool,
    pub error: Option<String>,
}

impl SendOutcome {
    pub fn ok() -> Self {
        Self {
            success: true,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
        }
    }
}

/// Abstraction over anything that can deliver one message to one recipient.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, to: &str, subject: &str, body: &str) -> SendOutcome;

    /// Pre-flight reachability/auth check, independent of sending a message.
    async fn check(&self) -> bool;
}

/// Convenient type alias for dyn mailer.
pub type DynMailer = Arc<dyn Mailer>;

/// Real SMTP transport backed by lettre.
#[derive(Clone)]
pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl SmtpMailer {
    pub fn from_config(cfg: &SmtpConfig) -> Result<Self, MailError> {
        let from: Mailbox = cfg
            .from_address()
            .parse()
            .map_err(|_| MailError::InvalidAddress(cfg.from_address().to_string()))?;

        let mut builder = if cfg.use_tls {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&cfg.host)
                .map_err(|e| MailError::Smtp(e.to_string()))?
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&cfg.host)
        };

        builder = builder
            .port(cfg.port)
            .timeout(Some(Duration::from_secs(10)));

        if !cfg.username.is_empty() {
            builder =
                builder.credentials(Credentials::new(cfg.username.clone(), cfg.password.clone()));
        }

        Ok(Self {
            transport: builder.build(),
            from,
        })
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send(&self, to: &str, subject: &str, body: &str) -> SendOutcome {
        let mailbox: Mailbox = match to.parse() {
            Ok(m) => m,
            Err(_) => return SendOutcome::failed(format!("invalid recipient address: {to}")),
        };

        let message = match Message::builder()
            .from(self.from.clone())
            .to(mailbox)
            .subject(subject)
            .body(body.to_string())
        {
            Ok(m) => m,
            Err(e) => return SendOutcome::failed(format!("failed to build message: {e}")),
        };

        match self.transport.send(message).await {
            Ok(_) => {
                info!("Email sent successfully to {}", to);
                SendOutcome::ok()
            }
            Err(e) => {
                error!("Failed to send email to {}: {}", to, e);
                SendOutcome::failed(e.to_string())
            }
        }
    }

    async fn check(&self) -> bool {
        match self.transport.test_connection().await {
            Ok(true) => {
                info!("SMTP connection test successful");
                true
            }
            Ok(false) => {
                error!("SMTP connection test failed: server not responding");
                false
            }
            Err(e) => {
                error!("SMTP connection test failed: {}", e);
                false
            }
        }
    }
}

/// No-op transport for dry runs and previews. Performs zero network I/O but
/// reports every send as successful, so callers produce the same log rows as
/// a real run.
#[derive(Clone, Default)]
pub struct DryRunMailer;

impl DryRunMailer {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Mailer for DryRunMailer {
    async fn send(&self, to: &str, subject: &str, body: &str) -> SendOutcome {
        info!("[DRY RUN] Email to: {}", to);
        info!("[DRY RUN] Subject: {}", subject);
        let preview: String = body.chars().take(200).collect();
        info!("[DRY RUN] Body ({} chars): {}...", body.len(), preview);
        SendOutcome::ok()
    }

    async fn check(&self) -> bool {
        info!("[DRY RUN] Connection test - OK");
        true
    }
}

/// Build a mailer for a run. Dry runs never touch the network.
pub fn build_mailer(cfg: &SmtpConfig, dry_run: bool) -> Result<DynMailer, MailError> {
    if dry_run {
        Ok(Arc::new(DryRunMailer::new()))
    } else {
        Ok(Arc::new(SmtpMailer::from_config(cfg)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn dry_run_always_succeeds() {
        let mailer = DryRunMailer::new();
        let outcome = mailer.send("test@example.com", "Test", "Test body").await;
        assert!(outcome.success);
        assert!(outcome.error.is_none());
        assert!(mailer.check().await);
    }

    #[test]
    fn build_mailer_dry_run_ignores_bad_smtp_config() {
        let cfg = SmtpConfig {
            host: "".to_string(),
            port: 587,
            username: "".to_string(),
            password: "".to_string(),
            use_tls: true,
            from_email: Some("not-an-address".to_string()),
        };
        assert!(build_mailer(&cfg, true).is_ok());
    }

    #[test]
    fn smtp_mailer_rejects_invalid_from() {
        let cfg = SmtpConfig {
            host: "smtp.example.com".to_string(),
            port: 587,
            username: "user@example.com".to_string(),
            password: "secret".to_string(),
            use_tls: false,
            from_email: Some("not an address".to_string()),
        };
        assert!(matches!(
            SmtpMailer::from_config(&cfg),
            Err(MailError::InvalidAddress(_))
        ));
    }
}
