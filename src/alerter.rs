//! Alerter: the capability for structured operator-facing messages
//! (spec.md §4.6's alert branch, §2's "Alerter" component).
//!
//! Grounded in `EmailService`: the same SMTP-or-file `AsyncTransport` choice
//! and `Mailbox`/`Message` construction, without the `minijinja` templating
//! layer — operator alerts here are short plain-text messages built inline,
//! not multi-section HTML emails, so no template files are needed.

use crate::config::AlerterConfig;
use crate::db::models::request_info::RequestInfo;
use async_trait::async_trait;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncFileTransport, AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use tracing::{info, warn};

/// One alert-worthy condition (spec.md §4.6 steps 4): a single exceptional
/// row past the retry threshold, or an aggregate over-threshold warning.
#[derive(Debug, Clone)]
pub enum Alert {
    RequestExceededRetries { request: RequestInfo, retry_threshold: i32 },
    TooManyExceptionalRequests { count: usize, threshold: usize },
}

impl Alert {
    fn subject(&self) -> String {
        match self {
            Alert::RequestExceededRetries { request, .. } => format!("TCC request {} exceeded retry threshold", request.id),
            Alert::TooManyExceptionalRequests { .. } => "TCC exceptional request volume alert".to_string(),
        }
    }

    fn body(&self) -> String {
        match self {
            Alert::RequestExceededRetries { request, retry_threshold } => format!(
                "Request {} (url={}, status={:?}) has been retried {} times, exceeding the threshold of {}.",
                request.id, request.url, request.status, request.times, retry_threshold
            ),
            Alert::TooManyExceptionalRequests { count, threshold } => {
                format!("{count} requests are currently in an exceptional state, exceeding the configured threshold of {threshold}.")
            }
        }
    }
}

/// Capability for emitting operator-facing alerts. A trait so the Reconciler
/// can be tested against a recording fake instead of real SMTP.
#[async_trait]
pub trait Alerter: Send + Sync {
    async fn send(&self, alert: &Alert) -> anyhow::Result<()>;
}

enum Transport {
    Smtp(AsyncSmtpTransport<Tokio1Executor>),
    File(AsyncFileTransport<Tokio1Executor>),
}

pub struct EmailAlerter {
    transport: Transport,
    from: String,
    recipients: Vec<String>,
}

impl EmailAlerter {
    pub fn new(config: &AlerterConfig) -> anyhow::Result<Self> {
        let transport = match &config.smtp_host {
            Some(host) => {
                let mut builder = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(host)?.port(config.smtp_port);
                if let (Some(user), Some(pass)) = (&config.smtp_username, &config.smtp_password) {
                    builder = builder.credentials(Credentials::new(user.clone(), pass.clone()));
                }
                Transport::Smtp(builder.build())
            }
            // No SMTP host configured: write alerts to disk. Useful for
            // development and for environments without an operator mailbox
            // wired up yet.
            None => Transport::File(AsyncFileTransport::<Tokio1Executor>::new("./tcc-alerts")),
        };

        Ok(Self {
            transport,
            from: config.from_address.clone(),
            recipients: config.recipients.clone(),
        })
    }
}

#[async_trait]
impl Alerter for EmailAlerter {
    async fn send(&self, alert: &Alert) -> anyhow::Result<()> {
        if self.recipients.is_empty() {
            warn!("no alert recipients configured, dropping alert: {}", alert.subject());
            return Ok(());
        }

        let from: Mailbox = self.from.parse()?;
        let subject = alert.subject();
        let body = alert.body();

        for recipient in &self.recipients {
            let to: Mailbox = recipient.parse()?;
            let message = Message::builder().from(from.clone()).to(to).subject(&subject).body(body.clone())?;

            match &self.transport {
                Transport::Smtp(smtp) => {
                    smtp.send(message).await?;
                }
                Transport::File(file) => {
                    file.send(message).await?;
                }
            }
        }

        info!("sent alert to {} recipient(s): {}", self.recipients.len(), subject);
        Ok(())
    }
}

#[cfg(test)]
pub mod test_support {
    use super::*;
    use std::sync::Mutex;

    /// Records every alert it's asked to send, for reconciler tests.
    #[derive(Default)]
    pub struct RecordingAlerter {
        pub sent: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Alerter for RecordingAlerter {
        async fn send(&self, alert: &Alert) -> anyhow::Result<()> {
            self.sent.lock().unwrap().push(alert.subject());
            Ok(())
        }
    }
}
