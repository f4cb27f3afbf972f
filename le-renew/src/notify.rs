//! Mailing of the buffered run report.

use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use enum_dispatch::enum_dispatch;
use tracing::debug;

use crate::{settings::MailSettings, LogBuffer};

pub use smtp::{SmtpMailer, SmtpSecurity};

mod smtp;

/// A plain-text report email.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub from: String,
    pub to: Vec<String>,
    pub subject: String,
    pub body: String,
}

impl Notification {
    /// Compose a report with one line per record, or `None` if there is nothing to report.
    pub fn compose(settings: &MailSettings, records: &[String]) -> Option<Self> {
        if records.is_empty() {
            return None;
        }
        let mut body = records.join("\n");
        body.push('\n');
        Some(Self {
            from: settings.from.clone(),
            to: settings.to.clone(),
            subject: settings.subject.clone(),
            body,
        })
    }
}

#[enum_dispatch]
#[allow(async_fn_in_trait)]
pub trait MailTransport {
    /// Deliver the notification to every recipient.
    async fn send(&self, notification: &Notification) -> Result<()>;
}

/// Outgoing mail channel for reports.
#[derive(Debug, Clone)]
#[enum_dispatch(MailTransport)]
pub enum Mailer {
    Smtp(SmtpMailer),
    Memory(MemoryMailer),
}

/// Keeps sent notifications in memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryMailer {
    sent: Arc<Mutex<Vec<Notification>>>,
}

impl MemoryMailer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<Notification> {
        self.sent.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl MailTransport for MemoryMailer {
    async fn send(&self, notification: &Notification) -> Result<()> {
        self.sent
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(notification.clone());
        Ok(())
    }
}

/// Drain `buffer` and mail its records as a single report.
///
/// Returns `false` without sending anything if the buffer was empty.
pub async fn flush(buffer: &LogBuffer, settings: &MailSettings, mailer: &Mailer) -> Result<bool> {
    let records = buffer.take();
    let Some(notification) = Notification::compose(settings, &records) else {
        return Ok(false);
    };
    mailer
        .send(&notification)
        .await
        .context("failed to send report")?;
    debug!(
        "sent report with {} records to {}",
        records.len(),
        notification.to.join(", ")
    );
    Ok(true)
}
