use std::time::Duration;

use anyhow::{Context, Result};
use mail_builder::MessageBuilder;
use mail_send::SmtpClientBuilder;
use serde::{Deserialize, Serialize};

use super::{MailTransport, Notification};

/// How the connection to the relay is secured.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SmtpSecurity {
    /// Plain SMTP, as spoken by a local relay on port 25.
    #[default]
    None,
    StartTls,
    /// TLS from the first byte, usually port 465.
    Tls,
}

/// Delivers notifications through an SMTP relay.
#[derive(Debug, Clone, bon::Builder)]
#[builder(on(String, into))]
pub struct SmtpMailer {
    host: String,
    #[builder(default = 25)]
    port: u16,
    #[builder(default)]
    security: SmtpSecurity,
    username: Option<String>,
    password: Option<String>,
    #[builder(default = Duration::from_secs(30))]
    timeout: Duration,
}

impl MailTransport for SmtpMailer {
    async fn send(&self, notification: &Notification) -> Result<()> {
        let message = MessageBuilder::new()
            .from(notification.from.as_str())
            .to(notification
                .to
                .iter()
                .map(String::as_str)
                .collect::<Vec<_>>())
            .subject(notification.subject.as_str())
            .text_body(notification.body.as_str());

        let mut client = SmtpClientBuilder::new(self.host.as_str(), self.port)
            .implicit_tls(self.security == SmtpSecurity::Tls)
            .timeout(self.timeout);
        if let (Some(user), Some(pass)) = (&self.username, &self.password) {
            client = client.credentials((user.as_str(), pass.as_str()));
        }
        let relay = format!("{}:{}", self.host, self.port);
        match self.security {
            SmtpSecurity::None => {
                client
                    .connect_plain()
                    .await
                    .with_context(|| format!("failed to connect to {relay}"))?
                    .send(message)
                    .await
                    .context("failed to send email")?;
            }
            SmtpSecurity::StartTls | SmtpSecurity::Tls => {
                client
                    .connect()
                    .await
                    .with_context(|| format!("failed to connect to {relay}"))?
                    .send(message)
                    .await
                    .context("failed to send email")?;
            }
        }
        Ok(())
    }
}
