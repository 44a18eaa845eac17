use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutgoingEmail {
    pub to: String,
    pub subject: String,
    pub body: String,
}

/// Outbound email transport. Deliveries always go through the job queue so
/// a transport failure never fails the originating request.
#[async_trait]
pub trait Mailer: Send + Sync + 'static {
    async fn send(&self, email: &OutgoingEmail) -> Result<()>;
}

/// Posts messages to an HTTP delivery endpoint (transactional email
/// relay). When no endpoint is configured, deliveries are logged and
/// dropped, which keeps local development mail-free.
pub struct HttpMailer {
    client: Client,
    endpoint: Option<String>,
    from: String,
}

impl HttpMailer {
    pub fn new(endpoint: Option<String>, from: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            endpoint,
            from: from.into(),
        }
    }
}

#[derive(Serialize)]
struct DeliveryRequest<'a> {
    from: &'a str,
    to: &'a str,
    subject: &'a str,
    body: &'a str,
}

#[async_trait]
impl Mailer for HttpMailer {
    async fn send(&self, email: &OutgoingEmail) -> Result<()> {
        let Some(endpoint) = self.endpoint.as_deref() else {
            tracing::info!(to = %email.to, subject = %email.subject, "mail endpoint not configured, dropping email");
            return Ok(());
        };

        let response = self
            .client
            .post(endpoint)
            .json(&DeliveryRequest {
                from: &self.from,
                to: &email.to,
                subject: &email.subject,
                body: &email.body,
            })
            .send()
            .await
            .context("failed to reach mail delivery endpoint")?;

        response
            .error_for_status()
            .context("mail delivery endpoint rejected the message")?;
        Ok(())
    }
}
