use async_trait::async_trait;
use serde_json::json;
use std::time::Duration;

use crate::Error;

/// Outbound mail hand-off. The provider may be slow or rate-limited, so
/// callers wrap every send in a timeout and a bounded retry budget.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MailTransport: Send + Sync {
    /// Hand one message to the provider.
    ///
    /// Failures are classified by the implementation:
    /// `Error::PermanentSend` for rejected recipients (no retry),
    /// `Error::TransientSend` for anything worth another attempt.
    async fn send(&self, to: &str, subject: &str, html: &str) -> Result<(), Error>;
}

/// Mail provider client posting to a JSON send endpoint.
#[derive(Clone)]
pub struct HttpMailTransport {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
}

impl HttpMailTransport {
    pub fn new(endpoint: &str, api_key: &str, timeout: Duration) -> Result<Self, Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            endpoint: endpoint.to_string(),
            api_key: api_key.to_string(),
        })
    }
}

#[async_trait]
impl MailTransport for HttpMailTransport {
    async fn send(&self, to: &str, subject: &str, html: &str) -> Result<(), Error> {
        let resp = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&json!({
                "to": to,
                "subject": subject,
                "html": html,
            }))
            .send()
            .await
            .map_err(|e| {
                // connect/timeout errors are worth retrying
                Error::TransientSend(format!("mail provider unreachable: {e}"))
            })?;

        let status = resp.status();
        if status.is_success() {
            return Ok(());
        }
        let body = resp.text().await.unwrap_or_default();
        if status.is_client_error() {
            // 4xx: the provider rejected this recipient or payload outright
            Err(Error::PermanentSend(format!("{status}: {body}")))
        } else {
            Err(Error::TransientSend(format!("{status}: {body}")))
        }
    }
}
