use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

use keygate_identity::{ConfirmationCode, ConfirmationNotifier, NotifyError};

const DELIVERY_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Serialize)]
struct CodeDelivery<'a> {
    email: &'a str,
    code: u32,
}

/// POSTs `{"email", "code"}` as JSON to a relay (mailer, SMS gateway, ...).
///
/// Any non-2xx answer counts as a failed delivery.
#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>) -> Result<Self, NotifyError> {
        let client = reqwest::Client::builder()
            .timeout(DELIVERY_TIMEOUT)
            .build()
            .map_err(|e| NotifyError(format!("building http client: {e}")))?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl ConfirmationNotifier for WebhookNotifier {
    async fn send_code(&self, email: &str, code: ConfirmationCode) -> Result<(), NotifyError> {
        let response = self
            .client
            .post(&self.url)
            .json(&CodeDelivery {
                email,
                code: code.value(),
            })
            .send()
            .await
            .map_err(|e| NotifyError(format!("posting to relay: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(NotifyError(format!("relay answered {status}")));
        }

        tracing::info!(email = %email, "confirmation code handed to relay");
        Ok(())
    }
}
