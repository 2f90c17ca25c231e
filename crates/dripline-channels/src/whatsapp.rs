//! WhatsApp Business Cloud API gateway.
//!
//! Sends plain text messages through the Graph API. Requires an access token
//! and a Phone Number ID from Meta Business Suite.

use async_trait::async_trait;
use std::time::Duration;

use dripline_core::config::WhatsAppConfig;
use dripline_core::error::{DriplineError, Result};
use dripline_core::traits::TextGateway;

const GRAPH_BASE: &str = "https://graph.facebook.com";

/// WhatsApp gateway backed by the Cloud API.
pub struct WhatsAppCloudGateway {
    config: WhatsAppConfig,
    client: reqwest::Client,
}

impl WhatsAppCloudGateway {
    pub fn new(config: WhatsAppConfig, timeout: Duration) -> Result<Self> {
        if config.access_token.is_empty() {
            return Err(DriplineError::Config(
                "WhatsApp access_token not configured".into(),
            ));
        }
        if config.phone_number_id.is_empty() {
            return Err(DriplineError::Config(
                "WhatsApp phone_number_id not configured".into(),
            ));
        }
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| DriplineError::Config(format!("HTTP client: {e}")))?;
        Ok(Self { config, client })
    }

    fn messages_url(&self) -> String {
        let version = if self.config.api_version.is_empty() {
            "v21.0"
        } else {
            self.config.api_version.as_str()
        };
        format!(
            "{GRAPH_BASE}/{version}/{}/messages",
            self.config.phone_number_id
        )
    }
}

/// Request body for a text message. The API wants the number without `+`.
fn text_message(to: &str, body: &str) -> serde_json::Value {
    serde_json::json!({
        "messaging_product": "whatsapp",
        "recipient_type": "individual",
        "to": to.trim_start_matches('+'),
        "type": "text",
        "text": {
            "preview_url": false,
            "body": body
        }
    })
}

#[async_trait]
impl TextGateway for WhatsAppCloudGateway {
    fn name(&self) -> &str {
        "whatsapp-cloud"
    }

    async fn send(&self, to: &str, body: &str) -> Result<()> {
        let response = self
            .client
            .post(self.messages_url())
            .bearer_auth(&self.config.access_token)
            .json(&text_message(to, body))
            .send()
            .await
            .map_err(|e| DriplineError::Channel(format!("WhatsApp API request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(DriplineError::Channel(format!(
                "WhatsApp API error {status}: {error_text}"
            )));
        }

        let result: serde_json::Value = response
            .json()
            .await
            .map_err(|e| DriplineError::Channel(format!("Invalid WhatsApp response: {e}")))?;
        let msg_id = result["messages"][0]["id"].as_str().unwrap_or("unknown");

        tracing::debug!("WhatsApp message sent: {msg_id} → {to}");
        Ok(())
    }
}
