//! Twilio Messages API gateway for WhatsApp and SMS.

use async_trait::async_trait;
use std::time::Duration;

use dripline_core::config::TwilioConfig;
use dripline_core::error::{DriplineError, Result};
use dripline_core::traits::TextGateway;

const TWILIO_API: &str = "https://api.twilio.com/2010-04-01";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Route {
    WhatsApp,
    Sms,
}

/// One Twilio account bound to one route (WhatsApp or SMS).
pub struct TwilioGateway {
    config: TwilioConfig,
    route: Route,
    /// `From` parameter; `None` means the messaging service picks the sender.
    from: Option<String>,
    client: reqwest::Client,
}

impl TwilioGateway {
    pub fn whatsapp(config: TwilioConfig, timeout: Duration) -> Result<Self> {
        let from = Some(config.whatsapp_from.trim())
            .filter(|f| !f.is_empty())
            .map(|f| whatsapp_address(f));
        Self::build(config, Route::WhatsApp, from, timeout)
    }

    pub fn sms(config: TwilioConfig, timeout: Duration) -> Result<Self> {
        let from = config
            .sms_from
            .as_deref()
            .map(str::trim)
            .filter(|f| !f.is_empty())
            .map(String::from);
        Self::build(config, Route::Sms, from, timeout)
    }

    fn build(
        config: TwilioConfig,
        route: Route,
        from: Option<String>,
        timeout: Duration,
    ) -> Result<Self> {
        if config.account_sid.is_empty() || config.auth_token.is_empty() {
            return Err(DriplineError::Config(
                "Twilio account_sid/auth_token not configured".into(),
            ));
        }
        if from.is_none() && config.messaging_service_sid.is_none() {
            return Err(DriplineError::Config(format!(
                "Twilio {route:?} sender not configured (set a from number or messaging_service_sid)"
            )));
        }
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| DriplineError::Config(format!("HTTP client: {e}")))?;
        Ok(Self {
            config,
            route,
            from,
            client,
        })
    }

    fn messages_url(&self) -> String {
        format!(
            "{TWILIO_API}/Accounts/{}/Messages.json",
            self.config.account_sid
        )
    }

    fn form_params(&self, to: &str, body: &str) -> Vec<(&'static str, String)> {
        let to = match self.route {
            Route::WhatsApp => whatsapp_address(to),
            Route::Sms => to.to_string(),
        };
        let mut params = vec![("To", to), ("Body", body.to_string())];
        match (&self.from, &self.config.messaging_service_sid) {
            (Some(from), _) => params.push(("From", from.clone())),
            (None, Some(sid)) => params.push(("MessagingServiceSid", sid.clone())),
            (None, None) => {}
        }
        params
    }
}

fn whatsapp_address(number: &str) -> String {
    if number.starts_with("whatsapp:") {
        number.to_string()
    } else {
        format!("whatsapp:{number}")
    }
}

#[async_trait]
impl TextGateway for TwilioGateway {
    fn name(&self) -> &str {
        match self.route {
            Route::WhatsApp => "twilio-whatsapp",
            Route::Sms => "twilio-sms",
        }
    }

    async fn send(&self, to: &str, body: &str) -> Result<()> {
        let response = self
            .client
            .post(self.messages_url())
            .basic_auth(&self.config.account_sid, Some(&self.config.auth_token))
            .form(&self.form_params(to, body))
            .send()
            .await
            .map_err(|e| DriplineError::Channel(format!("Twilio request failed: {e}")))?;

        let status = response.status();
        let result: serde_json::Value = response.json().await.unwrap_or_default();
        if !status.is_success() {
            let message = result["message"].as_str().unwrap_or("unknown error");
            return Err(DriplineError::Channel(format!(
                "Twilio error {status}: {message}"
            )));
        }

        tracing::debug!(
            "Twilio {} sent: {} → {to}",
            self.name(),
            result["sid"].as_str().unwrap_or("unknown")
        );
        Ok(())
    }
}
