//! # Dripline Channels
//! Provider-backed delivery gateways.
//!
//! - WhatsApp: Twilio or the WhatsApp Business Cloud API
//! - SMS: Twilio
//! - Email: SMTP via lettre

pub mod email;
pub mod twilio;
pub mod whatsapp;

use std::sync::Arc;
use std::time::Duration;

use dripline_core::config::{ChannelsConfig, WhatsAppProvider};
use dripline_core::error::Result;
use dripline_scheduler::Gateways;

pub use email::SmtpEmailGateway;
pub use twilio::TwilioGateway;
pub use whatsapp::WhatsAppCloudGateway;

/// Build the gateway set from config. Channels without configuration are
/// left out; sends over them fail at delivery time.
pub fn gateways_from_config(config: &ChannelsConfig) -> Result<Gateways> {
    let timeout = Duration::from_secs(config.http_timeout_secs.max(1));
    let mut gateways = Gateways::new();

    match config.whatsapp_provider {
        WhatsAppProvider::CloudApi => {
            if let Some(wa) = &config.whatsapp {
                gateways = gateways
                    .with_whatsapp(Arc::new(WhatsAppCloudGateway::new(wa.clone(), timeout)?));
            }
        }
        WhatsAppProvider::Twilio => {
            if let Some(tw) = &config.twilio {
                gateways =
                    gateways.with_whatsapp(Arc::new(TwilioGateway::whatsapp(tw.clone(), timeout)?));
            }
        }
    }

    if let Some(tw) = &config.twilio {
        if tw.sms_from.is_some() || tw.messaging_service_sid.is_some() {
            gateways = gateways.with_sms(Arc::new(TwilioGateway::sms(tw.clone(), timeout)?));
        }
    }

    if let Some(email) = config.email.as_ref().filter(|e| e.enabled) {
        gateways = gateways.with_email(Arc::new(SmtpEmailGateway::new(email, timeout)?));
    }

    let configured = gateways.describe();
    if configured.is_empty() {
        tracing::warn!("⚠️ No delivery channels configured; every send will fail");
    } else {
        tracing::info!("📡 Channels: {}", configured.join(", "));
    }
    Ok(gateways)
}
