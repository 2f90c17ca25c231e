//! Channel routing shared by the step executor and the campaign dispatcher.

use std::sync::Arc;

use dripline_core::error::{DriplineError, Result};
use dripline_core::traits::{EmailGateway, TextGateway};
use dripline_core::types::{ChannelKind, Contact, Template};

use crate::phone;
use crate::render::{self, TemplateVars};

/// Outcome of a delivery attempt that did not hit a provider error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    /// Handed to the provider. `to` is the address actually used.
    Sent { channel: ChannelKind, to: String },
    /// The contact has no usable address for the template's channel.
    MissingAddress(&'static str),
}

/// The configured delivery gateways, one per channel.
#[derive(Clone, Default)]
pub struct Gateways {
    whatsapp: Option<Arc<dyn TextGateway>>,
    sms: Option<Arc<dyn TextGateway>>,
    email: Option<Arc<dyn EmailGateway>>,
}

impl Gateways {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_whatsapp(mut self, gateway: Arc<dyn TextGateway>) -> Self {
        self.whatsapp = Some(gateway);
        self
    }

    pub fn with_sms(mut self, gateway: Arc<dyn TextGateway>) -> Self {
        self.sms = Some(gateway);
        self
    }

    pub fn with_email(mut self, gateway: Arc<dyn EmailGateway>) -> Self {
        self.email = Some(gateway);
        self
    }

    /// Names of the configured gateways, for startup logging.
    pub fn describe(&self) -> Vec<String> {
        let mut out = Vec::new();
        if let Some(g) = &self.whatsapp {
            out.push(format!("whatsapp={}", g.name()));
        }
        if let Some(g) = &self.sms {
            out.push(format!("sms={}", g.name()));
        }
        if let Some(g) = &self.email {
            out.push(format!("email={}", g.name()));
        }
        out
    }

    /// Render `template` for `contact` and send it over the template's
    /// channel.
    ///
    /// A missing address is reported as [`Delivery::MissingAddress`]; provider
    /// failures and unconfigured channels come back as `Err`.
    pub async fn deliver(&self, template: &Template, contact: &Contact) -> Result<Delivery> {
        let raw_phone = contact.preferred_phone();
        let phone = phone::normalized(raw_phone);
        // Placeholders show the number as stored in the CRM.
        let vars = TemplateVars::for_contact(contact.display_name(), raw_phone.unwrap_or(""));
        let body = render::render(&template.body_text, &vars);

        match template.channel {
            ChannelKind::Email => {
                let Some(to) = contact.email_address() else {
                    return Ok(Delivery::MissingAddress("no email"));
                };
                let gateway = self
                    .email
                    .as_ref()
                    .ok_or_else(|| DriplineError::Channel("email gateway not configured".into()))?;
                let html = match template.html() {
                    Some(html) => render::render(html, &vars),
                    None => render::text_to_html(&body, contact.name.as_deref()),
                };
                gateway
                    .send(to, template.email_subject(), &html, &body)
                    .await?;
                tracing::debug!("📧 Email '{}' sent to {}", template.name, to);
                Ok(Delivery::Sent {
                    channel: ChannelKind::Email,
                    to: to.to_string(),
                })
            }
            channel => {
                let Some(to) = phone else {
                    return Ok(Delivery::MissingAddress("no phone"));
                };
                let gateway = match channel {
                    ChannelKind::Sms => self.sms.as_ref(),
                    _ => self.whatsapp.as_ref(),
                }
                .ok_or_else(|| {
                    DriplineError::Channel(format!("{channel} gateway not configured"))
                })?;
                gateway.send(&to, &body).await?;
                tracing::debug!("📱 {} '{}' sent to {}", channel, template.name, to);
                Ok(Delivery::Sent { channel, to })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{RecordingEmail, RecordingText, contact, template};

    #[tokio::test]
    async fn test_whatsapp_sends_to_normalized_phone() {
        let wa = Arc::new(RecordingText::new("wa"));
        let gateways = Gateways::new().with_whatsapp(wa.clone());
        let tpl = template("t1", ChannelKind::WhatsApp, "Hola {{nombre}} ({{telefono}})");
        let c = contact("c1", "Ana", Some("987654321"), None);

        let result = gateways.deliver(&tpl, &c).await.unwrap();
        assert_eq!(
            result,
            Delivery::Sent {
                channel: ChannelKind::WhatsApp,
                to: "+51987654321".into()
            }
        );
        assert_eq!(
            wa.sent(),
            vec![("+51987654321".to_string(), "Hola Ana (987654321)".to_string())]
        );
    }

    #[tokio::test]
    async fn test_sms_routes_to_sms_gateway() {
        let wa = Arc::new(RecordingText::new("wa"));
        let sms = Arc::new(RecordingText::new("sms"));
        let gateways = Gateways::new().with_whatsapp(wa.clone()).with_sms(sms.clone());
        let tpl = template("t1", ChannelKind::Sms, "Promo");
        let c = contact("c1", "Ana", Some("51987654321"), None);

        gateways.deliver(&tpl, &c).await.unwrap();
        assert!(wa.sent().is_empty());
        assert_eq!(sms.sent().len(), 1);
    }

    #[tokio::test]
    async fn test_missing_addresses() {
        let gateways = Gateways::new()
            .with_whatsapp(Arc::new(RecordingText::new("wa")))
            .with_email(Arc::new(RecordingEmail::new()));
        let no_addr = contact("c1", "Ana", None, None);

        let wa_tpl = template("t1", ChannelKind::WhatsApp, "x");
        let email_tpl = template("t2", ChannelKind::Email, "x");
        assert_eq!(
            gateways.deliver(&wa_tpl, &no_addr).await.unwrap(),
            Delivery::MissingAddress("no phone")
        );
        assert_eq!(
            gateways.deliver(&email_tpl, &no_addr).await.unwrap(),
            Delivery::MissingAddress("no email")
        );
    }

    #[tokio::test]
    async fn test_email_falls_back_to_generated_html() {
        let email = Arc::new(RecordingEmail::new());
        let gateways = Gateways::new().with_email(email.clone());
        let mut tpl = template("t1", ChannelKind::Email, "Hola {{nombre}}");
        tpl.subject = None;
        let c = contact("c1", "Ana", None, Some("ana@example.com"));

        gateways.deliver(&tpl, &c).await.unwrap();
        let sent = email.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].to, "ana@example.com");
        assert_eq!(sent[0].subject, tpl.name);
        assert_eq!(sent[0].text, "Hola Ana");
        assert!(sent[0].html.contains("<!DOCTYPE html>"));
    }

    #[tokio::test]
    async fn test_unconfigured_channel_is_error() {
        let gateways = Gateways::new();
        let tpl = template("t1", ChannelKind::WhatsApp, "x");
        let c = contact("c1", "Ana", Some("987654321"), None);
        assert!(gateways.deliver(&tpl, &c).await.is_err());
    }
}
