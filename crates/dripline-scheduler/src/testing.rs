//! Test doubles and fixtures shared by the scheduler's unit tests.

use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Mutex;

use dripline_core::error::{DriplineError, Result};
use dripline_core::traits::{EmailGateway, TextGateway};
use dripline_core::types::{ChannelKind, Contact, Template};

use crate::persistence::SqliteStore;

/// Text gateway that records every send and fails for chosen numbers.
pub struct RecordingText {
    name: String,
    sent: Mutex<Vec<(String, String)>>,
    failing: Mutex<HashSet<String>>,
}

impl RecordingText {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            sent: Mutex::new(Vec::new()),
            failing: Mutex::new(HashSet::new()),
        }
    }

    pub fn fail_for(&self, to: &str) {
        self.failing.lock().unwrap().insert(to.to_string());
    }

    pub fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl TextGateway for RecordingText {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(&self, to: &str, body: &str) -> Result<()> {
        if self.failing.lock().unwrap().contains(to) {
            return Err(DriplineError::Channel(format!("provider rejected {to}")));
        }
        self.sent
            .lock()
            .unwrap()
            .push((to.to_string(), body.to_string()));
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct SentEmail {
    pub to: String,
    pub subject: String,
    pub html: String,
    pub text: String,
}

/// Email gateway that records every send.
pub struct RecordingEmail {
    sent: Mutex<Vec<SentEmail>>,
}

impl RecordingEmail {
    pub fn new() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
        }
    }

    pub fn sent(&self) -> Vec<SentEmail> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl EmailGateway for RecordingEmail {
    fn name(&self) -> &str {
        "recording"
    }

    async fn send(&self, to: &str, subject: &str, html: &str, text: &str) -> Result<()> {
        self.sent.lock().unwrap().push(SentEmail {
            to: to.to_string(),
            subject: subject.to_string(),
            html: html.to_string(),
            text: text.to_string(),
        });
        Ok(())
    }
}

pub fn contact(id: &str, name: &str, phone: Option<&str>, email: Option<&str>) -> Contact {
    Contact {
        id: id.to_string(),
        name: Some(name.to_string()),
        phone: phone.map(String::from),
        whatsapp_phone: None,
        email: email.map(String::from),
        whatsapp_opt_out: false,
    }
}

pub fn template(id: &str, channel: ChannelKind, body: &str) -> Template {
    Template {
        id: id.to_string(),
        name: format!("Plantilla {id}"),
        channel,
        body_text: body.to_string(),
        body_html: None,
        subject: Some("Novedades".into()),
    }
}

pub fn memory_store() -> SqliteStore {
    SqliteStore::open_in_memory().unwrap()
}
