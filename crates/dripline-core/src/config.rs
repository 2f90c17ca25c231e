//! Dripline configuration system.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{DriplineError, Result};

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DriplineConfig {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub poller: PollerConfig,
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub channels: ChannelsConfig,
}

impl DriplineConfig {
    /// Load config from the default path (~/.dripline/config.toml).
    pub fn load() -> Result<Self> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load config from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| DriplineError::Config(format!("Failed to read config: {e}")))?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| DriplineError::Config(format!("Failed to parse config: {e}")))?;
        Ok(config)
    }

    /// Get the default config path.
    pub fn default_path() -> PathBuf {
        Self::home_dir().join("config.toml")
    }

    /// Get the Dripline home directory.
    pub fn home_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".dripline")
    }

    /// Overlay secrets from the process environment.
    pub fn apply_env(&mut self) {
        self.apply_env_with(|key| std::env::var(key).ok());
    }

    /// Overlay secrets using `lookup` for each known variable. Empty values
    /// are ignored.
    pub fn apply_env_with<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(secret) = get("CRON_SECRET") {
            self.gateway.cron_secret = Some(secret);
        }
        if let Some(path) = get("DRIPLINE_DATABASE") {
            self.database.path = path;
        }
        if let Some(token) = get("WHATSAPP_ACCESS_TOKEN") {
            self.channels.whatsapp.get_or_insert_with(Default::default).access_token = token;
        }
        if let Some(sid) = get("TWILIO_ACCOUNT_SID") {
            self.channels.twilio.get_or_insert_with(Default::default).account_sid = sid;
        }
        if let Some(token) = get("TWILIO_AUTH_TOKEN") {
            self.channels.twilio.get_or_insert_with(Default::default).auth_token = token;
        }
        if let Some(password) = get("SMTP_PASSWORD") {
            self.channels.email.get_or_insert_with(Default::default).password = password;
        }
    }
}

fn bool_true() -> bool { true }

/// SQLite store location.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

fn default_db_path() -> String { "~/.dripline/marketing.db".into() }

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self { path: default_db_path() }
    }
}

/// What to do after a non-final send step that has no delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ZeroDelayPolicy {
    /// Leave the execution RUNNING with no due time. It will not be picked
    /// up again by the poller.
    #[default]
    Stall,
    /// Make the execution due immediately so the next tick runs the
    /// following step.
    ResumeNextTick,
}

/// Poll cycle limits and pacing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollerConfig {
    /// Seconds between ticks when running the built-in loop.
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    #[serde(default = "default_automation_batch")]
    pub automation_batch: usize,
    #[serde(default = "default_campaign_batch")]
    pub campaign_batch: usize,
    /// Pause between consecutive campaign sends.
    #[serde(default = "default_send_pacing_ms")]
    pub send_pacing_ms: u64,
    #[serde(default)]
    pub zero_delay_policy: ZeroDelayPolicy,
    /// RUNNING campaigns older than this are reported as stuck.
    #[serde(default = "default_stuck_campaign_minutes")]
    pub stuck_campaign_minutes: i64,
}

fn default_interval_secs() -> u64 { 60 }
fn default_automation_batch() -> usize { 50 }
fn default_campaign_batch() -> usize { 5 }
fn default_send_pacing_ms() -> u64 { 100 }
fn default_stuck_campaign_minutes() -> i64 { 60 }

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            automation_batch: default_automation_batch(),
            campaign_batch: default_campaign_batch(),
            send_pacing_ms: default_send_pacing_ms(),
            zero_delay_policy: ZeroDelayPolicy::default(),
            stuck_campaign_minutes: default_stuck_campaign_minutes(),
        }
    }
}

/// HTTP trigger configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_host")]
    pub host: String,
    /// Shared secret expected as `Authorization: Bearer <secret>`.
    /// `None` disables the check (local development only).
    #[serde(default)]
    pub cron_secret: Option<String>,
}

fn default_port() -> u16 { 3000 }
fn default_host() -> String { "127.0.0.1".into() }

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            host: default_host(),
            cron_secret: None,
        }
    }
}

/// Which provider carries WhatsApp traffic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WhatsAppProvider {
    #[default]
    Twilio,
    CloudApi,
}

/// Delivery channel configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelsConfig {
    #[serde(default)]
    pub whatsapp_provider: WhatsAppProvider,
    #[serde(default)]
    pub whatsapp: Option<WhatsAppConfig>,
    #[serde(default)]
    pub twilio: Option<TwilioConfig>,
    #[serde(default)]
    pub email: Option<EmailConfig>,
    /// Per-request timeout for provider HTTP calls.
    #[serde(default = "default_http_timeout_secs")]
    pub http_timeout_secs: u64,
}

fn default_http_timeout_secs() -> u64 { 15 }

impl Default for ChannelsConfig {
    fn default() -> Self {
        Self {
            whatsapp_provider: WhatsAppProvider::default(),
            whatsapp: None,
            twilio: None,
            email: None,
            http_timeout_secs: default_http_timeout_secs(),
        }
    }
}

/// WhatsApp Business Cloud API credentials.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WhatsAppConfig {
    #[serde(default)]
    pub access_token: String,
    #[serde(default)]
    pub phone_number_id: String,
    #[serde(default = "default_graph_version")]
    pub api_version: String,
}

fn default_graph_version() -> String { "v21.0".into() }

/// Twilio Messages API credentials (WhatsApp and SMS).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TwilioConfig {
    #[serde(default)]
    pub account_sid: String,
    #[serde(default)]
    pub auth_token: String,
    /// Sender for WhatsApp, e.g. `whatsapp:+14155238886`.
    #[serde(default)]
    pub whatsapp_from: String,
    #[serde(default)]
    pub sms_from: Option<String>,
    #[serde(default)]
    pub messaging_service_sid: Option<String>,
}

/// SMTP sender configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailConfig {
    #[serde(default = "bool_true")]
    pub enabled: bool,
    #[serde(default)]
    pub smtp_host: String,
    #[serde(default = "default_smtp_port")]
    pub smtp_port: u16,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub from_address: String,
    #[serde(default)]
    pub from_name: Option<String>,
    #[serde(default)]
    pub reply_to: Option<String>,
}

fn default_smtp_port() -> u16 { 587 }

impl Default for EmailConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            smtp_host: String::new(),
            smtp_port: default_smtp_port(),
            username: String::new(),
            password: String::new(),
            from_address: String::new(),
            from_name: None,
            reply_to: None,
        }
    }
}
