//! Collaborator seams: the persistence store and the delivery gateways.
//!
//! The engine only talks to these traits. `dripline-scheduler` ships a SQLite
//! store and `dripline-channels` ships provider-backed gateways.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::types::{
    AutomationDefinition, AutomationExecution, Campaign, Contact, MarketingEvent, Template,
};

/// Read/update access to the marketing rows the engine drives.
///
/// Implementations are synchronous; callers never hold a store borrow across
/// an `.await`.
pub trait MarketingStore: Send + Sync {
    /// RUNNING executions with a non-null `next_action_at <= now`.
    fn due_executions(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<AutomationExecution>>;

    /// SCHEDULED campaigns whose `fecha_inicio <= now`.
    fn due_campaigns(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<Campaign>>;

    /// RUNNING campaigns claimed before `started_before`.
    fn stuck_campaigns(&self, started_before: DateTime<Utc>) -> Result<Vec<Campaign>>;

    fn automation(&self, id: &str) -> Result<Option<AutomationDefinition>>;

    fn template(&self, id: &str) -> Result<Option<Template>>;

    fn contact(&self, id: &str) -> Result<Option<Contact>>;

    /// Contacts for the given ids. Unknown ids are skipped.
    fn contacts(&self, ids: &[String]) -> Result<Vec<Contact>>;

    /// Overwrite the run-state of an execution.
    fn save_execution(&self, execution: &AutomationExecution) -> Result<()>;

    /// Bump the automation's run counters after an execution terminates.
    fn record_automation_outcome(&self, automation_id: &str, completed: bool) -> Result<()>;

    /// Conditionally move a campaign from SCHEDULED to RUNNING.
    /// Returns `false` when the row was no longer SCHEDULED.
    fn claim_campaign(&self, id: &str, now: DateTime<Utc>) -> Result<bool>;

    /// Overwrite state, counters and timestamps of a campaign.
    fn save_campaign(&self, campaign: &Campaign) -> Result<()>;

    fn log_event(&self, event: &MarketingEvent) -> Result<()>;
}

/// Phone-addressed delivery (WhatsApp or SMS).
#[async_trait]
pub trait TextGateway: Send + Sync {
    fn name(&self) -> &str;

    /// Send `body` to an already normalized phone number (`+51...`).
    async fn send(&self, to: &str, body: &str) -> Result<()>;
}

/// Email delivery.
#[async_trait]
pub trait EmailGateway: Send + Sync {
    fn name(&self) -> &str;

    async fn send(&self, to: &str, subject: &str, html: &str, text: &str) -> Result<()>;
}
