//! Persisted data model: automations, executions, campaigns, templates and
//! the narrow slice of CRM contacts the engine reads.
//!
//! Enum string forms are the persisted tokens (`RUNNING`, `enviar_template`,
//! `pendiente`, ...) so rows written by other parts of the CRM deserialize
//! unchanged.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Delivery channel a template is bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelKind {
    #[serde(rename = "whatsapp")]
    WhatsApp,
    Sms,
    Email,
}

impl ChannelKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelKind::WhatsApp => "whatsapp",
            ChannelKind::Sms => "sms",
            ChannelKind::Email => "email",
        }
    }

    /// Parse a persisted token. Anything that is not email or sms is treated
    /// as WhatsApp, the CRM's default outbound channel.
    pub fn parse(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "email" => ChannelKind::Email,
            "sms" => ChannelKind::Sms,
            _ => ChannelKind::WhatsApp,
        }
    }

    /// WhatsApp and SMS are addressed by phone number.
    pub fn is_phone_based(&self) -> bool {
        !matches!(self, ChannelKind::Email)
    }
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─── Automations ──────────────────────────────────────────────

/// Type of an automation step. Unknown tokens are kept so they survive a
/// round-trip through the store and can be reported in the audit log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum StepKind {
    /// `enviar_template`: render a template and send it to the contact.
    SendTemplate,
    /// `esperar`: suspend the execution for `delay_minutos`.
    Wait,
    Other(String),
}

impl StepKind {
    pub fn as_str(&self) -> &str {
        match self {
            StepKind::SendTemplate => "enviar_template",
            StepKind::Wait => "esperar",
            StepKind::Other(s) => s.as_str(),
        }
    }
}

impl From<String> for StepKind {
    fn from(s: String) -> Self {
        match s.as_str() {
            "enviar_template" => StepKind::SendTemplate,
            "esperar" => StepKind::Wait,
            _ => StepKind::Other(s),
        }
    }
}

impl From<StepKind> for String {
    fn from(kind: StepKind) -> Self {
        kind.as_str().to_string()
    }
}

impl fmt::Display for StepKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One unit of automation work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    #[serde(rename = "tipo")]
    pub kind: StepKind,
    #[serde(default)]
    pub template_id: Option<String>,
    #[serde(default, rename = "delay_minutos")]
    pub delay_minutes: Option<u32>,
}

impl Step {
    pub fn send_template(template_id: &str, delay_minutes: u32) -> Self {
        Self {
            kind: StepKind::SendTemplate,
            template_id: Some(template_id.to_string()),
            delay_minutes: Some(delay_minutes),
        }
    }

    pub fn wait(delay_minutes: u32) -> Self {
        Self {
            kind: StepKind::Wait,
            template_id: None,
            delay_minutes: Some(delay_minutes),
        }
    }

    /// Configured delay, zero when absent.
    pub fn delay(&self) -> Duration {
        Duration::minutes(i64::from(self.delay_minutes.unwrap_or(0)))
    }
}

/// An automation: an ordered step sequence applied to a contact over time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutomationDefinition {
    pub id: String,
    #[serde(rename = "nombre")]
    pub name: String,
    #[serde(rename = "activo", default = "default_true")]
    pub active: bool,
    #[serde(rename = "acciones")]
    pub steps: Vec<Step>,
    #[serde(rename = "total_ejecutadas", default)]
    pub total_runs: u32,
    #[serde(rename = "total_completadas", default)]
    pub total_completed: u32,
}

fn default_true() -> bool {
    true
}

/// Run-state of an automation execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionState {
    Running,
    Completed,
    Failed,
}

impl ExecutionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionState::Running => "RUNNING",
            ExecutionState::Completed => "COMPLETED",
            ExecutionState::Failed => "FAILED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "RUNNING" => Some(ExecutionState::Running),
            "COMPLETED" => Some(ExecutionState::Completed),
            "FAILED" => Some(ExecutionState::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, ExecutionState::Running)
    }
}

/// Result of executing one step, as written to the audit log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StepOutcome {
    #[serde(rename = "ok")]
    Ok,
    #[serde(rename = "skip")]
    Skip,
    #[serde(rename = "error")]
    Error,
    #[serde(rename = "pendiente")]
    Pending,
}

impl StepOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepOutcome::Ok => "ok",
            StepOutcome::Skip => "skip",
            StepOutcome::Error => "error",
            StepOutcome::Pending => "pendiente",
        }
    }
}

/// Append-only audit entry for one executed step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepRecord {
    #[serde(rename = "tipo")]
    pub kind: StepKind,
    #[serde(rename = "resultado")]
    pub outcome: StepOutcome,
    #[serde(rename = "detalle", default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(rename = "ejecutado_at")]
    pub executed_at: DateTime<Utc>,
}

/// Per-contact run-state of an automation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutomationExecution {
    pub id: String,
    pub automation_id: String,
    #[serde(rename = "cliente_id")]
    pub contact_id: String,
    #[serde(rename = "estado")]
    pub state: ExecutionState,
    /// Index of the last executed step, -1 before the first one.
    #[serde(rename = "paso_actual")]
    pub current_step: i64,
    pub next_action_at: Option<DateTime<Utc>>,
    #[serde(rename = "pasos_ejecutados", default)]
    pub steps_log: Vec<StepRecord>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(rename = "error_mensaje")]
    pub error_message: Option<String>,
}

impl AutomationExecution {
    /// A fresh execution, due immediately.
    pub fn new(id: &str, automation_id: &str, contact_id: &str, now: DateTime<Utc>) -> Self {
        Self {
            id: id.to_string(),
            automation_id: automation_id.to_string(),
            contact_id: contact_id.to_string(),
            state: ExecutionState::Running,
            current_step: -1,
            next_action_at: Some(now),
            steps_log: Vec::new(),
            started_at: now,
            completed_at: None,
            error_message: None,
        }
    }

    /// Whether the poller should resume this execution at `now`.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.state == ExecutionState::Running && self.next_action_at.is_some_and(|at| at <= now)
    }

    /// Move to a terminal state. Terminal states never change again.
    pub fn finish(&mut self, state: ExecutionState, now: DateTime<Utc>) {
        if self.state.is_terminal() {
            return;
        }
        self.state = state;
        self.next_action_at = None;
        if state.is_terminal() {
            self.completed_at = Some(now);
        }
    }
}

// ─── Campaigns ────────────────────────────────────────────────

/// Lifecycle of a one-shot campaign. Transitions are one-directional.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CampaignState {
    Scheduled,
    Running,
    Completed,
    Cancelled,
}

impl CampaignState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CampaignState::Scheduled => "SCHEDULED",
            CampaignState::Running => "RUNNING",
            CampaignState::Completed => "COMPLETED",
            CampaignState::Cancelled => "CANCELLED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "SCHEDULED" => Some(CampaignState::Scheduled),
            "RUNNING" => Some(CampaignState::Running),
            "COMPLETED" => Some(CampaignState::Completed),
            "CANCELLED" => Some(CampaignState::Cancelled),
            _ => None,
        }
    }
}

/// Resolved audience of a campaign.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Audience {
    #[serde(rename = "contactos_ids", default)]
    pub contact_ids: Vec<String>,
    #[serde(rename = "contactos_count", default)]
    pub contact_count: u32,
}

impl Audience {
    pub fn new(contact_ids: Vec<String>) -> Self {
        let contact_count = contact_ids.len() as u32;
        Self {
            contact_ids,
            contact_count,
        }
    }
}

/// One-shot scheduled mass send.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Campaign {
    pub id: String,
    #[serde(rename = "nombre")]
    pub name: String,
    pub template_id: Option<String>,
    #[serde(rename = "audiencia", default)]
    pub audience: Audience,
    #[serde(rename = "estado")]
    pub state: CampaignState,
    #[serde(rename = "fecha_inicio")]
    pub starts_at: DateTime<Utc>,
    /// When the dispatcher claimed the campaign (SCHEDULED → RUNNING).
    #[serde(rename = "iniciado_at", default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(rename = "total_enviados", default)]
    pub total_sent: u32,
    #[serde(rename = "total_fallidos", default)]
    pub total_failed: u32,
    #[serde(rename = "completado_at", default)]
    pub completed_at: Option<DateTime<Utc>>,
}

impl Campaign {
    pub fn scheduled(
        id: &str,
        name: &str,
        template_id: &str,
        audience: Audience,
        starts_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            template_id: Some(template_id.to_string()),
            audience,
            state: CampaignState::Scheduled,
            starts_at,
            started_at: None,
            total_sent: 0,
            total_failed: 0,
            completed_at: None,
        }
    }
}

// ─── Templates & contacts ─────────────────────────────────────

/// Reusable message body bound to a channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Template {
    pub id: String,
    #[serde(rename = "nombre")]
    pub name: String,
    #[serde(rename = "canal_tipo")]
    pub channel: ChannelKind,
    #[serde(rename = "body_texto")]
    pub body_text: String,
    #[serde(default)]
    pub body_html: Option<String>,
    #[serde(default)]
    pub subject: Option<String>,
}

impl Template {
    /// Email subject, falling back to the template name.
    pub fn email_subject(&self) -> &str {
        match self.subject.as_deref() {
            Some(s) if !s.trim().is_empty() => s,
            _ => &self.name,
        }
    }

    /// Author-supplied HTML body, if any.
    pub fn html(&self) -> Option<&str> {
        self.body_html.as_deref().filter(|h| !h.trim().is_empty())
    }
}

/// The fields of a CRM client the engine needs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Contact {
    pub id: String,
    #[serde(rename = "nombre", default)]
    pub name: Option<String>,
    #[serde(rename = "telefono", default)]
    pub phone: Option<String>,
    #[serde(rename = "telefono_whatsapp", default)]
    pub whatsapp_phone: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub whatsapp_opt_out: bool,
}

impl Contact {
    /// WhatsApp number when present, else the plain phone.
    pub fn preferred_phone(&self) -> Option<&str> {
        non_empty(self.whatsapp_phone.as_deref()).or_else(|| non_empty(self.phone.as_deref()))
    }

    pub fn email_address(&self) -> Option<&str> {
        non_empty(self.email.as_deref())
    }

    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("")
    }
}

fn non_empty(s: Option<&str>) -> Option<&str> {
    s.map(str::trim).filter(|s| !s.is_empty())
}

// ─── Event log ────────────────────────────────────────────────

/// Outcome stored with a marketing event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventResult {
    Success,
    Error,
}

impl EventResult {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventResult::Success => "SUCCESS",
            EventResult::Error => "ERROR",
        }
    }
}

/// Audit entry for an outbound marketing action.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketingEvent {
    #[serde(rename = "evento_tipo")]
    pub event_type: String,
    pub payload: serde_json::Value,
    #[serde(rename = "resultado")]
    pub result: EventResult,
    #[serde(rename = "error_mensaje")]
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_kind_tokens() {
        let step: Step =
            serde_json::from_str(r#"{"tipo":"esperar","delay_minutos":30}"#).unwrap();
        assert_eq!(step.kind, StepKind::Wait);
        assert_eq!(step.delay(), Duration::minutes(30));

        let other: Step = serde_json::from_str(r#"{"tipo":"asignar_vendedor"}"#).unwrap();
        assert_eq!(other.kind, StepKind::Other("asignar_vendedor".into()));
        assert_eq!(other.delay(), Duration::zero());

        let json = serde_json::to_value(Step::send_template("tpl-1", 0)).unwrap();
        assert_eq!(json["tipo"], "enviar_template");
    }

    #[test]
    fn test_step_record_outcome_tokens() {
        let record = StepRecord {
            kind: StepKind::Wait,
            outcome: StepOutcome::Pending,
            detail: Some("30 minutos".into()),
            executed_at: Utc::now(),
        };
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["resultado"], "pendiente");
        assert_eq!(json["tipo"], "esperar");
    }

    #[test]
    fn test_execution_is_due() {
        let now = Utc::now();
        let mut exec = AutomationExecution::new("e1", "a1", "c1", now);
        assert!(exec.is_due(now));
        exec.next_action_at = Some(now + Duration::minutes(5));
        assert!(!exec.is_due(now));
        exec.next_action_at = None;
        assert!(!exec.is_due(now));
    }

    #[test]
    fn test_terminal_state_is_final() {
        let now = Utc::now();
        let mut exec = AutomationExecution::new("e1", "a1", "c1", now);
        exec.finish(ExecutionState::Failed, now);
        exec.finish(ExecutionState::Completed, now);
        assert_eq!(exec.state, ExecutionState::Failed);
        assert!(exec.next_action_at.is_none());
        assert_eq!(exec.completed_at, Some(now));
    }

    #[test]
    fn test_contact_preferred_phone() {
        let mut contact = Contact {
            id: "c1".into(),
            phone: Some("987654321".into()),
            whatsapp_phone: Some("  ".into()),
            ..Default::default()
        };
        assert_eq!(contact.preferred_phone(), Some("987654321"));
        contact.whatsapp_phone = Some("912345678".into());
        assert_eq!(contact.preferred_phone(), Some("912345678"));
    }

    #[test]
    fn test_template_subject_fallback() {
        let mut tpl = Template {
            id: "t1".into(),
            name: "Bienvenida".into(),
            channel: ChannelKind::Email,
            body_text: "Hola".into(),
            body_html: None,
            subject: Some("".into()),
        };
        assert_eq!(tpl.email_subject(), "Bienvenida");
        tpl.subject = Some("Hola!".into());
        assert_eq!(tpl.email_subject(), "Hola!");
    }

    #[test]
    fn test_channel_parse() {
        assert_eq!(ChannelKind::parse("email"), ChannelKind::Email);
        assert_eq!(ChannelKind::parse("SMS"), ChannelKind::Sms);
        assert_eq!(ChannelKind::parse("whatsapp"), ChannelKind::WhatsApp);
        assert!(!ChannelKind::Email.is_phone_based());
    }
}
