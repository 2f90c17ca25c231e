//! Automation step executor: advances one execution by exactly one step.
//!
//! A resume either terminates the execution or leaves it RUNNING with a
//! persisted `next_action_at`, which is how waits survive restarts. Provider
//! failures are recorded on the step and never returned to the caller; only
//! store failures come back as `Err`.

use chrono::{DateTime, Utc};
use std::sync::Arc;

use dripline_core::config::ZeroDelayPolicy;
use dripline_core::error::{DriplineError, Result};
use dripline_core::traits::MarketingStore;
use dripline_core::types::{
    AutomationExecution, ChannelKind, Contact, EventResult, ExecutionState, MarketingEvent, Step,
    StepKind, StepOutcome, StepRecord, Template,
};

use crate::compliance;
use crate::delivery::{Delivery, Gateways};

const EVENT_SENT: &str = "automatizacion.template_enviado";
const EVENT_FAILED: &str = "automatizacion.template_error";

/// Resumes due automation executions.
pub struct StepExecutor {
    store: Arc<dyn MarketingStore>,
    gateways: Arc<Gateways>,
    zero_delay: ZeroDelayPolicy,
}

impl StepExecutor {
    pub fn new(
        store: Arc<dyn MarketingStore>,
        gateways: Arc<Gateways>,
        zero_delay: ZeroDelayPolicy,
    ) -> Self {
        Self {
            store,
            gateways,
            zero_delay,
        }
    }

    /// Run the next step of `exec` and persist the resulting state.
    ///
    /// An execution that is terminal, stalled or not yet due is returned
    /// untouched.
    pub async fn resume(
        &self,
        mut exec: AutomationExecution,
        now: DateTime<Utc>,
    ) -> Result<AutomationExecution> {
        if !exec.is_due(now) {
            tracing::debug!(
                "Execution {} not due ({}), left as is",
                exec.id,
                exec.state.as_str()
            );
            return Ok(exec);
        }

        let Some(automation) = self.store.automation(&exec.automation_id)? else {
            let err = DriplineError::not_found("automation", exec.automation_id.as_str());
            tracing::warn!("⚠️ Execution {}: {err}", exec.id);
            exec.error_message = Some(err.to_string());
            exec.finish(ExecutionState::Failed, now);
            self.store.save_execution(&exec)?;
            return Ok(exec);
        };

        let index = usize::try_from(exec.current_step + 1).unwrap_or(0);
        let Some(step) = automation.steps.get(index) else {
            exec.finish(ExecutionState::Completed, now);
            self.persist_terminal(&exec)?;
            tracing::info!("✅ Execution {} completed ({})", exec.id, automation.name);
            return Ok(exec);
        };
        let is_last = index + 1 == automation.steps.len();

        let template = match (&step.kind, step.template_id.as_deref()) {
            (StepKind::SendTemplate, Some(id)) => self.store.template(id)?,
            _ => None,
        };
        let contact = match self.store.contact(&exec.contact_id)? {
            Some(contact) => contact,
            None => {
                tracing::warn!(
                    "⚠️ Execution {}: contact {} not found",
                    exec.id,
                    exec.contact_id
                );
                Contact {
                    id: exec.contact_id.clone(),
                    ..Default::default()
                }
            }
        };

        // Compliance comes first: nothing is persisted for the step itself.
        let channel = template.as_ref().map_or(ChannelKind::WhatsApp, |t| t.channel);
        if compliance::is_blocked(&contact, channel) {
            tracing::info!(
                "🚫 Execution {}: contact {} opted out of {channel}",
                exec.id,
                contact.id
            );
            exec.error_message = Some("opt-out".into());
            exec.finish(ExecutionState::Completed, now);
            self.persist_terminal(&exec)?;
            return Ok(exec);
        }

        // Consume the due trigger before doing any external work.
        exec.current_step = index as i64;
        exec.next_action_at = None;
        self.store.save_execution(&exec)?;

        let (outcome, detail) = match &step.kind {
            StepKind::SendTemplate => {
                self.send_step(&exec, step, template.as_ref(), &contact, now)
                    .await
            }
            StepKind::Wait => (
                StepOutcome::Pending,
                Some(format!("{} minutos", step.delay_minutes.unwrap_or(0))),
            ),
            StepKind::Other(kind) => {
                tracing::debug!("Execution {}: unsupported step '{kind}' skipped", exec.id);
                (StepOutcome::Skip, None)
            }
        };

        let next_action_at = match step.kind {
            StepKind::Wait => Some(now + step.delay()),
            StepKind::SendTemplate if step.delay_minutes.unwrap_or(0) > 0 => {
                Some(now + step.delay())
            }
            _ => None,
        };

        exec.steps_log.push(StepRecord {
            kind: step.kind.clone(),
            outcome,
            detail: detail.clone(),
            executed_at: now,
        });

        if outcome == StepOutcome::Error {
            exec.error_message = detail;
            exec.finish(ExecutionState::Failed, now);
        } else if next_action_at.is_some() {
            exec.next_action_at = next_action_at;
        } else if is_last {
            exec.finish(ExecutionState::Completed, now);
        } else {
            match self.zero_delay {
                ZeroDelayPolicy::Stall => tracing::warn!(
                    "⚠️ Execution {} stalled at step {index}: no delay after '{}', it will not be polled again",
                    exec.id,
                    step.kind
                ),
                ZeroDelayPolicy::ResumeNextTick => exec.next_action_at = Some(now),
            }
        }

        if exec.state.is_terminal() {
            self.persist_terminal(&exec)?;
        } else {
            self.store.save_execution(&exec)?;
        }
        tracing::debug!(
            "Execution {} step {index} ({}) → {} [{}]",
            exec.id,
            step.kind,
            outcome.as_str(),
            exec.state.as_str()
        );
        Ok(exec)
    }

    async fn send_step(
        &self,
        exec: &AutomationExecution,
        step: &Step,
        template: Option<&Template>,
        contact: &Contact,
        now: DateTime<Utc>,
    ) -> (StepOutcome, Option<String>) {
        let Some(template) = template else {
            let detail = match &step.template_id {
                Some(id) => DriplineError::not_found("template", id.as_str()).to_string(),
                None => "step has no template_id".to_string(),
            };
            tracing::warn!("⚠️ Execution {}: {detail}", exec.id);
            return (StepOutcome::Error, Some(detail));
        };

        match self.gateways.deliver(template, contact).await {
            Ok(Delivery::Sent { channel, to }) => {
                self.record_event(exec, template, &to, EventResult::Success, None, now);
                (StepOutcome::Ok, Some(format!("{channel}:{to}")))
            }
            Ok(Delivery::MissingAddress(reason)) => {
                tracing::info!("Execution {}: skipped send, {reason}", exec.id);
                (StepOutcome::Skip, Some(reason.to_string()))
            }
            Err(e) => {
                let to = match template.channel {
                    ChannelKind::Email => contact.email_address(),
                    _ => contact.preferred_phone(),
                }
                .unwrap_or_default()
                .to_string();
                tracing::warn!("⚠️ Execution {}: send of '{}' failed: {e}", exec.id, template.name);
                let error = Some(e.to_string());
                self.record_event(exec, template, &to, EventResult::Error, error, now);
                (StepOutcome::Error, Some(e.to_string()))
            }
        }
    }

    fn record_event(
        &self,
        exec: &AutomationExecution,
        template: &Template,
        to: &str,
        result: EventResult,
        error_message: Option<String>,
        now: DateTime<Utc>,
    ) {
        let event = MarketingEvent {
            event_type: match result {
                EventResult::Success => EVENT_SENT,
                EventResult::Error => EVENT_FAILED,
            }
            .to_string(),
            payload: serde_json::json!({
                "automatizacion_id": exec.automation_id,
                "ejecucion_id": exec.id,
                "template_id": template.id,
                "cliente_id": exec.contact_id,
                "canal": template.channel.as_str(),
                "destino": to,
            }),
            result,
            error_message,
            created_at: now,
        };
        if let Err(e) = self.store.log_event(&event) {
            tracing::warn!("⚠️ Failed to log marketing event: {e}");
        }
    }

    /// Save a terminal execution and bump the automation counters.
    fn persist_terminal(&self, exec: &AutomationExecution) -> Result<()> {
        self.store.save_execution(exec)?;
        let completed = exec.state == ExecutionState::Completed;
        if let Err(e) = self
            .store
            .record_automation_outcome(&exec.automation_id, completed)
        {
            tracing::warn!(
                "⚠️ Failed to update counters of automation {}: {e}",
                exec.automation_id
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::SqliteStore;
    use crate::testing::{RecordingText, contact, memory_store, template};
    use chrono::Duration;
    use dripline_core::types::AutomationDefinition;

    struct Fixture {
        store: Arc<SqliteStore>,
        wa: Arc<RecordingText>,
        now: DateTime<Utc>,
    }

    impl Fixture {
        fn new(steps: Vec<Step>) -> Self {
            let store = Arc::new(memory_store());
            store
                .upsert_automation(&AutomationDefinition {
                    id: "a1".into(),
                    name: "Bienvenida".into(),
                    active: true,
                    steps,
                    total_runs: 0,
                    total_completed: 0,
                })
                .unwrap();
            store
                .upsert_template(&template("t1", ChannelKind::WhatsApp, "Hola {{nombre}}"))
                .unwrap();
            store
                .upsert_contact(&contact("c1", "Ana", Some("987654321"), None))
                .unwrap();
            Self {
                store,
                wa: Arc::new(RecordingText::new("wa")),
                now: Utc::now(),
            }
        }

        fn executor(&self, policy: ZeroDelayPolicy) -> StepExecutor {
            let gateways = Gateways::new().with_whatsapp(self.wa.clone());
            StepExecutor::new(self.store.clone(), Arc::new(gateways), policy)
        }

        fn execution(&self) -> AutomationExecution {
            let exec = AutomationExecution::new("e1", "a1", "c1", self.now);
            self.store.save_execution(&exec).unwrap();
            exec
        }
    }

    #[tokio::test]
    async fn test_wait_step_schedules_resume() {
        let fx = Fixture::new(vec![Step::wait(30), Step::send_template("t1", 0)]);
        let exec = fx
            .executor(ZeroDelayPolicy::Stall)
            .resume(fx.execution(), fx.now)
            .await
            .unwrap();

        assert_eq!(exec.state, ExecutionState::Running);
        assert_eq!(exec.current_step, 0);
        assert_eq!(exec.next_action_at, Some(fx.now + Duration::minutes(30)));
        assert_eq!(exec.steps_log[0].outcome, StepOutcome::Pending);
        assert_eq!(exec.steps_log[0].detail.as_deref(), Some("30 minutos"));
        assert!(fx.wa.sent().is_empty());

        let stored = fx.store.execution("e1").unwrap().unwrap();
        assert_eq!(stored.next_action_at, exec.next_action_at);
    }

    #[tokio::test]
    async fn test_final_send_completes() {
        let fx = Fixture::new(vec![Step::send_template("t1", 0)]);
        let exec = fx
            .executor(ZeroDelayPolicy::Stall)
            .resume(fx.execution(), fx.now)
            .await
            .unwrap();

        assert_eq!(exec.state, ExecutionState::Completed);
        assert_eq!(exec.completed_at, Some(fx.now));
        assert!(exec.next_action_at.is_none());
        assert_eq!(fx.wa.sent(), vec![("+51987654321".into(), "Hola Ana".into())]);

        let events = fx.store.recent_events(10).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, EVENT_SENT);
        assert_eq!(events[0].payload["destino"], "+51987654321");

        let automation = fx.store.automation("a1").unwrap().unwrap();
        assert_eq!(automation.total_runs, 1);
        assert_eq!(automation.total_completed, 1);
    }

    #[tokio::test]
    async fn test_send_with_delay_stays_running() {
        let fx = Fixture::new(vec![Step::send_template("t1", 15), Step::wait(5)]);
        let exec = fx
            .executor(ZeroDelayPolicy::Stall)
            .resume(fx.execution(), fx.now)
            .await
            .unwrap();
        assert_eq!(exec.state, ExecutionState::Running);
        assert_eq!(exec.next_action_at, Some(fx.now + Duration::minutes(15)));
        assert_eq!(fx.wa.sent().len(), 1);
    }

    #[tokio::test]
    async fn test_zero_delay_send_stalls_by_default() {
        let fx = Fixture::new(vec![Step::send_template("t1", 0), Step::wait(10)]);
        let exec = fx
            .executor(ZeroDelayPolicy::Stall)
            .resume(fx.execution(), fx.now)
            .await
            .unwrap();

        assert_eq!(exec.state, ExecutionState::Running);
        assert!(exec.next_action_at.is_none());
        assert!(exec.completed_at.is_none());
        // Never picked up again.
        let later = fx.now + Duration::days(30);
        assert!(fx.store.due_executions(later, 50).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_zero_delay_send_resumes_next_tick() {
        let fx = Fixture::new(vec![Step::send_template("t1", 0), Step::wait(10)]);
        let executor = fx.executor(ZeroDelayPolicy::ResumeNextTick);
        let exec = executor.resume(fx.execution(), fx.now).await.unwrap();

        assert_eq!(exec.state, ExecutionState::Running);
        assert_eq!(exec.next_action_at, Some(fx.now));
        let due = fx.store.due_executions(fx.now, 50).unwrap();
        assert_eq!(due.len(), 1);

        let exec = executor.resume(due[0].clone(), fx.now).await.unwrap();
        assert_eq!(exec.current_step, 1);
        assert_eq!(exec.next_action_at, Some(fx.now + Duration::minutes(10)));
    }

    #[tokio::test]
    async fn test_opt_out_completes_without_sending() {
        let fx = Fixture::new(vec![Step::send_template("t1", 0)]);
        let mut c = contact("c1", "Ana", Some("987654321"), None);
        c.whatsapp_opt_out = true;
        fx.store.upsert_contact(&c).unwrap();

        let exec = fx
            .executor(ZeroDelayPolicy::Stall)
            .resume(fx.execution(), fx.now)
            .await
            .unwrap();

        assert_eq!(exec.state, ExecutionState::Completed);
        assert_eq!(exec.error_message.as_deref(), Some("opt-out"));
        assert_eq!(exec.current_step, -1);
        assert!(exec.steps_log.is_empty());
        assert!(fx.wa.sent().is_empty());
    }

    #[tokio::test]
    async fn test_opt_out_does_not_gate_email() {
        let fx = Fixture::new(vec![Step::send_template("t2", 0)]);
        fx.store
            .upsert_template(&template("t2", ChannelKind::Email, "Hola"))
            .unwrap();
        let mut c = contact("c1", "Ana", None, Some("ana@example.com"));
        c.whatsapp_opt_out = true;
        fx.store.upsert_contact(&c).unwrap();

        let email = Arc::new(crate::testing::RecordingEmail::new());
        let gateways = Gateways::new().with_email(email.clone());
        let executor =
            StepExecutor::new(fx.store.clone(), Arc::new(gateways), ZeroDelayPolicy::Stall);
        let exec = executor.resume(fx.execution(), fx.now).await.unwrap();

        assert_eq!(exec.state, ExecutionState::Completed);
        assert!(exec.error_message.is_none());
        assert_eq!(email.sent().len(), 1);
    }

    #[tokio::test]
    async fn test_gateway_failure_fails_execution() {
        let fx = Fixture::new(vec![Step::send_template("t1", 0), Step::wait(5)]);
        fx.wa.fail_for("+51987654321");
        let exec = fx
            .executor(ZeroDelayPolicy::Stall)
            .resume(fx.execution(), fx.now)
            .await
            .unwrap();

        assert_eq!(exec.state, ExecutionState::Failed);
        assert!(exec.error_message.unwrap().contains("provider rejected"));
        assert_eq!(exec.steps_log[0].outcome, StepOutcome::Error);

        let events = fx.store.recent_events(10).unwrap();
        assert_eq!(events[0].event_type, EVENT_FAILED);
        assert_eq!(events[0].result, EventResult::Error);

        let automation = fx.store.automation("a1").unwrap().unwrap();
        assert_eq!(automation.total_runs, 1);
        assert_eq!(automation.total_completed, 0);
    }

    #[tokio::test]
    async fn test_missing_phone_is_skip() {
        let fx = Fixture::new(vec![Step::send_template("t1", 0)]);
        fx.store
            .upsert_contact(&contact("c1", "Ana", None, None))
            .unwrap();
        let exec = fx
            .executor(ZeroDelayPolicy::Stall)
            .resume(fx.execution(), fx.now)
            .await
            .unwrap();

        assert_eq!(exec.state, ExecutionState::Completed);
        assert_eq!(exec.steps_log[0].outcome, StepOutcome::Skip);
        assert_eq!(exec.steps_log[0].detail.as_deref(), Some("no phone"));
    }

    #[tokio::test]
    async fn test_missing_automation_fails() {
        let fx = Fixture::new(vec![]);
        let exec = AutomationExecution::new("e2", "ghost", "c1", fx.now);
        let exec = fx
            .executor(ZeroDelayPolicy::Stall)
            .resume(exec, fx.now)
            .await
            .unwrap();
        assert_eq!(exec.state, ExecutionState::Failed);
        assert!(exec.error_message.unwrap().contains("ghost"));
    }

    #[tokio::test]
    async fn test_missing_template_fails() {
        let fx = Fixture::new(vec![Step::send_template("nope", 0)]);
        let exec = fx
            .executor(ZeroDelayPolicy::Stall)
            .resume(fx.execution(), fx.now)
            .await
            .unwrap();
        assert_eq!(exec.state, ExecutionState::Failed);
        assert_eq!(exec.current_step, 0);
        assert!(fx.wa.sent().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_step_kind_is_skipped() {
        let other = Step {
            kind: StepKind::Other("asignar_vendedor".into()),
            template_id: None,
            delay_minutes: None,
        };
        let fx = Fixture::new(vec![other]);
        let exec = fx
            .executor(ZeroDelayPolicy::Stall)
            .resume(fx.execution(), fx.now)
            .await
            .unwrap();
        assert_eq!(exec.state, ExecutionState::Completed);
        assert_eq!(exec.steps_log[0].outcome, StepOutcome::Skip);
    }

    #[tokio::test]
    async fn test_completes_within_step_count_resumes() {
        let steps = vec![Step::wait(0), Step::wait(5), Step::send_template("t1", 0)];
        let fx = Fixture::new(steps.clone());
        let executor = fx.executor(ZeroDelayPolicy::Stall);

        let mut exec = fx.execution();
        let mut now = fx.now;
        let mut resumes = 0;
        while !exec.state.is_terminal() {
            let before = exec.current_step;
            exec = executor.resume(exec, now).await.unwrap();
            assert!(exec.current_step >= before);
            resumes += 1;
            assert!(resumes <= steps.len(), "too many resumes");
            now = exec.next_action_at.unwrap_or(now);
        }

        assert_eq!(exec.state, ExecutionState::Completed);
        assert_eq!(resumes, steps.len());
        assert_eq!(exec.steps_log.len(), steps.len());
        assert_eq!(fx.wa.sent().len(), 1);
    }

    #[tokio::test]
    async fn test_trailing_wait_completes_on_next_resume() {
        let fx = Fixture::new(vec![Step::wait(1)]);
        let executor = fx.executor(ZeroDelayPolicy::Stall);
        let exec = executor.resume(fx.execution(), fx.now).await.unwrap();
        assert_eq!(exec.state, ExecutionState::Running);
        let due_at = exec.next_action_at.unwrap();
        let exec = executor.resume(exec, due_at).await.unwrap();
        assert_eq!(exec.state, ExecutionState::Completed);
        assert_eq!(exec.current_step, 0);
    }

    #[tokio::test]
    async fn test_resume_ignores_executions_not_due() {
        let fx = Fixture::new(vec![Step::wait(10), Step::send_template("t1", 0)]);
        let executor = fx.executor(ZeroDelayPolicy::Stall);
        let waiting = executor.resume(fx.execution(), fx.now).await.unwrap();

        // Still inside the wait.
        let early = executor.resume(waiting.clone(), fx.now).await.unwrap();
        assert_eq!(early, waiting);

        let mut done = waiting.clone();
        done.finish(ExecutionState::Completed, fx.now);
        let later = fx.now + Duration::hours(1);
        let after = executor.resume(done.clone(), later).await.unwrap();
        assert_eq!(after, done);

        assert!(fx.wa.sent().is_empty());
        let stored = fx.store.execution("e1").unwrap().unwrap();
        assert_eq!(stored.current_step, 0);
        assert_eq!(stored.state, ExecutionState::Running);
    }
}
