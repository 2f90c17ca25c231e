//! Poll cycle: find due executions and campaigns and hand them to the
//! executors. Per-item failures are counted, never propagated.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::sync::Arc;

use dripline_core::config::PollerConfig;
use dripline_core::traits::MarketingStore;

use crate::automation::StepExecutor;
use crate::campaign::CampaignDispatcher;
use crate::delivery::Gateways;

/// Counts for one poll cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PollReport {
    /// Executions advanced by one step.
    #[serde(rename = "automatizaciones")]
    pub automations: usize,
    /// Campaigns dispatched (including cancelled ones).
    #[serde(rename = "campanas")]
    pub campaigns: usize,
    #[serde(rename = "errores")]
    pub errors: usize,
}

/// Entry point of the engine, invoked once per tick.
pub struct Poller {
    store: Arc<dyn MarketingStore>,
    executor: StepExecutor,
    dispatcher: CampaignDispatcher,
    config: PollerConfig,
}

impl Poller {
    pub fn new(store: Arc<dyn MarketingStore>, gateways: Gateways, config: PollerConfig) -> Self {
        let gateways = Arc::new(gateways);
        Self {
            executor: StepExecutor::new(store.clone(), gateways.clone(), config.zero_delay_policy),
            dispatcher: CampaignDispatcher::new(
                store.clone(),
                gateways,
                std::time::Duration::from_millis(config.send_pacing_ms),
            ),
            store,
            config,
        }
    }

    pub async fn poll_once(&self) -> PollReport {
        self.poll_once_at(Utc::now()).await
    }

    /// One cycle with an explicit clock.
    pub async fn poll_once_at(&self, now: DateTime<Utc>) -> PollReport {
        let mut report = PollReport::default();

        match self.store.due_executions(now, self.config.automation_batch) {
            Ok(due) => {
                for exec in due {
                    let id = exec.id.clone();
                    match self.executor.resume(exec, now).await {
                        Ok(_) => report.automations += 1,
                        Err(e) => {
                            tracing::warn!("⚠️ Execution {id} failed: {e}");
                            report.errors += 1;
                        }
                    }
                }
            }
            Err(e) => {
                tracing::error!("❌ Failed to load due executions: {e}");
                report.errors += 1;
            }
        }

        match self.store.due_campaigns(now, self.config.campaign_batch) {
            Ok(due) => {
                for campaign in due {
                    let id = campaign.id.clone();
                    match self.dispatcher.dispatch(campaign, now).await {
                        Ok(Some(_)) => report.campaigns += 1,
                        Ok(None) => {}
                        Err(e) => {
                            tracing::warn!("⚠️ Campaign {id} failed: {e}");
                            report.errors += 1;
                        }
                    }
                }
            }
            Err(e) => {
                tracing::error!("❌ Failed to load due campaigns: {e}");
                report.errors += 1;
            }
        }

        self.warn_stuck_campaigns(now);

        if report != PollReport::default() {
            tracing::info!(
                "🔁 Poll: {} automations, {} campaigns, {} errors",
                report.automations,
                report.campaigns,
                report.errors
            );
        } else {
            tracing::debug!("Poll: nothing due");
        }
        report
    }

    /// Log campaigns left RUNNING past the configured threshold. They are not
    /// reset. Returns how many were found.
    pub fn warn_stuck_campaigns(&self, now: DateTime<Utc>) -> usize {
        if self.config.stuck_campaign_minutes <= 0 {
            return 0;
        }
        let threshold = now - Duration::minutes(self.config.stuck_campaign_minutes);
        match self.store.stuck_campaigns(threshold) {
            Ok(stuck) => {
                for c in &stuck {
                    tracing::warn!(
                        "⚠️ Campaign '{}' ({}) has been RUNNING since {}; needs operator attention",
                        c.name,
                        c.id,
                        c.started_at.map(|t| t.to_rfc3339()).unwrap_or_default()
                    );
                }
                stuck.len()
            }
            Err(e) => {
                tracing::warn!("⚠️ Failed to check stuck campaigns: {e}");
                0
            }
        }
    }
}
