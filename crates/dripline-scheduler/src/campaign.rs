//! Campaign dispatcher: one-shot broadcast of a template to an audience.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;

use dripline_core::error::Result;
use dripline_core::traits::MarketingStore;
use dripline_core::types::{Campaign, CampaignState, Contact};

use crate::compliance;
use crate::delivery::{Delivery, Gateways};

/// Sends due campaigns, one contact at a time.
pub struct CampaignDispatcher {
    store: Arc<dyn MarketingStore>,
    gateways: Arc<Gateways>,
    /// Pause between consecutive sends (provider rate limits).
    pacing: Duration,
}

impl CampaignDispatcher {
    pub fn new(store: Arc<dyn MarketingStore>, gateways: Arc<Gateways>, pacing: Duration) -> Self {
        Self {
            store,
            gateways,
            pacing,
        }
    }

    /// Claim and send `campaign`.
    ///
    /// Returns `None` when another run already moved it out of SCHEDULED.
    /// Send failures and contacts without an address are counted in
    /// `total_fallidos`; only store errors are returned.
    pub async fn dispatch(
        &self,
        mut campaign: Campaign,
        now: DateTime<Utc>,
    ) -> Result<Option<Campaign>> {
        if !self.store.claim_campaign(&campaign.id, now)? {
            tracing::info!("Campaign {} is no longer scheduled, skipping", campaign.id);
            return Ok(None);
        }
        campaign.state = CampaignState::Running;
        campaign.started_at = Some(now);

        let template = match campaign.template_id.as_deref() {
            Some(id) => self.store.template(id)?,
            None => None,
        };
        let Some(template) = template else {
            tracing::warn!(
                "⚠️ Campaign '{}' cancelled: template {} not found",
                campaign.name,
                campaign.template_id.as_deref().unwrap_or("<none>")
            );
            campaign.state = CampaignState::Cancelled;
            self.store.save_campaign(&campaign)?;
            return Ok(Some(campaign));
        };

        let audience: Vec<Contact> = self
            .store
            .contacts(&campaign.audience.contact_ids)?
            .into_iter()
            .filter(|c| !compliance::excluded_from_audience(c))
            .collect();

        campaign.total_sent = 0;
        campaign.total_failed = 0;

        if audience.is_empty() {
            tracing::info!("📣 Campaign '{}' has no reachable contacts", campaign.name);
            campaign.state = CampaignState::Completed;
            campaign.completed_at = Some(now);
            self.store.save_campaign(&campaign)?;
            return Ok(Some(campaign));
        }

        tracing::info!(
            "📣 Campaign '{}' started: {} contacts via {}",
            campaign.name,
            audience.len(),
            template.channel
        );

        let started = tokio::time::Instant::now();
        for (i, contact) in audience.iter().enumerate() {
            if i > 0 && !self.pacing.is_zero() {
                tokio::time::sleep(self.pacing).await;
            }
            match self.gateways.deliver(&template, contact).await {
                Ok(Delivery::Sent { .. }) => campaign.total_sent += 1,
                Ok(Delivery::MissingAddress(reason)) => {
                    tracing::debug!("Campaign {}: contact {} {reason}", campaign.id, contact.id);
                    campaign.total_failed += 1;
                }
                Err(e) => {
                    tracing::warn!(
                        "⚠️ Campaign {}: send to contact {} failed: {e}",
                        campaign.id,
                        contact.id
                    );
                    campaign.total_failed += 1;
                }
            }
        }

        let elapsed = chrono::Duration::from_std(started.elapsed())
            .unwrap_or_else(|_| chrono::Duration::zero());
        campaign.state = CampaignState::Completed;
        campaign.completed_at = Some(now + elapsed);
        self.store.save_campaign(&campaign)?;

        tracing::info!(
            "✅ Campaign '{}' completed: {} sent, {} failed",
            campaign.name,
            campaign.total_sent,
            campaign.total_failed
        );
        Ok(Some(campaign))
    }
}
