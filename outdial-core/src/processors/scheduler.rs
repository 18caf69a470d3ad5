//! CampaignScheduler processor.
//!
//! The CampaignScheduler is responsible for:
//! - Promoting due `pending` campaigns to `ready` via an atomic
//!   conditional flip (racing workers see a no-op) and spawning one
//!   executor task per winning campaign
//! - Detecting calls stuck in dialing/ringing and cross-checking them
//!   against the live channel listing
//! - Dropping stale finalized records and settled campaigns from the
//!   in-memory store
//! - Driving the control-channel keep-alive probe
//!
//! Everything runs on a fixed 60-second tick.

use crate::calls::{CallRecord, CallStateStore, CallStatus, PendingCorrelations};
use crate::entities::{
    CampaignStatus, GetActiveCampaignIds, GetCampaignById, ListDueCampaigns, TryTransitionCampaign,
};
use crate::framework::DatabaseProcessor;
use crate::pbx::{self, PbxCommands};
use crate::processors::executor::CampaignExecutor;
use crate::settings::DialerSettings;
use kanau::processor::Processor;
use outdial_ami::AmiSupervisor;
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use time::OffsetDateTime;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Scheduler tick.
const TICK: Duration = Duration::from_secs(60);
/// A transitional call older than this is a stuck candidate.
const STUCK_THRESHOLD: time::Duration = time::Duration::seconds(60);
/// Finalized records older than this are dropped.
const FINALIZED_MAX_AGE: time::Duration = time::Duration::minutes(5);

/// Errors that can occur during a scheduler pass.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Database error
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// CampaignScheduler promotes due campaigns and reconciles call state.
pub struct CampaignScheduler {
    db: DatabaseProcessor,
    store: Arc<CallStateStore>,
    pending: Arc<PendingCorrelations>,
    supervisor: Arc<AmiSupervisor>,
    pbx: Arc<dyn PbxCommands>,
    settings: DialerSettings,
    shutdown_rx: watch::Receiver<bool>,
}

impl CampaignScheduler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        pool: PgPool,
        store: Arc<CallStateStore>,
        pending: Arc<PendingCorrelations>,
        supervisor: Arc<AmiSupervisor>,
        pbx: Arc<dyn PbxCommands>,
        settings: DialerSettings,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Self {
        Self {
            db: DatabaseProcessor::new(pool),
            store,
            pending,
            supervisor,
            pbx,
            settings,
            shutdown_rx,
        }
    }

    /// Run the CampaignScheduler until shutdown.
    pub async fn run(mut self) {
        info!("CampaignScheduler started");

        let mut ticker = tokio::time::interval(TICK);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;

                _ = self.shutdown_rx.changed() => {
                    if *self.shutdown_rx.borrow() {
                        info!("CampaignScheduler received shutdown signal");
                        break;
                    }
                }

                _ = ticker.tick() => {
                    self.supervisor.heartbeat().await;

                    if let Err(e) = self.promote_due().await {
                        error!(error = %e, "campaign promotion pass failed");
                    }
                    if let Err(e) = self.cleanup_stale().await {
                        error!(error = %e, "stale cleanup pass failed");
                    }
                    if let Err(e) = self.detect_stuck().await {
                        error!(error = %e, "stuck-call detection pass failed");
                    }
                }
            }
        }

        info!("CampaignScheduler shutdown complete");
    }

    /// Promote due campaigns and spawn executors for the winners.
    async fn promote_due(&self) -> Result<(), SchedulerError> {
        let now = OffsetDateTime::now_utc();
        let now = time::PrimitiveDateTime::new(now.date(), now.time());
        let due = self.db.process(ListDueCampaigns { now }).await?;
        if due.is_empty() {
            return Ok(());
        }
        info!(count = due.len(), "found campaigns due for promotion");

        for campaign in due {
            let won = self
                .db
                .process(TryTransitionCampaign {
                    id: campaign.id,
                    from: CampaignStatus::Pending,
                    to: CampaignStatus::Ready,
                    details: Some("Ready for execution".to_string()),
                })
                .await?;
            if !won {
                // Another worker promoted it first; the flip is a no-op
                // for the loser.
                debug!(campaign_id = campaign.id, "promotion lost to a concurrent worker");
                continue;
            }

            info!(campaign_id = campaign.id, "campaign promoted, spawning executor");
            CampaignExecutor::spawn(
                self.db.pool.clone(),
                Arc::clone(&self.store),
                Arc::clone(&self.pending),
                Arc::clone(&self.supervisor),
                self.settings.clone(),
                campaign,
                self.shutdown_rx.clone(),
            );
        }
        Ok(())
    }

    /// Cross-check stuck transitional calls against live PBX channels.
    async fn detect_stuck(&self) -> Result<(), SchedulerError> {
        let ids = self.store.campaign_ids();
        if ids.is_empty() {
            return Ok(());
        }
        let active = self.db.process(GetActiveCampaignIds { ids }).await?;
        let now = OffsetDateTime::now_utc();

        for campaign_id in active {
            let stuck = self.store.stuck_transitional(campaign_id, STUCK_THRESHOLD, now);
            if stuck.is_empty() {
                continue;
            }
            let listing = match self.pbx.show_channels().await {
                Ok(listing) => listing,
                Err(e) => {
                    // Best-effort: without a listing we cannot tell a
                    // stuck call from a slow one.
                    warn!(error = %e, "channel listing failed, skipping stuck sweep");
                    return Ok(());
                }
            };
            sweep_stuck(&self.store, campaign_id, &stuck, &listing);
        }
        Ok(())
    }

    /// Drop settled campaigns and stale finalized records.
    async fn cleanup_stale(&self) -> Result<(), SchedulerError> {
        let now = OffsetDateTime::now_utc();
        for campaign_id in self.store.campaign_ids() {
            match self.db.process(GetCampaignById { id: campaign_id }).await? {
                None => {
                    debug!(campaign_id, "dropping unknown campaign from store");
                    self.store.remove_campaign(campaign_id);
                }
                Some(campaign) if campaign.status.is_terminal() => {
                    debug!(campaign_id, status = %campaign.status, "dropping settled campaign from store");
                    self.store.remove_campaign(campaign_id);
                }
                Some(_) => {
                    let removed =
                        self.store
                            .remove_finalized_older_than(campaign_id, FINALIZED_MAX_AGE, now);
                    if removed > 0 {
                        debug!(campaign_id, removed, "dropped stale finalized records");
                    }
                    if self.store.is_campaign_empty(campaign_id) {
                        self.store.remove_campaign(campaign_id);
                    }
                }
            }
        }
        Ok(())
    }
}

/// Force `noanswer` on stuck calls with no matching live channel; leave
/// the ones the PBX still knows about alone.
fn sweep_stuck(
    store: &CallStateStore,
    campaign_id: i64,
    stuck: &[(String, CallRecord)],
    listing: &str,
) {
    for (phone_number, record) in stuck {
        if pbx::channel_matches(listing, phone_number, record.leg_id.as_deref()) {
            debug!(campaign_id, phone_number = %phone_number, "stuck candidate still has a live channel");
            continue;
        }
        warn!(
            campaign_id,
            phone_number = %phone_number,
            status = %record.status,
            "stuck call with no live channel, forcing noanswer"
        );
        store.update(
            campaign_id,
            phone_number,
            CallStatus::NoAnswer,
            "Call timed out with no live channel",
            record.leg_id.as_deref(),
            record.action_token.as_deref(),
        );
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    const C: i64 = 7;

    #[test]
    fn stuck_call_without_channel_is_forced_to_noanswer() {
        let store = CallStateStore::new();
        store.update(C, "5551234", CallStatus::Dialing, "d", Some("1712.42"), None);
        store.backdate(C, "5551234", time::Duration::seconds(90));

        let now = OffsetDateTime::now_utc();
        let stuck = store.stuck_transitional(C, STUCK_THRESHOLD, now);
        assert_eq!(stuck.len(), 1);

        // Listing has no line for the number.
        sweep_stuck(&store, C, &stuck, "PJSIP/other-0001  ctx  Up  Dial  999.1");
        assert_eq!(store.snapshot(C, "5551234").unwrap().status, CallStatus::NoAnswer);
        assert!(store.snapshot(C, "5551234").unwrap().finalized);
    }

    #[test]
    fn stuck_call_with_live_channel_is_left_untouched() {
        let store = CallStateStore::new();
        store.update(C, "5551234", CallStatus::Ringing, "r", Some("1712.42"), None);
        store.backdate(C, "5551234", time::Duration::seconds(90));

        let now = OffsetDateTime::now_utc();
        let stuck = store.stuck_transitional(C, STUCK_THRESHOLD, now);
        let listing = "Local/5551234@from-internal-0001;1  ctx  Ringing  AppDial  1712.42";
        sweep_stuck(&store, C, &stuck, listing);
        assert_eq!(store.snapshot(C, "5551234").unwrap().status, CallStatus::Ringing);
    }

    #[test]
    fn recent_transitional_calls_are_not_stuck() {
        let store = CallStateStore::new();
        store.update(C, "5551234", CallStatus::Dialing, "d", None, None);
        let now = OffsetDateTime::now_utc();
        assert!(store.stuck_transitional(C, STUCK_THRESHOLD, now).is_empty());
    }
}
