//! CampaignExecutor processor.
//!
//! One executor runs per promoted campaign. It resolves the
//! announcement asset, lists eligible recipients, and walks them with a
//! fixed inter-call delay, re-checking the persisted campaign status
//! before every origination so a cancellation stops the loop promptly.
//! Every attempted origination leaves at least a `dialing` or `rejected`
//! record behind.

use crate::calls::{CallStateStore, CallStatus, PendingCorrelations};
use crate::entities::announcement::playback_path;
use crate::entities::{
    CampaignStatus, GetAnnouncementFilename, GetCampaignById, ListCampaignRecipients,
    UpdateCampaignStatus,
};
use crate::entities::Campaign;
use crate::framework::DatabaseProcessor;
use crate::processors::monitor::{CompletionMonitor, spawn_watchdog};
use crate::processors::shutdown_aware_sleep;
use crate::settings::DialerSettings;
use kanau::processor::Processor;
use outdial_ami::proto::{AmiAction, OriginateRequest};
use outdial_ami::AmiSupervisor;
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Backstop horizon for the per-campaign watchdog.
const WATCHDOG_TIMEOUT: Duration = Duration::from_secs(600);

/// Errors that can occur while executing a campaign.
#[derive(Debug, Error)]
pub enum ExecutorError {
    /// Database error
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// CampaignExecutor dials every eligible recipient of one campaign.
pub struct CampaignExecutor {
    db: DatabaseProcessor,
    store: Arc<CallStateStore>,
    pending: Arc<PendingCorrelations>,
    supervisor: Arc<AmiSupervisor>,
    settings: DialerSettings,
    campaign: Campaign,
    shutdown_rx: watch::Receiver<bool>,
}

impl CampaignExecutor {
    /// Spawn the execution task for a promoted campaign.
    pub fn spawn(
        pool: PgPool,
        store: Arc<CallStateStore>,
        pending: Arc<PendingCorrelations>,
        supervisor: Arc<AmiSupervisor>,
        settings: DialerSettings,
        campaign: Campaign,
        shutdown_rx: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let executor = Self {
            db: DatabaseProcessor::new(pool),
            store,
            pending,
            supervisor,
            settings,
            campaign,
            shutdown_rx,
        };
        tokio::spawn(executor.run())
    }

    async fn run(mut self) {
        let campaign_id = self.campaign.id;
        info!(campaign_id, "campaign execution started");

        if let Err(e) = self.execute().await {
            error!(campaign_id, error = %e, "campaign execution failed");
            let _ = self
                .db
                .process(UpdateCampaignStatus {
                    id: campaign_id,
                    status: CampaignStatus::Cancelled,
                    details: Some(format!("Execution setup error: {e}")),
                })
                .await;
        }
    }

    async fn execute(&mut self) -> Result<(), ExecutorError> {
        let campaign_id = self.campaign.id;

        let Some(filename) = self
            .db
            .process(GetAnnouncementFilename {
                id: self.campaign.announcement_id,
            })
            .await?
        else {
            warn!(
                campaign_id,
                announcement_id = self.campaign.announcement_id,
                "announcement not found, cancelling campaign"
            );
            self.set_status(CampaignStatus::Cancelled, "Announcement not found")
                .await?;
            return Ok(());
        };
        let playback = playback_path(&self.settings.media_dir, &filename);

        let members = self
            .db
            .process(ListCampaignRecipients {
                group_filter: self.campaign.group_filter,
            })
            .await?;

        if !self
            .set_status(CampaignStatus::InProgress, "Execution started")
            .await?
        {
            // The row is gone or was mutated underneath us; only a
            // campaign still in a dialable state may proceed.
            let current = self.db.process(GetCampaignById { id: campaign_id }).await?;
            let dialable = current.as_ref().is_some_and(|c| {
                matches!(c.status, CampaignStatus::Pending | CampaignStatus::Ready)
            });
            if !dialable {
                warn!(campaign_id, "campaign not in a dialable state, aborting execution");
                return Ok(());
            }
        }

        if members.is_empty() {
            info!(campaign_id, "no eligible recipients, campaign completed");
            self.set_status(CampaignStatus::Completed, "No eligible recipients")
                .await?;
            return Ok(());
        }

        info!(campaign_id, recipients = members.len(), "starting dial loop");

        for member in &members {
            // Cooperative cancellation: re-check the persisted status
            // before each unit of work.
            let status = self
                .db
                .process(GetCampaignById { id: campaign_id })
                .await?
                .map(|c| c.status);
            match status {
                Some(CampaignStatus::Cancelled) => {
                    info!(campaign_id, "campaign cancelled, stopping dial loop");
                    break;
                }
                Some(CampaignStatus::InProgress) => {}
                other => {
                    warn!(campaign_id, status = ?other, "campaign no longer in progress, stopping dial loop");
                    break;
                }
            }

            if let Err(e) = self.supervisor.ensure_connected().await {
                error!(campaign_id, error = %e, "control channel unavailable, stopping dial loop");
                break;
            }

            let action_token = Uuid::new_v4().to_string();
            self.pending
                .register(&member.phone_number, campaign_id, &action_token);
            self.store.update(
                campaign_id,
                &member.phone_number,
                CallStatus::Dialing,
                "Auto-dial initiated",
                None,
                Some(&action_token),
            );

            let request = OriginateRequest {
                number: member.phone_number.clone(),
                context: self.settings.channel_context.clone(),
                playback_path: playback.clone(),
                caller_id_name: self.campaign.caller_id_name.clone(),
                campaign_id,
                member_id: member.id,
                timeout_ms: self.settings.originate_timeout_ms,
                action_id: action_token.clone(),
            };
            match self.supervisor.send_action(&AmiAction::originate(&request)).await {
                Ok(()) => {
                    debug!(campaign_id, phone_number = %member.phone_number, "origination sent");
                }
                Err(e) => {
                    warn!(
                        campaign_id,
                        phone_number = %member.phone_number,
                        error = %e,
                        "origination send failed"
                    );
                    self.store.update(
                        campaign_id,
                        &member.phone_number,
                        CallStatus::Rejected,
                        &format!("Failed to send origination: {e}"),
                        None,
                        Some(&action_token),
                    );
                }
            }

            if shutdown_aware_sleep(&mut self.shutdown_rx, self.settings.inter_call_delay).await {
                info!(campaign_id, "shutdown during dial loop");
                return Ok(());
            }
        }

        let phone_numbers: Vec<String> =
            members.iter().map(|m| m.phone_number.clone()).collect();
        CompletionMonitor::spawn(
            self.db.pool.clone(),
            Arc::clone(&self.store),
            campaign_id,
            phone_numbers,
            self.shutdown_rx.clone(),
        );
        spawn_watchdog(
            self.db.pool.clone(),
            campaign_id,
            WATCHDOG_TIMEOUT,
            self.shutdown_rx.clone(),
        );

        Ok(())
    }

    async fn set_status(&self, status: CampaignStatus, details: &str) -> Result<bool, ExecutorError> {
        Ok(self
            .db
            .process(UpdateCampaignStatus {
                id: self.campaign.id,
                status,
                details: Some(details.to_string()),
            })
            .await?)
    }
}
