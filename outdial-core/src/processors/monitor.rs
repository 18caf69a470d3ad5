//! Campaign completion monitoring.
//!
//! The CompletionMonitor polls the call state store every 15 seconds
//! for up to an hour; the campaign is marked `completed` once every
//! recipient's call has been terminal for two consecutive checks, and
//! `failed` when the hour runs out first. An independent watchdog with a
//! longer horizon force-completes a campaign still `in_progress`, as a
//! backstop if the monitor itself dies.

use crate::calls::CallStateStore;
use crate::entities::{CampaignStatus, GetCampaignById, UpdateCampaignStatus};
use crate::framework::DatabaseProcessor;
use crate::processors::shutdown_aware_sleep;
use kanau::processor::Processor;
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Poll interval.
const CHECK_INTERVAL: Duration = Duration::from_secs(15);
/// Give up after this long.
const MAX_WAIT: Duration = Duration::from_secs(3600);
/// All-terminal must hold for this many consecutive checks.
const REQUIRED_CONSECUTIVE_CHECKS: u32 = 2;

/// Errors that can occur while monitoring a campaign.
#[derive(Debug, Error)]
pub enum MonitorError {
    /// Database error
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// CompletionMonitor settles one campaign.
pub struct CompletionMonitor {
    db: DatabaseProcessor,
    store: Arc<CallStateStore>,
    campaign_id: i64,
    phone_numbers: Vec<String>,
    shutdown_rx: watch::Receiver<bool>,
}

impl CompletionMonitor {
    /// Spawn the monitor task for a campaign whose dial loop finished.
    pub fn spawn(
        pool: PgPool,
        store: Arc<CallStateStore>,
        campaign_id: i64,
        phone_numbers: Vec<String>,
        shutdown_rx: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let monitor = Self {
            db: DatabaseProcessor::new(pool),
            store,
            campaign_id,
            phone_numbers,
            shutdown_rx,
        };
        tokio::spawn(monitor.run())
    }

    async fn run(mut self) {
        let campaign_id = self.campaign_id;
        info!(campaign_id, recipients = self.phone_numbers.len(), "completion monitor started");

        match self.watch().await {
            Ok(()) => {}
            Err(e) => {
                error!(campaign_id, error = %e, "completion monitor failed");
                // Leave a settled state behind rather than an eternal
                // in_progress.
                if let Ok(Some(campaign)) =
                    self.db.process(GetCampaignById { id: campaign_id }).await
                {
                    if campaign.status == CampaignStatus::InProgress {
                        let _ = self
                            .db
                            .process(UpdateCampaignStatus {
                                id: campaign_id,
                                status: CampaignStatus::Failed,
                                details: Some(format!("Completion monitor error: {e}")),
                            })
                            .await;
                    }
                }
            }
        }
    }

    async fn watch(&mut self) -> Result<(), MonitorError> {
        let campaign_id = self.campaign_id;
        let started = tokio::time::Instant::now();
        let mut consecutive_complete = 0u32;

        if shutdown_aware_sleep(&mut self.shutdown_rx, CHECK_INTERVAL).await {
            return Ok(());
        }

        while started.elapsed() < MAX_WAIT {
            match self.db.process(GetCampaignById { id: campaign_id }).await? {
                None => {
                    warn!(campaign_id, "campaign vanished, stopping monitor");
                    return Ok(());
                }
                Some(c) if c.status == CampaignStatus::Cancelled => {
                    info!(campaign_id, "campaign cancelled, stopping monitor");
                    return Ok(());
                }
                Some(c) if c.status == CampaignStatus::Completed => {
                    debug!(campaign_id, "campaign already completed, stopping monitor");
                    return Ok(());
                }
                Some(_) => {}
            }

            let active = self
                .phone_numbers
                .iter()
                .filter(|phone| !self.store.is_complete(campaign_id, phone))
                .count();
            debug!(campaign_id, active, consecutive_complete, "completion check");

            if active == 0 {
                consecutive_complete += 1;
                if consecutive_complete >= REQUIRED_CONSECUTIVE_CHECKS {
                    let current = self.db.process(GetCampaignById { id: campaign_id }).await?;
                    let settled = current.as_ref().is_some_and(|c| {
                        matches!(c.status, CampaignStatus::Completed | CampaignStatus::Cancelled)
                    });
                    if !settled {
                        self.db
                            .process(UpdateCampaignStatus {
                                id: campaign_id,
                                status: CampaignStatus::Completed,
                                details: Some("All calls processed".to_string()),
                            })
                            .await?;
                        info!(campaign_id, "campaign completed");
                    }
                    return Ok(());
                }
            } else {
                consecutive_complete = 0;
            }

            if shutdown_aware_sleep(&mut self.shutdown_rx, CHECK_INTERVAL).await {
                return Ok(());
            }
        }

        warn!(campaign_id, "completion monitor timed out");
        let current = self.db.process(GetCampaignById { id: campaign_id }).await?;
        let settled = current.as_ref().is_some_and(|c| {
            matches!(c.status, CampaignStatus::Completed | CampaignStatus::Cancelled)
        });
        if !settled {
            self.db
                .process(UpdateCampaignStatus {
                    id: campaign_id,
                    status: CampaignStatus::Failed,
                    details: Some("Completion monitor timeout".to_string()),
                })
                .await?;
        }
        Ok(())
    }
}

/// Longer-horizon backstop: force-complete a campaign still
/// `in_progress` after `timeout`, in case the monitor itself failed.
pub fn spawn_watchdog(
    pool: PgPool,
    campaign_id: i64,
    timeout: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        if shutdown_aware_sleep(&mut shutdown_rx, timeout).await {
            return;
        }
        let db = DatabaseProcessor::new(pool);
        match db.process(GetCampaignById { id: campaign_id }).await {
            Ok(Some(campaign)) if campaign.status == CampaignStatus::InProgress => {
                warn!(campaign_id, "watchdog forcing campaign completion");
                if let Err(e) = db
                    .process(UpdateCampaignStatus {
                        id: campaign_id,
                        status: CampaignStatus::Completed,
                        details: Some("Watchdog timeout".to_string()),
                    })
                    .await
                {
                    error!(campaign_id, error = %e, "watchdog status update failed");
                }
            }
            Ok(_) => {}
            Err(e) => error!(campaign_id, error = %e, "watchdog campaign lookup failed"),
        }
    })
}
