//! Background processors driving campaigns to completion.
//!
//! - `CampaignScheduler`: fixed 60s tick — promotes due campaigns,
//!   detects stuck calls, cleans up stale in-memory state
//! - `CampaignExecutor`: one per promoted campaign — runs the dial loop
//! - `CompletionMonitor`: polls a campaign's calls until all are
//!   terminal, then marks it completed
//! - the per-campaign watchdog: a longer-horizon backstop that
//!   force-completes a campaign the monitor failed to settle

pub mod executor;
pub mod monitor;
pub mod scheduler;

pub use executor::CampaignExecutor;
pub use monitor::{CompletionMonitor, spawn_watchdog};
pub use scheduler::CampaignScheduler;

use std::time::Duration;
use tokio::sync::watch;

/// Sleep for `duration`, waking early when shutdown fires.
///
/// Returns `true` when shutdown interrupted the sleep. A dropped
/// shutdown sender degrades to a plain sleep.
pub(crate) async fn shutdown_aware_sleep(
    shutdown_rx: &mut watch::Receiver<bool>,
    duration: Duration,
) -> bool {
    let deadline = tokio::time::Instant::now() + duration;
    loop {
        tokio::select! {
            _ = tokio::time::sleep_until(deadline) => return false,
            result = shutdown_rx.changed() => match result {
                Ok(()) if *shutdown_rx.borrow() => return true,
                Ok(()) => continue,
                Err(_) => {
                    tokio::time::sleep_until(deadline).await;
                    return false;
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn sleep_completes_without_shutdown() {
        let (_tx, mut rx) = watch::channel(false);
        assert!(!shutdown_aware_sleep(&mut rx, Duration::from_secs(30)).await);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_interrupts_sleep() {
        let (tx, mut rx) = watch::channel(false);
        let handle = tokio::spawn(async move {
            shutdown_aware_sleep(&mut rx, Duration::from_secs(3600)).await
        });
        tokio::task::yield_now().await;
        let _ = tx.send(true);
        assert!(matches!(handle.await, Ok(true)));
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_sender_degrades_to_plain_sleep() {
        let (tx, mut rx) = watch::channel(false);
        drop(tx);
        assert!(!shutdown_aware_sleep(&mut rx, Duration::from_secs(5)).await);
    }
}
