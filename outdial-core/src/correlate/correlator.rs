//! EventCorrelator processor.
//!
//! The EventCorrelator is responsible for:
//! - Receiving control-channel events from the listener's forwarding
//!   handler
//! - Resolving each event to a (campaign, recipient) pair through the
//!   ordered fallback ladder
//! - Re-checking the resolved campaign is still persisted as active
//! - Applying the status transition to the call state store
//! - Feeding keypad digits to the DTMF buffers and executing opt-outs
//!
//! Correlation misses are logged and dropped; the signaling stream is
//! lossy and much of it is irrelevant, so a miss is never fatal.

use crate::calls::{CallStateStore, CallStatus, DtmfBuffers, DtmfOutcome, PendingCorrelations};
use crate::correlate::extract;
use crate::entities::{
    CampaignStatus, FindActiveCampaignForRecipient, GetActiveCampaignIds, GetCampaignById,
    SetDoNotCallByPhone,
};
use crate::events::{AmiEventReceiver, AmiEventSender};
use crate::framework::DatabaseProcessor;
use kanau::processor::Processor;
use outdial_ami::client::{AmiEventHandler, HandlerError};
use outdial_ami::proto::AmiEvent;
use sqlx::PgPool;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// High-volume diagnostic event types dropped without logging.
const SILENT_EVENT_TYPES: [&str; 6] = [
    "RTCPReceived",
    "RTCPSent",
    "ExtensionStatus",
    "AGIExec",
    "VarSet",
    "Bridge",
];

/// Errors that can occur while correlating an event.
#[derive(Debug, Error)]
pub enum CorrelateError {
    /// Database error
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Connection-side handler that forwards events into the correlator's
/// channel, keeping database work off the listener task.
pub struct CorrelatorHandle {
    tx: AmiEventSender,
}

impl CorrelatorHandle {
    pub fn new(tx: AmiEventSender) -> Self {
        Self { tx }
    }
}

impl AmiEventHandler for CorrelatorHandle {
    fn name(&self) -> &'static str {
        "event-correlator"
    }

    fn on_event(&self, event: &AmiEvent) -> Result<(), HandlerError> {
        // A full queue drops the event; the stream is lossy by contract
        // and blocking the listener would be worse.
        self.tx
            .try_send(event.clone())
            .map_err(|e| HandlerError(format!("correlator queue: {e}")))
    }
}

/// EventCorrelator resolves inbound events and applies transitions.
pub struct EventCorrelator {
    db: DatabaseProcessor,
    store: Arc<CallStateStore>,
    pending: Arc<PendingCorrelations>,
    dtmf: Arc<DtmfBuffers>,
    event_rx: AmiEventReceiver,
    shutdown_rx: watch::Receiver<bool>,
}

impl EventCorrelator {
    pub fn new(
        pool: PgPool,
        store: Arc<CallStateStore>,
        pending: Arc<PendingCorrelations>,
        dtmf: Arc<DtmfBuffers>,
        event_rx: AmiEventReceiver,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Self {
        Self {
            db: DatabaseProcessor::new(pool),
            store,
            pending,
            dtmf,
            event_rx,
            shutdown_rx,
        }
    }

    /// Run the EventCorrelator until shutdown.
    pub async fn run(mut self) {
        info!("EventCorrelator started");

        loop {
            tokio::select! {
                biased;

                _ = self.shutdown_rx.changed() => {
                    if *self.shutdown_rx.borrow() {
                        info!("EventCorrelator received shutdown signal");
                        break;
                    }
                }

                Some(event) = self.event_rx.recv() => {
                    if let Err(e) = self.handle_event(&event).await {
                        error!(event = %event.event_type(), error = %e, "failed to process event");
                    }
                }

                else => {
                    info!("event channel closed");
                    break;
                }
            }
        }

        info!("EventCorrelator shutdown complete");
    }

    async fn handle_event(&self, event: &AmiEvent) -> Result<(), CorrelateError> {
        let event_type = event.event_type();
        if SILENT_EVENT_TYPES.contains(&event_type) {
            return Ok(());
        }

        let Some((campaign_id, phone_number)) = self.resolve(event).await? else {
            debug!(event = %event_type, "dropping unattributable event");
            return Ok(());
        };

        // The campaign may have been cancelled or completed between the
        // origination and this event; late events for a settled campaign
        // are dropped.
        let campaign = self.db.process(GetCampaignById { id: campaign_id }).await?;
        let active = campaign.as_ref().is_some_and(|c| {
            matches!(
                c.status,
                CampaignStatus::Pending | CampaignStatus::Ready | CampaignStatus::InProgress
            )
        });
        if !active {
            debug!(
                campaign_id,
                phone_number = %phone_number,
                event = %event_type,
                "dropping event for inactive campaign"
            );
            return Ok(());
        }

        self.apply(event, campaign_id, &phone_number).await
    }

    /// The ordered resolution ladder.
    async fn resolve(&self, event: &AmiEvent) -> Result<Option<(i64, String)>, CorrelateError> {
        let token = event.action_id();

        // 1. Acknowledgements carry the most reliable key: the token we
        //    generated. The pending cache wins, then the store.
        if event.event_type() == "OriginateResponse" {
            if let Some(token) = token {
                if let Some(pair) = self.pending.find_by_token(token) {
                    return Ok(Some(pair));
                }
                if let Some(pair) = self.store.find_by_action_token(token) {
                    return Ok(Some(pair));
                }
            }
        } else if let Some(leg_id) = event.unique_id() {
            // 2. Leg id among records whose campaign is persisted active.
            let candidates = self.store.find_by_leg_id(leg_id);
            if !candidates.is_empty() {
                let ids = candidates.iter().map(|(c, _)| *c).collect();
                let active = self.db.process(GetActiveCampaignIds { ids }).await?;
                if let Some(pair) = candidates.into_iter().find(|(c, _)| active.contains(c)) {
                    return Ok(Some(pair));
                }
            }
        }

        // 3. Token among records still early in their life.
        if let Some(token) = token {
            if let Some(pair) = self.store.find_transient_by_action_token(token) {
                return Ok(Some(pair));
            }
        }

        // 4. Extract the recipient from the event itself.
        let Some(phone_number) = extract::recipient_from_event(event) else {
            return Ok(None);
        };

        // 5. Extract the campaign from the event's variables.
        if let Some(campaign_id) = extract::campaign_from_event(event) {
            return Ok(Some((campaign_id, phone_number)));
        }

        // 6. Fall back on what we know about the recipient: a pending
        //    origination, an in-memory transient record, and finally the
        //    most recent active campaign targeting them.
        if let Some(campaign_id) = self.pending.lookup(&phone_number) {
            return Ok(Some((campaign_id, phone_number)));
        }
        if let Some(campaign_id) = self.store.find_campaign_for_recipient(&phone_number) {
            return Ok(Some((campaign_id, phone_number)));
        }
        if let Some(campaign_id) = self
            .db
            .process(FindActiveCampaignForRecipient {
                phone_number: phone_number.clone(),
            })
            .await?
        {
            return Ok(Some((campaign_id, phone_number)));
        }

        Ok(None)
    }

    /// Apply the transition for a resolved event.
    async fn apply(
        &self,
        event: &AmiEvent,
        campaign_id: i64,
        phone_number: &str,
    ) -> Result<(), CorrelateError> {
        let leg_id = event.unique_id();
        let token = event.action_id();

        match event.event_type() {
            "Newstate" => match event.channel_state_desc() {
                Some("Ringing") => {
                    self.store.update(
                        campaign_id,
                        phone_number,
                        CallStatus::Ringing,
                        "Phone is ringing",
                        leg_id,
                        token,
                    );
                }
                Some("Up") => {
                    self.store.update(
                        campaign_id,
                        phone_number,
                        CallStatus::Answered,
                        "Call answered",
                        leg_id,
                        token,
                    );
                }
                _ => {}
            },

            "OriginateResponse" => match event.response() {
                Some("Success") => {
                    if let Some(leg) = leg_id {
                        self.store.attach_leg(campaign_id, phone_number, leg);
                    }
                    self.pending.clear(phone_number);
                    let current = self.store.snapshot(campaign_id, phone_number).map(|r| r.status);
                    if matches!(current, Some(CallStatus::Dialing | CallStatus::Pending)) {
                        let details = match event.channel() {
                            Some(channel) => format!("Origination acknowledged, channel {channel}"),
                            None => "Origination acknowledged".to_string(),
                        };
                        self.store.update(
                            campaign_id,
                            phone_number,
                            CallStatus::Dialing,
                            &details,
                            leg_id,
                            token,
                        );
                    }
                }
                Some("Failure") => {
                    self.pending.clear(phone_number);
                    let details = format!(
                        "Origination failed: {}",
                        event.reason().unwrap_or("unknown")
                    );
                    self.store.update(
                        campaign_id,
                        phone_number,
                        CallStatus::Rejected,
                        &details,
                        leg_id,
                        token,
                    );
                }
                _ => {}
            },

            "Hangup" => {
                let cause = event.cause_txt().unwrap_or("Unknown");
                let current = self.store.snapshot(campaign_id, phone_number).map(|r| r.status);
                let (status, details) = extract::terminal_status_for_hangup(current, cause);
                self.store
                    .update(campaign_id, phone_number, status, &details, leg_id, token);
            }

            "DTMFEnd" => {
                let Some(digit) = event.digit() else {
                    return Ok(());
                };
                self.store.update(
                    campaign_id,
                    phone_number,
                    CallStatus::DtmfReceived,
                    &format!("Pressed {digit}"),
                    leg_id,
                    token,
                );
                if self.dtmf.push_digit(phone_number, digit) == DtmfOutcome::OptOut {
                    let flagged = self
                        .db
                        .process(SetDoNotCallByPhone {
                            phone_number: phone_number.to_string(),
                        })
                        .await?;
                    if flagged {
                        info!(campaign_id, phone_number, "recipient opted out via keypad");
                        self.store.update(
                            campaign_id,
                            phone_number,
                            CallStatus::OptedOut,
                            "Recipient pressed 0# to opt out",
                            leg_id,
                            token,
                        );
                    } else {
                        warn!(phone_number, "opt-out sequence from unknown number");
                    }
                }
            }

            // Correlated, but carries no transition.
            _ => {}
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use crate::events::ami_event_channel;
    use outdial_ami::AmiFrame;

    fn event(block: &str) -> AmiEvent {
        match AmiEvent::from_frame(AmiFrame::parse(block)) {
            Some(ev) => ev,
            None => unreachable!("test blocks always carry an Event key"),
        }
    }

    /// A correlator over a lazy pool: resolution paths that never reach
    /// the database can be exercised without one.
    fn correlator() -> EventCorrelator {
        let (_tx, rx) = ami_event_channel();
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        std::mem::forget(_shutdown_tx);
        let pool = PgPool::connect_lazy("postgres://localhost/outdial_test").unwrap();
        EventCorrelator::new(
            pool,
            Arc::new(CallStateStore::new()),
            Arc::new(PendingCorrelations::new()),
            Arc::new(DtmfBuffers::new()),
            rx,
            shutdown_rx,
        )
    }

    #[tokio::test]
    async fn acknowledgement_resolves_via_pending_cache() {
        let c = correlator();
        c.pending.register("5551234", 42, "tok-1");
        let ev = event("Event: OriginateResponse\r\nResponse: Success\r\nActionID: tok-1");
        let resolved = c.resolve(&ev).await.unwrap();
        assert_eq!(resolved, Some((42, "5551234".to_string())));
    }

    #[tokio::test]
    async fn acknowledgement_falls_back_to_store_token_scan() {
        let c = correlator();
        c.store.update(
            42,
            "5551234",
            CallStatus::Dialing,
            "origination issued",
            None,
            Some("tok-2"),
        );
        let ev = event("Event: OriginateResponse\r\nResponse: Failure\r\nActionID: tok-2");
        let resolved = c.resolve(&ev).await.unwrap();
        assert_eq!(resolved, Some((42, "5551234".to_string())));
    }

    #[tokio::test]
    async fn token_matches_only_transient_records() {
        let c = correlator();
        c.store.update(
            42,
            "5551234",
            CallStatus::Completed,
            "done",
            None,
            Some("tok-3"),
        );
        // The event carries the token but the record is settled, and no
        // recipient can be extracted: the ladder yields nothing instead
        // of claiming the finalized record.
        let ev = event("Event: Hangup\r\nActionID: tok-3\r\nCause-txt: User busy");
        let resolved = c.resolve(&ev).await.unwrap();
        assert_eq!(resolved, None);
    }

    #[tokio::test]
    async fn campaign_variable_resolves_without_memory_state() {
        let c = correlator();
        let ev = event(
            "Event: DTMFEnd\r\nDigit: 0\r\nCallerIDNum: 5551234\r\nVariable: CAMPAIGN_ID=77,MEMBER_ID=3",
        );
        let resolved = c.resolve(&ev).await.unwrap();
        assert_eq!(resolved, Some((77, "5551234".to_string())));
    }

    #[tokio::test]
    async fn recipient_with_pending_entry_resolves() {
        let c = correlator();
        c.pending.register("5551234", 55, "tok-9");
        let ev = event("Event: Newstate\r\nChannelStateDesc: Ringing\r\nCallerIDNum: 5551234");
        let resolved = c.resolve(&ev).await.unwrap();
        assert_eq!(resolved, Some((55, "5551234".to_string())));
    }

    #[tokio::test]
    async fn in_memory_transient_record_resolves_recipient() {
        let c = correlator();
        c.store
            .update(61, "5551234", CallStatus::Ringing, "ringing", None, None);
        let ev = event("Event: Newstate\r\nChannelStateDesc: Up\r\nCallerIDNum: 5551234");
        let resolved = c.resolve(&ev).await.unwrap();
        assert_eq!(resolved, Some((61, "5551234".to_string())));
    }

    #[test]
    fn silent_event_types_cover_the_noisy_diagnostics() {
        for t in ["RTCPReceived", "RTCPSent", "ExtensionStatus", "AGIExec", "VarSet", "Bridge"] {
            assert!(SILENT_EVENT_TYPES.contains(&t));
        }
    }
}
