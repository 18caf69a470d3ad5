//! The concurrent call state store.
//!
//! One record per (campaign, recipient), guarded as a whole by a single
//! mutex. All reads hand out copies; nothing outside this module ever
//! holds a reference into the map.

use super::status::CallStatus;
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use time::OffsetDateTime;
use tracing::debug;

/// Tracked state of one call attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallRecord {
    pub status: CallStatus,
    pub details: String,
    pub updated_at: OffsetDateTime,
    /// Client-generated token attached to the origination.
    pub action_token: Option<String>,
    /// The signaling channel's id for the call leg, once known.
    pub leg_id: Option<String>,
    /// A finalized record only moves through the documented override
    /// paths.
    pub finalized: bool,
}

/// What [`CallStateStore::update`] did with the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// No record existed; one was created.
    Created,
    /// The update was applied over an existing record.
    Applied,
    /// Manual reset to `waiting`.
    Reset,
    /// The update lost to the merge policy and was dropped.
    Rejected,
}

impl UpdateOutcome {
    pub fn applied(self) -> bool {
        !matches!(self, Self::Rejected)
    }
}

type CampaignCalls = HashMap<String, CallRecord>;

/// Concurrent per-(campaign, recipient) status map.
#[derive(Default)]
pub struct CallStateStore {
    inner: Mutex<HashMap<i64, CampaignCalls>>,
}

impl CallStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<i64, CampaignCalls>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Apply one status update under the merge policy.
    ///
    /// Rules, in order:
    /// - no existing record: create it (finalized when terminal)
    /// - `waiting`: unconditional manual reset
    /// - otherwise allowed when the new significance is strictly higher,
    ///   the status is unchanged (detail refresh), the current status is
    ///   transitional and the new one is a real progression, or one of
    ///   the two finalized-override paths applies (terminal-over-terminal
    ///   "definitive" override, terminal resolution of a record stuck in
    ///   dialing/ringing)
    ///
    /// A `Some` in `leg_id`/`action_token` replaces the stored value;
    /// `None` keeps it.
    pub fn update(
        &self,
        campaign_id: i64,
        phone_number: &str,
        status: CallStatus,
        details: &str,
        leg_id: Option<&str>,
        action_token: Option<&str>,
    ) -> UpdateOutcome {
        let now = OffsetDateTime::now_utc();
        let mut map = self.lock();
        let calls = map.entry(campaign_id).or_default();

        let Some(current) = calls.get_mut(phone_number) else {
            let finalized = status.is_terminal();
            calls.insert(
                phone_number.to_string(),
                CallRecord {
                    status,
                    details: details.to_string(),
                    updated_at: now,
                    action_token: action_token.map(str::to_string),
                    leg_id: leg_id.map(str::to_string),
                    finalized,
                },
            );
            debug!(campaign_id, phone_number, %status, "call record created");
            return UpdateOutcome::Created;
        };

        if status == CallStatus::Waiting {
            current.status = CallStatus::Waiting;
            current.details = details.to_string();
            current.updated_at = now;
            if let Some(token) = action_token {
                current.action_token = Some(token.to_string());
            }
            if let Some(leg) = leg_id {
                current.leg_id = Some(leg.to_string());
            }
            current.finalized = false;
            debug!(campaign_id, phone_number, "call record reset to waiting");
            return UpdateOutcome::Reset;
        }

        let current_significance = current.status.significance();
        let new_significance = status.significance();

        let allow_reason = if new_significance > current_significance {
            Some("higher significance")
        } else if status == current.status {
            Some("detail refresh")
        } else if current.status.is_transitional()
            && !matches!(
                status,
                CallStatus::Pending | CallStatus::Waiting | CallStatus::Unknown
            )
        {
            Some("progression from transitional")
        } else if current.finalized
            && matches!(
                status,
                CallStatus::Completed | CallStatus::OptedOut | CallStatus::Aborted
            )
            && new_significance < current_significance
        {
            Some("definitive override")
        } else if current.finalized
            && matches!(
                status,
                CallStatus::NoAnswer | CallStatus::Busy | CallStatus::Rejected
            )
            && current.status.is_transitional()
        {
            Some("stuck-state override")
        } else {
            None
        };

        let Some(reason) = allow_reason else {
            debug!(
                campaign_id,
                phone_number,
                current = %current.status,
                rejected = %status,
                finalized = current.finalized,
                "update rejected by merge policy"
            );
            return UpdateOutcome::Rejected;
        };

        current.status = status;
        current.details = details.to_string();
        current.updated_at = now;
        if let Some(token) = action_token {
            current.action_token = Some(token.to_string());
        }
        if let Some(leg) = leg_id {
            current.leg_id = Some(leg.to_string());
        }
        current.finalized = status.is_terminal();
        debug!(campaign_id, phone_number, %status, reason, "call record updated");
        UpdateOutcome::Applied
    }

    /// Record the call-leg id learned from an acknowledgement.
    pub fn attach_leg(&self, campaign_id: i64, phone_number: &str, leg_id: &str) {
        let mut map = self.lock();
        if let Some(record) = map
            .get_mut(&campaign_id)
            .and_then(|calls| calls.get_mut(phone_number))
        {
            record.leg_id = Some(leg_id.to_string());
        }
    }

    // -- Point-in-time reads -------------------------------------------

    /// Copy of one record.
    pub fn snapshot(&self, campaign_id: i64, phone_number: &str) -> Option<CallRecord> {
        self.lock()
            .get(&campaign_id)
            .and_then(|calls| calls.get(phone_number))
            .cloned()
    }

    /// Copies of the requested records; absent recipients map to `None`.
    pub fn batch_snapshot(
        &self,
        campaign_id: i64,
        phone_numbers: &[String],
    ) -> HashMap<String, Option<CallRecord>> {
        let map = self.lock();
        let calls = map.get(&campaign_id);
        phone_numbers
            .iter()
            .map(|phone| {
                let record = calls.and_then(|c| c.get(phone)).cloned();
                (phone.clone(), record)
            })
            .collect()
    }

    /// A call is complete when its record is terminal or finalized, or
    /// when no record exists at all (nothing left to wait for).
    pub fn is_complete(&self, campaign_id: i64, phone_number: &str) -> bool {
        match self.snapshot(campaign_id, phone_number) {
            Some(record) => record.status.is_terminal() || record.finalized,
            None => true,
        }
    }

    /// Calls currently on the wire, across all campaigns.
    pub fn in_flight_count(&self) -> usize {
        self.lock()
            .values()
            .flat_map(|calls| calls.values())
            .filter(|r| {
                matches!(
                    r.status,
                    CallStatus::Dialing | CallStatus::Ringing | CallStatus::Answered
                )
            })
            .count()
    }

    /// Recipients of one campaign currently on the wire.
    pub fn in_flight_recipients(&self, campaign_id: i64) -> Vec<String> {
        self.lock()
            .get(&campaign_id)
            .map(|calls| {
                calls
                    .iter()
                    .filter(|(_, r)| {
                        matches!(
                            r.status,
                            CallStatus::Dialing | CallStatus::Ringing | CallStatus::Answered
                        )
                    })
                    .map(|(phone, _)| phone.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn campaign_ids(&self) -> Vec<i64> {
        self.lock().keys().copied().collect()
    }

    pub fn is_campaign_empty(&self, campaign_id: i64) -> bool {
        self.lock()
            .get(&campaign_id)
            .is_none_or(|calls| calls.is_empty())
    }

    // -- Correlation scans ---------------------------------------------

    /// Any record carrying this action token.
    pub fn find_by_action_token(&self, token: &str) -> Option<(i64, String)> {
        self.lock().iter().find_map(|(campaign_id, calls)| {
            calls
                .iter()
                .find(|(_, r)| r.action_token.as_deref() == Some(token))
                .map(|(phone, _)| (*campaign_id, phone.clone()))
        })
    }

    /// A record carrying this token that is still early in its life
    /// (pending/dialing/ringing).
    pub fn find_transient_by_action_token(&self, token: &str) -> Option<(i64, String)> {
        self.lock().iter().find_map(|(campaign_id, calls)| {
            calls
                .iter()
                .find(|(_, r)| {
                    r.action_token.as_deref() == Some(token)
                        && matches!(
                            r.status,
                            CallStatus::Pending | CallStatus::Dialing | CallStatus::Ringing
                        )
                })
                .map(|(phone, _)| (*campaign_id, phone.clone()))
        })
    }

    /// Records in an in-progress state matching this call-leg id.
    pub fn find_by_leg_id(&self, leg_id: &str) -> Vec<(i64, String)> {
        self.lock()
            .iter()
            .flat_map(|(campaign_id, calls)| {
                calls
                    .iter()
                    .filter(|(_, r)| {
                        r.leg_id.as_deref() == Some(leg_id)
                            && matches!(
                                r.status,
                                CallStatus::Dialing | CallStatus::Ringing | CallStatus::Answered
                            )
                    })
                    .map(|(phone, _)| (*campaign_id, phone.clone()))
                    .collect::<Vec<_>>()
            })
            .collect()
    }

    /// The campaign currently dialing this recipient, if any.
    pub fn find_campaign_for_recipient(&self, phone_number: &str) -> Option<i64> {
        self.lock().iter().find_map(|(campaign_id, calls)| {
            calls
                .get(phone_number)
                .filter(|r| {
                    matches!(
                        r.status,
                        CallStatus::Dialing | CallStatus::Ringing | CallStatus::Answered
                    )
                })
                .map(|_| *campaign_id)
        })
    }

    // -- Watchdog support ----------------------------------------------

    /// Recipients of a campaign stuck in dialing/ringing for longer than
    /// `threshold` as of `now`.
    pub fn stuck_transitional(
        &self,
        campaign_id: i64,
        threshold: time::Duration,
        now: OffsetDateTime,
    ) -> Vec<(String, CallRecord)> {
        self.lock()
            .get(&campaign_id)
            .map(|calls| {
                calls
                    .iter()
                    .filter(|(_, r)| r.status.is_transitional() && now - r.updated_at > threshold)
                    .map(|(phone, r)| (phone.clone(), r.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Drop finalized records older than `max_age` as of `now`.
    pub fn remove_finalized_older_than(
        &self,
        campaign_id: i64,
        max_age: time::Duration,
        now: OffsetDateTime,
    ) -> usize {
        let mut map = self.lock();
        let Some(calls) = map.get_mut(&campaign_id) else {
            return 0;
        };
        let before = calls.len();
        calls.retain(|_, r| !(r.finalized && now - r.updated_at > max_age));
        before - calls.len()
    }

    /// Flag every in-flight recipient of a campaign `aborted`.
    ///
    /// Returns the recipients flagged, for the follow-up hangup sweep.
    pub fn mark_aborted(&self, campaign_id: i64, details: &str) -> Vec<String> {
        let recipients = self.in_flight_recipients(campaign_id);
        for phone in &recipients {
            self.update(campaign_id, phone, CallStatus::Aborted, details, None, None);
        }
        recipients
    }

    /// Drop a whole campaign from the store.
    pub fn remove_campaign(&self, campaign_id: i64) {
        self.lock().remove(&campaign_id);
    }

    #[cfg(test)]
    pub(crate) fn backdate(&self, campaign_id: i64, phone_number: &str, by: time::Duration) {
        let mut map = self.lock();
        if let Some(record) = map
            .get_mut(&campaign_id)
            .and_then(|calls| calls.get_mut(phone_number))
        {
            record.updated_at -= by;
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use CallStatus::*;

    const C: i64 = 7;
    const PHONE: &str = "5551234";

    fn store() -> CallStateStore {
        CallStateStore::new()
    }

    #[test]
    fn lifecycle_scenario() {
        let s = store();

        assert_eq!(
            s.update(C, PHONE, Dialing, "origination issued", None, Some("tok-1")),
            UpdateOutcome::Created
        );
        let r = s.snapshot(C, PHONE).unwrap();
        assert!(!r.finalized);

        assert_eq!(
            s.update(C, PHONE, Ringing, "phone is ringing", None, None),
            UpdateOutcome::Applied
        );
        // A stale dialing event arrives late: lower significance, dropped.
        assert_eq!(
            s.update(C, PHONE, Dialing, "stale", None, None),
            UpdateOutcome::Rejected
        );
        assert_eq!(
            s.update(C, PHONE, Answered, "call answered", Some("leg-9"), None),
            UpdateOutcome::Applied
        );
        assert_eq!(
            s.update(C, PHONE, Completed, "Call completed: NORMAL_CLEARING", None, None),
            UpdateOutcome::Applied
        );
        let r = s.snapshot(C, PHONE).unwrap();
        assert!(r.finalized);
        assert_eq!(r.leg_id.as_deref(), Some("leg-9"));
        assert_eq!(r.action_token.as_deref(), Some("tok-1"));

        // Finalized: a late ringing event must bounce off.
        assert_eq!(
            s.update(C, PHONE, Ringing, "late", None, None),
            UpdateOutcome::Rejected
        );
        assert_eq!(s.snapshot(C, PHONE).unwrap().status, Completed);
    }

    #[test]
    fn significance_never_decreases_once_finalized() {
        let s = store();
        s.update(C, PHONE, Busy, "Line busy", None, None);
        for status in [Unknown, Pending, Dialing, Ringing, Answered, DtmfReceived] {
            assert_eq!(
                s.update(C, PHONE, status, "x", None, None),
                UpdateOutcome::Rejected
            );
        }
        assert_eq!(s.snapshot(C, PHONE).unwrap().status, Busy);
    }

    #[test]
    fn waiting_reset_is_unconditional() {
        let s = store();
        s.update(C, PHONE, Rejected, "failed", None, Some("tok-1"));
        assert!(s.snapshot(C, PHONE).unwrap().finalized);

        assert_eq!(
            s.update(C, PHONE, Waiting, "manually reset", None, None),
            UpdateOutcome::Reset
        );
        let r = s.snapshot(C, PHONE).unwrap();
        assert_eq!(r.status, Waiting);
        assert!(!r.finalized);
        // Token survives a reset when the reset carries none.
        assert_eq!(r.action_token.as_deref(), Some("tok-1"));
    }

    #[test]
    fn definitive_override_beats_other_terminals() {
        let s = store();
        s.update(C, PHONE, Busy, "Line busy", None, None);
        // The authoritative disconnect arrives after a misclassified busy.
        assert_eq!(
            s.update(C, PHONE, Completed, "Call completed", None, None),
            UpdateOutcome::Applied
        );
        assert_eq!(s.snapshot(C, PHONE).unwrap().status, Completed);
    }

    #[test]
    fn lateral_terminal_transition_is_blocked() {
        let s = store();
        s.update(C, PHONE, Busy, "Line busy", None, None);
        // busy -> rejected: same significance, not a definitive override.
        assert_eq!(
            s.update(C, PHONE, Rejected, "congestion", None, None),
            UpdateOutcome::Rejected
        );
        assert_eq!(s.snapshot(C, PHONE).unwrap().status, Busy);
    }

    #[test]
    fn same_status_refreshes_details() {
        let s = store();
        s.update(C, PHONE, Dialing, "first", None, Some("tok-1"));
        assert_eq!(
            s.update(C, PHONE, Dialing, "second", None, Some("tok-2")),
            UpdateOutcome::Applied
        );
        let r = s.snapshot(C, PHONE).unwrap();
        assert_eq!(r.details, "second");
        assert_eq!(r.action_token.as_deref(), Some("tok-2"));
    }

    #[test]
    fn concurrent_originations_never_duplicate() {
        // Two racing originations for the same pair: one record exists,
        // the later write lands as a detail refresh, never a second row.
        let s = std::sync::Arc::new(store());
        let a = {
            let s = std::sync::Arc::clone(&s);
            std::thread::spawn(move || s.update(C, PHONE, Dialing, "worker a", None, Some("tok-a")))
        };
        let b = {
            let s = std::sync::Arc::clone(&s);
            std::thread::spawn(move || s.update(C, PHONE, Dialing, "worker b", None, Some("tok-b")))
        };
        let (ra, rb) = (a.join().unwrap(), b.join().unwrap());
        assert!(ra.applied() && rb.applied());
        assert_eq!(
            [ra, rb].iter().filter(|o| **o == UpdateOutcome::Created).count(),
            1
        );
        let records = s.batch_snapshot(C, &[PHONE.to_string()]);
        assert_eq!(records.len(), 1);
        assert!(records[PHONE].is_some());
    }

    #[test]
    fn transitional_records_accept_any_progression() {
        let s = store();
        s.update(C, PHONE, Ringing, "ringing", None, None);
        // noanswer is higher significance anyway, but answered from
        // ringing exercises the transitional path.
        assert_eq!(
            s.update(C, PHONE, Answered, "up", None, None),
            UpdateOutcome::Applied
        );
    }

    #[test]
    fn stuck_transitional_and_cleanup() {
        let s = store();
        let now = OffsetDateTime::now_utc();
        s.update(C, PHONE, Dialing, "origination issued", None, None);
        s.update(C, "5559999", Dialing, "origination issued", None, None);
        s.backdate(C, PHONE, time::Duration::seconds(90));

        let stuck = s.stuck_transitional(C, time::Duration::seconds(60), now);
        assert_eq!(stuck.len(), 1);
        assert_eq!(stuck[0].0, PHONE);

        s.update(C, PHONE, NoAnswer, "stuck call timed out", None, None);
        s.backdate(C, PHONE, time::Duration::minutes(6));
        assert_eq!(
            s.remove_finalized_older_than(C, time::Duration::minutes(5), now),
            1
        );
        assert!(s.snapshot(C, PHONE).is_none());
        // The live dialing record stays.
        assert!(s.snapshot(C, "5559999").is_some());
    }

    #[test]
    fn abort_flags_only_in_flight_calls() {
        let s = store();
        s.update(C, "1001", Dialing, "d", None, None);
        s.update(C, "1002", Answered, "a", None, None);
        s.update(C, "1003", Completed, "done", None, None);

        let mut flagged = s.mark_aborted(C, "Aborted by operator");
        flagged.sort();
        assert_eq!(flagged, vec!["1001".to_string(), "1002".to_string()]);
        assert_eq!(s.snapshot(C, "1001").unwrap().status, Aborted);
        assert_eq!(s.snapshot(C, "1003").unwrap().status, Completed);
    }

    #[test]
    fn correlation_scans() {
        let s = store();
        s.update(C, PHONE, Dialing, "d", Some("leg-1"), Some("tok-1"));
        s.update(9, "5550000", Completed, "done", Some("leg-2"), Some("tok-2"));

        assert_eq!(s.find_by_action_token("tok-1"), Some((C, PHONE.to_string())));
        assert_eq!(s.find_by_action_token("tok-2"), Some((9, "5550000".to_string())));
        // Transient scan skips the completed record.
        assert_eq!(s.find_transient_by_action_token("tok-2"), None);
        assert_eq!(s.find_by_leg_id("leg-1"), vec![(C, PHONE.to_string())]);
        assert!(s.find_by_leg_id("leg-2").is_empty());
        assert_eq!(s.find_campaign_for_recipient(PHONE), Some(C));
        assert_eq!(s.find_campaign_for_recipient("5550000"), None);
    }

    #[test]
    fn absent_record_counts_as_complete() {
        let s = store();
        assert!(s.is_complete(C, PHONE));
        s.update(C, PHONE, Ringing, "r", None, None);
        assert!(!s.is_complete(C, PHONE));
        s.update(C, PHONE, OptedOut, "opted out", None, None);
        assert!(s.is_complete(C, PHONE));
    }
}
