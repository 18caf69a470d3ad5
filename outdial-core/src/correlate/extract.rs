//! Pure extraction heuristics.
//!
//! Each function implements one rung of the ordered fallback ladder the
//! correlator climbs when an event carries no direct correlation key.

use crate::calls::CallStatus;
use outdial_ami::AmiEvent;

/// Recipient number, in priority order: explicit caller-number field,
/// connected-line field, dialed extension, then the channel string.
pub fn recipient_from_event(event: &AmiEvent) -> Option<String> {
    if let Some(n) = event.caller_id_num().filter(|n| is_digits(n)) {
        return Some(n.to_string());
    }
    if let Some(n) = event.connected_line_num().filter(|n| is_digits(n)) {
        return Some(n.to_string());
    }
    if let Some(n) = event.exten().filter(|n| is_digits(n)) {
        return Some(n.to_string());
    }
    event.channel().and_then(recipient_from_channel)
}

/// Parse the dialed number out of a channel string of the form
/// `prefix/<number>@context`.
pub fn recipient_from_channel(channel: &str) -> Option<String> {
    let (_, rest) = channel.split_once('/')?;
    let (number, _) = rest.split_once('@')?;
    is_digits(number).then(|| number.to_string())
}

/// Campaign id, in priority order: explicit campaign variable, a parsed
/// `KEY=VALUE` variable blob, then a numeric user field.
pub fn campaign_from_event(event: &AmiEvent) -> Option<i64> {
    if let Some(id) = event
        .frame()
        .get("CAMPAIGN_ID")
        .and_then(|v| v.parse::<i64>().ok())
    {
        return Some(id);
    }

    for (key, value) in event.frame().fields() {
        if key.eq_ignore_ascii_case("Variable") || key.eq_ignore_ascii_case("ChanVariable") {
            if let Some(id) = campaign_from_variable_blob(value) {
                return Some(id);
            }
        }
    }

    event
        .user_field()
        .filter(|v| is_digits(v))
        .and_then(|v| v.parse::<i64>().ok())
}

/// Find `CAMPAIGN_ID=<n>` inside a comma-separated `KEY=VALUE` blob.
fn campaign_from_variable_blob(blob: &str) -> Option<i64> {
    blob.split(',')
        .filter_map(|var| var.trim().split_once('='))
        .find(|(key, _)| *key == "CAMPAIGN_ID")
        .and_then(|(_, value)| value.trim().parse::<i64>().ok())
}

/// Map a human-readable disconnect cause to a terminal status.
///
/// Case-insensitive substring matching; the check order matters and is
/// part of the observed behavior.
pub fn classify_hangup_cause(cause: &str) -> CallStatus {
    let cause = cause.to_ascii_lowercase();
    if cause.contains("busy") {
        CallStatus::Busy
    } else if cause.contains("no answer") || cause.contains("timeout") {
        CallStatus::NoAnswer
    } else if cause.contains("rejected")
        || cause.contains("congestion")
        || cause.contains("unallocated")
    {
        CallStatus::Rejected
    } else {
        CallStatus::Completed
    }
}

/// The terminal (status, details) for a disconnect, preserving a
/// pre-existing opt-out or abort over cause classification.
pub fn terminal_status_for_hangup(
    current: Option<CallStatus>,
    cause: &str,
) -> (CallStatus, String) {
    match current {
        Some(CallStatus::OptedOut) => (
            CallStatus::OptedOut,
            "Recipient opted out (0# pressed)".to_string(),
        ),
        Some(CallStatus::Aborted) => (
            CallStatus::Aborted,
            "Call aborted by operator".to_string(),
        ),
        _ => match classify_hangup_cause(cause) {
            CallStatus::Busy => (CallStatus::Busy, format!("Line busy: {cause}")),
            CallStatus::NoAnswer => (CallStatus::NoAnswer, format!("No answer/timeout: {cause}")),
            CallStatus::Rejected => (CallStatus::Rejected, format!("Call rejected/failed: {cause}")),
            _ => (CallStatus::Completed, format!("Call completed: {cause}")),
        },
    }
}

fn is_digits(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit())
}

#[cfg(test)]
mod tests {
    use super::*;
    use outdial_ami::AmiFrame;

    fn event(block: &str) -> AmiEvent {
        match AmiEvent::from_frame(AmiFrame::parse(block)) {
            Some(ev) => ev,
            None => unreachable!("test blocks always carry an Event key"),
        }
    }

    #[test]
    fn recipient_priority_order() {
        let ev = event(
            "Event: Newstate\r\nCallerIDNum: 1001\r\nConnectedLineNum: 1002\r\nExten: 1003\r\nChannel: Local/1004@ctx",
        );
        assert_eq!(recipient_from_event(&ev), Some("1001".to_string()));

        let ev = event("Event: Newstate\r\nConnectedLineNum: 1002\r\nExten: 1003");
        assert_eq!(recipient_from_event(&ev), Some("1002".to_string()));

        let ev = event("Event: Newstate\r\nExten: 1003");
        assert_eq!(recipient_from_event(&ev), Some("1003".to_string()));

        let ev = event("Event: Newstate\r\nChannel: Local/1004@from-internal-00000042;1");
        assert_eq!(recipient_from_event(&ev), Some("1004".to_string()));
    }

    #[test]
    fn non_numeric_fields_fall_through() {
        let ev = event("Event: Newstate\r\nCallerIDNum: <unknown>\r\nExten: 1003");
        assert_eq!(recipient_from_event(&ev), Some("1003".to_string()));
    }

    #[test]
    fn channel_parse_rejects_non_numeric() {
        assert_eq!(recipient_from_channel("Local/s@from-internal"), None);
        assert_eq!(recipient_from_channel("no-slash-here"), None);
        assert_eq!(recipient_from_channel("PJSIP/7500@trunk"), Some("7500".to_string()));
    }

    #[test]
    fn campaign_priority_order() {
        let ev = event("Event: VarSet\r\nCAMPAIGN_ID: 42\r\nUserField: 9");
        assert_eq!(campaign_from_event(&ev), Some(42));

        let ev = event(
            "Event: VarSet\r\nVariable: DIAL_NUMBER=5551234,CAMPAIGN_ID=17,MEMBER_ID=3\r\nUserField: 9",
        );
        assert_eq!(campaign_from_event(&ev), Some(17));

        let ev = event("Event: VarSet\r\nUserField: 9");
        assert_eq!(campaign_from_event(&ev), Some(9));

        let ev = event("Event: VarSet\r\nUserField: not-a-number");
        assert_eq!(campaign_from_event(&ev), None);
    }

    #[test]
    fn cause_classification_is_case_insensitive_substring() {
        assert_eq!(classify_hangup_cause("User busy"), CallStatus::Busy);
        assert_eq!(classify_hangup_cause("USER BUSY"), CallStatus::Busy);
        assert_eq!(classify_hangup_cause("No answer"), CallStatus::NoAnswer);
        assert_eq!(classify_hangup_cause("Timeout waiting for answer"), CallStatus::NoAnswer);
        assert_eq!(classify_hangup_cause("Call Rejected"), CallStatus::Rejected);
        assert_eq!(classify_hangup_cause("Circuit congestion"), CallStatus::Rejected);
        assert_eq!(classify_hangup_cause("Unallocated (unassigned) number"), CallStatus::Rejected);
        assert_eq!(classify_hangup_cause("NORMAL_CLEARING"), CallStatus::Completed);
        assert_eq!(classify_hangup_cause(""), CallStatus::Completed);
    }

    #[test]
    fn hangup_preserves_opt_out_and_abort() {
        let (status, _) = terminal_status_for_hangup(Some(CallStatus::OptedOut), "User busy");
        assert_eq!(status, CallStatus::OptedOut);
        let (status, _) = terminal_status_for_hangup(Some(CallStatus::Aborted), "NORMAL_CLEARING");
        assert_eq!(status, CallStatus::Aborted);
        let (status, details) = terminal_status_for_hangup(Some(CallStatus::Answered), "User busy");
        assert_eq!(status, CallStatus::Busy);
        assert!(details.contains("User busy"));
        let (status, _) = terminal_status_for_hangup(None, "NORMAL_CLEARING");
        assert_eq!(status, CallStatus::Completed);
    }
}
