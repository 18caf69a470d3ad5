//! Per-call status and its significance hierarchy.

use serde::Serialize;

/// Status of one call attempt.
///
/// Signaling events arrive duplicated and out of order; the store only
/// lets a record move to a status of equal or higher *significance*
/// (with two documented override paths), so a stale `ringing` can never
/// clobber a call that already answered or completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CallStatus {
    Unknown,
    Pending,
    /// Manual operator reset; accepted unconditionally.
    Waiting,
    Dialing,
    Ringing,
    Answered,
    DtmfReceived,
    Completed,
    OptedOut,
    NoAnswer,
    Busy,
    Rejected,
    Aborted,
}

impl CallStatus {
    /// Position in the significance hierarchy. The four terminal failure
    /// causes intentionally share the top slot: once one of them lands,
    /// lateral movement between them is blocked.
    pub fn significance(self) -> u8 {
        match self {
            Self::Unknown => 0,
            Self::Pending => 1,
            Self::Waiting => 2,
            Self::Dialing => 10,
            Self::Ringing => 20,
            Self::Answered => 50,
            Self::DtmfReceived => 60,
            Self::Completed => 70,
            Self::OptedOut => 80,
            Self::NoAnswer | Self::Busy | Self::Rejected | Self::Aborted => 90,
        }
    }

    /// Terminal statuses finalize the record.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Completed
                | Self::NoAnswer
                | Self::Busy
                | Self::Rejected
                | Self::Aborted
                | Self::OptedOut
        )
    }

    /// A call still waiting on the network to progress.
    pub fn is_transitional(self) -> bool {
        matches!(self, Self::Dialing | Self::Ringing)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Pending => "pending",
            Self::Waiting => "waiting",
            Self::Dialing => "dialing",
            Self::Ringing => "ringing",
            Self::Answered => "answered",
            Self::DtmfReceived => "dtmf_received",
            Self::Completed => "completed",
            Self::OptedOut => "opted_out",
            Self::NoAnswer => "noanswer",
            Self::Busy => "busy",
            Self::Rejected => "rejected",
            Self::Aborted => "aborted",
        }
    }
}

impl std::fmt::Display for CallStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hierarchy_is_ordered() {
        use CallStatus::*;
        let ordered = [Unknown, Pending, Waiting, Dialing, Ringing, Answered, DtmfReceived, Completed, OptedOut];
        for pair in ordered.windows(2) {
            assert!(pair[0].significance() < pair[1].significance());
        }
        for terminal in [NoAnswer, Busy, Rejected, Aborted] {
            assert_eq!(terminal.significance(), 90);
            assert!(terminal.significance() > OptedOut.significance());
        }
    }

    #[test]
    fn terminal_and_transitional_sets() {
        use CallStatus::*;
        for s in [Completed, NoAnswer, Busy, Rejected, Aborted, OptedOut] {
            assert!(s.is_terminal());
        }
        for s in [Unknown, Pending, Waiting, Dialing, Ringing, Answered, DtmfReceived] {
            assert!(!s.is_terminal());
        }
        assert!(Dialing.is_transitional() && Ringing.is_transitional());
        assert!(!Answered.is_transitional());
    }
}
