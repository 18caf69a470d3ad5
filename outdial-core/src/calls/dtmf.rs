//! Keypad input accumulation and opt-out detection.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use time::OffsetDateTime;
use tracing::debug;

/// The fixed opt-out sequence. Detection is exact equality — `00#` does
/// not opt out.
pub const OPT_OUT_SEQUENCE: &str = "0#";

/// Digits further apart than this start a fresh buffer.
const DIGIT_GAP: time::Duration = time::Duration::seconds(2);

/// Result of feeding one digit into a recipient's buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DtmfOutcome {
    /// Digit buffered; current buffer contents returned for logging.
    Accumulated(String),
    /// The opt-out sequence completed; the buffer has been cleared.
    OptOut,
}

#[derive(Debug)]
struct DtmfState {
    buffer: String,
    last_digit_at: OffsetDateTime,
}

/// Per-recipient keypad buffers. Lock is independent of the call state
/// store.
#[derive(Default)]
pub struct DtmfBuffers {
    inner: Mutex<HashMap<String, DtmfState>>,
}

impl DtmfBuffers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one digit observed for a recipient.
    pub fn push_digit(&self, phone_number: &str, digit: &str) -> DtmfOutcome {
        self.push_digit_at(phone_number, digit, OffsetDateTime::now_utc())
    }

    fn push_digit_at(&self, phone_number: &str, digit: &str, now: OffsetDateTime) -> DtmfOutcome {
        let mut map = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let state = map
            .entry(phone_number.to_string())
            .or_insert_with(|| DtmfState {
                buffer: String::new(),
                last_digit_at: now,
            });

        if state.buffer.is_empty() || now - state.last_digit_at > DIGIT_GAP {
            state.buffer = digit.to_string();
        } else {
            state.buffer.push_str(digit);
        }
        state.last_digit_at = now;

        if state.buffer == OPT_OUT_SEQUENCE {
            debug!(phone_number, "opt-out sequence detected");
            state.buffer.clear();
            return DtmfOutcome::OptOut;
        }
        DtmfOutcome::Accumulated(state.buffer.clone())
    }

    /// Drop a recipient's buffer.
    pub fn clear(&self, phone_number: &str) {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(phone_number);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PHONE: &str = "5551234";

    fn ts(offset_secs: f64) -> OffsetDateTime {
        OffsetDateTime::UNIX_EPOCH + time::Duration::seconds_f64(1_700_000_000.0 + offset_secs)
    }

    #[test]
    fn sequence_within_gap_triggers_exactly_once() {
        let buffers = DtmfBuffers::new();
        assert_eq!(
            buffers.push_digit_at(PHONE, "0", ts(0.0)),
            DtmfOutcome::Accumulated("0".into())
        );
        assert_eq!(buffers.push_digit_at(PHONE, "#", ts(1.5)), DtmfOutcome::OptOut);
        // Buffer was cleared: the next digit starts fresh.
        assert_eq!(
            buffers.push_digit_at(PHONE, "#", ts(2.0)),
            DtmfOutcome::Accumulated("#".into())
        );
    }

    #[test]
    fn gap_resets_instead_of_appending() {
        let buffers = DtmfBuffers::new();
        buffers.push_digit_at(PHONE, "0", ts(0.0));
        // 2.5s later: the 0 is forgotten, # stands alone.
        assert_eq!(
            buffers.push_digit_at(PHONE, "#", ts(2.5)),
            DtmfOutcome::Accumulated("#".into())
        );
    }

    #[test]
    fn exactly_two_seconds_still_appends() {
        let buffers = DtmfBuffers::new();
        buffers.push_digit_at(PHONE, "0", ts(0.0));
        assert_eq!(buffers.push_digit_at(PHONE, "#", ts(2.0)), DtmfOutcome::OptOut);
    }

    #[test]
    fn longer_buffer_is_not_an_opt_out() {
        let buffers = DtmfBuffers::new();
        buffers.push_digit_at(PHONE, "0", ts(0.0));
        buffers.push_digit_at(PHONE, "0", ts(0.5));
        // Buffer is "00#", not the exact sequence.
        assert_eq!(
            buffers.push_digit_at(PHONE, "#", ts(1.0)),
            DtmfOutcome::Accumulated("00#".into())
        );
    }

    #[test]
    fn buffers_are_per_recipient() {
        let buffers = DtmfBuffers::new();
        buffers.push_digit_at("1001", "0", ts(0.0));
        assert_eq!(
            buffers.push_digit_at("1002", "#", ts(0.5)),
            DtmfOutcome::Accumulated("#".into())
        );
    }
}
