//! Event correlation.
//!
//! Maps each inbound control-channel event back to a
//! (campaign, recipient) pair and applies the status transition. The
//! identity and campaign extraction heuristics live in [`extract`] as
//! ordered, independently testable pure functions; [`correlator`] holds
//! the processor that runs the full resolution pipeline.

pub mod correlator;
pub mod extract;

pub use correlator::{CorrelateError, CorrelatorHandle, EventCorrelator};
pub use extract::{campaign_from_event, classify_hangup_cause, recipient_from_event};
