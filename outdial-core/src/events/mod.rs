//! Event channel infrastructure.
//!
//! The connection listener dispatches events synchronously; a small
//! registered handler forwards them into an `mpsc` channel so the
//! correlator can do its database work off the listener task. The
//! signaling stream is lossy by contract, so a full channel drops the
//! event rather than blocking the listener.

use outdial_ami::AmiEvent;
use tokio::sync::mpsc;

/// Buffer for the event channel; enough for bursts while keeping memory
/// bounded.
pub const DEFAULT_CHANNEL_BUFFER: usize = 256;

/// Sender handle for control-channel events.
pub type AmiEventSender = mpsc::Sender<AmiEvent>;
/// Receiver handle for control-channel events.
pub type AmiEventReceiver = mpsc::Receiver<AmiEvent>;

/// Create the control-channel event pipe.
pub fn ami_event_channel() -> (AmiEventSender, AmiEventReceiver) {
    mpsc::channel(DEFAULT_CHANNEL_BUFFER)
}
