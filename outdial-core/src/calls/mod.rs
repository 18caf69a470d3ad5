//! In-memory call tracking.
//!
//! Everything in this module is ephemeral process state: the per-call
//! status store, the pre-origination correlation cache, and the keypad
//! input buffers. Each structure has its own independent lock; no
//! cross-structure lock ordering exists anywhere in the crate.

pub mod dtmf;
pub mod pending;
pub mod status;
pub mod store;

pub use dtmf::{DtmfBuffers, DtmfOutcome};
pub use pending::PendingCorrelations;
pub use status::CallStatus;
pub use store::{CallRecord, CallStateStore, UpdateOutcome};
