//! AMI wire protocol types.
//!
//! A block on the wire is a sequence of `Key: Value` lines, each
//! terminated by CRLF, with a blank line ending the block:
//!
//! ```text
//! Action: Originate\r\n
//! Channel: Local/5551234@from-internal\r\n
//! ...\r\n
//! \r\n
//! ```
//!
//! Inbound blocks carrying an `Event` key are events; blocks carrying a
//! `Response` key are replies to actions.

pub mod action;
pub mod event;
pub mod frame;

pub use action::{AmiAction, OriginateRequest};
pub use event::AmiEvent;
pub use frame::{AmiFrame, BLOCK_TERMINATOR};
