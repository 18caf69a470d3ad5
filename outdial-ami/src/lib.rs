//! Asterisk Manager Interface (AMI) wire protocol and control-channel client.
//!
//! The AMI control channel is a persistent TCP connection exchanging
//! CRLF-terminated `Key: Value` blocks, each terminated by a blank line.
//! This crate provides:
//!
//! - [`proto`] — frame parsing/serialization, action builders, and the
//!   parsed event type
//! - [`client`] — the connection client with its background listener,
//!   and the supervisor that owns connection rotation and retrying sends
//!
//! The crate is deliberately free of any persistence or campaign logic;
//! consumers register [`client::AmiEventHandler`]s and react to the
//! event stream.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![forbid(unsafe_code)]

pub mod client;
pub mod error;
pub mod proto;

pub use client::{AmiClient, AmiConfig, AmiEventHandler, AmiSupervisor, HandlerError};
pub use error::AmiError;
pub use proto::{AmiAction, AmiEvent, AmiFrame, OriginateRequest};
