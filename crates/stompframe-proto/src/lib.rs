//! Stompframe wire protocol.
//!
//! Text frames modelled on STOMP 1.2:
//!
//! ```text
//! COMMAND
//! name:value
//!
//! body^@
//! ```
//!
//! This crate holds the [`Frame`] value type, the [`Command`] vocabulary, the
//! well-known header names in [`headers`], and [`StompCodec`], which turns a
//! byte stream into frames and back. It performs no validation of required
//! headers; that is the server dispatcher's job.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod codec;
mod command;
mod errors;
mod frame;
pub mod headers;

pub use codec::{DEFAULT_MAX_FRAME_SIZE, StompCodec};
pub use command::Command;
pub use errors::{ProtocolError, Result};
pub use frame::Frame;
