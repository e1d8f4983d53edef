//! # checker-protocol
//!
//! Door checker telemetry frames and codec.
//!
//! This crate defines the binary frames a checker sends over its WebSocket and
//! the text acknowledgment it expects back. Everything here is pure: no I/O,
//! no clocks.

pub mod codec;
pub mod framing;
pub mod messages;

pub use codec::*;
pub use messages::*;
