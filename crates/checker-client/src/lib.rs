//! # checker-client
//!
//! Connection supervisor and telemetry client for the door checker.
//!
//! The [`supervisor`] module holds the runtime-independent lifecycle state
//! machine. Enable features based on target platform:
//! - `tokio-runtime` (default) - WebSocket driver for Linux/desktop

pub mod config;
pub mod error;
pub mod supervisor;

#[cfg(feature = "tokio-runtime")]
pub mod client;

pub use checker_core::{ConnectionState, DeviceIdentity, DoorState};
pub use config::{ClientConfig, ReconnectPolicy};
pub use error::ClientError;
pub use supervisor::{Action, Event, Supervisor, TransportErrorKind};

#[cfg(feature = "tokio-runtime")]
pub use client::{TelemetryClient, TelemetryHandle};
