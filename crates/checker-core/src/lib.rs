//! # checker-core
//!
//! Core data model and collaborator interfaces for the door checker.
//!
//! This crate provides:
//! - Model types (DeviceIdentity, DoorState, BatteryLevel, ConnectionState)
//! - The credential store trait and an in-memory implementation
//! - The device state source trait and a shared in-memory implementation
//!
//! This crate is intentionally runtime-agnostic and contains no async code,
//! making it usable on both Linux (tokio) and embedded targets.

pub mod config;
pub mod model;
pub mod sensor;

pub use config::{
    resolve_server_url, valid_credentials, ConfigError, CredentialStore,
    MemoryCredentialStore, StoredConfig, WifiCredentials, DEFAULT_SERVER_URL,
};
pub use model::*;
pub use sensor::{DeviceStateSource, SharedDeviceState};
