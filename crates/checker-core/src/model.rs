//! Door checker data model types.
//!
//! These types describe what the device knows about itself and what it reports:
//! - Device identity and device type sent in the welcome handshake
//! - Door state snapshots and battery level sent in telemetry frames
//! - The connection lifecycle state owned by the connection supervisor

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Highest battery level representable on the wire (4-bit field).
pub const MAX_BATTERY_LEVEL: u8 = 0x0F;

/// Errors raised when constructing model values.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ModelError {
    /// The device identity is empty, so the device cannot authenticate.
    #[error("Device identity cannot be empty")]
    EmptyIdentity,
}

/// Stable identifier of this device.
///
/// The identity is the only token presented to the server in the welcome
/// handshake, and the server acknowledges by echoing it back verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DeviceIdentity(String);

impl DeviceIdentity {
    /// Create an identity, rejecting the empty string.
    pub fn new(id: impl Into<String>) -> Result<Self, ModelError> {
        let id = id.into();
        if id.is_empty() {
            return Err(ModelError::EmptyIdentity);
        }
        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }

    /// Byte-for-byte comparison against an acknowledgment payload.
    pub fn matches(&self, payload: &str) -> bool {
        self.0.as_bytes() == payload.as_bytes()
    }
}

impl TryFrom<String> for DeviceIdentity {
    type Error = ModelError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<DeviceIdentity> for String {
    fn from(id: DeviceIdentity) -> Self {
        id.0
    }
}

impl fmt::Display for DeviceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Kind of device announced in the welcome frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[non_exhaustive]
pub enum DeviceType {
    /// Door open/closed checker.
    #[default]
    Checker,
    /// Switch-style actuator.
    Switch,
}

impl DeviceType {
    /// Wire discriminator for this device type.
    pub fn code(self) -> u8 {
        match self {
            DeviceType::Checker => 0x01,
            DeviceType::Switch => 0x02,
        }
    }

    /// Look up a device type by its wire discriminator.
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0x01 => Some(DeviceType::Checker),
            0x02 => Some(DeviceType::Switch),
            _ => None,
        }
    }
}

/// Battery level on the 0-15 scale used by the wire protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct BatteryLevel(u8);

impl BatteryLevel {
    /// Create a level from a raw 0-15 value. Values above 15 saturate.
    pub fn new(raw: u8) -> Self {
        Self(raw.min(MAX_BATTERY_LEVEL))
    }

    /// Map a 0-100 percentage onto the 0-15 scale.
    ///
    /// Percentages above 100 are treated as 100.
    pub fn from_percent(percent: u8) -> Self {
        let percent = u16::from(percent.min(100));
        Self((percent * u16::from(MAX_BATTERY_LEVEL) / 100) as u8)
    }

    pub fn value(self) -> u8 {
        self.0
    }
}

/// Snapshot of the door sensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DoorState {
    /// Whether the door is currently open.
    pub open: bool,
    /// Monotonic time of the last open/closed transition.
    pub update_time: Instant,
}

impl DoorState {
    pub fn new(open: bool, update_time: Instant) -> Self {
        Self { open, update_time }
    }

    /// Milliseconds since the last transition, measured at `now`.
    ///
    /// Saturates at `u32::MAX` (about 49 days) and at zero if `now` precedes
    /// the transition.
    pub fn elapsed_ms(&self, now: Instant) -> u32 {
        let elapsed = now
            .checked_duration_since(self.update_time)
            .unwrap_or(Duration::ZERO);
        u32::try_from(elapsed.as_millis()).unwrap_or(u32::MAX)
    }
}

/// Lifecycle state of the telemetry connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ConnectionState {
    /// No valid WiFi credentials; waiting for the provisioning portal.
    Unprovisioned,
    /// Provisioned but not connected; a retry is pending.
    Disconnected,
    /// A connection attempt is in flight.
    Connecting,
    /// Transport is open and the welcome frame was sent.
    AwaitingAck,
    /// The server acknowledged the identity; telemetry flows.
    Active,
}

impl ConnectionState {
    pub fn is_active(self) -> bool {
        self == ConnectionState::Active
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Unprovisioned => "unprovisioned",
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::AwaitingAck => "awaiting-ack",
            ConnectionState::Active => "active",
        };
        f.write_str(name)
    }
}
