//! Frame types for the door checker telemetry protocol.
//!
//! This module defines the messages exchanged over the WebSocket:
//! - Device → Server: Welcome, DoorState (binary frames)
//! - Server → Device: identity acknowledgment (text frame)
//!
//! Outbound frames are opaque byte buffers produced by the codec. They are
//! fire-and-forget and never retained after transmission.

use checker_core::DeviceType;

/// Protocol type tag carried in byte 0 of every outbound frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum FrameType {
    /// Identity announcement sent right after the transport opens.
    Welcome,
    /// Door open/closed report.
    DoorState,
}

impl FrameType {
    pub fn tag(self) -> u8 {
        match self {
            FrameType::Welcome => 0x01,
            FrameType::DoorState => 0x02,
        }
    }

    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0x01 => Some(FrameType::Welcome),
            0x02 => Some(FrameType::DoorState),
            _ => None,
        }
    }
}

/// An encoded outbound frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    kind: FrameType,
    bytes: Vec<u8>,
}

impl Frame {
    pub(crate) fn new(kind: FrameType, bytes: Vec<u8>) -> Self {
        debug_assert_eq!(bytes.first(), Some(&kind.tag()));
        Self { kind, bytes }
    }

    pub fn frame_type(&self) -> FrameType {
        self.kind
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}

/// A device frame as seen by the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientFrame {
    Welcome {
        device_type: DeviceType,
        battery: u8,
        identity: String,
    },
    DoorState {
        open: bool,
        battery: u8,
        elapsed_ms: u32,
    },
}

/// Result of comparing a server acknowledgment with the device identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AckOutcome {
    /// The server echoed the identity unchanged.
    Accepted,
    /// The server answered with a different payload.
    Mismatch { received: String },
}

impl AckOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, AckOutcome::Accepted)
    }
}
