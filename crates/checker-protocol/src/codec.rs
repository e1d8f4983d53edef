//! Binary codec for door checker telemetry frames.
//!
//! The transport is a WebSocket, which preserves message boundaries. The
//! welcome frame therefore carries the identity without a length prefix: the
//! end of the message is the end of the identity. Carrying these frames over a
//! byte stream (plain TCP, serial) would need a length prefix added in front
//! of the identity.
//!
//! Layout (all multi-byte integers big-endian):
//!
//! | Offset | Welcome         | DoorState              |
//! |--------|-----------------|------------------------|
//! | 0      | `0x01`          | `0x02`                 |
//! | 1      | device type     | `(open << 4) \| battery` |
//! | 2      | battery (0-15)  | elapsed ms, MSB        |
//! | 3..    | identity bytes  | elapsed ms, bytes 2..0 |

use checker_core::{DeviceIdentity, DeviceType};
use thiserror::Error;

use crate::framing::{
    clamp_battery, join_u32_be, pack_state_nibbles, split_u32_be, unpack_state_nibbles,
};
use crate::messages::{AckOutcome, ClientFrame, Frame, FrameType};

/// Length of the welcome frame header preceding the identity.
pub const WELCOME_HEADER_LEN: usize = 3;

/// Total length of a door-state frame.
pub const DOOR_STATE_FRAME_LEN: usize = 6;

/// Errors that can occur while decoding a device frame.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    /// The message carried no bytes.
    #[error("Empty frame")]
    Empty,

    /// Byte 0 is not a known frame type.
    #[error("Unknown frame type 0x{0:02x}")]
    UnknownFrameType(u8),

    /// The frame is shorter or longer than its type requires.
    #[error("Invalid {kind:?} frame length {actual}, expected {expected}")]
    InvalidLength {
        kind: FrameType,
        expected: usize,
        actual: usize,
    },

    /// Byte 1 of a welcome frame is not a known device type.
    #[error("Unknown device type 0x{0:02x}")]
    UnknownDeviceType(u8),

    /// The upper battery nibble of a welcome frame is reserved and must be zero.
    #[error("Reserved battery bits set: 0x{0:02x}")]
    ReservedBits(u8),

    /// A welcome frame carried no identity.
    #[error("Welcome frame has no identity")]
    EmptyIdentity,

    /// The identity is not valid UTF-8.
    #[error("Identity is not valid UTF-8")]
    InvalidIdentity,
}

/// Encode the welcome frame announcing this device.
///
/// The resulting frame is always `3 + identity.len()` bytes long. The
/// identity cannot be empty, since [`DeviceIdentity`] rejects that at
/// construction.
pub fn encode_welcome(identity: &DeviceIdentity, device_type: DeviceType, battery: u8) -> Frame {
    let id = identity.as_bytes();
    let mut bytes = Vec::with_capacity(WELCOME_HEADER_LEN + id.len());
    bytes.push(FrameType::Welcome.tag());
    bytes.push(device_type.code());
    bytes.push(clamp_battery(battery));
    bytes.extend_from_slice(id);
    Frame::new(FrameType::Welcome, bytes)
}

/// Encode a door-state frame.
///
/// `elapsed_ms` is the time since the door last changed state, not a wall
/// clock. The server adds it to its own receipt time.
pub fn encode_door_state(open: bool, battery: u8, elapsed_ms: u32) -> Frame {
    let mut bytes = Vec::with_capacity(DOOR_STATE_FRAME_LEN);
    bytes.push(FrameType::DoorState.tag());
    bytes.push(pack_state_nibbles(open, battery));
    bytes.extend_from_slice(&split_u32_be(elapsed_ms));
    Frame::new(FrameType::DoorState, bytes)
}

/// Compare a text acknowledgment from the server with our identity.
pub fn decode_ack(payload: &str, identity: &DeviceIdentity) -> AckOutcome {
    if identity.matches(payload) {
        AckOutcome::Accepted
    } else {
        AckOutcome::Mismatch {
            received: payload.to_string(),
        }
    }
}

/// Decode a device frame. This is the server's side of the protocol.
pub fn decode_frame(bytes: &[u8]) -> Result<ClientFrame, CodecError> {
    let (&tag, rest) = bytes.split_first().ok_or(CodecError::Empty)?;
    let kind = FrameType::from_tag(tag).ok_or(CodecError::UnknownFrameType(tag))?;

    match kind {
        FrameType::Welcome => {
            if bytes.len() < WELCOME_HEADER_LEN {
                return Err(CodecError::InvalidLength {
                    kind,
                    expected: WELCOME_HEADER_LEN + 1,
                    actual: bytes.len(),
                });
            }
            let device_type =
                DeviceType::from_code(rest[0]).ok_or(CodecError::UnknownDeviceType(rest[0]))?;
            let battery = rest[1];
            if battery & 0xF0 != 0 {
                return Err(CodecError::ReservedBits(battery));
            }
            let identity = &rest[2..];
            if identity.is_empty() {
                return Err(CodecError::EmptyIdentity);
            }
            let identity =
                std::str::from_utf8(identity).map_err(|_| CodecError::InvalidIdentity)?;
            Ok(ClientFrame::Welcome {
                device_type,
                battery,
                identity: identity.to_string(),
            })
        }
        FrameType::DoorState => {
            if bytes.len() != DOOR_STATE_FRAME_LEN {
                return Err(CodecError::InvalidLength {
                    kind,
                    expected: DOOR_STATE_FRAME_LEN,
                    actual: bytes.len(),
                });
            }
            let (open, battery) = unpack_state_nibbles(rest[0]);
            let elapsed_ms = join_u32_be([rest[1], rest[2], rest[3], rest[4]]);
            Ok(ClientFrame::DoorState {
                open,
                battery,
                elapsed_ms,
            })
        }
    }
}
