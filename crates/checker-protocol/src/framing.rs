//! Bit-layout helpers shared by the frame encoders and decoders.
//!
//! Both frame types carry a battery nibble and the door-state frame packs the
//! open flag next to it. Keeping the packing in one place means the welcome
//! and door-state encoders cannot disagree about the layout.

use checker_core::MAX_BATTERY_LEVEL;

/// Clamp a raw battery value into the 4-bit wire range.
///
/// Values above 15 become 15. Masking would wrap 16 to 0 and report an empty
/// battery for a full one.
pub fn clamp_battery(raw: u8) -> u8 {
    raw.min(MAX_BATTERY_LEVEL)
}

/// Pack the open flag into the high nibble and the battery into the low one.
pub fn pack_state_nibbles(open: bool, battery: u8) -> u8 {
    (u8::from(open) << 4) | clamp_battery(battery)
}

/// Inverse of [`pack_state_nibbles`]. Any non-zero high nibble reads as open.
pub fn unpack_state_nibbles(byte: u8) -> (bool, u8) {
    (byte >> 4 != 0, byte & 0x0F)
}

/// Split a 32-bit value into big-endian bytes.
pub fn split_u32_be(value: u32) -> [u8; 4] {
    value.to_be_bytes()
}

/// Join four big-endian bytes into a 32-bit value.
pub fn join_u32_be(bytes: [u8; 4]) -> u32 {
    u32::from_be_bytes(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clamp_never_wraps() {
        for raw in 0..=15u8 {
            assert_eq!(clamp_battery(raw), raw);
        }
        for raw in 16..=255u8 {
            assert_eq!(clamp_battery(raw), 15, "battery {raw} must clamp");
        }
    }

    #[test]
    fn test_state_nibbles() {
        assert_eq!(pack_state_nibbles(true, 3), 0x13);
        assert_eq!(pack_state_nibbles(false, 9), 0x09);
        assert_eq!(pack_state_nibbles(true, 200), 0x1F);

        assert_eq!(unpack_state_nibbles(0x13), (true, 3));
        assert_eq!(unpack_state_nibbles(0x0F), (false, 15));
    }

    #[test]
    fn test_u32_big_endian() {
        assert_eq!(split_u32_be(0x0001_1170), [0x00, 0x01, 0x11, 0x70]);
        assert_eq!(join_u32_be([0x00, 0x01, 0x11, 0x70]), 70_000);

        for value in [0, 1, 0xFF, 0x100, 0x00FF_FF00, 0x8000_0000, u32::MAX] {
            assert_eq!(join_u32_be(split_u32_be(value)), value);
        }
    }
}
