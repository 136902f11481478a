//! Chassis open-interface opcodes and pure byte encoders.
//!
//! Every encoder returns the exact byte sequence to write on the serial
//! line. None of them perform I/O; the daemon's chassis adapter owns the
//! port and decides when to write.

use crate::{DomainError, DomainResult};

/// Starts the open interface. Always the first byte of a kickstart.
pub const START: u8 = 128;
/// Puts the chassis in safe mode.
pub const SAFE: u8 = 131;
/// Puts the chassis in full mode.
pub const FULL: u8 = 132;
/// Defines a song in one of the song slots.
pub const SONG: u8 = 140;
/// Plays a previously defined song slot.
pub const PLAY: u8 = 141;
/// Asks the chassis to drive back to its dock.
pub const SEEK_DOCK: u8 = 143;
/// Sets brush and vacuum motor PWM.
pub const MOTOR_PWM: u8 = 144;
/// Sets wheel velocities independently.
pub const DRIVE_DIRECT: u8 = 145;
/// Starts a periodic sensor stream.
pub const STREAM: u8 = 148;
/// Pauses or resumes the sensor stream.
pub const PAUSE_RESUME_STREAM: u8 = 150;

/// Returns true when `opcode` changes the chassis operating mode.
///
/// A mode change stops any running sensor stream, so raw commands that
/// start with one of these must be followed by a stream restart.
#[must_use]
pub fn is_mode_change(opcode: u8) -> bool {
    matches!(opcode, START | SAFE | FULL)
}

/// `[128]`
pub fn start() -> [u8; 1] {
    [START]
}

/// `[143]`
pub fn seek_dock() -> [u8; 1] {
    [SEEK_DOCK]
}

/// Encodes independent wheel velocities.
///
/// Right wheel first, each value big-endian. Callers clamp to the
/// configured speed limit before encoding.
pub fn drive_direct(left: i16, right: i16) -> [u8; 5] {
    let [r_hi, r_lo] = right.to_be_bytes();
    let [l_hi, l_lo] = left.to_be_bytes();
    [DRIVE_DIRECT, r_hi, r_lo, l_hi, l_lo]
}

/// Encodes brush and vacuum PWM. Signed brush values go out as two's complement.
pub fn motor_pwm(main_brush: i8, side_brush: i8, vacuum: u8) -> [u8; 4] {
    let [main] = main_brush.to_be_bytes();
    let [side] = side_brush.to_be_bytes();
    [MOTOR_PWM, main, side, vacuum]
}

/// Encodes a stream request for the given packet ids.
///
/// # Errors
///
/// Returns an error if `packet_ids` is empty or longer than a single
/// length byte can describe.
pub fn start_stream(packet_ids: &[u8]) -> DomainResult<Vec<u8>> {
    if packet_ids.is_empty() {
        return Err(DomainError::invalid(
            "packet ids",
            "stream requires at least one packet id",
        ));
    }
    let count = u8::try_from(packet_ids.len())
        .map_err(|_| DomainError::invalid("packet ids", "too many packet ids"))?;

    let mut bytes = Vec::with_capacity(packet_ids.len() + 2);
    bytes.push(STREAM);
    bytes.push(count);
    bytes.extend_from_slice(packet_ids);
    Ok(bytes)
}

/// `[150, 0]` pauses the stream, `[150, 1]` resumes it.
pub fn pause_stream(paused: bool) -> [u8; 2] {
    [PAUSE_RESUME_STREAM, if paused { 0 } else { 1 }]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_drive_direct_byte_order() {
        // right=100 -> 0x0064, left=-100 -> 0xFF9C
        assert_eq!(drive_direct(-100, 100), [145, 0x00, 0x64, 0xFF, 0x9C]);
    }

    #[test]
    fn test_drive_direct_limits() {
        assert_eq!(drive_direct(500, -500), [145, 0xFE, 0x0C, 0x01, 0xF4]);
    }

    #[test]
    fn test_motor_pwm_negative_brush() {
        assert_eq!(motor_pwm(-127, 127, 127), [144, 0x81, 0x7F, 0x7F]);
        assert_eq!(motor_pwm(0, 0, 0), [144, 0, 0, 0]);
    }

    #[test]
    fn test_start_stream() {
        assert_eq!(
            start_stream(&[100, 21, 34]).ok(),
            Some(vec![148, 3, 100, 21, 34])
        );
    }

    #[test]
    fn test_start_stream_rejects_empty() {
        assert!(matches!(
            start_stream(&[]),
            Err(DomainError::InvalidArgument { .. })
        ));
    }

    #[test]
    fn test_pause_stream() {
        assert_eq!(pause_stream(true), [150, 0]);
        assert_eq!(pause_stream(false), [150, 1]);
    }

    #[test]
    fn test_mode_change_opcodes() {
        assert!(is_mode_change(128));
        assert!(is_mode_change(131));
        assert!(is_mode_change(132));
        assert!(!is_mode_change(145));
        assert!(!is_mode_change(0));
    }
}
