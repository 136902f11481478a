//! Song definition and playback encoding.

use crate::limits::clamp;
use crate::opcode::{PLAY, SONG};
use crate::{DomainError, DomainResult};
use serde::{Deserialize, Serialize};

/// Highest song slot the chassis stores.
pub const MAX_SONG_SLOT: i64 = 4;

/// Most notes a single song slot holds.
pub const MAX_SONG_NOTES: usize = 16;

const MIN_PITCH: i64 = 31;
const MAX_PITCH: i64 = 127;
const MIN_DURATION: i64 = 1;
const MAX_DURATION: i64 = 255;

/// One note as requested by the control plane.
///
/// Values are kept wide here; they are clamped into the chassis range
/// when the song is encoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SongNote {
    /// MIDI pitch (31..=127 after clamping)
    pub note: i64,
    /// Duration in 1/64ths of a second (1..=255 after clamping)
    pub duration: i64,
}

impl SongNote {
    pub fn new(note: i64, duration: i64) -> Self {
        Self { note, duration }
    }

    fn encoded(self) -> [u8; 2] {
        let pitch = u8::try_from(clamp(self.note, MIN_PITCH, MAX_PITCH)).unwrap_or(u8::MAX);
        let duration =
            u8::try_from(clamp(self.duration, MIN_DURATION, MAX_DURATION)).unwrap_or(u8::MAX);
        [pitch, duration]
    }
}

/// Encodes a song definition followed by its play command.
///
/// Returns `(define, play)`; both must be written, in order.
///
/// # Errors
///
/// Returns an error if the slot is outside `0..=4` or the note count is
/// outside `1..=16`.
pub fn encode(slot: i64, notes: &[SongNote]) -> DomainResult<(Vec<u8>, [u8; 2])> {
    if !(0..=MAX_SONG_SLOT).contains(&slot) {
        return Err(DomainError::invalid(
            "song slot",
            format!("{slot} is outside 0..={MAX_SONG_SLOT}"),
        ));
    }
    if notes.is_empty() {
        return Err(DomainError::invalid("song notes", "song requires at least one note"));
    }
    if notes.len() > MAX_SONG_NOTES {
        return Err(DomainError::invalid(
            "song notes",
            format!("{} notes exceeds {MAX_SONG_NOTES}", notes.len()),
        ));
    }

    let slot = u8::try_from(slot).map_err(|_| DomainError::invalid("song slot", "out of range"))?;
    let count = u8::try_from(notes.len())
        .map_err(|_| DomainError::invalid("song notes", "too many notes"))?;

    let mut define = Vec::with_capacity(3 + notes.len() * 2);
    define.extend_from_slice(&[SONG, slot, count]);
    for note in notes {
        define.extend_from_slice(&note.encoded());
    }
    Ok((define, [PLAY, slot]))
}
