//! Telemetry frames and sensor sample decoding.
//!
//! A frame on the wire is `[19, n, payload(n), checksum]` where the sum of
//! every byte, checksum included, is zero modulo 256. The payload is a run
//! of `(packet id, value)` entries whose value sizes come from a
//! [`PacketTable`].

use crate::{DomainError, DomainResult};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// First byte of every telemetry frame.
pub const SENSOR_HEADER: u8 = 19;

/// Packet group requested from the chassis unless configured otherwise.
pub const DEFAULT_STREAM_PACKETS: [u8; 3] = [
    PACKET_GROUP_100,
    PACKET_CHARGING_STATE,
    PACKET_CHARGE_SOURCES,
];

/// Group packet bundling bumpers, cliff sensors, encoders and battery.
pub const PACKET_GROUP_100: u8 = 100;
/// Charging state, one byte.
pub const PACKET_CHARGING_STATE: u8 = 21;
/// Charge sources available bitmask, one byte.
pub const PACKET_CHARGE_SOURCES: u8 = 34;

/// Bit set in the charge-sources mask while the chassis sits on its dock.
pub const CHARGE_SOURCE_HOME_BASE: u8 = 1 << 1;

// ============================================================================
// Checksum
// ============================================================================

/// Wrapping byte sum. A valid frame sums to zero.
#[must_use]
pub fn checksum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0u8, |acc, b| acc.wrapping_add(*b))
}

// ============================================================================
// Packet Table
// ============================================================================

/// Immutable mapping from packet id to value size in bytes.
///
/// Built once at startup and handed to the decoder; nothing reads it as
/// ambient state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PacketTable {
    sizes: HashMap<u8, usize>,
}

impl PacketTable {
    /// The packets this daemon streams today.
    pub fn standard() -> Self {
        Self::from_sizes([
            (PACKET_GROUP_100, 80),
            (PACKET_CHARGING_STATE, 1),
            (PACKET_CHARGE_SOURCES, 1),
        ])
    }

    pub fn from_sizes(sizes: impl IntoIterator<Item = (u8, usize)>) -> Self {
        Self {
            sizes: sizes.into_iter().collect(),
        }
    }

    /// Value size for `id`, or `None` if the id is unknown.
    pub fn size_of(&self, id: u8) -> Option<usize> {
        self.sizes.get(&id).copied()
    }

    pub fn contains(&self, id: u8) -> bool {
        self.sizes.contains_key(&id)
    }
}

impl Default for PacketTable {
    fn default() -> Self {
        Self::standard()
    }
}

// ============================================================================
// Frame
// ============================================================================

/// A telemetry frame whose structure and checksum have been verified.
#[derive(Clone, PartialEq, Eq)]
pub struct Frame(Vec<u8>);

impl Frame {
    /// Validates raw bytes captured from the serial line.
    ///
    /// # Errors
    ///
    /// Returns `MalformedFrame` if the header or declared length does not
    /// match the buffer, and `Checksum` if the bytes do not sum to zero.
    pub fn from_bytes(bytes: Vec<u8>) -> DomainResult<Self> {
        match bytes.as_slice() {
            [SENSOR_HEADER, len, ..] => {
                let expected = usize::from(*len) + 3;
                if bytes.len() != expected {
                    return Err(DomainError::malformed(format!(
                        "declared length {len} needs {expected} bytes, got {}",
                        bytes.len()
                    )));
                }
            }
            [SENSOR_HEADER] => return Err(DomainError::malformed("frame missing length byte")),
            [other, ..] => {
                return Err(DomainError::malformed(format!("bad header byte {other}")));
            }
            [] => return Err(DomainError::malformed("empty frame")),
        }

        let sum = checksum(&bytes);
        if sum != 0 {
            return Err(DomainError::Checksum { sum });
        }
        Ok(Self(bytes))
    }

    /// Builds a valid frame around `payload`, appending the checksum byte.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload is longer than 255 bytes.
    pub fn build(payload: &[u8]) -> DomainResult<Self> {
        let len = u8::try_from(payload.len())
            .map_err(|_| DomainError::invalid("payload", "longer than 255 bytes"))?;
        let mut bytes = Vec::with_capacity(payload.len() + 3);
        bytes.push(SENSOR_HEADER);
        bytes.push(len);
        bytes.extend_from_slice(payload);
        bytes.push(checksum(&bytes).wrapping_neg());
        Ok(Self(bytes))
    }

    /// The full frame, header through checksum.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }

    /// Payload bytes between the length byte and the checksum.
    pub fn payload(&self) -> &[u8] {
        let end = self.0.len().saturating_sub(1);
        self.0.get(2..end).unwrap_or(&[])
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Frame({} bytes)", self.0.len())
    }
}

impl AsRef<[u8]> for Frame {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

// ============================================================================
// Sensor Sample
// ============================================================================

/// Typed projection of one frame's payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SensorSample {
    /// Capture time, Unix milliseconds
    pub timestamp_ms: i64,
    pub charging_state: u8,
    pub charge_sources: u8,
}

impl SensorSample {
    /// True while the home-base bit is set in the charge-sources mask.
    #[must_use]
    pub fn is_docked(&self) -> bool {
        self.charge_sources & CHARGE_SOURCE_HOME_BASE != 0
    }

    /// Reconditioning, full, trickle and waiting all count as charging.
    #[must_use]
    pub fn is_charging(&self) -> bool {
        matches!(self.charging_state, 1..=4)
    }
}

/// Decodes frame payloads for one configured packet group.
#[derive(Debug, Clone)]
pub struct SampleDecoder {
    table: PacketTable,
    group: Vec<u8>,
}

impl SampleDecoder {
    /// Creates a decoder for `group`.
    ///
    /// # Errors
    ///
    /// Fails closed: an empty group or any id missing from `table` is rejected
    /// up front rather than producing samples with silently absent fields.
    pub fn new(table: PacketTable, group: &[u8]) -> DomainResult<Self> {
        if group.is_empty() {
            return Err(DomainError::invalid("packet group", "empty"));
        }
        if let Some(unknown) = group.iter().find(|id| !table.contains(**id)) {
            return Err(DomainError::invalid(
                "packet group",
                format!("packet id {unknown} has no known size"),
            ));
        }
        Ok(Self {
            table,
            group: group.to_vec(),
        })
    }

    pub fn group(&self) -> &[u8] {
        &self.group
    }

    /// Decodes one frame into a sample stamped with `timestamp_ms`.
    ///
    /// # Errors
    ///
    /// Returns `MalformedFrame` on an unknown packet id, a value running past
    /// the payload, or a group packet missing from the payload.
    pub fn decode(&self, frame: &Frame, timestamp_ms: i64) -> DomainResult<SensorSample> {
        let mut values: HashMap<u8, &[u8]> = HashMap::with_capacity(self.group.len());
        let mut rest = frame.payload();

        while let Some((&id, tail)) = rest.split_first() {
            let size = self
                .table
                .size_of(id)
                .ok_or_else(|| DomainError::malformed(format!("unknown packet id {id}")))?;
            if tail.len() < size {
                return Err(DomainError::malformed(format!(
                    "packet {id} needs {size} bytes, {} left",
                    tail.len()
                )));
            }
            let (value, next) = tail.split_at(size);
            values.insert(id, value);
            rest = next;
        }

        if let Some(missing) = self.group.iter().find(|id| !values.contains_key(id)) {
            return Err(DomainError::malformed(format!("packet {missing} missing")));
        }

        let byte_of = |id: u8| {
            values
                .get(&id)
                .and_then(|v| v.first())
                .copied()
                .unwrap_or(0)
        };

        Ok(SensorSample {
            timestamp_ms,
            charging_state: byte_of(PACKET_CHARGING_STATE),
            charge_sources: byte_of(PACKET_CHARGE_SOURCES),
        })
    }
}
