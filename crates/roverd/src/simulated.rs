//! In-process chassis used when no hardware is attached.
//!
//! [`SimulatedTelemetry`] behaves like a serial port with a read timeout:
//! it yields one valid frame every 200ms (docked, trickle charging) and
//! times out in between. [`WriteLog`] accepts and records every write.

use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use rover_core::sensor::{
    CHARGE_SOURCE_HOME_BASE, PACKET_CHARGE_SOURCES, PACKET_CHARGING_STATE, PACKET_GROUP_100,
};
use rover_core::{DomainResult, Frame};

/// Interval between synthetic frames.
pub const SIMULATED_FRAME_INTERVAL: Duration = Duration::from_millis(200);

/// Read timeout mirrored from the real port configuration.
pub const SIMULATED_READ_TIMEOUT: Duration = Duration::from_millis(150);

const TRICKLE_CHARGING: u8 = 3;
const GROUP_100_SIZE: usize = 80;

/// Builds the frame the simulated chassis emits on `tick`.
pub fn simulated_frame(tick: u8) -> DomainResult<Frame> {
    let mut payload = Vec::with_capacity(GROUP_100_SIZE + 5);
    payload.push(PACKET_GROUP_100);
    let mut group = [0u8; GROUP_100_SIZE];
    // bumps and wheel drops cycle so consumers see changing data
    if let Some(bumps) = group.first_mut() {
        *bumps = tick % 16;
    }
    payload.extend_from_slice(&group);
    payload.extend_from_slice(&[PACKET_CHARGING_STATE, TRICKLE_CHARGING]);
    payload.extend_from_slice(&[PACKET_CHARGE_SOURCES, CHARGE_SOURCE_HOME_BASE]);
    Frame::build(&payload)
}

/// Read half of the simulated chassis.
#[derive(Debug)]
pub struct SimulatedTelemetry {
    pending: VecDeque<u8>,
    next_due: Instant,
    tick: u8,
}

impl SimulatedTelemetry {
    pub fn new() -> Self {
        Self {
            pending: VecDeque::new(),
            next_due: Instant::now(),
            tick: 0,
        }
    }
}

impl Default for SimulatedTelemetry {
    fn default() -> Self {
        Self::new()
    }
}

impl Read for SimulatedTelemetry {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        if self.pending.is_empty() {
            let now = Instant::now();
            if now < self.next_due {
                std::thread::sleep((self.next_due - now).min(SIMULATED_READ_TIMEOUT));
                if Instant::now() < self.next_due {
                    return Err(io::Error::new(io::ErrorKind::TimedOut, "no frame yet"));
                }
            }
            let frame = simulated_frame(self.tick)
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))?;
            self.pending.extend(frame.as_bytes());
            self.tick = self.tick.wrapping_add(1);
            self.next_due = (self.next_due + SIMULATED_FRAME_INTERVAL).max(Instant::now());
        }

        let mut n = 0;
        for slot in buf.iter_mut() {
            match self.pending.pop_front() {
                Some(b) => {
                    *slot = b;
                    n += 1;
                }
                None => break,
            }
        }
        Ok(n)
    }
}

/// Write sink that keeps every write call as one entry.
#[derive(Debug, Clone, Default)]
pub struct WriteLog {
    writes: Arc<Mutex<Vec<Vec<u8>>>>,
}

impl WriteLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// All writes so far, oldest first.
    pub fn writes(&self) -> Vec<Vec<u8>> {
        match self.writes.lock() {
            Ok(w) => w.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn clear(&self) {
        match self.writes.lock() {
            Ok(mut w) => w.clear(),
            Err(poisoned) => poisoned.into_inner().clear(),
        }
    }
}

impl Write for WriteLog {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self.writes.lock() {
            Ok(mut w) => w.push(buf.to_vec()),
            Err(poisoned) => poisoned.into_inner().push(buf.to_vec()),
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
