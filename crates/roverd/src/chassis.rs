//! Serialized write path to the chassis.
//!
//! Every byte sent to the chassis goes through one [`SerialAdapter`], whose
//! lock makes each encoded command a single atomic write. Commands from
//! the dispatch loop, the watchdog and the auto-charge controller may
//! interleave with each other but never within one command.

use std::io::{self, Write};
use std::sync::Mutex;
use std::time::Duration;

use rover_core::{opcode, song, DomainError, SongNote};
use thiserror::Error;
use tracing::{debug, trace};

/// Pause after each kickstart step so the chassis can change mode.
pub const KICKSTART_SETTLE: Duration = Duration::from_millis(50);

#[derive(Error, Debug)]
pub enum ChassisError {
    #[error("serial write: {0}")]
    Io(#[from] io::Error),

    #[error("short write {written}/{requested}")]
    ShortWrite { written: usize, requested: usize },

    #[error(transparent)]
    Invalid(#[from] DomainError),
}

pub type ChassisResult<T> = Result<T, ChassisError>;

/// Owns the write half of the chassis link.
pub struct SerialAdapter {
    port: Mutex<Box<dyn Write + Send>>,
}

impl SerialAdapter {
    pub fn new(port: impl Write + Send + 'static) -> Self {
        Self {
            port: Mutex::new(Box::new(port)),
        }
    }

    /// Writes one command. A short write is an error, never retried here.
    fn write(&self, bytes: &[u8]) -> ChassisResult<()> {
        let mut port = match self.port.lock() {
            Ok(p) => p,
            Err(poisoned) => poisoned.into_inner(),
        };
        let written = port.write(bytes)?;
        if written != bytes.len() {
            return Err(ChassisError::ShortWrite {
                written,
                requested: bytes.len(),
            });
        }
        port.flush()?;
        trace!(bytes = ?bytes, "Chassis write");
        Ok(())
    }

    pub fn drive_direct(&self, left: i16, right: i16) -> ChassisResult<()> {
        self.write(&opcode::drive_direct(left, right))
    }

    pub fn motor_pwm(&self, main_brush: i8, side_brush: i8, vacuum: u8) -> ChassisResult<()> {
        self.write(&opcode::motor_pwm(main_brush, side_brush, vacuum))
    }

    pub fn start_sensor_stream(&self, packets: &[u8]) -> ChassisResult<()> {
        let bytes = opcode::start_stream(packets)?;
        self.write(&bytes)
    }

    pub fn pause_sensor_stream(&self, paused: bool) -> ChassisResult<()> {
        self.write(&opcode::pause_stream(paused))
    }

    pub fn start_oi(&self) -> ChassisResult<()> {
        self.write(&opcode::start())
    }

    pub fn seek_dock(&self) -> ChassisResult<()> {
        self.write(&opcode::seek_dock())
    }

    /// Defines `notes` in `slot` and plays it, as two writes.
    pub fn play_song(&self, slot: i64, notes: &[SongNote]) -> ChassisResult<()> {
        let (define, play) = song::encode(slot, notes)?;
        self.write(&define)?;
        self.write(&play)
    }

    /// Passes bytes through untouched.
    pub fn send_raw(&self, bytes: &[u8]) -> ChassisResult<()> {
        self.write(bytes)
    }

    /// Start OI, settle, start the stream, settle.
    ///
    /// Brings the chassis back into a streaming state after startup or
    /// after anything that reset its mode.
    pub async fn kickstart(&self, packets: &[u8]) -> ChassisResult<()> {
        self.start_oi()?;
        tokio::time::sleep(KICKSTART_SETTLE).await;
        self.start_sensor_stream(packets)?;
        tokio::time::sleep(KICKSTART_SETTLE).await;
        debug!(packets = ?packets, "Sensor stream kickstarted");
        Ok(())
    }
}

impl std::fmt::Debug for SerialAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialAdapter").finish_non_exhaustive()
    }
}
