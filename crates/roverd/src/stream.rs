//! Telemetry frame reader.
//!
//! Runs on a blocking thread against the read half of the chassis link.
//! The reader hunts for the header byte, reads the declared length plus
//! checksum, and validates. A frame that fails its checksum gives up only
//! its first byte: the rest is pushed back and rescanned, so a real frame
//! that began inside the bogus one is still found. An attempt cut short by
//! a read timeout is rescanned the same way.
//!
//! Output goes to two bounded channels with send-or-drop semantics. The
//! reader never waits on a slow consumer.

use std::collections::VecDeque;
use std::io::{self, BufReader, Read};
use std::time::Duration;

use chrono::Utc;
use rover_core::{DomainError, Frame, SampleDecoder, SensorSample, SENSOR_HEADER};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

/// Capacity of the raw frame channel.
pub const FRAME_CHANNEL_CAPACITY: usize = 8;

/// Capacity of the decoded sample channel.
pub const SAMPLE_CHANNEL_CAPACITY: usize = 8;

/// Back-off after end-of-stream or an unexpected read error.
const IDLE_BACKOFF: Duration = Duration::from_millis(50);

/// Outcome of pulling one byte.
enum Pull {
    Byte(u8),
    /// Timed out, hit EOF, or failed; the current frame attempt is abandoned
    Idle,
}

/// Reads frames from `R` until cancelled.
pub struct SensorStreamReader<R> {
    input: BufReader<R>,
    pushback: VecDeque<u8>,
    decoder: SampleDecoder,
    frames: mpsc::Sender<Frame>,
    samples: mpsc::Sender<SensorSample>,
}

impl<R: Read> SensorStreamReader<R> {
    pub fn new(
        input: R,
        decoder: SampleDecoder,
        frames: mpsc::Sender<Frame>,
        samples: mpsc::Sender<SensorSample>,
    ) -> Self {
        Self {
            input: BufReader::new(input),
            pushback: VecDeque::new(),
            decoder,
            frames,
            samples,
        }
    }

    fn pull(&mut self) -> Pull {
        if let Some(b) = self.pushback.pop_front() {
            return Pull::Byte(b);
        }
        let mut byte = [0u8; 1];
        loop {
            match self.input.read(&mut byte) {
                Ok(1) => {
                    let [b] = byte;
                    return Pull::Byte(b);
                }
                Ok(_) => {
                    std::thread::sleep(IDLE_BACKOFF);
                    return Pull::Idle;
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e)
                    if matches!(
                        e.kind(),
                        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock
                    ) =>
                {
                    return Pull::Idle
                }
                Err(e) => {
                    debug!(error = %e, "Sensor read failed");
                    std::thread::sleep(IDLE_BACKOFF);
                    return Pull::Idle;
                }
            }
        }
    }

    /// Attempts to read one frame. `None` means nothing was emitted this round.
    fn next_frame(&mut self, cancel: &CancellationToken) -> Option<Frame> {
        // SEEK_HEADER
        loop {
            if cancel.is_cancelled() {
                return None;
            }
            match self.pull() {
                Pull::Byte(SENSOR_HEADER) => break,
                Pull::Byte(_) => continue,
                Pull::Idle => return None,
            }
        }

        // READ_LENGTH
        let len = match self.pull() {
            Pull::Byte(n) => n,
            Pull::Idle => return None,
        };

        // READ_BODY: payload plus checksum
        let mut bytes = Vec::with_capacity(usize::from(len) + 3);
        bytes.push(SENSOR_HEADER);
        bytes.push(len);
        for _ in 0..=len {
            match self.pull() {
                Pull::Byte(b) => bytes.push(b),
                Pull::Idle => {
                    // the header may have been payload; a real frame can sit in what we took
                    self.rescan(bytes);
                    return None;
                }
            }
        }

        // VALIDATE
        match Frame::from_bytes(bytes.clone()) {
            Ok(frame) => Some(frame),
            Err(DomainError::Checksum { sum }) => {
                debug!(
                    sum,
                    frame = %hex::encode(&bytes),
                    "Sensor checksum failed"
                );
                self.rescan(bytes);
                None
            }
            Err(e) => {
                warn!(error = %e, "Sensor frame rejected");
                None
            }
        }
    }

    /// Puts back everything after the bogus header so it is scanned again.
    fn rescan(&mut self, bytes: Vec<u8>) {
        for b in bytes.into_iter().skip(1).rev() {
            self.pushback.push_front(b);
        }
    }

    fn emit(&self, frame: Frame) {
        let sample = self
            .decoder
            .decode(&frame, Utc::now().timestamp_millis());

        if let Err(e) = self.frames.try_send(frame) {
            trace!(error = %e, "Sensor frame dropped");
        }
        match sample {
            Ok(sample) => {
                if let Err(e) = self.samples.try_send(sample) {
                    trace!(error = %e, "Sensor sample dropped");
                }
            }
            Err(e) => trace!(error = %e, "Frame did not decode to a sample"),
        }
    }

    /// Runs until `cancel` fires. Blocking; see [`spawn`](Self::spawn).
    pub fn run(mut self, cancel: &CancellationToken) {
        info!(group = ?self.decoder.group(), "Sensor stream reader started");
        while !cancel.is_cancelled() {
            if let Some(frame) = self.next_frame(cancel) {
                self.emit(frame);
            }
        }
        info!("Sensor stream reader stopped");
    }
}

impl<R: Read + Send + 'static> SensorStreamReader<R> {
    /// Moves the reader onto the blocking pool.
    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::task::spawn_blocking(move || self.run(&cancel))
    }
}
