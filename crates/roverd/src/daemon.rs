//! Top-level composition.
//!
//! Wires the chassis link, stream reader, auto-charge controller,
//! peripherals and the session supervisor together, runs until cancelled,
//! then waits for every task to wind down.

use std::sync::Arc;
use std::time::Duration;

use rover_core::SampleDecoder;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::auto_charge::AutoChargeController;
use crate::chassis::SerialAdapter;
use crate::config::{Config, ConfigError};
use crate::events;
use crate::hardware::{self, ChassisLink, HardwareError, SysfsRoots};
use crate::session::Session;
use crate::stream::{SensorStreamReader, FRAME_CHANNEL_CAPACITY, SAMPLE_CHANNEL_CAPACITY};
use crate::supervisor::{supervise, BackoffConfig};

/// How long background tasks get to finish after cancellation.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(3);

#[derive(Error, Debug)]
pub enum DaemonError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Hardware(#[from] HardwareError),
}

/// The whole daemon, built from one validated [`Config`].
#[derive(Debug)]
pub struct Daemon {
    config: Arc<Config>,
    roots: SysfsRoots,
    backoff: BackoffConfig,
}

impl Daemon {
    pub fn new(config: Config) -> Self {
        Self {
            config: Arc::new(config),
            roots: SysfsRoots::default(),
            backoff: BackoffConfig::default(),
        }
    }

    #[must_use]
    pub fn with_sysfs_roots(mut self, roots: SysfsRoots) -> Self {
        self.roots = roots;
        self
    }

    #[must_use]
    pub fn with_backoff(mut self, backoff: BackoffConfig) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Opens the configured chassis link and runs until `cancel` fires.
    ///
    /// # Errors
    ///
    /// Fails only at startup: bad packet group or unopenable serial port.
    pub async fn run(self, cancel: CancellationToken) -> Result<(), DaemonError> {
        let decoder = self.config.sample_decoder()?;
        let link = hardware::open_chassis(&self.config)?;
        self.run_with_link(link, decoder, cancel).await;
        Ok(())
    }

    /// Runs over an already open chassis link.
    pub async fn run_with_link(
        self,
        link: ChassisLink,
        decoder: SampleDecoder,
        cancel: CancellationToken,
    ) {
        let config = Arc::clone(&self.config);
        info!(
            name = %config.name,
            server_url = %config.server_url,
            backend = ?config.backend,
            "Daemon starting"
        );

        let chassis = Arc::new(SerialAdapter::new(link.writer));
        let (frame_tx, frame_rx) = mpsc::channel(FRAME_CHANNEL_CAPACITY);
        let (sample_tx, sample_rx) = mpsc::channel(SAMPLE_CHANNEL_CAPACITY);
        let (event_tx, event_rx) = events::channel();

        let mut tasks: Vec<(&'static str, JoinHandle<()>)> = Vec::new();
        tasks.push((
            "sensor reader",
            SensorStreamReader::new(link.reader, decoder, frame_tx, sample_tx).spawn(cancel.clone()),
        ));
        tasks.push((
            "auto-charge",
            tokio::spawn(
                AutoChargeController::new(Arc::clone(&chassis), event_tx.clone())
                    .run(sample_rx, cancel.clone()),
            ),
        ));
        if let Some(handle) = hardware::spawn_keepalive(&config, &self.roots, cancel.clone()) {
            tasks.push(("keep-alive", handle));
        }

        let peripherals = hardware::build_peripherals(&config, &self.roots);
        if let Some(media) = peripherals.media.clone() {
            let cancel = cancel.clone();
            tasks.push((
                "media health",
                tokio::spawn(async move { media.run_health_monitor(cancel).await }),
            ));
        }

        let session = Session::new(
            Arc::clone(&config),
            chassis,
            peripherals.clone(),
            frame_rx,
            event_tx,
            event_rx,
        );
        let session = &session;
        let token = &cancel;
        supervise(&self.backoff, &cancel, move || session.run(token)).await;

        cancel.cancel();
        for (name, handle) in tasks {
            match tokio::time::timeout(SHUTDOWN_GRACE, handle).await {
                Ok(Ok(())) => debug!(task = name, "Task stopped"),
                Ok(Err(e)) => warn!(task = name, error = %e, "Task failed"),
                Err(_) => warn!(task = name, "Task did not stop in time"),
            }
        }
        peripherals.close();
        info!("Daemon stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Backend;

    fn simulated() -> Config {
        Config {
            name: "rover".into(),
            server_url: "ws://127.0.0.1:9".into(),
            backend: Backend::Simulated,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_stops_on_cancel() {
        let cancel = CancellationToken::new();
        let daemon = Daemon::new(simulated());
        let task = tokio::spawn(daemon.run(cancel.clone()));
        tokio::time::sleep(Duration::from_millis(300)).await;
        cancel.cancel();
        let result = tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap();
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_bad_serial_is_startup_error() {
        let mut config = simulated();
        config.backend = Backend::Hardware;
        config.serial.device = "/dev/does-not-exist-roverd".into();
        config.serial.baud = 115_200;
        let err = Daemon::new(config)
            .run(CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, DaemonError::Hardware(_)));
    }
}
