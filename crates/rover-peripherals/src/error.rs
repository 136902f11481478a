//! Peripheral error types.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PeripheralError {
    /// Action name not understood by this peripheral
    #[error("unknown {peripheral} action {action:?}")]
    UnknownAction {
        peripheral: &'static str,
        action: String,
    },

    /// Request rejected before touching hardware
    #[error("{0}")]
    Rejected(String),

    /// Peripheral has been shut down
    #[error("{0} closed")]
    Closed(&'static str),

    /// Sysfs attribute could not be read or written
    #[error("sysfs {path}: {source}")]
    Sysfs {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Helper process could not be started
    #[error("spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    /// Helper process exited unsuccessfully
    #[error("{command} failed: {status} ({output})")]
    CommandFailed {
        command: String,
        status: String,
        output: String,
    },

    /// Helper process did not finish in time
    #[error("{command} timed out after {secs}s")]
    Timeout { command: String, secs: u64 },

    /// Health endpoint unreachable
    #[error("health request failed: {0}")]
    Http(#[from] reqwest::Error),
}

impl PeripheralError {
    pub(crate) fn sysfs(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Sysfs {
            path: path.into(),
            source,
        }
    }
}

pub type PeripheralResult<T> = Result<T, PeripheralError>;
