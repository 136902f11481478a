//! Rover Daemon - Serial chassis bridge for the cloud control plane
//!
//! Reads chassis telemetry, keeps a session to the control plane alive,
//! dispatches remote commands and runs the autonomous dock return.
//!
//! # Usage
//!
//! ```bash
//! roverd run --config /etc/roverd.toml   # foreground
//! roverd run -d                          # background, logs to the state dir
//! roverd stop
//! roverd status
//! ```

use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::process::{self, ExitCode};
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use roverd::config::DEFAULT_CONFIG_PATH;
use roverd::{Config, Daemon};

/// How long `stop` waits for the daemon to exit.
const STOP_TIMEOUT: Duration = Duration::from_secs(5);
const STOP_POLL: Duration = Duration::from_millis(100);

/// Rover edge daemon
#[derive(Parser, Debug)]
#[command(name = "roverd", version, about)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the daemon (the default)
    Run {
        /// Fork to the background
        #[arg(short = 'd', long)]
        daemon: bool,

        /// Path to the TOML configuration
        #[arg(short, long, env = "ROVERD_CONFIG", default_value = DEFAULT_CONFIG_PATH)]
        config: PathBuf,

        /// Debug-level logging for the daemon
        #[arg(short, long)]
        verbose: bool,
    },
    /// Stop the running daemon
    Stop,
    /// Show whether the daemon is running
    Status,
}

fn state_dir() -> PathBuf {
    dirs::state_dir()
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join("roverd")
}

/// Pid file guarding against two daemons on one chassis.
struct PidFile {
    path: PathBuf,
}

impl PidFile {
    fn in_state_dir() -> Self {
        Self {
            path: state_dir().join("roverd.pid"),
        }
    }

    fn read(&self) -> Option<i32> {
        fs::read_to_string(&self.path).ok()?.trim().parse().ok()
    }

    /// Pid of a live daemon. A stale file is removed.
    fn running(&self) -> Option<i32> {
        let pid = self.read()?;
        if is_alive(pid) {
            return Some(pid);
        }
        self.release();
        None
    }

    fn claim(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        fs::write(&self.path, process::id().to_string())
            .with_context(|| format!("Failed to write {}", self.path.display()))
    }

    fn release(&self) {
        let _ = fs::remove_file(&self.path);
    }
}

fn is_alive(pid: i32) -> bool {
    // signal 0 only checks that the process exists
    let rc = unsafe { libc::kill(pid, 0) };
    rc == 0 || io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

fn main() -> Result<ExitCode> {
    let command = Args::parse().command.unwrap_or_else(|| Command::Run {
        daemon: false,
        config: std::env::var_os("ROVERD_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH)),
        verbose: false,
    });

    let pid_file = PidFile::in_state_dir();
    match command {
        Command::Run {
            daemon,
            config,
            verbose,
        } => run(&pid_file, &config, daemon, verbose),
        Command::Stop => stop(&pid_file),
        Command::Status => Ok(status(&pid_file)),
    }
}

fn run(pid_file: &PidFile, config_path: &Path, background: bool, verbose: bool) -> Result<ExitCode> {
    if let Some(pid) = pid_file.running() {
        bail!("roverd is already running (PID {pid}); run 'roverd stop' first");
    }

    // a bad config fails here, in the foreground, before forking
    let config = Config::load(config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;

    if background {
        daemonize()?;
    }
    pid_file.claim()?;
    let result = run_daemon(config, verbose);
    pid_file.release();
    result.map(|()| ExitCode::SUCCESS)
}

fn stop(pid_file: &PidFile) -> Result<ExitCode> {
    let Some(pid) = pid_file.running() else {
        println!("roverd is not running");
        return Ok(ExitCode::SUCCESS);
    };

    if unsafe { libc::kill(pid, libc::SIGTERM) } != 0 {
        bail!(
            "Failed to signal PID {pid}: {}",
            io::Error::last_os_error()
        );
    }

    let deadline = Instant::now() + STOP_TIMEOUT;
    while Instant::now() < deadline {
        if !is_alive(pid) {
            println!("roverd stopped (PID {pid})");
            return Ok(ExitCode::SUCCESS);
        }
        std::thread::sleep(STOP_POLL);
    }
    eprintln!("roverd (PID {pid}) still running after {STOP_TIMEOUT:?}");
    Ok(ExitCode::FAILURE)
}

fn status(pid_file: &PidFile) -> ExitCode {
    match pid_file.running() {
        Some(pid) => {
            println!("roverd running (PID {pid})");
            println!("log: {}", state_dir().join("roverd.log").display());
            ExitCode::SUCCESS
        }
        None => {
            println!("roverd not running");
            ExitCode::FAILURE
        }
    }
}

/// Detaches from the terminal; stdout and stderr go to the state dir log.
fn daemonize() -> Result<()> {
    let dir = state_dir();
    fs::create_dir_all(&dir).with_context(|| format!("Failed to create {}", dir.display()))?;
    let log = File::create(dir.join("roverd.log")).context("Failed to create log file")?;
    let log_err = log.try_clone().context("Failed to clone log file")?;

    daemonize::Daemonize::new()
        .working_directory("/")
        .stdout(log)
        .stderr(log_err)
        .start()
        .context("Failed to daemonize")
}

#[tokio::main]
async fn run_daemon(config: Config, verbose: bool) -> Result<()> {
    let level = if verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive(format!("roverd={level}").parse()?)
                .add_directive("rover_core=info".parse()?)
                .add_directive("rover_protocol=info".parse()?)
                .add_directive("rover_peripherals=info".parse()?),
        )
        .init();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        pid = process::id(),
        name = %config.name,
        "Rover daemon starting"
    );

    let cancel = CancellationToken::new();
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        tokio::select! {
            _ = sigterm.recv() => info!("Received SIGTERM"),
            _ = sigint.recv() => info!("Received SIGINT"),
        }
        on_signal.cancel();
    });

    if let Err(e) = Daemon::new(config).run(cancel).await {
        error!(error = %e, "Daemon failed");
        return Err(e.into());
    }

    info!("Rover daemon stopped");
    Ok(())
}
