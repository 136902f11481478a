//! Media streaming service supervisor.
//!
//! The video publisher runs as its own system service. This module starts
//! and stops it on request and, when a health URL is configured, polls it
//! and restarts the service whenever the endpoint stops answering 2xx.

use crate::{MediaControl, PeripheralError, PeripheralResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationSeconds};
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, UdpSocket};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Timeout for one `systemctl` invocation.
pub const SYSTEMCTL_TIMEOUT: Duration = Duration::from_secs(15);

/// Timeout for one health probe, restart included.
pub const HEALTH_CHECK_TIMEOUT: Duration = Duration::from_secs(7);

/// Used when the configured interval is zero.
pub const DEFAULT_HEALTH_INTERVAL: Duration = Duration::from_secs(30);

const HTTP_TIMEOUT: Duration = Duration::from_secs(5);

/// Port used when a WHEP URL is derived and none is configured.
pub const DEFAULT_WHEP_PORT: u16 = 8889;

/// Path used when a WHEP URL is derived and none is configured.
pub const DEFAULT_WHEP_PATH: &str = "/whep/rovercam";

#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaConfig {
    pub whep_url: Option<String>,
    /// Older name for `whep_url`, used when that is unset
    pub publish_url: Option<String>,
    pub whep_port: u16,
    pub whep_path: String,
    pub manage: bool,
    pub service: Option<String>,
    pub health_url: Option<String>,
    #[serde(rename = "health_interval_secs")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub health_interval: Duration,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            whep_url: None,
            publish_url: None,
            whep_port: DEFAULT_WHEP_PORT,
            whep_path: DEFAULT_WHEP_PATH.to_string(),
            manage: false,
            service: None,
            health_url: None,
            health_interval: DEFAULT_HEALTH_INTERVAL,
        }
    }
}

impl MediaConfig {
    /// Fills `whep_url` when it is unset.
    ///
    /// Falls back to `publish_url`, then to `http://<host>:<port><path>`
    /// with `host` asked for only when needed. Stays unset if `host`
    /// yields nothing.
    pub fn resolve_whep_url(&mut self, host: impl FnOnce() -> Option<Ipv4Addr>) {
        if self.whep_url.as_deref().is_some_and(|u| !u.is_empty()) {
            return;
        }
        self.whep_url = self.publish_url.clone().filter(|u| !u.is_empty());
        if self.whep_url.is_some() {
            return;
        }
        let Some(ip) = host() else {
            return;
        };
        let port = if self.whep_port == 0 {
            DEFAULT_WHEP_PORT
        } else {
            self.whep_port
        };
        let path = match self.whep_path.trim() {
            "" => DEFAULT_WHEP_PATH.to_string(),
            p if p.starts_with('/') => p.to_string(),
            p => format!("/{p}"),
        };
        self.whep_url = Some(format!("http://{ip}:{port}{path}"));
    }
}

/// IPv4 address of the interface holding the default route.
///
/// Connecting a UDP socket only consults the routing table; nothing is sent.
pub fn detect_primary_ipv4() -> Option<Ipv4Addr> {
    let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).ok()?;
    socket.connect((Ipv4Addr::new(192, 0, 2, 1), 9)).ok()?;
    match socket.local_addr().ok()?.ip() {
        IpAddr::V4(ip) if !ip.is_loopback() && !ip.is_unspecified() => Some(ip),
        _ => None,
    }
}

/// Derives the bridge-facing WHEP address from the publisher's URL.
///
/// `http://10.0.0.5:8889/whep/rovercam` becomes
/// `whep://10.0.0.5:8889/rovercam/whep`; https maps to `wheps`.
pub fn bridge_whep_url(whep_url: &str) -> Option<String> {
    let parsed = reqwest::Url::parse(whep_url).ok()?;
    let host = parsed.host_str()?;
    let authority = match parsed.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    };
    let proto = if parsed.scheme() == "https" {
        "wheps"
    } else {
        "whep"
    };
    let path = parsed.path().trim_matches('/');
    let path = path.strip_prefix("whep/").unwrap_or(path).trim_matches('/');
    let path = if path.is_empty() { "rovercam" } else { path };
    Some(format!("{proto}://{authority}/{path}/whep"))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaAction {
    Start,
    Stop,
    Restart,
    Reload,
    Status,
}

impl MediaAction {
    pub fn parse(action: &str) -> PeripheralResult<Self> {
        match action {
            "start" => Ok(Self::Start),
            "stop" => Ok(Self::Stop),
            "restart" => Ok(Self::Restart),
            "reload" => Ok(Self::Reload),
            "status" => Ok(Self::Status),
            _ => Err(PeripheralError::Rejected(format!(
                "unknown media action: {action}"
            ))),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Stop => "stop",
            Self::Restart => "restart",
            Self::Reload => "reload",
            Self::Status => "status",
        }
    }
}

impl fmt::Display for MediaAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Something that can act on the media service.
#[async_trait]
pub trait ServiceControl: Send + Sync {
    async fn run(&self, action: MediaAction) -> PeripheralResult<()>;
}

/// Drives a unit through `systemctl`.
#[derive(Debug, Clone)]
pub struct Systemctl {
    service: String,
}

impl Systemctl {
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }
}

#[async_trait]
impl ServiceControl for Systemctl {
    async fn run(&self, action: MediaAction) -> PeripheralResult<()> {
        let command = format!("systemctl {action} {}", self.service);
        let child = Command::new("systemctl")
            .arg(action.as_str())
            .arg(&self.service)
            .kill_on_drop(true)
            .output();

        let output = tokio::time::timeout(SYSTEMCTL_TIMEOUT, child)
            .await
            .map_err(|_| PeripheralError::Timeout {
                command: command.clone(),
                secs: SYSTEMCTL_TIMEOUT.as_secs(),
            })?
            .map_err(|source| PeripheralError::Spawn {
                program: "systemctl".to_string(),
                source,
            })?;

        if !output.status.success() {
            let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
            text.push_str(&String::from_utf8_lossy(&output.stderr));
            return Err(PeripheralError::CommandFailed {
                command,
                status: output.status.to_string(),
                output: text.trim().to_string(),
            });
        }
        debug!(%command, "Media service command succeeded");
        Ok(())
    }
}

/// Records actions instead of running them.
#[derive(Debug, Default)]
pub struct NoopService {
    actions: Mutex<Vec<MediaAction>>,
}

impl NoopService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn actions(&self) -> Vec<MediaAction> {
        match self.actions.lock() {
            Ok(a) => a.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

#[async_trait]
impl ServiceControl for NoopService {
    async fn run(&self, action: MediaAction) -> PeripheralResult<()> {
        match self.actions.lock() {
            Ok(mut a) => a.push(action),
            Err(poisoned) => poisoned.into_inner().push(action),
        }
        Ok(())
    }
}

#[async_trait]
impl<S: ServiceControl + ?Sized> ServiceControl for Arc<S> {
    async fn run(&self, action: MediaAction) -> PeripheralResult<()> {
        (**self).run(action).await
    }
}

/// Owns the media service: on-demand actions plus health-driven restarts.
pub struct MediaSupervisor<S> {
    service: S,
    health_url: Option<String>,
    interval: Duration,
    client: reqwest::Client,
}

impl<S: ServiceControl> MediaSupervisor<S> {
    pub fn new(cfg: &MediaConfig, service: S) -> PeripheralResult<Self> {
        let interval = if cfg.health_interval.is_zero() {
            DEFAULT_HEALTH_INTERVAL
        } else {
            cfg.health_interval
        };
        let client = reqwest::Client::builder().timeout(HTTP_TIMEOUT).build()?;
        Ok(Self {
            service,
            health_url: cfg.health_url.clone().filter(|u| !u.is_empty()),
            interval,
            client,
        })
    }

    /// Probes the health URL once. No URL means healthy.
    pub async fn check_health(&self) -> bool {
        let Some(url) = &self.health_url else {
            return true;
        };
        match self.client.get(url).send().await {
            Ok(resp) if resp.status().is_success() => true,
            Ok(resp) => {
                warn!(status = %resp.status(), "Unexpected media health status");
                false
            }
            Err(e) => {
                warn!(error = %e, "Media health request failed");
                false
            }
        }
    }

    /// One probe, restarting the service if it failed.
    pub async fn check_and_repair(&self) -> PeripheralResult<()> {
        let repair = async {
            if self.check_health().await {
                return Ok(());
            }
            warn!("Media health check failed, restarting service");
            self.service.run(MediaAction::Restart).await
        };
        tokio::time::timeout(HEALTH_CHECK_TIMEOUT, repair)
            .await
            .unwrap_or_else(|_| {
                Err(PeripheralError::Timeout {
                    command: "media health check".to_string(),
                    secs: HEALTH_CHECK_TIMEOUT.as_secs(),
                })
            })
    }

    /// Polls until cancelled. Returns at once if no health URL is set.
    pub async fn monitor_health(&self, cancel: CancellationToken) {
        if self.health_url.is_none() {
            return;
        }
        info!(interval_secs = self.interval.as_secs(), "Media health monitor started");
        let mut ticker = tokio::time::interval(self.interval);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(e) = self.check_and_repair().await {
                        warn!(error = %e, "Media supervisor repair failed");
                    }
                }
            }
        }
        debug!("Media health monitor stopped");
    }
}

#[async_trait]
impl<S: ServiceControl> MediaControl for MediaSupervisor<S> {
    async fn handle_action(&self, action: &str) -> PeripheralResult<()> {
        let action = MediaAction::parse(action)?;
        self.service.run(action).await
    }

    async fn run_health_monitor(&self, cancel: CancellationToken) {
        self.monitor_health(cancel).await;
    }
}
