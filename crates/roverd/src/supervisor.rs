//! Reconnect-with-backoff around single-connection sessions.

use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::session::SessionResult;

/// Retry timing between sessions.
#[derive(Debug, Clone)]
pub struct BackoffConfig {
    /// Delay before the first retry, and after any session that completed
    /// its handshake.
    pub initial_delay: Duration,

    /// Maximum delay between attempts.
    pub max_delay: Duration,

    /// Multiplier for exponential backoff (2.0 doubles the delay each retry).
    pub multiplier: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
        }
    }
}

impl BackoffConfig {
    pub fn next_delay(&self, delay: Duration) -> Duration {
        let next_ms = (delay.as_millis() as f64 * self.multiplier) as u64;
        Duration::from_millis(next_ms).min(self.max_delay)
    }
}

/// Calls `run_once` until it returns `Ok` or `cancel` fires.
///
/// `run_once` is one connection lifetime; `Ok` means it was cancelled.
pub async fn supervise<F, Fut>(backoff: &BackoffConfig, cancel: &CancellationToken, mut run_once: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = SessionResult<()>>,
{
    let mut delay = backoff.initial_delay;
    let mut attempt = 0u32;

    loop {
        if cancel.is_cancelled() {
            break;
        }
        attempt = attempt.saturating_add(1);
        debug!(attempt, "Starting session");

        match run_once().await {
            Ok(()) => break,
            Err(e) => {
                if e.completed_handshake() {
                    delay = backoff.initial_delay;
                    attempt = 0;
                }
                warn!(
                    error = %e,
                    retry_in_ms = delay.as_millis() as u64,
                    "Session ended"
                );
            }
        }

        tokio::select! {
            _ = sleep(delay) => delay = backoff.next_delay(delay),
            _ = cancel.cancelled() => break,
        }
    }
    info!("Session supervisor stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionError;
    use std::sync::{Arc, Mutex};
    use tokio::time::Instant;
    use tokio_tungstenite::tungstenite;

    fn connect_failure() -> SessionError {
        SessionError::Connect {
            url: "ws://nowhere".into(),
            source: tungstenite::Error::ConnectionClosed,
        }
    }

    #[test]
    fn test_next_delay_doubles_and_caps() {
        let backoff = BackoffConfig::default();
        let mut delay = backoff.initial_delay;
        let mut seen = Vec::new();
        for _ in 0..7 {
            seen.push(delay.as_secs());
            delay = backoff.next_delay(delay);
        }
        assert_eq!(seen, vec![1, 2, 4, 8, 16, 30, 30]);
    }

    /// Runs the supervisor over scripted outcomes, returning attempt offsets
    /// from the first attempt in whole seconds.
    async fn attempt_times(outcomes: Vec<SessionResult<()>>) -> Vec<u64> {
        let start = Instant::now();
        let times = Arc::new(Mutex::new(Vec::new()));
        let script = Arc::new(Mutex::new(outcomes.into_iter()));
        let cancel = CancellationToken::new();

        supervise(&BackoffConfig::default(), &cancel, || {
            let times = Arc::clone(&times);
            let script = Arc::clone(&script);
            async move {
                times.lock().unwrap().push(start.elapsed().as_secs());
                script.lock().unwrap().next().unwrap_or(Ok(()))
            }
        })
        .await;

        let out = times.lock().unwrap().clone();
        out
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_grows_on_connect_failures() {
        let times = attempt_times(vec![
            Err(connect_failure()),
            Err(connect_failure()),
            Err(connect_failure()),
            Ok(()),
        ])
        .await;
        assert_eq!(times, vec![0, 1, 3, 7]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_resets_after_handshake() {
        let times = attempt_times(vec![
            Err(connect_failure()),
            Err(connect_failure()),
            Err(SessionError::Closed),
            Err(connect_failure()),
            Ok(()),
        ])
        .await;
        // 1s, 2s, then reset to 1s after the handshaken session, then 2s
        assert_eq!(times, vec![0, 1, 3, 4, 6]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_stops_retry_sleep() {
        let cancel = CancellationToken::new();
        let calls = Arc::new(Mutex::new(0));
        let task = {
            let cancel = cancel.clone();
            let calls = Arc::clone(&calls);
            tokio::spawn(async move {
                supervise(&BackoffConfig::default(), &cancel, || {
                    let calls = Arc::clone(&calls);
                    async move {
                        *calls.lock().unwrap() += 1;
                        Err(connect_failure())
                    }
                })
                .await;
            })
        };
        tokio::time::sleep(Duration::from_millis(1500)).await;
        cancel.cancel();
        task.await.unwrap();
        assert_eq!(*calls.lock().unwrap(), 2);
    }
}
