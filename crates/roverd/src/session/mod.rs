//! One control-plane connection.
//!
//! [`Session::run`] covers a single connection from dial to close:
//!
//! 1. Connect and send the hello message
//! 2. Kickstart the sensor stream
//! 3. Run command dispatch, sensor forwarding (with the watchdog) and event
//!    forwarding concurrently until one of them fails or the caller cancels
//!
//! Reconnecting is the caller's job; see [`crate::supervisor`].
//!
//! # Panic-Free Guarantees
//!
//! Per-command failures become error acks. Only transport failures end the
//! session, and they are returned, never unwrapped.

mod dispatch;
pub mod error;
pub mod watchdog;

pub use dispatch::Dispatcher;
pub use error::{SessionError, SessionResult};
pub use watchdog::SensorWatchdog;

use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use rover_core::{Envelope, Frame, RoverEvent};
use rover_peripherals::Peripherals;
use rover_protocol::{InboundMessage, OutboundMessage};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::chassis::SerialAdapter;
use crate::config::Config;
use crate::events::EventSender;

/// Dial timeout, including the TLS and upgrade exchange.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

/// Write timeout (10 seconds)
const WRITE_TIMEOUT: Duration = Duration::from_secs(10);

/// How long a graceful close may take before the socket is dropped.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Write half shared by the three session loops.
struct Outbox {
    sink: Mutex<SplitSink<WsStream, Message>>,
}

impl Outbox {
    fn new(sink: SplitSink<WsStream, Message>) -> Self {
        Self {
            sink: Mutex::new(sink),
        }
    }

    async fn send(&self, message: &OutboundMessage) -> SessionResult<()> {
        self.send_text(message.to_json()?).await
    }

    async fn send_text(&self, text: String) -> SessionResult<()> {
        let mut sink = self.sink.lock().await;
        match timeout(WRITE_TIMEOUT, sink.send(Message::Text(text))).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(SessionError::WriteTimeout(WRITE_TIMEOUT)),
        }
    }

    /// Sends a close frame and flushes, giving up after [`CLOSE_TIMEOUT`].
    async fn close(&self) {
        let mut sink = self.sink.lock().await;
        let frame = CloseFrame {
            code: CloseCode::Normal,
            reason: "shutting down".into(),
        };
        match timeout(CLOSE_TIMEOUT, sink.send(Message::Close(Some(frame)))).await {
            Ok(Ok(())) => debug!("Close frame sent"),
            Ok(Err(e)) => debug!(error = %e, "Close frame failed"),
            Err(_) => debug!("Close frame timed out"),
        }
        let _ = timeout(CLOSE_TIMEOUT, sink.close()).await;
    }
}

/// Everything a connection needs that outlives it.
///
/// The receivers sit behind async mutexes so each successive connection
/// picks up the same channels.
pub struct Session {
    config: Arc<Config>,
    chassis: Arc<SerialAdapter>,
    dispatcher: Dispatcher,
    event_tx: EventSender,
    frames: Mutex<mpsc::Receiver<Frame>>,
    events: Mutex<mpsc::Receiver<RoverEvent>>,
}

impl Session {
    pub fn new(
        config: Arc<Config>,
        chassis: Arc<SerialAdapter>,
        peripherals: Peripherals,
        frames: mpsc::Receiver<Frame>,
        event_tx: EventSender,
        events: mpsc::Receiver<RoverEvent>,
    ) -> Self {
        let dispatcher = Dispatcher::new(Arc::clone(&chassis), peripherals, &config);
        Self {
            config,
            chassis,
            dispatcher,
            event_tx,
            frames: Mutex::new(frames),
            events: Mutex::new(events),
        }
    }

    /// Runs one connection to completion.
    ///
    /// Returns `Ok(())` only when cancelled. Every other exit is an error
    /// the supervisor should back off from.
    pub async fn run(&self, cancel: &CancellationToken) -> SessionResult<()> {
        let url = self.config.server_url.as_str();
        debug!(url, "Connecting to control plane");

        let dial = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(()),
            dial = timeout(CONNECT_TIMEOUT, connect_async(url)) => dial,
        };
        let connect_error = |source: tungstenite::Error| SessionError::Connect {
            url: url.to_string(),
            source,
        };
        let (ws, _response) = match dial {
            Ok(result) => result.map_err(connect_error)?,
            Err(_) => {
                let timed_out = std::io::Error::new(std::io::ErrorKind::TimedOut, "connect timed out");
                return Err(connect_error(tungstenite::Error::Io(timed_out)));
            }
        };
        info!(url, "Connected to control plane");

        let (sink, mut stream) = ws.split();
        let outbox = Outbox::new(sink);

        outbox
            .send(&OutboundMessage::hello(self.config.hello()))
            .await
            .map_err(|e| SessionError::Handshake(Box::new(e)))?;
        info!(name = %self.config.name, "Hello sent");

        if let Err(e) = self.dispatcher.kickstart().await {
            warn!(error = %e, "Sensor stream init failed");
        }

        let mut frames = self.frames.lock().await;
        let mut events = self.events.lock().await;

        let ended = tokio::select! {
            _ = cancel.cancelled() => None,
            result = self.read_commands(&mut stream, &outbox) => Some(result),
            result = self.forward_sensors(&mut frames, &outbox) => Some(result),
            result = self.forward_events(&mut events, &outbox) => Some(result),
        };

        match ended {
            None => {
                info!("Session cancelled, closing connection");
                outbox.close().await;
                Ok(())
            }
            Some(result) => result,
        }
    }

    async fn read_commands(
        &self,
        stream: &mut SplitStream<WsStream>,
        outbox: &Outbox,
    ) -> SessionResult<()> {
        while let Some(message) = stream.next().await {
            let text = match message? {
                Message::Text(text) => text,
                Message::Binary(bytes) => match String::from_utf8(bytes) {
                    Ok(text) => text,
                    Err(_) => {
                        warn!("Ignoring non-UTF-8 binary message");
                        continue;
                    }
                },
                Message::Close(frame) => {
                    info!(frame = ?frame, "Peer closed connection");
                    return Err(SessionError::Closed);
                }
                Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => continue,
            };
            if let Some(ack) = self.handle_text(&text).await {
                outbox.send(&ack).await?;
            }
        }
        Err(SessionError::Closed)
    }

    /// Parses and dispatches one inbound text message.
    ///
    /// Returns the ack to send, or `None` for malformed JSON and for
    /// messages without a correlation id.
    pub(crate) async fn handle_text(&self, text: &str) -> Option<OutboundMessage> {
        let inbound = match InboundMessage::from_json(text) {
            Ok(inbound) => inbound,
            Err(e) => {
                warn!(error = %e, "Invalid command");
                return None;
            }
        };
        if inbound.correlation_id().is_none() {
            debug!(kind = %inbound.kind, "Ignoring command without id");
            return None;
        }

        let (id, outcome) = match inbound.into_envelope() {
            Ok(Envelope { id, command }) => {
                let kind = command.kind().to_string();
                let outcome = self.dispatcher.dispatch(command).await;
                match &outcome {
                    Ok(()) => debug!(id = %id, kind = %kind, "Command applied"),
                    Err(e) => warn!(id = %id, kind = %kind, error = %e, "Command failed"),
                }
                (id, outcome)
            }
            Err((id, e)) => {
                warn!(id = %id, error = %e, "Command rejected");
                (id, Err(SessionError::from(e)))
            }
        };
        Some(OutboundMessage::ack(id, &outcome))
    }

    async fn forward_sensors(
        &self,
        frames: &mut mpsc::Receiver<Frame>,
        outbox: &Outbox,
    ) -> SessionResult<()> {
        watchdog::forward_frames(
            frames,
            &self.chassis,
            &self.config.sensor.packets,
            &self.event_tx,
            move |frame| {
                let message = OutboundMessage::sensor(&frame);
                async move { outbox.send(&message).await }
            },
        )
        .await
    }

    async fn forward_events(
        &self,
        events: &mut mpsc::Receiver<RoverEvent>,
        outbox: &Outbox,
    ) -> SessionResult<()> {
        // never ends on its own: this session holds a sender
        while let Some(event) = events.recv().await {
            outbox.send_text(OutboundMessage::event_json(&event)?).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulated::WriteLog;
    use rover_protocol::AckStatus;

    fn make_session() -> (Session, WriteLog) {
        let log = WriteLog::new();
        let chassis = Arc::new(SerialAdapter::new(log.clone()));
        let config = Arc::new(Config {
            name: "rover".into(),
            server_url: "ws://127.0.0.1:9".into(),
            ..Default::default()
        });
        let (_frame_tx, frames) = mpsc::channel(8);
        let (event_tx, events) = crate::events::channel();
        let session = Session::new(config, chassis, Peripherals::none(), frames, event_tx, events);
        (session, log)
    }

    fn ack_parts(message: OutboundMessage) -> (String, AckStatus, Option<String>) {
        match message {
            OutboundMessage::Ack { id, status, error } => (id.to_string(), status, error),
            other => panic!("expected ack, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_missing_id_is_not_acked() {
        let (session, log) = make_session();
        let ack = session
            .handle_text(r#"{"type":"drive","driveDirect":{"left":10,"right":10}}"#)
            .await;
        assert!(ack.is_none());
        assert!(log.writes().is_empty());
    }

    #[tokio::test]
    async fn test_malformed_json_is_skipped() {
        let (session, _log) = make_session();
        assert!(session.handle_text("{not json").await.is_none());
    }

    #[tokio::test]
    async fn test_drive_acked_ok() {
        let (session, log) = make_session();
        let ack = session
            .handle_text(r#"{"type":"drive","id":"7","driveDirect":{"left":100,"right":-100}}"#)
            .await
            .unwrap();
        let (id, status, error) = ack_parts(ack);
        assert_eq!(id, "7");
        assert_eq!(status, AckStatus::Ok);
        assert_eq!(error, None);
        assert_eq!(log.writes().len(), 1);
    }

    #[tokio::test]
    async fn test_bad_raw_acked_error() {
        let (session, log) = make_session();
        let ack = session
            .handle_text(r#"{"type":"raw","id":"r1","raw":"***"}"#)
            .await
            .unwrap();
        let (id, status, error) = ack_parts(ack);
        assert_eq!(id, "r1");
        assert_eq!(status, AckStatus::Error);
        assert!(error.unwrap().starts_with("raw decode"));
        assert!(log.writes().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_kind_acked_error() {
        let (session, _log) = make_session();
        let ack = session
            .handle_text(r#"{"type":"warp","id":"w"}"#)
            .await
            .unwrap();
        let (_, status, error) = ack_parts(ack);
        assert_eq!(status, AckStatus::Error);
        assert_eq!(error.as_deref(), Some("unsupported command type: warp"));
    }

    #[tokio::test]
    async fn test_run_returns_on_cancel_before_connect() {
        let (session, _log) = make_session();
        let cancel = CancellationToken::new();
        cancel.cancel();
        assert!(session.run(&cancel).await.is_ok());
    }
}
