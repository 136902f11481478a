//! End-to-end tests for one control-plane session.
//!
//! A real WebSocket peer runs on a local port; the chassis is a recording
//! writer. Tests may unwrap.

use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use futures_util::{SinkExt, StreamExt};
use rover_core::{Frame, RoverEvent};
use roverd::chassis::SerialAdapter;
use roverd::events::{self, EventSender};
use roverd::session::{Session, SessionError, SessionResult};
use roverd::simulated::WriteLog;
use roverd::Config;
use serde_json::Value;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{accept_async, WebSocketStream};
use tokio_util::sync::CancellationToken;

// ============================================================================
// Constants
// ============================================================================

/// Upper bound on waiting for any single message
const RECV_TIMEOUT: Duration = Duration::from_secs(3);

/// Time for kickstart writes (two 50ms settles) to land
const KICKSTART_WAIT: Duration = Duration::from_millis(300);

const STREAM_START: [u8; 5] = [148, 3, 100, 21, 34];

// ============================================================================
// Test Helpers
// ============================================================================

type Peer = WebSocketStream<TcpStream>;

struct Harness {
    log: WriteLog,
    frames: mpsc::Sender<Frame>,
    events: EventSender,
    cancel: CancellationToken,
    task: JoinHandle<SessionResult<()>>,
    peer: Peer,
}

impl Harness {
    /// Starts a session against a fresh local peer and accepts it.
    async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let config = Arc::new(Config {
            name: "rover-7".into(),
            server_url: format!("ws://{addr}/rover"),
            max_wheel_speed: 500,
            ..Default::default()
        });
        let log = WriteLog::new();
        let chassis = Arc::new(SerialAdapter::new(log.clone()));
        let (frame_tx, frame_rx) = mpsc::channel(8);
        let (event_tx, event_rx) = events::channel();
        let session = Session::new(
            config,
            chassis,
            rover_peripherals::Peripherals::none(),
            frame_rx,
            event_tx.clone(),
            event_rx,
        );

        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let task = tokio::spawn(async move { session.run(&token).await });

        let (stream, _) = timeout(RECV_TIMEOUT, listener.accept()).await.unwrap().unwrap();
        let peer = accept_async(stream).await.unwrap();

        Self {
            log,
            frames: frame_tx,
            events: event_tx,
            cancel,
            task,
            peer,
        }
    }

    async fn send(&mut self, json: &str) {
        self.peer.send(Message::Text(json.to_string())).await.unwrap();
    }

    /// Next JSON text message from the session.
    async fn recv(&mut self) -> Value {
        loop {
            let message = timeout(RECV_TIMEOUT, self.peer.next())
                .await
                .expect("timed out waiting for message")
                .expect("stream ended")
                .unwrap();
            if let Message::Text(text) = message {
                return serde_json::from_str(&text).unwrap();
            }
        }
    }

    /// Skips messages until one has the given type.
    async fn recv_type(&mut self, kind: &str) -> Value {
        loop {
            let value = self.recv().await;
            if value["type"] == kind {
                return value;
            }
        }
    }

    /// Hello plus kickstart, then a clean write log.
    async fn handshake(&mut self) -> Value {
        let hello = self.recv().await;
        sleep(KICKSTART_WAIT).await;
        assert_eq!(self.log.writes(), vec![vec![128], STREAM_START.to_vec()]);
        self.log.clear();
        hello
    }
}

// ============================================================================
// Tests
// ============================================================================

#[tokio::test]
async fn test_hello_then_kickstart() {
    let mut h = Harness::start().await;
    let hello = h.handshake().await;
    assert_eq!(hello["type"], "hello");
    assert_eq!(hello["name"], "rover-7");
    assert_eq!(hello["maxWheelSpeed"], 500);
}

#[tokio::test]
async fn test_drive_is_clamped_and_acked() {
    let mut h = Harness::start().await;
    h.handshake().await;

    h.send(r#"{"type":"drive","id":"d1","driveDirect":{"left":600,"right":-50}}"#)
        .await;
    let ack = h.recv_type("ack").await;
    assert_eq!(ack["id"], "d1");
    assert_eq!(ack["status"], "ok");
    assert!(ack.get("error").is_none());
    assert_eq!(h.log.writes(), vec![vec![145, 0xFF, 0xCE, 0x01, 0xF4]]);
}

#[tokio::test]
async fn test_raw_mode_opcode_restarts_stream() {
    let mut h = Harness::start().await;
    h.handshake().await;

    let raw = BASE64.encode([128u8]);
    h.send(&format!(r#"{{"type":"raw","id":"1","raw":"{raw}"}}"#))
        .await;
    let ack = h.recv_type("ack").await;
    assert_eq!(ack["id"], "1");
    assert_eq!(ack["status"], "ok");
    assert_eq!(
        h.log.writes(),
        vec![vec![128], vec![128], STREAM_START.to_vec()]
    );
}

#[tokio::test]
async fn test_no_ack_without_id_or_for_bad_json() {
    let mut h = Harness::start().await;
    h.handshake().await;

    h.send(r#"{"type":"drive","driveDirect":{"left":10,"right":10}}"#)
        .await;
    h.send("{{{ not json").await;
    h.send(r#"{"type":"warp","id":"z"}"#).await;

    let ack = h.recv_type("ack").await;
    assert_eq!(ack["id"], "z");
    assert_eq!(ack["status"], "error");
    assert_eq!(ack["error"], "unsupported command type: warp");
    // the id-less drive was not dispatched either
    assert!(h.log.writes().is_empty());
}

#[tokio::test]
async fn test_disabled_peripheral_error_ack_keeps_session() {
    let mut h = Harness::start().await;
    h.handshake().await;

    h.send(r#"{"type":"servo","id":"s","servo":{"angle":45}}"#).await;
    let ack = h.recv_type("ack").await;
    assert_eq!(ack["status"], "error");
    assert_eq!(ack["error"], "camera servo disabled");

    h.send(r#"{"type":"motor","id":"m","motorPwm":{"main":300,"side":-300,"vacuum":500}}"#)
        .await;
    let ack = h.recv_type("ack").await;
    assert_eq!(ack["id"], "m");
    assert_eq!(ack["status"], "ok");
    assert_eq!(h.log.writes(), vec![vec![144, 127, 0x81, 127]]);
}

#[tokio::test]
async fn test_frames_and_events_forwarded() {
    let mut h = Harness::start().await;
    h.handshake().await;

    let frame = Frame::build(&[21, 2, 34, 2]).unwrap();
    h.frames.send(frame.clone()).await.unwrap();
    let sensor = h.recv_type("sensor").await;
    let bytes = BASE64.decode(sensor["data"].as_str().unwrap()).unwrap();
    assert_eq!(bytes, frame.as_bytes());
    assert!(sensor["ts"].as_i64().unwrap() > 0);

    let mut event = RoverEvent::new("autoCharge.timerStarted").with("chargingState", 0);
    event.kind.clear();
    h.events.emit(event);
    let forwarded = h.recv_type("event").await;
    assert_eq!(forwarded["event"], "autoCharge.timerStarted");
    assert_eq!(forwarded["data"]["chargingState"], 0);
}

#[tokio::test]
async fn test_cancel_closes_gracefully() {
    let mut h = Harness::start().await;
    h.handshake().await;

    h.cancel.cancel();
    let result = timeout(RECV_TIMEOUT, &mut h.task).await.unwrap().unwrap();
    assert!(result.is_ok());

    // the peer sees a close frame, not a dropped socket
    let mut saw_close = false;
    while let Ok(Some(Ok(message))) = timeout(RECV_TIMEOUT, h.peer.next()).await {
        if message.is_close() {
            saw_close = true;
            break;
        }
    }
    assert!(saw_close);
}

#[tokio::test]
async fn test_peer_close_ends_session_with_error() {
    let mut h = Harness::start().await;
    h.handshake().await;

    h.peer.close(None).await.unwrap();
    let result = timeout(RECV_TIMEOUT, &mut h.task).await.unwrap().unwrap();
    let err = result.unwrap_err();
    assert!(matches!(err, SessionError::Closed | SessionError::WebSocket(_)));
    assert!(err.completed_handshake());
}

#[tokio::test]
async fn test_connect_refused_is_not_a_handshake() {
    // bind then drop to get a port nobody listens on
    let addr = {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap()
    };
    let config = Arc::new(Config {
        name: "rover".into(),
        server_url: format!("ws://{addr}"),
        ..Default::default()
    });
    let (_frame_tx, frame_rx) = mpsc::channel(1);
    let (event_tx, event_rx) = events::channel();
    let session = Session::new(
        config,
        Arc::new(SerialAdapter::new(WriteLog::new())),
        rover_peripherals::Peripherals::none(),
        frame_rx,
        event_tx,
        event_rx,
    );
    let err = session.run(&CancellationToken::new()).await.unwrap_err();
    assert!(matches!(err, SessionError::Connect { .. }));
    assert!(!err.completed_handshake());
}
