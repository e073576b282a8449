//! Integration tests: full capture round-trips, endpoint switching and
//! error scenarios over real websocket connections on localhost.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use serde_json::Value;
use shutter_core::message::decode_data_uri;
use shutter_core::{
    ArtifactPipeline, ArtifactPolicy, CaptureController, CaptureError, CaptureEvent,
    CaptureResult, Command, ConnectionState, Dimensions, DirectoryStorage, Endpoint,
    LifecycleEvent, OrchestratorConfig, OrchestratorHandle, Presentation, ReadinessPolicy,
    Reencoded, Reencoder, Sensor, SensorState, SessionOptions, SessionOrchestrator, ShutterError,
    TransportSession,
};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;

const WAIT: Duration = Duration::from_secs(5);
const QUIET: Duration = Duration::from_millis(300);

// ── Controller side ──────────────────────────────────────────────

/// One agent connection as seen by the controller.
struct Peer {
    sink: SplitSink<WebSocketStream<TcpStream>, Message>,
    frames: mpsc::Receiver<String>,
}

impl Peer {
    async fn send(&mut self, text: &str) {
        self.sink.send(Message::Text(text.to_string())).await.unwrap();
    }

    /// Next text frame, or `None` if the agent closed the connection.
    async fn next_frame(&mut self) -> Option<String> {
        tokio::time::timeout(WAIT, self.frames.recv())
            .await
            .expect("timed out waiting for a frame")
    }

    async fn expect_silence(&mut self) {
        let got = tokio::time::timeout(QUIET, self.frames.recv()).await;
        assert!(got.is_err(), "unexpected frame: {got:?}");
    }
}

/// A websocket server accepting any number of agents.
struct ControllerServer {
    endpoint: Endpoint,
    peers: mpsc::Receiver<Peer>,
}

impl ControllerServer {
    async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let endpoint = Endpoint::parse(&listener.local_addr().unwrap().to_string()).unwrap();
        let (peer_tx, peers) = mpsc::channel(8);

        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let Ok(ws) = tokio_tungstenite::accept_async(stream).await else {
                    continue;
                };
                let (sink, mut stream) = ws.split();
                let (frame_tx, frames) = mpsc::channel(16);
                tokio::spawn(async move {
                    while let Some(Ok(msg)) = stream.next().await {
                        match msg {
                            Message::Text(text) => {
                                if frame_tx.send(text).await.is_err() {
                                    break;
                                }
                            }
                            Message::Close(_) => break,
                            _ => {}
                        }
                    }
                });
                if peer_tx.send(Peer { sink, frames }).await.is_err() {
                    break;
                }
            }
        });

        Self { endpoint, peers }
    }

    async fn accept(&mut self) -> Peer {
        tokio::time::timeout(WAIT, self.peers.recv())
            .await
            .expect("agent never connected")
            .expect("server stopped")
    }

    async fn expect_no_connection(&mut self) {
        let got = tokio::time::timeout(QUIET, self.peers.recv()).await;
        assert!(got.is_err(), "unexpected extra connection");
    }
}

// ── Agent side ───────────────────────────────────────────────────

struct StillSensor {
    warmup: Duration,
    ready: AtomicBool,
    never_ready: bool,
    jpeg: Bytes,
    width: u32,
    height: u32,
}

impl StillSensor {
    fn new(jpeg: &[u8], width: u32, height: u32) -> Self {
        Self {
            warmup: Duration::ZERO,
            ready: AtomicBool::new(false),
            never_ready: false,
            jpeg: Bytes::copy_from_slice(jpeg),
            width,
            height,
        }
    }
}

#[async_trait]
impl Sensor for StillSensor {
    async fn initialize(&self) -> Result<(), ShutterError> {
        if self.never_ready {
            std::future::pending::<()>().await;
        }
        tokio::time::sleep(self.warmup).await;
        self.ready.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn capture(&self) -> Result<CaptureResult, ShutterError> {
        Ok(CaptureResult {
            raw_bytes: self.jpeg.clone(),
            width: self.width,
            height: self.height,
            source_uri: "file:///dcim/still.jpg".into(),
            device_tag: "10.0.0.7".into(),
        })
    }

    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }
}

/// Halves both dimensions and emits a fixed small payload.
struct HalvingReencoder;

impl Reencoder for HalvingReencoder {
    fn reencode(
        &self,
        _jpeg: &[u8],
        _quality: u8,
        resize: Option<Dimensions>,
    ) -> Result<Reencoded, ShutterError> {
        let dims = resize.unwrap_or(Dimensions {
            width: 320,
            height: 240,
        });
        Ok(Reencoded {
            bytes: vec![0xFF, 0xD8, 0xFF, 0xD9],
            width: dims.width,
            height: dims.height,
        })
    }
}

#[derive(Default)]
struct Recorder {
    lifecycle: Mutex<Vec<LifecycleEvent>>,
    commands: Mutex<Vec<Command>>,
}

impl Presentation for Recorder {
    fn on_lifecycle(&self, event: &LifecycleEvent) {
        self.lifecycle.lock().unwrap().push(event.clone());
    }

    fn on_command(&self, command: &Command) {
        self.commands.lock().unwrap().push(command.clone());
    }
}

struct Agent {
    handle: OrchestratorHandle,
    task: JoinHandle<()>,
    recorder: Arc<Recorder>,
}

impl Agent {
    fn start(endpoint: Endpoint, sensor: StillSensor, policy: ReadinessPolicy, pipeline: ArtifactPipeline) -> Self {
        let controller = CaptureController::new(Arc::new(sensor), policy);
        let recorder = Arc::new(Recorder::default());
        let (orchestrator, handle) = SessionOrchestrator::new(
            OrchestratorConfig::new(endpoint),
            controller,
            Arc::new(pipeline),
            recorder.clone(),
        );
        let task = tokio::spawn(orchestrator.run());
        Self {
            handle,
            task,
            recorder,
        }
    }

    fn simple(endpoint: Endpoint) -> Self {
        Self::start(
            endpoint,
            StillSensor::new(b"\xFF\xD8jpeg\xFF\xD9", 640, 480),
            ReadinessPolicy::default(),
            ArtifactPipeline::new(ArtifactPolicy::default(), Arc::new(HalvingReencoder)),
        )
    }

    async fn stop(self) {
        self.handle.shutdown().await.unwrap();
        tokio::time::timeout(WAIT, self.task).await.unwrap().unwrap();
    }
}

fn parse_artifact(frame: &str) -> Value {
    let value: Value = serde_json::from_str(frame).unwrap();
    assert_eq!(value["type"], "RECEIVE_PHOTO");
    value["message"].clone()
}

// ── Round-trips ──────────────────────────────────────────────────

#[tokio::test]
async fn take_photo_returns_artifact() {
    let mut server = ControllerServer::start().await;
    let agent = Agent::simple(server.endpoint.clone());
    let mut peer = server.accept().await;

    peer.send(r#"{"type":"TAKE_PHOTO"}"#).await;
    let message = parse_artifact(&peer.next_frame().await.unwrap());

    assert_eq!(message["width"], 640);
    assert_eq!(message["height"], 480);
    assert_eq!(message["resultUri"], "file:///dcim/still.jpg");
    assert_eq!(message["ip"], "10.0.0.7");
    let image = decode_data_uri(message["image"].as_str().unwrap()).unwrap();
    assert_eq!(image, b"\xFF\xD8jpeg\xFF\xD9");

    let mut last = agent.handle.last_artifact();
    tokio::time::timeout(WAIT, last.wait_for(|a| a.is_some()))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(agent.recorder.commands.lock().unwrap().as_slice(), &[Command::CaptureNow]);

    agent.stop().await;
}

#[tokio::test]
async fn reencoded_dimensions_reach_the_wire() {
    let mut server = ControllerServer::start().await;
    let policy = ArtifactPolicy {
        budget_bytes: 4,
        ..ArtifactPolicy::default()
    };
    let agent = Agent::start(
        server.endpoint.clone(),
        StillSensor::new(&[0xAB; 64], 8000, 6000),
        ReadinessPolicy::default(),
        ArtifactPipeline::new(policy, Arc::new(HalvingReencoder)),
    );
    let mut peer = server.accept().await;

    peer.send(r#"{"type":"TAKE_PHOTO"}"#).await;
    let message = parse_artifact(&peer.next_frame().await.unwrap());

    assert_eq!(message["width"], 4096);
    assert_eq!(message["height"], 3072);
    let image = decode_data_uri(message["image"].as_str().unwrap()).unwrap();
    assert_eq!(image, vec![0xFF, 0xD8, 0xFF, 0xD9]);

    agent.stop().await;
}

#[tokio::test]
async fn capture_waits_for_warming_sensor() {
    let mut server = ControllerServer::start().await;
    let mut sensor = StillSensor::new(b"late", 10, 10);
    sensor.warmup = Duration::from_millis(1200);
    let policy = ReadinessPolicy {
        poll_interval: Duration::from_millis(100),
        ..ReadinessPolicy::default()
    };
    let agent = Agent::start(
        server.endpoint.clone(),
        sensor,
        policy,
        ArtifactPipeline::new(ArtifactPolicy::default(), Arc::new(HalvingReencoder)),
    );
    let mut events = agent.handle.subscribe_capture_events();
    let mut peer = server.accept().await;

    peer.send(r#"{"type":"OPEN_CAMERA"}"#).await;
    peer.send(r#"{"type":"TAKE_PHOTO"}"#).await;
    let message = parse_artifact(&peer.next_frame().await.unwrap());
    assert_eq!(message["width"], 10);

    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        seen.push(event);
    }
    assert!(matches!(seen.first(), Some(CaptureEvent::Waiting { .. })));
    assert!(seen.contains(&CaptureEvent::Countdown { remaining: 4 }));
    assert!(matches!(seen.last(), Some(CaptureEvent::Captured { width: 10, height: 10 })));
    assert_eq!(*agent.handle.sensor_state().borrow(), SensorState::Ready);

    agent.stop().await;
}

#[tokio::test]
async fn readiness_timeout_sends_nothing() {
    let mut server = ControllerServer::start().await;
    let mut sensor = StillSensor::new(b"never", 1, 1);
    sensor.never_ready = true;
    let policy = ReadinessPolicy {
        poll_interval: Duration::from_millis(50),
        ceiling: Duration::from_millis(250),
        countdown_from: 0,
        scanner_visible_at: 0,
    };
    let agent = Agent::start(
        server.endpoint.clone(),
        sensor,
        policy,
        ArtifactPipeline::new(ArtifactPolicy::default(), Arc::new(HalvingReencoder)),
    );
    let mut events = agent.handle.subscribe_capture_events();
    let mut peer = server.accept().await;

    peer.send(r#"{"type":"TAKE_PHOTO"}"#).await;
    let failure = tokio::time::timeout(WAIT, async {
        loop {
            if let CaptureEvent::Failed(e) = events.recv().await.unwrap() {
                return e;
            }
        }
    })
    .await
    .unwrap();
    assert_eq!(failure, CaptureError::ReadinessTimeout(Duration::from_millis(250)));
    peer.expect_silence().await;
    assert_eq!(*agent.handle.sensor_state().borrow(), SensorState::Initializing);

    agent.stop().await;
}

// ── Robustness ───────────────────────────────────────────────────

#[tokio::test]
async fn malformed_frames_are_ignored() {
    let mut server = ControllerServer::start().await;
    let agent = Agent::simple(server.endpoint.clone());
    let mut peer = server.accept().await;

    peer.send("{not json").await;
    peer.send(r#"{"type":"SELF_DESTRUCT"}"#).await;
    peer.expect_silence().await;
    assert_eq!(*agent.handle.sensor_state().borrow(), SensorState::Uninitialized);
    assert!(agent.recorder.commands.lock().unwrap().is_empty());

    // The session survived.
    peer.send(r#"{"type":"TAKE_PHOTO"}"#).await;
    parse_artifact(&peer.next_frame().await.unwrap());

    agent.stop().await;
}

#[tokio::test]
async fn denied_persistence_still_transmits() {
    let dir = tempfile::tempdir().unwrap();
    let mut server = ControllerServer::start().await;
    let pipeline = ArtifactPipeline::new(ArtifactPolicy::default(), Arc::new(HalvingReencoder))
        .with_storage(Arc::new(DirectoryStorage::new(dir.path(), false)));
    let agent = Agent::start(
        server.endpoint.clone(),
        StillSensor::new(b"private", 2, 2),
        ReadinessPolicy::default().persisting(),
        pipeline,
    );
    let mut peer = server.accept().await;

    peer.send(r#"{"type":"TAKE_PHOTO"}"#).await;
    parse_artifact(&peer.next_frame().await.unwrap());
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);

    agent.stop().await;
}

#[tokio::test]
async fn granted_persistence_saves_a_copy() {
    let dir = tempfile::tempdir().unwrap();
    let target: PathBuf = dir.path().join("captures");
    let mut server = ControllerServer::start().await;
    let pipeline = ArtifactPipeline::new(ArtifactPolicy::default(), Arc::new(HalvingReencoder))
        .with_storage(Arc::new(DirectoryStorage::new(&target, true)));
    let agent = Agent::start(
        server.endpoint.clone(),
        StillSensor::new(b"keep me", 2, 2),
        ReadinessPolicy::default(),
        pipeline,
    );
    let mut peer = server.accept().await;

    peer.send(r#"{"type":"TAKE_PHOTO"}"#).await;
    parse_artifact(&peer.next_frame().await.unwrap());

    let mut last = agent.handle.last_artifact();
    tokio::time::timeout(WAIT, last.wait_for(|a| a.is_some()))
        .await
        .unwrap()
        .unwrap();
    let saved = target.join(DirectoryStorage::file_name(b"keep me"));
    assert_eq!(std::fs::read(saved).unwrap(), b"keep me");

    agent.stop().await;
}

// ── Endpoint changes ─────────────────────────────────────────────

#[tokio::test]
async fn endpoint_switch_replaces_the_session() {
    let mut server_a = ControllerServer::start().await;
    let mut server_b = ControllerServer::start().await;
    let agent = Agent::simple(server_a.endpoint.clone());
    let mut peer_a = server_a.accept().await;

    agent.handle.update_endpoint(server_b.endpoint.clone()).await.unwrap();

    // `a` is closed.
    assert!(peer_a.next_frame().await.is_none());
    let mut peer_b = server_b.accept().await;
    server_b.expect_no_connection().await;
    server_a.expect_no_connection().await;

    // Only `b` is served now.
    let _ = peer_a.sink.send(Message::Text(r#"{"type":"TAKE_PHOTO"}"#.into())).await;
    peer_b.send(r#"{"type":"TAKE_PHOTO"}"#).await;
    parse_artifact(&peer_b.next_frame().await.unwrap());
    assert_eq!(agent.recorder.commands.lock().unwrap().len(), 1);

    let lifecycle = agent.recorder.lifecycle.lock().unwrap().clone();
    assert!(lifecycle.iter().any(|e| matches!(e,
        LifecycleEvent::Opened { endpoint, .. } if *endpoint == server_b.endpoint)));

    agent.stop().await;
}

#[tokio::test]
async fn endpoint_change_mid_wait_cancels_the_capture() {
    let mut server_a = ControllerServer::start().await;
    let mut server_b = ControllerServer::start().await;
    let mut sensor = StillSensor::new(b"\xFF\xD8late\xFF\xD9", 32, 24);
    sensor.warmup = Duration::from_millis(1500);
    let policy = ReadinessPolicy {
        poll_interval: Duration::from_millis(100),
        ..ReadinessPolicy::default()
    };
    let agent = Agent::start(
        server_a.endpoint.clone(),
        sensor,
        policy,
        ArtifactPipeline::new(ArtifactPolicy::default(), Arc::new(HalvingReencoder)),
    );
    let mut events = agent.handle.subscribe_capture_events();
    let mut peer_a = server_a.accept().await;

    peer_a.send(r#"{"type":"TAKE_PHOTO"}"#).await;
    tokio::time::timeout(WAIT, async {
        while !matches!(events.recv().await.unwrap(), CaptureEvent::Waiting { .. }) {}
    })
    .await
    .unwrap();

    agent.handle.update_endpoint(server_b.endpoint.clone()).await.unwrap();

    // `a` closes without ever receiving the photo.
    assert!(peer_a.next_frame().await.is_none());
    let mut peer_b = server_b.accept().await;

    // Once the sensor is up, a surviving wait would capture on its next poll.
    let mut state = agent.handle.sensor_state();
    tokio::time::timeout(WAIT, state.wait_for(|s| *s == SensorState::Ready))
        .await
        .unwrap()
        .unwrap();
    peer_b.expect_silence().await;
    assert!(agent.handle.last_artifact().borrow().is_none());
    while let Ok(event) = events.try_recv() {
        assert!(!matches!(event, CaptureEvent::Captured { .. }), "stray capture: {event:?}");
    }

    // The in-flight slot was released.
    peer_b.send(r#"{"type":"TAKE_PHOTO"}"#).await;
    let message = parse_artifact(&peer_b.next_frame().await.unwrap());
    assert_eq!(message["width"], 32);

    agent.stop().await;
}

#[tokio::test]
async fn reapplying_the_same_endpoint_keeps_the_session() {
    let mut server = ControllerServer::start().await;
    let agent = Agent::simple(server.endpoint.clone());
    let mut peer = server.accept().await;

    // Let the session open before re-applying.
    let deadline = tokio::time::Instant::now() + WAIT;
    while agent.recorder.lifecycle.lock().unwrap().is_empty() {
        assert!(tokio::time::Instant::now() < deadline);
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    agent.handle.update_endpoint(server.endpoint.clone()).await.unwrap();
    server.expect_no_connection().await;

    peer.send(r#"{"type":"TAKE_PHOTO"}"#).await;
    parse_artifact(&peer.next_frame().await.unwrap());

    agent.stop().await;
}

#[tokio::test]
async fn shutdown_closes_the_connection() {
    let mut server = ControllerServer::start().await;
    let agent = Agent::simple(server.endpoint.clone());
    let mut peer = server.accept().await;

    agent.stop().await;
    assert!(peer.next_frame().await.is_none());
}

// ── Transport ────────────────────────────────────────────────────

#[tokio::test]
async fn send_after_close_is_not_connected() {
    let mut server = ControllerServer::start().await;
    let (events, mut rx) = mpsc::channel(8);
    let session =
        TransportSession::connect(server.endpoint.clone(), 1, SessionOptions::default(), events);
    let mut peer = server.accept().await;

    let opened = tokio::time::timeout(WAIT, rx.recv()).await.unwrap().unwrap();
    assert!(matches!(
        opened.kind,
        shutter_core::SessionEventKind::Lifecycle(LifecycleEvent::Opened { .. })
    ));
    assert!(session.local_addr().is_some());

    session.send(r#"{"type":"PING"}"#.into()).await.unwrap();
    assert_eq!(peer.next_frame().await.unwrap(), r#"{"type":"PING"}"#);

    let sender = session.sender();
    session.close();
    assert_eq!(session.closed().await, ConnectionState::Closed);
    assert!(matches!(
        sender.send("late".into()).await,
        Err(ShutterError::NotConnected)
    ));
    assert!(peer.next_frame().await.is_none());
}

#[tokio::test]
async fn inbound_frames_arrive_in_order() {
    let mut server = ControllerServer::start().await;
    let (events, mut rx) = mpsc::channel(16);
    let _session =
        TransportSession::connect(server.endpoint.clone(), 7, SessionOptions::default(), events);
    let mut peer = server.accept().await;

    for i in 0..5 {
        peer.send(&format!("frame-{i}")).await;
    }

    let mut frames = Vec::new();
    while frames.len() < 5 {
        let event = tokio::time::timeout(WAIT, rx.recv()).await.unwrap().unwrap();
        assert_eq!(event.generation, 7);
        if let shutter_core::SessionEventKind::Frame(text) = event.kind {
            frames.push(text);
        }
    }
    assert_eq!(frames, (0..5).map(|i| format!("frame-{i}")).collect::<Vec<_>>());
}
