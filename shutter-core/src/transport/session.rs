use std::net::SocketAddr;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::endpoint::Endpoint;
use crate::error::ShutterError;
use crate::transport::state::{ConnectionState, LifecycleEvent, SessionEvent, SessionEventKind};

/// Upper bound on the websocket close handshake during teardown.
const CLOSE_GRACE: Duration = Duration::from_secs(1);

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

// ── SessionOptions ───────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Deadline for the TCP connect plus websocket handshake.
    pub connect_timeout: Duration,
    /// Outbound frames buffered towards the writer.
    pub outbound_capacity: usize,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            outbound_capacity: 100,
        }
    }
}

// ── SessionSender ────────────────────────────────────────────────

/// Cloneable send half of a [`TransportSession`].
#[derive(Debug, Clone)]
pub struct SessionSender {
    state: watch::Receiver<ConnectionState>,
    outbound: mpsc::Sender<Message>,
}

impl SessionSender {
    /// Queue a text frame for the writer.
    ///
    /// Fails with [`ShutterError::NotConnected`] unless the session is
    /// `Open`; the frame is dropped, not queued for later.
    pub async fn send(&self, text: String) -> Result<(), ShutterError> {
        let open = self.state.borrow().is_open();
        if !open {
            return Err(ShutterError::NotConnected);
        }
        self.outbound
            .send(Message::Text(text))
            .await
            .map_err(|_| ShutterError::NotConnected)
    }

    pub fn is_open(&self) -> bool {
        self.state.borrow().is_open()
    }
}

// ── TransportSession ─────────────────────────────────────────────

/// One websocket connection to one endpoint.
///
/// The connection is driven by a background task; this handle only
/// observes its state and feeds the writer. Dropping the handle closes
/// the connection.
#[derive(Debug)]
pub struct TransportSession {
    endpoint: Endpoint,
    generation: u64,
    state: watch::Receiver<ConnectionState>,
    sender: SessionSender,
    cancel: CancellationToken,
}

impl TransportSession {
    /// Start connecting to `endpoint` and return immediately.
    ///
    /// Connect failures are never returned here: they arrive as a
    /// [`LifecycleEvent::Errored`] on `events`. Must be called from
    /// within a Tokio runtime.
    pub fn connect(
        endpoint: Endpoint,
        generation: u64,
        options: SessionOptions,
        events: mpsc::Sender<SessionEvent>,
    ) -> Self {
        let (state_tx, state_rx) = watch::channel(ConnectionState::Connecting);
        let (out_tx, out_rx) = mpsc::channel(options.outbound_capacity.max(1));
        let cancel = CancellationToken::new();

        let driver = Driver {
            endpoint: endpoint.clone(),
            generation,
            state: state_tx,
            events,
            cancel: cancel.clone(),
        };
        tokio::spawn(driver.run(options.connect_timeout, out_rx));

        Self {
            endpoint,
            generation,
            sender: SessionSender {
                state: state_rx.clone(),
                outbound: out_tx,
            },
            state: state_rx,
            cancel,
        }
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Snapshot of the current connection state.
    pub fn state(&self) -> ConnectionState {
        self.state.borrow().clone()
    }

    pub fn is_open(&self) -> bool {
        self.state.borrow().is_open()
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.state.borrow().local_addr()
    }

    /// A watch on the connection state.
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    pub fn sender(&self) -> SessionSender {
        self.sender.clone()
    }

    /// See [`SessionSender::send`].
    pub async fn send(&self, text: String) -> Result<(), ShutterError> {
        self.sender.send(text).await
    }

    /// Close the connection. Idempotent, safe from any state.
    pub fn close(&self) {
        self.cancel.cancel();
    }

    /// Wait until the session reaches `Closed` or `Errored`.
    pub async fn closed(&self) -> ConnectionState {
        let mut state = self.state.clone();
        let reached = state.wait_for(|s| s.is_terminal()).await.map(|s| s.clone());
        // Driver gone: its last write was terminal.
        reached.unwrap_or_else(|_| state.borrow().clone())
    }
}

impl Drop for TransportSession {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

// ── Driver ───────────────────────────────────────────────────────

/// Background half of a session: the only writer of its state.
struct Driver {
    endpoint: Endpoint,
    generation: u64,
    state: watch::Sender<ConnectionState>,
    events: mpsc::Sender<SessionEvent>,
    cancel: CancellationToken,
}

impl Driver {
    async fn run(self, connect_timeout: Duration, outbound: mpsc::Receiver<Message>) {
        debug!(endpoint = %self.endpoint, generation = self.generation, "connecting");

        let connect = tokio::time::timeout(connect_timeout, connect_async(self.endpoint.as_str()));
        let ws = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => {
                self.finish(Ok(())).await;
                return;
            }
            result = connect => match result {
                Ok(Ok((ws, _response))) => ws,
                Ok(Err(e)) => {
                    self.finish(Err(e.to_string())).await;
                    return;
                }
                Err(_) => {
                    self.finish(Err(format!("connect timed out after {connect_timeout:?}"))).await;
                    return;
                }
            }
        };

        let local_addr = match ws.get_ref() {
            MaybeTlsStream::Plain(tcp) => tcp.local_addr().ok(),
            _ => None,
        };
        if !self.state.send_if_modified(|s| s.mark_open(local_addr).is_ok()) {
            return;
        }
        info!(endpoint = %self.endpoint, generation = self.generation, "session open");
        self.emit(SessionEventKind::Lifecycle(LifecycleEvent::Opened {
            endpoint: self.endpoint.clone(),
            local_addr,
        }))
        .await;

        let outcome = self.pump(ws, outbound).await;
        self.finish(outcome).await;
    }

    /// Move frames until either side closes or the session is cancelled.
    async fn pump(&self, ws: WsStream, mut outbound: mpsc::Receiver<Message>) -> Result<(), String> {
        let (mut sink, mut stream) = ws.split();

        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    if tokio::time::timeout(CLOSE_GRACE, sink.close()).await.is_err() {
                        debug!(endpoint = %self.endpoint, "close handshake timed out");
                    }
                    return Ok(());
                }
                Some(msg) = outbound.recv() => {
                    if let Err(e) = sink.send(msg).await {
                        return Err(e.to_string());
                    }
                }
                frame = stream.next() => match frame {
                    Some(Ok(Message::Text(text))) => {
                        if !self.deliver(text).await {
                            return Ok(());
                        }
                    }
                    Some(Ok(Message::Binary(data))) => match String::from_utf8(data) {
                        Ok(text) => {
                            if !self.deliver(text).await {
                                return Ok(());
                            }
                        }
                        Err(_) => warn!(endpoint = %self.endpoint, "dropping non-utf8 binary frame"),
                    },
                    Some(Ok(Message::Close(_))) | None => return Ok(()),
                    // Ping/pong are answered by the websocket layer.
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return Err(e.to_string()),
                }
            }
        }
    }

    /// Forward an inbound frame. Returns `false` once the owner is gone.
    async fn deliver(&self, text: String) -> bool {
        if self.cancel.is_cancelled() {
            return true;
        }
        self.events
            .send(SessionEvent {
                generation: self.generation,
                kind: SessionEventKind::Frame(text),
            })
            .await
            .is_ok()
    }

    /// Record the terminal transition and report it exactly once.
    async fn finish(&self, outcome: Result<(), String>) {
        let event = match outcome {
            Ok(()) => {
                if !self.state.send_if_modified(|s| s.mark_closed().is_ok()) {
                    return;
                }
                info!(endpoint = %self.endpoint, generation = self.generation, "session closed");
                LifecycleEvent::Closed {
                    endpoint: self.endpoint.clone(),
                }
            }
            Err(reason) => {
                let recorded = reason.clone();
                if !self.state.send_if_modified(|s| s.mark_errored(recorded).is_ok()) {
                    return;
                }
                warn!(endpoint = %self.endpoint, generation = self.generation, %reason, "session error");
                LifecycleEvent::Errored {
                    endpoint: self.endpoint.clone(),
                    reason,
                }
            }
        };
        self.emit(SessionEventKind::Lifecycle(event)).await;
    }

    async fn emit(&self, kind: SessionEventKind) {
        // The owner may already be gone; nothing left to notify then.
        let _ = self
            .events
            .send(SessionEvent {
                generation: self.generation,
                kind,
            })
            .await;
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    async fn refused_endpoint() -> Endpoint {
        // Bind then drop so nothing is listening on the port.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        Endpoint::parse(&format!("ws://{addr}")).unwrap()
    }

    #[tokio::test]
    async fn connect_failure_is_reported_as_event() {
        let (tx, mut rx) = mpsc::channel(8);
        let session = TransportSession::connect(refused_endpoint().await, 1, SessionOptions::default(), tx);

        let event = rx.recv().await.unwrap();
        assert_eq!(event.generation, 1);
        assert!(matches!(
            event.kind,
            SessionEventKind::Lifecycle(LifecycleEvent::Errored { .. })
        ));
        assert!(matches!(session.closed().await, ConnectionState::Errored { .. }));
    }

    #[tokio::test]
    async fn send_before_open_is_rejected() {
        let (tx, _rx) = mpsc::channel(8);
        let session = TransportSession::connect(refused_endpoint().await, 1, SessionOptions::default(), tx);
        let result = session.send("{}".into()).await;
        assert!(matches!(result, Err(ShutterError::NotConnected)));
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        // Accepts TCP but never answers the websocket handshake.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let endpoint = Endpoint::parse(&format!("ws://{}", listener.local_addr().unwrap())).unwrap();

        let (tx, mut rx) = mpsc::channel(8);
        let session = TransportSession::connect(endpoint, 3, SessionOptions::default(), tx);
        session.close();
        session.close();

        let event = rx.recv().await.unwrap();
        assert!(matches!(
            event.kind,
            SessionEventKind::Lifecycle(LifecycleEvent::Closed { .. })
        ));
        assert_eq!(session.closed().await, ConnectionState::Closed);
        session.close();

        // Exactly one lifecycle event for the single transition.
        drop(session);
        assert!(rx.recv().await.is_none());
    }
}
