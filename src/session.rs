use std::net::SocketAddr;
use std::sync::{Arc, Mutex as StdMutex};

use futures_util::stream::SplitSink;
use futures_util::SinkExt;
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tokio_util::codec::Framed;

use crate::codec::JsonLineCodec;
use crate::models::ModerationState;

type Sink = SplitSink<Framed<TcpStream, JsonLineCodec>, Value>;

/// Moderation state shared between a connection's own request loop and the
/// registry: the loop reads it to gate `public`/`private` sends, the
/// registry writes it the instant a `kick`/`ban`/`un*` verdict lands, so a
/// moderation action is visible to the affected session without it having
/// to sign back in.
pub type SharedModerationState = Arc<StdMutex<ModerationState>>;

/// Something pushed to a session from outside its own read loop: a public
/// broadcast, a private message relay, or a moderation verdict landing while
/// the session is idle.
pub enum SessionEvent {
    Frame(Value),
    Close,
}

/// What the registry needs to know about a live connection in order to
/// route messages to it and apply moderation. Cheap to clone: the actual
/// socket lives in the connection task, reached only through `outbox`.
#[derive(Clone)]
pub struct SessionHandle {
    pub addr: SocketAddr,
    outbox: mpsc::UnboundedSender<SessionEvent>,
    state: SharedModerationState,
}

impl SessionHandle {
    /// Queues a frame for delivery. Silently dropped if the session has
    /// already disconnected; the registry reconciles its session map
    /// lazily rather than synchronously on every send.
    pub fn push(&self, frame: Value) {
        let _ = self.outbox.send(SessionEvent::Frame(frame));
    }

    pub fn close(&self) {
        let _ = self.outbox.send(SessionEvent::Close);
    }

    /// Current moderation state as observed by this live connection. Used by
    /// broadcast fan-out to skip recipients a concurrent moderation action
    /// has just invalidated.
    pub fn state(&self) -> ModerationState {
        *self.state.lock().unwrap()
    }

    /// Overwrites the shared moderation cell. Called by the registry the
    /// instant a verdict is applied, so the connection's own request loop
    /// observes it on its very next `public`/`private` gate check.
    pub fn set_state(&self, state: ModerationState) {
        *self.state.lock().unwrap() = state;
    }
}

/// Per-connection state mutated by request handlers. Not shared outside the
/// connection's own task, so a plain struct (no locking) suffices here; the
/// registry only ever sees the derived `SessionHandle`.
pub struct SessionState {
    pub addr: SocketAddr,
    pub username: Option<String>,
    pub state: SharedModerationState,
    pub rooms: Vec<String>,
    pub pending_rooms: Vec<String>,
}

impl SessionState {
    pub fn new(addr: SocketAddr) -> Self {
        Self {
            addr,
            username: None,
            state: Arc::new(StdMutex::new(ModerationState::Valid)),
            rooms: Vec::new(),
            pending_rooms: Vec::new(),
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.username.is_some()
    }

    pub fn moderation_state(&self) -> ModerationState {
        *self.state.lock().unwrap()
    }

    pub fn set_moderation_state(&self, state: ModerationState) {
        *self.state.lock().unwrap() = state;
    }
}

/// Owns the write half of a connection and serializes every frame sent to
/// the client, whether it's a direct reply to a request or an asynchronous
/// push (broadcast, private relay, moderation) arriving from another task.
pub struct Outbound {
    sink: Arc<AsyncMutex<Sink>>,
}

impl Outbound {
    pub fn new(sink: Sink) -> Self {
        Self {
            sink: Arc::new(AsyncMutex::new(sink)),
        }
    }

    pub async fn send(&self, frame: Value) -> std::io::Result<()> {
        let mut guard = self.sink.lock().await;
        guard
            .send(frame)
            .await
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))
    }

    /// Spawns the task that drains `rx` and writes each event to the shared
    /// sink, so pushes from other sessions interleave safely with direct
    /// replies written through `send` on this same `Outbound`.
    pub fn spawn_pump(&self, mut rx: mpsc::UnboundedReceiver<SessionEvent>) {
        let sink = self.sink.clone();
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                match event {
                    SessionEvent::Frame(frame) => {
                        let mut guard = sink.lock().await;
                        if guard.send(frame).await.is_err() {
                            break;
                        }
                    }
                    SessionEvent::Close => {
                        let mut guard = sink.lock().await;
                        let _ = guard.close().await;
                        break;
                    }
                }
            }
        });
    }
}

/// Builds a `SessionHandle`/`Outbound` pair: the handle is what the registry
/// stores and routes messages through, the pump is what actually owns the
/// socket's write half. `state` is the same cell the connection's own
/// `SessionState` reads, so writes the registry makes through the handle are
/// visible to the connection immediately.
pub fn new_channel(addr: SocketAddr, outbound: &Outbound, state: SharedModerationState) -> SessionHandle {
    let (tx, rx) = mpsc::unbounded_channel();
    outbound.spawn_pump(rx);
    SessionHandle {
        addr,
        outbox: tx,
        state,
    }
}
