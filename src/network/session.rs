//! RCON Session
//!
//! Connects to a server, authenticates, and exchanges commands. All protocol
//! state for a live connection is owned by a single I/O task; callers talk to
//! it over channels and each call gets its own reply slot.

use bytes::Bytes;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, oneshot, RwLock};
use tokio::task::JoinHandle;

use super::connection::{connect_tcp, Connection, ConnectionError, ConnectionState};
use super::correlator::{Correlator, Dispatch, RequestError, RequestResult, Response};
use super::{resolve_host, SessionConfig};
use crate::protocol::{Frame, PacketType};

/// Session errors
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Connection error: {0}")]
    Connection(#[from] ConnectionError),

    #[error("Request failed: {0}")]
    Request(#[from] RequestError),

    #[error("Not connected")]
    NotConnected,

    #[error("Session closed before the request was answered")]
    Closed,

    #[error("Timed out waiting for the server")]
    Timeout,
}

pub type SessionResult<T> = Result<T, SessionError>;

/// Direction of a traced frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Outbound,
    Inbound,
}

/// Events emitted by the session
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// Socket opened
    Connected {
        addr: SocketAddr,
    },
    /// Socket closed, for any reason
    Disconnected {
        reason: String,
    },
    /// Transport or protocol failure that ended the connection
    Error {
        message: String,
    },
    /// Authentication succeeded
    Authenticated,
    /// Frame that no request claimed, such as a pushed log line
    Notification {
        frame: Frame,
    },
    /// Every frame sent or received, when frame tracing is enabled
    FrameTrace {
        direction: Direction,
        frame: Frame,
    },
}

/// Authentication progress for the current connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthState {
    Unauthenticated,
    Authenticating,
    Authenticated,
}

#[derive(Debug, Clone, Copy)]
struct SessionState {
    connection: ConnectionState,
    auth: AuthState,
}

impl Default for SessionState {
    fn default() -> Self {
        Self {
            connection: ConnectionState::Disconnected,
            auth: AuthState::Unauthenticated,
        }
    }
}

/// Non-blocking event publisher shared by the session and its I/O task
#[derive(Clone)]
struct EventSink {
    tx: mpsc::Sender<SessionEvent>,
    /// Set once a consumer has taken the receiver; nothing is queued before
    subscribed: Arc<AtomicBool>,
    trace_frames: bool,
}

impl EventSink {
    fn emit(&self, event: SessionEvent) {
        if !self.subscribed.load(Ordering::Acquire) {
            return;
        }
        if let Err(mpsc::error::TrySendError::Full(event)) = self.tx.try_send(event) {
            tracing::warn!("Event channel full, dropping {:?}", event);
        }
    }

    fn trace(&self, direction: Direction, frame: &Frame) {
        if !self.trace_frames {
            return;
        }
        let frame = if direction == Direction::Outbound && frame.kind.is_auth_request() {
            Frame::new(frame.id, frame.kind, Bytes::from_static(b"********"))
        } else {
            frame.clone()
        };
        self.emit(SessionEvent::FrameTrace { direction, frame });
    }
}

struct Request {
    kind: PacketType,
    body: Bytes,
    reply: oneshot::Sender<RequestResult>,
}

/// Handle to the I/O task of a live connection
struct SessionHandle {
    requests: mpsc::Sender<Request>,
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<()>,
    connected: Arc<AtomicBool>,
}

impl SessionHandle {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

/// RCON Session
pub struct Session {
    /// Server host name or address
    host: String,
    /// Server port
    port: u16,
    /// Session configuration
    config: SessionConfig,
    /// Connection and auth state, reset by the I/O task on disconnect
    state: Arc<RwLock<SessionState>>,
    /// Event publisher
    events: EventSink,
    /// Event receiver (for consumers)
    event_rx: Option<mpsc::Receiver<SessionEvent>>,
    /// Live connection, if any
    handle: Option<SessionHandle>,
}

impl Session {
    /// Create a new, disconnected session
    pub fn new(host: impl Into<String>, port: u16, config: SessionConfig) -> Self {
        let (event_tx, event_rx) = mpsc::channel(config.event_buffer.max(1));
        let events = EventSink {
            tx: event_tx,
            subscribed: Arc::new(AtomicBool::new(false)),
            trace_frames: config.trace_frames,
        };

        Self {
            host: host.into(),
            port,
            config,
            state: Arc::new(RwLock::new(SessionState::default())),
            events,
            event_rx: Some(event_rx),
            handle: None,
        }
    }

    /// Take the event receiver (can only be called once).
    ///
    /// Events are only queued from this point on; a session whose receiver
    /// is never taken publishes nothing.
    pub fn take_event_receiver(&mut self) -> Option<mpsc::Receiver<SessionEvent>> {
        let rx = self.event_rx.take()?;
        self.events.subscribed.store(true, Ordering::Release);
        Some(rx)
    }

    /// Open the socket.
    ///
    /// Returns `Ok(false)` without touching anything if a socket is already
    /// open.
    pub async fn connect(&mut self) -> SessionResult<bool> {
        if self.is_connected() {
            tracing::warn!("Already connected to {}:{}", self.host, self.port);
            return Ok(false);
        }
        self.reap().await;

        self.state.write().await.connection = ConnectionState::Connecting;
        tracing::info!("Connecting to {}:{}", self.host, self.port);

        match self.open().await {
            Ok((addr, conn)) => {
                self.attach(conn, addr).await;
                Ok(true)
            }
            Err(e) => {
                self.state.write().await.connection = ConnectionState::Disconnected;
                Err(e)
            }
        }
    }

    async fn open(&self) -> SessionResult<(SocketAddr, Connection)> {
        let addr = resolve_host(&self.host, self.port).await?;
        let conn = connect_tcp(addr, self.config.connect_timeout(), self.config.max_frame_size).await?;
        Ok((addr, conn))
    }

    /// Hand an established stream to a new I/O task
    async fn attach<S>(&mut self, conn: Connection<S>, addr: SocketAddr)
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (request_tx, request_rx) = mpsc::channel(64);
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let connected = Arc::new(AtomicBool::new(true));

        *self.state.write().await = SessionState {
            connection: ConnectionState::Connected,
            auth: AuthState::Unauthenticated,
        };

        tracing::info!("Connected to {}", addr);
        self.events.emit(SessionEvent::Connected { addr });

        let io = IoTask {
            conn,
            correlator: Correlator::new(),
            events: self.events.clone(),
            state: self.state.clone(),
            connected: connected.clone(),
        };
        let task = tokio::spawn(io.run(request_rx, shutdown_rx));

        self.handle = Some(SessionHandle {
            requests: request_tx,
            shutdown: shutdown_tx,
            task,
            connected,
        });
    }

    /// Join the I/O task of a connection that already went away
    async fn reap(&mut self) {
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.task.await {
                tracing::error!("Session task failed: {}", e);
            }
        }
    }

    /// Close the socket.
    ///
    /// Returns whether a live connection was closed. Outstanding requests
    /// fail with `RequestError::Unresolved`.
    pub async fn disconnect(&mut self) -> bool {
        let Some(handle) = self.handle.take() else {
            return false;
        };

        let was_connected = handle.is_connected();
        let _ = handle.shutdown.send(());
        if let Err(e) = handle.task.await {
            tracing::error!("Session task failed: {}", e);
        }
        was_connected
    }

    /// Authenticate with the server's RCON password
    pub async fn authenticate(&self, password: &str) -> SessionResult<()> {
        if !self.is_connected() {
            return Err(SessionError::NotConnected);
        }

        self.state.write().await.auth = AuthState::Authenticating;

        let body = Bytes::copy_from_slice(password.as_bytes());
        match self
            .request(PacketType::AUTH, body, Some(self.config.auth_timeout()))
            .await
        {
            Ok(_) => {
                self.state.write().await.auth = AuthState::Authenticated;
                tracing::info!("Authenticated with {}:{}", self.host, self.port);
                self.events.emit(SessionEvent::Authenticated);
                Ok(())
            }
            Err(e) => {
                self.state.write().await.auth = AuthState::Unauthenticated;
                tracing::warn!("Authentication failed: {}", e);
                Err(e)
            }
        }
    }

    /// Execute a console command and wait for its complete reply
    pub async fn send(&self, command: &str) -> SessionResult<Response> {
        self.send_with_type(command, PacketType::EXEC_COMMAND).await
    }

    /// Send a body under an arbitrary packet type and wait for the reply
    pub async fn send_with_type(&self, command: &str, kind: PacketType) -> SessionResult<Response> {
        let timeout = if kind.is_auth_request() {
            Some(self.config.auth_timeout())
        } else {
            self.config.command_timeout()
        };
        self.request(kind, Bytes::copy_from_slice(command.as_bytes()), timeout)
            .await
    }

    async fn request(
        &self,
        kind: PacketType,
        body: Bytes,
        timeout: Option<Duration>,
    ) -> SessionResult<Response> {
        let handle = self
            .handle
            .as_ref()
            .filter(|handle| handle.is_connected())
            .ok_or(SessionError::NotConnected)?;

        let (reply, rx) = oneshot::channel();
        handle
            .requests
            .send(Request { kind, body, reply })
            .await
            .map_err(|_| SessionError::NotConnected)?;

        let result = match timeout {
            Some(timeout) => tokio::time::timeout(timeout, rx)
                .await
                .map_err(|_| SessionError::Timeout)?,
            None => rx.await,
        };

        let result = result.map_err(|_| SessionError::Closed)?;
        Ok(result?)
    }

    /// Get the current connection state
    pub async fn state(&self) -> ConnectionState {
        self.state.read().await.connection
    }

    /// Get the current authentication state
    pub async fn auth_state(&self) -> AuthState {
        self.state.read().await.auth
    }

    /// Check if a socket is open
    pub fn is_connected(&self) -> bool {
        self.handle.as_ref().is_some_and(SessionHandle::is_connected)
    }

    /// Server address as configured
    pub fn target(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Owns the connection and the correlator for one connection lifetime
struct IoTask<S> {
    conn: Connection<S>,
    correlator: Correlator,
    events: EventSink,
    state: Arc<RwLock<SessionState>>,
    connected: Arc<AtomicBool>,
}

impl<S> IoTask<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    async fn run(
        mut self,
        mut requests: mpsc::Receiver<Request>,
        mut shutdown: oneshot::Receiver<()>,
    ) {
        let reason = loop {
            tokio::select! {
                // Frames from the server
                result = self.conn.recv() => {
                    match result {
                        Ok(Some(frame)) => self.handle_frame(frame),
                        Ok(None) => {
                            let reason = "Connection closed by server".to_string();
                            tracing::warn!("{} {}", reason, self.conn.peer());
                            self.events.emit(SessionEvent::Error { message: reason.clone() });
                            break reason;
                        }
                        Err(e) => {
                            tracing::error!("Connection to {} failed: {}", self.conn.peer(), e);
                            self.events.emit(SessionEvent::Error { message: e.to_string() });
                            break format!("Error: {}", e);
                        }
                    }
                }

                // Requests from the session
                Some(request) = requests.recv() => {
                    let frames = self.correlator.register(request.kind, request.body, request.reply);
                    for frame in &frames {
                        self.events.trace(Direction::Outbound, frame);
                    }
                    // A peer that stops reading must not block a disconnect
                    let sent = tokio::select! {
                        result = self.conn.send_frames(&frames) => result,
                        _ = &mut shutdown => break "Client disconnect requested".to_string(),
                    };
                    if let Err(e) = sent {
                        tracing::error!("Send to {} failed: {}", self.conn.peer(), e);
                        self.events.emit(SessionEvent::Error { message: e.to_string() });
                        break format!("Send error: {}", e);
                    }
                }

                // Disconnect requested, or the session was dropped
                _ = &mut shutdown => {
                    break "Client disconnect requested".to_string();
                }
            }
        };

        self.finish(reason).await;
    }

    fn handle_frame(&mut self, frame: Frame) {
        self.events.trace(Direction::Inbound, &frame);

        match self.correlator.dispatch(frame) {
            Dispatch::Resolved { id } => {
                tracing::debug!("Request {} resolved", id);
            }
            Dispatch::Accumulated { id, first } => {
                if first {
                    tracing::debug!("First reply frame for request {}", id);
                }
            }
            Dispatch::Ignored { id } => {
                tracing::trace!("Ignored frame for request {}", id);
            }
            Dispatch::AuthRejected { count } => {
                tracing::warn!("Server rejected authentication ({} pending)", count);
            }
            Dispatch::Notification(frame) => {
                tracing::debug!("Unsolicited frame id={} type={}", frame.id, frame.kind);
                self.events.emit(SessionEvent::Notification { frame });
            }
        }
    }

    async fn finish(mut self, reason: String) {
        self.connected.store(false, Ordering::SeqCst);

        let unresolved = self.correlator.fail_all(&reason);
        if unresolved > 0 {
            tracing::warn!("{} requests unresolved at disconnect", unresolved);
        }

        *self.state.write().await = SessionState::default();

        if let Err(e) = self.conn.close().await {
            tracing::debug!("Error closing connection to {}: {}", self.conn.peer(), e);
        }

        let stats = self.conn.stats();
        tracing::info!(
            "Disconnected from {}: {} ({} frames in, {} frames out)",
            self.conn.peer(),
            reason,
            stats.frames_received,
            stats.frames_sent
        );

        self.events.emit(SessionEvent::Disconnected { reason });
    }
}
