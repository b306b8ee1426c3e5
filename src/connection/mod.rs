//! Push channel lifecycle.
//!
//! The socket lifecycle is an explicit state machine:
//!
//! ```text
//! Disconnected ──connect──▶ Connecting ──opened──▶ Open
//!                               ▲                   │
//!                         timer │                   │ closed / failed
//!                               │                   ▼
//!                               └──────── ReconnectWaiting
//!
//! any ──teardown──▶ Terminated
//! ```
//!
//! [`ConnectionState::transition`] is pure; [`ConnectionManager`] owns the
//! socket task and the single reconnect deadline and carries out the effects.

mod mock;
mod websocket;

pub use mock::{MockConnector, MockPeer};
pub use websocket::WebSocketConnector;

use crate::config::ReconnectPolicy;
use crate::error::TransportError;
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Opens push channel sockets.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn open(&self, url: &str) -> Result<Box<dyn Socket>, TransportError>;
}

/// An open push channel socket.
#[async_trait]
pub trait Socket: Send {
    /// Next text payload. `None` once the peer has closed the socket.
    async fn recv(&mut self) -> Option<Result<String, TransportError>>;

    /// Close gracefully.
    async fn close(&mut self);
}

/// Lifecycle state of the push channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Open,
    ReconnectWaiting,
    Terminated,
}

/// Inputs to the state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    Connect,
    Opened,
    Closed,
    Failed(String),
    TimerFired,
    Teardown,
}

/// Side effects requested by a transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    OpenSocket,
    CloseSocket,
    ArmReconnect,
    CancelReconnect,
    NotifyOpened,
    NotifyLost(Option<String>),
}

impl ConnectionState {
    pub fn transition(self, event: &ConnectionEvent) -> (ConnectionState, Vec<Effect>) {
        use ConnectionState::*;

        match (self, event) {
            (Terminated, _) => (Terminated, vec![]),
            (_, ConnectionEvent::Teardown) => {
                (Terminated, vec![Effect::CancelReconnect, Effect::CloseSocket])
            }
            (Disconnected, ConnectionEvent::Connect) => (Connecting, vec![Effect::OpenSocket]),
            (ReconnectWaiting, ConnectionEvent::Connect | ConnectionEvent::TimerFired) => {
                (Connecting, vec![Effect::CancelReconnect, Effect::OpenSocket])
            }
            (Connecting, ConnectionEvent::Opened) => (Open, vec![Effect::NotifyOpened]),
            (Connecting | Open, ConnectionEvent::Closed) => (
                ReconnectWaiting,
                vec![Effect::ArmReconnect, Effect::NotifyLost(None)],
            ),
            (Connecting | Open, ConnectionEvent::Failed(reason)) => (
                ReconnectWaiting,
                vec![Effect::ArmReconnect, Effect::NotifyLost(Some(reason.clone()))],
            ),
            // Connect while Connecting/Open is a no-op: one live socket at most.
            (state, _) => (state, vec![]),
        }
    }

    pub fn is_open(&self) -> bool {
        matches!(self, ConnectionState::Open)
    }
}

/// What a socket task reports back to the event loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SocketEvent {
    Opened,
    Message(String),
    Closed,
    Failed(TransportError),
}

/// A socket event tagged with the connection attempt that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SocketEnvelope {
    pub epoch: u64,
    pub event: SocketEvent,
}

/// Link status changes the rest of the client cares about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    Opened,
    Lost(Option<String>),
}

struct SocketTask {
    shutdown: Option<oneshot::Sender<()>>,
    handle: JoinHandle<()>,
}

/// Owns the push channel socket and its reconnect deadline.
pub struct ConnectionManager {
    url: String,
    connector: Arc<dyn Connector>,
    policy: ReconnectPolicy,
    events: mpsc::UnboundedSender<SocketEnvelope>,
    state: ConnectionState,
    epoch: u64,
    attempts: u32,
    reconnect_at: Option<Instant>,
    socket: Option<SocketTask>,
}

impl ConnectionManager {
    pub fn new(
        url: impl Into<String>,
        connector: Arc<dyn Connector>,
        policy: ReconnectPolicy,
        events: mpsc::UnboundedSender<SocketEnvelope>,
    ) -> Self {
        Self {
            url: url.into(),
            connector,
            policy,
            events,
            state: ConnectionState::Disconnected,
            epoch: 0,
            attempts: 0,
            reconnect_at: None,
            socket: None,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// When the pending reconnect fires, if one is armed.
    pub fn reconnect_deadline(&self) -> Option<Instant> {
        self.reconnect_at
    }

    /// Whether `epoch` belongs to the current socket.
    pub fn is_current(&self, epoch: u64) -> bool {
        self.socket.is_some() && epoch == self.epoch
    }

    pub fn connect(&mut self) -> Option<LinkEvent> {
        self.handle(ConnectionEvent::Connect)
    }

    /// Called by the event loop once the reconnect deadline has passed.
    pub fn reconnect_due(&mut self) -> Option<LinkEvent> {
        self.reconnect_at = None;
        self.handle(ConnectionEvent::TimerFired)
    }

    /// Feed a lifecycle event from the current socket.
    ///
    /// Message events are not lifecycle events and are left to the caller.
    pub fn on_socket_event(&mut self, event: &SocketEvent) -> Option<LinkEvent> {
        match event {
            SocketEvent::Opened => self.handle(ConnectionEvent::Opened),
            SocketEvent::Closed => {
                self.socket = None;
                self.handle(ConnectionEvent::Closed)
            }
            SocketEvent::Failed(err) => {
                self.socket = None;
                self.handle(ConnectionEvent::Failed(err.to_string()))
            }
            SocketEvent::Message(_) => None,
        }
    }

    /// Cancel the reconnect deadline and close the socket. Nothing is emitted
    /// afterwards.
    pub async fn teardown(&mut self) {
        let closing = self.socket.take();
        self.handle(ConnectionEvent::Teardown);

        if let Some(mut task) = closing {
            if let Some(shutdown) = task.shutdown.take() {
                let _ = shutdown.send(());
            }
            if tokio::time::timeout(Duration::from_secs(1), &mut task.handle)
                .await
                .is_err()
            {
                warn!("Socket did not close in time; aborting");
                task.handle.abort();
            }
        }
    }

    fn handle(&mut self, event: ConnectionEvent) -> Option<LinkEvent> {
        let (next, effects) = self.state.transition(&event);
        if next != self.state {
            debug!(from = ?self.state, to = ?next, ?event, "Connection transition");
        }
        self.state = next;

        let mut link = None;
        for effect in effects {
            match effect {
                Effect::OpenSocket => self.open_socket(),
                Effect::CloseSocket => self.close_socket(),
                Effect::ArmReconnect => self.arm_reconnect(),
                Effect::CancelReconnect => self.reconnect_at = None,
                Effect::NotifyOpened => {
                    info!(url = %self.url, "Push channel connected");
                    self.attempts = 0;
                    link = Some(LinkEvent::Opened);
                }
                Effect::NotifyLost(reason) => link = Some(LinkEvent::Lost(reason)),
            }
        }
        link
    }

    fn open_socket(&mut self) {
        self.close_socket();
        self.epoch += 1;
        info!(url = %self.url, epoch = self.epoch, "Connecting push channel");

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let handle = tokio::spawn(run_socket(
            Arc::clone(&self.connector),
            self.url.clone(),
            self.epoch,
            self.events.clone(),
            shutdown_rx,
        ));
        self.socket = Some(SocketTask {
            shutdown: Some(shutdown_tx),
            handle,
        });
    }

    fn close_socket(&mut self) {
        if let Some(mut task) = self.socket.take() {
            if let Some(shutdown) = task.shutdown.take() {
                let _ = shutdown.send(());
            }
        }
    }

    fn arm_reconnect(&mut self) {
        let delay = self.policy.delay_for(self.attempts);
        self.attempts = self.attempts.saturating_add(1);
        // Re-arming replaces the previous deadline.
        self.reconnect_at = Some(Instant::now() + delay);
        info!(delay_secs = delay.as_secs_f64(), "Push channel lost; reconnect scheduled");
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        if let Some(task) = self.socket.take() {
            task.handle.abort();
        }
    }
}

async fn run_socket(
    connector: Arc<dyn Connector>,
    url: String,
    epoch: u64,
    events: mpsc::UnboundedSender<SocketEnvelope>,
    mut shutdown: oneshot::Receiver<()>,
) {
    let emit = |event: SocketEvent| events.send(SocketEnvelope { epoch, event }).is_ok();

    let opened = tokio::select! {
        result = connector.open(&url) => result,
        _ = &mut shutdown => return,
    };

    let mut socket = match opened {
        Ok(socket) => socket,
        Err(err) => {
            warn!(error = %err, "Push channel connect failed");
            emit(SocketEvent::Failed(err));
            return;
        }
    };

    if !emit(SocketEvent::Opened) {
        socket.close().await;
        return;
    }

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                socket.close().await;
                return;
            }
            frame = socket.recv() => match frame {
                Some(Ok(text)) => {
                    if !emit(SocketEvent::Message(text)) {
                        socket.close().await;
                        return;
                    }
                }
                Some(Err(err)) => {
                    warn!(error = %err, "Push channel error");
                    emit(SocketEvent::Failed(err));
                    return;
                }
                None => {
                    info!("Push channel closed by peer");
                    emit(SocketEvent::Closed);
                    return;
                }
            }
        }
    }
}
