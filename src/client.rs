//! Client runtime: one task that owns the connection and the controller.
//!
//! ```text
//!  SyncHandle ──commands──▶ ┌──────────────┐ ◀──socket events── socket task
//!                           │  event loop  │ ◀──fetch results── fetch tasks
//!  consumer ◀──snapshots─── └──────────────┘ ◀──reconnect deadline
//! ```
//!
//! All state is mutated on the loop's own turn, so nothing needs a lock.
//! Fetches run as separate tasks and re-enter the loop tagged with their
//! generation.

use crate::config::SyncConfig;
use crate::connection::{
    ConnectionManager, ConnectionState, Connector, LinkEvent, SocketEnvelope, SocketEvent,
    WebSocketConnector,
};
use crate::controller::{SyncController, SyncSnapshot};
use crate::error::{ConfigError, FetchError};
use crate::fetcher::{FetchConfig, FetchResult, RangeFetcher, RangeSource};
use crate::router::{Notification, NotificationRouter};
use crate::types::{FetchRequest, Mode};
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn, Instrument};
use uuid::Uuid;

/// Requests from a [`SyncHandle`] to its client.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    SetMode(Mode),
    Refresh,
    Shutdown,
}

struct FetchCompletion {
    generation: u64,
    result: Result<FetchResult, FetchError>,
}

/// Builder for a running sync client.
pub struct SyncClient {
    config: SyncConfig,
    connector: Arc<dyn Connector>,
    source: Arc<dyn RangeSource>,
    mode: Mode,
}

impl SyncClient {
    pub fn new(
        config: SyncConfig,
        connector: Arc<dyn Connector>,
        source: Arc<dyn RangeSource>,
    ) -> Self {
        let mode = Mode::live(config.lookback());
        Self {
            config,
            connector,
            source,
            mode,
        }
    }

    /// Client over a real WebSocket and the REST range endpoint.
    pub fn from_config(config: SyncConfig) -> Result<Self, ConfigError> {
        let fetcher = RangeFetcher::new(FetchConfig::from(&config))?;
        Ok(Self::new(
            config,
            Arc::new(WebSocketConnector),
            Arc::new(fetcher),
        ))
    }

    /// Mode to start in instead of live with the configured lookback.
    pub fn with_mode(mut self, mode: Mode) -> Self {
        self.mode = mode;
        self
    }

    /// Start the client on the current tokio runtime.
    pub fn spawn(self) -> SyncHandle {
        let id = Uuid::new_v4();
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (socket_tx, socket_rx) = mpsc::unbounded_channel();
        let (fetch_tx, fetch_rx) = mpsc::unbounded_channel();

        let controller = SyncController::new(self.mode);
        let snapshots = controller.subscribe();
        let connection = ConnectionManager::new(
            self.config.ws_url.clone(),
            self.connector,
            self.config.reconnect.clone(),
            socket_tx,
        );

        let runtime = Runtime {
            connection,
            controller,
            router: NotificationRouter::from_config(&self.config),
            source: self.source,
            commands: command_rx,
            socket_events: socket_rx,
            fetch_tx,
            fetch_results: fetch_rx,
        };

        let span = tracing::info_span!("sync_client", client_id = %id);
        let task = tokio::spawn(runtime.run().instrument(span));

        SyncHandle {
            id,
            commands: command_tx,
            snapshots,
            task,
        }
    }
}

/// Consumer side of a running client. Dropping it shuts the client down.
pub struct SyncHandle {
    id: Uuid,
    commands: mpsc::UnboundedSender<Command>,
    snapshots: watch::Receiver<SyncSnapshot>,
    task: JoinHandle<()>,
}

impl SyncHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Switch between live and fixed-range mode. Returns false if the client
    /// has stopped.
    pub fn set_mode(&self, mode: Mode) -> bool {
        self.commands.send(Command::SetMode(mode)).is_ok()
    }

    /// Re-pull the current range now.
    pub fn refresh(&self) -> bool {
        self.commands.send(Command::Refresh).is_ok()
    }

    /// Latest published snapshot.
    pub fn snapshot(&self) -> SyncSnapshot {
        self.snapshots.borrow().clone()
    }

    /// Receiver that observes every published snapshot.
    pub fn subscribe(&self) -> watch::Receiver<SyncSnapshot> {
        self.snapshots.clone()
    }

    /// Stop the client and wait until the socket is closed and the reconnect
    /// deadline cancelled.
    pub async fn shutdown(self) {
        let _ = self.commands.send(Command::Shutdown);
        if let Err(e) = self.task.await {
            warn!(error = %e, "Sync client task ended abnormally");
        }
    }
}

struct Runtime {
    connection: ConnectionManager,
    controller: SyncController,
    router: NotificationRouter,
    source: Arc<dyn RangeSource>,
    commands: mpsc::UnboundedReceiver<Command>,
    socket_events: mpsc::UnboundedReceiver<SocketEnvelope>,
    fetch_tx: mpsc::UnboundedSender<FetchCompletion>,
    fetch_results: mpsc::UnboundedReceiver<FetchCompletion>,
}

impl Runtime {
    async fn run(mut self) {
        info!(mode = ?self.controller.mode(), "Sync client started");
        self.connection.connect();

        loop {
            let deadline = self.connection.reconnect_deadline();
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(Command::SetMode(mode)) => {
                        let request = self.controller.set_mode(mode, Utc::now());
                        self.issue(request);
                    }
                    Some(Command::Refresh) => {
                        let request = self.controller.on_refetch_requested(Utc::now());
                        self.issue(request);
                    }
                    Some(Command::Shutdown) | None => break,
                },
                Some(envelope) = self.socket_events.recv() => self.on_socket(envelope),
                Some(done) = self.fetch_results.recv() => {
                    self.controller.on_fetch_completed(done.generation, done.result);
                }
                _ = wait_until(deadline) => {
                    if let Some(link) = self.connection.reconnect_due() {
                        self.on_link(link);
                    }
                }
            }
        }

        self.controller.dispose();
        self.connection.teardown().await;
        debug_assert_eq!(self.connection.state(), ConnectionState::Terminated);
        info!("Sync client stopped");
    }

    fn on_socket(&mut self, envelope: SocketEnvelope) {
        if !self.connection.is_current(envelope.epoch) {
            debug!(epoch = envelope.epoch, "Dropping event from retired socket");
            return;
        }
        match envelope.event {
            SocketEvent::Message(text) => self.on_message(&text),
            lifecycle => {
                if let Some(link) = self.connection.on_socket_event(&lifecycle) {
                    self.on_link(link);
                }
            }
        }
    }

    fn on_link(&mut self, link: LinkEvent) {
        match link {
            LinkEvent::Opened => {
                let request = self.controller.on_connection_opened(Utc::now());
                self.issue(request);
            }
            LinkEvent::Lost(reason) => self.controller.on_connection_lost(reason.as_deref()),
        }
    }

    fn on_message(&mut self, text: &str) {
        match self.router.route(text) {
            Ok(Notification::RefetchRequested) => {
                info!("Update notification received; refetching");
                let request = self.controller.on_refetch_requested(Utc::now());
                self.issue(request);
            }
            Ok(Notification::Liveness { message }) => {
                debug!(?message, "Liveness echo from server");
            }
            Ok(Notification::DirectData(records)) => {
                self.controller.on_direct_data(records);
            }
            Ok(Notification::Ignored) => debug!("Ignoring push message"),
            Err(err) => {
                warn!(error = %err, "Dropping push message");
                self.controller.on_protocol_error(&err);
            }
        }
    }

    fn issue(&self, request: Option<FetchRequest>) {
        let Some(request) = request else {
            return;
        };
        let source = Arc::clone(&self.source);
        let completions = self.fetch_tx.clone();
        tokio::spawn(
            async move {
                let result = source.fetch(request.range).await;
                // The loop may be gone; the result is then simply dropped.
                let _ = completions.send(FetchCompletion {
                    generation: request.generation,
                    result,
                });
            }
            .in_current_span(),
        );
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}
