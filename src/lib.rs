//! Biosensor Sync - real-time sync client for remote biosensor time series.
//!
//! Keeps a local view of a server-side time series (heart rate, HRV, motion
//! count, ...) consistent with the server. A WebSocket push channel tells the
//! client *that* something changed; the REST range endpoint tells it *what*.
//!
//! # Guarantees
//!
//! - **Admissible data only**: every record in the dataset has a timestamp and a value
//! - **No stale overwrites**: a late response for an older request never replaces newer data
//! - **Self-healing**: dropped sockets reconnect after a fixed delay; failed fetches retry on the next trigger
//! - **Clean teardown**: shutting down cancels the pending reconnect and closes the socket
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       Sync Client                           │
//! ├─────────────────────────────────────────────────────────────┤
//! │  ┌─────────────┐   ┌──────────────┐   ┌─────────────┐       │
//! │  │ Connection  │──▶│ Notification │──▶│    Sync     │       │
//! │  │  Manager    │   │    Router    │   │ Controller  │       │
//! │  └─────────────┘   └──────────────┘   └─────────────┘       │
//! │         ▲                                 │     │           │
//! │         │ reconnect                 fetch │     │ snapshot  │
//! │         │                                 ▼     ▼           │
//! │  ┌─────────────┐                  ┌─────────────┐           │
//! │  │  WebSocket  │                  │    Range    │  consumer │
//! │  │   server    │                  │   Fetcher   │           │
//! │  └─────────────┘                  └─────────────┘           │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use biosensor_sync::{SyncClient, SyncConfig};
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let client = SyncClient::from_config(SyncConfig::default())?;
//! let handle = client.spawn();
//!
//! let mut updates = handle.subscribe();
//! while updates.changed().await.is_ok() {
//!     let snapshot = updates.borrow().clone();
//!     println!("{} records, connected: {}", snapshot.dataset.len(), snapshot.is_connected);
//! }
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod config;
pub mod connection;
pub mod controller;
pub mod error;
pub mod fetcher;
pub mod router;
pub mod summary;
pub mod types;

// Re-export key types at crate root for convenience
pub use client::{Command, SyncClient, SyncHandle};
pub use config::{ReconnectPolicy, SyncConfig};
pub use connection::{ConnectionManager, ConnectionState, Connector, Socket, WebSocketConnector};
pub use controller::{Acceptance, SyncController, SyncSnapshot};
pub use error::{ConfigError, FetchError, LimitWarning, ProtocolError, TransportError};
pub use fetcher::{fetch_url, FetchConfig, FetchResult, RangeFetcher, RangeSource};
pub use router::{Notification, NotificationRouter};
pub use summary::{summarize, summarize_series, SeriesSummary};
pub use types::{Dataset, FetchRequest, Measurement, MeasurementType, Mode, Series, TimeRange};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
