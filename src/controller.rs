//! Canonical dataset ownership and stale-response suppression.
//!
//! Every fetch trigger bumps the generation counter and tags its request with
//! the new value. A completed fetch is accepted only if its tag is still the
//! current generation, so the dataset always reflects the most recently
//! requested range no matter in which order responses arrive.

use crate::error::{FetchError, LimitWarning, ProtocolError};
use crate::fetcher::FetchResult;
use crate::types::{Dataset, FetchRequest, Measurement, Mode};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, info, warn};

pub const CONNECTION_ERROR: &str = "WebSocket connection error";
pub const PARSE_ERROR: &str = "Failed to parse WebSocket message";

/// Immutable view handed to consumers.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncSnapshot {
    pub dataset: Dataset,
    pub is_connected: bool,
    pub error: Option<String>,
    pub warning: Option<LimitWarning>,
    pub mode: Mode,
    pub generation: u64,
}

/// What happened to a completed fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acceptance {
    /// Result replaced the dataset (or, for a failure, set the error).
    Accepted,
    /// A newer trigger happened while this fetch was in flight.
    Stale,
    /// Controller has been disposed.
    Disposed,
}

pub struct SyncController {
    mode: Mode,
    dataset: Dataset,
    generation: u64,
    connected: bool,
    error: Option<String>,
    warning: Option<LimitWarning>,
    disposed: bool,
    publisher: watch::Sender<SyncSnapshot>,
}

impl SyncController {
    pub fn new(mode: Mode) -> Self {
        let (publisher, _) = watch::channel(SyncSnapshot {
            mode,
            ..SyncSnapshot::default()
        });
        Self {
            mode,
            dataset: Dataset::default(),
            generation: 0,
            connected: false,
            error: None,
            warning: None,
            disposed: false,
            publisher,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<SyncSnapshot> {
        self.publisher.subscribe()
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn dataset(&self) -> &Dataset {
        &self.dataset
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    pub fn snapshot(&self) -> SyncSnapshot {
        SyncSnapshot {
            dataset: self.dataset.clone(),
            is_connected: self.connected,
            error: self.error.clone(),
            warning: self.warning,
            mode: self.mode,
            generation: self.generation,
        }
    }

    /// Switch mode. Returns the fetch to issue if the mode actually changed.
    pub fn set_mode(&mut self, mode: Mode, now: DateTime<Utc>) -> Option<FetchRequest> {
        if self.disposed || mode == self.mode {
            return None;
        }
        info!(?mode, "Mode changed");
        self.mode = mode;
        let request = self.trigger(now);
        self.publish();
        request
    }

    pub fn on_connection_opened(&mut self, now: DateTime<Utc>) -> Option<FetchRequest> {
        if self.disposed {
            return None;
        }
        self.connected = true;
        self.error = None;
        self.publish();
        self.trigger(now)
    }

    pub fn on_connection_lost(&mut self, reason: Option<&str>) {
        if self.disposed {
            return;
        }
        self.connected = false;
        if let Some(reason) = reason {
            debug!(reason, "Connection lost with error");
            self.error = Some(CONNECTION_ERROR.to_string());
        }
        self.publish();
    }

    pub fn on_refetch_requested(&mut self, now: DateTime<Utc>) -> Option<FetchRequest> {
        if self.disposed {
            return None;
        }
        self.trigger(now)
    }

    /// Replace the dataset with data pushed inline. Always accepted; bumps the
    /// generation so any fetch still in flight becomes stale.
    pub fn on_direct_data(&mut self, records: Vec<Measurement>) -> bool {
        if self.disposed {
            return false;
        }
        self.generation += 1;
        self.dataset = Dataset::from_records(records);
        self.error = None;
        self.warning = None;
        debug!(
            generation = self.generation,
            records = self.dataset.len(),
            "Direct data accepted"
        );
        self.publish();
        true
    }

    pub fn on_protocol_error(&mut self, err: &ProtocolError) {
        if self.disposed {
            return;
        }
        debug!(error = %err, "Protocol error surfaced");
        self.error = Some(PARSE_ERROR.to_string());
        self.publish();
    }

    pub fn on_fetch_completed(
        &mut self,
        generation: u64,
        result: Result<FetchResult, FetchError>,
    ) -> Acceptance {
        if self.disposed {
            return Acceptance::Disposed;
        }
        if generation != self.generation {
            debug!(
                generation,
                current = self.generation,
                "Discarding stale fetch result"
            );
            return Acceptance::Stale;
        }

        match result {
            Ok(result) => {
                self.warning = result.warning();
                self.dataset = Dataset::from_records(result.records);
                self.error = None;
                info!(
                    generation,
                    records = self.dataset.len(),
                    truncated = self.warning.is_some(),
                    "Dataset updated"
                );
            }
            Err(err) => {
                warn!(generation, error = %err, "Fetch failed");
                self.error = Some(format!("Failed to fetch biosensor data: {err}"));
            }
        }
        self.publish();
        Acceptance::Accepted
    }

    /// Stop accepting anything. In-flight results will be discarded.
    pub fn dispose(&mut self) {
        self.disposed = true;
    }

    fn trigger(&mut self, now: DateTime<Utc>) -> Option<FetchRequest> {
        self.generation += 1;
        let request = FetchRequest {
            generation: self.generation,
            range: self.mode.resolve(now),
        };
        debug!(generation = request.generation, range = %request.range, "Fetch triggered");
        Some(request)
    }

    fn publish(&self) {
        self.publisher.send_replace(self.snapshot());
    }
}
