//! Mock connector for testing.
//!
//! Every `open()` hands the client one end of an in-memory channel and keeps
//! the other end as a [`MockPeer`] the test drives like a server would.

use super::{Connector, Socket};
use crate::error::TransportError;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;

type Frame = Result<String, TransportError>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Default)]
struct MockConnectorInner {
    urls: Vec<String>,
    peers: Vec<MockPeer>,
    fail_next_connect: Option<String>,
}

/// Mock connector. Clones share state.
#[derive(Clone, Default)]
pub struct MockConnector {
    inner: Arc<Mutex<MockConnectorInner>>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cause the next `open()` to fail with the given error.
    pub fn fail_next_connect(&self, error: &str) {
        lock(&self.inner).fail_next_connect = Some(error.to_string());
    }

    /// Number of `open()` calls, failed ones included.
    pub fn attempts(&self) -> usize {
        lock(&self.inner).urls.len()
    }

    pub fn urls(&self) -> Vec<String> {
        lock(&self.inner).urls.clone()
    }

    /// Server side of the most recently opened socket.
    pub fn last_peer(&self) -> Option<MockPeer> {
        lock(&self.inner).peers.last().cloned()
    }

    /// Server side of every successfully opened socket, oldest first.
    pub fn peers(&self) -> Vec<MockPeer> {
        lock(&self.inner).peers.clone()
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn open(&self, url: &str) -> Result<Box<dyn Socket>, TransportError> {
        let mut inner = lock(&self.inner);
        inner.urls.push(url.to_string());

        if let Some(error) = inner.fail_next_connect.take() {
            return Err(TransportError::ConnectionFailed(error));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let closed = Arc::new(AtomicBool::new(false));
        inner.peers.push(MockPeer {
            tx: Arc::new(Mutex::new(Some(tx))),
            closed: Arc::clone(&closed),
        });

        Ok(Box::new(MockSocket { rx, closed }))
    }
}

/// Server side of a mock socket.
#[derive(Clone)]
pub struct MockPeer {
    tx: Arc<Mutex<Option<mpsc::UnboundedSender<Frame>>>>,
    closed: Arc<AtomicBool>,
}

impl MockPeer {
    /// Push a text frame to the client. Returns false if the socket is gone.
    pub fn send_text(&self, text: &str) -> bool {
        self.send(Ok(text.to_string()))
    }

    /// Make the client's next read fail.
    pub fn send_error(&self, error: TransportError) -> bool {
        self.send(Err(error))
    }

    /// Close from the server side.
    pub fn close(&self) {
        lock(&self.tx).take();
    }

    /// Whether the client closed its end.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn send(&self, frame: Frame) -> bool {
        lock(&self.tx)
            .as_ref()
            .map(|tx| tx.send(frame).is_ok())
            .unwrap_or(false)
    }
}

struct MockSocket {
    rx: mpsc::UnboundedReceiver<Frame>,
    closed: Arc<AtomicBool>,
}

#[async_trait]
impl Socket for MockSocket {
    async fn recv(&mut self) -> Option<Result<String, TransportError>> {
        self.rx.recv().await
    }

    async fn close(&mut self) {
        self.closed.store(true, Ordering::SeqCst);
        self.rx.close();
    }
}
