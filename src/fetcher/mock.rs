//! Mock range source for testing.
//!
//! Records every requested range and answers from a queue. A queued reply can
//! be held open so tests control the order in which responses arrive.

use super::{FetchResult, RangeSource};
use crate::error::FetchError;
use crate::types::{Measurement, TimeRange};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::oneshot;

type Reply = Result<FetchResult, FetchError>;

enum Queued {
    Ready(Reply),
    Held(oneshot::Receiver<Reply>),
}

#[derive(Default)]
struct MockInner {
    requests: Vec<TimeRange>,
    replies: VecDeque<Queued>,
}

/// Mock range source. Clones share state.
#[derive(Clone, Default)]
pub struct MockRangeSource {
    inner: Arc<Mutex<MockInner>>,
}

impl MockRangeSource {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MockInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue a reply for the next unanswered fetch.
    pub fn respond_with(&self, reply: Reply) {
        self.lock().replies.push_back(Queued::Ready(reply));
    }

    /// Queue a successful reply carrying `records`, with the default limit.
    pub fn respond_with_records(&self, records: Vec<Measurement>) {
        self.respond_with(Ok(FetchResult::from_records(records, 10_000)));
    }

    /// Queue a reply that is only delivered once the returned sender fires.
    pub fn hold_next(&self) -> oneshot::Sender<Reply> {
        let (tx, rx) = oneshot::channel();
        self.lock().replies.push_back(Queued::Held(rx));
        tx
    }

    /// Every range requested so far, in call order.
    pub fn requests(&self) -> Vec<TimeRange> {
        self.lock().requests.clone()
    }

    pub fn request_count(&self) -> usize {
        self.lock().requests.len()
    }
}

#[async_trait]
impl RangeSource for MockRangeSource {
    async fn fetch(&self, range: TimeRange) -> Result<FetchResult, FetchError> {
        let queued = {
            let mut inner = self.lock();
            inner.requests.push(range);
            inner.replies.pop_front()
        };

        match queued {
            Some(Queued::Ready(reply)) => reply,
            Some(Queued::Held(rx)) => rx
                .await
                .unwrap_or_else(|_| Err(FetchError::Transport("reply dropped".to_string()))),
            None => Ok(FetchResult::from_records(Vec::new(), 10_000)),
        }
    }
}
