use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use crate::record::StreamRecord;

/// One committed offset, in commit order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommittedOffset {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
}

/// Upstream stream boundary consumed by the poll loop.
///
/// These five primitives are all the pipeline requires of a broker client.
/// Sources with transport-level auto-commit may ignore `commit`.
pub trait StreamSource: Send {
    /// Fetches up to `max_records` records. Returns an empty batch while
    /// paused or when nothing is pending.
    fn poll(&mut self, max_records: usize) -> Vec<StreamRecord>;

    fn pause(&mut self);

    fn resume(&mut self);

    /// Marks an offset commit-eligible.
    fn commit(&mut self, topic: &str, partition: i32, offset: i64);
}

#[derive(Debug, Default)]
struct MemoryInner {
    pending: VecDeque<StreamRecord>,
    paused: bool,
    committed: Vec<CommittedOffset>,
}

/// Deterministic in-memory source for demos and integration tests.
///
/// Clones share state, so a test can keep a handle for feeding records and
/// inspecting commits while the orchestrator owns the polling side.
#[derive(Debug, Clone, Default)]
pub struct MemoryStreamSource {
    inner: Arc<Mutex<MemoryInner>>,
}

impl MemoryStreamSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a record for a later poll.
    pub fn push(&self, record: StreamRecord) {
        self.inner.lock().unwrap().pending.push_back(record);
    }

    pub fn push_all(&self, records: impl IntoIterator<Item = StreamRecord>) {
        let mut inner = self.inner.lock().unwrap();
        inner.pending.extend(records);
    }

    /// Offsets committed so far, in commit order.
    pub fn committed(&self) -> Vec<CommittedOffset> {
        self.inner.lock().unwrap().committed.clone()
    }

    pub fn is_paused(&self) -> bool {
        self.inner.lock().unwrap().paused
    }

    /// Records still waiting to be polled.
    pub fn pending_len(&self) -> usize {
        self.inner.lock().unwrap().pending.len()
    }
}

impl StreamSource for MemoryStreamSource {
    fn poll(&mut self, max_records: usize) -> Vec<StreamRecord> {
        let mut inner = self.inner.lock().unwrap();
        if inner.paused {
            return Vec::new();
        }
        let take = max_records.min(inner.pending.len());
        inner.pending.drain(..take).collect()
    }

    fn pause(&mut self) {
        self.inner.lock().unwrap().paused = true;
    }

    fn resume(&mut self) {
        self.inner.lock().unwrap().paused = false;
    }

    fn commit(&mut self, topic: &str, partition: i32, offset: i64) {
        self.inner.lock().unwrap().committed.push(CommittedOffset {
            topic: topic.to_string(),
            partition,
            offset,
        });
    }
}
