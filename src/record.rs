use std::fmt;

/// Ordered header collection attached to a stream record.
///
/// Keys may repeat; `last` returns the value of the most recently appended
/// header with that key, matching the broker client's lookup rule.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordHeaders {
    entries: Vec<(String, Vec<u8>)>,
}

impl RecordHeaders {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Appends a header, preserving earlier values under the same key.
    pub fn append(&mut self, key: impl Into<String>, value: impl Into<Vec<u8>>) {
        self.entries.push((key.into(), value.into()));
    }

    /// Last value recorded under `key`, if any.
    pub fn last(&self, key: &str) -> Option<&[u8]> {
        self.entries
            .iter()
            .rev()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_slice())
    }

    /// Last value under `key`, decoded as UTF-8.
    pub fn last_str(&self, key: &str) -> Option<&str> {
        self.last(key).and_then(|v| std::str::from_utf8(v).ok())
    }

    /// Headers in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[u8])> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Trace identifiers carried by value with each record through the pipeline.
///
/// Workers are drawn from a pool unrelated to the polling thread, so the
/// context rides on the record envelope instead of thread-local storage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TraceContext {
    pub trace_id: Option<String>,
    pub parent_span_id: Option<String>,
}

impl TraceContext {
    /// Extracts W3C `traceparent` identifiers from record headers.
    ///
    /// Absent or malformed headers yield empty fields, never an error.
    pub fn from_headers(headers: &RecordHeaders) -> Self {
        let Some(raw) = headers.last_str("traceparent") else {
            return Self::default();
        };
        // traceparent: <version>-<trace-id>-<parent-id>-<flags>
        let mut parts = raw.split('-');
        let _version = parts.next();
        let trace_id = parts.next().filter(|id| id.len() == 32);
        let parent_span_id = parts.next().filter(|id| id.len() == 16);
        if trace_id.is_none() {
            return Self::default();
        }
        Self {
            trace_id: trace_id.map(str::to_string),
            parent_span_id: parent_span_id.map(str::to_string),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.trace_id.is_none() && self.parent_span_id.is_none()
    }
}

/// One message unit addressed by topic, partition, and offset.
///
/// Records are immutable once built and move through the pipeline with a
/// single owner at a time: poll loop, then queue, then exactly one worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamRecord {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub key: Option<Vec<u8>>,
    pub value: Vec<u8>,
    pub headers: RecordHeaders,
}

impl StreamRecord {
    pub fn new(
        topic: impl Into<String>,
        partition: i32,
        offset: i64,
        value: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            topic: topic.into(),
            partition,
            offset,
            key: None,
            value: value.into(),
            headers: RecordHeaders::new(),
        }
    }

    pub fn with_key(mut self, key: impl Into<Vec<u8>>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        self.headers.append(key, value);
        self
    }

    /// Trace context for this record, parsed from its headers.
    pub fn trace_context(&self) -> TraceContext {
        TraceContext::from_headers(&self.headers)
    }
}

impl fmt::Display for StreamRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}@{}", self.topic, self.partition, self.offset)
    }
}
