//! Worker configuration

use crate::registry::StreamDef;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub stream_name: String,
    pub consumer_group: String,
    /// Unique per process; defaults to `worker-<uuid>`
    pub consumer_id: String,
    pub dlq_stream: String,
    /// Approximate MAXLEN applied on every re-enqueue
    pub max_length: i64,
    /// Entries read per XREADGROUP call
    pub batch_size: usize,
    /// BLOCK duration for new entries
    pub block_timeout_ms: u64,
    /// Jobs processed concurrently within one batch
    pub max_concurrent_jobs: usize,
    /// Idle time after which another consumer's pending entry is claimed
    pub claim_timeout_ms: u64,
    /// How often to look for abandoned entries
    pub claim_interval_ms: u64,
}

impl WorkerConfig {
    pub fn from_stream_def<S: StreamDef>() -> Self {
        Self::new(S::STREAM_NAME, S::CONSUMER_GROUP)
            .with_dlq_stream(S::DLQ_STREAM)
            .with_max_length(S::MAX_LENGTH)
    }

    pub fn new(stream_name: impl Into<String>, consumer_group: impl Into<String>) -> Self {
        let stream_name = stream_name.into();
        Self {
            dlq_stream: format!("{stream_name}:dlq"),
            stream_name,
            consumer_group: consumer_group.into(),
            consumer_id: format!("worker-{}", Uuid::new_v4()),
            max_length: 100_000,
            batch_size: 10,
            block_timeout_ms: 5000,
            max_concurrent_jobs: 1,
            claim_timeout_ms: 60_000,
            claim_interval_ms: 30_000,
        }
    }

    pub fn with_consumer_id(mut self, id: impl Into<String>) -> Self {
        self.consumer_id = id.into();
        self
    }

    /// Run as a different consumer group over the same stream
    pub fn with_consumer_group(mut self, group: impl Into<String>) -> Self {
        self.consumer_group = group.into();
        self
    }

    pub fn with_dlq_stream(mut self, stream: impl Into<String>) -> Self {
        self.dlq_stream = stream.into();
        self
    }

    pub fn with_max_length(mut self, max_length: i64) -> Self {
        self.max_length = max_length;
        self
    }

    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size.max(1);
        self
    }

    pub fn with_block_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.block_timeout_ms = timeout_ms;
        self
    }

    pub fn with_max_concurrent_jobs(mut self, count: usize) -> Self {
        self.max_concurrent_jobs = count.max(1);
        self
    }

    pub fn with_claim_timeout_ms(mut self, timeout: u64) -> Self {
        self.claim_timeout_ms = timeout;
        self
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self::new("stream:jobs", "workers")
    }
}
