//! Stream definitions, job contract and processor trait.

use crate::error::StreamError;
use async_trait::async_trait;
use serde::{Serialize, de::DeserializeOwned};

/// Stream definition trait.
///
/// Each domain declares its stream, consumer group and dead-letter stream
/// through a zero-sized type.
///
/// # Example
///
/// ```rust,ignore
/// use stream_worker::StreamDef;
///
/// pub struct DeliveryStream;
///
/// impl StreamDef for DeliveryStream {
///     const STREAM_NAME: &'static str = "notificacoes:entregas";
///     const CONSUMER_GROUP: &'static str = "dispatch-workers";
///     const DLQ_STREAM: &'static str = "notificacoes:dlq";
/// }
/// ```
pub trait StreamDef {
    const STREAM_NAME: &'static str;
    const CONSUMER_GROUP: &'static str;
    const DLQ_STREAM: &'static str;
    /// Approximate MAXLEN applied on XADD
    const MAX_LENGTH: i64 = 100_000;
}

/// A job payload carried in the `job` field of a stream entry.
pub trait StreamJob: Serialize + DeserializeOwned + Send + Sync + Clone + 'static {
    /// Stable identifier used for logging and DLQ bookkeeping
    fn job_id(&self) -> String;

    /// How many times this job has already been re-enqueued
    fn retry_count(&self) -> u32 {
        0
    }

    /// Copy of the job with the retry count incremented
    fn with_retry(&self) -> Self;

    fn max_retries(&self) -> u32 {
        3
    }
}

/// Domain logic run for each job read from the stream.
#[async_trait]
pub trait StreamProcessor<J: StreamJob>: Send + Sync + 'static {
    async fn process(&self, job: &J) -> Result<(), StreamError>;

    /// Name used in logs and metric labels
    fn name(&self) -> &'static str;

    /// Called after the job has been written to the dead-letter stream.
    async fn on_dead_letter(&self, _job: &J, _error: &StreamError) {}

    async fn health_check(&self) -> Result<bool, StreamError> {
        Ok(true)
    }
}
