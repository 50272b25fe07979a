//! Stream Worker Framework
//!
//! Durable job delivery over Redis Streams consumer groups.
//!
//! ## Delivery model
//!
//! - At-least-once: an entry is acknowledged only after its processor returns,
//!   or after it has been dead-lettered.
//! - Entries left pending by a crashed consumer are reclaimed with
//!   `XPENDING` + `XCLAIM` once idle longer than the claim timeout.
//! - Retryable failures are re-enqueued with an incremented retry count after
//!   the category backoff, atomically with the acknowledgment of the original.
//! - Permanent failures, exhausted retries and unparseable entries go to the
//!   dead-letter stream and then to [`StreamProcessor::on_dead_letter`].
//!
//! ## Example
//!
//! ```ignore
//! use stream_worker::{StreamDef, StreamWorker, WorkerConfig};
//!
//! struct DetectionStream;
//! impl StreamDef for DetectionStream {
//!     const STREAM_NAME: &'static str = "obitos:detectados";
//!     const CONSUMER_GROUP: &'static str = "triagem-motor";
//!     const DLQ_STREAM: &'static str = "obitos:dlq";
//! }
//!
//! let config = WorkerConfig::from_stream_def::<DetectionStream>();
//! let worker = StreamWorker::new(redis, processor, config);
//! worker.run(shutdown_rx).await?;
//! ```

mod config;
mod consumer;
mod dlq;
mod error;
mod event;
mod health;
pub mod metrics;
mod producer;
mod registry;
mod worker;

pub use config::WorkerConfig;
pub use consumer::{Batch, MalformedEntry, StreamConsumer, StreamInfo};
pub use dlq::{DlqEntry, DlqManager};
pub use error::{ErrorCategory, StreamError};
pub use event::StreamEvent;
pub use health::{HealthState, ReadinessCheck, health_router};
pub use metrics::{StreamMetrics, init_metrics, render_metrics};
pub use producer::StreamProducer;
pub use registry::{StreamDef, StreamJob, StreamProcessor};
pub use worker::StreamWorker;
