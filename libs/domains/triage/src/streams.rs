use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use stream_worker::{StreamDef, StreamJob};
use uuid::Uuid;

use crate::models::EligibleRecord;

/// Detected death records awaiting triage
pub struct DetectionStream;

impl StreamDef for DetectionStream {
    const STREAM_NAME: &'static str = "obitos:detectados";
    const CONSUMER_GROUP: &'static str = "triagem-motor";
    const DLQ_STREAM: &'static str = "obitos:dlq";
}

/// Published once per record by the poller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetectionEvent {
    pub record_id: Uuid,
    pub hospital_id: Uuid,
    pub tenant_id: Uuid,
    pub detected_at: DateTime<Utc>,
    #[serde(default)]
    pub retry_count: u32,
}

impl DetectionEvent {
    pub fn for_record(record: &EligibleRecord, detected_at: DateTime<Utc>) -> Self {
        Self {
            record_id: record.id,
            hospital_id: record.hospital_id,
            tenant_id: record.tenant_id,
            detected_at,
            retry_count: 0,
        }
    }
}

impl StreamJob for DetectionEvent {
    fn job_id(&self) -> String {
        self.record_id.to_string()
    }

    fn retry_count(&self) -> u32 {
        self.retry_count
    }

    fn with_retry(&self) -> Self {
        Self {
            retry_count: self.retry_count + 1,
            ..self.clone()
        }
    }

    fn max_retries(&self) -> u32 {
        5
    }
}
