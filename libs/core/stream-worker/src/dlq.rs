//! Dead-letter stream management
//!
//! Failed jobs are written as a JSON `data` field so operators can inspect
//! and replay them.

use crate::consumer::MalformedEntry;
use crate::error::StreamError;
use crate::registry::StreamJob;
use chrono::{DateTime, Utc};
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

type StreamEntries = Vec<(String, Vec<(String, String)>)>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DlqEntry {
    /// Entry ID in the dead-letter stream; filled in on read
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dlq_id: Option<String>,
    pub job_id: String,
    /// Original payload; a JSON string when the entry never decoded
    pub job_data: serde_json::Value,
    pub error: String,
    pub original_stream_id: String,
    pub retry_count: u32,
    pub failed_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct DlqManager {
    redis: ConnectionManager,
    dlq_stream: String,
    max_length: i64,
}

impl DlqManager {
    pub fn new(redis: ConnectionManager, dlq_stream: impl Into<String>) -> Self {
        Self {
            redis,
            dlq_stream: dlq_stream.into(),
            max_length: 10_000,
        }
    }

    pub fn dlq_stream(&self) -> &str {
        &self.dlq_stream
    }

    pub async fn move_to_dlq<J: StreamJob>(
        &self,
        job: &J,
        error: &StreamError,
        original_stream_id: &str,
    ) -> Result<String, StreamError> {
        let entry = DlqEntry {
            dlq_id: None,
            job_id: job.job_id(),
            job_data: serde_json::to_value(job)?,
            error: error.to_string(),
            original_stream_id: original_stream_id.to_string(),
            retry_count: job.retry_count(),
            failed_at: Utc::now(),
        };

        let dlq_id = self.append(&entry).await?;

        info!(
            job_id = %entry.job_id,
            dlq_id = %dlq_id,
            error = %entry.error,
            retry_count = entry.retry_count,
            "Moved job to DLQ"
        );

        Ok(dlq_id)
    }

    /// Dead-letter an entry whose payload could not be decoded
    pub async fn move_malformed(&self, entry: &MalformedEntry) -> Result<String, StreamError> {
        let record = DlqEntry {
            dlq_id: None,
            job_id: entry.stream_id.clone(),
            job_data: entry
                .raw
                .clone()
                .map(serde_json::Value::String)
                .unwrap_or(serde_json::Value::Null),
            error: entry.error.clone(),
            original_stream_id: entry.stream_id.clone(),
            retry_count: 0,
            failed_at: Utc::now(),
        };

        let dlq_id = self.append(&record).await?;

        warn!(
            stream_id = %entry.stream_id,
            dlq_id = %dlq_id,
            error = %entry.error,
            "Moved malformed entry to DLQ"
        );

        Ok(dlq_id)
    }

    async fn append(&self, entry: &DlqEntry) -> Result<String, StreamError> {
        let data = serde_json::to_string(entry)?;
        let mut conn = self.redis.clone();

        let dlq_id: String = redis::cmd("XADD")
            .arg(&self.dlq_stream)
            .arg("MAXLEN")
            .arg("~")
            .arg(self.max_length)
            .arg("*")
            .arg("data")
            .arg(&data)
            .query_async(&mut conn)
            .await?;

        Ok(dlq_id)
    }

    pub async fn count(&self) -> Result<i64, StreamError> {
        let mut conn = self.redis.clone();
        let len: i64 = conn.xlen(&self.dlq_stream).await?;
        Ok(len)
    }

    /// Oldest-first page of DLQ entries, starting after `after` when given
    pub async fn list(&self, count: usize, after: Option<&str>) -> Result<Vec<DlqEntry>, StreamError> {
        let mut conn = self.redis.clone();
        let start = after.map(|id| format!("({id}")).unwrap_or_else(|| "-".to_string());

        let entries: StreamEntries = redis::cmd("XRANGE")
            .arg(&self.dlq_stream)
            .arg(&start)
            .arg("+")
            .arg("COUNT")
            .arg(count)
            .query_async(&mut conn)
            .await?;

        Ok(entries.into_iter().filter_map(decode_entry).collect())
    }

    pub async fn get(&self, dlq_id: &str) -> Result<Option<DlqEntry>, StreamError> {
        let mut conn = self.redis.clone();

        let entries: StreamEntries = redis::cmd("XRANGE")
            .arg(&self.dlq_stream)
            .arg(dlq_id)
            .arg(dlq_id)
            .query_async(&mut conn)
            .await?;

        Ok(entries.into_iter().next().and_then(decode_entry))
    }

    /// Re-append a dead-lettered job to `target_stream` and remove it from the DLQ.
    ///
    /// Returns the new entry ID, or `None` when the DLQ entry does not exist.
    pub async fn replay(&self, dlq_id: &str, target_stream: &str) -> Result<Option<String>, StreamError> {
        let Some(entry) = self.get(dlq_id).await? else {
            return Ok(None);
        };

        let payload = match &entry.job_data {
            serde_json::Value::String(raw) => raw.clone(),
            other => serde_json::to_string(other)?,
        };

        let mut conn = self.redis.clone();
        let (new_id, _deleted): (String, i64) = redis::pipe()
            .atomic()
            .cmd("XADD")
            .arg(target_stream)
            .arg("*")
            .arg("job")
            .arg(&payload)
            .cmd("XDEL")
            .arg(&self.dlq_stream)
            .arg(dlq_id)
            .query_async(&mut conn)
            .await?;

        info!(dlq_id = %dlq_id, new_id = %new_id, stream = %target_stream, "Replayed DLQ entry");

        Ok(Some(new_id))
    }

    pub async fn delete(&self, dlq_id: &str) -> Result<bool, StreamError> {
        let mut conn = self.redis.clone();
        let deleted: i64 = conn.xdel(&self.dlq_stream, &[dlq_id]).await?;
        Ok(deleted > 0)
    }
}

fn decode_entry((id, fields): (String, Vec<(String, String)>)) -> Option<DlqEntry> {
    let data = fields.iter().find(|(k, _)| k == "data").map(|(_, v)| v)?;
    let mut entry: DlqEntry = serde_json::from_str(data).ok()?;
    entry.dlq_id = Some(id);
    Some(entry)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_entry_sets_dlq_id() {
        let stored = DlqEntry {
            dlq_id: None,
            job_id: "job-1".into(),
            job_data: serde_json::json!({"record_id": 42}),
            error: "Processing error: unknown hospital".into(),
            original_stream_id: "1700000000000-0".into(),
            retry_count: 2,
            failed_at: Utc::now(),
        };
        let data = serde_json::to_string(&stored).unwrap();
        assert!(!data.contains("dlq_id"));

        let decoded = decode_entry(("1700000000001-0".into(), vec![("data".into(), data)])).unwrap();

        assert_eq!(decoded.dlq_id.as_deref(), Some("1700000000001-0"));
        assert_eq!(decoded.job_id, "job-1");
        assert_eq!(decoded.retry_count, 2);
    }

    #[test]
    fn test_decode_entry_without_data_field() {
        assert!(decode_entry(("1-0".into(), vec![("job".into(), "{}".into())])).is_none());
    }
}
