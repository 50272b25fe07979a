//! Consumer-group operations on a single stream.

use crate::config::WorkerConfig;
use crate::error::StreamError;
use crate::event::StreamEvent;
use crate::registry::StreamJob;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, RedisError, RedisResult};
use serde::Serialize;
use tracing::{debug, info, warn};

/// `(entry id, field/value pairs)`; fields are nil when the entry was trimmed
type RawEntry = (String, Option<Vec<(String, String)>>);
type RawStreams = Vec<(String, Vec<RawEntry>)>;

/// An entry whose `job` field is missing or does not decode.
#[derive(Debug, Clone)]
pub struct MalformedEntry {
    pub stream_id: String,
    pub raw: Option<String>,
    pub error: String,
}

/// Decoded jobs plus the entries that could not be decoded
#[derive(Debug)]
pub struct Batch<J: StreamJob> {
    pub events: Vec<StreamEvent<J>>,
    pub malformed: Vec<MalformedEntry>,
}

impl<J: StreamJob> Batch<J> {
    fn empty() -> Self {
        Self {
            events: Vec::new(),
            malformed: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty() && self.malformed.is_empty()
    }

    pub fn len(&self) -> usize {
        self.events.len() + self.malformed.len()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StreamInfo {
    pub stream_name: String,
    pub consumer_group: String,
    pub length: i64,
    pub pending_count: i64,
}

#[derive(Clone)]
pub struct StreamConsumer {
    redis: ConnectionManager,
    config: WorkerConfig,
}

fn is_nogroup(err: &RedisError) -> bool {
    err.to_string().contains("NOGROUP")
}

impl StreamConsumer {
    pub fn new(redis: ConnectionManager, config: WorkerConfig) -> Self {
        Self { redis, config }
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    /// XGROUP CREATE ... 0 MKSTREAM, tolerating BUSYGROUP.
    ///
    /// A new group starts from the beginning of the stream so that a second
    /// group attached later still sees the retained backlog.
    pub async fn init_consumer_group(&self) -> Result<(), StreamError> {
        let mut conn = self.redis.clone();

        let result: RedisResult<()> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg("0")
            .arg("MKSTREAM")
            .query_async(&mut conn)
            .await;

        match result {
            Ok(()) => {
                info!(
                    stream = %self.config.stream_name,
                    group = %self.config.consumer_group,
                    "Created consumer group"
                );
                Ok(())
            }
            Err(e) if e.to_string().contains("BUSYGROUP") => {
                debug!(
                    stream = %self.config.stream_name,
                    group = %self.config.consumer_group,
                    "Consumer group already exists"
                );
                Ok(())
            }
            Err(e) => Err(StreamError::Redis(e)),
        }
    }

    /// Entries already delivered to this consumer but never acknowledged.
    pub async fn read_pending<J: StreamJob>(&self, count: usize) -> Result<Batch<J>, StreamError> {
        self.read_group("0", count, None).await
    }

    /// New entries, blocking up to the configured timeout.
    pub async fn read_new<J: StreamJob>(&self, count: usize) -> Result<Batch<J>, StreamError> {
        self.read_group(">", count, Some(self.config.block_timeout_ms))
            .await
    }

    async fn read_group<J: StreamJob>(
        &self,
        start: &str,
        count: usize,
        block_ms: Option<u64>,
    ) -> Result<Batch<J>, StreamError> {
        let mut conn = self.redis.clone();

        let mut cmd = redis::cmd("XREADGROUP");
        cmd.arg("GROUP")
            .arg(&self.config.consumer_group)
            .arg(&self.config.consumer_id)
            .arg("COUNT")
            .arg(count);
        if let Some(block) = block_ms {
            cmd.arg("BLOCK").arg(block);
        }
        cmd.arg("STREAMS").arg(&self.config.stream_name).arg(start);

        let result: RedisResult<Option<RawStreams>> = cmd.query_async(&mut conn).await;

        match result {
            Ok(Some(streams)) => Ok(Self::parse_streams(streams)),
            Ok(None) => Ok(Batch::empty()),
            Err(e) if is_nogroup(&e) => {
                warn!(
                    stream = %self.config.stream_name,
                    group = %self.config.consumer_group,
                    "Consumer group missing, recreating"
                );
                self.init_consumer_group().await?;
                Ok(Batch::empty())
            }
            Err(e) => Err(StreamError::Redis(e)),
        }
    }

    pub async fn ack(&self, stream_id: &str) -> Result<(), StreamError> {
        let mut conn = self.redis.clone();

        let _: i64 = redis::cmd("XACK")
            .arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg(stream_id)
            .query_async(&mut conn)
            .await?;

        debug!(stream_id = %stream_id, "Acknowledged entry");
        Ok(())
    }

    /// Append the next attempt of `job` and acknowledge the current entry in one MULTI.
    pub async fn requeue<J: StreamJob>(&self, stream_id: &str, job: &J) -> Result<String, StreamError> {
        let mut conn = self.redis.clone();
        let job_json = serde_json::to_string(job)?;

        let (new_id, _acked): (String, i64) = redis::pipe()
            .atomic()
            .cmd("XADD")
            .arg(&self.config.stream_name)
            .arg("MAXLEN")
            .arg("~")
            .arg(self.config.max_length)
            .arg("*")
            .arg("job")
            .arg(&job_json)
            .cmd("XACK")
            .arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg(stream_id)
            .query_async(&mut conn)
            .await?;

        debug!(stream_id = %stream_id, new_id = %new_id, "Re-enqueued job");
        Ok(new_id)
    }

    /// Take over entries other consumers left pending longer than the claim timeout.
    pub async fn claim_abandoned<J: StreamJob>(&self, count: usize) -> Result<Batch<J>, StreamError> {
        let mut conn = self.redis.clone();

        let pending: RedisResult<Vec<(String, String, i64, i64)>> = redis::cmd("XPENDING")
            .arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg("IDLE")
            .arg(self.config.claim_timeout_ms)
            .arg("-")
            .arg("+")
            .arg(count)
            .query_async(&mut conn)
            .await;

        let pending = match pending {
            Ok(p) => p,
            Err(e) if is_nogroup(&e) => return Ok(Batch::empty()),
            Err(e) => return Err(StreamError::Redis(e)),
        };

        let claim_ids: Vec<&str> = pending
            .iter()
            .filter(|(_, consumer, _, _)| *consumer != self.config.consumer_id)
            .map(|(id, _, _, _)| id.as_str())
            .collect();

        if claim_ids.is_empty() {
            return Ok(Batch::empty());
        }

        let mut cmd = redis::cmd("XCLAIM");
        cmd.arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg(&self.config.consumer_id)
            .arg(self.config.claim_timeout_ms);
        for id in &claim_ids {
            cmd.arg(*id);
        }

        let entries: Vec<RawEntry> = cmd.query_async(&mut conn).await?;
        let batch = Self::parse_entries(entries);

        if !batch.is_empty() {
            warn!(
                stream = %self.config.stream_name,
                count = batch.len(),
                "Claimed abandoned entries"
            );
        }

        Ok(batch)
    }

    pub async fn stream_info(&self) -> Result<StreamInfo, StreamError> {
        let mut conn = self.redis.clone();

        let length: i64 = conn.xlen(&self.config.stream_name).await?;

        let pending: RedisResult<(i64, Option<String>, Option<String>, Option<Vec<(String, String)>>)> =
            redis::cmd("XPENDING")
                .arg(&self.config.stream_name)
                .arg(&self.config.consumer_group)
                .query_async(&mut conn)
                .await;

        Ok(StreamInfo {
            stream_name: self.config.stream_name.clone(),
            consumer_group: self.config.consumer_group.clone(),
            length,
            pending_count: pending.map(|(count, ..)| count).unwrap_or(0),
        })
    }

    fn parse_streams<J: StreamJob>(streams: RawStreams) -> Batch<J> {
        let mut batch = Batch::empty();
        for (_stream, entries) in streams {
            let parsed = Self::parse_entries(entries);
            batch.events.extend(parsed.events);
            batch.malformed.extend(parsed.malformed);
        }
        batch
    }

    fn parse_entries<J: StreamJob>(entries: Vec<RawEntry>) -> Batch<J> {
        let mut batch = Batch::empty();

        for (stream_id, fields) in entries {
            let raw = fields.as_ref().and_then(|fields| {
                fields
                    .iter()
                    .find(|(k, _)| k == "job")
                    .map(|(_, v)| v.clone())
            });

            let Some(json) = raw else {
                warn!(stream_id = %stream_id, "Entry has no 'job' field");
                batch.malformed.push(MalformedEntry {
                    stream_id,
                    raw: None,
                    error: "missing job field".to_string(),
                });
                continue;
            };

            match serde_json::from_str::<J>(&json) {
                Ok(job) => batch.events.push(StreamEvent::new(stream_id, job)),
                Err(e) => {
                    warn!(stream_id = %stream_id, error = %e, "Failed to decode job");
                    batch.malformed.push(MalformedEntry {
                        stream_id,
                        raw: Some(json),
                        error: e.to_string(),
                    });
                }
            }
        }

        batch
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct Ping {
        id: String,
    }

    impl StreamJob for Ping {
        fn job_id(&self) -> String {
            self.id.clone()
        }

        fn with_retry(&self) -> Self {
            self.clone()
        }
    }

    #[test]
    fn test_parse_entries_splits_malformed() {
        let entries: Vec<RawEntry> = vec![
            (
                "1-0".into(),
                Some(vec![("job".into(), r#"{"id":"a"}"#.into())]),
            ),
            ("2-0".into(), Some(vec![("job".into(), "not json".into())])),
            ("3-0".into(), Some(vec![("other".into(), "x".into())])),
            ("4-0".into(), None),
        ];

        let batch = StreamConsumer::parse_entries::<Ping>(entries);

        assert_eq!(batch.events.len(), 1);
        assert_eq!(batch.events[0].job.id, "a");
        assert_eq!(batch.malformed.len(), 3);
        assert_eq!(batch.malformed[0].stream_id, "2-0");
        assert_eq!(batch.malformed[0].raw.as_deref(), Some("not json"));
        assert!(batch.malformed[1].raw.is_none());
        assert_eq!(batch.len(), 4);
    }

    #[test]
    fn test_parse_streams_flattens() {
        let streams: RawStreams = vec![(
            "ping:jobs".into(),
            vec![
                ("1-0".into(), Some(vec![("job".into(), r#"{"id":"a"}"#.into())])),
                ("1-1".into(), Some(vec![("job".into(), r#"{"id":"b"}"#.into())])),
            ],
        )];

        let batch = StreamConsumer::parse_streams::<Ping>(streams);
        assert_eq!(batch.events.len(), 2);
        assert!(batch.malformed.is_empty());
    }
}
