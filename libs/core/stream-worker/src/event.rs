//! Stream event wrapper

use crate::registry::StreamJob;
use chrono::{DateTime, Utc};

/// A job together with the metadata of the stream entry that carried it
#[derive(Debug, Clone)]
pub struct StreamEvent<J: StreamJob> {
    /// Redis stream entry ID (e.g. "1234567890123-0")
    pub stream_id: String,
    pub job: J,
    /// Entry time, taken from the millisecond part of the ID
    pub timestamp: DateTime<Utc>,
}

impl<J: StreamJob> StreamEvent<J> {
    pub fn new(stream_id: String, job: J) -> Self {
        let timestamp = parse_timestamp(&stream_id);
        Self {
            stream_id,
            job,
            timestamp,
        }
    }

    pub fn job_id(&self) -> String {
        self.job.job_id()
    }

    /// Time spent in the stream before being picked up
    pub fn age(&self) -> chrono::Duration {
        Utc::now() - self.timestamp
    }
}

fn parse_timestamp(stream_id: &str) -> DateTime<Utc> {
    stream_id
        .split('-')
        .next()
        .and_then(|ts| ts.parse::<i64>().ok())
        .and_then(DateTime::from_timestamp_millis)
        .unwrap_or_else(Utc::now)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_timestamp_from_stream_id() {
        let ts = parse_timestamp("1700000000000-3");
        assert_eq!(ts.timestamp_millis(), 1_700_000_000_000);
    }

    #[test]
    fn test_parse_timestamp_falls_back_to_now() {
        let before = Utc::now();
        let ts = parse_timestamp("garbage");
        assert!(ts >= before);
    }
}
