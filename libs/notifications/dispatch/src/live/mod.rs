//! Live push to connected dashboards.
//!
//! ```text
//! worker: LiveHub ──PUBLISH──► vigil:live_events ──► api: LiveFeed ──broadcast──► SSE clients
//! ```

pub mod feed;
pub mod hub;
pub mod sse;

pub use feed::LiveFeed;
pub use hub::{LiveHub, LivePublisher};
pub use sse::{LiveQuery, live_router};

use chrono::{DateTime, Utc};
use domain_occurrences::{Occurrence, OccurrenceStatus};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use utoipa::ToSchema;
use uuid::Uuid;

pub const LIVE_CHANNEL: &str = "vigil:live_events";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, ToSchema)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum LiveEventKind {
    NewOccurrence,
    OccurrenceUpdated,
}

/// One message per new or updated occurrence; never carries the patient name
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct LiveEvent {
    #[serde(rename = "type")]
    pub kind: LiveEventKind,
    pub occurrence_id: Uuid,
    pub tenant_id: Uuid,
    pub hospital_id: Uuid,
    pub hospital_name: String,
    pub sector: Option<String>,
    pub death_time: DateTime<Utc>,
    pub time_remaining: String,
    pub status: OccurrenceStatus,
    pub priority_score: i32,
    pub created_at: DateTime<Utc>,
}

impl LiveEvent {
    pub fn from_occurrence(kind: LiveEventKind, occurrence: &Occurrence, now: DateTime<Utc>) -> Self {
        Self {
            kind,
            occurrence_id: occurrence.id,
            tenant_id: occurrence.tenant_id,
            hospital_id: occurrence.hospital_id,
            hospital_name: occurrence.hospital_name().to_string(),
            sector: occurrence.sector().map(str::to_string),
            death_time: occurrence.death_time,
            time_remaining: occurrence.format_time_remaining(now),
            status: occurrence.status,
            priority_score: occurrence.priority_score,
            created_at: occurrence.created_at,
        }
    }
}
