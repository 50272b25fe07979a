//! Detection and triage
//!
//! ```text
//! eligible_records ──► Poller ──XADD──► obitos:detectados
//!                                            │ (group triagem-motor)
//!                                            ▼
//!                     RuleCache ──► TriageProcessor ──► OccurrenceService
//!                         ▲                                   │
//!   TriageRuleService ────┘ (invalidate + pub/sub)            ▼
//!                                                     OccurrenceNotifier
//! ```
//!
//! The engine itself ([`engine::evaluate`]) is a pure function of the
//! record, the compiled rules and the clock.

pub mod cache;
pub mod engine;
pub mod entity;
pub mod error;
pub mod handlers;
pub mod invalidation;
pub mod models;
pub mod poller;
pub mod postgres;
pub mod processor;
pub mod repository;
pub mod rules;
pub mod service;
pub mod streams;

pub use cache::RuleCache;
pub use error::{TriageError, TriageResult};
pub use handlers::ApiDoc;
pub use invalidation::{
    INVALIDATION_CHANNEL, InvalidationPublisher, RedisInvalidationPublisher,
    run_invalidation_listener,
};
pub use models::*;
pub use poller::{DetectionPublisher, Poller, PollerStatus};
pub use postgres::{PgEligibleRecordRepository, PgHospitalDirectory, PgTriageRuleRepository};
pub use processor::{OccurrenceGateway, TriageProcessor, TriageStats};
pub use repository::{EligibleRecordRepository, HospitalDirectory, TriageRuleRepository};
pub use rules::{RuleAction, RuleKind, RuleParseError, TriageRule};
pub use service::TriageRuleService;
pub use streams::{DetectionEvent, DetectionStream};
