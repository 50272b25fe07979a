//! Occurrence domain
//!
//! An occurrence is the actionable unit created when an eligible record
//! passes triage. This crate owns its lifecycle:
//!
//! ```text
//! handlers (HTTP, capabilities)
//!     │
//!     ▼
//! OccurrenceService<R>  ── status changes ──►  dyn StatusListener
//!     │ state machine, outcome guard
//!     ▼
//! OccurrenceRepository  (tenant-scoped queries, Postgres)
//! ```
//!
//! - every caller-facing read takes a [`core_tenancy::TenantScope`];
//! - list views only ever see the masked display name;
//! - the history ledger is append-only, one row per transition or event.

pub mod entity;
pub mod error;
pub mod events;
pub mod handlers;
pub mod masking;
pub mod models;
pub mod postgres;
pub mod repository;
pub mod service;
pub mod window;

pub use error::{OccurrenceError, OccurrenceResult};
pub use events::{BoxError, OccurrenceNotifier, StatusListener};
pub use handlers::ApiDoc;
pub use masking::mask_name;
pub use models::*;
pub use postgres::PgOccurrenceRepository;
pub use repository::OccurrenceRepository;
pub use service::OccurrenceService;
pub use window::{capture_window, format_remaining, time_remaining, window_expires_at};
