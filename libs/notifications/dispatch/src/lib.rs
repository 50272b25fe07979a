//! Notification Dispatcher
//!
//! ```text
//!                       ┌──► LiveHub ──PUBLISH──► vigil:live_events ──► LiveFeed ──► SSE
//! OccurrenceNotifier ───┤
//!    (Dispatcher)       └──► DeliveryJob ──XADD──► notificacoes:entregas
//!                                                     │ (group dispatch-workers)
//!                                                     ▼
//!                                 DeliveryProcessor ──► SMTP / Twilio ──► notifications
//! ```
//!
//! The live push happens inline. Email and SMS go through the delivery
//! stream so a slow or failing provider never holds up triage, and each
//! channel gets its own retry budget.

pub mod content;
pub mod dispatcher;
pub mod entity;
pub mod error;
pub mod job;
pub mod live;
pub mod models;
pub mod postgres;
pub mod processor;
pub mod provider;
pub mod repository;
pub mod streams;

pub use dispatcher::{DeliveryQueue, Dispatcher, LiveStatusListener, NotifiedMarker};
pub use error::{DispatchError, DispatchResult};
pub use job::DeliveryJob;
pub use live::{
    LIVE_CHANNEL, LiveEvent, LiveEventKind, LiveFeed, LiveHub, LivePublisher, live_router,
};
pub use models::*;
pub use postgres::{PgNotificationRepository, PgRecipientDirectory};
pub use processor::DeliveryProcessor;
pub use provider::{
    DeliveryError, EmailProvider, SmsProvider, SmtpConfig, SmtpProvider, TwilioSmsProvider,
};
pub use repository::{NotificationRepository, RecipientDirectory};
pub use streams::DeliveryStream;
