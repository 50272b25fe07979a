//! Seams towards the notification side.
//!
//! The lifecycle only knows these traits; the dispatcher crate implements
//! them, which keeps the dependency pointing one way.

use async_trait::async_trait;

use crate::models::{Occurrence, OccurrenceStatus};

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Told about every accepted status change, after commit.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait StatusListener: Send + Sync {
    async fn status_changed(&self, occurrence: &Occurrence, previous: OccurrenceStatus);
}

/// Fans a freshly created occurrence out to operators.
///
/// An error means nothing was handed off, so the caller may retry. Partial
/// channel failures are handled inside the implementation.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait OccurrenceNotifier: Send + Sync {
    async fn notify_created(&self, occurrence: &Occurrence) -> Result<(), BoxError>;
}
