//! # Axum Helpers
//!
//! Shared HTTP plumbing for the API process.
//!
//! - **[`errors`]**: `AppError` and the `{code, error, message, details}` body
//! - **[`extractors`]**: `ValidatedJson`
//! - **[`server`]**: router assembly with tracing, CORS, timeouts and docs
//! - **[`shutdown`]**: SIGINT/SIGTERM handling

pub mod errors;
pub mod extractors;
pub mod server;
pub mod shutdown;

pub use errors::{AppError, ErrorCode, ErrorResponse};
pub use extractors::ValidatedJson;
pub use server::{create_app, create_router};
pub use shutdown::shutdown_signal;
