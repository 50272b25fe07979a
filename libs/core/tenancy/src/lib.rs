//! Tenant isolation for every store access above the Poller.
//!
//! A request resolves to a [`TenantScope`] once; repositories then call
//! [`ScopedQuery::scoped`] so the tenant id is always a bound parameter of the
//! generated SQL.
//!
//! Authorization is a fixed [`CapabilitySet`] derived from the caller's
//! [`Role`] when the [`Principal`] is built, so handlers check a capability
//! instead of re-deriving role rules.

mod capability;
mod error;
mod principal;
mod scope;

pub use capability::{Capability, CapabilitySet, Role};
pub use error::{TenancyError, TenancyResult};
pub use principal::{Principal, gateway_principal};
pub use scope::{ScopedQuery, TenantScope};
