use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use sea_orm::{ColumnTrait, QueryFilter};
use uuid::Uuid;

use crate::{Principal, TenancyError, TenancyResult};

/// Resolved isolation key for one unit of work.
///
/// | tenant_id | cross_tenant | meaning                                   |
/// |-----------|--------------|-------------------------------------------|
/// | `Some(t)` | any          | filter every query on `t`                 |
/// | `None`    | `true`       | super admin, no filter                    |
/// | `None`    | `false`      | no request context (background job)       |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TenantScope {
    pub tenant_id: Option<Uuid>,
    pub cross_tenant: bool,
}

impl TenantScope {
    /// No request context; queries run unfiltered.
    pub const fn unscoped() -> Self {
        Self {
            tenant_id: None,
            cross_tenant: false,
        }
    }

    pub const fn tenant(tenant_id: Uuid) -> Self {
        Self {
            tenant_id: Some(tenant_id),
            cross_tenant: false,
        }
    }

    /// Derive the scope for a caller.
    ///
    /// A super admin is cross-tenant; with a tenant context selected they are
    /// still filtered to that tenant. Everyone else is pinned to their own.
    pub fn resolve(principal: Option<&Principal>) -> Self {
        match principal {
            None => Self::unscoped(),
            Some(p) if p.is_super_admin => Self {
                tenant_id: p.selected_tenant,
                cross_tenant: true,
            },
            Some(p) => Self::tenant(p.tenant_id),
        }
    }

    pub fn filters(&self) -> bool {
        self.tenant_id.is_some()
    }

    /// Concrete tenant for operations that write tenant-owned rows.
    pub fn require_tenant_id(&self) -> TenancyResult<Uuid> {
        self.tenant_id.ok_or(TenancyError::TenantRequired)
    }

    /// Whether a row owned by `tenant_id` is visible in this scope.
    pub fn permits(&self, tenant_id: Uuid) -> bool {
        self.tenant_id.is_none_or(|scoped| scoped == tenant_id)
    }
}

/// Adds a bound tenant-equality predicate to any SeaORM query.
pub trait ScopedQuery: QueryFilter + Sized {
    fn scoped<C: ColumnTrait>(self, scope: &TenantScope, column: C) -> Self {
        match scope.tenant_id {
            Some(tenant_id) => self.filter(column.eq(tenant_id)),
            None => self,
        }
    }
}

impl<Q: QueryFilter + Sized> ScopedQuery for Q {}

impl<S: Send + Sync> FromRequestParts<S> for TenantScope {
    type Rejection = TenancyError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(Self::resolve(parts.extensions.get::<Principal>()))
    }
}
