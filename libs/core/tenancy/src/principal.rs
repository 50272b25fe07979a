use axum::extract::{FromRequestParts, Request};
use axum::http::HeaderMap;
use axum::http::request::Parts;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use std::str::FromStr;
use tracing::debug;
use uuid::Uuid;

use crate::{Capability, CapabilitySet, Role, TenancyError, TenancyResult};

pub const USER_ID_HEADER: &str = "x-user-id";
pub const TENANT_ID_HEADER: &str = "x-tenant-id";
pub const ROLE_HEADER: &str = "x-user-role";
pub const SUPER_ADMIN_HEADER: &str = "x-super-admin";
pub const TENANT_CONTEXT_HEADER: &str = "x-tenant-context";

/// Authenticated caller, placed in request extensions by the auth layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub user_id: Uuid,
    /// Home tenant of the user
    pub tenant_id: Uuid,
    pub role: Role,
    pub is_super_admin: bool,
    /// Tenant picked by a super admin through `X-Tenant-Context`
    pub selected_tenant: Option<Uuid>,
    capabilities: CapabilitySet,
}

impl Principal {
    pub fn new(user_id: Uuid, tenant_id: Uuid, role: Role, is_super_admin: bool) -> Self {
        Self {
            user_id,
            tenant_id,
            role,
            is_super_admin,
            selected_tenant: None,
            capabilities: CapabilitySet::for_role(role, is_super_admin),
        }
    }

    /// Apply an `X-Tenant-Context` value. Only super admins may switch, and
    /// the value must be a UUID.
    pub fn with_tenant_context(mut self, context: Option<&str>) -> TenancyResult<Self> {
        let Some(raw) = context.map(str::trim).filter(|v| !v.is_empty()) else {
            return Ok(self);
        };
        if !self.is_super_admin {
            return Err(TenancyError::ContextSwitchForbidden);
        }
        let tenant = Uuid::parse_str(raw)
            .map_err(|_| TenancyError::InvalidTenantContext(raw.to_string()))?;
        self.selected_tenant = Some(tenant);
        Ok(self)
    }

    /// Tenant used for writes: the selected one for super admins, else home.
    pub fn effective_tenant_id(&self) -> Uuid {
        self.selected_tenant.unwrap_or(self.tenant_id)
    }

    pub fn capabilities(&self) -> CapabilitySet {
        self.capabilities
    }

    pub fn can(&self, capability: Capability) -> bool {
        self.capabilities.contains(capability)
    }

    pub fn require(&self, capability: Capability) -> TenancyResult<()> {
        if self.can(capability) {
            Ok(())
        } else {
            Err(TenancyError::MissingCapability(capability))
        }
    }

    /// Build from headers set by the trusted authentication gateway.
    pub fn from_headers(headers: &HeaderMap) -> TenancyResult<Option<Self>> {
        let Some(user_id) = header_str(headers, USER_ID_HEADER) else {
            return Ok(None);
        };
        let user_id = parse_uuid(USER_ID_HEADER, user_id)?;
        let tenant_id = header_str(headers, TENANT_ID_HEADER)
            .ok_or(TenancyError::TenantRequired)
            .and_then(|v| parse_uuid(TENANT_ID_HEADER, v))?;
        let role = header_str(headers, ROLE_HEADER)
            .map(|v| {
                Role::from_str(v).map_err(|_| TenancyError::InvalidHeader {
                    header: ROLE_HEADER,
                    reason: format!("unknown role {v:?}"),
                })
            })
            .transpose()?
            .unwrap_or(Role::Operator);
        let is_super_admin = header_str(headers, SUPER_ADMIN_HEADER)
            .is_some_and(|v| v.eq_ignore_ascii_case("true") || v == "1");

        Self::new(user_id, tenant_id, role, is_super_admin)
            .with_tenant_context(header_str(headers, TENANT_CONTEXT_HEADER))
            .map(Some)
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

fn parse_uuid(header: &'static str, value: &str) -> TenancyResult<Uuid> {
    Uuid::parse_str(value.trim()).map_err(|e| TenancyError::InvalidHeader {
        header,
        reason: e.to_string(),
    })
}

/// Middleware turning gateway identity headers into a [`Principal`] extension.
///
/// Requests without `X-User-Id` pass through unauthenticated; handlers that
/// extract a `Principal` then answer 401.
pub async fn gateway_principal(mut request: Request, next: Next) -> Response {
    match Principal::from_headers(request.headers()) {
        Ok(Some(principal)) => {
            debug!(
                user_id = %principal.user_id,
                tenant_id = %principal.tenant_id,
                role = %principal.role,
                "Resolved principal"
            );
            request.extensions_mut().insert(principal);
            next.run(request).await
        }
        Ok(None) => next.run(request).await,
        Err(e) => e.into_response(),
    }
}

impl<S: Send + Sync> FromRequestParts<S> for Principal {
    type Rejection = TenancyError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<Principal>()
            .cloned()
            .ok_or(TenancyError::Unauthenticated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::Router;
    use axum::body::Body;
    use axum::http::{Request as HttpRequest, StatusCode};
    use axum::routing::get;
    use tower::ServiceExt;

    fn headers(pairs: &[(&'static str, String)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(*name, value.parse().unwrap());
        }
        map
    }

    #[test]
    fn test_from_headers_without_user_is_anonymous() {
        assert_eq!(Principal::from_headers(&HeaderMap::new()), Ok(None));
    }

    #[test]
    fn test_from_headers_parses_role_and_capabilities() {
        let tenant = Uuid::new_v4();
        let principal = Principal::from_headers(&headers(&[
            (USER_ID_HEADER, Uuid::new_v4().to_string()),
            (TENANT_ID_HEADER, tenant.to_string()),
            (ROLE_HEADER, "manager".to_string()),
        ]))
        .unwrap()
        .unwrap();

        assert_eq!(principal.role, Role::Manager);
        assert_eq!(principal.effective_tenant_id(), tenant);
        assert!(principal.can(Capability::ManageTriageRules));
        assert_eq!(
            principal.require(Capability::ManageUsers),
            Err(TenancyError::MissingCapability(Capability::ManageUsers))
        );
    }

    #[test]
    fn test_tenant_context_rejected_for_regular_user() {
        let result = Principal::from_headers(&headers(&[
            (USER_ID_HEADER, Uuid::new_v4().to_string()),
            (TENANT_ID_HEADER, Uuid::new_v4().to_string()),
            (TENANT_CONTEXT_HEADER, Uuid::new_v4().to_string()),
        ]));
        assert_eq!(result, Err(TenancyError::ContextSwitchForbidden));
    }

    #[test]
    fn test_tenant_context_must_be_uuid() {
        let principal = Principal::new(Uuid::new_v4(), Uuid::new_v4(), Role::Admin, true);
        let result = principal.with_tenant_context(Some("1 OR 1=1"));
        assert!(matches!(result, Err(TenancyError::InvalidTenantContext(_))));
    }

    async fn whoami(principal: Principal) -> String {
        principal.user_id.to_string()
    }

    #[tokio::test]
    async fn test_middleware_and_extractor() {
        let app = Router::new()
            .route("/me", get(whoami))
            .layer(axum::middleware::from_fn(gateway_principal));

        let response = app
            .clone()
            .oneshot(HttpRequest::builder().uri("/me").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let user = Uuid::new_v4();
        let response = app
            .clone()
            .oneshot(
                HttpRequest::builder()
                    .uri("/me")
                    .header(USER_ID_HEADER, user.to_string())
                    .header(TENANT_ID_HEADER, Uuid::new_v4().to_string())
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .oneshot(
                HttpRequest::builder()
                    .uri("/me")
                    .header(USER_ID_HEADER, user.to_string())
                    .header(TENANT_ID_HEADER, Uuid::new_v4().to_string())
                    .header(TENANT_CONTEXT_HEADER, Uuid::new_v4().to_string())
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }
}
