use std::convert::Infallible;
use std::time::Duration;

use axum::{
    Router,
    extract::{Query, State},
    response::sse::{Event, KeepAlive, Sse},
    routing::get,
};
use core_tenancy::{Capability, Principal, TenantScope};
use futures::stream::Stream;
use serde::Deserialize;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use utoipa::{IntoParams, OpenApi};
use uuid::Uuid;

use super::{LiveEvent, LiveEventKind, LiveFeed};
use crate::error::DispatchResult;

const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(30);

#[derive(OpenApi)]
#[openapi(
    paths(live_events),
    components(schemas(LiveEvent, LiveEventKind)),
    tags(
        (name = "live", description = "Server-sent occurrence events")
    )
)]
pub struct ApiDoc;

#[derive(Debug, Default, Deserialize, IntoParams)]
pub struct LiveQuery {
    /// Only events of this hospital
    pub hospital_id: Option<Uuid>,
}

pub fn live_router(feed: LiveFeed) -> Router {
    Router::new().route("/", get(live_events)).with_state(feed)
}

#[derive(Debug, Clone, Copy)]
struct LiveFilter {
    scope: TenantScope,
    hospital_id: Option<Uuid>,
}

impl LiveFilter {
    fn admits(&self, event: &LiveEvent) -> bool {
        self.scope.permits(event.tenant_id)
            && self.hospital_id.is_none_or(|h| h == event.hospital_id)
    }
}

fn to_sse(event: &LiveEvent) -> Event {
    Event::default()
        .event(event.kind.to_string())
        .id(event.occurrence_id.to_string())
        .json_data(event)
        .unwrap_or_else(|_| Event::default().comment("unserializable event"))
}

/// Stream new and updated occurrences of the caller's tenant
#[utoipa::path(
    get,
    path = "",
    tag = "live",
    params(LiveQuery),
    responses(
        (status = 200, description = "text/event-stream of LiveEvent", body = LiveEvent),
        (status = 403, description = "Missing capability")
    )
)]
pub async fn live_events(
    State(feed): State<LiveFeed>,
    principal: Principal,
    Query(query): Query<LiveQuery>,
) -> DispatchResult<Sse<impl Stream<Item = Result<Event, Infallible>>>> {
    principal.require(Capability::OperateOccurrences)?;
    let filter = LiveFilter {
        scope: TenantScope::resolve(Some(&principal)),
        hospital_id: query.hospital_id,
    };
    tracing::debug!(user_id = %principal.user_id, clients = feed.receiver_count() + 1, "Live client connected");

    let stream = BroadcastStream::new(feed.subscribe()).filter_map(move |item| match item {
        Ok(event) if filter.admits(&event) => Some(Ok(to_sse(&event))),
        Ok(_) => None,
        Err(BroadcastStreamRecvError::Lagged(skipped)) => {
            tracing::warn!(skipped, "Live client lagging, events dropped");
            None
        }
    });

    Ok(Sse::new(stream).keep_alive(KeepAlive::new().interval(KEEP_ALIVE_INTERVAL).text("heartbeat")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode, header};
    use chrono::Utc;
    use core_tenancy::gateway_principal;
    use domain_occurrences::OccurrenceStatus;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    fn event(tenant_id: Uuid, hospital_id: Uuid) -> LiveEvent {
        LiveEvent {
            kind: LiveEventKind::NewOccurrence,
            occurrence_id: Uuid::new_v4(),
            tenant_id,
            hospital_id,
            hospital_name: "Hospital Central".into(),
            sector: None,
            death_time: Utc::now(),
            time_remaining: "4h 0min".into(),
            status: OccurrenceStatus::Pending,
            priority_score: 60,
            created_at: Utc::now(),
        }
    }

    fn app(feed: LiveFeed) -> Router {
        live_router(feed).layer(axum::middleware::from_fn(gateway_principal))
    }

    fn request(uri: &str, tenant: Uuid) -> Request<Body> {
        Request::builder()
            .uri(uri)
            .header("x-user-id", Uuid::new_v4().to_string())
            .header("x-tenant-id", tenant.to_string())
            .header("x-user-role", "operator")
            .body(Body::empty())
            .unwrap()
    }

    #[test]
    fn test_filter_by_tenant_and_hospital() {
        let tenant = Uuid::new_v4();
        let hospital = Uuid::new_v4();
        let filter = LiveFilter {
            scope: TenantScope::tenant(tenant),
            hospital_id: Some(hospital),
        };
        assert!(filter.admits(&event(tenant, hospital)));
        assert!(!filter.admits(&event(tenant, Uuid::new_v4())));
        assert!(!filter.admits(&event(Uuid::new_v4(), hospital)));

        let unscoped = LiveFilter {
            scope: TenantScope::unscoped(),
            hospital_id: None,
        };
        assert!(unscoped.admits(&event(Uuid::new_v4(), Uuid::new_v4())));
    }

    #[tokio::test]
    async fn test_unauthenticated_is_rejected() {
        let response = app(LiveFeed::new(8))
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_stream_only_carries_own_tenant() {
        let feed = LiveFeed::new(8);
        let tenant = Uuid::new_v4();
        let hospital = Uuid::new_v4();

        let response = app(feed.clone())
            .oneshot(request("/", tenant))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "text/event-stream");

        let foreign = event(Uuid::new_v4(), hospital);
        let own = event(tenant, hospital);
        feed.broadcast(foreign.clone());
        feed.broadcast(own.clone());

        let mut body = response.into_body();
        let frame = tokio::time::timeout(Duration::from_secs(5), body.frame())
            .await
            .expect("event within timeout")
            .unwrap()
            .unwrap();
        let text = String::from_utf8(frame.into_data().unwrap().to_vec()).unwrap();
        assert!(text.contains("event: new_occurrence"), "{text}");
        assert!(text.contains(&own.occurrence_id.to_string()), "{text}");
        assert!(!text.contains(&foreign.occurrence_id.to_string()), "{text}");
    }
}
