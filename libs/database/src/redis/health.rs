use redis::aio::ConnectionManager;
use tracing::debug;

use crate::common::DatabaseError;

/// Readiness probe: `PING` must answer `PONG`
pub async fn check_health(conn: &ConnectionManager) -> Result<(), DatabaseError> {
    let mut conn = conn.clone();
    let reply: String = redis::cmd("PING").query_async(&mut conn).await?;
    if reply != "PONG" {
        return Err(DatabaseError::HealthCheckFailed(format!(
            "Redis answered {reply:?} to PING"
        )));
    }
    debug!("Redis health check passed");
    Ok(())
}
