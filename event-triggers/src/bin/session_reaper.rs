//! Session Reaper Lambda - Removes expired login sessions.
//!
//! Runs hourly via EventBridge. Expired sessions are already rejected at
//! authentication time; this keeps the table small.

use lambda_runtime::{run, service_fn, Error, LambdaEvent};
use serde::{Deserialize, Serialize};
use shared::AppState;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Deserialize)]
struct ScheduledEvent {
    #[serde(default, rename = "detail-type")]
    detail_type: String,
}

#[derive(Debug, Serialize)]
struct ReaperResponse {
    sessions_deleted: u64,
}

async fn handler(
    state: Arc<AppState>,
    event: LambdaEvent<ScheduledEvent>,
) -> Result<ReaperResponse, Error> {
    info!(detail_type = %event.payload.detail_type, "Session reaper triggered");

    let result = sqlx::query("DELETE FROM sessions WHERE expires_at < NOW()")
        .execute(&state.db_pool)
        .await?;

    let response = ReaperResponse {
        sessions_deleted: result.rows_affected(),
    };

    info!(sessions_deleted = response.sessions_deleted, "Session cleanup complete");

    Ok(response)
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .json()
        .init();

    let state = Arc::new(AppState::from_env().await?);

    run(service_fn(move |event| {
        let state = Arc::clone(&state);
        async move { handler(state, event).await }
    }))
    .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_response_shape() {
        let json = serde_json::to_value(ReaperResponse { sessions_deleted: 3 }).unwrap();
        assert_eq!(json["sessions_deleted"], 3);
    }
}
