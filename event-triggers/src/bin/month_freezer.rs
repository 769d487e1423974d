//! Month Freezer Lambda - Marks past months as frozen.
//!
//! This Lambda runs daily via EventBridge and:
//! 1. Lists every month from `FREEZE_START` up to the previous month
//! 2. Inserts an `auto` freeze row for each month that has no row yet
//!
//! Months with a manual row keep it, so a month reopened by backoffice stays open.

use lambda_runtime::{run, service_fn, Error, LambdaEvent};
use serde::{Deserialize, Serialize};
use shared::calendar;
use shared::{AppState, YearMonth};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Deserialize)]
struct ScheduledEvent {
    #[serde(default, rename = "detail-type")]
    detail_type: String,
}

#[derive(Debug, Serialize)]
struct FreezerResponse {
    months_checked: u32,
    months_frozen: u64,
    latest_month: Option<String>,
}

/// Split months into the parallel arrays bound to `UNNEST`.
fn month_columns(months: &[YearMonth]) -> (Vec<i32>, Vec<i32>) {
    months.iter().map(|m| (m.year, m.month as i32)).unzip()
}

async fn handler(
    state: Arc<AppState>,
    event: LambdaEvent<ScheduledEvent>,
) -> Result<FreezerResponse, Error> {
    info!(detail_type = %event.payload.detail_type, "Month freezer triggered");

    let today = state.today();
    let months = calendar::months_to_freeze(state.config.freeze_start, today);
    let (years, month_numbers) = month_columns(&months);

    let result = sqlx::query(
        r#"
        INSERT INTO frozen_months (year, month, frozen, source)
        SELECT y, m, TRUE, 'auto'
        FROM UNNEST($1::int[], $2::int[]) AS t(y, m)
        ON CONFLICT (year, month) DO NOTHING
        "#,
    )
    .bind(&years)
    .bind(&month_numbers)
    .execute(&state.db_pool)
    .await?;

    let response = FreezerResponse {
        months_checked: months.len() as u32,
        months_frozen: result.rows_affected(),
        latest_month: months.last().map(|m| m.to_string()),
    };

    info!(
        months_checked = response.months_checked,
        months_frozen = response.months_frozen,
        "Month freeze complete"
    );

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
    use chrono::NaiveDate;

    #[test]
    fn test_month_columns_across_year_boundary() {
        let start = YearMonth::new(2025, 11).unwrap();
        let today = NaiveDate::from_ymd_opt(2026, 2, 10).unwrap();
        let months = calendar::months_to_freeze(start, today);

        let (years, numbers) = month_columns(&months);
        assert_eq!(years, vec![2025, 2025, 2026]);
        assert_eq!(numbers, vec![11, 12, 1]);
    }

    #[test]
    fn test_scheduled_event_payload() {
        let event: ScheduledEvent =
            serde_json::from_str(r#"{"detail-type":"Scheduled Event","source":"aws.events"}"#)
                .unwrap();
        assert_eq!(event.detail_type, "Scheduled Event");

        let event: ScheduledEvent = serde_json::from_str("{}").unwrap();
        assert!(event.detail_type.is_empty());
    }
}
