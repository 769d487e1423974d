//! Calendar Freeze Lambda - Read-only months.
//!
//! Endpoints:
//! - GET /calendar/freeze?year - Freeze state of every month of a year
//! - PUT /calendar/freeze/{year}/{month} - Freeze or reopen a month (backoffice)

use chrono::NaiveDate;
use lambda_http::{run, service_fn, Body, Error, Request, Response};
use serde::{Deserialize, Serialize};
use shared::auth::{self, AuthenticatedUser};
use shared::calendar::{self, FreezeSource};
use shared::http::{self, query_param, route_path, segments};
use shared::{parse_body, AppState, YearMonth};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;
use validator::Validate;

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
struct FreezeRequest {
    frozen: bool,
}

/// Freeze state of one month
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct MonthFreeze {
    year: i32,
    month: u32,
    frozen: bool,
    source: FreezeSource,
    updated_at: Option<String>,
}

#[derive(Debug, sqlx::FromRow)]
struct FreezeRow {
    month: i32,
    frozen: bool,
    source: String,
    updated_at: chrono::DateTime<chrono::Utc>,
}

fn year_overview(year: i32, rows: Vec<FreezeRow>, today: NaiveDate) -> Vec<MonthFreeze> {
    let stored: HashMap<u32, FreezeRow> = rows
        .into_iter()
        .map(|row| (row.month as u32, row))
        .collect();

    (1..=12)
        .filter_map(|month| YearMonth::new(year, month))
        .map(|ym| {
            let row = stored.get(&ym.month);
            let state = calendar::freeze_state(
                ym,
                row.map(|r| (r.frozen, FreezeSource::parse(&r.source))),
                today,
            );
            MonthFreeze {
                year: ym.year,
                month: ym.month,
                frozen: state.frozen,
                source: state.source,
                updated_at: row.map(|r| r.updated_at.to_rfc3339()),
            }
        })
        .collect()
}

async fn list_year(state: &AppState, event: &Request) -> shared::Result<Response<Body>> {
    let today = state.today();
    let year = calendar::month_from_query(query_param(event, "year").as_deref(), Some("1"), today)?
        .year;

    let rows: Vec<FreezeRow> = sqlx::query_as(
        "SELECT month, frozen, source, updated_at FROM frozen_months WHERE year = $1",
    )
    .bind(year)
    .fetch_all(&state.db_pool)
    .await?;

    http::ok(
        200,
        serde_json::json!({
            "year": year,
            "months": year_overview(year, rows, today),
        }),
    )
}

async fn set_freeze(
    state: &AppState,
    user: &AuthenticatedUser,
    year: &str,
    month: &str,
    event: &Request,
) -> shared::Result<Response<Body>> {
    user.require_backoffice()?;
    let ym = calendar::month_from_query(Some(year), Some(month), state.today())?;
    let request: FreezeRequest = parse_body!(event.body());

    sqlx::query(
        r#"
        INSERT INTO frozen_months (year, month, frozen, source, updated_by)
        VALUES ($1, $2, $3, 'manual', $4)
        ON CONFLICT (year, month) DO UPDATE SET
            frozen = EXCLUDED.frozen,
            source = 'manual',
            updated_by = EXCLUDED.updated_by,
            updated_at = NOW()
        "#,
    )
    .bind(ym.year)
    .bind(ym.month as i32)
    .bind(request.frozen)
    .bind(user.user_id)
    .execute(&state.db_pool)
    .await?;

    info!(
        "{} {} month {}",
        user.username,
        if request.frozen { "froze" } else { "reopened" },
        ym
    );

    http::ok(
        200,
        MonthFreeze {
            year: ym.year,
            month: ym.month,
            frozen: request.frozen,
            source: FreezeSource::Manual,
            updated_at: Some(state.now().to_rfc3339()),
        },
    )
}

async fn route(state: &AppState, event: &Request) -> shared::Result<Response<Body>> {
    let method = event.method().as_str();
    let path = route_path(event.uri().path());

    info!("Calendar freeze request: {} {}", method, path);

    let user = auth::authenticate(&state.db_pool, event.headers()).await?;

    match (method, segments(path).as_slice()) {
        ("GET", ["calendar", "freeze"]) => list_year(state, event).await,
        ("PUT", ["calendar", "freeze", year, month]) => {
            set_freeze(state, &user, year, month, event).await
        }
        _ => http::not_found(),
    }
}

async fn handler(state: Arc<AppState>, event: Request) -> Result<Response<Body>, Error> {
    http::respond(route(&state, &event).await)
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
    use chrono::Utc;

    #[test]
    fn test_year_overview_mixes_rows_and_derived_state() {
        let today = NaiveDate::from_ymd_opt(2026, 10, 18).unwrap();
        let rows = vec![
            FreezeRow {
                month: 3,
                frozen: false,
                source: "manual".to_string(),
                updated_at: Utc::now(),
            },
            FreezeRow {
                month: 11,
                frozen: true,
                source: "manual".to_string(),
                updated_at: Utc::now(),
            },
        ];

        let months = year_overview(2026, rows, today);
        assert_eq!(months.len(), 12);

        // Reopened past month
        assert!(!months[2].frozen);
        assert_eq!(months[2].source, FreezeSource::Manual);

        // Past month without row
        assert!(months[8].frozen);
        assert_eq!(months[8].source, FreezeSource::Derived);

        // Current month stays open
        assert!(!months[9].frozen);

        // Future month frozen in advance
        assert!(months[10].frozen);
        assert!(months[10].updated_at.is_some());
    }

    #[test]
    fn test_freeze_request_requires_flag() {
        assert!(serde_json::from_str::<FreezeRequest>("{}").is_err());
        let request: FreezeRequest = serde_json::from_str(r#"{"frozen":true}"#).unwrap();
        assert!(request.frozen);
    }
}
