//! Holidays Lambda - Official holidays and personal absences.
//!
//! Endpoints:
//! - GET /holidays?year - Official holidays of a year
//! - POST /holidays - Add an official holiday (backoffice)
//! - PUT /holidays/{id} - Update an official holiday (backoffice)
//! - DELETE /holidays/{id} - Remove an official holiday (backoffice)
//! - GET /absences?year&month - Absences overlapping a month
//! - POST /absences - Record an absence
//! - DELETE /absences/{id} - Remove an absence (owner or backoffice)

use chrono::{DateTime, NaiveDate, Utc};
use lambda_http::{run, service_fn, Body, Error, Request, Response};
use serde::{Deserialize, Serialize};
use shared::auth::{self, AuthenticatedUser};
use shared::calendar::{self, DateRange};
use shared::http::{self, parse_id, query_param, route_path, segments};
use shared::validation::validate_not_blank;
use shared::{parse_body, AppState, YearMonth};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;
use validator::Validate;

/// Create holiday request
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
struct CreateHolidayRequest {
    date: NaiveDate,
    #[validate(length(min = 1, max = 100), custom(function = "validate_not_blank"))]
    name: String,
}

/// Update holiday request
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
struct UpdateHolidayRequest {
    date: Option<NaiveDate>,
    #[validate(length(min = 1, max = 100), custom(function = "validate_not_blank"))]
    name: Option<String>,
}

/// Create absence request
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
struct CreateAbsenceRequest {
    start_date: NaiveDate,
    end_date: NaiveDate,
    #[validate(length(max = 500))]
    note: Option<String>,
    user_id: Option<Uuid>,
}

/// Official holiday
#[derive(Debug, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
struct HolidayRow {
    id: Uuid,
    #[serde(rename = "date")]
    holiday_date: NaiveDate,
    name: String,
}

/// Absence with the absent user's name
#[derive(Debug, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
struct AbsenceRow {
    id: Uuid,
    user_id: Uuid,
    display_name: String,
    start_date: NaiveDate,
    end_date: NaiveDate,
    note: Option<String>,
    created_at: DateTime<Utc>,
}

const DUPLICATE_HOLIDAY: &str = "A holiday already exists on this date";

/// Owner of a new absence: plain users always record their own.
fn absence_owner(user: &AuthenticatedUser, requested: Option<Uuid>) -> shared::Result<Uuid> {
    match requested {
        Some(id) if id != user.user_id => {
            user.require_backoffice()?;
            Ok(id)
        }
        _ => Ok(user.user_id),
    }
}

async fn list_holidays(state: &AppState, event: &Request) -> shared::Result<Response<Body>> {
    let year = calendar::month_from_query(
        query_param(event, "year").as_deref(),
        Some("1"),
        state.today(),
    )?
    .year;
    let january = YearMonth { year, month: 1 };
    let december = YearMonth { year, month: 12 };

    let holidays: Vec<HolidayRow> = sqlx::query_as(
        r#"
        SELECT id, holiday_date, name
        FROM official_holidays
        WHERE holiday_date BETWEEN $1 AND $2
        ORDER BY holiday_date
        "#,
    )
    .bind(january.first_day())
    .bind(december.last_day())
    .fetch_all(&state.db_pool)
    .await?;

    http::ok(200, serde_json::json!({ "year": year, "holidays": holidays }))
}

async fn create_holiday(
    state: &AppState,
    user: &AuthenticatedUser,
    event: &Request,
) -> shared::Result<Response<Body>> {
    user.require_backoffice()?;
    let request: CreateHolidayRequest = parse_body!(event.body());

    let holiday: HolidayRow = sqlx::query_as(
        r#"
        INSERT INTO official_holidays (holiday_date, name)
        VALUES ($1, $2)
        RETURNING id, holiday_date, name
        "#,
    )
    .bind(request.date)
    .bind(request.name.trim())
    .fetch_one(&state.db_pool)
    .await
    .map_err(|e| shared::Error::on_unique_violation(e, DUPLICATE_HOLIDAY))?;

    info!("Added holiday {} on {}", holiday.name, holiday.holiday_date);
    http::ok(201, holiday)
}

async fn update_holiday(
    state: &AppState,
    user: &AuthenticatedUser,
    holiday_id: Uuid,
    event: &Request,
) -> shared::Result<Response<Body>> {
    user.require_backoffice()?;
    let request: UpdateHolidayRequest = parse_body!(event.body());

    let holiday: HolidayRow = sqlx::query_as(
        r#"
        UPDATE official_holidays
        SET holiday_date = COALESCE($2, holiday_date),
            name = COALESCE($3, name)
        WHERE id = $1
        RETURNING id, holiday_date, name
        "#,
    )
    .bind(holiday_id)
    .bind(request.date)
    .bind(request.name.as_deref().map(str::trim))
    .fetch_optional(&state.db_pool)
    .await
    .map_err(|e| shared::Error::on_unique_violation(e, DUPLICATE_HOLIDAY))?
    .ok_or_else(|| shared::Error::NotFound("Holiday not found".to_string()))?;

    http::ok(200, holiday)
}

async fn delete_holiday(
    state: &AppState,
    user: &AuthenticatedUser,
    holiday_id: Uuid,
) -> shared::Result<Response<Body>> {
    user.require_backoffice()?;

    let result = sqlx::query("DELETE FROM official_holidays WHERE id = $1")
        .bind(holiday_id)
        .execute(&state.db_pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(shared::Error::NotFound("Holiday not found".to_string()));
    }
    http::ok(200, serde_json::json!({ "message": "Holiday deleted" }))
}

async fn list_absences(state: &AppState, event: &Request) -> shared::Result<Response<Body>> {
    let month = calendar::month_from_query(
        query_param(event, "year").as_deref(),
        query_param(event, "month").as_deref(),
        state.today(),
    )?;
    let range = DateRange::month(month);

    let absences: Vec<AbsenceRow> = sqlx::query_as(
        r#"
        SELECT a.id, a.user_id, u.display_name, a.start_date, a.end_date, a.note, a.created_at
        FROM absences a
        JOIN users u ON u.id = a.user_id
        WHERE a.start_date <= $2 AND a.end_date >= $1
        ORDER BY a.start_date, lower(u.display_name)
        "#,
    )
    .bind(range.from)
    .bind(range.to)
    .fetch_all(&state.db_pool)
    .await?;

    http::ok(
        200,
        serde_json::json!({
            "year": month.year,
            "month": month.month,
            "absences": absences,
        }),
    )
}

async fn create_absence(
    state: &AppState,
    user: &AuthenticatedUser,
    event: &Request,
) -> shared::Result<Response<Body>> {
    let request: CreateAbsenceRequest = parse_body!(event.body());
    let range = DateRange::new(request.start_date, request.end_date)?;
    let owner = absence_owner(user, request.user_id)?;

    calendar::ensure_editable(&state.db_pool, user, range.from, state.today()).await?;

    let note = request
        .note
        .as_deref()
        .map(str::trim)
        .filter(|n| !n.is_empty());

    let absence: AbsenceRow = sqlx::query_as(
        r#"
        WITH inserted AS (
            INSERT INTO absences (user_id, start_date, end_date, note)
            VALUES ($1, $2, $3, $4)
            RETURNING id, user_id, start_date, end_date, note, created_at
        )
        SELECT i.id, i.user_id, u.display_name, i.start_date, i.end_date, i.note, i.created_at
        FROM inserted i
        JOIN users u ON u.id = i.user_id
        "#,
    )
    .bind(owner)
    .bind(range.from)
    .bind(range.to)
    .bind(note)
    .fetch_optional(&state.db_pool)
    .await
    .map_err(|e| match &e {
        sqlx::Error::Database(db) if db.is_foreign_key_violation() => {
            shared::Error::NotFound("User not found".to_string())
        }
        _ => shared::Error::Database(e),
    })?
    .ok_or_else(|| shared::Error::NotFound("User not found".to_string()))?;

    info!(
        "Absence {} to {} recorded for {}",
        absence.start_date, absence.end_date, absence.display_name
    );
    http::ok(201, absence)
}

async fn delete_absence(
    state: &AppState,
    user: &AuthenticatedUser,
    absence_id: Uuid,
) -> shared::Result<Response<Body>> {
    let existing: Option<(Uuid, NaiveDate)> =
        sqlx::query_as("SELECT user_id, start_date FROM absences WHERE id = $1")
            .bind(absence_id)
            .fetch_optional(&state.db_pool)
            .await?;

    let (owner, start_date) =
        existing.ok_or_else(|| shared::Error::NotFound("Absence not found".to_string()))?;
    user.require_owner_or_backoffice(owner)?;
    calendar::ensure_editable(&state.db_pool, user, start_date, state.today()).await?;

    sqlx::query("DELETE FROM absences WHERE id = $1")
        .bind(absence_id)
        .execute(&state.db_pool)
        .await?;

    http::ok(200, serde_json::json!({ "message": "Absence deleted" }))
}

async fn route(state: &AppState, event: &Request) -> shared::Result<Response<Body>> {
    let method = event.method().as_str();
    let path = route_path(event.uri().path());

    info!("Holidays request: {} {}", method, path);

    let user = auth::authenticate(&state.db_pool, event.headers()).await?;

    match (method, segments(path).as_slice()) {
        ("GET", ["holidays"]) => list_holidays(state, event).await,
        ("POST", ["holidays"]) => create_holiday(state, &user, event).await,
        ("PUT", ["holidays", id]) => {
            update_holiday(state, &user, parse_id(id, "holiday")?, event).await
        }
        ("DELETE", ["holidays", id]) => {
            delete_holiday(state, &user, parse_id(id, "holiday")?).await
        }
        ("GET", ["absences"]) => list_absences(state, event).await,
        ("POST", ["absences"]) => create_absence(state, &user, event).await,
        ("DELETE", ["absences", id]) => {
            delete_absence(state, &user, parse_id(id, "absence")?).await
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
