//! Schreibdienst Lambda - Secondary duty events.
//!
//! Endpoints:
//! - GET /schreibdienst?year&month - Events of a month
//! - POST /schreibdienst - Create an event
//! - PUT /schreibdienst/{id} - Edit an event (owner or backoffice)
//! - DELETE /schreibdienst/{id} - Remove an event (owner or backoffice)

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use lambda_http::{run, service_fn, Body, Error, Request, Response};
use serde::{Deserialize, Serialize};
use shared::auth::{self, AuthenticatedUser};
use shared::calendar::{self, DateRange};
use shared::http::{self, parse_id, query_param, route_path, segments};
use shared::validation::parse_time_pair;
use shared::{parse_body, AppState};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;
use validator::Validate;

/// Create event request
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
struct CreateEventRequest {
    date: NaiveDate,
    start_time: Option<String>,
    end_time: Option<String>,
    #[validate(length(max = 200))]
    title: Option<String>,
    #[validate(length(max = 1000))]
    note: Option<String>,
    user_id: Option<Uuid>,
}

/// Update event request. Times are replaced only when given;
/// `clearTimes` turns the event into an all-day entry.
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
struct UpdateEventRequest {
    date: Option<NaiveDate>,
    start_time: Option<String>,
    end_time: Option<String>,
    #[serde(default)]
    clear_times: bool,
    #[validate(length(max = 200))]
    title: Option<String>,
    #[validate(length(max = 1000))]
    note: Option<String>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
struct EventRow {
    id: Uuid,
    event_date: NaiveDate,
    start_time: Option<NaiveTime>,
    end_time: Option<NaiveTime>,
    user_id: Uuid,
    display_name: String,
    title: Option<String>,
    note: Option<String>,
    updated_at: DateTime<Utc>,
}

/// Schreibdienst event API response
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct EventResponse {
    id: String,
    date: String,
    start_time: Option<String>,
    end_time: Option<String>,
    all_day: bool,
    user_id: String,
    display_name: String,
    title: Option<String>,
    note: Option<String>,
    updated_at: String,
}

impl From<EventRow> for EventResponse {
    fn from(row: EventRow) -> Self {
        let format = |t: NaiveTime| t.format("%H:%M").to_string();
        Self {
            id: row.id.to_string(),
            date: row.event_date.to_string(),
            all_day: row.start_time.is_none(),
            start_time: row.start_time.map(format),
            end_time: row.end_time.map(format),
            user_id: row.user_id.to_string(),
            display_name: row.display_name,
            title: row.title,
            note: row.note,
            updated_at: row.updated_at.to_rfc3339(),
        }
    }
}

const EVENT_SELECT: &str = r#"
    SELECT e.id, e.event_date, e.start_time, e.end_time, e.user_id, u.display_name,
           e.title, e.note, e.updated_at
    FROM schreibdienst_events e
    JOIN users u ON u.id = e.user_id
"#;

fn clean(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// Resolve who a new event belongs to.
///
/// `target` is the requested owner with its capability flag, or `None` when the
/// caller creates for themselves.
fn event_owner(
    user: &AuthenticatedUser,
    target: Option<(Uuid, bool)>,
) -> shared::Result<Uuid> {
    match target {
        Some((id, capable)) if id != user.user_id => {
            user.require_backoffice()?;
            if !capable {
                return Err(shared::Error::Validation(
                    "User is not enabled for Schreibdienst".to_string(),
                ));
            }
            Ok(id)
        }
        _ => {
            if !user.can_schreibdienst {
                return Err(shared::Error::Forbidden(
                    "Schreibdienst is not enabled for your account".to_string(),
                ));
            }
            Ok(user.user_id)
        }
    }
}

/// New start/end times after an update.
fn updated_times(
    current: Option<(NaiveTime, NaiveTime)>,
    request: &UpdateEventRequest,
) -> shared::Result<Option<(NaiveTime, NaiveTime)>> {
    if request.clear_times {
        return Ok(None);
    }
    if request.start_time.is_none() && request.end_time.is_none() {
        return Ok(current);
    }
    parse_time_pair(request.start_time.as_deref(), request.end_time.as_deref())
}

async fn fetch_event(state: &AppState, id: Uuid) -> shared::Result<EventRow> {
    let query = format!("{} WHERE e.id = $1", EVENT_SELECT);
    sqlx::query_as(&query)
        .bind(id)
        .fetch_optional(&state.db_pool)
        .await?
        .ok_or_else(|| shared::Error::NotFound("Event not found".to_string()))
}

async fn list_events(state: &AppState, event: &Request) -> shared::Result<Response<Body>> {
    let month = calendar::month_from_query(
        query_param(event, "year").as_deref(),
        query_param(event, "month").as_deref(),
        state.today(),
    )?;
    let range = DateRange::month(month);

    let query = format!(
        "{} WHERE e.event_date BETWEEN $1 AND $2 ORDER BY e.event_date, e.start_time NULLS FIRST",
        EVENT_SELECT
    );
    let rows: Vec<EventRow> = sqlx::query_as(&query)
        .bind(range.from)
        .bind(range.to)
        .fetch_all(&state.db_pool)
        .await?;

    let events: Vec<EventResponse> = rows.into_iter().map(EventResponse::from).collect();
    http::ok(
        200,
        serde_json::json!({
            "year": month.year,
            "month": month.month,
            "events": events,
        }),
    )
}

async fn create_event(
    state: &AppState,
    user: &AuthenticatedUser,
    event: &Request,
) -> shared::Result<Response<Body>> {
    let request: CreateEventRequest = parse_body!(event.body());
    let times = parse_time_pair(request.start_time.as_deref(), request.end_time.as_deref())?;

    let target = match request.user_id.filter(|id| *id != user.user_id) {
        Some(id) => {
            let capable: Option<bool> = sqlx::query_scalar(
                "SELECT can_schreibdienst FROM users WHERE id = $1 AND is_active",
            )
            .bind(id)
            .fetch_optional(&state.db_pool)
            .await?;
            let capable =
                capable.ok_or_else(|| shared::Error::NotFound("User not found".to_string()))?;
            Some((id, capable))
        }
        None => None,
    };
    let owner = event_owner(user, target)?;

    calendar::ensure_editable(&state.db_pool, user, request.date, state.today()).await?;

    let id: Uuid = sqlx::query_scalar(
        r#"
        INSERT INTO schreibdienst_events (event_date, start_time, end_time, user_id, title, note)
        VALUES ($1, $2, $3, $4, $5, $6)
        RETURNING id
        "#,
    )
    .bind(request.date)
    .bind(times.map(|(start, _)| start))
    .bind(times.map(|(_, end)| end))
    .bind(owner)
    .bind(clean(request.title.as_deref()))
    .bind(clean(request.note.as_deref()))
    .fetch_one(&state.db_pool)
    .await?;

    info!("Schreibdienst {} on {} created by {}", id, request.date, user.username);
    http::ok(201, EventResponse::from(fetch_event(state, id).await?))
}

async fn update_event(
    state: &AppState,
    user: &AuthenticatedUser,
    id: Uuid,
    event: &Request,
) -> shared::Result<Response<Body>> {
    let request: UpdateEventRequest = parse_body!(event.body());
    let current = fetch_event(state, id).await?;
    user.require_owner_or_backoffice(current.user_id)?;

    let today = state.today();
    calendar::ensure_editable(&state.db_pool, user, current.event_date, today).await?;
    let date = request.date.unwrap_or(current.event_date);
    if date != current.event_date {
        calendar::ensure_editable(&state.db_pool, user, date, today).await?;
    }

    let current_times = current.start_time.zip(current.end_time);
    let times = updated_times(current_times, &request)?;

    sqlx::query(
        r#"
        UPDATE schreibdienst_events
        SET event_date = $2,
            start_time = $3,
            end_time = $4,
            title = COALESCE($5, title),
            note = COALESCE($6, note),
            updated_at = NOW()
        WHERE id = $1
        "#,
    )
    .bind(id)
    .bind(date)
    .bind(times.map(|(start, _)| start))
    .bind(times.map(|(_, end)| end))
    .bind(request.title.as_deref().map(str::trim))
    .bind(request.note.as_deref().map(str::trim))
    .execute(&state.db_pool)
    .await?;

    http::ok(200, EventResponse::from(fetch_event(state, id).await?))
}

async fn delete_event(
    state: &AppState,
    user: &AuthenticatedUser,
    id: Uuid,
) -> shared::Result<Response<Body>> {
    let current = fetch_event(state, id).await?;
    user.require_owner_or_backoffice(current.user_id)?;
    calendar::ensure_editable(&state.db_pool, user, current.event_date, state.today()).await?;

    sqlx::query("DELETE FROM schreibdienst_events WHERE id = $1")
        .bind(id)
        .execute(&state.db_pool)
        .await?;

    http::ok(200, serde_json::json!({ "message": "Event deleted" }))
}

async fn route(state: &AppState, event: &Request) -> shared::Result<Response<Body>> {
    let method = event.method().as_str();
    let path = route_path(event.uri().path());

    info!("Schreibdienst request: {} {}", method, path);

    let user = auth::authenticate(&state.db_pool, event.headers()).await?;

    match (method, segments(path).as_slice()) {
        ("GET", ["schreibdienst"]) => list_events(state, event).await,
        ("POST", ["schreibdienst"]) => create_event(state, &user, event).await,
        ("PUT", ["schreibdienst", id]) => {
            update_event(state, &user, parse_id(id, "event")?, event).await
        }
        ("DELETE", ["schreibdienst", id]) => {
            delete_event(state, &user, parse_id(id, "event")?).await
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
    use shared::Role;

    fn user(role: Role, can_schreibdienst: bool) -> AuthenticatedUser {
        AuthenticatedUser {
            user_id: Uuid::new_v4(),
            username: "jonas".to_string(),
            display_name: "Jonas".to_string(),
            role,
            can_schreibdienst,
            token_hash: String::new(),
        }
    }

    fn time(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    #[test]
    fn test_capability_required_for_own_events() {
        let capable = user(Role::User, true);
        assert_eq!(event_owner(&capable, None).unwrap(), capable.user_id);

        let err = event_owner(&user(Role::User, false), None).unwrap_err();
        assert!(matches!(err, shared::Error::Forbidden(_)));

        // Backoffice is no exception for own events.
        assert!(event_owner(&user(Role::Backoffice, false), None).is_err());
    }

    #[test]
    fn test_backoffice_creates_for_capable_users() {
        let admin = user(Role::Backoffice, false);
        let other = Uuid::new_v4();

        assert_eq!(event_owner(&admin, Some((other, true))).unwrap(), other);
        assert!(matches!(
            event_owner(&admin, Some((other, false))).unwrap_err(),
            shared::Error::Validation(_)
        ));

        let plain = user(Role::User, true);
        assert!(matches!(
            event_owner(&plain, Some((other, true))).unwrap_err(),
            shared::Error::Forbidden(_)
        ));
    }

    #[test]
    fn test_updated_times() {
        let current = Some((time(8, 0), time(10, 0)));

        let keep: UpdateEventRequest = serde_json::from_str(r#"{"title":"Protokoll"}"#).unwrap();
        assert_eq!(updated_times(current, &keep).unwrap(), current);

        let clear: UpdateEventRequest = serde_json::from_str(r#"{"clearTimes":true}"#).unwrap();
        assert_eq!(updated_times(current, &clear).unwrap(), None);

        let change: UpdateEventRequest =
            serde_json::from_str(r#"{"startTime":"09:30","endTime":"11:00"}"#).unwrap();
        assert_eq!(
            updated_times(current, &change).unwrap(),
            Some((time(9, 30), time(11, 0)))
        );

        let partial: UpdateEventRequest = serde_json::from_str(r#"{"startTime":"09:30"}"#).unwrap();
        assert!(updated_times(current, &partial).is_err());
    }

    #[test]
    fn test_response_formats_times() {
        let row = EventRow {
            id: Uuid::nil(),
            event_date: NaiveDate::from_ymd_opt(2026, 10, 21).unwrap(),
            start_time: Some(time(8, 0)),
            end_time: Some(time(9, 15)),
            user_id: Uuid::nil(),
            display_name: "Jonas".to_string(),
            title: None,
            note: None,
            updated_at: Utc::now(),
        };
        let response = EventResponse::from(row);
        assert_eq!(response.start_time.as_deref(), Some("08:00"));
        assert_eq!(response.end_time.as_deref(), Some("09:15"));
        assert!(!response.all_day);
    }

    #[test]
    fn test_blank_text_dropped() {
        assert_eq!(clean(Some("  ")), None);
        assert_eq!(clean(Some(" Sitzung ")), Some("Sitzung"));
        assert_eq!(clean(None), None);
    }
}
