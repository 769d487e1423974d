//! iCalendar Lambda - Shift feeds for calendar apps.
//!
//! Endpoints:
//! - GET /ical/feed/{token} - Subscription feed (no bearer auth)
//! - GET /ical/export?from&to - One-off export as a file download
//! - GET /ical/subscription - Current subscription URL
//! - POST /ical/subscription - Create or rotate the subscription token
//! - DELETE /ical/subscription - Revoke the subscription

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use lambda_http::{run, service_fn, Body, Error, Request, Response};
use shared::auth::{self, AuthenticatedUser};
use shared::calendar::DateRange;
use shared::http::{self, query_param, route_path, segments};
use shared::ical::{IcalCalendar, IcalEvent};
use shared::{AppState, ShiftType};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

#[derive(Debug, sqlx::FromRow)]
struct ShiftEntry {
    id: Uuid,
    shift_date: NaiveDate,
    shift_type: String,
    partner: Option<String>,
    note: Option<String>,
    updated_at: DateTime<Utc>,
}

#[derive(Debug, sqlx::FromRow)]
struct SchreibdienstEntry {
    id: Uuid,
    event_date: NaiveDate,
    start_time: Option<NaiveTime>,
    end_time: Option<NaiveTime>,
    title: Option<String>,
    note: Option<String>,
    updated_at: DateTime<Utc>,
}

#[derive(Debug, sqlx::FromRow)]
struct AbsenceEntry {
    id: Uuid,
    start_date: NaiveDate,
    end_date: NaiveDate,
    note: Option<String>,
}

/// Calendar owner resolved from a session or a feed token.
struct FeedOwner {
    user_id: Uuid,
    display_name: String,
}

fn subscription_url(base_url: &str, token: &str) -> String {
    format!("{}/api/ical/feed/{}", base_url.trim_end_matches('/'), token)
}

fn calendar_response(body: String, download_name: Option<&str>) -> shared::Result<Response<Body>> {
    let mut builder = Response::builder()
        .status(200)
        .header("Content-Type", "text/calendar; charset=utf-8")
        .header("Cache-Control", "no-cache, max-age=0")
        .header("Access-Control-Allow-Origin", "*");
    if let Some(name) = download_name {
        builder = builder.header(
            "Content-Disposition",
            format!("attachment; filename=\"{}\"", name),
        );
    }
    Ok(builder.body(Body::from(body))?)
}

async fn build_calendar(
    state: &AppState,
    owner: &FeedOwner,
    range: DateRange,
) -> shared::Result<IcalCalendar> {
    let config = &state.config;
    let domain = config.ical.uid_domain.as_str();

    let shifts: Vec<ShiftEntry> = sqlx::query_as(
        r#"
        SELECT
            s.id, s.shift_date, s.shift_type, s.note, s.updated_at,
            CASE WHEN s.user1_id = $1 THEN u2.display_name ELSE u1.display_name END AS partner
        FROM shifts s
        LEFT JOIN users u1 ON u1.id = s.user1_id
        LEFT JOIN users u2 ON u2.id = s.user2_id
        WHERE s.shift_date BETWEEN $2 AND $3
          AND (s.user1_id = $1 OR s.user2_id = $1)
        ORDER BY s.shift_date, s.shift_type
        "#,
    )
    .bind(owner.user_id)
    .bind(range.from)
    .bind(range.to)
    .fetch_all(&state.db_pool)
    .await?;

    let duties: Vec<SchreibdienstEntry> = sqlx::query_as(
        r#"
        SELECT id, event_date, start_time, end_time, title, note, updated_at
        FROM schreibdienst_events
        WHERE user_id = $1 AND event_date BETWEEN $2 AND $3
        ORDER BY event_date, start_time NULLS FIRST
        "#,
    )
    .bind(owner.user_id)
    .bind(range.from)
    .bind(range.to)
    .fetch_all(&state.db_pool)
    .await?;

    let absences: Vec<AbsenceEntry> = sqlx::query_as(
        r#"
        SELECT id, start_date, end_date, note
        FROM absences
        WHERE user_id = $1 AND start_date <= $3 AND end_date >= $2
        ORDER BY start_date
        "#,
    )
    .bind(owner.user_id)
    .bind(range.from)
    .bind(range.to)
    .fetch_all(&state.db_pool)
    .await?;

    let mut calendar = IcalCalendar::new(&config.ical, Some(&owner.display_name));

    for shift in &shifts {
        let shift_type: ShiftType = shift.shift_type.parse()?;
        calendar.push(IcalEvent::shift(
            shift.id,
            shift.shift_date,
            shift_type,
            config.hours_for(shift_type),
            shift.partner.as_deref(),
            shift.note.as_deref(),
            Some(shift.updated_at),
            domain,
        ));
    }

    for duty in &duties {
        calendar.push(IcalEvent::schreibdienst(
            duty.id,
            duty.event_date,
            duty.start_time.zip(duty.end_time),
            duty.title.as_deref(),
            duty.note.as_deref(),
            Some(duty.updated_at),
            domain,
        ));
    }

    for absence in &absences {
        calendar.push(IcalEvent::absence(
            absence.id,
            absence.start_date,
            absence.end_date,
            absence.note.as_deref(),
            domain,
        ));
    }

    info!(
        "Built calendar for {}: {} shifts, {} duties, {} absences",
        owner.user_id,
        shifts.len(),
        duties.len(),
        absences.len()
    );

    Ok(calendar)
}

async fn feed(state: &AppState, token: &str) -> shared::Result<Response<Body>> {
    let owner: Option<(Uuid, String)> = sqlx::query_as(
        "SELECT id, display_name FROM users WHERE ical_token = $1 AND is_active",
    )
    .bind(token)
    .fetch_optional(&state.db_pool)
    .await?;

    let (user_id, display_name) =
        owner.ok_or_else(|| shared::Error::NotFound("Calendar not found".to_string()))?;
    let owner = FeedOwner {
        user_id,
        display_name,
    };

    let ical = &state.config.ical;
    let range = DateRange::feed_window(state.today(), ical.past_months, ical.future_months);
    let calendar = build_calendar(state, &owner, range).await?;

    calendar_response(calendar.render(state.now()), None)
}

async fn export(
    state: &AppState,
    user: &AuthenticatedUser,
    event: &Request,
) -> shared::Result<Response<Body>> {
    let range = DateRange::from_query(
        query_param(event, "from").as_deref(),
        query_param(event, "to").as_deref(),
        state.today(),
        90,
    )?;

    let owner = FeedOwner {
        user_id: user.user_id,
        display_name: user.display_name.clone(),
    };
    let calendar = build_calendar(state, &owner, range).await?;
    let filename = format!("schichtplan-{}-{}.ics", range.from, range.to);

    calendar_response(calendar.render(state.now()), Some(&filename))
}

async fn get_subscription(
    state: &AppState,
    user: &AuthenticatedUser,
) -> shared::Result<Response<Body>> {
    let token: Option<String> = sqlx::query_scalar("SELECT ical_token FROM users WHERE id = $1")
        .bind(user.user_id)
        .fetch_one(&state.db_pool)
        .await?;

    let url = token.map(|t| subscription_url(&state.config.public_base_url, &t));
    http::ok(200, serde_json::json!({ "url": url }))
}

async fn rotate_subscription(
    state: &AppState,
    user: &AuthenticatedUser,
) -> shared::Result<Response<Body>> {
    let token = auth::generate_token();

    sqlx::query("UPDATE users SET ical_token = $2, updated_at = NOW() WHERE id = $1")
        .bind(user.user_id)
        .bind(&token)
        .execute(&state.db_pool)
        .await?;

    info!("{} rotated calendar subscription", user.username);
    http::ok(
        201,
        serde_json::json!({ "url": subscription_url(&state.config.public_base_url, &token) }),
    )
}

async fn revoke_subscription(
    state: &AppState,
    user: &AuthenticatedUser,
) -> shared::Result<Response<Body>> {
    sqlx::query("UPDATE users SET ical_token = NULL, updated_at = NOW() WHERE id = $1")
        .bind(user.user_id)
        .execute(&state.db_pool)
        .await?;

    info!("{} revoked calendar subscription", user.username);
    http::ok(200, serde_json::json!({ "url": null }))
}

/// Feed tokens are credentials and never reach the logs.
fn redact_feed_token(path: &str) -> &str {
    match segments(path).as_slice() {
        ["ical", "feed", _] => "/ical/feed/***",
        _ => path,
    }
}

async fn route(state: &AppState, event: &Request) -> shared::Result<Response<Body>> {
    let method = event.method().as_str();
    let path = route_path(event.uri().path());

    info!("iCal request: {} {}", method, redact_feed_token(path));

    // Calendar apps cannot send bearer tokens; the feed token authenticates.
    if let ("GET", ["ical", "feed", token]) = (method, segments(path).as_slice()) {
        let token = token.trim_end_matches(".ics");
        return feed(state, token).await;
    }

    let user = auth::authenticate(&state.db_pool, event.headers()).await?;

    match (method, segments(path).as_slice()) {
        ("GET", ["ical", "export"]) => export(state, &user, event).await,
        ("GET", ["ical", "subscription"]) => get_subscription(state, &user).await,
        ("POST", ["ical", "subscription"]) => rotate_subscription(state, &user).await,
        ("DELETE", ["ical", "subscription"]) => revoke_subscription(state, &user).await,
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
