//! Announcements Lambda - Notices shown to all users.
//!
//! Endpoints:
//! - GET /announcements - Announcements active today (backoffice: `all=true`)
//! - POST /announcements - Publish an announcement (backoffice)
//! - PUT /announcements/{id} - Edit an announcement (backoffice)
//! - DELETE /announcements/{id} - Remove an announcement (backoffice)
//! - POST /announcements/{id}/read - Mark as read

use chrono::{DateTime, NaiveDate, Utc};
use lambda_http::{run, service_fn, Body, Error, Request, Response};
use serde::{Deserialize, Serialize};
use shared::auth::{self, AuthenticatedUser};
use shared::http::{self, parse_id, query_flag, route_path, segments};
use shared::validation::validate_not_blank;
use shared::{parse_body, AppState};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;
use validator::Validate;

/// Create announcement request
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
struct CreateAnnouncementRequest {
    #[validate(length(min = 1, max = 200), custom(function = "validate_not_blank"))]
    title: String,
    #[validate(length(min = 1, max = 5000))]
    body: String,
    valid_from: Option<NaiveDate>,
    valid_until: Option<NaiveDate>,
}

/// Update announcement request; `validUntil: null` keeps the current value,
/// `clearValidUntil` makes the announcement open-ended
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
struct UpdateAnnouncementRequest {
    #[validate(length(min = 1, max = 200), custom(function = "validate_not_blank"))]
    title: Option<String>,
    #[validate(length(min = 1, max = 5000))]
    body: Option<String>,
    valid_from: Option<NaiveDate>,
    valid_until: Option<NaiveDate>,
    #[serde(default)]
    clear_valid_until: bool,
}

/// Announcement with the caller's read flag
#[derive(Debug, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
struct AnnouncementRow {
    id: Uuid,
    title: String,
    body: String,
    valid_from: NaiveDate,
    valid_until: Option<NaiveDate>,
    created_by_name: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    read: bool,
    #[sqlx(skip)]
    active: bool,
}

const ANNOUNCEMENT_SELECT: &str = r#"
    SELECT
        a.id, a.title, a.body, a.valid_from, a.valid_until,
        u.display_name AS created_by_name,
        a.created_at, a.updated_at,
        EXISTS (
            SELECT 1 FROM announcement_reads r
            WHERE r.announcement_id = a.id AND r.user_id = $1
        ) AS read
    FROM announcements a
    LEFT JOIN users u ON u.id = a.created_by
"#;

fn check_validity(from: NaiveDate, until: Option<NaiveDate>) -> shared::Result<()> {
    match until {
        Some(until) if until < from => Err(shared::Error::Validation(
            "validUntil must not be before validFrom".to_string(),
        )),
        _ => Ok(()),
    }
}

/// Whether an announcement is shown on `today`.
fn is_active(from: NaiveDate, until: Option<NaiveDate>, today: NaiveDate) -> bool {
    from <= today && until.map_or(true, |until| until >= today)
}

async fn fetch_announcement(
    state: &AppState,
    user: &AuthenticatedUser,
    id: Uuid,
) -> shared::Result<AnnouncementRow> {
    let query = format!("{} WHERE a.id = $2", ANNOUNCEMENT_SELECT);
    sqlx::query_as(&query)
        .bind(user.user_id)
        .bind(id)
        .fetch_optional(&state.db_pool)
        .await?
        .ok_or_else(|| shared::Error::NotFound("Announcement not found".to_string()))
}

async fn list_announcements(
    state: &AppState,
    user: &AuthenticatedUser,
    event: &Request,
) -> shared::Result<Response<Body>> {
    let include_all = query_flag(event, "all");
    if include_all {
        user.require_backoffice()?;
    }

    let query = if include_all {
        format!("{} ORDER BY a.valid_from DESC, a.created_at DESC", ANNOUNCEMENT_SELECT)
    } else {
        format!(
            r#"{}
            WHERE a.valid_from <= $2 AND (a.valid_until IS NULL OR a.valid_until >= $2)
            ORDER BY a.valid_from DESC, a.created_at DESC
            "#,
            ANNOUNCEMENT_SELECT
        )
    };

    let mut sql = sqlx::query_as::<_, AnnouncementRow>(&query).bind(user.user_id);
    if !include_all {
        sql = sql.bind(state.today());
    }
    let mut announcements = sql.fetch_all(&state.db_pool).await?;
    let today = state.today();
    for announcement in &mut announcements {
        announcement.active = is_active(announcement.valid_from, announcement.valid_until, today);
    }

    let unread = announcements.iter().filter(|a| a.active && !a.read).count();
    http::ok(
        200,
        serde_json::json!({
            "announcements": announcements,
            "unread": unread,
        }),
    )
}

async fn create_announcement(
    state: &AppState,
    user: &AuthenticatedUser,
    event: &Request,
) -> shared::Result<Response<Body>> {
    user.require_backoffice()?;
    let request: CreateAnnouncementRequest = parse_body!(event.body());

    let valid_from = request.valid_from.unwrap_or_else(|| state.today());
    check_validity(valid_from, request.valid_until)?;

    let id: Uuid = sqlx::query_scalar(
        r#"
        INSERT INTO announcements (title, body, valid_from, valid_until, created_by)
        VALUES ($1, $2, $3, $4, $5)
        RETURNING id
        "#,
    )
    .bind(request.title.trim())
    .bind(&request.body)
    .bind(valid_from)
    .bind(request.valid_until)
    .bind(user.user_id)
    .fetch_one(&state.db_pool)
    .await?;

    info!("{} published announcement {}", user.username, id);
    http::ok(201, fetch_announcement(state, user, id).await?)
}

async fn update_announcement(
    state: &AppState,
    user: &AuthenticatedUser,
    id: Uuid,
    event: &Request,
) -> shared::Result<Response<Body>> {
    user.require_backoffice()?;
    let request: UpdateAnnouncementRequest = parse_body!(event.body());

    let current = fetch_announcement(state, user, id).await?;
    let valid_from = request.valid_from.unwrap_or(current.valid_from);
    let valid_until = if request.clear_valid_until {
        None
    } else {
        request.valid_until.or(current.valid_until)
    };
    check_validity(valid_from, valid_until)?;

    sqlx::query(
        r#"
        UPDATE announcements
        SET title = COALESCE($2, title),
            body = COALESCE($3, body),
            valid_from = $4,
            valid_until = $5,
            updated_at = NOW()
        WHERE id = $1
        "#,
    )
    .bind(id)
    .bind(request.title.as_deref().map(str::trim))
    .bind(request.body.as_deref())
    .bind(valid_from)
    .bind(valid_until)
    .execute(&state.db_pool)
    .await?;

    http::ok(200, fetch_announcement(state, user, id).await?)
}

async fn delete_announcement(
    state: &AppState,
    user: &AuthenticatedUser,
    id: Uuid,
) -> shared::Result<Response<Body>> {
    user.require_backoffice()?;

    let result = sqlx::query("DELETE FROM announcements WHERE id = $1")
        .bind(id)
        .execute(&state.db_pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(shared::Error::NotFound("Announcement not found".to_string()));
    }
    http::ok(200, serde_json::json!({ "message": "Announcement deleted" }))
}

async fn mark_read(
    state: &AppState,
    user: &AuthenticatedUser,
    id: Uuid,
) -> shared::Result<Response<Body>> {
    let exists: Option<Uuid> = sqlx::query_scalar("SELECT id FROM announcements WHERE id = $1")
        .bind(id)
        .fetch_optional(&state.db_pool)
        .await?;
    if exists.is_none() {
        return Err(shared::Error::NotFound("Announcement not found".to_string()));
    }

    sqlx::query(
        r#"
        INSERT INTO announcement_reads (announcement_id, user_id)
        VALUES ($1, $2)
        ON CONFLICT (announcement_id, user_id) DO NOTHING
        "#,
    )
    .bind(id)
    .bind(user.user_id)
    .execute(&state.db_pool)
    .await?;

    http::ok(200, serde_json::json!({ "id": id.to_string(), "read": true }))
}

async fn route(state: &AppState, event: &Request) -> shared::Result<Response<Body>> {
    let method = event.method().as_str();
    let path = route_path(event.uri().path());

    info!("Announcements request: {} {}", method, path);

    let user = auth::authenticate(&state.db_pool, event.headers()).await?;

    match (method, segments(path).as_slice()) {
        ("GET", ["announcements"]) => list_announcements(state, &user, event).await,
        ("POST", ["announcements"]) => create_announcement(state, &user, event).await,
        ("PUT", ["announcements", id]) => {
            update_announcement(state, &user, parse_id(id, "announcement")?, event).await
        }
        ("DELETE", ["announcements", id]) => {
            delete_announcement(state, &user, parse_id(id, "announcement")?).await
        }
        ("POST", ["announcements", id, "read"]) => {
            mark_read(state, &user, parse_id(id, "announcement")?).await
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

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_validity_window() {
        assert!(check_validity(date(2026, 10, 1), None).is_ok());
        assert!(check_validity(date(2026, 10, 1), Some(date(2026, 10, 1))).is_ok());
        assert!(check_validity(date(2026, 10, 2), Some(date(2026, 10, 1))).is_err());
    }

    #[test]
    fn test_active_on_boundaries() {
        let today = date(2026, 10, 18);
        assert!(is_active(today, Some(today), today));
        assert!(is_active(date(2026, 1, 1), None, today));
        assert!(!is_active(date(2026, 10, 19), None, today));
        assert!(!is_active(date(2026, 10, 1), Some(date(2026, 10, 17)), today));
    }

    #[test]
    fn test_create_request_validation() {
        let request: CreateAnnouncementRequest = serde_json::from_str(
            r#"{"title":"Neue Dienstzeiten","body":"Ab November beginnt E1 um 7 Uhr.","validUntil":"2026-11-30"}"#,
        )
        .unwrap();
        assert!(request.validate().is_ok());
        assert!(request.valid_from.is_none());

        let request: CreateAnnouncementRequest =
            serde_json::from_str(r#"{"title":"  ","body":"x"}"#).unwrap();
        assert!(request.validate().is_err());
    }

    #[test]
    fn test_update_request_defaults() {
        let request: UpdateAnnouncementRequest = serde_json::from_str("{}").unwrap();
        assert!(!request.clear_valid_until);
        assert!(request.validate().is_ok());
    }
}
