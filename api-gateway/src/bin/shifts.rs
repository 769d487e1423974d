//! Shifts Lambda - Daily E1/E2 shift assignments.
//!
//! Endpoints:
//! - GET /shifts?year&month - Shifts of a month with assignees
//! - GET /shifts/mine?from&to - Own shifts in a date range
//! - GET /shifts/stats?year&month - Assignment counts per user
//! - PUT /shifts/{date}/{type} - Assign or clear a position
//! - PUT /shifts/{date}/{type}/note - Edit the shift note

use chrono::{DateTime, Duration, NaiveDate, Utc};
use lambda_http::{run, service_fn, Body, Error, Request, Response};
use serde::{Deserialize, Serialize};
use shared::auth::{self, AuthenticatedUser};
use shared::calendar::{self, DateRange};
use shared::http::{self, query_param, route_path, segments};
use shared::shift_lock::{self, Holder, LOCK_WINDOW_MINUTES};
use shared::{parse_body, AppState, Position, ShiftType, YearMonth};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;
use validator::Validate;

/// Assign request; `userId: null` clears the position
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
struct AssignRequest {
    #[validate(range(min = 1, max = 2))]
    position: i64,
    user_id: Option<Uuid>,
}

/// Note request
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
struct NoteRequest {
    #[validate(length(max = 500))]
    note: Option<String>,
}

/// Shift row with assignee details
#[derive(Debug, Clone, sqlx::FromRow)]
struct ShiftRow {
    id: Uuid,
    shift_date: NaiveDate,
    shift_type: String,
    user1_id: Option<Uuid>,
    user1_name: Option<String>,
    user1_color: Option<String>,
    user1_locked_at: Option<DateTime<Utc>>,
    user2_id: Option<Uuid>,
    user2_name: Option<String>,
    user2_color: Option<String>,
    user2_locked_at: Option<DateTime<Utc>>,
    note: Option<String>,
    updated_at: DateTime<Utc>,
}

impl ShiftRow {
    fn holder(&self, position: Position) -> Option<Holder> {
        let (user_id, locked_at) = match position {
            Position::First => (self.user1_id, self.user1_locked_at),
            Position::Second => (self.user2_id, self.user2_locked_at),
        };
        user_id.map(|user_id| Holder { user_id, locked_at })
    }

    fn is_assigned(&self, user_id: Uuid) -> bool {
        self.user1_id == Some(user_id) || self.user2_id == Some(user_id)
    }
}

/// One position of a shift
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PositionResponse {
    position: u8,
    user_id: Option<String>,
    display_name: Option<String>,
    color: Option<String>,
    locked_until: Option<String>,
}

/// Shift API response
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ShiftResponse {
    id: String,
    date: String,
    #[serde(rename = "type")]
    shift_type: String,
    positions: Vec<PositionResponse>,
    note: Option<String>,
    updated_at: String,
}

impl ShiftResponse {
    fn from_row(row: ShiftRow, now: DateTime<Utc>) -> Self {
        let locked_until = |locked_at: Option<DateTime<Utc>>| {
            locked_at
                .filter(|at| shift_lock::is_recent(*at, now))
                .map(|at| (at + Duration::minutes(LOCK_WINDOW_MINUTES)).to_rfc3339())
        };

        Self {
            id: row.id.to_string(),
            date: row.shift_date.to_string(),
            shift_type: row.shift_type,
            positions: vec![
                PositionResponse {
                    position: 1,
                    user_id: row.user1_id.map(|u| u.to_string()),
                    display_name: row.user1_name,
                    color: row.user1_color,
                    locked_until: locked_until(row.user1_locked_at),
                },
                PositionResponse {
                    position: 2,
                    user_id: row.user2_id.map(|u| u.to_string()),
                    display_name: row.user2_name,
                    color: row.user2_color,
                    locked_until: locked_until(row.user2_locked_at),
                },
            ],
            note: row.note,
            updated_at: row.updated_at.to_rfc3339(),
        }
    }
}

/// Per-user assignment counts
#[derive(Debug, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
struct StatsRow {
    user_id: Uuid,
    display_name: String,
    e1_count: i64,
    e2_count: i64,
    total: i64,
}

const SHIFT_SELECT: &str = r#"
    SELECT
        s.id, s.shift_date, s.shift_type,
        s.user1_id, u1.display_name AS user1_name, u1.color AS user1_color, s.user1_locked_at,
        s.user2_id, u2.display_name AS user2_name, u2.color AS user2_color, s.user2_locked_at,
        s.note, s.updated_at
    FROM shifts s
    LEFT JOIN users u1 ON u1.id = s.user1_id
    LEFT JOIN users u2 ON u2.id = s.user2_id
"#;

/// Decide whether `actor` may put `new_user` into `position`.
///
/// Plain users may only enter themselves or remove themselves. Nobody may
/// occupy both positions of one shift.
fn authorize_assignment(
    actor: &AuthenticatedUser,
    current: Option<&ShiftRow>,
    position: Position,
    new_user: Option<Uuid>,
) -> shared::Result<()> {
    let holder = current.and_then(|row| row.holder(position));
    let other = current.and_then(|row| row.holder(position.other()));

    if !actor.is_backoffice() {
        match new_user {
            Some(id) if id != actor.user_id => {
                return Err(shared::Error::Forbidden(
                    "You can only assign yourself".to_string(),
                ))
            }
            None => {
                if let Some(holder) = holder {
                    if holder.user_id != actor.user_id {
                        return Err(shared::Error::Forbidden(
                            "You can only remove yourself".to_string(),
                        ));
                    }
                }
            }
            _ => {}
        }
    }

    if let (Some(new_user), Some(other)) = (new_user, other) {
        if other.user_id == new_user {
            return Err(shared::Error::Validation(BOTH_POSITIONS.to_string()));
        }
    }

    Ok(())
}

fn parse_shift_key(date: &str, shift_type: &str) -> shared::Result<(NaiveDate, ShiftType)> {
    Ok((calendar::parse_date(date, "date")?, shift_type.parse()?))
}

async fn fetch_shift(
    state: &AppState,
    date: NaiveDate,
    shift_type: ShiftType,
) -> shared::Result<Option<ShiftRow>> {
    let query = format!(
        "{} WHERE s.shift_date = $1 AND s.shift_type = $2",
        SHIFT_SELECT
    );
    Ok(sqlx::query_as(&query)
        .bind(date)
        .bind(shift_type.as_str())
        .fetch_optional(&state.db_pool)
        .await?)
}

async fn list_month(state: &AppState, event: &Request) -> shared::Result<Response<Body>> {
    let today = state.today();
    let month = calendar::month_from_query(
        query_param(event, "year").as_deref(),
        query_param(event, "month").as_deref(),
        today,
    )?;
    let range = DateRange::month(month);

    let query = format!(
        "{} WHERE s.shift_date BETWEEN $1 AND $2 ORDER BY s.shift_date, s.shift_type",
        SHIFT_SELECT
    );
    let rows: Vec<ShiftRow> = sqlx::query_as(&query)
        .bind(range.from)
        .bind(range.to)
        .fetch_all(&state.db_pool)
        .await?;

    let freeze = calendar::load_freeze_state(&state.db_pool, month, today).await?;
    let now = state.now();
    let shifts: Vec<ShiftResponse> = rows
        .into_iter()
        .map(|row| ShiftResponse::from_row(row, now))
        .collect();

    http::ok(
        200,
        serde_json::json!({
            "year": month.year,
            "month": month.month,
            "frozen": freeze.frozen,
            "freezeSource": freeze.source,
            "shifts": shifts,
        }),
    )
}

async fn list_mine(
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

    let query = format!(
        r#"{}
        WHERE s.shift_date BETWEEN $1 AND $2
          AND (s.user1_id = $3 OR s.user2_id = $3)
        ORDER BY s.shift_date, s.shift_type
        "#,
        SHIFT_SELECT
    );
    let rows: Vec<ShiftRow> = sqlx::query_as(&query)
        .bind(range.from)
        .bind(range.to)
        .bind(user.user_id)
        .fetch_all(&state.db_pool)
        .await?;

    let now = state.now();
    let shifts: Vec<ShiftResponse> = rows
        .into_iter()
        .map(|row| ShiftResponse::from_row(row, now))
        .collect();

    http::ok(
        200,
        serde_json::json!({
            "from": range.from.to_string(),
            "to": range.to.to_string(),
            "count": shifts.len(),
            "shifts": shifts,
        }),
    )
}

async fn stats(state: &AppState, event: &Request) -> shared::Result<Response<Body>> {
    let today = state.today();
    let year_param = query_param(event, "year");
    let month_param = query_param(event, "month");

    let range = if month_param.is_some() {
        let month = calendar::month_from_query(year_param.as_deref(), month_param.as_deref(), today)?;
        DateRange::month(month)
    } else {
        let year = calendar::month_from_query(year_param.as_deref(), Some("1"), today)?.year;
        DateRange {
            from: YearMonth { year, month: 1 }.first_day(),
            to: YearMonth { year, month: 12 }.last_day(),
        }
    };

    let rows: Vec<StatsRow> = sqlx::query_as(
        r#"
        SELECT
            u.id AS user_id,
            u.display_name,
            COUNT(*) FILTER (WHERE s.shift_type = 'E1') AS e1_count,
            COUNT(*) FILTER (WHERE s.shift_type = 'E2') AS e2_count,
            COUNT(*) AS total
        FROM shifts s
        CROSS JOIN LATERAL (VALUES (s.user1_id), (s.user2_id)) AS p(user_id)
        JOIN users u ON u.id = p.user_id
        WHERE s.shift_date BETWEEN $1 AND $2
        GROUP BY u.id, u.display_name
        ORDER BY total DESC, lower(u.display_name)
        "#,
    )
    .bind(range.from)
    .bind(range.to)
    .fetch_all(&state.db_pool)
    .await?;

    http::ok(
        200,
        serde_json::json!({
            "from": range.from.to_string(),
            "to": range.to.to_string(),
            "users": rows,
        }),
    )
}

async fn assign(
    state: &AppState,
    user: &AuthenticatedUser,
    date: NaiveDate,
    shift_type: ShiftType,
    event: &Request,
) -> shared::Result<Response<Body>> {
    let request: AssignRequest = parse_body!(event.body());
    let position = Position::try_from(request.position)?;
    let now = state.now();

    calendar::ensure_editable(&state.db_pool, user, date, state.today()).await?;

    if let Some(target) = request.user_id.filter(|id| *id != user.user_id) {
        let active: Option<bool> = sqlx::query_scalar("SELECT is_active FROM users WHERE id = $1")
            .bind(target)
            .fetch_optional(&state.db_pool)
            .await?;
        match active {
            Some(true) => {}
            Some(false) => {
                return Err(shared::Error::Validation("User is inactive".to_string()))
            }
            None => return Err(shared::Error::NotFound("User not found".to_string())),
        }
    }

    let current = fetch_shift(state, date, shift_type).await?;
    authorize_assignment(user, current.as_ref(), position, request.user_id)?;

    let holder = current.as_ref().and_then(|row| row.holder(position));
    shift_lock::check_claim(holder, user.user_id, request.user_id, user.is_backoffice(), now)?;

    if holder.map(|h| h.user_id) == request.user_id {
        return match current {
            Some(row) => http::ok(200, ShiftResponse::from_row(row, now)),
            // Clearing a shift that was never created.
            None => http::ok(200, serde_json::json!({ "message": "Nothing to change" })),
        };
    }

    let locked_at = request.user_id.map(|_| now);
    let user_column = position.user_column();
    let lock_column = position.locked_at_column();

    let changed = match &current {
        Some(row) => {
            let query = format!(
                r#"
                UPDATE shifts
                SET {user_column} = $2, {lock_column} = $3, updated_by = $4, updated_at = NOW()
                WHERE id = $1 AND {user_column} IS NOT DISTINCT FROM $5
                "#
            );
            sqlx::query(&query)
                .bind(row.id)
                .bind(request.user_id)
                .bind(locked_at)
                .bind(user.user_id)
                .bind(holder.map(|h| h.user_id))
                .execute(&state.db_pool)
                .await
                .map_err(map_shift_write_error)?
                .rows_affected()
                > 0
        }
        None => {
            let query = format!(
                r#"
                INSERT INTO shifts (shift_date, shift_type, {user_column}, {lock_column}, updated_by)
                VALUES ($1, $2, $3, $4, $5)
                ON CONFLICT (shift_date, shift_type) DO NOTHING
                "#
            );
            sqlx::query(&query)
                .bind(date)
                .bind(shift_type.as_str())
                .bind(request.user_id)
                .bind(locked_at)
                .bind(user.user_id)
                .execute(&state.db_pool)
                .await
                .map_err(map_shift_write_error)?
                .rows_affected()
                > 0
        }
    };

    if !changed {
        return Err(shared::Error::Conflict(
            "Shift was changed by someone else; reload and try again".to_string(),
        ));
    }

    info!(
        "{} set {} {} position {:?} to {:?}",
        user.username, date, shift_type, position, request.user_id
    );

    let row = fetch_shift(state, date, shift_type)
        .await?
        .ok_or_else(|| shared::Error::Internal("Shift vanished after write".to_string()))?;
    http::ok(200, ShiftResponse::from_row(row, now))
}

const BOTH_POSITIONS: &str = "User already holds the other position of this shift";

/// A concurrent write can still put one user in both positions; the CHECK
/// constraint catches it and it reads like the pre-check failure.
fn map_shift_write_error(err: sqlx::Error) -> shared::Error {
    shared::Error::on_check_violation(err, BOTH_POSITIONS)
}

async fn update_note(
    state: &AppState,
    user: &AuthenticatedUser,
    date: NaiveDate,
    shift_type: ShiftType,
    event: &Request,
) -> shared::Result<Response<Body>> {
    let request: NoteRequest = parse_body!(event.body());

    calendar::ensure_editable(&state.db_pool, user, date, state.today()).await?;

    let current = fetch_shift(state, date, shift_type).await?;
    let assigned = current
        .as_ref()
        .map(|row| row.is_assigned(user.user_id))
        .unwrap_or(false);
    if !assigned && !user.is_backoffice() {
        return Err(shared::Error::Forbidden(
            "Only assigned users can edit the note".to_string(),
        ));
    }

    let note = request
        .note
        .as_deref()
        .map(str::trim)
        .filter(|n| !n.is_empty());

    sqlx::query(
        r#"
        INSERT INTO shifts (shift_date, shift_type, note, updated_by)
        VALUES ($1, $2, $3, $4)
        ON CONFLICT (shift_date, shift_type) DO UPDATE SET
            note = EXCLUDED.note,
            updated_by = EXCLUDED.updated_by,
            updated_at = NOW()
        "#,
    )
    .bind(date)
    .bind(shift_type.as_str())
    .bind(note)
    .bind(user.user_id)
    .execute(&state.db_pool)
    .await?;

    let row = fetch_shift(state, date, shift_type)
        .await?
        .ok_or_else(|| shared::Error::Internal("Shift vanished after write".to_string()))?;
    http::ok(200, ShiftResponse::from_row(row, state.now()))
}

async fn route(state: &AppState, event: &Request) -> shared::Result<Response<Body>> {
    let method = event.method().as_str();
    let path = route_path(event.uri().path());

    info!("Shifts request: {} {}", method, path);

    let user = auth::authenticate(&state.db_pool, event.headers()).await?;

    match (method, segments(path).as_slice()) {
        ("GET", ["shifts"]) => list_month(state, event).await,
        ("GET", ["shifts", "mine"]) => list_mine(state, &user, event).await,
        ("GET", ["shifts", "stats"]) => stats(state, event).await,
        ("PUT", ["shifts", date, shift_type]) => {
            let (date, shift_type) = parse_shift_key(date, shift_type)?;
            assign(state, &user, date, shift_type, event).await
        }
        ("PUT", ["shifts", date, shift_type, "note"]) => {
            let (date, shift_type) = parse_shift_key(date, shift_type)?;
            update_note(state, &user, date, shift_type, event).await
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

    fn actor(role: Role) -> AuthenticatedUser {
        AuthenticatedUser {
            user_id: Uuid::new_v4(),
            username: "actor".to_string(),
            display_name: "Actor".to_string(),
            role,
            can_schreibdienst: false,
            token_hash: String::new(),
        }
    }

    fn shift(user1: Option<Uuid>, user2: Option<Uuid>, locked_at: Option<DateTime<Utc>>) -> ShiftRow {
        ShiftRow {
            id: Uuid::new_v4(),
            shift_date: NaiveDate::from_ymd_opt(2026, 10, 20).unwrap(),
            shift_type: "E1".to_string(),
            user1_id: user1,
            user1_name: user1.map(|_| "Eins".to_string()),
            user1_color: user1.map(|_| "#112233".to_string()),
            user1_locked_at: user1.and(locked_at),
            user2_id: user2,
            user2_name: user2.map(|_| "Zwei".to_string()),
            user2_color: None,
            user2_locked_at: user2.and(locked_at),
            note: None,
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_plain_user_assigns_only_self() {
        let me = actor(Role::User);
        assert!(authorize_assignment(&me, None, Position::First, Some(me.user_id)).is_ok());

        let err = authorize_assignment(&me, None, Position::First, Some(Uuid::new_v4())).unwrap_err();
        assert!(matches!(err, shared::Error::Forbidden(_)));
    }

    #[test]
    fn test_plain_user_removes_only_self() {
        let me = actor(Role::User);
        let other = Uuid::new_v4();

        let row = shift(Some(other), None, None);
        assert!(authorize_assignment(&me, Some(&row), Position::First, None).is_err());

        let row = shift(Some(me.user_id), None, None);
        assert!(authorize_assignment(&me, Some(&row), Position::First, None).is_ok());

        // Clearing an empty position is harmless.
        assert!(authorize_assignment(&me, Some(&row), Position::Second, None).is_ok());
    }

    #[test]
    fn test_backoffice_assigns_anyone() {
        let admin = actor(Role::Backoffice);
        let row = shift(Some(Uuid::new_v4()), None, None);
        assert!(authorize_assignment(&admin, Some(&row), Position::First, Some(Uuid::new_v4())).is_ok());
        assert!(authorize_assignment(&admin, Some(&row), Position::First, None).is_ok());
    }

    #[test]
    fn test_no_double_booking_within_shift() {
        let me = actor(Role::User);
        let row = shift(Some(me.user_id), None, None);
        let err = authorize_assignment(&me, Some(&row), Position::Second, Some(me.user_id)).unwrap_err();
        assert!(matches!(err, shared::Error::Validation(_)));
        assert_eq!(err.public_message(), BOTH_POSITIONS);
    }

    #[test]
    fn test_write_errors_other_than_check_pass_through() {
        let err = map_shift_write_error(sqlx::Error::RowNotFound);
        assert!(matches!(err, shared::Error::Database(_)));
    }

    #[test]
    fn test_response_reports_active_locks_only() {
        let now = Utc::now();
        let fresh = shift(Some(Uuid::new_v4()), Some(Uuid::new_v4()), Some(now - Duration::minutes(1)));
        let response = ShiftResponse::from_row(fresh, now);
        assert!(response.positions[0].locked_until.is_some());
        assert_eq!(response.positions[0].display_name.as_deref(), Some("Eins"));

        let stale = shift(Some(Uuid::new_v4()), None, Some(now - Duration::minutes(10)));
        let response = ShiftResponse::from_row(stale, now);
        assert!(response.positions[0].locked_until.is_none());
        assert!(response.positions[1].user_id.is_none());

        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["type"], "E1");
        assert_eq!(json["date"], "2026-10-20");
    }

    #[test]
    fn test_shift_key_parsing() {
        let (date, shift_type) = parse_shift_key("2026-10-20", "e2").unwrap();
        assert_eq!(date, NaiveDate::from_ymd_opt(2026, 10, 20).unwrap());
        assert_eq!(shift_type, ShiftType::E2);
        assert!(parse_shift_key("20.10.2026", "E1").is_err());
        assert!(parse_shift_key("2026-10-20", "E3").is_err());
    }

    #[test]
    fn test_assign_request_position_range() {
        let request: AssignRequest = serde_json::from_str(r#"{"position":3,"userId":null}"#).unwrap();
        assert!(request.validate().is_err());
    }
}
