//! Users Lambda - Accounts and profiles.
//!
//! Endpoints:
//! - GET /users - List users (backoffice: `includeInactive=true`)
//! - GET /users/me - Own profile
//! - PUT /users/me - Update own profile
//! - POST /users - Create a user (backoffice)
//! - PUT /users/{id} - Update a user (backoffice)
//! - POST /users/{id}/password - Reset a password (backoffice)
//! - DELETE /users/{id} - Deactivate a user (backoffice)

use chrono::{DateTime, Utc};
use lambda_http::{run, service_fn, Body, Error, Request, Response};
use serde::{Deserialize, Serialize};
use shared::auth::{self, AuthenticatedUser};
use shared::http::{self, parse_id, query_flag, route_path, segments};
use shared::validation::{normalize_color, validate_hex_color, validate_not_blank};
use shared::{parse_body, AppState, Role};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;
use validator::Validate;

/// Create user request
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
struct CreateUserRequest {
    #[validate(length(min = 2, max = 50), custom(function = "validate_username"))]
    username: String,
    #[validate(length(min = 1, max = 100), custom(function = "validate_not_blank"))]
    display_name: String,
    #[validate(email)]
    email: Option<String>,
    #[validate(length(min = 8, max = 200))]
    password: String,
    role: Option<Role>,
    can_schreibdienst: Option<bool>,
    #[validate(custom(function = "validate_hex_color"))]
    color: Option<String>,
}

/// Own profile update
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
struct UpdateProfileRequest {
    #[validate(length(min = 1, max = 100), custom(function = "validate_not_blank"))]
    display_name: Option<String>,
    #[validate(email)]
    email: Option<String>,
    #[validate(custom(function = "validate_hex_color"))]
    color: Option<String>,
}

/// Backoffice user update
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
struct UpdateUserRequest {
    #[validate(length(min = 1, max = 100), custom(function = "validate_not_blank"))]
    display_name: Option<String>,
    #[validate(email)]
    email: Option<String>,
    #[validate(custom(function = "validate_hex_color"))]
    color: Option<String>,
    role: Option<Role>,
    is_active: Option<bool>,
    can_schreibdienst: Option<bool>,
}

/// Password reset request
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
struct ResetPasswordRequest {
    #[validate(length(min = 8, max = 200))]
    password: String,
}

/// User row from database
#[derive(Debug, sqlx::FromRow)]
struct UserRow {
    id: Uuid,
    username: String,
    display_name: String,
    email: Option<String>,
    role: String,
    is_active: bool,
    can_schreibdienst: bool,
    color: String,
    created_at: DateTime<Utc>,
}

/// User API response
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct UserResponse {
    id: String,
    username: String,
    display_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    email: Option<String>,
    role: String,
    is_active: bool,
    can_schreibdienst: bool,
    color: String,
    created_at: String,
}

impl UserResponse {
    /// Email addresses are only shown to the user themselves and to backoffice.
    fn for_viewer(row: UserRow, viewer: &AuthenticatedUser) -> Self {
        let show_email = viewer.is_backoffice() || viewer.user_id == row.id;
        Self {
            id: row.id.to_string(),
            username: row.username,
            display_name: row.display_name,
            email: if show_email { row.email } else { None },
            role: row.role,
            is_active: row.is_active,
            can_schreibdienst: row.can_schreibdienst,
            color: row.color,
            created_at: row.created_at.to_rfc3339(),
        }
    }
}

const USER_COLUMNS: &str =
    "id, username, display_name, email, role, is_active, can_schreibdienst, color, created_at";

fn validate_username(value: &str) -> Result<(), validator::ValidationError> {
    let valid = value
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'));
    if valid {
        Ok(())
    } else {
        let mut err = validator::ValidationError::new("username");
        err.message = Some("may only contain letters, digits, '.', '_' and '-'".into());
        Err(err)
    }
}

async fn fetch_user(state: &AppState, id: Uuid) -> shared::Result<UserRow> {
    let query = format!("SELECT {} FROM users WHERE id = $1", USER_COLUMNS);
    sqlx::query_as(&query)
        .bind(id)
        .fetch_optional(&state.db_pool)
        .await?
        .ok_or_else(|| shared::Error::NotFound("User not found".to_string()))
}

async fn list_users(
    state: &AppState,
    user: &AuthenticatedUser,
    event: &Request,
) -> shared::Result<Response<Body>> {
    let include_inactive = user.is_backoffice() && query_flag(event, "includeInactive");

    let query = format!(
        "SELECT {} FROM users WHERE is_active OR $1 ORDER BY lower(display_name)",
        USER_COLUMNS
    );
    let rows: Vec<UserRow> = sqlx::query_as(&query)
        .bind(include_inactive)
        .fetch_all(&state.db_pool)
        .await?;

    let users: Vec<UserResponse> = rows
        .into_iter()
        .map(|row| UserResponse::for_viewer(row, user))
        .collect();

    http::ok(
        200,
        serde_json::json!({
            "count": users.len(),
            "users": users,
        }),
    )
}

async fn update_profile(
    state: &AppState,
    user: &AuthenticatedUser,
    event: &Request,
) -> shared::Result<Response<Body>> {
    let request: UpdateProfileRequest = parse_body!(event.body());

    sqlx::query(
        r#"
        UPDATE users SET
            display_name = COALESCE($2, display_name),
            email = COALESCE($3, email),
            color = COALESCE($4, color),
            updated_at = NOW()
        WHERE id = $1
        "#,
    )
    .bind(user.user_id)
    .bind(request.display_name.as_deref().map(str::trim))
    .bind(&request.email)
    .bind(request.color.as_deref().map(normalize_color))
    .execute(&state.db_pool)
    .await?;

    let row = fetch_user(state, user.user_id).await?;
    http::ok(200, UserResponse::for_viewer(row, user))
}

async fn create_user(
    state: &AppState,
    user: &AuthenticatedUser,
    event: &Request,
) -> shared::Result<Response<Body>> {
    user.require_backoffice()?;
    let request: CreateUserRequest = parse_body!(event.body());

    let password_hash = auth::hash_password(&request.password).await?;
    let query = format!(
        r#"
        INSERT INTO users (username, display_name, email, password_hash, role, can_schreibdienst, color)
        VALUES ($1, $2, $3, $4, $5, $6, COALESCE($7, '#3b82f6'))
        RETURNING {}
        "#,
        USER_COLUMNS
    );

    let row: UserRow = sqlx::query_as(&query)
        .bind(request.username.trim())
        .bind(request.display_name.trim())
        .bind(&request.email)
        .bind(&password_hash)
        .bind(request.role.unwrap_or(Role::User).as_str())
        .bind(request.can_schreibdienst.unwrap_or(false))
        .bind(request.color.as_deref().map(normalize_color))
        .fetch_one(&state.db_pool)
        .await
        .map_err(|e| shared::Error::on_unique_violation(e, "Username already exists"))?;

    info!("User {} created by {}", row.username, user.username);
    http::ok(201, UserResponse::for_viewer(row, user))
}

/// Partial update; a deactivated user loses the subscription feed token too.
fn update_user_query() -> String {
    format!(
        r#"
        UPDATE users SET
            display_name = COALESCE($2, display_name),
            email = COALESCE($3, email),
            color = COALESCE($4, color),
            role = COALESCE($5, role),
            is_active = COALESCE($6, is_active),
            can_schreibdienst = COALESCE($7, can_schreibdienst),
            ical_token = CASE WHEN COALESCE($6, is_active) THEN ical_token ELSE NULL END,
            updated_at = NOW()
        WHERE id = $1
        RETURNING {}
        "#,
        USER_COLUMNS
    )
}

async fn update_user(
    state: &AppState,
    user: &AuthenticatedUser,
    target: Uuid,
    event: &Request,
) -> shared::Result<Response<Body>> {
    user.require_backoffice()?;
    let request: UpdateUserRequest = parse_body!(event.body());

    if target == user.user_id
        && (request.is_active == Some(false) || request.role == Some(Role::User))
    {
        return Err(shared::Error::Validation(
            "You cannot deactivate or demote your own account".to_string(),
        ));
    }

    let query = update_user_query();
    let row: UserRow = sqlx::query_as(&query)
        .bind(target)
        .bind(request.display_name.as_deref().map(str::trim))
        .bind(&request.email)
        .bind(request.color.as_deref().map(normalize_color))
        .bind(request.role.map(|r| r.as_str()))
        .bind(request.is_active)
        .bind(request.can_schreibdienst)
        .fetch_optional(&state.db_pool)
        .await?
        .ok_or_else(|| shared::Error::NotFound("User not found".to_string()))?;

    if !row.is_active {
        auth::revoke_user_sessions(&state.db_pool, row.id, None).await?;
    }

    info!("User {} updated by {}", row.username, user.username);
    http::ok(200, UserResponse::for_viewer(row, user))
}

async fn reset_password(
    state: &AppState,
    user: &AuthenticatedUser,
    target: Uuid,
    event: &Request,
) -> shared::Result<Response<Body>> {
    user.require_backoffice()?;
    let request: ResetPasswordRequest = parse_body!(event.body());

    let password_hash = auth::hash_password(&request.password).await?;
    let result = sqlx::query("UPDATE users SET password_hash = $2, updated_at = NOW() WHERE id = $1")
        .bind(target)
        .bind(&password_hash)
        .execute(&state.db_pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(shared::Error::NotFound("User not found".to_string()));
    }

    let revoked = auth::revoke_user_sessions(&state.db_pool, target, None).await?;
    info!("Password of {} reset by {}", target, user.username);

    http::ok(
        200,
        serde_json::json!({
            "message": "Password reset",
            "sessionsRevoked": revoked,
        }),
    )
}

async fn deactivate_user(
    state: &AppState,
    user: &AuthenticatedUser,
    target: Uuid,
) -> shared::Result<Response<Body>> {
    user.require_backoffice()?;
    if target == user.user_id {
        return Err(shared::Error::Validation(
            "You cannot deactivate your own account".to_string(),
        ));
    }

    let result = sqlx::query(
        "UPDATE users SET is_active = FALSE, ical_token = NULL, updated_at = NOW() WHERE id = $1",
    )
    .bind(target)
    .execute(&state.db_pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(shared::Error::NotFound("User not found".to_string()));
    }

    auth::revoke_user_sessions(&state.db_pool, target, None).await?;
    info!("User {} deactivated by {}", target, user.username);

    http::ok(
        200,
        serde_json::json!({
            "message": "User deactivated",
            "userId": target.to_string(),
        }),
    )
}

async fn route(state: &AppState, event: &Request) -> shared::Result<Response<Body>> {
    let method = event.method().as_str();
    let path = route_path(event.uri().path());

    info!("Users request: {} {}", method, path);

    let user = auth::authenticate(&state.db_pool, event.headers()).await?;

    match (method, segments(path).as_slice()) {
        ("GET", ["users"]) => list_users(state, &user, event).await,
        ("POST", ["users"]) => create_user(state, &user, event).await,
        ("GET", ["users", "me"]) => {
            let row = fetch_user(state, user.user_id).await?;
            http::ok(200, UserResponse::for_viewer(row, &user))
        }
        ("PUT", ["users", "me"]) => update_profile(state, &user, event).await,
        ("PUT", ["users", id]) => {
            let target = parse_id(id, "user")?;
            update_user(state, &user, target, event).await
        }
        ("POST", ["users", id, "password"]) => {
            let target = parse_id(id, "user")?;
            reset_password(state, &user, target, event).await
        }
        ("DELETE", ["users", id]) => {
            let target = parse_id(id, "user")?;
            deactivate_user(state, &user, target).await
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

    fn viewer(role: Role) -> AuthenticatedUser {
        AuthenticatedUser {
            user_id: Uuid::new_v4(),
            username: "viewer".to_string(),
            display_name: "Viewer".to_string(),
            role,
            can_schreibdienst: false,
            token_hash: String::new(),
        }
    }

    fn row() -> UserRow {
        UserRow {
            id: Uuid::new_v4(),
            username: "anna".to_string(),
            display_name: "Anna".to_string(),
            email: Some("anna@example.org".to_string()),
            role: "user".to_string(),
            is_active: true,
            can_schreibdienst: true,
            color: "#aabbcc".to_string(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_email_hidden_from_other_users() {
        let response = UserResponse::for_viewer(row(), &viewer(Role::User));
        assert!(response.email.is_none());

        let response = UserResponse::for_viewer(row(), &viewer(Role::Backoffice));
        assert_eq!(response.email.as_deref(), Some("anna@example.org"));
    }

    #[test]
    fn test_create_request_validation() {
        let valid: CreateUserRequest = serde_json::from_str(
            r##"{"username":"anna.k","displayName":"Anna","password":"long-enough","color":"#AABBCC","role":"backoffice"}"##,
        )
        .unwrap();
        assert!(valid.validate().is_ok());
        assert_eq!(valid.role, Some(Role::Backoffice));

        let bad_name: CreateUserRequest = serde_json::from_str(
            r#"{"username":"anna k","displayName":"Anna","password":"long-enough"}"#,
        )
        .unwrap();
        assert!(bad_name.validate().is_err());

        let bad_color: CreateUserRequest = serde_json::from_str(
            r#"{"username":"anna","displayName":"Anna","password":"long-enough","color":"red"}"#,
        )
        .unwrap();
        assert!(bad_color.validate().is_err());

        let bad_email: CreateUserRequest = serde_json::from_str(
            r#"{"username":"anna","displayName":"Anna","password":"long-enough","email":"nope"}"#,
        )
        .unwrap();
        assert!(bad_email.validate().is_err());
    }

    #[test]
    fn test_unknown_role_rejected_at_parse() {
        let parsed: Result<UpdateUserRequest, _> = serde_json::from_str(r#"{"role":"admin"}"#);
        assert!(parsed.is_err());
    }

    #[test]
    fn test_update_clears_feed_token_on_deactivation() {
        let query = update_user_query();
        assert!(query.contains("is_active = COALESCE($6, is_active)"));
        assert!(query
            .contains("ical_token = CASE WHEN COALESCE($6, is_active) THEN ical_token ELSE NULL END"));
        assert!(query.contains(USER_COLUMNS));
    }
}
