//! Auth Lambda - Bearer-token sessions.
//!
//! Endpoints:
//! - POST /auth/login - Exchange username and password for a session token
//! - POST /auth/logout - End the current session
//! - GET /auth/session - Current user of the session
//! - PUT /auth/password - Change own password

use chrono::{DateTime, Utc};
use lambda_http::{run, service_fn, Body, Error, Request, Response};
use serde::{Deserialize, Serialize};
use shared::auth::{self, AuthenticatedUser};
use shared::http::{self, route_path, segments};
use shared::{parse_body, AppState};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;
use validator::Validate;

/// Login request
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
struct LoginRequest {
    #[validate(length(min = 1, max = 100))]
    username: String,
    #[validate(length(min = 1, max = 200))]
    password: String,
}

/// Change password request
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
struct ChangePasswordRequest {
    #[validate(length(min = 1, max = 200))]
    current_password: String,
    #[validate(length(min = 8, max = 200))]
    new_password: String,
}

/// Login response
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct LoginResponse {
    token: String,
    expires_at: String,
    user: AuthenticatedUser,
}

#[derive(Debug, sqlx::FromRow)]
struct CredentialRow {
    id: Uuid,
    username: String,
    display_name: String,
    role: String,
    can_schreibdienst: bool,
    is_active: bool,
    password_hash: String,
}

const INVALID_LOGIN: &str = "Invalid username or password";

async fn login(state: &AppState, event: &Request) -> shared::Result<Response<Body>> {
    let request: LoginRequest = parse_body!(event.body());

    let row: Option<CredentialRow> = sqlx::query_as(
        r#"
        SELECT id, username, display_name, role, can_schreibdienst, is_active, password_hash
        FROM users
        WHERE lower(username) = lower($1)
        "#,
    )
    .bind(request.username.trim())
    .fetch_optional(&state.db_pool)
    .await?;

    let row = match row {
        Some(row) if row.is_active => row,
        _ => {
            auth::verify_dummy_password(&request.password).await?;
            return Err(shared::Error::Auth(INVALID_LOGIN.to_string()));
        }
    };

    if !auth::verify_password(&request.password, &row.password_hash).await? {
        info!("Failed login for {}", row.username);
        return Err(shared::Error::Auth(INVALID_LOGIN.to_string()));
    }

    let user_agent = event
        .headers()
        .get("user-agent")
        .and_then(|v| v.to_str().ok());

    let (token, expires_at): (String, DateTime<Utc>) =
        auth::create_session(&state.db_pool, row.id, state.config.session_ttl, user_agent).await?;

    info!("User {} logged in", row.username);

    http::ok(
        200,
        LoginResponse {
            user: AuthenticatedUser {
                user_id: row.id,
                username: row.username,
                display_name: row.display_name,
                role: row.role.parse()?,
                can_schreibdienst: row.can_schreibdienst,
                token_hash: auth::hash_token(&token),
            },
            token,
            expires_at: expires_at.to_rfc3339(),
        },
    )
}

async fn change_password(
    state: &AppState,
    user: &AuthenticatedUser,
    event: &Request,
) -> shared::Result<Response<Body>> {
    let request: ChangePasswordRequest = parse_body!(event.body());

    let current_hash: String = sqlx::query_scalar("SELECT password_hash FROM users WHERE id = $1")
        .bind(user.user_id)
        .fetch_one(&state.db_pool)
        .await?;

    if !auth::verify_password(&request.current_password, &current_hash).await? {
        return Err(shared::Error::Validation(
            "Current password is incorrect".to_string(),
        ));
    }

    let new_hash = auth::hash_password(&request.new_password).await?;
    sqlx::query("UPDATE users SET password_hash = $2, updated_at = NOW() WHERE id = $1")
        .bind(user.user_id)
        .bind(&new_hash)
        .execute(&state.db_pool)
        .await?;

    let revoked =
        auth::revoke_user_sessions(&state.db_pool, user.user_id, Some(&user.token_hash)).await?;
    info!("User {} changed password, {} other sessions ended", user.username, revoked);

    http::ok(
        200,
        serde_json::json!({
            "message": "Password changed",
            "sessionsRevoked": revoked,
        }),
    )
}

async fn route(state: &AppState, event: &Request) -> shared::Result<Response<Body>> {
    let method = event.method().as_str();
    let path = route_path(event.uri().path());

    info!("Auth request: {} {}", method, path);

    if let ("POST", ["auth", "login"]) = (method, segments(path).as_slice()) {
        return login(state, event).await;
    }

    let user = auth::authenticate(&state.db_pool, event.headers()).await?;

    match (method, segments(path).as_slice()) {
        ("POST", ["auth", "logout"]) => {
            auth::revoke_session(&state.db_pool, &user.token_hash).await?;
            info!("User {} logged out", user.username);
            http::ok(200, serde_json::json!({ "message": "Logged out" }))
        }
        ("GET", ["auth", "session"]) => http::ok(200, user),
        ("PUT", ["auth", "password"]) => change_password(state, &user, event).await,
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

    #[test]
    fn test_login_request_validation() {
        let request: LoginRequest =
            serde_json::from_str(r#"{"username":"anna","password":"secret-pw"}"#).unwrap();
        assert!(request.validate().is_ok());

        let request: LoginRequest =
            serde_json::from_str(r#"{"username":"","password":"secret-pw"}"#).unwrap();
        assert!(request.validate().is_err());
    }

    #[test]
    fn test_new_password_minimum_length() {
        let request: ChangePasswordRequest =
            serde_json::from_str(r#"{"currentPassword":"old-password","newPassword":"short"}"#)
                .unwrap();
        assert!(request.validate().is_err());
    }
}
