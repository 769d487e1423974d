//! Color Presets Lambda - Per-user named colors.
//!
//! Endpoints:
//! - GET /color-presets - Own presets
//! - POST /color-presets - Add a preset
//! - PUT /color-presets/{id} - Rename or recolor a preset
//! - DELETE /color-presets/{id} - Remove a preset

use chrono::{DateTime, Utc};
use lambda_http::{run, service_fn, Body, Error, Request, Response};
use serde::{Deserialize, Serialize};
use shared::auth::{self, AuthenticatedUser};
use shared::http::{self, parse_id, route_path, segments};
use shared::validation::{normalize_color, validate_hex_color, validate_not_blank};
use shared::{parse_body, AppState};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;
use validator::Validate;

const MAX_PRESETS_PER_USER: i64 = 20;
const DUPLICATE_NAME: &str = "A preset with this name already exists";

/// Inserts nothing once the user has reached the limit.
const INSERT_PRESET: &str = r#"
    INSERT INTO color_presets (user_id, name, color)
    SELECT $1::uuid, $2::text, $3::text
    WHERE (SELECT COUNT(*) FROM color_presets WHERE user_id = $1) < $4
    RETURNING id, name, color, created_at
"#;

fn preset_limit_error() -> shared::Error {
    shared::Error::Validation(format!(
        "At most {} presets per user",
        MAX_PRESETS_PER_USER
    ))
}

/// Create preset request
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
struct CreatePresetRequest {
    #[validate(length(min = 1, max = 50), custom(function = "validate_not_blank"))]
    name: String,
    #[validate(custom(function = "validate_hex_color"))]
    color: String,
}

/// Update preset request
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
struct UpdatePresetRequest {
    #[validate(length(min = 1, max = 50), custom(function = "validate_not_blank"))]
    name: Option<String>,
    #[validate(custom(function = "validate_hex_color"))]
    color: Option<String>,
}

/// Color preset
#[derive(Debug, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
struct PresetRow {
    id: Uuid,
    name: String,
    color: String,
    created_at: DateTime<Utc>,
}

async fn list_presets(state: &AppState, user: &AuthenticatedUser) -> shared::Result<Response<Body>> {
    let presets: Vec<PresetRow> = sqlx::query_as(
        r#"
        SELECT id, name, color, created_at
        FROM color_presets
        WHERE user_id = $1
        ORDER BY lower(name)
        "#,
    )
    .bind(user.user_id)
    .fetch_all(&state.db_pool)
    .await?;

    http::ok(200, presets)
}

async fn create_preset(
    state: &AppState,
    user: &AuthenticatedUser,
    event: &Request,
) -> shared::Result<Response<Body>> {
    let request: CreatePresetRequest = parse_body!(event.body());

    // Creations of one user run one after another, so the count below is current.
    let mut tx = state.db_pool.begin().await?;
    sqlx::query("SELECT id FROM users WHERE id = $1 FOR UPDATE")
        .bind(user.user_id)
        .execute(&mut *tx)
        .await?;

    let preset: PresetRow = sqlx::query_as(INSERT_PRESET)
        .bind(user.user_id)
        .bind(request.name.trim())
        .bind(normalize_color(&request.color))
        .bind(MAX_PRESETS_PER_USER)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| shared::Error::on_unique_violation(e, DUPLICATE_NAME))?
        .ok_or_else(preset_limit_error)?;

    tx.commit().await?;

    info!("{} added color preset {}", user.username, preset.name);
    http::ok(201, preset)
}

async fn update_preset(
    state: &AppState,
    user: &AuthenticatedUser,
    preset_id: Uuid,
    event: &Request,
) -> shared::Result<Response<Body>> {
    let request: UpdatePresetRequest = parse_body!(event.body());

    let preset: PresetRow = sqlx::query_as(
        r#"
        UPDATE color_presets
        SET name = COALESCE($3, name),
            color = COALESCE($4, color)
        WHERE id = $1 AND user_id = $2
        RETURNING id, name, color, created_at
        "#,
    )
    .bind(preset_id)
    .bind(user.user_id)
    .bind(request.name.as_deref().map(str::trim))
    .bind(request.color.as_deref().map(normalize_color))
    .fetch_optional(&state.db_pool)
    .await
    .map_err(|e| shared::Error::on_unique_violation(e, DUPLICATE_NAME))?
    .ok_or_else(|| shared::Error::NotFound("Preset not found".to_string()))?;

    http::ok(200, preset)
}

async fn delete_preset(
    state: &AppState,
    user: &AuthenticatedUser,
    preset_id: Uuid,
) -> shared::Result<Response<Body>> {
    let result = sqlx::query("DELETE FROM color_presets WHERE id = $1 AND user_id = $2")
        .bind(preset_id)
        .bind(user.user_id)
        .execute(&state.db_pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(shared::Error::NotFound("Preset not found".to_string()));
    }
    http::ok(200, serde_json::json!({ "message": "Preset deleted" }))
}

async fn route(state: &AppState, event: &Request) -> shared::Result<Response<Body>> {
    let method = event.method().as_str();
    let path = route_path(event.uri().path());

    info!("Color presets request: {} {}", method, path);

    let user = auth::authenticate(&state.db_pool, event.headers()).await?;

    match (method, segments(path).as_slice()) {
        ("GET", ["color-presets"]) => list_presets(state, &user).await,
        ("POST", ["color-presets"]) => create_preset(state, &user, event).await,
        ("PUT", ["color-presets", id]) => {
            update_preset(state, &user, parse_id(id, "preset")?, event).await
        }
        ("DELETE", ["color-presets", id]) => {
            delete_preset(state, &user, parse_id(id, "preset")?).await
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

    #[test]
    fn test_create_request_validation() {
        let request: CreatePresetRequest =
            serde_json::from_str(r##"{"name":"Urlaub","color":"#A1B2C3"}"##).unwrap();
        assert!(request.validate().is_ok());
        assert_eq!(normalize_color(&request.color), "#a1b2c3");

        let request: CreatePresetRequest =
            serde_json::from_str(r##"{"name":"Urlaub","color":"#A1B2C"}"##).unwrap();
        assert!(request.validate().is_err());

        let request: CreatePresetRequest =
            serde_json::from_str(r##"{"name":" ","color":"#a1b2c3"}"##).unwrap();
        assert!(request.validate().is_err());
    }

    #[test]
    fn test_update_request_fields_optional() {
        let request: UpdatePresetRequest = serde_json::from_str("{}").unwrap();
        assert!(request.validate().is_ok());

        let request: UpdatePresetRequest =
            serde_json::from_str(r#"{"color":"blue"}"#).unwrap();
        assert!(request.validate().is_err());
    }

    #[test]
    fn test_insert_guards_preset_limit() {
        assert!(INSERT_PRESET
            .contains("WHERE (SELECT COUNT(*) FROM color_presets WHERE user_id = $1) < $4"));

        let err = preset_limit_error();
        assert_eq!(err.status_code(), 400);
        assert_eq!(err.public_message(), "At most 20 presets per user");
    }
}
