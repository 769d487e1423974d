//! User Feedback Lambda - Bug reports and ideas from users.
//!
//! Endpoints:
//! - POST /feedback - Submit feedback
//! - GET /feedback?status&limit - List own feedback (backoffice: all)
//! - PUT /feedback/{id} - Update feedback status (backoffice)

use chrono::{DateTime, Utc};
use lambda_http::{run, service_fn, Body, Error, Request, Response};
use serde::{Deserialize, Serialize};
use shared::auth::{self, AuthenticatedUser};
use shared::http::{self, parse_id, query_limit, query_param, route_path, segments};
use shared::validation::validate_not_blank;
use shared::{parse_body, AppState};
use std::str::FromStr;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;
use validator::Validate;

/// Feedback category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
enum Category {
    Bug,
    Idea,
    Other,
}

impl Category {
    fn as_str(&self) -> &'static str {
        match self {
            Category::Bug => "bug",
            Category::Idea => "idea",
            Category::Other => "other",
        }
    }
}

/// Processing state of a feedback entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
enum Status {
    Open,
    InProgress,
    Done,
}

impl Status {
    fn as_str(&self) -> &'static str {
        match self {
            Status::Open => "open",
            Status::InProgress => "in_progress",
            Status::Done => "done",
        }
    }
}

impl FromStr for Status {
    type Err = shared::Error;

    fn from_str(s: &str) -> shared::Result<Self> {
        match s {
            "open" => Ok(Status::Open),
            "in_progress" => Ok(Status::InProgress),
            "done" => Ok(Status::Done),
            _ => Err(shared::Error::Validation(format!("Invalid status: {}", s))),
        }
    }
}

/// Submit feedback request
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
struct SubmitFeedbackRequest {
    category: Category,
    #[validate(length(min = 1, max = 4000), custom(function = "validate_not_blank"))]
    message: String,
}

/// Update status request
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
struct UpdateStatusRequest {
    status: Status,
}

/// Feedback entry
#[derive(Debug, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
struct FeedbackRow {
    id: Uuid,
    user_id: Option<Uuid>,
    display_name: Option<String>,
    category: String,
    message: String,
    status: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

const FEEDBACK_SELECT: &str = r#"
    SELECT f.id, f.user_id, u.display_name, f.category, f.message, f.status,
           f.created_at, f.updated_at
    FROM feedback f
    LEFT JOIN users u ON u.id = f.user_id
"#;

async fn submit_feedback(
    state: &AppState,
    user: &AuthenticatedUser,
    event: &Request,
) -> shared::Result<Response<Body>> {
    let request: SubmitFeedbackRequest = parse_body!(event.body());

    let id: Uuid = sqlx::query_scalar(
        r#"
        INSERT INTO feedback (user_id, category, message)
        VALUES ($1, $2, $3)
        RETURNING id
        "#,
    )
    .bind(user.user_id)
    .bind(request.category.as_str())
    .bind(request.message.trim())
    .fetch_one(&state.db_pool)
    .await?;

    info!("Feedback {} ({}) from {}", id, request.category.as_str(), user.username);

    http::ok(
        201,
        serde_json::json!({
            "id": id.to_string(),
            "category": request.category,
            "status": Status::Open,
        }),
    )
}

async fn list_feedback(
    state: &AppState,
    user: &AuthenticatedUser,
    event: &Request,
) -> shared::Result<Response<Body>> {
    let status = query_param(event, "status")
        .map(|s| s.parse::<Status>())
        .transpose()?;
    let limit = query_limit(event, 50, 200);

    // Backoffice sees every entry; $1 NULL disables the owner filter.
    let owner = if user.is_backoffice() {
        None
    } else {
        Some(user.user_id)
    };

    let query = format!(
        r#"{}
        WHERE ($1::uuid IS NULL OR f.user_id = $1)
          AND ($2::text IS NULL OR f.status = $2)
        ORDER BY f.created_at DESC
        LIMIT $3
        "#,
        FEEDBACK_SELECT
    );
    let entries: Vec<FeedbackRow> = sqlx::query_as(&query)
        .bind(owner)
        .bind(status.map(|s| s.as_str()))
        .bind(limit)
        .fetch_all(&state.db_pool)
        .await?;

    http::ok(
        200,
        serde_json::json!({
            "count": entries.len(),
            "feedback": entries,
        }),
    )
}

async fn update_status(
    state: &AppState,
    user: &AuthenticatedUser,
    feedback_id: Uuid,
    event: &Request,
) -> shared::Result<Response<Body>> {
    user.require_backoffice()?;
    let request: UpdateStatusRequest = parse_body!(event.body());

    let result = sqlx::query("UPDATE feedback SET status = $2, updated_at = NOW() WHERE id = $1")
        .bind(feedback_id)
        .bind(request.status.as_str())
        .execute(&state.db_pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(shared::Error::NotFound("Feedback not found".to_string()));
    }

    let query = format!("{} WHERE f.id = $1", FEEDBACK_SELECT);
    let entry: FeedbackRow = sqlx::query_as(&query)
        .bind(feedback_id)
        .fetch_one(&state.db_pool)
        .await?;

    http::ok(200, entry)
}

async fn route(state: &AppState, event: &Request) -> shared::Result<Response<Body>> {
    let method = event.method().as_str();
    let path = route_path(event.uri().path());

    info!("Feedback request: {} {}", method, path);

    let user = auth::authenticate(&state.db_pool, event.headers()).await?;

    match (method, segments(path).as_slice()) {
        ("POST", ["feedback"]) => submit_feedback(state, &user, event).await,
        ("GET", ["feedback"]) => list_feedback(state, &user, event).await,
        ("PUT", ["feedback", id]) => {
            update_status(state, &user, parse_id(id, "feedback")?, event).await
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
    fn test_submit_request_validation() {
        let request: SubmitFeedbackRequest =
            serde_json::from_str(r#"{"category":"idea","message":"Dark mode please"}"#).unwrap();
        assert_eq!(request.category, Category::Idea);
        assert!(request.validate().is_ok());

        let request: SubmitFeedbackRequest =
            serde_json::from_str(r#"{"category":"bug","message":""}"#).unwrap();
        assert!(request.validate().is_err());

        let long = "x".repeat(4001);
        let request = SubmitFeedbackRequest {
            category: Category::Other,
            message: long,
        };
        assert!(request.validate().is_err());
    }

    #[test]
    fn test_unknown_category_rejected() {
        assert!(serde_json::from_str::<SubmitFeedbackRequest>(
            r#"{"category":"praise","message":"nice"}"#
        )
        .is_err());
    }

    #[test]
    fn test_status_wire_format() {
        let request: UpdateStatusRequest =
            serde_json::from_str(r#"{"status":"in_progress"}"#).unwrap();
        assert_eq!(request.status, Status::InProgress);
        assert_eq!(request.status.as_str(), "in_progress");

        assert_eq!("done".parse::<Status>().unwrap(), Status::Done);
        assert!("closed".parse::<Status>().is_err());
    }
}
