//! HTTP helpers for Lambda functions.

use lambda_http::{Body, Request, RequestExt, Response};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{error, warn};
use uuid::Uuid;

use crate::{Error, Result};

/// Standard API response wrapper.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(message: impl Into<String>) -> ApiResponse<()> {
        ApiResponse {
            success: false,
            data: None,
            error: Some(message.into()),
        }
    }
}

/// Create a JSON response with the given status code and body.
pub fn json_response<T: Serialize>(status: u16, body: &T) -> Result<Response<Body>> {
    let json = serde_json::to_string(body)?;
    Ok(Response::builder()
        .status(status)
        .header("Content-Type", "application/json")
        .header("Access-Control-Allow-Origin", "*")
        .body(Body::from(json))?)
}

/// Wrap `data` in a successful `ApiResponse`.
pub fn ok<T: Serialize>(status: u16, data: T) -> Result<Response<Body>> {
    json_response(status, &ApiResponse::success(data))
}

/// Create an error response with the given status code and message.
pub fn error_response(status: u16, message: impl Into<String>) -> Result<Response<Body>> {
    json_response(status, &ApiResponse::<()>::error(message))
}

/// Turn a handler result into the Lambda response, rendering errors as JSON.
pub fn respond(result: Result<Response<Body>>) -> std::result::Result<Response<Body>, lambda_http::Error> {
    let err = match result {
        Ok(response) => return Ok(response),
        Err(err) => err,
    };

    let status = err.status_code();
    if status >= 500 {
        error!(error = %err, "Request failed");
    } else {
        warn!(status, error = %err, "Request rejected");
    }

    error_response(status, err.public_message()).map_err(|e| e.to_string().into())
}

/// Parse request body as JSON, mapping malformed input to a validation error.
pub fn parse_json_body<T: DeserializeOwned>(body: &Body) -> Result<T> {
    let bytes: &[u8] = body.as_ref();
    let bytes = if bytes.is_empty() { b"{}".as_slice() } else { bytes };
    serde_json::from_slice(bytes)
        .map_err(|e| Error::Validation(format!("Invalid request body: {}", e)))
}

/// Macro to parse and validate a request body, returning early with 400 on failure.
///
/// Usage:
/// ```ignore
/// let request: MyRequest = parse_body!(event.body());
/// ```
#[macro_export]
macro_rules! parse_body {
    ($body:expr) => {{
        let parsed = $crate::http::parse_json_body($body)?;
        $crate::validator::Validate::validate(&parsed)?;
        parsed
    }};
}

/// Request path without the API Gateway stage prefix.
pub fn route_path(raw_path: &str) -> &str {
    raw_path.strip_prefix("/api").unwrap_or(raw_path)
}

/// Non-empty path segments.
pub fn segments(path: &str) -> Vec<&str> {
    path.split('/').filter(|s| !s.is_empty()).collect()
}

/// Parse a UUID path segment.
pub fn parse_id(segment: &str, what: &str) -> Result<Uuid> {
    Uuid::parse_str(segment).map_err(|_| Error::Validation(format!("Invalid {} ID", what)))
}

/// First value of a query string parameter.
pub fn query_param(event: &Request, name: &str) -> Option<String> {
    event
        .query_string_parameters_ref()
        .and_then(|params| params.first(name))
        .map(str::to_string)
}

/// Query flag that is set when its value is `true` or `1`.
pub fn query_flag(event: &Request, name: &str) -> bool {
    matches!(query_param(event, name).as_deref(), Some("true") | Some("1"))
}

/// Parse a numeric `limit` query value, clamped to `1..=max`.
pub fn query_limit(event: &Request, default: i64, max: i64) -> i64 {
    query_param(event, "limit")
        .and_then(|l| l.parse::<i64>().ok())
        .unwrap_or(default)
        .clamp(1, max)
}

/// Response for an unknown route.
pub fn not_found() -> Result<Response<Body>> {
    Err(Error::NotFound("Not found".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, validator::Validate)]
    struct Sample {
        #[validate(length(min = 1))]
        name: String,
    }

    fn parse_sample(body: &Body) -> Result<Sample> {
        Ok(crate::parse_body!(body))
    }

    #[test]
    fn test_route_path_strips_stage() {
        assert_eq!(route_path("/api/shifts/2026-10-18/E1"), "/shifts/2026-10-18/E1");
        assert_eq!(route_path("/shifts"), "/shifts");
    }

    #[test]
    fn test_segments() {
        assert_eq!(segments("/shifts/2026-10-18/E1/"), vec!["shifts", "2026-10-18", "E1"]);
        assert!(segments("/").is_empty());
    }

    #[test]
    fn test_parse_id() {
        let id = Uuid::new_v4();
        assert_eq!(parse_id(&id.to_string(), "user").unwrap(), id);
        assert!(matches!(parse_id("42", "user"), Err(Error::Validation(_))));
    }

    #[test]
    fn test_parse_body_validates() {
        let parsed = parse_sample(&Body::from(r#"{"name":"E1"}"#)).unwrap();
        assert_eq!(parsed.name, "E1");

        assert!(matches!(
            parse_sample(&Body::from(r#"{"name":""}"#)),
            Err(Error::Validation(_))
        ));
        assert!(matches!(
            parse_sample(&Body::from("not json")),
            Err(Error::Validation(_))
        ));
    }

    #[test]
    fn test_respond_renders_error_envelope() {
        let response = respond(Err(Error::Conflict("taken".to_string()))).unwrap();
        assert_eq!(response.status(), 409);
        let body: serde_json::Value = serde_json::from_slice(response.body().as_ref()).unwrap();
        assert_eq!(body["success"], false);
        assert_eq!(body["error"], "taken");
        assert!(body.get("data").is_none());
    }

    #[test]
    fn test_ok_wraps_data() {
        let response = ok(201, serde_json::json!({"id": 1})).unwrap();
        assert_eq!(response.status(), 201);
        let body: serde_json::Value = serde_json::from_slice(response.body().as_ref()).unwrap();
        assert_eq!(body["success"], true);
        assert_eq!(body["data"]["id"], 1);
    }
}
