//! Bearer-token session authentication.
//!
//! A login issues a random token; only its SHA-256 digest is stored in
//! `sessions`. Every request presents the token as `Authorization: Bearer`,
//! which is resolved to the owning active user.

use chrono::{DateTime, Duration, Utc};
use lambda_http::http::HeaderMap;
use rand::rngs::OsRng;
use rand::RngCore;
use serde::Serialize;
use sha2::{Digest, Sha256};
use sqlx::PgPool;
use std::sync::OnceLock;
use uuid::Uuid;

use crate::models::Role;
use crate::{Error, Result};

/// Random bytes per session or subscription token.
const TOKEN_BYTES: usize = 32;

/// Minimum length of a new password.
pub const MIN_PASSWORD_LEN: usize = 8;

/// Decoded user information from a session.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthenticatedUser {
    pub user_id: Uuid,
    pub username: String,
    pub display_name: String,
    pub role: Role,
    pub can_schreibdienst: bool,
    /// Digest of the token this request was authenticated with
    #[serde(skip)]
    pub token_hash: String,
}

impl AuthenticatedUser {
    pub fn is_backoffice(&self) -> bool {
        self.role == Role::Backoffice
    }

    /// Fail with 403 unless the user has the backoffice role.
    pub fn require_backoffice(&self) -> Result<()> {
        if self.is_backoffice() {
            Ok(())
        } else {
            Err(Error::Forbidden("Backoffice role required".to_string()))
        }
    }

    /// Fail with 403 unless the user owns the resource or is backoffice.
    pub fn require_owner_or_backoffice(&self, owner: Uuid) -> Result<()> {
        if self.user_id == owner || self.is_backoffice() {
            Ok(())
        } else {
            Err(Error::Forbidden("Not allowed to modify this entry".to_string()))
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct SessionUserRow {
    user_id: Uuid,
    username: String,
    display_name: String,
    role: String,
    can_schreibdienst: bool,
    expires_at: DateTime<Utc>,
}

/// Generate a fresh random token, hex encoded.
pub fn generate_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Digest under which a session token is stored.
pub fn hash_token(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

/// Extract the bearer token from the `Authorization` header.
pub fn bearer_token(headers: &HeaderMap) -> Result<&str> {
    let value = headers
        .get("authorization")
        .ok_or_else(|| Error::Auth("Missing Authorization header".to_string()))?
        .to_str()
        .map_err(|_| Error::Auth("Malformed Authorization header".to_string()))?;

    let token = value
        .strip_prefix("Bearer ")
        .or_else(|| value.strip_prefix("bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| Error::Auth("Expected a Bearer token".to_string()))?;

    Ok(token)
}

/// Resolve the request's bearer token to an active user.
pub async fn authenticate(pool: &PgPool, headers: &HeaderMap) -> Result<AuthenticatedUser> {
    let token_hash = hash_token(bearer_token(headers)?);

    let row: Option<SessionUserRow> = sqlx::query_as(
        r#"
        SELECT u.id AS user_id, u.username, u.display_name, u.role,
               u.can_schreibdienst, s.expires_at
        FROM sessions s
        JOIN users u ON u.id = s.user_id
        WHERE s.token_hash = $1 AND u.is_active
        "#,
    )
    .bind(&token_hash)
    .fetch_optional(pool)
    .await?;

    let row = row.ok_or_else(|| Error::Auth("Invalid session".to_string()))?;

    if row.expires_at <= Utc::now() {
        sqlx::query("DELETE FROM sessions WHERE token_hash = $1")
            .bind(&token_hash)
            .execute(pool)
            .await?;
        return Err(Error::Auth("Session expired".to_string()));
    }

    sqlx::query("UPDATE sessions SET last_seen_at = NOW() WHERE token_hash = $1")
        .bind(&token_hash)
        .execute(pool)
        .await?;

    Ok(AuthenticatedUser {
        user_id: row.user_id,
        username: row.username,
        display_name: row.display_name,
        role: row.role.parse()?,
        can_schreibdienst: row.can_schreibdienst,
        token_hash,
    })
}

/// Create a session for `user_id`, returning the plain token and its expiry.
pub async fn create_session(
    pool: &PgPool,
    user_id: Uuid,
    ttl: Duration,
    user_agent: Option<&str>,
) -> Result<(String, DateTime<Utc>)> {
    let token = generate_token();
    let expires_at = Utc::now() + ttl;

    sqlx::query(
        r#"
        INSERT INTO sessions (user_id, token_hash, user_agent, expires_at)
        VALUES ($1, $2, $3, $4)
        "#,
    )
    .bind(user_id)
    .bind(hash_token(&token))
    .bind(user_agent)
    .bind(expires_at)
    .execute(pool)
    .await?;

    Ok((token, expires_at))
}

/// Delete the session with the given token digest.
pub async fn revoke_session(pool: &PgPool, token_hash: &str) -> Result<()> {
    sqlx::query("DELETE FROM sessions WHERE token_hash = $1")
        .bind(token_hash)
        .execute(pool)
        .await?;
    Ok(())
}

/// Delete all sessions of a user, optionally keeping one.
pub async fn revoke_user_sessions(
    pool: &PgPool,
    user_id: Uuid,
    keep_token_hash: Option<&str>,
) -> Result<u64> {
    let result = sqlx::query(
        "DELETE FROM sessions WHERE user_id = $1 AND ($2::text IS NULL OR token_hash <> $2)",
    )
    .bind(user_id)
    .bind(keep_token_hash)
    .execute(pool)
    .await?;
    Ok(result.rows_affected())
}

/// Hash a password with bcrypt.
pub async fn hash_password(password: &str) -> Result<String> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(Error::Validation(format!(
            "Password must be at least {} characters",
            MIN_PASSWORD_LEN
        )));
    }
    let password = password.to_string();
    tokio::task::spawn_blocking(move || bcrypt::hash(password, bcrypt::DEFAULT_COST))
        .await
        .map_err(|e| Error::Internal(format!("Password hashing task failed: {}", e)))?
        .map_err(Error::from)
}

/// Check a password against a stored bcrypt hash (`$2a$`, `$2b$` or `$2y$`).
pub async fn verify_password(password: &str, hash: &str) -> Result<bool> {
    let password = password.to_string();
    let hash = hash.to_string();
    tokio::task::spawn_blocking(move || bcrypt::verify(password, &hash))
        .await
        .map_err(|e| Error::Internal(format!("Password check task failed: {}", e)))?
        .map_err(Error::from)
}

/// Throwaway hash checked when a login names no active user.
static DUMMY_HASH: OnceLock<String> = OnceLock::new();

async fn dummy_hash() -> Result<String> {
    if let Some(hash) = DUMMY_HASH.get() {
        return Ok(hash.clone());
    }
    let hash = hash_password(&generate_token()).await?;
    Ok(DUMMY_HASH.get_or_init(|| hash).clone())
}

/// Spend one bcrypt verification on a login that is rejected anyway.
///
/// Unknown and inactive users then take as long to reject as a wrong password.
pub async fn verify_dummy_password(password: &str) -> Result<()> {
    let hash = dummy_hash().await?;
    verify_password(password, &hash).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use lambda_http::http::HeaderValue;

    fn headers(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert("authorization", HeaderValue::from_str(value).unwrap());
        headers
    }

    #[test]
    fn test_generated_tokens_are_unique_hex() {
        let a = generate_token();
        let b = generate_token();
        assert_eq!(a.len(), TOKEN_BYTES * 2);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, b);
    }

    #[test]
    fn test_hash_token_is_stable_sha256() {
        assert_eq!(
            hash_token("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert_ne!(hash_token("abc"), hash_token("abd"));
    }

    #[test]
    fn test_bearer_token_extraction() {
        assert_eq!(bearer_token(&headers("Bearer abc123")).unwrap(), "abc123");
        assert_eq!(bearer_token(&headers("bearer  abc123 ")).unwrap(), "abc123");
        assert!(matches!(
            bearer_token(&headers("Basic dXNlcjpwdw==")),
            Err(Error::Auth(_))
        ));
        assert!(bearer_token(&headers("Bearer ")).is_err());
        assert!(bearer_token(&HeaderMap::new()).is_err());
    }

    #[test]
    fn test_role_checks() {
        let mut user = AuthenticatedUser {
            user_id: Uuid::new_v4(),
            username: "anna".to_string(),
            display_name: "Anna".to_string(),
            role: Role::User,
            can_schreibdienst: false,
            token_hash: String::new(),
        };
        assert!(matches!(user.require_backoffice(), Err(Error::Forbidden(_))));
        assert!(user.require_owner_or_backoffice(user.user_id).is_ok());
        assert!(user.require_owner_or_backoffice(Uuid::new_v4()).is_err());

        user.role = Role::Backoffice;
        assert!(user.require_backoffice().is_ok());
        assert!(user.require_owner_or_backoffice(Uuid::new_v4()).is_ok());
    }

    #[tokio::test]
    async fn test_password_round_trip() {
        let hash = hash_password("correct horse").await.unwrap();
        assert!(verify_password("correct horse", &hash).await.unwrap());
        assert!(!verify_password("wrong horse", &hash).await.unwrap());
    }

    #[tokio::test]
    async fn test_short_password_rejected() {
        assert!(matches!(
            hash_password("short").await,
            Err(Error::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_dummy_hash_is_stable_and_never_matches() {
        let first = dummy_hash().await.unwrap();
        let second = dummy_hash().await.unwrap();
        assert_eq!(first, second);
        assert!(first.starts_with("$2"));

        assert!(!verify_password("correct horse", &first).await.unwrap());
        assert!(verify_dummy_password("correct horse").await.is_ok());
        assert!(verify_dummy_password("").await.is_ok());
    }
}
