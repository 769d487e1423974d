//! AWS Secrets Manager integration.

use aws_sdk_secretsmanager::Client as SecretsClient;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::OnceLock;
use tokio::sync::RwLock;

use crate::{Error, Result};

/// Secret strings fetched during this execution environment's lifetime.
static SECRETS_CACHE: OnceLock<RwLock<HashMap<String, String>>> = OnceLock::new();

fn get_cache() -> &'static RwLock<HashMap<String, String>> {
    SECRETS_CACHE.get_or_init(|| RwLock::new(HashMap::new()))
}

/// Database credentials as stored by RDS in Secrets Manager.
#[derive(Debug, Deserialize)]
pub struct DatabaseCredentials {
    pub username: String,
    pub password: String,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub dbname: Option<String>,
}

/// Get a secret value from Secrets Manager, cached per cold start.
pub async fn get_secret(client: &SecretsClient, secret_arn: &str) -> Result<String> {
    if let Some(value) = get_cache().read().await.get(secret_arn) {
        return Ok(value.clone());
    }

    let response = client
        .get_secret_value()
        .secret_id(secret_arn)
        .send()
        .await
        .map_err(|e| Error::Aws(format!("Failed to get secret: {}", e)))?;

    let secret_string = response
        .secret_string()
        .ok_or_else(|| Error::Aws("Secret has no string value".to_string()))?
        .to_string();

    get_cache()
        .write()
        .await
        .insert(secret_arn.to_string(), secret_string.clone());

    Ok(secret_string)
}

/// Parse the JSON document of a database secret.
pub fn parse_database_credentials(secret: &str) -> Result<DatabaseCredentials> {
    serde_json::from_str(secret)
        .map_err(|e| Error::Aws(format!("Failed to parse database credentials: {}", e)))
}

/// Get database credentials from Secrets Manager.
pub async fn get_database_credentials(
    client: &SecretsClient,
    secret_arn: &str,
) -> Result<DatabaseCredentials> {
    let secret_string = get_secret(client, secret_arn).await?;
    parse_database_credentials(&secret_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_credentials() {
        let json = r#"{"username":"planner","password":"s3cr3t","host":"db.example.com","port":5432,"dbname":"schichtplan"}"#;
        let creds = parse_database_credentials(json).unwrap();
        assert_eq!(creds.username, "planner");
        assert_eq!(creds.port, Some(5432));
        assert_eq!(creds.dbname.as_deref(), Some("schichtplan"));
    }

    #[test]
    fn test_minimal_credentials() {
        let creds = parse_database_credentials(r#"{"username":"u","password":"p"}"#).unwrap();
        assert!(creds.host.is_none());
        assert!(matches!(
            parse_database_credentials(r#"{"username":"u"}"#),
            Err(Error::Aws(_))
        ));
    }
}
