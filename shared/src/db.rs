//! Database connection management.

use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions};
use std::time::Duration;
use tracing::info;

use crate::secrets::{get_database_credentials, DatabaseCredentials};
use crate::{Config, Error, Result};

const DEFAULT_PORT: u16 = 5432;

/// Connection options from configuration and the credentials secret.
///
/// Host, port and database name stored in the secret take precedence.
pub fn connect_options(config: &Config, creds: &DatabaseCredentials) -> PgConnectOptions {
    PgConnectOptions::new()
        .host(creds.host.as_deref().unwrap_or(&config.db_host))
        .port(creds.port.unwrap_or(DEFAULT_PORT))
        .database(creds.dbname.as_deref().unwrap_or(&config.db_name))
        .username(&creds.username)
        .password(&creds.password)
}

/// Create a database connection pool.
///
/// `DATABASE_URL` is used directly when set; otherwise the credentials come
/// from the Secrets Manager secret named by `DB_SECRET_ARN`.
pub async fn create_pool(config: &Config) -> Result<PgPool> {
    let pool_options = PgPoolOptions::new()
        .max_connections(5)
        .acquire_timeout(Duration::from_secs(3));

    if let Some(url) = &config.database_url {
        info!("Connecting to database from DATABASE_URL");
        return pool_options.connect(url).await.map_err(Error::Database);
    }

    let secret_arn = config
        .db_secret_arn
        .as_deref()
        .ok_or_else(|| Error::Config("DB_SECRET_ARN not set".to_string()))?;

    let aws_config = aws_config::defaults(aws_config::BehaviorVersion::latest())
        .region(aws_config::Region::new(config.aws_region.clone()))
        .load()
        .await;
    let secrets_client = aws_sdk_secretsmanager::Client::new(&aws_config);
    let creds = get_database_credentials(&secrets_client, secret_arn).await?;

    info!(host = %config.db_host, database = %config.db_name, "Connecting to database");
    pool_options
        .connect_with(connect_options(config, &creds))
        .await
        .map_err(Error::Database)
}
