//! Schema Migrator Lambda - Applies database migrations.
//!
//! Invoked once per deployment. Migrations under `migrations/` are embedded at
//! build time; already applied versions are skipped.

use anyhow::Context;
use lambda_runtime::{run, service_fn, Error, LambdaEvent};
use serde::{Deserialize, Serialize};
use shared::AppState;
use sqlx::migrate::Migrator;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

static MIGRATOR: Migrator = sqlx::migrate!("../migrations");

#[derive(Debug, Default, Deserialize)]
struct MigrationEvent {
    #[serde(default)]
    dry_run: bool,
}

#[derive(Debug, Serialize)]
struct MigrationResponse {
    known_migrations: usize,
    applied_before: i64,
    applied_after: i64,
    latest_version: Option<i64>,
}

async fn applied_count(pool: &sqlx::PgPool) -> anyhow::Result<i64> {
    let table: Option<String> =
        sqlx::query_scalar("SELECT to_regclass('_sqlx_migrations')::text")
            .fetch_one(pool)
            .await
            .context("checking for migrations table")?;
    if table.is_none() {
        return Ok(0);
    }

    sqlx::query_scalar("SELECT COUNT(*) FROM _sqlx_migrations WHERE success")
        .fetch_one(pool)
        .await
        .context("counting applied migrations")
}

async fn handler(
    state: Arc<AppState>,
    event: LambdaEvent<MigrationEvent>,
) -> Result<MigrationResponse, Error> {
    let applied_before = applied_count(&state.db_pool).await?;

    if event.payload.dry_run {
        info!(applied_before, "Dry run, no migrations applied");
    } else {
        MIGRATOR
            .run(&state.db_pool)
            .await
            .context("applying migrations")?;
    }

    let response = MigrationResponse {
        known_migrations: MIGRATOR.iter().count(),
        applied_before,
        applied_after: applied_count(&state.db_pool).await?,
        latest_version: MIGRATOR.iter().map(|m| m.version).max(),
    };

    info!(
        applied_before = response.applied_before,
        applied_after = response.applied_after,
        "Migrations complete"
    );

    Ok(response)
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
    fn test_migrations_embedded() {
        assert!(MIGRATOR.iter().count() >= 1);
        assert!(MIGRATOR.iter().all(|m| m.version > 0));
    }

    #[test]
    fn test_event_defaults_to_apply() {
        let event: MigrationEvent = serde_json::from_str("{}").unwrap();
        assert!(!event.dry_run);
    }

    #[test]
    fn test_usernames_unique_ignoring_case() {
        let sql = MIGRATOR
            .iter()
            .map(|m| m.sql.to_lowercase())
            .collect::<Vec<_>>()
            .join("\n");
        assert!(sql.contains(
            "create unique index users_username_lower_idx on users (lower(username))"
        ));
    }
}
