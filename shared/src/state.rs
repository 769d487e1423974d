//! Per-cold-start application state shared by all handlers.

use chrono::{DateTime, NaiveDate, Utc};
use sqlx::PgPool;

use crate::{calendar, db, Config, Result};

/// Application state
pub struct AppState {
    pub db_pool: PgPool,
    pub config: Config,
}

impl AppState {
    /// Load configuration and connect to the database.
    pub async fn from_env() -> Result<Self> {
        let config = Config::from_env()?;
        let db_pool = db::create_pool(&config).await?;
        Ok(Self { db_pool, config })
    }

    pub fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    /// Today's date in the configured zone, not in UTC.
    pub fn today(&self) -> NaiveDate {
        calendar::local_date(self.now(), self.config.timezone)
    }
}
