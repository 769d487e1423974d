//! Calendar rules shared by the handlers: frozen months and date ranges.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use chrono_tz::Tz;
use serde::Serialize;
use sqlx::PgPool;

use crate::auth::AuthenticatedUser;
use crate::models::YearMonth;
use crate::{Error, Result};

/// Longest range any list or export endpoint accepts.
pub const MAX_RANGE_DAYS: i64 = 366;

/// Where the freeze state of a month comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FreezeSource {
    /// Written by the month freezer once the month was over
    Auto,
    /// Set by a backoffice user
    Manual,
    /// No row stored; derived from the current date
    Derived,
}

impl FreezeSource {
    pub fn parse(s: &str) -> Self {
        match s {
            "manual" => FreezeSource::Manual,
            "auto" => FreezeSource::Auto,
            _ => FreezeSource::Derived,
        }
    }
}

/// Freeze state of a month as reported to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FreezeState {
    pub frozen: bool,
    pub source: FreezeSource,
}

/// Calendar date of `now` on the wall clock of `tz`.
pub fn local_date(now: DateTime<Utc>, tz: Tz) -> NaiveDate {
    now.with_timezone(&tz).date_naive()
}

/// Whether a month lies entirely before `today`.
pub fn month_is_past(month: YearMonth, today: NaiveDate) -> bool {
    month.last_day() < today
}

/// Effective freeze state of `month`.
///
/// A stored row always wins, so a backoffice user can reopen a past month.
/// Without a row, past months are frozen.
pub fn freeze_state(
    month: YearMonth,
    stored: Option<(bool, FreezeSource)>,
    today: NaiveDate,
) -> FreezeState {
    match stored {
        Some((frozen, source)) => FreezeState { frozen, source },
        None => FreezeState {
            frozen: month_is_past(month, today),
            source: FreezeSource::Derived,
        },
    }
}

/// Look up the effective freeze state of `month`.
pub async fn load_freeze_state(
    pool: &PgPool,
    month: YearMonth,
    today: NaiveDate,
) -> Result<FreezeState> {
    let stored: Option<(bool, String)> = sqlx::query_as(
        "SELECT frozen, source FROM frozen_months WHERE year = $1 AND month = $2",
    )
    .bind(month.year)
    .bind(month.month as i32)
    .fetch_optional(pool)
    .await?;

    Ok(freeze_state(
        month,
        stored.map(|(frozen, source)| (frozen, FreezeSource::parse(&source))),
        today,
    ))
}

/// Fail with 403 when `date` falls into a frozen month and the user is not backoffice.
pub async fn ensure_editable(
    pool: &PgPool,
    user: &AuthenticatedUser,
    date: NaiveDate,
    today: NaiveDate,
) -> Result<()> {
    if user.is_backoffice() {
        return Ok(());
    }
    let month = YearMonth::of(date);
    if load_freeze_state(pool, month, today).await?.frozen {
        return Err(Error::Forbidden(format!("Month {} is frozen", month)));
    }
    Ok(())
}

/// Months the freezer should mark, oldest first: `start` up to the month before `today`.
pub fn months_to_freeze(start: YearMonth, today: NaiveDate) -> Vec<YearMonth> {
    let current = YearMonth::of(today);
    let mut months = Vec::new();
    let mut month = start;
    while month < current {
        months.push(month);
        month = month.next();
    }
    months
}

/// Parse `year` and `month` query values into a month, defaulting to the month of `today`.
pub fn month_from_query(
    year: Option<&str>,
    month: Option<&str>,
    today: NaiveDate,
) -> Result<YearMonth> {
    let current = YearMonth::of(today);
    let year = match year {
        Some(y) => y
            .parse()
            .map_err(|_| Error::Validation(format!("Invalid year: {}", y)))?,
        None => current.year,
    };
    let month = match month {
        Some(m) => m
            .parse()
            .map_err(|_| Error::Validation(format!("Invalid month: {}", m)))?,
        None => current.month,
    };
    YearMonth::new(year, month)
        .ok_or_else(|| Error::Validation(format!("Invalid month: {}-{}", year, month)))
}

/// Parse a `YYYY-MM-DD` date.
pub fn parse_date(value: &str, field: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d")
        .map_err(|_| Error::Validation(format!("{} must be a YYYY-MM-DD date", field)))
}

/// An inclusive date range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    pub from: NaiveDate,
    pub to: NaiveDate,
}

impl DateRange {
    /// Validate `from <= to` and the maximum span.
    pub fn new(from: NaiveDate, to: NaiveDate) -> Result<Self> {
        if to < from {
            return Err(Error::Validation("End date is before start date".to_string()));
        }
        if (to - from).num_days() >= MAX_RANGE_DAYS {
            return Err(Error::Validation(format!(
                "Date range must not exceed {} days",
                MAX_RANGE_DAYS
            )));
        }
        Ok(Self { from, to })
    }

    /// Range from optional `from`/`to` query values, with defaults relative to `today`.
    pub fn from_query(
        from: Option<&str>,
        to: Option<&str>,
        today: NaiveDate,
        default_days: i64,
    ) -> Result<Self> {
        let from = match from {
            Some(f) => parse_date(f, "from")?,
            None => today,
        };
        let to = match to {
            Some(t) => parse_date(t, "to")?,
            None => from + Duration::days(default_days),
        };
        Self::new(from, to)
    }

    pub fn month(month: YearMonth) -> Self {
        Self {
            from: month.first_day(),
            to: month.last_day(),
        }
    }

    /// Window of a subscription feed: whole months around `today`.
    pub fn feed_window(today: NaiveDate, past_months: u32, future_months: u32) -> Self {
        let current = YearMonth::of(today);
        Self {
            from: current.add_months(-(past_months as i32)).first_day(),
            to: current.add_months(future_months as i32).last_day(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_past_month_frozen_without_row() {
        let today = date(2026, 10, 18);
        let sept = YearMonth::new(2026, 9).unwrap();
        let oct = YearMonth::new(2026, 10).unwrap();

        assert!(freeze_state(sept, None, today).frozen);
        assert!(!freeze_state(oct, None, today).frozen);
        assert_eq!(freeze_state(oct, None, today).source, FreezeSource::Derived);
    }

    #[test]
    fn test_stored_row_overrides_derivation() {
        let today = date(2026, 10, 18);
        let sept = YearMonth::new(2026, 9).unwrap();
        let nov = YearMonth::new(2026, 11).unwrap();

        let reopened = freeze_state(sept, Some((false, FreezeSource::Manual)), today);
        assert!(!reopened.frozen);

        let early = freeze_state(nov, Some((true, FreezeSource::Manual)), today);
        assert!(early.frozen);
        assert_eq!(early.source, FreezeSource::Manual);
    }

    #[test]
    fn test_month_freezes_at_local_midnight() {
        let oct = YearMonth::new(2026, 10).unwrap();
        let berlin = chrono_tz::Europe::Berlin;

        // 00:30 on Nov 1st in Berlin, still Oct 31st in UTC
        let now = "2026-10-31T23:30:00Z".parse::<DateTime<Utc>>().unwrap();
        assert_eq!(local_date(now, berlin), date(2026, 11, 1));
        assert!(freeze_state(oct, None, local_date(now, berlin)).frozen);
        assert!(!freeze_state(oct, None, local_date(now, chrono_tz::UTC)).frozen);

        // 23:30 on Oct 31st in Berlin
        let now = "2026-10-31T22:30:00Z".parse::<DateTime<Utc>>().unwrap();
        assert!(!freeze_state(oct, None, local_date(now, berlin)).frozen);
    }

    #[test]
    fn test_last_day_of_month_is_not_past() {
        let oct = YearMonth::new(2026, 10).unwrap();
        assert!(!month_is_past(oct, date(2026, 10, 31)));
        assert!(month_is_past(oct, date(2026, 11, 1)));
    }

    #[test]
    fn test_months_to_freeze() {
        let start = YearMonth::new(2025, 11).unwrap();
        let months = months_to_freeze(start, date(2026, 2, 3));
        let labels: Vec<String> = months.iter().map(|m| m.to_string()).collect();
        assert_eq!(labels, vec!["2025-11", "2025-12", "2026-01"]);

        assert!(months_to_freeze(start, date(2025, 11, 30)).is_empty());
    }

    #[test]
    fn test_month_from_query() {
        let today = date(2026, 10, 18);
        assert_eq!(
            month_from_query(None, None, today).unwrap(),
            YearMonth::new(2026, 10).unwrap()
        );
        assert_eq!(
            month_from_query(Some("2027"), Some("2"), today).unwrap(),
            YearMonth::new(2027, 2).unwrap()
        );
        assert!(month_from_query(Some("2027"), Some("13"), today).is_err());
        assert!(month_from_query(Some("next"), None, today).is_err());
    }

    #[test]
    fn test_date_range_validation() {
        let today = date(2026, 10, 18);
        let range = DateRange::from_query(None, None, today, 90).unwrap();
        assert_eq!(range.to, date(2027, 1, 16));

        assert!(DateRange::from_query(Some("2026-10-18"), Some("2026-10-01"), today, 90).is_err());
        assert!(DateRange::from_query(Some("2026-01-01"), Some("2027-01-02"), today, 90).is_err());
        assert!(DateRange::from_query(Some("2026-01-01"), Some("2026-12-31"), today, 90).is_ok());
        assert!(DateRange::from_query(Some("18.10.2026"), None, today, 90).is_err());
    }

    #[test]
    fn test_feed_window_spans_whole_months() {
        let window = DateRange::feed_window(date(2026, 1, 15), 2, 12);
        assert_eq!(window.from, date(2025, 11, 1));
        assert_eq!(window.to, date(2027, 1, 31));
    }
}
