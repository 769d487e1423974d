//! Shared domain types.

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::Error;

/// Role of a user account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Volunteers and staff
    User,
    /// Privileged role: user management, freezing, official holidays, announcements
    Backoffice,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Backoffice => "backoffice",
        }
    }
}

impl FromStr for Role {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Role::User),
            "backoffice" => Ok(Role::Backoffice),
            other => Err(Error::Validation(format!(
                "Invalid role '{}'. Must be one of: user, backoffice",
                other
            ))),
        }
    }
}

/// The two daily shifts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ShiftType {
    E1,
    E2,
}

impl ShiftType {
    pub const ALL: [ShiftType; 2] = [ShiftType::E1, ShiftType::E2];

    pub fn as_str(&self) -> &'static str {
        match self {
            ShiftType::E1 => "E1",
            ShiftType::E2 => "E2",
        }
    }
}

impl fmt::Display for ShiftType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ShiftType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "E1" => Ok(ShiftType::E1),
            "E2" => Ok(ShiftType::E2),
            _ => Err(Error::Validation(format!(
                "Invalid shift type '{}'. Must be E1 or E2",
                s
            ))),
        }
    }
}

/// One of the two assignable positions of a shift.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Position {
    First,
    Second,
}

impl Position {
    /// Column holding the assignee of this position.
    pub fn user_column(&self) -> &'static str {
        match self {
            Position::First => "user1_id",
            Position::Second => "user2_id",
        }
    }

    /// Column holding the lock timestamp of this position.
    pub fn locked_at_column(&self) -> &'static str {
        match self {
            Position::First => "user1_locked_at",
            Position::Second => "user2_locked_at",
        }
    }

    pub fn other(&self) -> Position {
        match self {
            Position::First => Position::Second,
            Position::Second => Position::First,
        }
    }
}

impl TryFrom<i64> for Position {
    type Error = Error;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Position::First),
            2 => Ok(Position::Second),
            _ => Err(Error::Validation("Position must be 1 or 2".to_string())),
        }
    }
}

/// A calendar month.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct YearMonth {
    pub year: i32,
    pub month: u32,
}

impl YearMonth {
    pub fn new(year: i32, month: u32) -> Option<Self> {
        if (1..=12).contains(&month) && (1900..=9999).contains(&year) {
            Some(Self { year, month })
        } else {
            None
        }
    }

    /// Parse `YYYY-MM`.
    pub fn parse(s: &str) -> Option<Self> {
        let (year, month) = s.trim().split_once('-')?;
        Self::new(year.parse().ok()?, month.parse().ok()?)
    }

    pub fn of(date: NaiveDate) -> Self {
        Self {
            year: date.year(),
            month: date.month(),
        }
    }

    pub fn first_day(&self) -> NaiveDate {
        // Constructor guarantees a valid month.
        NaiveDate::from_ymd_opt(self.year, self.month, 1).unwrap_or(NaiveDate::MIN)
    }

    pub fn last_day(&self) -> NaiveDate {
        self.next().first_day().pred_opt().unwrap_or(NaiveDate::MAX)
    }

    pub fn next(&self) -> Self {
        self.add_months(1)
    }

    pub fn prev(&self) -> Self {
        self.add_months(-1)
    }

    pub fn add_months(&self, delta: i32) -> Self {
        let index = self.year * 12 + self.month as i32 - 1 + delta;
        Self {
            year: index.div_euclid(12),
            month: index.rem_euclid(12) as u32 + 1,
        }
    }
}

impl fmt::Display for YearMonth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}
