//! Shared library for Schichtplan Lambda functions.
//!
//! This crate provides the session authentication, configuration, database
//! access, HTTP plumbing and calendar rules used across all Lambda functions.

pub mod auth;
pub mod calendar;
pub mod config;
pub mod db;
pub mod error;
pub mod http;
pub mod ical;
pub mod models;
pub mod secrets;
pub mod shift_lock;
pub mod state;
pub mod validation;

pub use auth::{authenticate, AuthenticatedUser};
pub use config::Config;
pub use error::{Error, Result};
pub use models::{Position, Role, ShiftType, YearMonth};
pub use state::AppState;

pub use validator;
