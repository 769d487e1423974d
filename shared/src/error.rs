//! Error types for Schichtplan Lambda functions.

use thiserror::Error;

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in Schichtplan Lambda functions.
#[derive(Error, Debug)]
pub enum Error {
    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// AWS SDK error
    #[error("AWS error: {0}")]
    Aws(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Validation error
    #[error("Validation error: {0}")]
    Validation(String),

    /// Authentication error (missing, unknown or expired session)
    #[error("Authentication error: {0}")]
    Auth(String),

    /// The caller is authenticated but lacks the required role or capability
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Not found error
    #[error("Not found: {0}")]
    NotFound(String),

    /// Conflicting write, e.g. a recently claimed shift position
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Get HTTP status code for this error.
    pub fn status_code(&self) -> u16 {
        match self {
            Error::Validation(_) => 400,
            Error::Auth(_) => 401,
            Error::Forbidden(_) => 403,
            Error::NotFound(_) => 404,
            Error::Conflict(_) => 409,
            _ => 500,
        }
    }

    /// Message safe to hand back to the client.
    ///
    /// Server-side failures are reported generically; their details only go to the log.
    pub fn public_message(&self) -> String {
        match self {
            Error::Validation(m)
            | Error::Auth(m)
            | Error::Forbidden(m)
            | Error::NotFound(m)
            | Error::Conflict(m) => m.clone(),
            _ => "Internal server error".to_string(),
        }
    }

    /// Map a unique-constraint violation to `Conflict`, leaving other errors untouched.
    pub fn on_unique_violation(err: sqlx::Error, message: impl Into<String>) -> Self {
        match &err {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                Error::Conflict(message.into())
            }
            _ => Error::Database(err),
        }
    }

    /// Map a check-constraint violation to `Validation`, leaving other errors untouched.
    pub fn on_check_violation(err: sqlx::Error, message: impl Into<String>) -> Self {
        match &err {
            sqlx::Error::Database(db) if db.is_check_violation() => {
                Error::Validation(message.into())
            }
            _ => Error::Database(err),
        }
    }
}

impl From<validator::ValidationErrors> for Error {
    fn from(errors: validator::ValidationErrors) -> Self {
        Error::Validation(errors.to_string())
    }
}

impl From<bcrypt::BcryptError> for Error {
    fn from(err: bcrypt::BcryptError) -> Self {
        Error::Internal(format!("Password hashing failed: {}", err))
    }
}

impl From<lambda_http::http::Error> for Error {
    fn from(err: lambda_http::http::Error) -> Self {
        Error::Internal(format!("Failed to build response: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::error::{DatabaseError, ErrorKind};
    use std::fmt;

    #[derive(Debug)]
    struct ConstraintError(ErrorKind);

    impl fmt::Display for ConstraintError {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "constraint violated")
        }
    }

    impl std::error::Error for ConstraintError {}

    impl DatabaseError for ConstraintError {
        fn message(&self) -> &str {
            "constraint violated"
        }

        fn as_error(&self) -> &(dyn std::error::Error + Send + Sync + 'static) {
            self
        }

        fn as_error_mut(&mut self) -> &mut (dyn std::error::Error + Send + Sync + 'static) {
            self
        }

        fn into_error(self: Box<Self>) -> Box<dyn std::error::Error + Send + Sync + 'static> {
            self
        }

        fn kind(&self) -> ErrorKind {
            match self.0 {
                ErrorKind::UniqueViolation => ErrorKind::UniqueViolation,
                ErrorKind::CheckViolation => ErrorKind::CheckViolation,
                _ => ErrorKind::Other,
            }
        }
    }

    fn violation(kind: ErrorKind) -> sqlx::Error {
        sqlx::Error::Database(Box::new(ConstraintError(kind)))
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(Error::Validation("x".into()).status_code(), 400);
        assert_eq!(Error::Auth("x".into()).status_code(), 401);
        assert_eq!(Error::Forbidden("x".into()).status_code(), 403);
        assert_eq!(Error::NotFound("x".into()).status_code(), 404);
        assert_eq!(Error::Conflict("x".into()).status_code(), 409);
        assert_eq!(Error::Config("x".into()).status_code(), 500);
    }

    #[test]
    fn test_internal_details_are_hidden() {
        let err = Error::Internal("connection string leaked".into());
        assert_eq!(err.public_message(), "Internal server error");

        let err = Error::Conflict("Position was claimed recently".into());
        assert_eq!(err.public_message(), "Position was claimed recently");
    }

    #[test]
    fn test_non_unique_errors_stay_database_errors() {
        let err = Error::on_unique_violation(sqlx::Error::RowNotFound, "duplicate");
        assert!(matches!(err, Error::Database(_)));
    }

    #[test]
    fn test_constraint_violations_map_to_client_errors() {
        let err = Error::on_unique_violation(violation(ErrorKind::UniqueViolation), "taken");
        assert_eq!(err.status_code(), 409);

        let err = Error::on_check_violation(violation(ErrorKind::CheckViolation), "both positions");
        assert_eq!(err.status_code(), 400);
        assert_eq!(err.public_message(), "both positions");

        let err = Error::on_check_violation(violation(ErrorKind::UniqueViolation), "both positions");
        assert!(matches!(err, Error::Database(_)));
        let err = Error::on_check_violation(sqlx::Error::RowNotFound, "both positions");
        assert!(matches!(err, Error::Database(_)));
    }
}
