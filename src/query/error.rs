use std::fmt;

use crate::messages::constants::sqlstate;
use crate::messages::{PgErrorMsg, Severity};

/// Error returned by query and statement handlers. Reported to the client as
/// an ErrorResponse; the connection stays usable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryError {
    code: String,
    message: String,
    detail: Option<String>,
    hint: Option<String>,
}

impl QueryError {
    pub fn new(code: &str, message: impl Into<String>) -> QueryError {
        QueryError {
            code: code.to_string(),
            message: message.into(),
            detail: None,
            hint: None,
        }
    }

    /// An error without a more specific SQLSTATE.
    pub fn internal(message: impl Into<String>) -> QueryError {
        QueryError::new(sqlstate::INTERNAL_ERROR, message)
    }

    /// The query was cancelled. Handlers return this once they notice
    /// `QueryContext::cancelled`.
    pub fn canceled() -> QueryError {
        QueryError::new(
            sqlstate::QUERY_CANCELED,
            "canceling statement due to user request",
        )
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> QueryError {
        self.detail = Some(detail.into());
        self
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> QueryError {
        self.hint = Some(hint.into());
        self
    }

    pub fn is_canceled(&self) -> bool {
        self.code == sqlstate::QUERY_CANCELED
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn to_pg_error(&self) -> PgErrorMsg {
        PgErrorMsg {
            severity: Severity::Error,
            code: self.code.clone(),
            message: self.message.clone(),
            detail: self.detail.clone(),
            hint: self.hint.clone(),
        }
    }
}

impl fmt::Display for QueryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (SQLSTATE {})", self.message, self.code)
    }
}

impl std::error::Error for QueryError {}

impl From<std::io::Error> for QueryError {
    fn from(err: std::io::Error) -> Self {
        QueryError::internal(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canceled() {
        let err = QueryError::canceled();
        assert!(err.is_canceled());
        assert_eq!(err.code(), "57014");
        assert!(!QueryError::internal("boom").is_canceled());
    }

    #[test]
    fn test_to_pg_error() {
        let err = QueryError::new("22012", "division by zero").with_hint("check input");
        let pg = err.to_pg_error();
        assert_eq!(pg.severity, Severity::Error);
        assert_eq!(pg.code, "22012");
        assert_eq!(pg.hint.as_deref(), Some("check input"));
        assert_eq!(err.to_string(), "division by zero (SQLSTATE 22012)");
    }
}
