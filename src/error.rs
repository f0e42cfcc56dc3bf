//! Error types for CQN compilation and execution.

use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Stable codes for execution errors, independent of the driver's wording.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    NotNullViolated,
    UniqueConstraintViolated,
    ForeignKeyViolated,
    CheckViolated,
    AssertionFailed,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::NotNullViolated => "NOT_NULL_VIOLATED",
            ErrorCode::UniqueConstraintViolated => "UNIQUE_CONSTRAINT_VIOLATED",
            ErrorCode::ForeignKeyViolated => "FOREIGN_KEY_VIOLATED",
            ErrorCode::CheckViolated => "CHECK_VIOLATED",
            ErrorCode::AssertionFailed => "ASSERTION_FAILED",
        }
    }

    /// Classify a driver error by SQLSTATE / SQLite extended code, falling
    /// back to the message text.
    pub fn classify(code: Option<&str>, message: &str) -> Option<ErrorCode> {
        match code {
            // PostgreSQL / HANA SQLSTATE
            Some("23502") => return Some(ErrorCode::NotNullViolated),
            Some("23505") => return Some(ErrorCode::UniqueConstraintViolated),
            Some("23503") => return Some(ErrorCode::ForeignKeyViolated),
            Some("23514") => return Some(ErrorCode::CheckViolated),
            // SQLite extended result codes
            Some("1299") => return Some(ErrorCode::NotNullViolated),
            Some("2067") | Some("1555") => return Some(ErrorCode::UniqueConstraintViolated),
            Some("787") => return Some(ErrorCode::ForeignKeyViolated),
            Some("275") => return Some(ErrorCode::CheckViolated),
            _ => {}
        }

        let lower = message.to_lowercase();
        if lower.contains("not null constraint") || lower.contains("violates not-null") {
            Some(ErrorCode::NotNullViolated)
        } else if lower.contains("unique constraint") || lower.contains("duplicate key") {
            Some(ErrorCode::UniqueConstraintViolated)
        } else if lower.contains("foreign key constraint") {
            Some(ErrorCode::ForeignKeyViolated)
        } else {
            None
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The main error type for CQN operations.
#[derive(Debug, Error)]
pub enum CqnError {
    /// Failed to parse a textual query or expression.
    #[error("Parse error at position {position}: {message}")]
    Parse { position: usize, message: String },

    /// Malformed CQN object.
    #[error("Invalid CQN: {0}")]
    InvalidQuery(String),

    /// Malformed CSN document.
    #[error("Invalid model: {0}")]
    InvalidModel(String),

    #[error("No such entity '{0}'")]
    NoSuchEntity(String),

    /// A path segment could not be resolved.
    #[error("No such element '{name}' in '{parent}'")]
    NoSuchElement { name: String, parent: String },

    /// Array-like elements and unmanaged associations cannot serve as foreign keys.
    #[error("'{element}' of association '{association}' in '{entity}' must not be foreign key: {reason}")]
    InvalidForeignKey {
        entity: String,
        association: String,
        element: String,
        reason: String,
    },

    #[error("Missing type for foreign key '{field}' of association '{member}' in '{entity}'")]
    MissingForeignKeyType {
        entity: String,
        member: String,
        field: String,
    },

    #[error("Unmanaged association '{association}' is not allowed in array-like element '{element}' of '{entity}'")]
    AssociationInArray {
        entity: String,
        element: String,
        association: String,
    },

    /// Association used where only foreign keys, `exists` or `expand` are allowed.
    #[error("Invalid path '{path}': {reason}")]
    InvalidPath { path: String, reason: String },

    /// Query shape the compiler or renderer refuses.
    #[error("Unsupported: {0}")]
    Unsupported(String),

    #[error("Unknown session variable '{0}'")]
    UnknownVariable(String),

    #[error("Missing argument for parameter '{0}'")]
    MissingArgument(String),

    /// Constraint violation normalized to a stable code.
    #[error("{code}: {message}")]
    Constraint { code: ErrorCode, message: String },

    #[error("{code}: {message} ({entity}.{element})")]
    Assertion {
        code: ErrorCode,
        entity: String,
        element: String,
        message: String,
    },

    /// Database error.
    #[error("Database error: {0}")]
    Database(String),

    /// Connection error.
    #[error("Connection error: {0}")]
    Connection(String),

    /// Pool acquisition timed out; `held` lists every outstanding lease.
    #[error(
        "Timed out after {waited:?} waiting for a connection, {} held:\n{}",
        .held.len(),
        .held.join("\n")
    )]
    PoolTimeout { waited: Duration, held: Vec<String> },

    #[error("Pool is closed")]
    PoolClosed,

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CqnError {
    /// Create a parse error at the given position.
    pub fn parse(position: usize, message: impl Into<String>) -> Self {
        Self::Parse {
            position,
            message: message.into(),
        }
    }

    pub fn invalid_path(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidPath {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub fn unsupported(message: impl Into<String>) -> Self {
        Self::Unsupported(message.into())
    }

    /// Wrap a driver error, normalizing constraint violations.
    pub fn database(code: Option<&str>, message: impl Into<String>) -> Self {
        let message = message.into();
        match ErrorCode::classify(code, &message) {
            Some(code) => Self::Constraint { code, message },
            None => Self::Database(message),
        }
    }

    /// The stable code, if this is a normalized execution error.
    pub fn code(&self) -> Option<ErrorCode> {
        match self {
            Self::Constraint { code, .. } | Self::Assertion { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// Model and query-shape errors; retrying them cannot succeed.
    pub fn is_compile_error(&self) -> bool {
        matches!(
            self,
            Self::Parse { .. }
                | Self::InvalidQuery(_)
                | Self::NoSuchEntity(_)
                | Self::NoSuchElement { .. }
                | Self::InvalidForeignKey { .. }
                | Self::MissingForeignKeyType { .. }
                | Self::AssociationInArray { .. }
                | Self::InvalidPath { .. }
                | Self::Unsupported(_)
        )
    }
}

/// Result type alias for CQN operations.
pub type CqnResult<T> = Result<T, CqnError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = CqnError::parse(5, "unexpected character");
        assert_eq!(
            err.to_string(),
            "Parse error at position 5: unexpected character"
        );
    }

    #[test]
    fn test_constraint_normalization() {
        let err = CqnError::database(Some("1299"), "NOT NULL constraint failed: Books.title");
        assert_eq!(err.code(), Some(ErrorCode::NotNullViolated));

        let err = CqnError::database(Some("23505"), "duplicate key value violates unique constraint");
        assert_eq!(err.code(), Some(ErrorCode::UniqueConstraintViolated));

        let err = CqnError::database(None, "NOT NULL constraint failed: Books.ID");
        assert_eq!(err.code(), Some(ErrorCode::NotNullViolated));

        let err = CqnError::database(None, "no such table: Foo");
        assert!(err.code().is_none());
        assert_eq!(err.to_string(), "Database error: no such table: Foo");
    }

    #[test]
    fn test_pool_timeout_lists_leases() {
        let err = CqnError::PoolTimeout {
            waited: Duration::from_millis(10),
            held: vec!["lease #1 acquired at src/a.rs:1:1".into()],
        };
        let text = err.to_string();
        assert!(text.contains("1 held"));
        assert!(text.contains("src/a.rs:1:1"));
    }
}
