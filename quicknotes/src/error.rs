//! Error types for QuickNotes
//!
//! All errors use thiserror for structured error handling.
//! These errors can be serialized for whatever surface hosts the engine.

use thiserror::Error;

/// Rejected user input. Raised before any write, so the store is unchanged.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Title cannot be empty")]
    BlankTitle,

    #[error("A note titled \"{0}\" already exists")]
    DuplicateTitle(String),
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Note not found: {0}")]
    NoteNotFound(i64),

    #[error("Remote unavailable: {0}")]
    RemoteUnavailable(String),

    #[error("Credential error: {0}")]
    Credential(String),

    #[error("Authentication error: {0}")]
    Auth(String),

    #[error("Not configured: {0}")]
    NotConfigured(String),
}

impl AppError {
    pub fn is_validation(&self) -> bool {
        matches!(self, AppError::Validation(_))
    }

    /// Failures reaching the remote work item system.
    pub fn is_remote(&self) -> bool {
        matches!(
            self,
            AppError::RemoteUnavailable(_) | AppError::Http(_) | AppError::Auth(_)
        )
    }

    /// Failures of the local persistence layer itself.
    pub fn is_storage(&self) -> bool {
        matches!(self, AppError::Database(_) | AppError::Io(_))
    }
}

impl serde::Serialize for AppError {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        let err: AppError = ValidationError::BlankTitle.into();
        assert!(err.is_validation());
        assert!(!err.is_remote());

        let err = AppError::RemoteUnavailable("timeout".to_string());
        assert!(err.is_remote());
        assert!(!err.is_storage());

        let err: AppError = sqlx::Error::RowNotFound.into();
        assert!(err.is_storage());
    }

    #[test]
    fn test_error_serializes_as_message() {
        let err: AppError = ValidationError::DuplicateTitle("Sprint Plan".to_string()).into();
        let json = serde_json::to_string(&err).unwrap();
        assert_eq!(
            json,
            r#""Validation error: A note titled \"Sprint Plan\" already exists""#
        );
    }
}
