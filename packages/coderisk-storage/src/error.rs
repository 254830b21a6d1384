//! Error types for coderisk-storage.

use std::fmt;

use thiserror::Error;

/// Storage error kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Database,
    Serialization,
    RepositoryNotFound,
    CommitNotFound,
    FileNotFound,
    BlockNotFound,
    /// Force-push detected, duplicate canonical path — §7 Integrity violation.
    Integrity,
    Transaction,
    Config,
    Io,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Database => "database",
            ErrorKind::Serialization => "serialization",
            ErrorKind::RepositoryNotFound => "repository_not_found",
            ErrorKind::CommitNotFound => "commit_not_found",
            ErrorKind::FileNotFound => "file_not_found",
            ErrorKind::BlockNotFound => "block_not_found",
            ErrorKind::Integrity => "integrity",
            ErrorKind::Transaction => "transaction",
            ErrorKind::Config => "config",
            ErrorKind::Io => "io",
        }
    }

    /// Maps onto the cross-cutting taxonomy of §7 so callers that only
    /// know `coderisk_core::ErrorKind` can still decide propagation policy.
    pub fn core_kind(&self) -> coderisk_core::ErrorKind {
        match self {
            ErrorKind::Database | ErrorKind::Transaction | ErrorKind::Io => {
                coderisk_core::ErrorKind::TransientExternal
            }
            ErrorKind::Integrity => coderisk_core::ErrorKind::IntegrityViolation,
            ErrorKind::RepositoryNotFound
            | ErrorKind::CommitNotFound
            | ErrorKind::FileNotFound
            | ErrorKind::BlockNotFound => coderisk_core::ErrorKind::MissingData,
            ErrorKind::Serialization => coderisk_core::ErrorKind::Configuration,
            ErrorKind::Config => coderisk_core::ErrorKind::Configuration,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Error)]
#[error("[{kind}] {message}")]
pub struct StorageError {
    #[source]
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
    pub kind: ErrorKind,
    pub message: String,
}

impl StorageError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            source: None,
        }
    }

    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    pub fn database(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Database, message)
    }

    pub fn serialization(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Serialization, message)
    }

    pub fn repository_not_found(repo_id: impl Into<String>) -> Self {
        Self::new(ErrorKind::RepositoryNotFound, format!("repository not found: {}", repo_id.into()))
    }

    pub fn commit_not_found(sha: impl Into<String>) -> Self {
        Self::new(ErrorKind::CommitNotFound, format!("commit not found: {}", sha.into()))
    }

    pub fn integrity(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Integrity, message)
    }

    pub fn transaction(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Transaction, message)
    }
}

#[cfg(feature = "sql")]
impl From<sqlx::Error> for StorageError {
    fn from(err: sqlx::Error) -> Self {
        StorageError::database(format!("sql error: {err}")).with_source(err)
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::serialization(format!("json error: {err}")).with_source(err)
    }
}

pub type Result<T> = std::result::Result<T, StorageError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;

    #[test]
    fn display_is_bracketed_kind_plus_message() {
        let err = StorageError::database("connection failed");
        assert_eq!(format!("{err}"), "[database] connection failed");
    }

    #[test]
    fn with_source_chains_through_std_error_source() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err = StorageError::database("db file missing").with_source(io_err);
        assert!(err.source().unwrap().to_string().contains("missing"));
    }

    #[test]
    fn repository_not_found_maps_to_missing_data() {
        assert_eq!(ErrorKind::RepositoryNotFound.core_kind(), coderisk_core::ErrorKind::MissingData);
    }

    #[test]
    fn integrity_maps_to_integrity_violation() {
        assert_eq!(ErrorKind::Integrity.core_kind(), coderisk_core::ErrorKind::IntegrityViolation);
    }

    #[test]
    fn from_serde_json_error_is_serialization_kind() {
        let json_err = serde_json::from_str::<serde_json::Value>("not json").unwrap_err();
        let err: StorageError = json_err.into();
        assert_eq!(err.kind, ErrorKind::Serialization);
    }
}
