//! Cross-cutting error taxonomy shared by every CodeRisk crate.
//!
//! This is a taxonomy, not a type hierarchy: each crate keeps its own
//! `thiserror`-derived error enum for its own operations, and tags each
//! variant with one of these seven kinds so that propagation policy
//! (retry vs. degrade vs. abort) can be decided uniformly at call sites
//! that don't otherwise know which crate raised the error.

use std::fmt;

/// The seven error kinds of the CodeRisk error handling design.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// GitHub 5xx, LLM 5xx, network failures. Retried with bounded backoff
    /// at the call site; surfaced only after retries exhaust.
    TransientExternal,
    /// GitHub rate limit, LLM RPM/TPM at 90%, provider 429. Carries
    /// seconds-to-wait. Daily quota exhaustion is terminal for the run.
    Quota,
    /// LLM output that fails source-text validation. Confidence is
    /// degraded, never raised as a hard error.
    ValidationFailure,
    /// Force-push detected, duplicate canonical path. Aborts the
    /// affected repository's ingestion.
    IntegrityViolation,
    /// Block or file requested that is unknown to the graph. Callers
    /// return zero-valued metrics and escalate rather than raise.
    MissingData,
    /// No LLM key when Phase 2 is enabled, or similarly malformed
    /// deployment input. Degrades the affected subsystem, not the run.
    Configuration,
    /// Cache read/write failure. Always log-and-bypass.
    Cache,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::TransientExternal => "transient_external",
            ErrorKind::Quota => "quota",
            ErrorKind::ValidationFailure => "validation_failure",
            ErrorKind::IntegrityViolation => "integrity_violation",
            ErrorKind::MissingData => "missing_data",
            ErrorKind::Configuration => "configuration",
            ErrorKind::Cache => "cache",
        }
    }

    /// Whether a caller should retry at all. Quota and transient errors
    /// are retryable; the rest are decisions, not failures to recover from.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorKind::TransientExternal | ErrorKind::Quota)
    }

    /// Whether this kind aborts the whole repository's ingestion run
    /// rather than just the current record/batch.
    pub fn aborts_ingestion(&self) -> bool {
        matches!(self, ErrorKind::IntegrityViolation)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for ErrorKind {
    type Err = ParseErrorKindError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "transient_external" => Ok(ErrorKind::TransientExternal),
            "quota" => Ok(ErrorKind::Quota),
            "validation_failure" => Ok(ErrorKind::ValidationFailure),
            "integrity_violation" => Ok(ErrorKind::IntegrityViolation),
            "missing_data" => Ok(ErrorKind::MissingData),
            "configuration" => Ok(ErrorKind::Configuration),
            "cache" => Ok(ErrorKind::Cache),
            other => Err(ParseErrorKindError(other.to_string())),
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown error kind: {0}")]
pub struct ParseErrorKindError(String);

/// A boxed error carrying one of the seven kinds, used where a crate needs
/// to pass an error across a boundary without adopting another crate's
/// full error enum.
#[derive(Debug, thiserror::Error)]
#[error("[{kind}] {message}")]
pub struct CoreError {
    pub kind: ErrorKind,
    pub message: String,
    #[source]
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl CoreError {
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
}

pub type Result<T> = std::result::Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn round_trips_every_kind() {
        let kinds = [
            ErrorKind::TransientExternal,
            ErrorKind::Quota,
            ErrorKind::ValidationFailure,
            ErrorKind::IntegrityViolation,
            ErrorKind::MissingData,
            ErrorKind::Configuration,
            ErrorKind::Cache,
        ];
        for kind in kinds {
            let s = kind.as_str();
            assert_eq!(ErrorKind::from_str(s).unwrap(), kind);
        }
    }

    #[test]
    fn rejects_unknown_kind() {
        assert!(ErrorKind::from_str("nonsense").is_err());
    }

    #[test]
    fn quota_and_transient_are_retryable() {
        assert!(ErrorKind::Quota.is_retryable());
        assert!(ErrorKind::TransientExternal.is_retryable());
        assert!(!ErrorKind::MissingData.is_retryable());
    }

    #[test]
    fn only_integrity_violation_aborts_ingestion() {
        assert!(ErrorKind::IntegrityViolation.aborts_ingestion());
        assert!(!ErrorKind::Quota.aborts_ingestion());
        assert!(!ErrorKind::ValidationFailure.aborts_ingestion());
    }

    #[test]
    fn display_matches_as_str() {
        let err = CoreError::new(ErrorKind::Cache, "redis unreachable");
        assert_eq!(format!("{}", err), "[cache] redis unreachable");
    }
}
