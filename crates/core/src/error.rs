use thiserror::Error;

use crate::model::SchemeKind;

/// Errors raised while parsing or validating identifiers.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum IdError {
    #[error("{kind} cannot be empty")]
    Empty { kind: &'static str },

    #[error("failed to parse {kind} from string")]
    Parse { kind: &'static str },
}

/// Errors returned by the progress reconciler.
///
/// The reconciler never mutates its input, so any of these leaves the
/// caller's enrollment exactly as it was.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ReconcileError {
    #[error("user is not enrolled in this course")]
    NotEnrolled,

    #[error("invalid content reference: {reason}")]
    InvalidContentReference { reason: String },

    #[error("enrollment tracks {actual} progress, cannot apply a {requested} update")]
    SchemeMismatch {
        actual: SchemeKind,
        requested: SchemeKind,
    },

    #[error("enrollment is not completed")]
    NotCompleted,
}

impl ReconcileError {
    pub(crate) fn invalid_content(reason: impl Into<String>) -> Self {
        Self::InvalidContentReference {
            reason: reason.into(),
        }
    }
}

/// Errors raised when rehydrating an enrollment that violates its invariants.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum EnrollmentError {
    #[error("invalid persisted enrollment: {0}")]
    InvalidPersistedState(String),
}
