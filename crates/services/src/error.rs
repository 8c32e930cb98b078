//! Shared error types for the services crate.

use thiserror::Error;

use course_core::ReconcileError;
use course_core::model::{CourseId, SchemeKind};
use storage::repository::StorageError;
use storage::sqlite::SqliteInitError;

/// Errors emitted by `EnrollmentService`.
///
/// Every variant maps to a stable `reason_code` that callers can hand to
/// clients as a rejection reason.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum EnrollmentServiceError {
    #[error("user is already enrolled in this course")]
    DuplicateEnrollment,
    #[error("user is not enrolled in this course")]
    NotEnrolled,
    #[error("enrollment not found")]
    NotFound,
    #[error("invalid content reference: {reason}")]
    InvalidContentReference { reason: String },
    #[error("unknown course: {course_id}")]
    InvalidCourseReference { course_id: CourseId },
    #[error("enrollment tracks {actual} progress, cannot apply a {requested} update")]
    SchemeMismatch {
        actual: SchemeKind,
        requested: SchemeKind,
    },
    #[error("enrollment is not completed")]
    NotCompleted,
    #[error("enrollment kept changing; gave up after {attempts} attempts")]
    Conflict { attempts: u32 },
    #[error(transparent)]
    Rejected(ReconcileError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl EnrollmentServiceError {
    #[must_use]
    pub fn reason_code(&self) -> &'static str {
        match self {
            Self::DuplicateEnrollment => "duplicate_enrollment",
            Self::NotEnrolled => "not_enrolled",
            Self::NotFound => "not_found",
            Self::InvalidContentReference { .. } => "invalid_content_reference",
            Self::InvalidCourseReference { .. } => "invalid_course_reference",
            Self::SchemeMismatch { .. } => "scheme_mismatch",
            Self::NotCompleted => "not_completed",
            Self::Conflict { .. } => "conflict",
            Self::Rejected(_) => "rejected",
            Self::Storage(_) => "storage",
        }
    }
}

impl From<ReconcileError> for EnrollmentServiceError {
    fn from(err: ReconcileError) -> Self {
        match err {
            ReconcileError::NotEnrolled => Self::NotEnrolled,
            ReconcileError::InvalidContentReference { reason } => {
                Self::InvalidContentReference { reason }
            }
            ReconcileError::SchemeMismatch { actual, requested } => {
                Self::SchemeMismatch { actual, requested }
            }
            ReconcileError::NotCompleted => Self::NotCompleted,
            other => Self::Rejected(other),
        }
    }
}

/// Errors raised while reading service configuration.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ConfigError {
    #[error("{key} cannot be empty")]
    Empty { key: &'static str },
    #[error("invalid {key} value: {value}")]
    InvalidValue { key: &'static str, value: String },
}

/// Errors emitted while bootstrapping services.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ServicesInitError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Sqlite(#[from] SqliteInitError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reconcile_errors_keep_their_reason_codes() {
        let err: EnrollmentServiceError = ReconcileError::NotEnrolled.into();
        assert_eq!(err.reason_code(), "not_enrolled");

        let err: EnrollmentServiceError = ReconcileError::SchemeMismatch {
            actual: SchemeKind::ChapterBased,
            requested: SchemeKind::ItemBased,
        }
        .into();
        assert_eq!(err.reason_code(), "scheme_mismatch");

        let err: EnrollmentServiceError = ReconcileError::NotCompleted.into();
        assert_eq!(err.reason_code(), "not_completed");
    }
}
