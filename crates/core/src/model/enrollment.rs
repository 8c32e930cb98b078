use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

use crate::error::{EnrollmentError, ReconcileError};
use crate::model::ids::{CourseId, EnrollmentId, UserId};
use crate::model::item::{ContentKind, ItemProgress};

/// Version stamped on a freshly created enrollment.
pub const INITIAL_VERSION: u64 = 1;

//
// ─── PROGRESS SCHEME ───────────────────────────────────────────────────────────
//

/// Which progress model an enrollment follows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchemeKind {
    NotStarted,
    ItemBased,
    ChapterBased,
}

impl SchemeKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            SchemeKind::NotStarted => "not_started",
            SchemeKind::ItemBased => "item_based",
            SchemeKind::ChapterBased => "chapter_based",
        }
    }
}

impl fmt::Display for SchemeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Legacy per-chapter quiz result, keyed by `chapter_index`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuizResult {
    pub chapter_index: u32,
    pub score: u32,
    pub passed: bool,
    pub taken_at: DateTime<Utc>,
}

/// Progress state of an enrollment.
///
/// A fresh enrollment is `NotStarted` and adopts a scheme with its first
/// progress event. Item-based and chapter-based tracking never coexist on
/// one record.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "scheme", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ProgressScheme {
    #[default]
    NotStarted,
    ItemBased {
        last_visited_content: u32,
        items_progress: Vec<ItemProgress>,
    },
    ChapterBased {
        last_visited_chapter: u32,
        quiz_results: Vec<QuizResult>,
    },
}

impl ProgressScheme {
    #[must_use]
    pub fn kind(&self) -> SchemeKind {
        match self {
            ProgressScheme::NotStarted => SchemeKind::NotStarted,
            ProgressScheme::ItemBased { .. } => SchemeKind::ItemBased,
            ProgressScheme::ChapterBased { .. } => SchemeKind::ChapterBased,
        }
    }

    /// Item tracking state, adopting the item-based scheme if nothing was tracked yet.
    pub(crate) fn item_tracking_mut(
        &mut self,
    ) -> Result<(&mut u32, &mut Vec<ItemProgress>), ReconcileError> {
        if matches!(self, ProgressScheme::NotStarted) {
            *self = ProgressScheme::ItemBased {
                last_visited_content: 0,
                items_progress: Vec::new(),
            };
        }
        match self {
            ProgressScheme::ItemBased {
                last_visited_content,
                items_progress,
            } => Ok((last_visited_content, items_progress)),
            other => Err(ReconcileError::SchemeMismatch {
                actual: other.kind(),
                requested: SchemeKind::ItemBased,
            }),
        }
    }

    /// Chapter tracking state, adopting the chapter-based scheme if nothing was tracked yet.
    pub(crate) fn chapter_tracking_mut(
        &mut self,
    ) -> Result<(&mut u32, &mut Vec<QuizResult>), ReconcileError> {
        if matches!(self, ProgressScheme::NotStarted) {
            *self = ProgressScheme::ChapterBased {
                last_visited_chapter: 0,
                quiz_results: Vec::new(),
            };
        }
        match self {
            ProgressScheme::ChapterBased {
                last_visited_chapter,
                quiz_results,
            } => Ok((last_visited_chapter, quiz_results)),
            other => Err(ReconcileError::SchemeMismatch {
                actual: other.kind(),
                requested: SchemeKind::ChapterBased,
            }),
        }
    }

    fn validate(&self) -> Result<(), EnrollmentError> {
        match self {
            ProgressScheme::NotStarted => Ok(()),
            ProgressScheme::ItemBased { items_progress, .. } => {
                let mut seen = HashSet::with_capacity(items_progress.len());
                for item in items_progress {
                    if !seen.insert(item.key()) {
                        return Err(EnrollmentError::InvalidPersistedState(format!(
                            "duplicate item progress for index {} ({})",
                            item.item_index,
                            item.kind()
                        )));
                    }
                }
                Ok(())
            }
            ProgressScheme::ChapterBased { quiz_results, .. } => {
                let mut seen = HashSet::with_capacity(quiz_results.len());
                for result in quiz_results {
                    if !seen.insert(result.chapter_index) {
                        return Err(EnrollmentError::InvalidPersistedState(format!(
                            "duplicate quiz result for chapter {}",
                            result.chapter_index
                        )));
                    }
                }
                Ok(())
            }
        }
    }
}

//
// ─── PERSISTED SHAPE ───────────────────────────────────────────────────────────
//

/// Raw enrollment fields as read back from storage or JSON.
///
/// Convert with `Enrollment::from_persisted`, which checks the invariants
/// the reconciler relies on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedEnrollment {
    pub id: EnrollmentId,
    pub user_id: UserId,
    pub course_id: CourseId,
    pub progress: u8,
    pub completed: bool,
    pub completed_at: Option<DateTime<Utc>>,
    pub certificate_issued: bool,
    pub certificate_id: Option<String>,
    pub time_spent: u32,
    #[serde(flatten)]
    pub scheme: ProgressScheme,
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

//
// ─── ENROLLMENT ────────────────────────────────────────────────────────────────
//

/// The record tying one user to one course, holding all progress state.
///
/// `progress`, `completed` and `completed_at` are derived by the reconciler
/// and cannot be set directly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", try_from = "PersistedEnrollment")]
pub struct Enrollment {
    pub(crate) id: EnrollmentId,
    pub(crate) user_id: UserId,
    pub(crate) course_id: CourseId,
    pub(crate) progress: u8,
    pub(crate) completed: bool,
    pub(crate) completed_at: Option<DateTime<Utc>>,
    pub(crate) certificate_issued: bool,
    pub(crate) certificate_id: Option<String>,
    pub(crate) time_spent: u32,
    #[serde(flatten)]
    pub(crate) scheme: ProgressScheme,
    pub(crate) version: u64,
    pub(crate) created_at: DateTime<Utc>,
    pub(crate) updated_at: DateTime<Utc>,
}

impl Enrollment {
    /// Creates a fresh enrollment with all counters zeroed.
    #[must_use]
    pub fn new(
        id: EnrollmentId,
        user_id: UserId,
        course_id: CourseId,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            user_id,
            course_id,
            progress: 0,
            completed: false,
            completed_at: None,
            certificate_issued: false,
            certificate_id: None,
            time_spent: 0,
            scheme: ProgressScheme::NotStarted,
            version: INITIAL_VERSION,
            created_at,
            updated_at: created_at,
        }
    }

    /// Rehydrate an enrollment from persisted storage.
    ///
    /// # Errors
    ///
    /// Returns `EnrollmentError::InvalidPersistedState` when the record breaks
    /// an invariant (progress out of range, completion without 100%, duplicate
    /// item keys, version zero).
    pub fn from_persisted(record: PersistedEnrollment) -> Result<Self, EnrollmentError> {
        if record.progress > 100 {
            return Err(EnrollmentError::InvalidPersistedState(format!(
                "progress out of range: {}",
                record.progress
            )));
        }
        if record.completed && record.progress != 100 {
            return Err(EnrollmentError::InvalidPersistedState(
                "completed enrollment must have 100% progress".into(),
            ));
        }
        if record.completed && record.completed_at.is_none() {
            return Err(EnrollmentError::InvalidPersistedState(
                "completed enrollment is missing completed_at".into(),
            ));
        }
        if record.certificate_issued && record.certificate_id.is_none() {
            return Err(EnrollmentError::InvalidPersistedState(
                "issued certificate is missing its id".into(),
            ));
        }
        if record.version < INITIAL_VERSION {
            return Err(EnrollmentError::InvalidPersistedState(
                "version must be at least 1".into(),
            ));
        }
        record.scheme.validate()?;

        Ok(Self {
            id: record.id,
            user_id: record.user_id,
            course_id: record.course_id,
            progress: record.progress,
            completed: record.completed,
            completed_at: record.completed_at,
            certificate_issued: record.certificate_issued,
            certificate_id: record.certificate_id,
            time_spent: record.time_spent,
            scheme: record.scheme,
            version: record.version,
            created_at: record.created_at,
            updated_at: record.updated_at,
        })
    }

    /// Returns the same record stamped with a new version.
    ///
    /// Storage adapters call this after a successful compare-and-swap.
    #[must_use]
    pub fn with_version(mut self, version: u64) -> Self {
        self.version = version;
        self
    }

    #[must_use]
    pub fn id(&self) -> EnrollmentId {
        self.id
    }

    #[must_use]
    pub fn user_id(&self) -> &UserId {
        &self.user_id
    }

    #[must_use]
    pub fn course_id(&self) -> &CourseId {
        &self.course_id
    }

    /// Completion percentage in `0..=100`.
    #[must_use]
    pub fn progress(&self) -> u8 {
        self.progress
    }

    #[must_use]
    pub fn completed(&self) -> bool {
        self.completed
    }

    /// Time of the first transition to completed; kept if progress later regresses.
    #[must_use]
    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }

    #[must_use]
    pub fn certificate_issued(&self) -> bool {
        self.certificate_issued
    }

    #[must_use]
    pub fn certificate_id(&self) -> Option<&str> {
        self.certificate_id.as_deref()
    }

    /// Cumulative minutes spent in the course.
    #[must_use]
    pub fn time_spent(&self) -> u32 {
        self.time_spent
    }

    #[must_use]
    pub fn scheme(&self) -> &ProgressScheme {
        &self.scheme
    }

    #[must_use]
    pub fn scheme_kind(&self) -> SchemeKind {
        self.scheme.kind()
    }

    /// Item progress entries; empty unless the enrollment is item-based.
    #[must_use]
    pub fn items_progress(&self) -> &[ItemProgress] {
        match &self.scheme {
            ProgressScheme::ItemBased { items_progress, .. } => items_progress,
            _ => &[],
        }
    }

    #[must_use]
    pub fn item(&self, item_index: u32, kind: ContentKind) -> Option<&ItemProgress> {
        self.items_progress()
            .iter()
            .find(|item| item.matches(item_index, kind))
    }

    #[must_use]
    pub fn completed_items(&self) -> usize {
        self.items_progress()
            .iter()
            .filter(|item| item.completed)
            .count()
    }

    #[must_use]
    pub fn last_visited_content(&self) -> u32 {
        match &self.scheme {
            ProgressScheme::ItemBased {
                last_visited_content,
                ..
            } => *last_visited_content,
            _ => 0,
        }
    }

    #[must_use]
    pub fn last_visited_chapter(&self) -> u32 {
        match &self.scheme {
            ProgressScheme::ChapterBased {
                last_visited_chapter,
                ..
            } => *last_visited_chapter,
            _ => 0,
        }
    }

    /// Legacy quiz results; empty unless the enrollment is chapter-based.
    #[must_use]
    pub fn quiz_results(&self) -> &[QuizResult] {
        match &self.scheme {
            ProgressScheme::ChapterBased { quiz_results, .. } => quiz_results,
            _ => &[],
        }
    }

    /// Optimistic-concurrency token; bumped by every successful save.
    #[must_use]
    pub fn version(&self) -> u64 {
        self.version
    }

    #[must_use]
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    #[must_use]
    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// Couple `completed` to `progress`. The first `completed_at` is never overwritten.
    pub(crate) fn settle_completion(&mut self, now: DateTime<Utc>) {
        if self.progress >= 100 {
            if self.completed_at.is_none() {
                self.completed_at = Some(now);
            }
            self.completed = true;
        } else {
            self.completed = false;
        }
    }

    pub(crate) fn touch(&mut self, now: DateTime<Utc>) {
        self.updated_at = now;
    }
}

impl TryFrom<PersistedEnrollment> for Enrollment {
    type Error = EnrollmentError;

    fn try_from(record: PersistedEnrollment) -> Result<Self, Self::Error> {
        Self::from_persisted(record)
    }
}

//
// ─── TESTS ─────────────────────────────────────────────────────────────────────
//

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::item::ItemDetail;
    use crate::time::fixed_now;

    fn persisted() -> PersistedEnrollment {
        PersistedEnrollment {
            id: EnrollmentId::new(7),
            user_id: UserId::new("u1").unwrap(),
            course_id: CourseId::new("c1").unwrap(),
            progress: 0,
            completed: false,
            completed_at: None,
            certificate_issued: false,
            certificate_id: None,
            time_spent: 0,
            scheme: ProgressScheme::NotStarted,
            version: 3,
            created_at: fixed_now(),
            updated_at: fixed_now(),
        }
    }

    fn chapter(index: u32) -> ItemProgress {
        ItemProgress {
            item_index: index,
            completed: false,
            completed_at: None,
            detail: ItemDetail::Chapter {
                watched_seconds: 0,
                total_seconds: 0,
            },
        }
    }

    #[test]
    fn new_enrollment_starts_zeroed() {
        let enrollment = Enrollment::new(
            EnrollmentId::new(1),
            UserId::new("u1").unwrap(),
            CourseId::new("c1").unwrap(),
            fixed_now(),
        );

        assert_eq!(enrollment.progress(), 0);
        assert!(!enrollment.completed());
        assert_eq!(enrollment.completed_at(), None);
        assert_eq!(enrollment.time_spent(), 0);
        assert_eq!(enrollment.last_visited_content(), 0);
        assert!(enrollment.items_progress().is_empty());
        assert_eq!(enrollment.scheme_kind(), SchemeKind::NotStarted);
        assert_eq!(enrollment.version(), INITIAL_VERSION);
    }

    #[test]
    fn from_persisted_rejects_completion_without_full_progress() {
        let mut record = persisted();
        record.completed = true;
        record.completed_at = Some(fixed_now());
        record.progress = 75;

        let err = Enrollment::from_persisted(record).unwrap_err();
        assert!(matches!(err, EnrollmentError::InvalidPersistedState(_)));
    }

    #[test]
    fn from_persisted_rejects_duplicate_item_keys() {
        let mut record = persisted();
        record.scheme = ProgressScheme::ItemBased {
            last_visited_content: 1,
            items_progress: vec![chapter(1), chapter(1)],
        };

        assert!(Enrollment::from_persisted(record).is_err());
    }

    #[test]
    fn from_persisted_allows_same_index_with_different_kinds() {
        let mut record = persisted();
        let mut quiz = chapter(1);
        quiz.detail = ItemDetail::Quiz {
            score: 0,
            passed: false,
            attempts: 1,
        };
        record.scheme = ProgressScheme::ItemBased {
            last_visited_content: 1,
            items_progress: vec![chapter(1), quiz],
        };

        let enrollment = Enrollment::from_persisted(record).unwrap();
        assert_eq!(enrollment.items_progress().len(), 2);
        assert!(enrollment.item(1, ContentKind::Quiz).is_some());
    }

    #[test]
    fn serializes_to_flat_camel_case_shape() {
        let mut record = persisted();
        record.scheme = ProgressScheme::ItemBased {
            last_visited_content: 1,
            items_progress: vec![chapter(1)],
        };
        let enrollment = Enrollment::from_persisted(record).unwrap();

        let json = serde_json::to_value(&enrollment).unwrap();
        assert_eq!(json["userId"], "u1");
        assert_eq!(json["courseId"], "c1");
        assert_eq!(json["scheme"], "item_based");
        assert_eq!(json["lastVisitedContent"], 1);
        assert_eq!(json["itemsProgress"][0]["type"], "chapter");
        assert_eq!(json["timeSpent"], 0);

        let back: Enrollment = serde_json::from_value(json).unwrap();
        assert_eq!(back, enrollment);
    }

    #[test]
    fn deserializing_an_invalid_record_fails() {
        let mut record = persisted();
        record.progress = 140;
        let json = serde_json::to_value(&record).unwrap();

        assert!(serde_json::from_value::<Enrollment>(json).is_err());
    }
}
