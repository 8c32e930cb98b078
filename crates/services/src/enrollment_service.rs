use std::sync::Arc;

use chrono::{DateTime, Utc};
use course_core::ReconcileError;
use course_core::model::{
    CourseId, Enrollment, EnrollmentId, ItemProgress, ItemProgressEvent, QuizResult,
    QuizSubmission, SchemeKind, UserId,
};
use course_core::reconcile;
use serde::Serialize;
use storage::repository::{EnrollmentRepository, NewEnrollmentRecord, Storage, StorageError};

use crate::Clock;
use crate::catalog::{CourseCatalog, CourseOutline};
use crate::config::{DEFAULT_MAX_SAVE_ATTEMPTS, ServiceConfig};
use crate::error::{EnrollmentServiceError, ServicesInitError};

//
// ─── PROGRESS VIEW ─────────────────────────────────────────────────────────────
//

/// Client-facing progress of one user in one course.
///
/// Users without an enrollment get `enrolled: false` and zeroed fields
/// instead of an error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressView {
    pub enrolled: bool,
    pub progress: u8,
    pub completed: bool,
    pub completed_at: Option<DateTime<Utc>>,
    pub scheme: SchemeKind,
    pub last_visited_content: u32,
    pub last_visited_chapter: u32,
    pub items_progress: Vec<ItemProgress>,
    pub quiz_results: Vec<QuizResult>,
    pub time_spent: u32,
    pub certificate_issued: bool,
    pub certificate_id: Option<String>,
}

impl ProgressView {
    #[must_use]
    pub fn not_enrolled() -> Self {
        Self {
            enrolled: false,
            progress: 0,
            completed: false,
            completed_at: None,
            scheme: SchemeKind::NotStarted,
            last_visited_content: 0,
            last_visited_chapter: 0,
            items_progress: Vec::new(),
            quiz_results: Vec::new(),
            time_spent: 0,
            certificate_issued: false,
            certificate_id: None,
        }
    }

    #[must_use]
    pub fn from_enrollment(enrollment: &Enrollment) -> Self {
        Self {
            enrolled: true,
            progress: enrollment.progress(),
            completed: enrollment.completed(),
            completed_at: enrollment.completed_at(),
            scheme: enrollment.scheme_kind(),
            last_visited_content: enrollment.last_visited_content(),
            last_visited_chapter: enrollment.last_visited_chapter(),
            items_progress: enrollment.items_progress().to_vec(),
            quiz_results: enrollment.quiz_results().to_vec(),
            time_spent: enrollment.time_spent(),
            certificate_issued: enrollment.certificate_issued(),
            certificate_id: enrollment.certificate_id().map(str::to_owned),
        }
    }
}

//
// ─── SERVICE ───────────────────────────────────────────────────────────────────
//

/// Orchestrates enrollment creation and progress updates.
///
/// Every update is a read, reconcile, compare-and-swap save cycle. A save that
/// loses a race is retried from a fresh read, so concurrent events for one
/// enrollment all land.
#[derive(Clone)]
pub struct EnrollmentService {
    clock: Clock,
    enrollments: Arc<dyn EnrollmentRepository>,
    catalog: Arc<dyn CourseCatalog>,
    max_save_attempts: u32,
}

impl EnrollmentService {
    #[must_use]
    pub fn new(
        clock: Clock,
        enrollments: Arc<dyn EnrollmentRepository>,
        catalog: Arc<dyn CourseCatalog>,
    ) -> Self {
        Self {
            clock,
            enrollments,
            catalog,
            max_save_attempts: DEFAULT_MAX_SAVE_ATTEMPTS,
        }
    }

    /// Build the service on `SQLite` storage described by `config`.
    ///
    /// # Errors
    ///
    /// Returns `ServicesInitError::Sqlite` if connecting or migrating fails.
    pub async fn new_sqlite(
        config: &ServiceConfig,
        clock: Clock,
        catalog: Arc<dyn CourseCatalog>,
    ) -> Result<Self, ServicesInitError> {
        let storage = Storage::sqlite(&config.db_url).await?;
        Ok(Self::new(clock, Arc::clone(&storage.enrollments), catalog)
            .with_max_save_attempts(config.max_save_attempts))
    }

    /// Cap on read-reconcile-save cycles per update; at least one.
    #[must_use]
    pub fn with_max_save_attempts(mut self, attempts: u32) -> Self {
        self.max_save_attempts = attempts.max(1);
        self
    }

    /// Enroll a user in a course.
    ///
    /// # Errors
    ///
    /// Returns `EnrollmentServiceError::InvalidCourseReference` for an unknown course.
    /// Returns `EnrollmentServiceError::DuplicateEnrollment` if already enrolled.
    /// Returns `EnrollmentServiceError::Storage` if persistence fails.
    pub async fn enroll(
        &self,
        user_id: UserId,
        course_id: CourseId,
    ) -> Result<Enrollment, EnrollmentServiceError> {
        self.require_outline(&course_id).await?;

        let record = NewEnrollmentRecord {
            user_id,
            course_id,
            created_at: self.clock.now(),
        };
        match self.enrollments.create_enrollment(record).await {
            Ok(enrollment) => {
                tracing::info!(
                    enrollment_id = %enrollment.id(),
                    user_id = %enrollment.user_id(),
                    course_id = %enrollment.course_id(),
                    "enrolled"
                );
                Ok(enrollment)
            }
            Err(StorageError::Duplicate) => Err(EnrollmentServiceError::DuplicateEnrollment),
            Err(err) => Err(err.into()),
        }
    }

    /// Fetch the enrollment of a user in a course.
    ///
    /// Returns `Ok(None)` when the user is not enrolled.
    ///
    /// # Errors
    ///
    /// Returns `EnrollmentServiceError::Storage` if repository access fails.
    pub async fn enrollment(
        &self,
        user_id: &UserId,
        course_id: &CourseId,
    ) -> Result<Option<Enrollment>, EnrollmentServiceError> {
        Ok(self.enrollments.get_enrollment(user_id, course_id).await?)
    }

    /// Progress of a user in a course; `enrolled: false` when there is no enrollment.
    ///
    /// # Errors
    ///
    /// Returns `EnrollmentServiceError::Storage` if repository access fails.
    pub async fn progress_view(
        &self,
        user_id: &UserId,
        course_id: &CourseId,
    ) -> Result<ProgressView, EnrollmentServiceError> {
        let enrollment = self.enrollments.get_enrollment(user_id, course_id).await?;
        Ok(enrollment
            .as_ref()
            .map_or_else(ProgressView::not_enrolled, ProgressView::from_enrollment))
    }

    /// Apply an item progress event.
    ///
    /// # Errors
    ///
    /// Returns `InvalidCourseReference` for an unknown course, `NotEnrolled`,
    /// `InvalidContentReference`, `SchemeMismatch`, `Conflict` after the retry
    /// budget is spent, or `Storage`.
    pub async fn record_item_progress(
        &self,
        user_id: &UserId,
        course_id: &CourseId,
        event: &ItemProgressEvent,
    ) -> Result<Enrollment, EnrollmentServiceError> {
        let outline = self.require_outline(course_id).await?;
        self.update_with(user_id, course_id, "item_progress", |existing, now| {
            reconcile::apply_item_progress(outline.content_items, existing, event, now)
        })
        .await
    }

    /// Record navigation to a chapter on a chapter-list course.
    ///
    /// # Errors
    ///
    /// Returns `InvalidCourseReference`, `NotEnrolled`, `SchemeMismatch`,
    /// `Conflict`, or `Storage`.
    pub async fn record_chapter_navigation(
        &self,
        user_id: &UserId,
        course_id: &CourseId,
        last_visited_chapter: i64,
    ) -> Result<Enrollment, EnrollmentServiceError> {
        let outline = self.require_outline(course_id).await?;
        self.update_with(user_id, course_id, "chapter_navigation", |existing, now| {
            reconcile::apply_chapter_navigation(
                outline.chapters,
                existing,
                last_visited_chapter,
                now,
            )
        })
        .await
    }

    /// Record a chapter quiz result.
    ///
    /// Progress is only recomputed when the catalog knows the course's chapter count.
    ///
    /// # Errors
    ///
    /// Returns `NotEnrolled`, `InvalidContentReference`, `SchemeMismatch`,
    /// `Conflict`, or `Storage`.
    pub async fn record_quiz_result(
        &self,
        user_id: &UserId,
        course_id: &CourseId,
        submission: QuizSubmission,
    ) -> Result<Enrollment, EnrollmentServiceError> {
        let total_chapters = self
            .catalog
            .outline(course_id)
            .await
            .map(|outline| outline.chapters);
        self.update_with(user_id, course_id, "quiz_result", |existing, now| {
            reconcile::apply_quiz_result(total_chapters, existing, &submission, now)
        })
        .await
    }

    /// Add minutes to the time a user spent in a course.
    ///
    /// # Errors
    ///
    /// Returns `NotEnrolled`, `Conflict`, or `Storage`.
    pub async fn add_time_spent(
        &self,
        user_id: &UserId,
        course_id: &CourseId,
        minutes: u32,
    ) -> Result<Enrollment, EnrollmentServiceError> {
        self.update_with(user_id, course_id, "time_spent", |existing, now| {
            reconcile::add_time_spent(existing, minutes, now)
        })
        .await
    }

    /// Mark the certificate of a completed enrollment as issued.
    ///
    /// # Errors
    ///
    /// Returns `NotEnrolled`, `NotCompleted`, `InvalidContentReference` for a
    /// blank id, `Conflict`, or `Storage`.
    pub async fn issue_certificate(
        &self,
        user_id: &UserId,
        course_id: &CourseId,
        certificate_id: &str,
    ) -> Result<Enrollment, EnrollmentServiceError> {
        self.update_with(user_id, course_id, "certificate", |existing, now| {
            reconcile::issue_certificate(existing, certificate_id, now)
        })
        .await
    }

    /// Hard-delete an enrollment. Returns `false` if it did not exist.
    ///
    /// # Errors
    ///
    /// Returns `EnrollmentServiceError::Storage` if repository access fails.
    pub async fn remove(&self, id: EnrollmentId) -> Result<bool, EnrollmentServiceError> {
        match self.enrollments.remove_enrollment(id).await {
            Ok(()) => {
                tracing::info!(enrollment_id = %id, "enrollment removed");
                Ok(true)
            }
            Err(StorageError::NotFound) => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    /// Enrollments of a course, newest first.
    ///
    /// # Errors
    ///
    /// Returns `EnrollmentServiceError::Storage` if repository access fails.
    pub async fn list_for_course(
        &self,
        course_id: &CourseId,
    ) -> Result<Vec<Enrollment>, EnrollmentServiceError> {
        Ok(self.enrollments.list_by_course(course_id).await?)
    }

    /// Enrollments of a user, newest first.
    ///
    /// # Errors
    ///
    /// Returns `EnrollmentServiceError::Storage` if repository access fails.
    pub async fn list_for_user(
        &self,
        user_id: &UserId,
    ) -> Result<Vec<Enrollment>, EnrollmentServiceError> {
        Ok(self.enrollments.list_by_user(user_id).await?)
    }

    async fn require_outline(
        &self,
        course_id: &CourseId,
    ) -> Result<CourseOutline, EnrollmentServiceError> {
        self.catalog.outline(course_id).await.ok_or_else(|| {
            EnrollmentServiceError::InvalidCourseReference {
                course_id: course_id.clone(),
            }
        })
    }

    async fn update_with<F>(
        &self,
        user_id: &UserId,
        course_id: &CourseId,
        operation: &'static str,
        apply: F,
    ) -> Result<Enrollment, EnrollmentServiceError>
    where
        F: Fn(Option<&Enrollment>, DateTime<Utc>) -> Result<Enrollment, ReconcileError>
            + Send
            + Sync,
    {
        for attempt in 1..=self.max_save_attempts {
            let existing = self.enrollments.get_enrollment(user_id, course_id).await?;
            let next = apply(existing.as_ref(), self.clock.now())?;
            tracing::debug!(
                operation,
                attempt,
                enrollment_id = %next.id(),
                progress = next.progress(),
                "reconciled enrollment"
            );

            match self.enrollments.save_enrollment(&next).await {
                Ok(saved) => {
                    let was_completed = existing.as_ref().is_some_and(Enrollment::completed);
                    if saved.completed() && !was_completed {
                        tracing::info!(
                            enrollment_id = %saved.id(),
                            user_id = %saved.user_id(),
                            course_id = %saved.course_id(),
                            "course completed"
                        );
                    }
                    return Ok(saved);
                }
                Err(StorageError::Conflict) => {
                    tracing::warn!(
                        operation,
                        attempt,
                        enrollment_id = %next.id(),
                        "enrollment changed concurrently, retrying"
                    );
                }
                Err(StorageError::NotFound) => return Err(EnrollmentServiceError::NotEnrolled),
                Err(err) => return Err(err.into()),
            }
        }

        Err(EnrollmentServiceError::Conflict {
            attempts: self.max_save_attempts,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use course_core::model::ContentKind;
    use course_core::time::fixed_now;
    use storage::repository::InMemoryRepository;

    use crate::catalog::StaticCatalog;

    fn user() -> UserId {
        UserId::new("u1").unwrap()
    }

    fn course() -> CourseId {
        CourseId::new("c1").unwrap()
    }

    fn service() -> EnrollmentService {
        let catalog = StaticCatalog::new().with_course(
            course(),
            CourseOutline {
                content_items: 4,
                chapters: 5,
            },
        );
        EnrollmentService::new(
            Clock::fixed(fixed_now()),
            Arc::new(InMemoryRepository::new()),
            Arc::new(catalog),
        )
    }

    #[tokio::test]
    async fn enroll_rejects_unknown_course_and_duplicates() {
        let service = service();
        let err = service
            .enroll(user(), CourseId::new("nope").unwrap())
            .await
            .unwrap_err();
        assert_eq!(err.reason_code(), "invalid_course_reference");

        let enrollment = service.enroll(user(), course()).await.unwrap();
        assert_eq!(enrollment.progress(), 0);
        assert_eq!(enrollment.created_at(), fixed_now());

        let err = service.enroll(user(), course()).await.unwrap_err();
        assert!(matches!(err, EnrollmentServiceError::DuplicateEnrollment));
    }

    #[tokio::test]
    async fn item_progress_without_enrollment_is_rejected() {
        let service = service();
        let event = ItemProgressEvent::new(0, ContentKind::Chapter, true);
        let err = service
            .record_item_progress(&user(), &course(), &event)
            .await
            .unwrap_err();
        assert!(matches!(err, EnrollmentServiceError::NotEnrolled));
        assert!(service.enrollment(&user(), &course()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn progress_view_reports_missing_enrollment() {
        let service = service();
        let view = service.progress_view(&user(), &course()).await.unwrap();
        assert_eq!(view, ProgressView::not_enrolled());

        service.enroll(user(), course()).await.unwrap();
        let event = ItemProgressEvent::new(1, ContentKind::Video, true);
        service
            .record_item_progress(&user(), &course(), &event)
            .await
            .unwrap();

        let view = service.progress_view(&user(), &course()).await.unwrap();
        assert!(view.enrolled);
        assert_eq!(view.progress, 25);
        assert_eq!(view.last_visited_content, 1);
        assert_eq!(view.scheme, SchemeKind::ItemBased);
    }

    #[tokio::test]
    async fn chapter_navigation_uses_catalog_chapters() {
        let service = service();
        service.enroll(user(), course()).await.unwrap();

        let enrollment = service
            .record_chapter_navigation(&user(), &course(), 3)
            .await
            .unwrap();
        assert_eq!(enrollment.progress(), 60);
        assert!(enrollment.items_progress().is_empty());
    }

    #[tokio::test]
    async fn remove_reports_whether_anything_was_deleted() {
        let service = service();
        let enrollment = service.enroll(user(), course()).await.unwrap();

        assert!(service.remove(enrollment.id()).await.unwrap());
        assert!(!service.remove(enrollment.id()).await.unwrap());
    }

    #[tokio::test]
    async fn certificate_requires_completion() {
        let service = service();
        service.enroll(user(), course()).await.unwrap();

        let err = service
            .issue_certificate(&user(), &course(), "CERT-1")
            .await
            .unwrap_err();
        assert_eq!(err.reason_code(), "not_completed");
    }

    #[test]
    fn progress_view_serializes_camel_case() {
        let json = serde_json::to_value(ProgressView::not_enrolled()).unwrap();
        assert_eq!(json["enrolled"], false);
        assert_eq!(json["lastVisitedContent"], 0);
        assert_eq!(json["itemsProgress"], serde_json::json!([]));
        assert_eq!(json["scheme"], "not_started");
    }
}
