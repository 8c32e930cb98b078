use async_trait::async_trait;
use chrono::{DateTime, Utc};
use course_core::model::{CourseId, Enrollment, EnrollmentId, UserId};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use thiserror::Error;

/// Errors surfaced by storage adapters.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StorageError {
    #[error("not found")]
    NotFound,

    #[error("duplicate")]
    Duplicate,

    #[error("conflict")]
    Conflict,

    #[error("connection error: {0}")]
    Connection(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Input for creating an enrollment; the store assigns the id.
#[derive(Debug, Clone)]
pub struct NewEnrollmentRecord {
    pub user_id: UserId,
    pub course_id: CourseId,
    pub created_at: DateTime<Utc>,
}

/// Repository contract for enrollments.
///
/// `save_enrollment` is a compare-and-swap on `Enrollment::version`, which is
/// how concurrent updates to one enrollment are serialized.
#[async_trait]
pub trait EnrollmentRepository: Send + Sync {
    /// Create a zeroed enrollment for a `(user, course)` pair.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Duplicate` if the pair is already enrolled.
    async fn create_enrollment(
        &self,
        record: NewEnrollmentRecord,
    ) -> Result<Enrollment, StorageError>;

    /// Fetch the enrollment for a `(user, course)` pair, if any.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on backend failures.
    async fn get_enrollment(
        &self,
        user_id: &UserId,
        course_id: &CourseId,
    ) -> Result<Option<Enrollment>, StorageError>;

    /// Fetch an enrollment by id, if any.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on backend failures.
    async fn get_enrollment_by_id(
        &self,
        id: EnrollmentId,
    ) -> Result<Option<Enrollment>, StorageError>;

    /// Replace the stored enrollment if its version still matches.
    ///
    /// Returns the saved record with its version bumped by one.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Conflict` if another writer saved first, or
    /// `StorageError::NotFound` if the enrollment no longer exists.
    async fn save_enrollment(&self, enrollment: &Enrollment) -> Result<Enrollment, StorageError>;

    /// Hard-delete an enrollment.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if missing.
    async fn remove_enrollment(&self, id: EnrollmentId) -> Result<(), StorageError>;

    /// All enrollments of a course, newest first.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on backend failures.
    async fn list_by_course(&self, course_id: &CourseId) -> Result<Vec<Enrollment>, StorageError>;

    /// All enrollments of a user, newest first.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on backend failures.
    async fn list_by_user(&self, user_id: &UserId) -> Result<Vec<Enrollment>, StorageError>;
}

#[derive(Default)]
struct InMemoryState {
    last_id: u64,
    enrollments: HashMap<EnrollmentId, Enrollment>,
}

/// Simple in-memory repository implementation for testing and prototyping.
#[derive(Clone, Default)]
pub struct InMemoryRepository {
    state: Arc<Mutex<InMemoryState>>,
}

impl InMemoryRepository {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn newest_first(
        &self,
        keep: impl Fn(&Enrollment) -> bool,
    ) -> Result<Vec<Enrollment>, StorageError> {
        let guard = self
            .state
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        let mut found: Vec<Enrollment> = guard
            .enrollments
            .values()
            .filter(|&e| keep(e))
            .cloned()
            .collect();
        found.sort_by(|a, b| {
            b.created_at()
                .cmp(&a.created_at())
                .then_with(|| b.id().cmp(&a.id()))
        });
        Ok(found)
    }
}

#[async_trait]
impl EnrollmentRepository for InMemoryRepository {
    async fn create_enrollment(
        &self,
        record: NewEnrollmentRecord,
    ) -> Result<Enrollment, StorageError> {
        let mut guard = self
            .state
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        let taken = guard
            .enrollments
            .values()
            .any(|e| e.user_id() == &record.user_id && e.course_id() == &record.course_id);
        if taken {
            return Err(StorageError::Duplicate);
        }

        guard.last_id += 1;
        let id = EnrollmentId::new(guard.last_id);
        let enrollment = Enrollment::new(id, record.user_id, record.course_id, record.created_at);
        guard.enrollments.insert(id, enrollment.clone());
        Ok(enrollment)
    }

    async fn get_enrollment(
        &self,
        user_id: &UserId,
        course_id: &CourseId,
    ) -> Result<Option<Enrollment>, StorageError> {
        let guard = self
            .state
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        Ok(guard
            .enrollments
            .values()
            .find(|e| e.user_id() == user_id && e.course_id() == course_id)
            .cloned())
    }

    async fn get_enrollment_by_id(
        &self,
        id: EnrollmentId,
    ) -> Result<Option<Enrollment>, StorageError> {
        let guard = self
            .state
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        Ok(guard.enrollments.get(&id).cloned())
    }

    async fn save_enrollment(&self, enrollment: &Enrollment) -> Result<Enrollment, StorageError> {
        let mut guard = self
            .state
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        let stored = guard
            .enrollments
            .get_mut(&enrollment.id())
            .ok_or(StorageError::NotFound)?;
        if stored.version() != enrollment.version() {
            return Err(StorageError::Conflict);
        }

        let saved = enrollment.clone().with_version(enrollment.version() + 1);
        *stored = saved.clone();
        Ok(saved)
    }

    async fn remove_enrollment(&self, id: EnrollmentId) -> Result<(), StorageError> {
        let mut guard = self
            .state
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        guard
            .enrollments
            .remove(&id)
            .map(|_| ())
            .ok_or(StorageError::NotFound)
    }

    async fn list_by_course(&self, course_id: &CourseId) -> Result<Vec<Enrollment>, StorageError> {
        self.newest_first(|e| e.course_id() == course_id)
    }

    async fn list_by_user(&self, user_id: &UserId) -> Result<Vec<Enrollment>, StorageError> {
        self.newest_first(|e| e.user_id() == user_id)
    }
}

/// Aggregates repositories behind trait objects for easy backend swapping.
#[derive(Clone)]
pub struct Storage {
    pub enrollments: Arc<dyn EnrollmentRepository>,
}

impl Storage {
    #[must_use]
    pub fn in_memory() -> Self {
        let enrollments: Arc<dyn EnrollmentRepository> = Arc::new(InMemoryRepository::new());
        Self { enrollments }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use course_core::time::fixed_now;

    fn record(user: &str, course: &str, created_at: DateTime<Utc>) -> NewEnrollmentRecord {
        NewEnrollmentRecord {
            user_id: UserId::new(user).unwrap(),
            course_id: CourseId::new(course).unwrap(),
            created_at,
        }
    }

    #[tokio::test]
    async fn create_rejects_duplicate_pair() {
        let repo = InMemoryRepository::new();
        let first = repo
            .create_enrollment(record("u1", "c1", fixed_now()))
            .await
            .unwrap();
        assert_eq!(first.version(), 1);

        let err = repo
            .create_enrollment(record("u1", "c1", fixed_now()))
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::Duplicate));

        repo.create_enrollment(record("u1", "c2", fixed_now()))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn save_is_a_compare_and_swap_on_version() {
        let repo = InMemoryRepository::new();
        let created = repo
            .create_enrollment(record("u1", "c1", fixed_now()))
            .await
            .unwrap();

        let saved = repo.save_enrollment(&created).await.unwrap();
        assert_eq!(saved.version(), 2);

        let err = repo.save_enrollment(&created).await.unwrap_err();
        assert!(matches!(err, StorageError::Conflict));

        let fetched = repo.get_enrollment_by_id(created.id()).await.unwrap().unwrap();
        assert_eq!(fetched.version(), 2);
    }

    #[tokio::test]
    async fn save_and_remove_report_missing_records() {
        let repo = InMemoryRepository::new();
        let created = repo
            .create_enrollment(record("u1", "c1", fixed_now()))
            .await
            .unwrap();
        repo.remove_enrollment(created.id()).await.unwrap();

        assert!(matches!(
            repo.save_enrollment(&created).await.unwrap_err(),
            StorageError::NotFound
        ));
        assert!(matches!(
            repo.remove_enrollment(created.id()).await.unwrap_err(),
            StorageError::NotFound
        ));
        assert!(
            repo.get_enrollment(created.user_id(), created.course_id())
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn lists_are_newest_first() {
        let repo = InMemoryRepository::new();
        let t0 = fixed_now();
        repo.create_enrollment(record("u1", "c1", t0)).await.unwrap();
        repo.create_enrollment(record("u2", "c1", t0 + Duration::hours(1)))
            .await
            .unwrap();
        repo.create_enrollment(record("u3", "c1", t0)).await.unwrap();
        repo.create_enrollment(record("u1", "c2", t0 + Duration::hours(2)))
            .await
            .unwrap();

        let course = repo
            .list_by_course(&CourseId::new("c1").unwrap())
            .await
            .unwrap();
        let users: Vec<&str> = course.iter().map(|e| e.user_id().as_str()).collect();
        assert_eq!(users, ["u2", "u3", "u1"]);

        let user = repo.list_by_user(&UserId::new("u1").unwrap()).await.unwrap();
        let courses: Vec<&str> = user.iter().map(|e| e.course_id().as_str()).collect();
        assert_eq!(courses, ["c2", "c1"]);
    }
}
