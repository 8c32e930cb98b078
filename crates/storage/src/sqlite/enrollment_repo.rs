use course_core::model::{CourseId, Enrollment, EnrollmentId, ProgressScheme, UserId};
use sqlx::query::Query;
use sqlx::sqlite::{SqliteArguments, SqliteConnection, SqliteRow};
use sqlx::{Row, Sqlite, Transaction};

use super::SqliteRepository;
use super::mapping::{
    bool_to_i64, enrollment_id_from_i64, enrollment_id_to_i64, item_columns, last_visited,
    map_enrollment_row, map_item_row, map_quiz_row, ser, version_to_i64,
};
use crate::repository::{EnrollmentRepository, NewEnrollmentRecord, StorageError};

type SqliteQuery<'q> = Query<'q, Sqlite, SqliteArguments<'q>>;

const ENROLLMENT_COLUMNS: &str = r"
    id, user_id, course_id, progress, completed, completed_at, certificate_issued,
    certificate_id, time_spent, scheme, last_visited, version, created_at, updated_at
";

fn is_unique_violation(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .is_some_and(|db| db.is_unique_violation())
}

/// Attach child rows to an enrollment row.
///
/// Runs on the caller's transaction so the row and its children come from one snapshot.
async fn hydrate(conn: &mut SqliteConnection, row: &SqliteRow) -> Result<Enrollment, StorageError> {
    let id: i64 = row.try_get("id").map_err(ser)?;

    let item_rows = sqlx::query(
        r"
        SELECT item_index, kind, completed, completed_at, watched_seconds, total_seconds,
               video_completed, score, passed, attempts
        FROM enrollment_items
        WHERE enrollment_id = ?1
        ORDER BY position ASC
        ",
    )
    .bind(id)
    .fetch_all(&mut *conn)
    .await
    .map_err(|e| StorageError::Connection(e.to_string()))?;

    let quiz_rows = sqlx::query(
        r"
        SELECT chapter_index, score, passed, taken_at
        FROM enrollment_quiz_results
        WHERE enrollment_id = ?1
        ORDER BY chapter_index ASC
        ",
    )
    .bind(id)
    .fetch_all(&mut *conn)
    .await
    .map_err(|e| StorageError::Connection(e.to_string()))?;

    let items = item_rows
        .iter()
        .map(map_item_row)
        .collect::<Result<Vec<_>, _>>()?;
    let quiz_results = quiz_rows
        .iter()
        .map(map_quiz_row)
        .collect::<Result<Vec<_>, _>>()?;
    map_enrollment_row(row, items, quiz_results)
}

impl SqliteRepository {
    /// The filter must match at most one row.
    async fn fetch_one_where(
        &self,
        filter: &str,
        bind: impl FnOnce(SqliteQuery<'_>) -> SqliteQuery<'_> + Send,
    ) -> Result<Option<Enrollment>, StorageError> {
        let mut found = self.fetch_where(filter, bind).await?;
        Ok(found.pop())
    }

    /// Load enrollments matching `filter`, newest first, in one read transaction.
    async fn fetch_where(
        &self,
        filter: &str,
        bind: impl FnOnce(SqliteQuery<'_>) -> SqliteQuery<'_> + Send,
    ) -> Result<Vec<Enrollment>, StorageError> {
        let sql = format!(
            "SELECT {ENROLLMENT_COLUMNS} FROM enrollments WHERE {filter} ORDER BY created_at DESC, id DESC"
        );

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StorageError::Connection(e.to_string()))?;

        let rows = bind(sqlx::query(&sql))
            .fetch_all(&mut *tx)
            .await
            .map_err(|e| StorageError::Connection(e.to_string()))?;

        let mut out = Vec::with_capacity(rows.len());
        for row in &rows {
            out.push(hydrate(&mut tx, row).await?);
        }

        tx.commit()
            .await
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        Ok(out)
    }
}

/// Replace every child row of an enrollment inside the save transaction.
async fn write_children(
    tx: &mut Transaction<'_, Sqlite>,
    enrollment_id: i64,
    scheme: &ProgressScheme,
) -> Result<(), StorageError> {
    sqlx::query("DELETE FROM enrollment_items WHERE enrollment_id = ?1")
        .bind(enrollment_id)
        .execute(&mut **tx)
        .await
        .map_err(|e| StorageError::Connection(e.to_string()))?;
    sqlx::query("DELETE FROM enrollment_quiz_results WHERE enrollment_id = ?1")
        .bind(enrollment_id)
        .execute(&mut **tx)
        .await
        .map_err(|e| StorageError::Connection(e.to_string()))?;

    match scheme {
        ProgressScheme::NotStarted => {}
        ProgressScheme::ItemBased { items_progress, .. } => {
            for (position, item) in (0_i64..).zip(items_progress) {
                let columns = item_columns(&item.detail);
                sqlx::query(
                    r"
                    INSERT INTO enrollment_items (
                        enrollment_id, position, item_index, kind, completed, completed_at,
                        watched_seconds, total_seconds, video_completed, score, passed, attempts
                    )
                    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
                    ",
                )
                .bind(enrollment_id)
                .bind(position)
                .bind(i64::from(item.item_index))
                .bind(item.kind().as_str())
                .bind(bool_to_i64(item.completed))
                .bind(item.completed_at)
                .bind(columns.watched_seconds)
                .bind(columns.total_seconds)
                .bind(columns.video_completed)
                .bind(columns.score)
                .bind(columns.passed)
                .bind(columns.attempts)
                .execute(&mut **tx)
                .await
                .map_err(|e| StorageError::Connection(e.to_string()))?;
            }
        }
        ProgressScheme::ChapterBased { quiz_results, .. } => {
            for result in quiz_results {
                sqlx::query(
                    r"
                    INSERT INTO enrollment_quiz_results (
                        enrollment_id, chapter_index, score, passed, taken_at
                    )
                    VALUES (?1, ?2, ?3, ?4, ?5)
                    ",
                )
                .bind(enrollment_id)
                .bind(i64::from(result.chapter_index))
                .bind(i64::from(result.score))
                .bind(bool_to_i64(result.passed))
                .bind(result.taken_at)
                .execute(&mut **tx)
                .await
                .map_err(|e| StorageError::Connection(e.to_string()))?;
            }
        }
    }
    Ok(())
}

#[async_trait::async_trait]
impl EnrollmentRepository for SqliteRepository {
    async fn create_enrollment(
        &self,
        record: NewEnrollmentRecord,
    ) -> Result<Enrollment, StorageError> {
        let res = sqlx::query(
            r"
            INSERT INTO enrollments (
                user_id, course_id, progress, completed, completed_at, certificate_issued,
                certificate_id, time_spent, scheme, last_visited, version, created_at, updated_at
            )
            VALUES (?1, ?2, 0, 0, NULL, 0, NULL, 0, ?3, 0, ?4, ?5, ?5)
            ",
        )
        .bind(record.user_id.as_str())
        .bind(record.course_id.as_str())
        .bind(ProgressScheme::NotStarted.kind().as_str())
        .bind(version_to_i64(course_core::model::INITIAL_VERSION)?)
        .bind(record.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                StorageError::Duplicate
            } else {
                StorageError::Connection(e.to_string())
            }
        })?;

        let id = enrollment_id_from_i64(res.last_insert_rowid())?;
        Ok(Enrollment::new(
            id,
            record.user_id,
            record.course_id,
            record.created_at,
        ))
    }

    async fn get_enrollment(
        &self,
        user_id: &UserId,
        course_id: &CourseId,
    ) -> Result<Option<Enrollment>, StorageError> {
        self.fetch_one_where("user_id = ?1 AND course_id = ?2", |q| {
            q.bind(user_id.as_str().to_owned())
                .bind(course_id.as_str().to_owned())
        })
        .await
    }

    async fn get_enrollment_by_id(
        &self,
        id: EnrollmentId,
    ) -> Result<Option<Enrollment>, StorageError> {
        let id = enrollment_id_to_i64(id)?;
        self.fetch_one_where("id = ?1", |q| q.bind(id)).await
    }

    async fn save_enrollment(&self, enrollment: &Enrollment) -> Result<Enrollment, StorageError> {
        let id = enrollment_id_to_i64(enrollment.id())?;
        let expected = version_to_i64(enrollment.version())?;
        let next_version = enrollment.version() + 1;

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StorageError::Connection(e.to_string()))?;

        let res = sqlx::query(
            r"
            UPDATE enrollments SET
                progress = ?1,
                completed = ?2,
                completed_at = ?3,
                certificate_issued = ?4,
                certificate_id = ?5,
                time_spent = ?6,
                scheme = ?7,
                last_visited = ?8,
                version = ?9,
                updated_at = ?10
            WHERE id = ?11 AND version = ?12
            ",
        )
        .bind(i64::from(enrollment.progress()))
        .bind(bool_to_i64(enrollment.completed()))
        .bind(enrollment.completed_at())
        .bind(bool_to_i64(enrollment.certificate_issued()))
        .bind(enrollment.certificate_id())
        .bind(i64::from(enrollment.time_spent()))
        .bind(enrollment.scheme_kind().as_str())
        .bind(last_visited(enrollment.scheme()))
        .bind(version_to_i64(next_version)?)
        .bind(enrollment.updated_at())
        .bind(id)
        .bind(expected)
        .execute(&mut *tx)
        .await
        .map_err(|e| StorageError::Connection(e.to_string()))?;

        if res.rows_affected() == 0 {
            let exists = sqlx::query("SELECT 1 FROM enrollments WHERE id = ?1")
                .bind(id)
                .fetch_optional(&mut *tx)
                .await
                .map_err(|e| StorageError::Connection(e.to_string()))?
                .is_some();
            return Err(if exists {
                tracing::debug!(enrollment_id = id, expected, "stale enrollment version");
                StorageError::Conflict
            } else {
                StorageError::NotFound
            });
        }

        write_children(&mut tx, id, enrollment.scheme()).await?;

        tx.commit()
            .await
            .map_err(|e| StorageError::Connection(e.to_string()))?;

        Ok(enrollment.clone().with_version(next_version))
    }

    async fn remove_enrollment(&self, id: EnrollmentId) -> Result<(), StorageError> {
        let res = sqlx::query("DELETE FROM enrollments WHERE id = ?1")
            .bind(enrollment_id_to_i64(id)?)
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::Connection(e.to_string()))?;

        if res.rows_affected() == 0 {
            return Err(StorageError::NotFound);
        }
        Ok(())
    }

    async fn list_by_course(&self, course_id: &CourseId) -> Result<Vec<Enrollment>, StorageError> {
        self.fetch_where("course_id = ?1", |q| q.bind(course_id.as_str().to_owned()))
            .await
    }

    async fn list_by_user(&self, user_id: &UserId) -> Result<Vec<Enrollment>, StorageError> {
        self.fetch_where("user_id = ?1", |q| q.bind(user_id.as_str().to_owned()))
            .await
    }
}
