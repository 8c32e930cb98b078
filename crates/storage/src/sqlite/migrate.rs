use chrono::Utc;
use sqlx::SqlitePool;

use super::SqliteInitError;

/// Runs versioned migrations for the enrollment schema.
///
/// Version 1 creates enrollments with their item progress and legacy quiz
/// result child tables, plus the listing indexes.
pub async fn run_migrations(pool: &SqlitePool) -> Result<(), SqliteInitError> {
    async fn is_applied(pool: &SqlitePool, version: i64) -> Result<bool, sqlx::Error> {
        let row = sqlx::query("SELECT 1 FROM schema_migrations WHERE version = ?1")
            .bind(version)
            .fetch_optional(pool)
            .await?;
        Ok(row.is_some())
    }

    sqlx::query(
        r"
            CREATE TABLE IF NOT EXISTS schema_migrations (
                version INTEGER PRIMARY KEY,
                applied_at TEXT NOT NULL
            );
            ",
    )
    .execute(pool)
    .await?;

    // Version 1: enrollment schema.
    if !is_applied(pool, 1).await? {
        let mut tx = pool.begin().await?;

        sqlx::query(
            r"
                CREATE TABLE IF NOT EXISTS enrollments (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    user_id TEXT NOT NULL,
                    course_id TEXT NOT NULL,
                    progress INTEGER NOT NULL CHECK (progress BETWEEN 0 AND 100),
                    completed INTEGER NOT NULL CHECK (completed IN (0, 1)),
                    completed_at TEXT,
                    certificate_issued INTEGER NOT NULL CHECK (certificate_issued IN (0, 1)),
                    certificate_id TEXT,
                    time_spent INTEGER NOT NULL CHECK (time_spent >= 0),
                    scheme TEXT NOT NULL,
                    last_visited INTEGER NOT NULL CHECK (last_visited >= 0),
                    version INTEGER NOT NULL CHECK (version >= 1),
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL,
                    UNIQUE (user_id, course_id)
                );
            ",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r"
                CREATE TABLE IF NOT EXISTS enrollment_items (
                    enrollment_id INTEGER NOT NULL,
                    position INTEGER NOT NULL,
                    item_index INTEGER NOT NULL CHECK (item_index >= 0),
                    kind TEXT NOT NULL CHECK (kind IN ('chapter', 'video', 'quiz')),
                    completed INTEGER NOT NULL CHECK (completed IN (0, 1)),
                    completed_at TEXT,
                    watched_seconds INTEGER,
                    total_seconds INTEGER,
                    video_completed INTEGER,
                    score INTEGER,
                    passed INTEGER,
                    attempts INTEGER,
                    PRIMARY KEY (enrollment_id, item_index, kind),
                    FOREIGN KEY (enrollment_id) REFERENCES enrollments(id) ON DELETE CASCADE
                );
            ",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r"
                CREATE TABLE IF NOT EXISTS enrollment_quiz_results (
                    enrollment_id INTEGER NOT NULL,
                    chapter_index INTEGER NOT NULL CHECK (chapter_index >= 0),
                    score INTEGER NOT NULL CHECK (score >= 0),
                    passed INTEGER NOT NULL CHECK (passed IN (0, 1)),
                    taken_at TEXT NOT NULL,
                    PRIMARY KEY (enrollment_id, chapter_index),
                    FOREIGN KEY (enrollment_id) REFERENCES enrollments(id) ON DELETE CASCADE
                );
            ",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r"
                CREATE INDEX IF NOT EXISTS idx_enrollments_course_created
                    ON enrollments (course_id, created_at, id);
            ",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r"
                CREATE INDEX IF NOT EXISTS idx_enrollments_user_created
                    ON enrollments (user_id, created_at, id);
            ",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r"
                INSERT INTO schema_migrations (version, applied_at)
                VALUES (?1, ?2)
                ON CONFLICT(version) DO NOTHING
            ",
        )
        .bind(1_i64)
        .bind(Utc::now())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        tracing::info!(version = 1, "applied enrollment schema migration");
    }

    Ok(())
}
