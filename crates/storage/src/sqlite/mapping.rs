use chrono::{DateTime, Utc};
use course_core::model::{
    ContentKind, CourseId, Enrollment, EnrollmentId, ItemDetail, ItemProgress,
    PersistedEnrollment, ProgressScheme, QuizResult, UserId,
};
use sqlx::Row;
use sqlx::sqlite::SqliteRow;

use crate::repository::StorageError;

pub(crate) fn ser<E: core::fmt::Display>(e: E) -> StorageError {
    StorageError::Serialization(e.to_string())
}

fn i64_to_u64(field: &'static str, v: i64) -> Result<u64, StorageError> {
    u64::try_from(v).map_err(|_| StorageError::Serialization(format!("{field} sign overflow")))
}

fn i64_to_u32(field: &'static str, v: i64) -> Result<u32, StorageError> {
    u32::try_from(v).map_err(|_| StorageError::Serialization(format!("{field} out of range: {v}")))
}

fn i64_to_bool(field: &'static str, v: i64) -> Result<bool, StorageError> {
    match v {
        0 => Ok(false),
        1 => Ok(true),
        other => Err(StorageError::Serialization(format!(
            "invalid {field} flag: {other}"
        ))),
    }
}

pub(crate) fn bool_to_i64(v: bool) -> i64 {
    i64::from(v)
}

pub(crate) fn enrollment_id_from_i64(v: i64) -> Result<EnrollmentId, StorageError> {
    Ok(EnrollmentId::new(i64_to_u64("enrollment_id", v)?))
}

pub(crate) fn enrollment_id_to_i64(id: EnrollmentId) -> Result<i64, StorageError> {
    i64::try_from(id.value())
        .map_err(|_| StorageError::Serialization("enrollment_id overflow".into()))
}

pub(crate) fn version_to_i64(version: u64) -> Result<i64, StorageError> {
    i64::try_from(version).map_err(|_| StorageError::Serialization("version overflow".into()))
}

/// Pointer column shared by both schemes: `last_visited_content` or `last_visited_chapter`.
pub(crate) fn last_visited(scheme: &ProgressScheme) -> i64 {
    match scheme {
        ProgressScheme::NotStarted => 0,
        ProgressScheme::ItemBased {
            last_visited_content,
            ..
        } => i64::from(*last_visited_content),
        ProgressScheme::ChapterBased {
            last_visited_chapter,
            ..
        } => i64::from(*last_visited_chapter),
    }
}

fn parse_content_kind(s: &str) -> Result<ContentKind, StorageError> {
    match s {
        "chapter" => Ok(ContentKind::Chapter),
        "video" => Ok(ContentKind::Video),
        "quiz" => Ok(ContentKind::Quiz),
        _ => Err(StorageError::Serialization(format!("invalid kind: {s}"))),
    }
}

fn required_u32(row: &SqliteRow, column: &'static str) -> Result<u32, StorageError> {
    let value = row
        .try_get::<Option<i64>, _>(column)
        .map_err(ser)?
        .ok_or_else(|| StorageError::Serialization(format!("missing {column}")))?;
    i64_to_u32(column, value)
}

fn required_bool(row: &SqliteRow, column: &'static str) -> Result<bool, StorageError> {
    let value = row
        .try_get::<Option<i64>, _>(column)
        .map_err(ser)?
        .ok_or_else(|| StorageError::Serialization(format!("missing {column}")))?;
    i64_to_bool(column, value)
}

pub(crate) fn map_item_row(row: &SqliteRow) -> Result<ItemProgress, StorageError> {
    let kind_str: String = row.try_get("kind").map_err(ser)?;
    let detail = match parse_content_kind(&kind_str)? {
        ContentKind::Chapter => ItemDetail::Chapter {
            watched_seconds: required_u32(row, "watched_seconds")?,
            total_seconds: required_u32(row, "total_seconds")?,
        },
        ContentKind::Video => ItemDetail::Video {
            watched_seconds: required_u32(row, "watched_seconds")?,
            total_seconds: required_u32(row, "total_seconds")?,
            video_completed: required_bool(row, "video_completed")?,
        },
        ContentKind::Quiz => ItemDetail::Quiz {
            score: required_u32(row, "score")?,
            passed: required_bool(row, "passed")?,
            attempts: required_u32(row, "attempts")?,
        },
    };

    Ok(ItemProgress {
        item_index: i64_to_u32("item_index", row.try_get("item_index").map_err(ser)?)?,
        completed: i64_to_bool("completed", row.try_get("completed").map_err(ser)?)?,
        completed_at: row.try_get("completed_at").map_err(ser)?,
        detail,
    })
}

/// Columns of an item row that depend on its kind; `None` where the kind has no such field.
pub(crate) struct ItemColumns {
    pub watched_seconds: Option<i64>,
    pub total_seconds: Option<i64>,
    pub video_completed: Option<i64>,
    pub score: Option<i64>,
    pub passed: Option<i64>,
    pub attempts: Option<i64>,
}

pub(crate) fn item_columns(detail: &ItemDetail) -> ItemColumns {
    match *detail {
        ItemDetail::Chapter {
            watched_seconds,
            total_seconds,
        } => ItemColumns {
            watched_seconds: Some(i64::from(watched_seconds)),
            total_seconds: Some(i64::from(total_seconds)),
            video_completed: None,
            score: None,
            passed: None,
            attempts: None,
        },
        ItemDetail::Video {
            watched_seconds,
            total_seconds,
            video_completed,
        } => ItemColumns {
            watched_seconds: Some(i64::from(watched_seconds)),
            total_seconds: Some(i64::from(total_seconds)),
            video_completed: Some(bool_to_i64(video_completed)),
            score: None,
            passed: None,
            attempts: None,
        },
        ItemDetail::Quiz {
            score,
            passed,
            attempts,
        } => ItemColumns {
            watched_seconds: None,
            total_seconds: None,
            video_completed: None,
            score: Some(i64::from(score)),
            passed: Some(bool_to_i64(passed)),
            attempts: Some(i64::from(attempts)),
        },
    }
}

pub(crate) fn map_quiz_row(row: &SqliteRow) -> Result<QuizResult, StorageError> {
    Ok(QuizResult {
        chapter_index: i64_to_u32("chapter_index", row.try_get("chapter_index").map_err(ser)?)?,
        score: i64_to_u32("score", row.try_get("score").map_err(ser)?)?,
        passed: i64_to_bool("passed", row.try_get("passed").map_err(ser)?)?,
        taken_at: row.try_get("taken_at").map_err(ser)?,
    })
}

/// Rebuild an enrollment from its row plus already-mapped child rows.
///
/// Child rows that do not belong to the stored scheme are a corrupt record.
pub(crate) fn map_enrollment_row(
    row: &SqliteRow,
    items: Vec<ItemProgress>,
    quiz_results: Vec<QuizResult>,
) -> Result<Enrollment, StorageError> {
    let scheme_str: String = row.try_get("scheme").map_err(ser)?;
    let pointer = i64_to_u32("last_visited", row.try_get("last_visited").map_err(ser)?)?;
    let scheme = match scheme_str.as_str() {
        "not_started" if items.is_empty() && quiz_results.is_empty() => {
            ProgressScheme::NotStarted
        }
        "item_based" if quiz_results.is_empty() => ProgressScheme::ItemBased {
            last_visited_content: pointer,
            items_progress: items,
        },
        "chapter_based" if items.is_empty() => ProgressScheme::ChapterBased {
            last_visited_chapter: pointer,
            quiz_results,
        },
        other => {
            return Err(StorageError::Serialization(format!(
                "child rows do not match scheme {other}"
            )));
        }
    };

    let progress: i64 = row.try_get("progress").map_err(ser)?;
    let created_at: DateTime<Utc> = row.try_get("created_at").map_err(ser)?;
    let record = PersistedEnrollment {
        id: enrollment_id_from_i64(row.try_get("id").map_err(ser)?)?,
        user_id: UserId::new(row.try_get::<String, _>("user_id").map_err(ser)?).map_err(ser)?,
        course_id: CourseId::new(row.try_get::<String, _>("course_id").map_err(ser)?)
            .map_err(ser)?,
        progress: u8::try_from(progress)
            .map_err(|_| StorageError::Serialization(format!("invalid progress: {progress}")))?,
        completed: i64_to_bool("completed", row.try_get("completed").map_err(ser)?)?,
        completed_at: row.try_get("completed_at").map_err(ser)?,
        certificate_issued: i64_to_bool(
            "certificate_issued",
            row.try_get("certificate_issued").map_err(ser)?,
        )?,
        certificate_id: row.try_get("certificate_id").map_err(ser)?,
        time_spent: i64_to_u32("time_spent", row.try_get("time_spent").map_err(ser)?)?,
        scheme,
        version: i64_to_u64("version", row.try_get("version").map_err(ser)?)?,
        created_at,
        updated_at: row.try_get("updated_at").map_err(ser)?,
    };

    Enrollment::from_persisted(record).map_err(ser)
}
