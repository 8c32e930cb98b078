//! Progress reconciliation.
//!
//! Pure functions from `(course counts, existing enrollment, progress event)`
//! to the next enrollment state. Nothing here touches storage or the clock;
//! callers pass `now` and persist the returned record themselves.
//!
//! Every function works on a clone of the input and returns it only once it
//! is fully merged, so an error never leaves a half-applied update behind.

use chrono::{DateTime, Utc};

use crate::error::ReconcileError;
use crate::model::{
    ContentKind, Enrollment, ItemDetail, ItemProgress, ItemProgressEvent, QuizResult,
    QuizSubmission,
};

//
// ─── DEFAULTS ──────────────────────────────────────────────────────────────────
//

/// Values used when an event omits a field and no prior value exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressDefaults {
    /// `watched_seconds` of a new chapter/video entry.
    pub watched_seconds: u32,
    /// `total_seconds` of a new chapter/video entry.
    pub total_seconds: u32,
    /// `score` of a new quiz entry.
    pub score: u32,
    /// `passed` of a new quiz entry.
    pub passed: bool,
    /// `attempts` of a new quiz entry when the event carries none.
    pub first_quiz_attempts: u32,
    /// Stand-in for a content-item or chapter count of zero.
    pub fallback_total: u32,
}

pub const PROGRESS_DEFAULTS: ProgressDefaults = ProgressDefaults {
    watched_seconds: 0,
    total_seconds: 0,
    score: 0,
    passed: false,
    first_quiz_attempts: 1,
    fallback_total: 1,
};

//
// ─── ITEM-BASED PROGRESS ───────────────────────────────────────────────────────
//

/// Merge one item progress event into an enrollment.
///
/// - Upserts the `(item_index, kind)` entry; fields absent from the event keep
///   their previous value (or the default for a new entry).
/// - Moves `last_visited_content` forward, never back.
/// - Recomputes `progress = round(100 * completed / total_items)` and couples
///   `completed` to it. The first `completed_at` is kept for good.
///
/// A `total_items` of zero is treated as a single-item course.
///
/// # Errors
///
/// - `NotEnrolled` when `existing` is `None`.
/// - `InvalidContentReference` for a negative or oversized item index.
/// - `SchemeMismatch` when the enrollment tracks chapter-based progress.
pub fn apply_item_progress(
    total_items: u32,
    existing: Option<&Enrollment>,
    event: &ItemProgressEvent,
    now: DateTime<Utc>,
) -> Result<Enrollment, ReconcileError> {
    let enrollment = existing.ok_or(ReconcileError::NotEnrolled)?;
    let item_index = content_index(event.item_index, "item index")?;

    let mut next = enrollment.clone();
    let completed_count = {
        let (last_visited, items) = next.scheme.item_tracking_mut()?;
        merge_item(items, item_index, event, now);
        *last_visited = (*last_visited).max(item_index);
        items.iter().filter(|item| item.completed).count()
    };

    let done = u64::try_from(completed_count).unwrap_or(u64::MAX);
    next.progress = completion_percent(done, total_items);
    next.settle_completion(now);
    next.touch(now);
    Ok(next)
}

fn merge_item(
    items: &mut Vec<ItemProgress>,
    item_index: u32,
    event: &ItemProgressEvent,
    now: DateTime<Utc>,
) {
    let existing = items
        .iter()
        .position(|item| item.matches(item_index, event.kind));
    let is_new = existing.is_none();
    let slot = match existing {
        Some(slot) => slot,
        None => {
            items.push(fresh_item(item_index, event.kind));
            items.len() - 1
        }
    };
    let entry = &mut items[slot];

    match &mut entry.detail {
        ItemDetail::Chapter {
            watched_seconds,
            total_seconds,
        } => {
            merge_watch(watched_seconds, total_seconds, event);
        }
        ItemDetail::Video {
            watched_seconds,
            total_seconds,
            video_completed,
        } => {
            merge_watch(watched_seconds, total_seconds, event);
            *video_completed = event.completed;
        }
        ItemDetail::Quiz {
            score,
            passed,
            attempts,
        } => {
            if let Some(value) = event.score {
                *score = value;
            }
            if let Some(value) = event.passed {
                *passed = value;
            }
            match event.attempts {
                Some(value) => *attempts = value,
                None if is_new => *attempts = PROGRESS_DEFAULTS.first_quiz_attempts,
                None => {}
            }
        }
    }

    if event.completed {
        if !entry.completed || entry.completed_at.is_none() {
            entry.completed_at = Some(now);
        }
        entry.completed = true;
    } else {
        entry.completed = false;
        entry.completed_at = None;
    }
}

fn merge_watch(watched_seconds: &mut u32, total_seconds: &mut u32, event: &ItemProgressEvent) {
    if let Some(value) = event.watched_seconds {
        *watched_seconds = value;
    }
    if let Some(value) = event.total_seconds {
        *total_seconds = value;
    }
}

fn fresh_item(item_index: u32, kind: ContentKind) -> ItemProgress {
    let detail = match kind {
        ContentKind::Chapter => ItemDetail::Chapter {
            watched_seconds: PROGRESS_DEFAULTS.watched_seconds,
            total_seconds: PROGRESS_DEFAULTS.total_seconds,
        },
        ContentKind::Video => ItemDetail::Video {
            watched_seconds: PROGRESS_DEFAULTS.watched_seconds,
            total_seconds: PROGRESS_DEFAULTS.total_seconds,
            video_completed: false,
        },
        ContentKind::Quiz => ItemDetail::Quiz {
            score: PROGRESS_DEFAULTS.score,
            passed: PROGRESS_DEFAULTS.passed,
            attempts: 0,
        },
    };
    ItemProgress {
        item_index,
        completed: false,
        completed_at: None,
        detail,
    }
}

//
// ─── CHAPTER-BASED PROGRESS (LEGACY) ───────────────────────────────────────────
//

/// Record navigation to a chapter on a simple chapter-list course.
///
/// `progress = round(clamp(last_visited_chapter, 0, total) / total * 100)`;
/// item progress is not touched. The chapter pointer follows the navigation,
/// backwards included.
///
/// # Errors
///
/// - `NotEnrolled` when `existing` is `None`.
/// - `SchemeMismatch` when the enrollment tracks item-based progress.
pub fn apply_chapter_navigation(
    total_chapters: u32,
    existing: Option<&Enrollment>,
    last_visited_chapter: i64,
    now: DateTime<Utc>,
) -> Result<Enrollment, ReconcileError> {
    let enrollment = existing.ok_or(ReconcileError::NotEnrolled)?;
    let total = effective_total(total_chapters);
    let safe_index = u32::try_from(last_visited_chapter.clamp(0, i64::from(total))).unwrap_or(total);

    let mut next = enrollment.clone();
    {
        let (last_visited, _) = next.scheme.chapter_tracking_mut()?;
        *last_visited = safe_index;
    }

    next.progress = completion_percent(u64::from(safe_index), total);
    next.settle_completion(now);
    next.touch(now);
    Ok(next)
}

/// Record a legacy quiz result for a chapter.
///
/// Upserts the result keyed by `chapter_index`, unlocks the next chapter when
/// passed, and recomputes `progress = round((last_visited_chapter + 1) / total * 100)`
/// when the chapter count is known. An unknown or zero count leaves progress as is.
///
/// # Errors
///
/// - `NotEnrolled` when `existing` is `None`.
/// - `InvalidContentReference` for a negative chapter index.
/// - `SchemeMismatch` when the enrollment tracks item-based progress.
pub fn apply_quiz_result(
    total_chapters: Option<u32>,
    existing: Option<&Enrollment>,
    submission: &QuizSubmission,
    now: DateTime<Utc>,
) -> Result<Enrollment, ReconcileError> {
    let enrollment = existing.ok_or(ReconcileError::NotEnrolled)?;
    let chapter_index = content_index(submission.chapter_index, "chapter index")?;

    let mut next = enrollment.clone();
    let last_visited = {
        let (last_visited, results) = next.scheme.chapter_tracking_mut()?;
        let result = QuizResult {
            chapter_index,
            score: submission.score,
            passed: submission.passed,
            taken_at: now,
        };
        match results
            .iter_mut()
            .find(|r| r.chapter_index == chapter_index)
        {
            Some(slot) => *slot = result,
            None => results.push(result),
        }

        if submission.passed {
            let unlocked = chapter_index.saturating_add(1);
            if unlocked > *last_visited {
                *last_visited = unlocked;
            }
        }
        *last_visited
    };

    if let Some(total) = total_chapters.filter(|total| *total > 0) {
        next.progress = completion_percent(u64::from(last_visited) + 1, total);
        next.settle_completion(now);
    }
    next.touch(now);
    Ok(next)
}

//
// ─── EXTERNAL UPDATES ──────────────────────────────────────────────────────────
//

/// Add minutes to the cumulative time spent. Saturates instead of wrapping.
///
/// # Errors
///
/// Returns `NotEnrolled` when `existing` is `None`.
pub fn add_time_spent(
    existing: Option<&Enrollment>,
    minutes: u32,
    now: DateTime<Utc>,
) -> Result<Enrollment, ReconcileError> {
    let enrollment = existing.ok_or(ReconcileError::NotEnrolled)?;
    let mut next = enrollment.clone();
    next.time_spent = next.time_spent.saturating_add(minutes);
    next.touch(now);
    Ok(next)
}

/// Mark the certificate of a completed enrollment as issued.
///
/// Called by the certificate process, never by progress reconciliation.
///
/// # Errors
///
/// - `NotEnrolled` when `existing` is `None`.
/// - `NotCompleted` when the enrollment has not reached 100%.
/// - `InvalidContentReference` for a blank certificate id.
pub fn issue_certificate(
    existing: Option<&Enrollment>,
    certificate_id: &str,
    now: DateTime<Utc>,
) -> Result<Enrollment, ReconcileError> {
    let enrollment = existing.ok_or(ReconcileError::NotEnrolled)?;
    if !enrollment.completed() {
        return Err(ReconcileError::NotCompleted);
    }
    let certificate_id = certificate_id.trim();
    if certificate_id.is_empty() {
        return Err(ReconcileError::invalid_content("certificate id cannot be empty"));
    }

    let mut next = enrollment.clone();
    next.certificate_issued = true;
    next.certificate_id = Some(certificate_id.to_owned());
    next.touch(now);
    Ok(next)
}

//
// ─── HELPERS ───────────────────────────────────────────────────────────────────
//

/// `round(100 * done / total)` clamped to `0..=100`, rounding halves up.
///
/// A `total` of zero counts as `PROGRESS_DEFAULTS.fallback_total`.
#[must_use]
pub fn completion_percent(done: u64, total: u32) -> u8 {
    let total = u64::from(effective_total(total));
    let percent = done
        .saturating_mul(200)
        .saturating_add(total)
        / total.saturating_mul(2);
    u8::try_from(percent.min(100)).unwrap_or(100)
}

fn effective_total(total: u32) -> u32 {
    if total == 0 {
        PROGRESS_DEFAULTS.fallback_total
    } else {
        total
    }
}

fn content_index(raw: i64, what: &str) -> Result<u32, ReconcileError> {
    if raw < 0 {
        return Err(ReconcileError::invalid_content(format!(
            "{what} cannot be negative: {raw}"
        )));
    }
    u32::try_from(raw)
        .map_err(|_| ReconcileError::invalid_content(format!("{what} out of range: {raw}")))
}

//
// ─── TESTS ─────────────────────────────────────────────────────────────────────
//
