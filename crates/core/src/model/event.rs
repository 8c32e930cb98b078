use serde::{Deserialize, Serialize};

use crate::model::item::ContentKind;

/// Notification that one content item's state changed.
///
/// Optional fields left as `None` keep whatever the enrollment already
/// recorded for the item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemProgressEvent {
    /// Position in the course's content sequence. Signed so that a negative
    /// index from a client is reported as an invalid reference.
    pub item_index: i64,
    #[serde(rename = "type")]
    pub kind: ContentKind,
    #[serde(default)]
    pub completed: bool,
    #[serde(default)]
    pub watched_seconds: Option<u32>,
    #[serde(default)]
    pub total_seconds: Option<u32>,
    #[serde(default)]
    pub score: Option<u32>,
    #[serde(default)]
    pub passed: Option<bool>,
    #[serde(default)]
    pub attempts: Option<u32>,
}

impl ItemProgressEvent {
    #[must_use]
    pub fn new(item_index: i64, kind: ContentKind, completed: bool) -> Self {
        Self {
            item_index,
            kind,
            completed,
            watched_seconds: None,
            total_seconds: None,
            score: None,
            passed: None,
            attempts: None,
        }
    }

    #[must_use]
    pub fn with_watch(mut self, watched_seconds: u32, total_seconds: u32) -> Self {
        self.watched_seconds = Some(watched_seconds);
        self.total_seconds = Some(total_seconds);
        self
    }

    #[must_use]
    pub fn with_quiz(mut self, score: u32, passed: bool) -> Self {
        self.score = Some(score);
        self.passed = Some(passed);
        self
    }

    #[must_use]
    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = Some(attempts);
        self
    }
}

/// Legacy quiz submission for chapter-based courses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuizSubmission {
    pub chapter_index: i64,
    pub score: u32,
    #[serde(default)]
    pub passed: bool,
}
