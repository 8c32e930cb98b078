use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::ReconcileError;

//
// ─── CONTENT KIND ──────────────────────────────────────────────────────────────
//

/// Kind of a course content item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentKind {
    Chapter,
    Video,
    Quiz,
}

impl ContentKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ContentKind::Chapter => "chapter",
            ContentKind::Video => "video",
            ContentKind::Quiz => "quiz",
        }
    }
}

impl fmt::Display for ContentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ContentKind {
    type Err = ReconcileError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "chapter" => Ok(ContentKind::Chapter),
            "video" => Ok(ContentKind::Video),
            "quiz" => Ok(ContentKind::Quiz),
            other => Err(ReconcileError::invalid_content(format!(
                "unknown content type: {other}"
            ))),
        }
    }
}

//
// ─── ITEM DETAIL ───────────────────────────────────────────────────────────────
//

/// Type-specific progress fields of an item.
///
/// The variant doubles as the item's content kind, so a chapter entry can
/// never carry quiz results and vice versa.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase", rename_all_fields = "camelCase")]
pub enum ItemDetail {
    Chapter {
        watched_seconds: u32,
        total_seconds: u32,
    },
    Video {
        watched_seconds: u32,
        total_seconds: u32,
        video_completed: bool,
    },
    Quiz {
        score: u32,
        passed: bool,
        attempts: u32,
    },
}

impl ItemDetail {
    #[must_use]
    pub fn kind(&self) -> ContentKind {
        match self {
            ItemDetail::Chapter { .. } => ContentKind::Chapter,
            ItemDetail::Video { .. } => ContentKind::Video,
            ItemDetail::Quiz { .. } => ContentKind::Quiz,
        }
    }
}

//
// ─── ITEM PROGRESS ─────────────────────────────────────────────────────────────
//

/// Progress of one content item inside an enrollment, keyed by `(item_index, kind)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemProgress {
    pub item_index: u32,
    pub completed: bool,
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub detail: ItemDetail,
}

impl ItemProgress {
    #[must_use]
    pub fn kind(&self) -> ContentKind {
        self.detail.kind()
    }

    #[must_use]
    pub fn key(&self) -> (u32, ContentKind) {
        (self.item_index, self.kind())
    }

    #[must_use]
    pub fn matches(&self, item_index: u32, kind: ContentKind) -> bool {
        self.item_index == item_index && self.kind() == kind
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_kind_parses_case_insensitively() {
        assert_eq!("Video".parse::<ContentKind>().unwrap(), ContentKind::Video);
        assert_eq!(" quiz ".parse::<ContentKind>().unwrap(), ContentKind::Quiz);
    }

    #[test]
    fn unknown_content_kind_is_an_invalid_reference() {
        let err = "lecture".parse::<ContentKind>().unwrap_err();
        assert!(matches!(err, ReconcileError::InvalidContentReference { .. }));
    }

    #[test]
    fn item_progress_serializes_with_type_tag() {
        let item = ItemProgress {
            item_index: 2,
            completed: true,
            completed_at: None,
            detail: ItemDetail::Quiz {
                score: 80,
                passed: true,
                attempts: 1,
            },
        };

        let json = serde_json::to_value(&item).unwrap();
        assert_eq!(json["type"], "quiz");
        assert_eq!(json["itemIndex"], 2);
        assert_eq!(json["score"], 80);

        let back: ItemProgress = serde_json::from_value(json).unwrap();
        assert_eq!(back, item);
    }
}
