use std::collections::HashMap;

use async_trait::async_trait;
use course_core::model::CourseId;

/// Content counts of a course, as published by the course catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CourseOutline {
    /// Number of content items (chapters, videos, quizzes) in sequence.
    pub content_items: u32,
    /// Number of chapters, for courses tracked by chapter navigation.
    pub chapters: u32,
}

/// Source of course outlines. The enrollment service never owns course content.
#[async_trait]
pub trait CourseCatalog: Send + Sync {
    /// Outline of a course, or `None` for an unknown course.
    async fn outline(&self, course_id: &CourseId) -> Option<CourseOutline>;
}

/// Fixed catalog held in memory; used by tests and the CLI.
#[derive(Debug, Clone, Default)]
pub struct StaticCatalog {
    courses: HashMap<CourseId, CourseOutline>,
}

impl StaticCatalog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_course(mut self, course_id: CourseId, outline: CourseOutline) -> Self {
        self.insert(course_id, outline);
        self
    }

    pub fn insert(&mut self, course_id: CourseId, outline: CourseOutline) {
        self.courses.insert(course_id, outline);
    }
}

#[async_trait]
impl CourseCatalog for StaticCatalog {
    async fn outline(&self, course_id: &CourseId) -> Option<CourseOutline> {
        self.courses.get(course_id).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn static_catalog_knows_only_inserted_courses() {
        let outline = CourseOutline {
            content_items: 4,
            chapters: 2,
        };
        let catalog = StaticCatalog::new().with_course(CourseId::new("c1").unwrap(), outline);

        assert_eq!(
            catalog.outline(&CourseId::new("c1").unwrap()).await,
            Some(outline)
        );
        assert_eq!(catalog.outline(&CourseId::new("c2").unwrap()).await, None);
    }
}
