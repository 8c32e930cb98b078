mod enrollment;
mod event;
mod ids;
mod item;

pub use enrollment::{
    Enrollment, INITIAL_VERSION, PersistedEnrollment, ProgressScheme, QuizResult, SchemeKind,
};
pub use event::{ItemProgressEvent, QuizSubmission};
pub use ids::{CourseId, EnrollmentId, UserId};
pub use item::{ContentKind, ItemDetail, ItemProgress};
