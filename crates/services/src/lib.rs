#![forbid(unsafe_code)]

pub mod catalog;
pub mod config;
pub mod enrollment_service;
pub mod error;

pub use course_core::Clock;

pub use catalog::{CourseCatalog, CourseOutline, StaticCatalog};
pub use config::ServiceConfig;
pub use enrollment_service::{EnrollmentService, ProgressView};
pub use error::{ConfigError, EnrollmentServiceError, ServicesInitError};
