#![forbid(unsafe_code)]

pub mod error;
pub mod model;
pub mod reconcile;
pub mod time;

pub use error::{EnrollmentError, IdError, ReconcileError};
pub use time::Clock;
