#![forbid(unsafe_code)]

pub mod repository;
pub mod sqlite;

pub use repository::{
    EnrollmentRepository, InMemoryRepository, NewEnrollmentRecord, Storage, StorageError,
};
