//! Typed error type for the db crate.

use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DbError {
    #[error("record not found: {0}")]
    NotFound(Uuid),

    #[error("record already exists: {0}")]
    AlreadyExists(Uuid),
}
