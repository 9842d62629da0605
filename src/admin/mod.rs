//! Admin operations over the identity store and bucket metadata,
//! shared by the CLI and the admin REST surface.

pub mod bucket;
pub mod rest;

use crate::iam::AdminError;
use crate::storage::StorageError;
use thiserror::Error;

/// Failures from admin operations that cross the identity store and the
/// storage backend.
#[derive(Debug, Error)]
pub enum AdminOpError {
    #[error("{0}")]
    Identity(#[from] AdminError),

    #[error("{0}")]
    Storage(#[from] StorageError),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}
