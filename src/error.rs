//! Error taxonomy shared by the upload, gallery and ordering layers.
//!
//! Validation errors surface synchronously at file selection. Transport,
//! remote-rejection and decode errors are captured per item inside an
//! [`UploadBatchResult`](crate::model::UploadBatchResult) and never cross
//! the batch boundary. Reconciliation errors signal caller misuse.
use serde::Serialize;
use thiserror::Error;

use crate::model::{ItemId, PendingId};

/// A file rejected by the [`UploadPolicy`](crate::registry::UploadPolicy)
/// before any network call was made.
#[derive(Debug, Clone, Error, PartialEq, Eq, Serialize)]
pub enum ValidationError {
    #[error("{name} is empty")]
    Empty { name: String },
    #[error("{name} is {size} bytes, limit is {limit}")]
    TooLarge { name: String, size: u64, limit: u64 },
    #[error("{name} has unsupported type {mime}")]
    UnsupportedType { name: String, mime: String },
}

/// Per-item upload failure.
#[derive(Debug, Clone, Error, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum UploadError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("transport error: {message}")]
    Transport { message: String },
    #[error("upload rejected ({}): {message}", status_label(.status))]
    RemoteRejection { status: Option<u16>, message: String },
    #[error("invalid upload response: {message}")]
    Decode { message: String },
    #[error("invalid target container: {path:?}")]
    InvalidContainer { path: String },
}

impl UploadError {
    pub fn transport(err: impl std::fmt::Display) -> Self {
        UploadError::Transport {
            message: err.to_string(),
        }
    }

    pub fn decode(message: impl Into<String>) -> Self {
        UploadError::Decode {
            message: message.into(),
        }
    }
}

fn status_label(status: &Option<u16>) -> String {
    status.map_or_else(|| "no status".to_string(), |s| s.to_string())
}

/// Failure of a gallery-metadata upsert or a reorder call.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PersistError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("persistence rejected ({status}): {message}")]
    RemoteRejection { status: u16, message: String },
    #[error("invalid persistence response: {0}")]
    Decode(String),
}

/// An invariant could not be satisfied. Indicates misuse, not a runtime
/// condition.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ReconciliationError {
    #[error("item {0} is not in the gallery")]
    NotFound(ItemId),
    #[error("item {0} appears more than once")]
    DuplicateItem(ItemId),
    #[error("pending uploads {0} and {1} both request primary")]
    ConflictingPrimary(PendingId, PendingId),
    #[error(transparent)]
    IndexOutOfBounds(#[from] IndexOutOfBounds),
}

#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
#[error("index {index} out of bounds for {len} items")]
pub struct IndexOutOfBounds {
    pub index: usize,
    pub len: usize,
}

/// Misuse of an [`OrderedList`](crate::ordered_list::OrderedList).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum OrderError {
    #[error(transparent)]
    IndexOutOfBounds(#[from] IndexOutOfBounds),
    #[error("ordered list has been disposed")]
    Disposed,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum IdError {
    #[error("id must be non-empty")]
    Empty,
    #[error("server id {0:?} uses the reserved pending prefix")]
    ReservedPrefix(String),
    #[error("malformed pending id {0:?}")]
    MalformedPending(String),
}

/// Failure of [`GalleryEditor::save`](crate::editor::GalleryEditor::save).
#[derive(Debug, Error)]
pub enum SaveError {
    #[error("editor has been torn down")]
    Disposed,
    #[error(transparent)]
    Upload(#[from] UploadError),
    #[error(transparent)]
    Reconciliation(#[from] ReconciliationError),
    #[error("gallery metadata was not saved: {0}")]
    Persist(#[from] PersistError),
}
