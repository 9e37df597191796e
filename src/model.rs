use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use uuid::Uuid;

use crate::container::TargetContainer;
use crate::error::{IdError, UploadError};

/// Prefix carried by every locally generated id. Server ids may not use it.
pub const PENDING_PREFIX: &str = "pending:";

/// Server-assigned media asset id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AssetId(String);

impl AssetId {
    pub fn parse(raw: impl Into<String>) -> Result<Self, IdError> {
        let raw = raw.into();
        if raw.trim().is_empty() {
            return Err(IdError::Empty);
        }
        if raw.starts_with(PENDING_PREFIX) {
            return Err(IdError::ReservedPrefix(raw));
        }
        Ok(Self(raw))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for AssetId {
    type Error = IdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        AssetId::parse(value)
    }
}

impl From<AssetId> for String {
    fn from(id: AssetId) -> Self {
        id.0
    }
}

impl fmt::Display for AssetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Locally generated id of a not-yet-persisted upload. Renders as
/// `pending:<uuid>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PendingId(Uuid);

impl PendingId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn parse(raw: &str) -> Result<Self, IdError> {
        let rest = raw
            .strip_prefix(PENDING_PREFIX)
            .ok_or_else(|| IdError::MalformedPending(raw.to_string()))?;
        Uuid::parse_str(rest)
            .map(Self)
            .map_err(|_| IdError::MalformedPending(raw.to_string()))
    }
}

impl Default for PendingId {
    fn default() -> Self {
        Self::new()
    }
}

impl TryFrom<String> for PendingId {
    type Error = IdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        PendingId::parse(&value)
    }
}

impl From<PendingId> for String {
    fn from(id: PendingId) -> Self {
        id.to_string()
    }
}

impl fmt::Display for PendingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", PENDING_PREFIX, self.0)
    }
}

/// Id of a gallery item, which is either persisted or still pending.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ItemId {
    Asset(AssetId),
    Pending(PendingId),
}

impl ItemId {
    /// Dispatches on the id's syntax alone.
    pub fn parse(raw: &str) -> Result<Self, IdError> {
        if raw.starts_with(PENDING_PREFIX) {
            PendingId::parse(raw).map(ItemId::Pending)
        } else {
            AssetId::parse(raw).map(ItemId::Asset)
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, ItemId::Pending(_))
    }

    pub fn pending_id(&self) -> Option<PendingId> {
        match self {
            ItemId::Pending(id) => Some(*id),
            ItemId::Asset(_) => None,
        }
    }
}

impl From<AssetId> for ItemId {
    fn from(id: AssetId) -> Self {
        ItemId::Asset(id)
    }
}

impl From<PendingId> for ItemId {
    fn from(id: PendingId) -> Self {
        ItemId::Pending(id)
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ItemId::Asset(id) => id.fmt(f),
            ItemId::Pending(id) => id.fmt(f),
        }
    }
}

/// A file chosen by the user: bytes plus the name and mime type it came with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
    pub name: String,
    pub mime: String,
    pub bytes: Arc<[u8]>,
}

impl SourceFile {
    pub fn new(name: impl Into<String>, mime: impl Into<String>, bytes: impl Into<Arc<[u8]>>) -> Self {
        Self {
            name: name.into(),
            mime: mime.into(),
            bytes: bytes.into(),
        }
    }

    /// Read a file from disk, guessing its mime type from the extension.
    pub async fn from_path(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let path = path.as_ref();
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("upload")
            .to_string();
        let bytes = tokio::fs::read(path).await?;
        Ok(Self::new(name, content_type_for(path), bytes))
    }

    pub fn size(&self) -> u64 {
        self.bytes.len() as u64
    }
}

pub fn content_type_for(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|s| s.to_ascii_lowercase())
    {
        Some(ext) if ext == "jpg" || ext == "jpeg" => "image/jpeg",
        Some(ext) if ext == "png" => "image/png",
        Some(ext) if ext == "gif" => "image/gif",
        Some(ext) if ext == "webp" => "image/webp",
        Some(ext) if ext == "avif" => "image/avif",
        Some(ext) if ext == "svg" => "image/svg+xml",
        Some(ext) if ext == "mp4" => "video/mp4",
        Some(ext) if ext == "mov" => "video/quicktime",
        _ => "application/octet-stream",
    }
}

/// A revocable local preview URI for a selected file.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct PreviewHandle {
    pub url: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum UploadStatus {
    Queued,
    Uploading,
    Succeeded,
    Failed,
}

impl UploadStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            UploadStatus::Queued => "queued",
            UploadStatus::Uploading => "uploading",
            UploadStatus::Succeeded => "succeeded",
            UploadStatus::Failed => "failed",
        }
    }
}

/// A persisted gallery item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaAsset {
    pub id: AssetId,
    pub url: String,
    #[serde(default)]
    pub alt_text: String,
    #[serde(default)]
    pub is_primary: bool,
    pub display_order: u32,
}

/// A selected file waiting to be uploaded. Never persisted itself.
#[derive(Debug, Clone)]
pub struct PendingUpload {
    pub id: PendingId,
    pub source: SourceFile,
    pub preview: PreviewHandle,
    pub container: TargetContainer,
    pub status: UploadStatus,
    /// 0..=100
    pub progress: u8,
    pub error: Option<UploadError>,
    /// Set once the file is stored remotely. Survives an interrupted save.
    pub remote_url: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadSuccess<K> {
    pub key: K,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadFailure<K> {
    pub key: K,
    pub error: UploadError,
}

/// Outcome of a batch. Keyed by [`PendingId`] for pending uploads and by
/// submission index for raw file batches. Every submitted item appears in
/// exactly one of the two lists, in completion order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UploadBatchResult<K = PendingId> {
    pub successful: Vec<UploadSuccess<K>>,
    pub failed: Vec<UploadFailure<K>>,
}

impl<K> Default for UploadBatchResult<K> {
    fn default() -> Self {
        Self {
            successful: Vec::new(),
            failed: Vec::new(),
        }
    }
}

impl<K> UploadBatchResult<K> {
    pub fn len(&self) -> usize {
        self.successful.len() + self.failed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn all_succeeded(&self) -> bool {
        self.failed.is_empty()
    }
}

/// One row of a gallery-metadata upsert.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GalleryEntry {
    pub url: String,
    pub alt_text: String,
    pub is_primary: bool,
    pub display_order: u32,
}

/// One row of a reorder call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderAssignment<Id> {
    pub item_id: Id,
    pub new_order: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pending_ids_never_parse_as_assets() {
        let pending = PendingId::new();
        let rendered = pending.to_string();
        assert!(rendered.starts_with(PENDING_PREFIX));
        assert_eq!(ItemId::parse(&rendered).unwrap(), ItemId::Pending(pending));
        assert_eq!(
            AssetId::parse(rendered.clone()).unwrap_err(),
            IdError::ReservedPrefix(rendered)
        );
    }

    #[test]
    fn server_ids_parse_as_assets() {
        let id = ItemId::parse("42").unwrap();
        assert_eq!(id, ItemId::Asset(AssetId::parse("42").unwrap()));
        assert!(!id.is_pending());
        assert!(matches!(ItemId::parse(""), Err(IdError::Empty)));
        assert!(matches!(
            ItemId::parse("pending:not-a-uuid"),
            Err(IdError::MalformedPending(_))
        ));
    }

    #[test]
    fn media_asset_uses_camel_case_and_rejects_reserved_ids() {
        let asset: MediaAsset = serde_json::from_str(
            r#"{"id":"7","url":"https://cdn/a.jpg","altText":"a","isPrimary":true,"displayOrder":2}"#,
        )
        .unwrap();
        assert_eq!(asset.id.as_str(), "7");
        assert!(asset.is_primary);
        assert_eq!(asset.display_order, 2);

        let err = serde_json::from_str::<MediaAsset>(
            r#"{"id":"pending:x","url":"u","displayOrder":0}"#,
        );
        assert!(err.is_err());
    }

    #[test]
    fn content_type_from_extension() {
        assert_eq!(content_type_for(Path::new("a.JPG")), "image/jpeg");
        assert_eq!(content_type_for(Path::new("a.webp")), "image/webp");
        assert_eq!(content_type_for(Path::new("a")), "application/octet-stream");
    }
}
