//! Local bookkeeping for selected files and their preview handles.
//!
//! Every preview handed out by a [`PreviewStore`] must be revoked exactly
//! once. The registry owns the table of live previews; revocation goes
//! through it so a second cleanup of the same upload is a no-op. Dropping
//! the registry revokes whatever is still live.
use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::container::TargetContainer;
use crate::error::ValidationError;
use crate::model::{PendingId, PendingUpload, PreviewHandle, SourceFile, UploadStatus};

/// Allocates and releases local preview URIs.
pub trait PreviewStore: Send + Sync {
    fn create(&self, file: &SourceFile) -> PreviewHandle;
    fn revoke(&self, handle: &PreviewHandle);
}

/// In-process preview store handing out `blob:` URIs. Keeps a revocation
/// count per URI.
#[derive(Debug, Default)]
pub struct MemoryPreviewStore {
    revocations: Mutex<HashMap<String, u32>>,
}

impl MemoryPreviewStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of times `url` has been revoked, `None` if it was never issued.
    pub fn revocation_count(&self, url: &str) -> Option<u32> {
        self.table().get(url).copied()
    }

    pub fn issued(&self) -> usize {
        self.table().len()
    }

    pub fn outstanding(&self) -> usize {
        self.table().values().filter(|n| **n == 0).count()
    }

    fn table(&self) -> std::sync::MutexGuard<'_, HashMap<String, u32>> {
        self.revocations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl PreviewStore for MemoryPreviewStore {
    fn create(&self, _file: &SourceFile) -> PreviewHandle {
        let url = format!("blob:local/{}", Uuid::new_v4());
        self.table().insert(url.clone(), 0);
        PreviewHandle { url }
    }

    fn revoke(&self, handle: &PreviewHandle) {
        if let Some(count) = self.table().get_mut(&handle.url) {
            *count += 1;
        }
    }
}

/// Caller-supplied limits checked before a preview is allocated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadPolicy {
    pub max_file_bytes: u64,
    /// Exact types (`image/png`) or wildcards (`image/*`).
    pub allowed_mime_types: Vec<String>,
}

impl UploadPolicy {
    pub fn validate(&self, file: &SourceFile) -> Result<(), ValidationError> {
        if file.size() == 0 {
            return Err(ValidationError::Empty {
                name: file.name.clone(),
            });
        }
        if file.size() > self.max_file_bytes {
            return Err(ValidationError::TooLarge {
                name: file.name.clone(),
                size: file.size(),
                limit: self.max_file_bytes,
            });
        }
        if !self.allows(&file.mime) {
            return Err(ValidationError::UnsupportedType {
                name: file.name.clone(),
                mime: file.mime.clone(),
            });
        }
        Ok(())
    }

    fn allows(&self, mime: &str) -> bool {
        let mime = mime.trim().to_ascii_lowercase();
        self.allowed_mime_types.iter().any(|allowed| {
            let allowed = allowed.trim().to_ascii_lowercase();
            match allowed.strip_suffix("/*") {
                Some(major) => mime
                    .split_once('/')
                    .map_or(false, |(m, _)| m == major),
                None => allowed == mime,
            }
        })
    }
}

pub struct PendingUploadRegistry {
    store: Arc<dyn PreviewStore>,
    policy: UploadPolicy,
    live: HashMap<PendingId, PreviewHandle>,
}

impl PendingUploadRegistry {
    pub fn new(store: Arc<dyn PreviewStore>, policy: UploadPolicy) -> Self {
        Self {
            store,
            policy,
            live: HashMap::new(),
        }
    }

    pub fn policy(&self) -> &UploadPolicy {
        &self.policy
    }

    /// Validate `file` and allocate its preview. On a validation failure
    /// nothing is allocated.
    pub fn create_pending_upload(
        &mut self,
        file: SourceFile,
        container: TargetContainer,
    ) -> Result<PendingUpload, ValidationError> {
        self.policy.validate(&file)?;
        let id = PendingId::new();
        let preview = self.store.create(&file);
        self.live.insert(id, preview.clone());
        debug!(%id, name = %file.name, size = file.size(), %container, "pending upload created");
        Ok(PendingUpload {
            id,
            source: file,
            preview,
            container,
            status: UploadStatus::Queued,
            progress: 0,
            error: None,
            remote_url: None,
            created_at: Utc::now(),
        })
    }

    /// Revoke the preview of `pending`. Returns false if it was already
    /// released.
    pub fn cleanup(&mut self, pending: &PendingUpload) -> bool {
        self.cleanup_id(&pending.id)
    }

    pub fn cleanup_id(&mut self, id: &PendingId) -> bool {
        match self.live.remove(id) {
            Some(handle) => {
                self.store.revoke(&handle);
                debug!(%id, "preview revoked");
                true
            }
            None => {
                warn!(%id, "cleanup of an already released pending upload ignored");
                false
            }
        }
    }

    /// Revoke every live preview. Returns how many were released.
    pub fn cleanup_all(&mut self) -> usize {
        let released = self.live.len();
        for (_, handle) in self.live.drain() {
            self.store.revoke(&handle);
        }
        if released > 0 {
            debug!(released, "released all previews");
        }
        released
    }

    pub fn is_live(&self, id: &PendingId) -> bool {
        self.live.contains_key(id)
    }

    pub fn live_previews(&self) -> usize {
        self.live.len()
    }
}

impl Drop for PendingUploadRegistry {
    fn drop(&mut self) {
        self.cleanup_all();
    }
}
