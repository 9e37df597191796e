//! One entity form's gallery: selection, editing and the save transaction.
//!
//! `save` borrows the editor mutably for its whole duration, so a teardown
//! cannot race an in-flight save. Dropping the save future abandons the
//! outstanding uploads: items still marked `Uploading` are resubmitted by
//! the next save, and items that finished keep their remote URL on the
//! [`PendingUpload`] so the next save merges them without uploading again.
//! Merge preconditions are checked before any upload starts.
use std::collections::HashSet;
use std::fmt::Write as _;
use std::sync::Arc;
use tracing::{info, instrument, warn};

use crate::backend::GalleryStore;
use crate::container::TargetContainer;
use crate::error::{ReconciliationError, SaveError, UploadError, ValidationError};
use crate::gallery::{self, Gallery, GalleryItem};
use crate::model::{ItemId, MediaAsset, PendingId, PendingUpload, SourceFile, UploadBatchResult};
use crate::registry::PendingUploadRegistry;
use crate::upload::BatchUploadOrchestrator;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedUpload {
    pub pending_id: PendingId,
    pub file_name: String,
    pub error: UploadError,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    Complete,
    /// Some uploads failed; everything else was saved.
    Partial { uploaded: usize, failed: usize },
}

#[derive(Debug, Clone)]
pub struct SaveReport {
    /// The gallery as the server stored it.
    pub gallery: Gallery,
    pub failures: Vec<FailedUpload>,
    pub outcome: SaveOutcome,
}

impl SaveReport {
    /// One message covering every failed upload, `None` when all succeeded.
    pub fn notice(&self) -> Option<String> {
        let SaveOutcome::Partial { uploaded, failed } = self.outcome else {
            return None;
        };
        let mut notice = format!(
            "Saved with {} of {} uploads failing:",
            failed,
            uploaded + failed
        );
        for failure in &self.failures {
            let _ = write!(notice, " {}: {};", failure.file_name, failure.error);
        }
        Some(notice.trim_end_matches(';').to_string())
    }
}

pub struct GalleryEditor {
    collection: String,
    placeholder: TargetContainer,
    registry: PendingUploadRegistry,
    orchestrator: BatchUploadOrchestrator,
    store: Arc<dyn GalleryStore>,
    gallery: Gallery,
    pending: Vec<PendingUpload>,
    disposed: bool,
}

impl GalleryEditor {
    /// `collection` is the logical container root (`dishes`). Files picked
    /// before the parent exists target a placeholder container until save.
    pub fn new(
        collection: impl Into<String>,
        registry: PendingUploadRegistry,
        orchestrator: BatchUploadOrchestrator,
        store: Arc<dyn GalleryStore>,
    ) -> Result<Self, UploadError> {
        let collection = collection.into();
        let placeholder = TargetContainer::for_parent(&collection, None)?;
        Ok(Self {
            collection,
            placeholder,
            registry,
            orchestrator,
            store,
            gallery: Gallery::new(),
            pending: Vec::new(),
            disposed: false,
        })
    }

    /// Replace the persisted part of the gallery. Pending items are kept
    /// after the loaded assets.
    pub fn load(&mut self, assets: Vec<MediaAsset>) {
        let pending: Vec<GalleryItem> = self
            .gallery
            .items()
            .iter()
            .filter(|item| item.id.is_pending())
            .cloned()
            .collect();
        let mut gallery = gallery::normalize_order(&Gallery::from_assets(assets));
        for item in pending {
            if let Err(err) = gallery.push(item) {
                warn!(%err, "pending item dropped on load");
            }
        }
        self.gallery = gallery;
    }

    pub fn gallery(&self) -> &Gallery {
        &self.gallery
    }

    pub fn pending_uploads(&self) -> &[PendingUpload] {
        &self.pending
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    /// Validate and stage `file`. Rejected files never enter the gallery.
    pub fn select_file(&mut self, file: SourceFile) -> Result<PendingId, ValidationError> {
        let upload = self
            .registry
            .create_pending_upload(file, self.placeholder.clone())?;
        let id = upload.id;
        let item = GalleryItem {
            id: ItemId::Pending(id),
            url: upload.preview.url.clone(),
            alt_text: String::new(),
            is_primary: false,
            display_order: 0,
        };
        if let Err(err) = self.gallery.push(item) {
            warn!(%err, "pending id already in gallery");
        }
        self.pending.push(upload);
        Ok(id)
    }

    pub fn set_alt_text(&mut self, id: &ItemId, alt_text: impl Into<String>) -> Result<(), ReconciliationError> {
        self.gallery.set_alt_text(id, alt_text)
    }

    pub fn set_primary(&mut self, id: &ItemId) -> Result<(), ReconciliationError> {
        self.gallery = gallery::set_primary(&self.gallery, id)?;
        Ok(())
    }

    pub fn move_item(&mut self, from: usize, to: usize) -> Result<(), ReconciliationError> {
        self.gallery.move_item(from, to)
    }

    /// Drop an item from the draft. A pending item's preview is revoked.
    pub fn remove(&mut self, id: &ItemId) -> Result<GalleryItem, ReconciliationError> {
        let removed = self.gallery.remove(id)?;
        if let ItemId::Pending(pending_id) = id {
            self.registry.cleanup_id(pending_id);
            self.pending.retain(|p| p.id != *pending_id);
        }
        Ok(removed)
    }

    /// Upload pending files into `collection/parent_id`, merge them and
    /// upsert the gallery metadata of that same `collection/parent_id`.
    /// Failed uploads stay in the draft for a retry and are reported, the
    /// rest is committed.
    #[instrument(skip_all, fields(collection = %self.collection, parent_id = %parent_id))]
    pub async fn save(&mut self, parent_id: &str) -> Result<SaveReport, SaveError> {
        if self.disposed {
            return Err(SaveError::Disposed);
        }
        let container = TargetContainer::for_parent(&self.collection, Some(parent_id))?;
        for upload in &mut self.pending {
            if upload.container.is_placeholder() {
                upload.container = container.clone();
            }
        }

        let metadata = self.gallery.pending_metadata();
        gallery::merge(&self.gallery, &UploadBatchResult::default(), &metadata)?;
        let batch = self
            .orchestrator
            .process_pending_uploads(&mut self.pending, |_, _| {}, |_, _| {})
            .await;

        let submitted: HashSet<PendingId> = batch
            .successful
            .iter()
            .map(|s| s.key)
            .chain(batch.failed.iter().map(|f| f.key))
            .collect();
        let existing = Gallery::from_items(
            self.gallery
                .items()
                .iter()
                .filter(|item| item.id.pending_id().map_or(true, |id| !submitted.contains(&id)))
                .cloned()
                .collect(),
        );
        let merged = gallery::merge(&existing, &batch, &metadata)?;

        // Uploaded items now point at remote URLs; their previews go.
        for success in &batch.successful {
            self.registry.cleanup_id(&success.key);
        }
        let registry = &self.registry;
        self.pending.retain(|p| registry.is_live(&p.id));

        let failures: Vec<FailedUpload> = merged
            .failures
            .iter()
            .map(|f| FailedUpload {
                pending_id: f.key,
                file_name: self
                    .pending
                    .iter()
                    .find(|p| p.id == f.key)
                    .map_or_else(|| f.key.to_string(), |p| p.source.name.clone()),
                error: f.error.clone(),
            })
            .collect();
        let failed_items: Vec<GalleryItem> = failures
            .iter()
            .filter_map(|f| self.gallery.get(&ItemId::Pending(f.pending_id)).cloned())
            .collect();

        let entries = merged.gallery.to_upsert_entries();
        let stored = match self.store.upsert_gallery(container.as_str(), &entries).await {
            Ok(stored) => stored,
            Err(err) => {
                warn!(%err, "gallery upsert failed; draft keeps uploaded items");
                self.gallery = merged.gallery;
                self.append(failed_items);
                return Err(err.into());
            }
        };

        let saved = gallery::normalize_order(&Gallery::from_assets(stored));
        self.gallery = saved.clone();
        self.append(failed_items);

        let outcome = if failures.is_empty() {
            SaveOutcome::Complete
        } else {
            SaveOutcome::Partial {
                uploaded: batch.successful.len(),
                failed: failures.len(),
            }
        };
        info!(
            items = saved.len(),
            uploaded = batch.successful.len(),
            failed = failures.len(),
            "gallery saved"
        );
        Ok(SaveReport {
            gallery: saved,
            failures,
            outcome,
        })
    }

    /// Release every preview and refuse further saves.
    pub fn teardown(&mut self) {
        let released = self.registry.cleanup_all();
        self.pending.clear();
        self.disposed = true;
        info!(released, "gallery editor torn down");
    }

    fn append(&mut self, items: Vec<GalleryItem>) {
        for mut item in items {
            item.is_primary = false;
            if let Err(err) = self.gallery.push(item) {
                warn!(%err, "failed upload already in draft");
            }
        }
    }
}
