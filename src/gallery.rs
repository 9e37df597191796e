//! Gallery reconciliation: one ordered collection over persisted and
//! pending items.
//!
//! Default primary policy: when no item is primary, the first item in
//! display order becomes primary. When several are, the first keeps it.
//! A primary requested by pending-upload metadata was set during the current
//! edit session and overrides the flag loaded with the persisted assets.
//!
//! Order ties: when a merged upload's intended `display_order` equals an
//! existing item's, the existing item stays first. Ties among uploads
//! break by pending id, never by completion order.
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use tracing::{debug, warn};

use crate::error::{ReconciliationError, UploadError};
use crate::model::{
    GalleryEntry, ItemId, MediaAsset, PendingId, UploadBatchResult, UploadFailure,
};
use crate::ordered_list::move_element;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GalleryItem {
    pub id: ItemId,
    /// Remote URL once uploaded, preview URI before.
    pub url: String,
    pub alt_text: String,
    pub is_primary: bool,
    pub display_order: u32,
}

impl From<MediaAsset> for GalleryItem {
    fn from(asset: MediaAsset) -> Self {
        Self {
            id: ItemId::Asset(asset.id),
            url: asset.url,
            alt_text: asset.alt_text,
            is_primary: asset.is_primary,
            display_order: asset.display_order,
        }
    }
}

/// Metadata the user attached to a pending upload before it was sent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PendingMetadata {
    pub alt_text: String,
    pub display_order: u32,
    pub is_primary: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Gallery {
    items: Vec<GalleryItem>,
}

/// Merged gallery plus the uploads that did not make it in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeOutcome {
    pub gallery: Gallery,
    pub failures: Vec<UploadFailure<PendingId>>,
}

impl Gallery {
    pub fn new() -> Self {
        Self::default()
    }

    /// Items are taken as given; call [`normalize_order`] before emitting.
    pub fn from_items(items: Vec<GalleryItem>) -> Self {
        Self { items }
    }

    pub fn from_assets(assets: Vec<MediaAsset>) -> Self {
        Self::from_items(assets.into_iter().map(GalleryItem::from).collect())
    }

    pub fn items(&self) -> &[GalleryItem] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn get(&self, id: &ItemId) -> Option<&GalleryItem> {
        self.items.iter().find(|item| &item.id == id)
    }

    pub fn position(&self, id: &ItemId) -> Option<usize> {
        self.items.iter().position(|item| &item.id == id)
    }

    pub fn primary(&self) -> Option<&GalleryItem> {
        self.items.iter().find(|item| item.is_primary)
    }

    /// Append `item` at the end of the display order.
    pub fn push(&mut self, mut item: GalleryItem) -> Result<(), ReconciliationError> {
        if self.get(&item.id).is_some() {
            return Err(ReconciliationError::DuplicateItem(item.id));
        }
        item.display_order = self.items.len() as u32;
        if item.is_primary {
            self.clear_primary();
        }
        self.items.push(item);
        Ok(())
    }

    pub fn remove(&mut self, id: &ItemId) -> Result<GalleryItem, ReconciliationError> {
        let index = self
            .position(id)
            .ok_or_else(|| ReconciliationError::NotFound(id.clone()))?;
        let removed = self.items.remove(index);
        self.sort_by_order();
        self.renumber();
        Ok(removed)
    }

    pub fn set_alt_text(&mut self, id: &ItemId, alt_text: impl Into<String>) -> Result<(), ReconciliationError> {
        let item = self
            .items
            .iter_mut()
            .find(|item| &item.id == id)
            .ok_or_else(|| ReconciliationError::NotFound(id.clone()))?;
        item.alt_text = alt_text.into();
        Ok(())
    }

    /// Move the item at display position `from` to `to` and renumber.
    pub fn move_item(&mut self, from: usize, to: usize) -> Result<(), ReconciliationError> {
        self.sort_by_order();
        move_element(&mut self.items, from, to)?;
        self.renumber();
        Ok(())
    }

    /// Metadata of every pending item, keyed by pending id.
    pub fn pending_metadata(&self) -> HashMap<PendingId, PendingMetadata> {
        self.items
            .iter()
            .filter_map(|item| {
                item.id.pending_id().map(|id| {
                    (
                        id,
                        PendingMetadata {
                            alt_text: item.alt_text.clone(),
                            display_order: item.display_order,
                            is_primary: item.is_primary,
                        },
                    )
                })
            })
            .collect()
    }

    /// Canonical rows for the gallery-metadata upsert.
    pub fn to_upsert_entries(&self) -> Vec<GalleryEntry> {
        normalize_order(self)
            .items
            .into_iter()
            .map(|item| GalleryEntry {
                url: item.url,
                alt_text: item.alt_text,
                is_primary: item.is_primary,
                display_order: item.display_order,
            })
            .collect()
    }

    fn sort_by_order(&mut self) {
        self.items.sort_by_key(|item| item.display_order);
    }

    fn renumber(&mut self) {
        for (index, item) in self.items.iter_mut().enumerate() {
            item.display_order = index as u32;
        }
    }

    fn clear_primary(&mut self) {
        for item in &mut self.items {
            item.is_primary = false;
        }
    }
}

/// Stable-sort by `display_order`, renumber to `0..n` and apply the default
/// primary policy.
pub fn normalize_order(gallery: &Gallery) -> Gallery {
    let mut normalized = gallery.clone();
    normalized.sort_by_order();
    normalized.renumber();

    let mut seen_primary = false;
    for item in &mut normalized.items {
        if item.is_primary {
            if seen_primary {
                warn!(id = %item.id, "extra primary flag cleared");
                item.is_primary = false;
            }
            seen_primary = true;
        }
    }
    if !seen_primary {
        if let Some(first) = normalized.items.first_mut() {
            debug!(id = %first.id, "no primary set; first item becomes primary");
            first.is_primary = true;
        }
    }
    normalized
}

/// Mark `id` as the single primary item. The input is left untouched.
pub fn set_primary(gallery: &Gallery, id: &ItemId) -> Result<Gallery, ReconciliationError> {
    if gallery.get(id).is_none() {
        return Err(ReconciliationError::NotFound(id.clone()));
    }
    let mut updated = gallery.clone();
    for item in &mut updated.items {
        item.is_primary = &item.id == id;
    }
    Ok(updated)
}

/// Merge successful uploads into `existing` using the metadata captured
/// before the uploads began. Failed uploads stay out of the gallery and are
/// returned in [`MergeOutcome::failures`]. The result is normalized.
pub fn merge(
    existing: &Gallery,
    batch: &UploadBatchResult<PendingId>,
    metadata: &HashMap<PendingId, PendingMetadata>,
) -> Result<MergeOutcome, ReconciliationError> {
    let mut seen = HashSet::new();
    for item in existing.items() {
        if !seen.insert(item.id.clone()) {
            return Err(ReconciliationError::DuplicateItem(item.id.clone()));
        }
    }

    let mut requested: Vec<PendingId> = metadata
        .iter()
        .filter(|(_, meta)| meta.is_primary)
        .map(|(id, _)| *id)
        .collect();
    requested.sort();
    if let [first, second, ..] = requested.as_slice() {
        return Err(ReconciliationError::ConflictingPrimary(*first, *second));
    }

    // Completion order must not leak into the result.
    let mut successes: Vec<_> = batch.successful.iter().collect();
    successes.sort_by_key(|s| {
        let order = metadata.get(&s.key).map_or(u32::MAX, |m| m.display_order);
        (order, s.key)
    });

    let mut items = existing.items.clone();
    let mut new_primary = None;
    for success in successes {
        let id = ItemId::Pending(success.key);
        if !seen.insert(id.clone()) {
            return Err(ReconciliationError::DuplicateItem(id));
        }
        let meta = match metadata.get(&success.key) {
            Some(meta) => meta.clone(),
            None => {
                warn!(id = %success.key, "upload without metadata appended at the end");
                PendingMetadata {
                    display_order: u32::MAX,
                    ..PendingMetadata::default()
                }
            }
        };
        if meta.is_primary {
            new_primary = Some(id.clone());
        }
        items.push(GalleryItem {
            id,
            url: success.url.clone(),
            alt_text: meta.alt_text,
            is_primary: false,
            display_order: meta.display_order,
        });
    }

    let mut gallery = Gallery::from_items(items);
    if let Some(id) = new_primary {
        gallery = set_primary(&gallery, &id)?;
    }
    let gallery = normalize_order(&gallery);

    let failures = batch.failed.clone();
    if !failures.is_empty() {
        warn!(failed = failures.len(), "uploads excluded from gallery");
    }
    Ok(MergeOutcome { gallery, failures })
}

impl MergeOutcome {
    pub fn errors(&self) -> impl Iterator<Item = (&PendingId, &UploadError)> {
        self.failures.iter().map(|f| (&f.key, &f.error))
    }
}
