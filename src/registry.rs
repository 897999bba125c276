//! Item registry
//!
//! Owns the ordered list of uploaded images and at most one compression result
//! per image. Everything is keyed by `ItemId`, never by name or position: two
//! uploads can share a name and positions shift when an item is removed.

use crate::compression::OutputFormat;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

static NEXT_ITEM_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ItemId(u64);

impl ItemId {
    fn next() -> Self {
        Self(NEXT_ITEM_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl std::fmt::Display for ItemId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// One image the user added. Never mutated after creation.
#[derive(Debug, Clone)]
pub struct UploadItem {
    pub id: ItemId,
    pub name: String,
    pub media_type: String,
    pub data: Arc<[u8]>,
}

impl UploadItem {
    pub fn new(name: impl Into<String>, media_type: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            id: ItemId::next(),
            name: name.into(),
            media_type: media_type.into(),
            data: data.into(),
        }
    }

    pub fn size(&self) -> u64 {
        self.data.len() as u64
    }
}

#[derive(Debug, Clone)]
pub struct CompressionResult {
    pub item: ItemId,
    pub data: Arc<[u8]>,
    pub format: OutputFormat,
}

impl CompressionResult {
    pub fn size(&self) -> u64 {
        self.data.len() as u64
    }
}

/// Aggregate sizes, always derived from the current registry contents.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SizeTotals {
    pub original: u64,
    pub compressed: u64,
}

impl SizeTotals {
    pub fn saved_percent(&self) -> f64 {
        if self.original == 0 {
            return 0.0;
        }
        (self.original as f64 - self.compressed as f64) / self.original as f64 * 100.0
    }

    /// Percent saved with one decimal, "0.0" for an empty registry.
    pub fn saved_percent_label(&self) -> String {
        format!("{:.1}", self.saved_percent())
    }
}

#[derive(Debug, Default)]
pub struct Registry {
    items: Vec<UploadItem>,
    results: Vec<CompressionResult>,
    locked: bool,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, item: UploadItem) -> ItemId {
        let id = item.id;
        self.items.push(item);
        id
    }

    /// Remove an item and its result. Absent ids are a no-op.
    ///
    /// Returns `false` without touching anything while a run holds the lock.
    pub fn remove(&mut self, id: ItemId) -> bool {
        if self.locked {
            return false;
        }
        self.items.retain(|item| item.id != id);
        self.results.retain(|result| result.item != id);
        true
    }

    pub fn items(&self) -> &[UploadItem] {
        &self.items
    }

    pub fn item(&self, id: ItemId) -> Option<&UploadItem> {
        self.items.iter().find(|item| item.id == id)
    }

    pub fn ids(&self) -> Vec<ItemId> {
        self.items.iter().map(|item| item.id).collect()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn results(&self) -> &[CompressionResult] {
        &self.results
    }

    pub fn result_for(&self, id: ItemId) -> Option<&CompressionResult> {
        self.results.iter().find(|result| result.item == id)
    }

    /// Store a result, replacing the item's previous one in place.
    /// Results for items no longer in the registry are dropped.
    pub fn store_result(&mut self, result: CompressionResult) {
        if self.item(result.item).is_none() {
            return;
        }
        match self.results.iter_mut().find(|r| r.item == result.item) {
            Some(existing) => *existing = result,
            None => self.results.push(result),
        }
    }

    pub fn clear_result(&mut self, id: ItemId) {
        self.results.retain(|result| result.item != id);
    }

    pub fn clear_results(&mut self) {
        self.results.clear();
    }

    pub fn is_locked(&self) -> bool {
        self.locked
    }

    pub(crate) fn set_locked(&mut self, locked: bool) {
        self.locked = locked;
    }

    pub fn totals(&self) -> SizeTotals {
        SizeTotals {
            original: self.items.iter().map(UploadItem::size).sum(),
            compressed: self.results.iter().map(CompressionResult::size).sum(),
        }
    }
}
