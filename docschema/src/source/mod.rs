//! The document-store client seam.
//!
//! Discovery only ever talks to these traits. A production driver wraps its
//! native client behind them; `memory` provides an in-process implementation
//! backed by documents held in memory or loaded from a dataset directory.

mod memory;

pub use memory::{MemoryClient, MemoryCollection, MemoryCursor, MemoryDatabase};

use crate::error::Result;
use bson::Document;
use std::sync::Arc;

/// A forward-only cursor over a collection's documents.
pub trait DocumentCursor {
    fn has_next(&mut self) -> Result<bool>;

    /// Next document, or `None` once exhausted.
    fn next(&mut self) -> Result<Option<Document>>;

    /// Advance past up to `n` documents without returning them.
    /// Returns how many were actually skipped.
    fn skip(&mut self, n: u64) -> Result<u64>;

    fn close(&mut self);
}

pub trait CollectionSource: Send + Sync {
    fn name(&self) -> &str;

    fn count_documents(&self) -> Result<u64>;

    /// Open a fresh cursor positioned at the first document.
    fn find(&self) -> Result<Box<dyn DocumentCursor + '_>>;

    /// Raw index descriptors as the store reports them:
    /// `{name, key: {path: direction, ..}, unique?}`.
    fn list_indexes(&self) -> Result<Vec<Document>>;

    /// The collection's declared validator, if any.
    fn validator(&self) -> Result<Option<Document>>;
}

pub trait DatabaseSource: Send + Sync {
    fn name(&self) -> &str;

    fn list_collection_names(&self) -> Result<Vec<String>>;

    /// Handle to a collection, or `None` when it does not exist.
    fn collection(&self, name: &str) -> Result<Option<Arc<dyn CollectionSource>>>;
}

pub trait DocumentClient: Send + Sync {
    fn list_database_names(&self) -> Result<Vec<String>>;

    /// Handle to a database. Document stores create databases lazily, so
    /// this does not fail for names that hold no collections yet.
    fn database(&self, name: &str) -> Result<Arc<dyn DatabaseSource>>;
}
