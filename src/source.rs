//! Uniform access to the user collection, live or from a saved snapshot.
//!
//! Both paths produce the same [`CollectionSnapshot`] so normalization and
//! aggregation never care where the records came from.

use chrono::{DateTime, Utc};
use log::info;
use std::path::{Path, PathBuf};

use crate::error::{ExplorerError, Result};
use crate::record::Record;
use crate::saving;
use crate::snapshot::CollectionSnapshot;

/// An authenticated handle to one named document collection.
pub trait DocumentCollection {
    /// Collection name, used in logs and error messages.
    fn name(&self) -> &str;

    /// Every document in the collection, keyed, with its field map untouched.
    fn list_documents(&self) -> Result<Vec<Record>>;
}

/// Pull the whole collection now.
///
/// Nothing is persisted here; saving is a separate step in [`saving`].
/// An empty collection comes back as [`ExplorerError::EmptyCollection`],
/// which still carries the empty snapshot.
pub fn fetch_live(collection: &dyn DocumentCollection) -> Result<CollectionSnapshot> {
    fetch_live_at(collection, Utc::now())
}

/// [`fetch_live`] with an explicit capture time.
pub fn fetch_live_at(
    collection: &dyn DocumentCollection,
    captured_at: DateTime<Utc>,
) -> Result<CollectionSnapshot> {
    let records = collection.list_documents()?;
    info!(
        "pulled {} documents from collection '{}'",
        records.len(),
        collection.name()
    );

    let snapshot = CollectionSnapshot::new(captured_at, records);
    if snapshot.is_empty() {
        return Err(ExplorerError::EmptyCollection {
            collection: collection.name().to_string(),
            snapshot,
        });
    }
    Ok(snapshot)
}

/// Read a snapshot previously written by the snapshot store.
pub fn load_snapshot(path: &Path) -> Result<CollectionSnapshot> {
    saving::load_snapshot(path)
}

/// Where a dashboard interaction gets its records from.
pub enum Source<'a> {
    Live(&'a dyn DocumentCollection),
    Snapshot(PathBuf),
}

impl Source<'_> {
    pub fn acquire(&self) -> Result<CollectionSnapshot> {
        match self {
            Source::Live(collection) => fetch_live(*collection),
            Source::Snapshot(path) => load_snapshot(path),
        }
    }

    pub fn describe(&self) -> String {
        match self {
            Source::Live(collection) => format!("live collection '{}'", collection.name()),
            Source::Snapshot(path) => format!("snapshot {}", path.display()),
        }
    }
}
