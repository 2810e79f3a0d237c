use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::snapshot::CollectionSnapshot;

/// Result alias used across the explorer.
pub type Result<T> = std::result::Result<T, ExplorerError>;

/// Every failure an interaction can surface.
///
/// None of these are retried automatically. Pulls and saves are re-triggered
/// by the user.
#[derive(Debug, Error)]
pub enum ExplorerError {
    /// The remote collection could not be reached or refused the credentials.
    #[error("cannot reach data source '{collection}': {reason}")]
    Connection { collection: String, reason: String },

    /// The pull succeeded but the collection holds no documents.
    ///
    /// Informational only. The captured (empty) snapshot is carried along so the
    /// caller can keep going with it.
    #[error("collection '{collection}' has no documents")]
    EmptyCollection {
        collection: String,
        snapshot: CollectionSnapshot,
    },

    #[error("snapshot not found: {}", path.display())]
    NotFound { path: PathBuf },

    #[error("snapshot {} is corrupt: {reason}", path.display())]
    CorruptSnapshot { path: PathBuf, reason: String },

    /// Saving failed. No snapshot file was left behind.
    #[error("failed to write snapshot into {}: {source}", dir.display())]
    Write {
        dir: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("unknown metric '{requested}'; valid metrics: {}", valid.join(", "))]
    UnknownMetric {
        requested: String,
        valid: Vec<String>,
    },

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl ExplorerError {
    /// True for conditions that should be shown as an empty state rather than a failure.
    pub fn is_informational(&self) -> bool {
        matches!(self, ExplorerError::EmptyCollection { .. })
    }

    /// Recover the snapshot from a non-fatal empty pull.
    pub fn into_empty_snapshot(self) -> std::result::Result<CollectionSnapshot, ExplorerError> {
        match self {
            ExplorerError::EmptyCollection { snapshot, .. } => Ok(snapshot),
            other => Err(other),
        }
    }
}
