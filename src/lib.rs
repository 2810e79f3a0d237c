/*!
# User Data Explorer

Pulls the user collection of a cloud document database, keeps point-in-time
snapshots of it on disk, and turns either source into a table plus summary
statistics for a dashboard to render.

## Architecture

The data flows through four stages:

### Document Source
- **Live**: lists every document of the configured collection through the
  Firestore REST API ([`firestore`]).
- **Snapshot**: reads a previously saved dump ([`saving`]).
- Both produce the same [`snapshot::CollectionSnapshot`] ([`source`]).

### Snapshot Store
- One gzip-compressed bincode file per pull, named by capture timestamp
- Write-to-temp-then-rename, existing files are never rewritten
- Listing most recent first

### Record Normalizer
- Union of field names in first-seen order becomes the column set
- Missing fields become an explicit absent cell, distinct from stored nulls

### Aggregator
- Row/column counts, per-column present and null counts
- Value distributions, list-item distributions, numeric summaries
- Time-bucketed counts with caller-supplied bucket origin and width

Rendering is left to whatever consumes [`downloader::to_json`] or
[`downloader::to_csv`].

## Modules

- **config**: settings file and environment overrides
- **error**: error taxonomy shared by every stage
- **record**: field values and user records
- **snapshot**: the collection snapshot type
- **source**: source-agnostic acquisition (live or saved)
- **firestore**: REST client for the live collection
- **saving**: snapshot persistence with compression
- **normalize**: record normalization into a table
- **aggregate**: metric computation
- **downloader**: CSV and JSON export
*/

pub mod aggregate;
pub mod config;
pub mod downloader;
pub mod error;
pub mod firestore;
pub mod normalize;
pub mod record;
pub mod saving;
pub mod snapshot;
pub mod source;

pub use aggregate::{
    AggregateOptions, AggregateResult, MetricValue, TimeBucketing, aggregate, aggregate_with,
};
pub use config::ExplorerConfig;
pub use error::{ExplorerError, Result};
pub use firestore::FirestoreCollection;
pub use normalize::{Cell, NormalizedTable, normalize};
pub use record::{FieldValue, Record};
pub use saving::{SnapshotEntry, SnapshotStore, load_snapshot};
pub use snapshot::CollectionSnapshot;
pub use source::{DocumentCollection, Source, fetch_live};
