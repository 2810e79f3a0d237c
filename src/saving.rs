//! Snapshot persistence with compression.
//!
//! A snapshot file is gzip-compressed bincode of a small versioned envelope.
//! Files are named after the capture timestamp and are never rewritten: each
//! save creates a new file, written to a temporary file in the same directory
//! and renamed into place once fully flushed.

use bincode::{deserialize_from, serialize_into};
use chrono::{DateTime, NaiveDateTime, Utc};
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::error::{ExplorerError, Result};
use crate::snapshot::CollectionSnapshot;

pub const SNAPSHOT_EXTENSION: &str = ".snap.gz";
const FORMAT_VERSION: u32 = 1;
const NAME_FORMAT: &str = "%Y-%m-%dT%H-%M-%S%.3fZ";
const NAME_TIMESTAMP_LEN: usize = 24;
const MAX_NAME_ATTEMPTS: u32 = 1000;

#[derive(Serialize)]
struct SnapshotFileRef<'a> {
    format_version: u32,
    collection: &'a str,
    snapshot: &'a CollectionSnapshot,
}

#[derive(Deserialize)]
struct SnapshotFile {
    format_version: u32,
    #[allow(dead_code)]
    collection: String,
    snapshot: CollectionSnapshot,
}

/// One saved snapshot as seen from the directory listing.
///
/// `captured_at` comes from the file name and is truncated to milliseconds.
/// Snapshots captured within the same millisecond are ordered by save order,
/// not by their full-precision capture time. Load the file for the exact time.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SnapshotEntry {
    pub path: PathBuf,
    pub captured_at: DateTime<Utc>,
    sequence: u32,
}

/// Directory of saved snapshots for one collection.
#[derive(Clone, Debug)]
pub struct SnapshotStore {
    dir: PathBuf,
    collection: String,
}

impl SnapshotStore {
    pub fn new(dir: impl Into<PathBuf>, collection: impl Into<String>) -> Self {
        SnapshotStore {
            dir: dir.into(),
            collection: collection.into(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write `snapshot` as a new file and return its path.
    ///
    /// On failure no file, partial or temporary, is left in the directory.
    pub fn save(&self, snapshot: &CollectionSnapshot) -> Result<PathBuf> {
        let path = self.write_new_file(snapshot).map_err(|source| ExplorerError::Write {
            dir: self.dir.clone(),
            source,
        })?;
        info!(
            "saved snapshot of {} records to {}",
            snapshot.len(),
            path.display()
        );
        Ok(path)
    }

    fn write_new_file(&self, snapshot: &CollectionSnapshot) -> io::Result<PathBuf> {
        fs::create_dir_all(&self.dir)?;

        // Dropping `tmp` on any early return deletes the temporary file.
        let mut tmp = tempfile::Builder::new()
            .prefix(".pull-")
            .suffix(".tmp")
            .tempfile_in(&self.dir)?;

        let envelope = SnapshotFileRef {
            format_version: FORMAT_VERSION,
            collection: &self.collection,
            snapshot,
        };
        {
            let mut encoder =
                GzEncoder::new(BufWriter::new(tmp.as_file_mut()), Compression::default());
            serialize_into(&mut encoder, &envelope).map_err(io::Error::other)?;
            let mut writer = encoder.finish()?;
            writer.flush()?;
        }
        tmp.as_file().sync_all()?;

        let mut sequence = 0;
        loop {
            let target = self
                .dir
                .join(snapshot_file_name(&snapshot.captured_at, sequence));
            match tmp.persist_noclobber(&target) {
                Ok(_) => return Ok(target),
                Err(e) if e.error.kind() == io::ErrorKind::AlreadyExists => {
                    sequence += 1;
                    if sequence >= MAX_NAME_ATTEMPTS {
                        return Err(e.error);
                    }
                    tmp = e.file;
                }
                Err(e) => return Err(e.error),
            }
        }
    }

    /// Saved snapshots, most recent first.
    ///
    /// A missing directory simply has no snapshots. Files whose names do not
    /// follow the snapshot naming scheme are skipped.
    pub fn list_snapshots(&self) -> Result<Vec<SnapshotEntry>> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut snapshots = Vec::new();
        for entry in entries {
            let path = entry?.path();
            if !path.is_file() {
                continue;
            }
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if !name.ends_with(SNAPSHOT_EXTENSION) {
                continue;
            }
            match parse_snapshot_file_name(name) {
                Some((captured_at, sequence)) => snapshots.push(SnapshotEntry {
                    captured_at,
                    sequence,
                    path,
                }),
                None => warn!("skipping unrecognised snapshot file {}", path.display()),
            }
        }

        snapshots.sort_by(|a, b| {
            b.captured_at
                .cmp(&a.captured_at)
                .then(b.sequence.cmp(&a.sequence))
        });
        Ok(snapshots)
    }

    pub fn latest(&self) -> Result<Option<SnapshotEntry>> {
        Ok(self.list_snapshots()?.into_iter().next())
    }

    pub fn load(&self, entry: &SnapshotEntry) -> Result<CollectionSnapshot> {
        load_snapshot(&entry.path)
    }

    /// Delete a saved snapshot. Only snapshot files inside this store qualify.
    pub fn remove(&self, path: &Path) -> Result<()> {
        let in_store = path.parent() == Some(self.dir.as_path());
        let is_snapshot = path
            .file_name()
            .and_then(|n| n.to_str())
            .and_then(parse_snapshot_file_name)
            .is_some();
        if !in_store || !is_snapshot {
            return Err(ExplorerError::NotFound {
                path: path.to_path_buf(),
            });
        }
        fs::remove_file(path).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => ExplorerError::NotFound {
                path: path.to_path_buf(),
            },
            _ => e.into(),
        })?;
        info!("removed snapshot {}", path.display());
        Ok(())
    }
}

/// Read a snapshot file written by [`SnapshotStore::save`].
pub fn load_snapshot(path: &Path) -> Result<CollectionSnapshot> {
    let file = File::open(path).map_err(|e| match e.kind() {
        io::ErrorKind::NotFound => ExplorerError::NotFound {
            path: path.to_path_buf(),
        },
        _ => e.into(),
    })?;
    let decoder = GzDecoder::new(file);
    let mut reader = BufReader::new(decoder);

    let stored: SnapshotFile =
        deserialize_from(&mut reader).map_err(|e| ExplorerError::CorruptSnapshot {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

    if stored.format_version != FORMAT_VERSION {
        return Err(ExplorerError::CorruptSnapshot {
            path: path.to_path_buf(),
            reason: format!("unsupported format version {}", stored.format_version),
        });
    }

    info!(
        "loaded snapshot of {} records from {}",
        stored.snapshot.len(),
        path.display()
    );
    Ok(stored.snapshot)
}

fn snapshot_file_name(captured_at: &DateTime<Utc>, sequence: u32) -> String {
    let stamp = captured_at.format(NAME_FORMAT);
    if sequence == 0 {
        format!("{stamp}{SNAPSHOT_EXTENSION}")
    } else {
        format!("{stamp}-{sequence}{SNAPSHOT_EXTENSION}")
    }
}

fn parse_snapshot_file_name(name: &str) -> Option<(DateTime<Utc>, u32)> {
    let stem = name.strip_suffix(SNAPSHOT_EXTENSION)?;
    let stamp = stem.get(..NAME_TIMESTAMP_LEN)?;
    let rest = stem.get(NAME_TIMESTAMP_LEN..)?;

    let captured_at = NaiveDateTime::parse_from_str(stamp, NAME_FORMAT)
        .ok()?
        .and_utc();
    let sequence = if rest.is_empty() {
        0
    } else {
        let digits = rest.strip_prefix('-')?;
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        digits.parse().ok()?
    };
    Some((captured_at, sequence))
}
