//! SeenStore: the persisted history of records that were already handled.
//!
//! The file is a JSON array of record objects. Reads never fail the caller:
//! a missing, unreadable or malformed file is an empty history. Writes replace
//! the whole file.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{debug, info, warn};

use super::{StoreError, replace_file};
use crate::domain::Record;

/// File-backed history of accepted records.
#[derive(Debug, Clone)]
pub struct SeenStore {
    path: PathBuf,
}

impl SeenStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load every valid record, in file order.
    ///
    /// Anomalies are logged and skipped, never returned.
    pub async fn load(&self) -> Vec<Record> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "seen-store file not found, starting empty");
                return Vec::new();
            }
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "failed to read seen-store, starting empty");
                return Vec::new();
            }
        };

        let records = parse_records(&bytes, &self.path);
        debug!(path = %self.path.display(), count = records.len(), "loaded seen-store");
        records
    }

    /// Persist `records` as the new complete history.
    ///
    /// Duplicate ids are dropped (first occurrence wins).
    pub async fn save(&self, records: &[Record]) -> Result<(), StoreError> {
        let mut ids = HashSet::new();
        let unique: Vec<&Record> = records
            .iter()
            .filter(|r| !r.id().is_empty() && ids.insert(r.id()))
            .collect();

        let body = serde_json::to_vec_pretty(&unique)?;
        replace_file(&self.path, &body).await?;
        info!(path = %self.path.display(), count = unique.len(), "saved seen-store");
        Ok(())
    }
}

fn parse_records(bytes: &[u8], path: &Path) -> Vec<Record> {
    let value: Value = match serde_json::from_slice(bytes) {
        Ok(value) => value,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "seen-store is not valid JSON, starting empty");
            return Vec::new();
        }
    };

    let Value::Array(entries) = value else {
        warn!(path = %path.display(), "seen-store is not a JSON array, starting empty");
        return Vec::new();
    };

    let mut ids = HashSet::new();
    let mut records = Vec::with_capacity(entries.len());
    for (index, entry) in entries.into_iter().enumerate() {
        if !entry.is_object() {
            warn!(index, "skipping seen-store entry that is not an object");
            continue;
        }
        match serde_json::from_value::<Record>(entry) {
            Ok(record) => {
                if ids.insert(record.id().to_string()) {
                    records.push(record);
                } else {
                    warn!(index, id = record.id(), "skipping duplicate seen-store entry");
                }
            }
            Err(e) => warn!(index, error = %e, "skipping invalid seen-store entry"),
        }
    }
    records
}

/// Members of `all` whose id is not in `seen`, in `all`'s order.
///
/// An id repeated within `all` is returned once, at its first position.
pub fn diff_new(all: &[Record], seen: &[Record]) -> Vec<Record> {
    let mut known: HashSet<&str> = seen.iter().map(Record::id).collect();
    all.iter()
        .filter(|r| known.insert(r.id()))
        .cloned()
        .collect()
}
