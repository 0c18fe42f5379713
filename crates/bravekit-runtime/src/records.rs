//! Unit tracking records.
//!
//! A record is written once a deployment succeeds and removed together with
//! the unit. [`JsonRecordStore`] keeps all records in one JSON file that is
//! opened for each operation.

use std::path::{Path, PathBuf};

use bravekit_common::error::{BraveError, Result, io_at};
use bravekit_common::types::UnitData;
use serde::{Deserialize, Serialize};

/// Persistent record of a deployed unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitRecord {
    /// Generated unique identifier.
    pub uid: String,
    /// Unit name.
    pub name: String,
    /// RFC 3339 creation timestamp.
    pub date: String,
    /// Resource snapshot.
    pub data: UnitData,
}

impl UnitRecord {
    /// Creates a record stamped with a fresh id and the current time.
    #[must_use]
    pub fn new(name: &str, data: UnitData) -> Self {
        Self {
            uid: uuid::Uuid::new_v4().to_string(),
            name: name.to_string(),
            date: chrono::Utc::now().to_rfc3339(),
            data,
        }
    }
}

/// Storage for unit records.
pub trait RecordStore: Send + Sync {
    /// Adds a record.
    ///
    /// # Errors
    ///
    /// Returns [`BraveError::AlreadyExists`] if a record with the same name
    /// exists, or an error if the store cannot be written.
    fn insert(&self, record: &UnitRecord) -> Result<()>;

    /// Removes the record of `name`.
    ///
    /// # Errors
    ///
    /// Returns [`BraveError::NotFound`] if there is no such record.
    fn delete(&self, name: &str) -> Result<()>;

    /// All records, in insertion order.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    fn list(&self) -> Result<Vec<UnitRecord>>;
}

/// [`RecordStore`] backed by a JSON array on disk.
#[derive(Debug, Clone)]
pub struct JsonRecordStore {
    path: PathBuf,
}

impl JsonRecordStore {
    /// Uses the file at `path`; it is created on first insert.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Backing file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read(&self) -> Result<Vec<UnitRecord>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let content = std::fs::read_to_string(&self.path).map_err(io_at(&self.path))?;
        if content.trim().is_empty() {
            return Ok(Vec::new());
        }
        Ok(serde_json::from_str(&content)?)
    }

    fn write(&self, records: &[UnitRecord]) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(io_at(parent))?;
        }
        let json = serde_json::to_string_pretty(records)?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json).map_err(io_at(&tmp))?;
        std::fs::rename(&tmp, &self.path).map_err(io_at(&self.path))
    }
}

impl RecordStore for JsonRecordStore {
    fn insert(&self, record: &UnitRecord) -> Result<()> {
        let mut records = self.read()?;
        if records.iter().any(|r| r.name == record.name) {
            return Err(BraveError::AlreadyExists {
                kind: "unit record",
                id: record.name.clone(),
            });
        }
        records.push(record.clone());
        self.write(&records)?;
        tracing::debug!(unit = %record.name, uid = %record.uid, "unit record inserted");
        Ok(())
    }

    fn delete(&self, name: &str) -> Result<()> {
        let mut records = self.read()?;
        let before = records.len();
        records.retain(|r| r.name != name);
        if records.len() == before {
            return Err(BraveError::NotFound {
                kind: "unit record",
                id: name.to_string(),
            });
        }
        self.write(&records)?;
        tracing::debug!(unit = %name, "unit record deleted");
        Ok(())
    }

    fn list(&self) -> Result<Vec<UnitRecord>> {
        self.read()
    }
}
