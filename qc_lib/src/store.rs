//! Destination store of the ingestion pipeline.
//!
//! [`Storage`] is the whole contract the pipeline needs: a duplicate check
//! and an all-or-nothing insert of one report's records. Both stores append the
//! rows of a transaction in place and truncate them away again if a record
//! fails.

use anyhow::{Context, Result};
use log::debug;
use qc_types::{FieldValue, QcValue, RecordKey, StorageRecord, Table};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("{table} already holds a row with {fields}")]
    UniqueViolation { table: Table, fields: String },

    #[error(
        "record {record} references {target} through '{field}', which is not in the transaction"
    )]
    DanglingReference {
        record: RecordKey,
        field: String,
        target: RecordKey,
    },

    #[error("could not write {}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub trait Storage {
    /// Whether `table` holds a row whose fields equal every `(field, value)`
    /// of `filter`.
    fn exists(&self, table: Table, filter: &[(&str, QcValue)]) -> Result<bool, StorageError>;

    /// Insert `records` in order, as one transaction. Returns the number of
    /// rows written.
    fn insert_many(&mut self, records: &[StorageRecord]) -> Result<usize, StorageError>;
}

/// Columns that must be unique together, per table.
const UNIQUE_CONSTRAINTS: &[(Table, &[&str])] = &[(Table::Report, &["dnanexus_file_id", "name"])];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoredValue {
    Value(QcValue),
    Ref { table: Table, id: u64 },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredRow {
    pub id: u64,
    pub fields: BTreeMap<String, StoredValue>,
}

impl StoredRow {
    pub fn value(&self, field: &str) -> Option<&QcValue> {
        match self.fields.get(field)? {
            StoredValue::Value(v) => Some(v),
            StoredValue::Ref { .. } => None,
        }
    }

    /// `(table, id)` of the row referenced through `field`.
    pub fn reference(&self, field: &str) -> Option<(Table, u64)> {
        match self.fields.get(field)? {
            StoredValue::Ref { table, id } => Some((*table, *id)),
            StoredValue::Value(_) => None,
        }
    }

    fn matches(&self, filter: &[(&str, QcValue)]) -> bool {
        filter
            .iter()
            .all(|(field, value)| self.value(field) == Some(value))
    }
}

/// Rows of every table, with ids allocated from one counter.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Tables {
    next_id: u64,
    rows: BTreeMap<Table, Vec<StoredRow>>,
}

impl Tables {
    pub fn rows(&self, table: Table) -> &[StoredRow] {
        self.rows.get(&table).map_or(&[], Vec::as_slice)
    }

    pub fn count(&self, table: Table) -> usize {
        self.rows(table).len()
    }

    pub fn get(&self, table: Table, id: u64) -> Option<&StoredRow> {
        self.rows(table).iter().find(|r| r.id == id)
    }

    fn exists(&self, table: Table, filter: &[(&str, QcValue)]) -> bool {
        self.rows(table).iter().any(|r| r.matches(filter))
    }

    fn check_unique(&self, table: Table, record: &StorageRecord) -> Result<(), StorageError> {
        for (_, columns) in UNIQUE_CONSTRAINTS.iter().filter(|(t, _)| *t == table) {
            let filter: Vec<(&str, QcValue)> = columns
                .iter()
                .map(|c| (*c, record.value(c).cloned().unwrap_or_default()))
                .collect();
            if self.exists(table, &filter) {
                let fields = filter
                    .iter()
                    .map(|(c, v)| format!("{c}={v}"))
                    .collect::<Vec<_>>()
                    .join(", ");
                return Err(StorageError::UniqueViolation { table, fields });
            }
        }
        Ok(())
    }

    /// Append `records` as one transaction.
    ///
    /// A key seen twice is inserted once: every sample of a report carries
    /// the same report record. On error every row appended so far is removed
    /// again. The returned checkpoint undoes the whole transaction.
    fn insert(&mut self, records: &[StorageRecord]) -> Result<(usize, Checkpoint), StorageError> {
        let checkpoint = self.checkpoint();
        match self.append(records) {
            Ok(inserted) => Ok((inserted, checkpoint)),
            Err(e) => {
                self.rollback(checkpoint);
                Err(e)
            }
        }
    }

    fn append(&mut self, records: &[StorageRecord]) -> Result<usize, StorageError> {
        let mut ids: HashMap<&RecordKey, (Table, u64)> = HashMap::new();
        for record in records {
            if ids.contains_key(&record.key) {
                continue;
            }
            self.check_unique(record.table, record)?;

            let mut fields = BTreeMap::new();
            for (field, value) in &record.fields {
                let stored = match value {
                    FieldValue::Value(v) => StoredValue::Value(v.clone()),
                    FieldValue::Ref(target) => {
                        let Some(&(table, id)) = ids.get(target) else {
                            return Err(StorageError::DanglingReference {
                                record: record.key.clone(),
                                field: field.clone(),
                                target: target.clone(),
                            });
                        };
                        StoredValue::Ref { table, id }
                    }
                };
                fields.insert(field.clone(), stored);
            }

            self.next_id += 1;
            let id = self.next_id;
            self.rows
                .entry(record.table)
                .or_default()
                .push(StoredRow { id, fields });
            ids.insert(&record.key, (record.table, id));
        }
        Ok(ids.len())
    }

    fn checkpoint(&self) -> Checkpoint {
        Checkpoint {
            next_id: self.next_id,
            lens: self.rows.iter().map(|(t, r)| (*t, r.len())).collect(),
        }
    }

    fn rollback(&mut self, checkpoint: Checkpoint) {
        debug!("rolling back to row id {}", checkpoint.next_id);
        self.next_id = checkpoint.next_id;
        self.rows.retain(|table, rows| match checkpoint.lens.get(table) {
            Some(&len) => {
                rows.truncate(len);
                true
            }
            None => false,
        });
    }
}

/// Table lengths and id counter from before a transaction. Rows are only
/// ever appended, so truncating to these lengths undoes it.
#[derive(Debug)]
struct Checkpoint {
    next_id: u64,
    lens: BTreeMap<Table, usize>,
}

/// Store living in memory only.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    tables: Tables,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tables(&self) -> &Tables {
        &self.tables
    }
}

impl Storage for MemoryStore {
    fn exists(&self, table: Table, filter: &[(&str, QcValue)]) -> Result<bool, StorageError> {
        Ok(self.tables.exists(table, filter))
    }

    fn insert_many(&mut self, records: &[StorageRecord]) -> Result<usize, StorageError> {
        let (inserted, _) = self.tables.insert(records)?;
        Ok(inserted)
    }
}

/// Store persisted as one JSON file, rewritten after every transaction.
#[derive(Debug)]
pub struct JsonStore {
    path: PathBuf,
    tables: Tables,
}

impl JsonStore {
    /// Open the store at `path`, starting empty if the file does not exist.
    pub fn open(path: &Path) -> Result<Self> {
        let tables = if path.exists() {
            let contents =
                fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
            serde_json::from_str(&contents)
                .with_context(|| format!("parsing store file {}", path.display()))?
        } else {
            debug!("creating new store at {}", path.display());
            Tables::default()
        };
        Ok(JsonStore {
            path: path.to_path_buf(),
            tables,
        })
    }

    pub fn tables(&self) -> &Tables {
        &self.tables
    }

    /// Write the tables next to the store file and rename it into place.
    /// The whole file is rewritten, which is fine for the few thousand rows
    /// of a QC store.
    fn persist(&self) -> Result<(), StorageError> {
        let io_err = |source| StorageError::Io {
            path: self.path.clone(),
            source,
        };
        let dir = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        let mut tmp = NamedTempFile::new_in(dir).map_err(io_err)?;
        {
            let mut writer = BufWriter::new(tmp.as_file_mut());
            serde_json::to_writer(&mut writer, &self.tables)
                .map_err(|e| io_err(std::io::Error::from(e)))?;
            writer.flush().map_err(io_err)?;
        }
        tmp.persist(&self.path).map_err(|e| io_err(e.error))?;
        Ok(())
    }
}

impl Storage for JsonStore {
    fn exists(&self, table: Table, filter: &[(&str, QcValue)]) -> Result<bool, StorageError> {
        Ok(self.tables.exists(table, filter))
    }

    fn insert_many(&mut self, records: &[StorageRecord]) -> Result<usize, StorageError> {
        let (inserted, checkpoint) = self.tables.insert(records)?;
        if let Err(e) = self.persist() {
            self.tables.rollback(checkpoint);
            return Err(e);
        }
        Ok(inserted)
    }
}
