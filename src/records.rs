//! Active and archived employee records.
//!
//! Column layout comes from the cached schema layout. Every mutation holds the
//! records lock, which is what keeps ordinary edits from interleaving with a
//! field migration rewriting the same files.

use std::path::{Path, PathBuf};

use log::info;

use crate::cache::{LayoutCache, SchemaLayout};
use crate::error::{StaffbookError, ValidationErrors};
use crate::migration::{LockScope, StoreLocks};
use crate::schema::FieldRole;
use crate::tabular::{Row, Table, TabularFile};

pub struct RecordStore {
    path: PathBuf,
}

impl RecordStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Rows under the file's own header. `None` if the store does not exist.
    pub fn read_table(&self) -> Result<Option<Table>, StaffbookError> {
        TabularFile::read(&self.path)
    }

    /// Rows normalized to `columns`; a missing store reads as empty.
    pub fn read_all(&self, columns: &[String]) -> Result<Vec<Row>, StaffbookError> {
        Ok(TabularFile::read_normalized(&self.path, columns)?.unwrap_or_default())
    }

    pub fn write_all(&self, columns: &[String], rows: &[Row]) -> Result<(), StaffbookError> {
        TabularFile::write(&self.path, columns, rows)
    }

    /// Inserts a record, or merges it into the record with the same employee id.
    /// Returns true when a new record was created.
    ///
    /// The layout is read from `cache` only once the records lock is held, so a
    /// record is never written under column names a migration just replaced.
    /// Fails with `Conflict` while a failed migration has writes blocked.
    pub fn upsert(
        &self,
        locks: &StoreLocks,
        cache: &LayoutCache,
        record: &Row,
    ) -> Result<bool, StaffbookError> {
        locks.with_lock(LockScope::Records, || -> Result<bool, StaffbookError> {
            let layout = cache.get_for_write()?;
            let key = id_column(&layout)?;
            let id = record.get(key).map(|v| v.trim()).unwrap_or("");
            if id.is_empty() {
                let mut errors = ValidationErrors::new();
                errors.push(format!("Record has no value for '{}'", key));
                return Err(errors.into());
            }

            let columns = layout.columns();
            let mut rows = self.read_all(columns)?;

            let created = match rows.iter_mut().find(|r| r.get(key).map(|v| v.trim()) == Some(id)) {
                Some(existing) => {
                    for column in columns {
                        if let Some(value) = record.get(column) {
                            existing.insert(column.clone(), value.clone());
                        }
                    }
                    false
                }
                None => {
                    rows.push(
                        columns
                            .iter()
                            .map(|c| (c.clone(), record.get(c).cloned().unwrap_or_default()))
                            .collect(),
                    );
                    true
                }
            };

            self.write_all(columns, &rows)?;
            Ok(created)
        })
    }

    /// Removes the record with `employee_id`. Returns false if there was none.
    pub fn delete(
        &self,
        locks: &StoreLocks,
        cache: &LayoutCache,
        employee_id: &str,
    ) -> Result<bool, StaffbookError> {
        locks.with_lock(LockScope::Records, || -> Result<bool, StaffbookError> {
            let layout = cache.get_for_write()?;
            let key = id_column(&layout)?;
            let columns = layout.columns();
            let mut rows = self.read_all(columns)?;
            let before = rows.len();
            rows.retain(|r| r.get(key).map(|v| v.trim()) != Some(employee_id));
            if rows.len() == before {
                return Ok(false);
            }
            self.write_all(columns, &rows)?;
            Ok(true)
        })
    }

    /// Moves the record with `employee_id` from this store into `archive`.
    pub fn archive(
        &self,
        archive: &RecordStore,
        locks: &StoreLocks,
        cache: &LayoutCache,
        employee_id: &str,
    ) -> Result<bool, StaffbookError> {
        locks.with_lock(LockScope::Records, || -> Result<bool, StaffbookError> {
            let layout = cache.get_for_write()?;
            let key = id_column(&layout)?;
            let columns = layout.columns();
            let mut rows = self.read_all(columns)?;
            let Some(index) = rows
                .iter()
                .position(|r| r.get(key).map(|v| v.trim()) == Some(employee_id))
            else {
                return Ok(false);
            };
            let record = rows.remove(index);

            let mut archived = archive.read_all(columns)?;
            archived.push(record);
            archive.write_all(columns, &archived)?;
            self.write_all(columns, &rows)?;

            info!("Archived employee '{}'", employee_id);
            Ok(true)
        })
    }
}

/// Rows of `table` holding a non-empty value under `column`.
pub fn count_non_empty(table: &Table, column: &str) -> usize {
    table
        .rows
        .iter()
        .filter(|row| row.get(column).is_some_and(|v| !v.trim().is_empty()))
        .count()
}

fn id_column(layout: &SchemaLayout) -> Result<&str, StaffbookError> {
    layout
        .column_for_role(FieldRole::EmployeeId)
        .ok_or_else(|| StaffbookError::Error("Schema has no employee identifier field".into()))
}
