//! Append-only audit log of record and schema changes.
//!
//! Rows are historical facts. The only column the migration engine ever rewrites
//! is `field_name`, so that old entries keep pointing at the renamed field; the
//! recorded values and timestamps stay as they were written.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{Local, SecondsFormat};
use serde::Serialize;

use crate::error::StaffbookError;
use crate::tabular::{columns_of, Row, SourceTable, Table, TabularFile};

pub const AUDIT_COLUMNS: [&str; 9] = [
    "log_id",
    "timestamp",
    "employee_id",
    "employee_name",
    "action",
    "field_name",
    "old_value",
    "new_value",
    "details",
];

/// Column holding the field reference, either `name` or `Label (name)`.
pub const FIELD_REFERENCE_COLUMN: &str = "field_name";

pub const SCHEMA_MIGRATION_ACTION: &str = "schema_migration";

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AuditEntry {
    pub employee_id: String,
    pub employee_name: String,
    pub action: String,
    pub field_name: String,
    pub old_value: String,
    pub new_value: String,
    pub details: String,
}

impl AuditEntry {
    pub fn schema_migration(details: impl Into<String>) -> Self {
        AuditEntry {
            action: SCHEMA_MIGRATION_ACTION.to_owned(),
            details: details.into(),
            ..Default::default()
        }
    }
}

/// True if a `field_name` cell refers to `name`, bare or as `Label (name)`.
pub fn references_field(reference: &str, name: &str) -> bool {
    let reference = reference.trim();
    reference == name || split_labelled(reference).is_some_and(|(_, inner)| inner == name)
}

/// Splits `Label (name)` into its label part (with the separating space) and `name`.
pub fn split_labelled(reference: &str) -> Option<(&str, &str)> {
    let body = reference.strip_suffix(')')?;
    let open = body.rfind('(')?;
    Some((&body[..open], &body[open + 1..]))
}

/// Number of rows whose field reference points at `name`.
pub fn count_references(table: &Table, name: &str) -> usize {
    table
        .rows
        .iter()
        .filter(|row| {
            row.get(FIELD_REFERENCE_COLUMN)
                .is_some_and(|r| references_field(r, name))
        })
        .count()
}

pub struct AuditLog {
    path: PathBuf,
    // Held for appends and rewrites; always the innermost lock
    write_lock: Mutex<()>,
}

impl AuditLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn read(&self) -> Result<Option<Table>, StaffbookError> {
        TabularFile::read(&self.path)
    }

    /// Appends `entry` with the next log id and the current local time.
    pub fn append(&self, entry: &AuditEntry) -> Result<(), StaffbookError> {
        let _guard = self.lock();

        let next_id = match TabularFile::read(&self.path)? {
            Some(table) => {
                table
                    .rows
                    .iter()
                    .filter_map(|r| r.get("log_id").and_then(|id| id.trim().parse::<u64>().ok()))
                    .max()
                    .unwrap_or(0)
                    + 1
            }
            None => 1,
        };

        let row: Row = [
            ("log_id", next_id.to_string()),
            (
                "timestamp",
                Local::now().to_rfc3339_opts(SecondsFormat::Secs, true),
            ),
            ("employee_id", entry.employee_id.clone()),
            ("employee_name", entry.employee_name.clone()),
            ("action", entry.action.clone()),
            ("field_name", entry.field_name.clone()),
            ("old_value", entry.old_value.clone()),
            ("new_value", entry.new_value.clone()),
            ("details", entry.details.clone()),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_owned(), v))
        .collect();

        TabularFile::append(&self.path, &columns_of(&AUDIT_COLUMNS), &row)
    }

    /// Reads the log, lets `edit` mark rows it changed, and rewrites the file if
    /// `edit` reports any. Unmarked rows keep their original text. Returns `None`
    /// when the log does not exist, otherwise the number of changed rows.
    pub fn update<F>(&self, edit: F) -> Result<Option<usize>, StaffbookError>
    where
        F: FnOnce(&mut SourceTable) -> usize,
    {
        let _guard = self.lock();

        let mut source = match TabularFile::read_source(&self.path)? {
            Some(source) => source,
            None => return Ok(None),
        };
        let changed = edit(&mut source);
        if changed > 0 {
            TabularFile::write_source(&self.path, &source)?;
        }
        Ok(Some(changed))
    }

    fn lock(&self) -> MutexGuard<'_, ()> {
        self.write_lock.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
