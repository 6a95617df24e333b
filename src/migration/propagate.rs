//! Applies a rename set to each dependent store.
//!
//! Every store is handled independently. A store whose file does not exist is
//! skipped, and a store that holds none of the old names is not rewritten.

use log::{debug, info};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter};

use super::rename::RenameSet;
use crate::audit::{split_labelled, AuditLog, FIELD_REFERENCE_COLUMN};
use crate::error::StaffbookError;
use crate::records::RecordStore;
use crate::tabular::Row;
use crate::templates::{TemplateStore, PLACEHOLDER_COLUMN};

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumIter,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum StoreKind {
    Records,
    Archive,
    Templates,
    AuditLog,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum StoreOutcome {
    /// The store's file does not exist.
    Missing,
    /// Nothing in the store referenced a renamed field.
    Unchanged,
    /// The file was rewritten; `rows` is the number of rows whose content changed.
    Rewritten { rows: usize },
    /// The rewrite failed and was skipped.
    Failed,
}

/// The dependent stores a rename set is propagated to.
pub struct Propagator<'a> {
    pub records: &'a RecordStore,
    pub archive: &'a RecordStore,
    pub templates: &'a TemplateStore,
    pub audit: &'a AuditLog,
}

impl Propagator<'_> {
    pub fn propagate(
        &self,
        kind: StoreKind,
        renames: &RenameSet,
        target_columns: &[String],
    ) -> Result<StoreOutcome, StaffbookError> {
        let outcome = match kind {
            StoreKind::Records => propagate_records(self.records, renames, target_columns)?,
            StoreKind::Archive => propagate_records(self.archive, renames, target_columns)?,
            StoreKind::Templates => propagate_templates(self.templates, renames)?,
            StoreKind::AuditLog => propagate_audit_log(self.audit, renames)?,
        };

        match outcome {
            StoreOutcome::Missing => debug!("{}: no file, skipped", kind),
            StoreOutcome::Unchanged => debug!("{}: no renamed fields referenced", kind),
            StoreOutcome::Rewritten { rows } => info!("{}: rewrote {} row(s)", kind, rows),
            StoreOutcome::Failed => {}
        }
        Ok(outcome)
    }
}

/// Re-keys a record row through the rename set. A renamed value wins over a
/// stale column that already carries the new name.
pub fn rename_row_keys(row: Row, renames: &RenameSet) -> Row {
    let mut renamed = Row::with_capacity(row.len());
    let mut moved = Vec::new();
    for (key, value) in row {
        match renames.get(&key) {
            Some(new_key) => moved.push((new_key.to_owned(), value)),
            None => {
                renamed.insert(key, value);
            }
        }
    }
    renamed.extend(moved);
    renamed
}

/// Rewrites a comma-delimited placeholder list. `None` if no token matched, so
/// callers can leave the cell exactly as it was.
pub fn rename_placeholder_list(cell: &str, renames: &RenameSet) -> Option<String> {
    let mut changed = false;
    let tokens: Vec<String> = cell
        .split(',')
        .map(|token| {
            let name = token.trim();
            match renames.get(name) {
                Some(new_name) if !name.is_empty() => {
                    changed = true;
                    // Keep the whitespace the template author used around the token
                    let start = token.len() - token.trim_start().len();
                    let end = start + name.len();
                    format!("{}{}{}", &token[..start], new_name, &token[end..])
                }
                _ => token.to_owned(),
            }
        })
        .collect();

    changed.then(|| tokens.join(","))
}

/// Rewrites an audit-log field reference, either a bare name or `Label (name)`.
/// Only the name is replaced; the label is kept as it was logged.
pub fn rename_field_reference(reference: &str, renames: &RenameSet) -> Option<String> {
    let trimmed = reference.trim();
    if let Some(new_name) = renames.get(trimmed) {
        return Some(new_name.to_owned());
    }
    let (label, name) = split_labelled(trimmed)?;
    renames
        .get(name)
        .map(|new_name| format!("{}({})", label, new_name))
}

/// Replaces `column` in `row` with what `rename` returns. False if the row has
/// no such column or `rename` left it alone.
fn rename_cell<F>(row: &mut Row, column: &str, rename: F) -> bool
where
    F: FnOnce(&str) -> Option<String>,
{
    let Some(updated) = row.get(column).map(String::as_str).and_then(rename) else {
        return false;
    };
    row.insert(column.to_owned(), updated);
    true
}

fn propagate_records(
    store: &RecordStore,
    renames: &RenameSet,
    target_columns: &[String],
) -> Result<StoreOutcome, StaffbookError> {
    let table = match store.read_table()? {
        Some(table) => table,
        None => return Ok(StoreOutcome::Missing),
    };
    if !renames.touches(table.header.iter()) {
        return Ok(StoreOutcome::Unchanged);
    }

    let rows: Vec<Row> = table
        .rows
        .into_iter()
        .map(|row| rename_row_keys(row, renames))
        .collect();
    store.write_all(target_columns, &rows)?;

    Ok(StoreOutcome::Rewritten { rows: rows.len() })
}

fn propagate_templates(
    store: &TemplateStore,
    renames: &RenameSet,
) -> Result<StoreOutcome, StaffbookError> {
    let mut source = match store.read_source()? {
        Some(source) => source,
        None => return Ok(StoreOutcome::Missing),
    };

    let changed = source.edit_rows(|row| {
        rename_cell(row, PLACEHOLDER_COLUMN, |cell| rename_placeholder_list(cell, renames))
    });

    if changed == 0 {
        return Ok(StoreOutcome::Unchanged);
    }
    store.write_source(&source)?;
    Ok(StoreOutcome::Rewritten { rows: changed })
}

fn propagate_audit_log(
    log: &AuditLog,
    renames: &RenameSet,
) -> Result<StoreOutcome, StaffbookError> {
    let changed = log.update(|source| {
        source.edit_rows(|row| {
            rename_cell(row, FIELD_REFERENCE_COLUMN, |reference| {
                rename_field_reference(reference, renames)
            })
        })
    })?;

    Ok(match changed {
        None => StoreOutcome::Missing,
        Some(0) => StoreOutcome::Unchanged,
        Some(rows) => StoreOutcome::Rewritten { rows },
    })
}
