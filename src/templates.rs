//! Document-template metadata. Each template lists the field names it expects as
//! placeholders in a comma-delimited `placeholder_fields` cell.

use std::path::{Path, PathBuf};

use log::info;

use crate::cache::LayoutCache;
use crate::error::StaffbookError;
use crate::migration::{LockScope, StoreLocks};
use crate::tabular::{columns_of, Row, SourceTable, Table, TabularFile};

pub const TEMPLATE_COLUMNS: [&str; 7] = [
    "template_id",
    "template_name",
    "template_file",
    "placeholder_fields",
    "description",
    "is_active",
    "created_date",
];

pub const PLACEHOLDER_COLUMN: &str = "placeholder_fields";

/// Placeholder tokens of a template row, trimmed, empty tokens dropped.
pub fn placeholders(row: &Row) -> Vec<&str> {
    row.get(PLACEHOLDER_COLUMN)
        .map(|cell| {
            cell.split(',')
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .collect()
        })
        .unwrap_or_default()
}

/// Templates without an explicit flag count as active.
pub fn is_active(row: &Row) -> bool {
    match row.get("is_active").map(|v| v.trim().to_ascii_lowercase()) {
        None => true,
        Some(v) => v.is_empty() || matches!(v.as_str(), "1" | "true" | "yes"),
    }
}

/// Number of templates with any of `tokens` among their placeholders.
pub fn count_referencing(table: &Table, tokens: &[&str], active_only: bool) -> usize {
    table
        .rows
        .iter()
        .filter(|row| !active_only || is_active(row))
        .filter(|row| placeholders(row).iter().any(|p| tokens.contains(p)))
        .count()
}

pub struct TemplateStore {
    path: PathBuf,
}

impl TemplateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn read(&self) -> Result<Option<Table>, StaffbookError> {
        TabularFile::read(&self.path)
    }

    pub fn read_source(&self) -> Result<Option<SourceTable>, StaffbookError> {
        TabularFile::read_source(&self.path)
    }

    /// Rewrites only the edited rows of `source`; everything else keeps its text.
    pub fn write_source(&self, source: &SourceTable) -> Result<(), StaffbookError> {
        TabularFile::write_source(&self.path, source)
    }

    /// Rewrites the template file under `table.header`, so columns beyond the
    /// standard set survive.
    pub fn write(&self, table: &Table) -> Result<(), StaffbookError> {
        let header = if table.header.is_empty() {
            columns_of(&TEMPLATE_COLUMNS)
        } else {
            table.header.clone()
        };
        TabularFile::write(&self.path, &header, &table.rows)
    }

    /// Replaces the placeholder list of one template. Refused while `cache` has
    /// writes blocked by a failed migration.
    pub fn set_placeholders(
        &self,
        locks: &StoreLocks,
        cache: &LayoutCache,
        template_id: &str,
        tokens: &[String],
    ) -> Result<(), StaffbookError> {
        locks.with_lock(LockScope::Templates, || -> Result<(), StaffbookError> {
            cache.ensure_writable()?;
            let mut table = self.read()?.ok_or_else(|| {
                StaffbookError::NotFound(format!("template store {}", self.path.display()))
            })?;

            let row = table
                .rows
                .iter_mut()
                .find(|r| r.get("template_id").map(|id| id.trim()) == Some(template_id))
                .ok_or_else(|| StaffbookError::NotFound(format!("template '{}'", template_id)))?;
            row.insert(PLACEHOLDER_COLUMN.to_owned(), tokens.join(","));

            self.write(&table)?;
            info!("Updated placeholders of template '{}'", template_id);
            Ok(())
        })
    }
}
