use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use log::debug;
use serde::{Deserialize, Serialize};

use super::FieldDefinition;
use crate::error::StaffbookError;
use crate::tabular::{columns_of, Row, TabularFile};

const SNAPSHOT_COLUMNS: [&str; 2] = ["field_id", "field_name"];

/// `field_id -> field_name` as of the end of the last migration run. This is the
/// only baseline renames are detected against.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FieldMappingSnapshot {
    entries: BTreeMap<String, String>,
}

impl FieldMappingSnapshot {
    /// Snapshot of a schema. Fields without an id or a name are not recorded.
    pub fn from_fields(fields: &[FieldDefinition]) -> Self {
        let entries = fields
            .iter()
            .filter(|f| !f.field_id.is_empty() && !f.field_name.is_empty())
            .map(|f| (f.field_id.clone(), f.field_name.clone()))
            .collect();
        Self { entries }
    }

    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            entries: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    pub fn name_of(&self, field_id: &str) -> Option<&str> {
        self.entries.get(field_id).map(String::as_str)
    }

    pub fn contains_id(&self, field_id: &str) -> bool {
        self.entries.contains_key(field_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

pub struct SnapshotStore {
    path: PathBuf,
}

impl SnapshotStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// `Ok(None)` when no snapshot has been written yet (first run).
    pub fn load(&self) -> Result<Option<FieldMappingSnapshot>, StaffbookError> {
        let table = match TabularFile::read(&self.path)? {
            Some(table) => table,
            None => return Ok(None),
        };

        let snapshot = FieldMappingSnapshot::from_pairs(
            table
                .rows
                .into_iter()
                .filter_map(|mut row| {
                    let id = row.remove("field_id")?.trim().to_owned();
                    let name = row.remove("field_name")?.trim().to_owned();
                    (!id.is_empty() && !name.is_empty()).then_some((id, name))
                }),
        );
        debug!("Loaded field mapping snapshot with {} entries", snapshot.len());

        Ok(Some(snapshot))
    }

    pub fn save(&self, snapshot: &FieldMappingSnapshot) -> Result<(), StaffbookError> {
        let rows: Vec<Row> = snapshot
            .iter()
            .map(|(id, name)| {
                Row::from([
                    ("field_id".to_owned(), id.to_owned()),
                    ("field_name".to_owned(), name.to_owned()),
                ])
            })
            .collect();
        TabularFile::write(&self.path, &columns_of(&SNAPSHOT_COLUMNS), &rows)
    }
}
