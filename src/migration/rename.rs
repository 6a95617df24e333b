use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::schema::{companion_columns, FieldDefinition, FieldMappingSnapshot};

/// `old_name -> new_name` for one migration run, companion columns included.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RenameSet {
    renames: BTreeMap<String, String>,
}

impl RenameSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, old_name: impl Into<String>, new_name: impl Into<String>) {
        self.renames.insert(old_name.into(), new_name.into());
    }

    /// Records a field rename; for `file` fields also renames both companion columns.
    pub fn insert_field(&mut self, old_name: &str, new_name: &str, is_file: bool) {
        self.insert(old_name, new_name);
        if is_file {
            let [old_issue, old_expiry] = companion_columns(old_name);
            let [new_issue, new_expiry] = companion_columns(new_name);
            self.insert(old_issue, new_issue);
            self.insert(old_expiry, new_expiry);
        }
    }

    pub fn get(&self, old_name: &str) -> Option<&str> {
        self.renames.get(old_name).map(String::as_str)
    }

    pub fn contains(&self, old_name: &str) -> bool {
        self.renames.contains_key(old_name)
    }

    /// True if any of `names` is an old name in this set.
    pub fn touches<'a>(&self, mut names: impl Iterator<Item = &'a String>) -> bool {
        names.any(|n| self.contains(n))
    }

    pub fn is_empty(&self) -> bool {
        self.renames.is_empty()
    }

    pub fn len(&self) -> usize {
        self.renames.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.renames.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// `a→b, c→d`
    pub fn describe(&self) -> String {
        self.iter()
            .map(|(old, new)| format!("{}→{}", old, new))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// Diffs the current schema against the snapshot. Only fields whose id is in the
/// snapshot under a different name are renames; unknown ids are additions.
pub fn detect(fields: &[FieldDefinition], snapshot: &FieldMappingSnapshot) -> RenameSet {
    let mut renames = RenameSet::new();
    for field in fields {
        if field.field_id.is_empty() || field.field_name.is_empty() {
            continue;
        }
        if let Some(old_name) = snapshot.name_of(&field.field_id) {
            if old_name != field.field_name {
                renames.insert_field(old_name, &field.field_name, field.is_file());
            }
        }
    }
    renames
}
