use serde::Serialize;

use crate::audit::count_references;
use crate::error::StaffbookError;
use crate::records::count_non_empty;
use crate::schema::FieldDefinition;
use crate::tabular::Table;
use crate::templates::count_referencing;

use super::coordinator::MigrationCoordinator;

/// How many stored rows reference a field.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FieldImpact {
    /// Active records with a non-empty value in the field's column.
    pub records: usize,
    /// Active templates listing the field's name or id as a placeholder.
    pub templates: usize,
    /// Audit-log rows referencing the field.
    pub audit_log: usize,
}

/// One read of the active record, template, and audit-log stores, reused to
/// compute the impact of any number of fields.
#[derive(Debug, Default)]
pub struct ImpactIndex {
    records: Option<Table>,
    templates: Option<Table>,
    audit_log: Option<Table>,
}

impl ImpactIndex {
    pub fn load(coordinator: &MigrationCoordinator) -> Result<Self, StaffbookError> {
        Ok(Self {
            records: coordinator.records().read_table()?,
            templates: coordinator.templates().read()?,
            audit_log: coordinator.audit_log().read()?,
        })
    }

    pub fn impact(&self, field: &FieldDefinition) -> FieldImpact {
        let name = field.field_name.as_str();
        let tokens = [name, field.field_id.as_str()];

        FieldImpact {
            records: self.records.as_ref().map_or(0, |t| count_non_empty(t, name)),
            templates: self
                .templates
                .as_ref()
                .map_or(0, |t| count_referencing(t, &tokens, true)),
            audit_log: self
                .audit_log
                .as_ref()
                .map_or(0, |t| count_references(t, name)),
        }
    }
}
