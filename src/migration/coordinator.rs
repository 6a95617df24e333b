use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

use log::{debug, error, info, warn, Level};
use logging_timer::timer;
use serde::{Deserialize, Serialize};
use strum::IntoEnumIterator;

use super::impact::{FieldImpact, ImpactIndex};
use super::lock::StoreLocks;
use super::propagate::{Propagator, StoreKind, StoreOutcome};
use super::recovery::{BackupSet, IntentLog, MigrationIntent, RecoveryMode};
use super::rename::{detect, RenameSet};
use crate::audit::{AuditEntry, AuditLog};
use crate::cache::{LayoutCache, SchemaLayout};
use crate::config::StorePaths;
use crate::error::{StaffbookError, ValidationErrors};
use crate::records::RecordStore;
use crate::schema::{
    allocate_field_id, derive_columns, is_valid_field_id, is_valid_field_name,
    validate_submission, FieldDefinition, FieldMappingSnapshot, FieldType, SchemaStore,
    SnapshotStore,
};
use crate::templates::TemplateStore;

/// Result of a schema edit, as returned to the client.
#[derive(Debug, Clone, Serialize)]
pub struct SchemaUpdateResponse {
    pub fields: Vec<FieldDefinition>,
    pub renames: RenameSet,
    #[serde(rename = "renameCount")]
    pub rename_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoreReport {
    pub store: StoreKind,
    #[serde(flatten)]
    pub outcome: StoreOutcome,
}

/// What one migration run did.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MigrationReport {
    pub renames: RenameSet,
    /// No snapshot existed; the current schema became the first one.
    pub bootstrapped: bool,
    /// Renames of an unfinished earlier run, completed before detection.
    pub replayed: Option<RenameSet>,
    pub stores: Vec<StoreReport>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RenamePair {
    pub old_name: String,
    pub new_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RenamePreview {
    pub field_id: String,
    pub old_field_name: String,
    pub new_field_name: String,
    pub renames: Vec<RenamePair>,
    pub impact: FieldImpact,
}

#[derive(Debug, Clone, Serialize)]
pub struct FieldWithImpact {
    #[serde(flatten)]
    pub field: FieldDefinition,
    pub impact: FieldImpact,
}

/// An "add field" edit. The id is allocated by the coordinator.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewField {
    pub field_name: String,
    #[serde(default)]
    pub field_label: String,
    #[serde(default)]
    pub field_type: FieldType,
    #[serde(default)]
    pub field_options: String,
    #[serde(default)]
    pub field_group: String,
    #[serde(default)]
    pub show_in_table: bool,
    #[serde(default)]
    pub editable_in_table: bool,
}

/// Owns every store the engine touches, the store locks, and the layout cache.
pub struct MigrationCoordinator {
    paths: StorePaths,
    recovery: RecoveryMode,
    schema: SchemaStore,
    snapshot: SnapshotStore,
    records: RecordStore,
    archive: RecordStore,
    templates: TemplateStore,
    audit: AuditLog,
    intent: IntentLog,
    locks: StoreLocks,
    cache: LayoutCache,
    // Serializes whole schema edits so two submissions cannot interleave their
    // persist and migrate steps. Always taken before the store locks.
    schema_edit: Mutex<()>,
}

impl MigrationCoordinator {
    pub fn new(paths: StorePaths, recovery: RecoveryMode) -> Self {
        MigrationCoordinator {
            recovery,
            schema: SchemaStore::new(&paths.schema),
            snapshot: SnapshotStore::new(&paths.snapshot),
            records: RecordStore::new(&paths.records),
            archive: RecordStore::new(&paths.archive),
            templates: TemplateStore::new(&paths.templates),
            audit: AuditLog::new(&paths.audit_log),
            intent: IntentLog::new(&paths.intent),
            locks: StoreLocks::new(),
            cache: LayoutCache::new(SchemaStore::new(&paths.schema)),
            schema_edit: Mutex::new(()),
            paths,
        }
    }

    pub fn paths(&self) -> &StorePaths {
        &self.paths
    }

    pub fn records(&self) -> &RecordStore {
        &self.records
    }

    pub fn archive(&self) -> &RecordStore {
        &self.archive
    }

    pub fn templates(&self) -> &TemplateStore {
        &self.templates
    }

    pub fn audit_log(&self) -> &AuditLog {
        &self.audit
    }

    pub fn locks(&self) -> &StoreLocks {
        &self.locks
    }

    pub fn cache(&self) -> &LayoutCache {
        &self.cache
    }

    pub fn layout(&self) -> Result<Arc<SchemaLayout>, StaffbookError> {
        self.cache.get()
    }

    pub fn columns(&self) -> Result<Vec<String>, StaffbookError> {
        Ok(self.cache.get()?.columns().to_vec())
    }

    /// Brings the dependent stores in line with the schema on disk. Run once at
    /// startup, before any request is served.
    pub fn run_startup(&self) -> Result<MigrationReport, StaffbookError> {
        let _tmr = timer!(Level::Info; "MigrationCoordinator::run_startup");
        let _edit = self.schema_edit.lock().unwrap_or_else(PoisonError::into_inner);

        let fields = self.schema.load_or_seed().map_err(|e| {
            error!("Startup migration aborted, stores left untouched: {}", e);
            e
        })?;
        let target_columns = derive_columns(&fields);

        let report = self.migrate(&fields, &target_columns)?;

        self.cache.load()?;
        self.audit_outcome(&report, &fields);

        Ok(report)
    }

    /// Validates and applies a full submitted field list, propagating any renames.
    pub fn update_schema(
        &self,
        submitted: Vec<FieldDefinition>,
    ) -> Result<SchemaUpdateResponse, StaffbookError> {
        let _edit = self.schema_edit.lock().unwrap_or_else(PoisonError::into_inner);
        self.update_schema_locked(submitted)
    }

    /// Appends a new field with a freshly allocated id and migrates.
    pub fn add_field(&self, new_field: NewField) -> Result<SchemaUpdateResponse, StaffbookError> {
        let _edit = self.schema_edit.lock().unwrap_or_else(PoisonError::into_inner);

        let current = self.schema.load()?.unwrap_or_default();
        let snapshot = self.snapshot.load()?;
        let field_name = new_field.field_name.trim();
        if current.iter().any(|f| f.field_name == field_name) {
            return Err(StaffbookError::Conflict(format!(
                "field_name '{}' is already in use",
                field_name
            )));
        }
        let field_id = allocate_field_id(field_name, &current, snapshot.as_ref());
        let field_order = current.iter().map(|f| f.field_order).max().unwrap_or(0) + 1;

        let field = FieldDefinition {
            field_id,
            field_order,
            field_name: field_name.to_owned(),
            field_label: new_field.field_label,
            field_type: new_field.field_type,
            field_options: new_field.field_options,
            show_in_table: new_field.show_in_table,
            field_group: new_field.field_group,
            editable_in_table: new_field.editable_in_table,
            role: None,
        };
        info!("Adding field '{}' as {}", field.field_name, field.field_id);

        let mut submitted = current;
        submitted.push(field);
        self.update_schema_locked(submitted)
    }

    fn update_schema_locked(
        &self,
        submitted: Vec<FieldDefinition>,
    ) -> Result<SchemaUpdateResponse, StaffbookError> {
        let _tmr = timer!(Level::Info; "MigrationCoordinator::update_schema");

        // Validate
        let current = self.schema.load()?.unwrap_or_default();
        if let Err(e) = validate_submission(&submitted, &current) {
            warn!("Rejected schema update: {}", e);
            return Err(e);
        }

        // PersistSchema
        self.schema.save(&submitted)?;

        // DeriveColumns
        let target_columns = derive_columns(&submitted);

        // AcquireLocks, Detect, Propagate, WriteSnapshot, InvalidateCache
        let report = self.migrate(&submitted, &target_columns)?;

        // Reload
        let layout = self.cache.load()?;

        // Audit
        self.audit_outcome(&report, &submitted);

        Ok(SchemaUpdateResponse {
            fields: layout.fields().to_vec(),
            rename_count: report.renames.len(),
            renames: report.renames,
        })
    }

    /// Computes what renaming `field_id` to `new_field_name` would touch, without
    /// changing anything.
    pub fn preview_rename(
        &self,
        field_id: &str,
        new_field_name: &str,
    ) -> Result<RenamePreview, StaffbookError> {
        let _tmr = timer!(Level::Debug; "MigrationCoordinator::preview_rename");

        let field_id = field_id.trim();
        let new_field_name = new_field_name.trim();

        let mut errors = ValidationErrors::new();
        if !is_valid_field_id(field_id) {
            errors.push(format!("Invalid field_id '{}'", field_id));
        }
        if !is_valid_field_name(new_field_name) {
            errors.push(format!(
                "field_name '{}' may only contain ASCII letters, digits and underscores",
                new_field_name
            ));
        }
        errors.into_result()?;

        let fields = self.schema.load()?.unwrap_or_default();
        let field = fields
            .iter()
            .find(|f| f.field_id == field_id)
            .ok_or_else(|| StaffbookError::NotFound(format!("field '{}'", field_id)))?;

        let mut errors = ValidationErrors::new();
        if fields
            .iter()
            .any(|f| f.field_id != field_id && f.field_name == new_field_name)
        {
            errors.push(format!("field_name '{}' is already in use", new_field_name));
        }
        if let Some(role) = field.role {
            if role.is_rename_protected() && field.field_name != new_field_name {
                errors.push(format!(
                    "Field '{}' carries the '{}' role and cannot be renamed",
                    field.field_name, role
                ));
            }
        }
        errors.into_result()?;

        let mut renames = RenameSet::new();
        if field.field_name != new_field_name {
            renames.insert_field(&field.field_name, new_field_name, field.is_file());
        }

        Ok(RenamePreview {
            field_id: field.field_id.clone(),
            old_field_name: field.field_name.clone(),
            new_field_name: new_field_name.to_owned(),
            renames: renames
                .iter()
                .map(|(old, new)| RenamePair {
                    old_name: old.to_owned(),
                    new_name: new.to_owned(),
                })
                .collect(),
            impact: ImpactIndex::load(self)?.impact(field),
        })
    }

    /// The current fields, each annotated with how many stored rows reference it.
    pub fn schema_with_impact(&self) -> Result<Vec<FieldWithImpact>, StaffbookError> {
        let layout = self.cache.get()?;
        let index = ImpactIndex::load(self)?;
        Ok(layout
            .fields()
            .iter()
            .map(|field| FieldWithImpact {
                field: field.clone(),
                impact: index.impact(field),
            })
            .collect())
    }

    /// Runs one migration under both store locks. A failed run drops the cached
    /// layout and blocks store edits before the locks are released, since the
    /// stores may now be split between the old and the new layout.
    fn migrate(
        &self,
        fields: &[FieldDefinition],
        target_columns: &[String],
    ) -> Result<MigrationReport, StaffbookError> {
        self.locks.with_migration_lock(|| {
            match self.migrate_locked(fields, target_columns) {
                Ok(report) => {
                    self.cache.allow_writes();
                    Ok(report)
                }
                Err(e) => {
                    error!(
                        "Field migration failed, store edits are blocked until a migration completes: {}",
                        e
                    );
                    self.cache.invalidate();
                    self.cache.block_writes();
                    Err(e)
                }
            }
        })
    }

    // Everything below runs with both store locks held.

    fn migrate_locked(
        &self,
        fields: &[FieldDefinition],
        target_columns: &[String],
    ) -> Result<MigrationReport, StaffbookError> {
        let mut report = MigrationReport::default();

        // Detection must start from a snapshot the stores agree with
        if let Some(intent) = self.intent.load()? {
            let (renames, stores) = self.complete_intent_locked(intent)?;
            report.replayed = Some(renames);
            report.stores = stores;
        }

        if fields.is_empty() {
            info!("Schema is empty, nothing to migrate");
            return Ok(report);
        }

        let next_snapshot = FieldMappingSnapshot::from_fields(fields);
        let snapshot = match self.snapshot.load()? {
            Some(snapshot) => snapshot,
            None => {
                self.snapshot.save(&next_snapshot)?;
                self.cache.invalidate();
                info!(
                    "No field mapping snapshot found, recorded {} fields as the baseline",
                    fields.len()
                );
                report.bootstrapped = true;
                return Ok(report);
            }
        };

        let renames = detect(fields, &snapshot);
        if renames.is_empty() {
            debug!("No field renames detected");
        } else {
            info!(
                "Detected {} column rename(s): {}",
                renames.len(),
                renames.describe()
            );
            let stores = self.propagate_all(&renames, target_columns, &next_snapshot)?;
            report.stores.extend(stores);
        }

        self.snapshot.save(&next_snapshot)?;
        if !renames.is_empty() && self.recovery == RecoveryMode::IntentLog {
            self.intent.clear()?;
        }
        self.cache.invalidate();

        report.renames = renames;
        Ok(report)
    }

    fn propagate_all(
        &self,
        renames: &RenameSet,
        target_columns: &[String],
        next_snapshot: &FieldMappingSnapshot,
    ) -> Result<Vec<StoreReport>, StaffbookError> {
        let propagator = self.propagator();

        match self.recovery {
            RecoveryMode::None => {
                let mut reports = Vec::new();
                for kind in StoreKind::iter() {
                    let outcome = match propagator.propagate(kind, renames, target_columns) {
                        Ok(outcome) => outcome,
                        Err(e) => {
                            error!("Failed to propagate renames to {}: {}", kind, e);
                            StoreOutcome::Failed
                        }
                    };
                    reports.push(StoreReport { store: kind, outcome });
                }
                Ok(reports)
            }
            RecoveryMode::IntentLog => {
                let mut intent = self.intent.begin(renames, target_columns, next_snapshot)?;
                self.propagate_pending(&propagator, &mut intent)
            }
            RecoveryMode::Backup => {
                let backup = BackupSet::capture(&self.paths.backups, &self.store_files())?;
                let mut reports = Vec::new();
                for kind in StoreKind::iter() {
                    match propagator.propagate(kind, renames, target_columns) {
                        Ok(outcome) => reports.push(StoreReport { store: kind, outcome }),
                        Err(e) => {
                            error!(
                                "Failed to propagate renames to {}, restoring {} backed up store(s): {}",
                                kind,
                                backup.len(),
                                e
                            );
                            if let Err(restore_err) = backup.restore() {
                                error!("Restoring store backups failed: {}", restore_err);
                            }
                            return Err(e);
                        }
                    }
                }
                backup.discard()?;
                Ok(reports)
            }
        }
    }

    fn propagate_pending(
        &self,
        propagator: &Propagator<'_>,
        intent: &mut MigrationIntent,
    ) -> Result<Vec<StoreReport>, StaffbookError> {
        let mut reports = Vec::new();
        for kind in StoreKind::iter() {
            if intent.is_completed(kind) {
                continue;
            }
            let outcome = propagator.propagate(kind, &intent.renames, &intent.target_columns)?;
            self.intent.mark_completed(intent, kind)?;
            reports.push(StoreReport { store: kind, outcome });
        }
        Ok(reports)
    }

    /// Finishes the stores an earlier run did not reach and writes the snapshot
    /// that run would have written. Idempotent, so a crash at any point during a
    /// replay is recovered by the next one.
    fn complete_intent_locked(
        &self,
        mut intent: MigrationIntent,
    ) -> Result<(RenameSet, Vec<StoreReport>), StaffbookError> {
        warn!(
            "Found an unfinished migration started at {}, completing {} rename(s): {}",
            intent.started_at,
            intent.renames.len(),
            intent.renames.describe()
        );

        let propagator = self.propagator();
        let stores = self.propagate_pending(&propagator, &mut intent)?;

        self.snapshot.save(&intent.snapshot)?;
        self.intent.clear()?;
        self.cache.invalidate();

        Ok((intent.renames, stores))
    }

    fn propagator(&self) -> Propagator<'_> {
        Propagator {
            records: &self.records,
            archive: &self.archive,
            templates: &self.templates,
            audit: &self.audit,
        }
    }

    fn store_files(&self) -> [&Path; 4] {
        [
            self.records.path(),
            self.archive.path(),
            self.templates.path(),
            self.audit.path(),
        ]
    }

    /// Appends the audit entries for one run. A baseline recording or an empty
    /// schema is not a migration and writes none.
    fn audit_outcome(&self, report: &MigrationReport, fields: &[FieldDefinition]) {
        if let Some(replayed) = &report.replayed {
            self.append_audit(format!(
                "Completed an interrupted migration. {}",
                rename_summary(replayed)
            ));
        }
        if report.bootstrapped || fields.is_empty() {
            return;
        }

        let details = if report.renames.is_empty() {
            "Field labels/order updated".to_owned()
        } else {
            rename_summary(&report.renames)
        };
        self.append_audit(details);
    }

    fn append_audit(&self, details: String) {
        if let Err(e) = self.audit.append(&AuditEntry::schema_migration(details)) {
            error!("Failed to write the schema migration audit entry: {}", e);
        }
    }
}

fn rename_summary(renames: &RenameSet) -> String {
    format!("Renamed {} field(s): {}", renames.len(), renames.describe())
}
