use std::fs;
use std::path::Path;

use pretty_assertions::assert_eq;
use tempfile::TempDir;

use staffbook::audit::{AUDIT_COLUMNS, SCHEMA_MIGRATION_ACTION};
use staffbook::config::StorePaths;
use staffbook::error::StaffbookError;
use staffbook::migration::{
    IntentLog, MigrationCoordinator, NewField, RecoveryMode, RenameSet, StoreKind, StoreOutcome,
};
use staffbook::schema::{
    derive_columns, FieldDefinition, FieldRole, FieldType, SchemaStore, SnapshotStore,
};
use staffbook::tabular::{columns_of, row_of, Table, TabularFile};

fn coordinator(dir: &TempDir, recovery: RecoveryMode) -> MigrationCoordinator {
    MigrationCoordinator::new(StorePaths::new(dir.path()), recovery)
}

/// A started coordinator over the seeded default schema.
fn started(dir: &TempDir, recovery: RecoveryMode) -> MigrationCoordinator {
    let coordinator = coordinator(dir, recovery);
    let report = coordinator.run_startup().unwrap();
    assert!(report.bootstrapped);
    coordinator
}

fn current_fields(coordinator: &MigrationCoordinator) -> Vec<FieldDefinition> {
    coordinator.layout().unwrap().fields().to_vec()
}

fn renamed(fields: &[FieldDefinition], field_id: &str, new_name: &str) -> Vec<FieldDefinition> {
    let mut fields = fields.to_vec();
    for field in fields.iter_mut().filter(|f| f.field_id == field_id) {
        field.field_name = new_name.to_owned();
    }
    fields
}

fn write_records(coordinator: &MigrationCoordinator) {
    let columns = coordinator.columns().unwrap();
    TabularFile::write(
        &coordinator.paths().records,
        &columns,
        &[
            row_of([("employee_id", "1"), ("last_name", "Петренко"), ("first_name", "Іван")]),
            row_of([("employee_id", "2"), ("last_name", "Іваненко"), ("first_name", "Олег")]),
        ],
    )
    .unwrap();
}

fn write_templates(path: &Path) {
    TabularFile::write(
        path,
        &columns_of(&["template_id", "template_name", "placeholder_fields", "is_active"]),
        &[
            row_of([
                ("template_id", "1"),
                ("template_name", "Vacation order"),
                ("placeholder_fields", "last_name,first_name"),
                ("is_active", "1"),
            ]),
            row_of([
                ("template_id", "2"),
                ("template_name", "Reference"),
                ("placeholder_fields", "position"),
                ("is_active", "1"),
            ]),
        ],
    )
    .unwrap();
}

fn write_audit_log(path: &Path) {
    TabularFile::write(
        path,
        &columns_of(&AUDIT_COLUMNS),
        &[row_of([
            ("log_id", "1"),
            ("timestamp", "2024-05-01T10:00:00+03:00"),
            ("action", "update"),
            ("field_name", "Прізвище (last_name)"),
            ("old_value", "last_name"),
            ("new_value", "Петренко"),
        ])],
    )
    .unwrap();
}

fn read(path: &Path) -> Table {
    TabularFile::read(path).unwrap().unwrap()
}

fn bytes(path: &Path) -> Vec<u8> {
    fs::read(path).unwrap()
}

#[test]
fn rename_is_propagated_to_every_store() {
    let dir = TempDir::new().unwrap();
    let coordinator = started(&dir, RecoveryMode::IntentLog);
    let paths = coordinator.paths().clone();
    write_records(&coordinator);
    write_templates(&paths.templates);
    write_audit_log(&paths.audit_log);

    let submitted = renamed(&current_fields(&coordinator), "f_last_name", "surname");
    let response = coordinator.update_schema(submitted.clone()).unwrap();

    let mut expected = RenameSet::new();
    expected.insert("last_name", "surname");
    assert_eq!(response.renames, expected);
    assert_eq!(response.rename_count, 1);

    let records = read(&paths.records);
    assert_eq!(records.header, derive_columns(&submitted));
    assert_eq!(records.rows[0]["surname"], "Петренко");
    assert_eq!(records.rows[1]["surname"], "Іваненко");
    assert_eq!(records.rows[1]["first_name"], "Олег");
    assert!(!records.rows[0].contains_key("last_name"));

    let templates = read(&paths.templates);
    assert_eq!(templates.rows[0]["placeholder_fields"], "surname,first_name");
    assert_eq!(templates.rows[1]["placeholder_fields"], "position");

    let audit = read(&paths.audit_log);
    assert_eq!(audit.rows[0]["field_name"], "Прізвище (surname)");
    assert_eq!(audit.rows[0]["old_value"], "last_name");
    let entry = audit.rows.last().unwrap();
    assert_eq!(entry["action"], SCHEMA_MIGRATION_ACTION);
    assert_eq!(entry["details"], "Renamed 1 field(s): last_name→surname");

    let snapshot = SnapshotStore::new(&paths.snapshot).load().unwrap().unwrap();
    assert_eq!(snapshot.name_of("f_last_name"), Some("surname"));
    assert!(IntentLog::new(&paths.intent).load().unwrap().is_none());

    let columns = coordinator.columns().unwrap();
    assert!(columns.contains(&"surname".to_owned()));
    assert!(!columns.contains(&"last_name".to_owned()));
}

#[test]
fn resubmitting_the_same_schema_renames_nothing() {
    let dir = TempDir::new().unwrap();
    let coordinator = started(&dir, RecoveryMode::IntentLog);
    write_records(&coordinator);

    let submitted = renamed(&current_fields(&coordinator), "f_last_name", "surname");
    coordinator.update_schema(submitted.clone()).unwrap();
    let records_after_first = bytes(&coordinator.paths().records);

    let response = coordinator.update_schema(submitted).unwrap();
    assert!(response.renames.is_empty());
    assert_eq!(response.rename_count, 0);
    assert_eq!(bytes(&coordinator.paths().records), records_after_first);

    let audit = read(&coordinator.paths().audit_log);
    assert_eq!(audit.rows.last().unwrap()["details"], "Field labels/order updated");

    let report = coordinator.run_startup().unwrap();
    assert!(report.renames.is_empty());
    assert!(!report.bootstrapped);
}

#[test]
fn file_field_rename_carries_companion_dates() {
    let dir = TempDir::new().unwrap();
    let coordinator = started(&dir, RecoveryMode::IntentLog);
    coordinator
        .add_field(NewField {
            field_name: "insurance_file".to_owned(),
            field_label: "Insurance".to_owned(),
            field_type: FieldType::File,
            ..NewField::default()
        })
        .unwrap();

    TabularFile::write(
        &coordinator.paths().records,
        &coordinator.columns().unwrap(),
        &[row_of([
            ("employee_id", "7"),
            ("insurance_file", "files/7/insurance.pdf"),
            ("insurance_file_issue_date", "2024-01-01"),
            ("insurance_file_expiry_date", "2025-01-01"),
        ])],
    )
    .unwrap();

    let submitted = renamed(&current_fields(&coordinator), "f_insurance_file", "policy_file");
    let response = coordinator.update_schema(submitted).unwrap();

    assert_eq!(response.rename_count, 3);
    assert_eq!(
        response.renames.get("insurance_file_issue_date"),
        Some("policy_file_issue_date")
    );

    let records = read(&coordinator.paths().records);
    assert_eq!(records.rows[0]["policy_file"], "files/7/insurance.pdf");
    assert_eq!(records.rows[0]["policy_file_issue_date"], "2024-01-01");
    assert_eq!(records.rows[0]["policy_file_expiry_date"], "2025-01-01");
    assert!(!records.header.contains(&"insurance_file".to_owned()));
}

#[test]
fn adding_a_field_is_not_a_rename() {
    let dir = TempDir::new().unwrap();
    let coordinator = started(&dir, RecoveryMode::IntentLog);
    write_records(&coordinator);
    write_templates(&coordinator.paths().templates);
    let records_before = bytes(&coordinator.paths().records);
    let templates_before = bytes(&coordinator.paths().templates);

    let response = coordinator
        .add_field(NewField {
            field_name: "salary".to_owned(),
            ..NewField::default()
        })
        .unwrap();

    assert_eq!(response.rename_count, 0);
    assert_eq!(response.fields.last().unwrap().field_id, "f_salary");
    assert_eq!(bytes(&coordinator.paths().records), records_before);
    assert_eq!(bytes(&coordinator.paths().templates), templates_before);
    assert!(coordinator.columns().unwrap().contains(&"salary".to_owned()));
}

#[test]
fn protected_role_rename_is_rejected_without_side_effects() {
    let dir = TempDir::new().unwrap();
    let coordinator = started(&dir, RecoveryMode::IntentLog);
    let paths = coordinator.paths().clone();
    write_records(&coordinator);
    write_templates(&paths.templates);
    write_audit_log(&paths.audit_log);

    let files = [
        &paths.schema,
        &paths.snapshot,
        &paths.records,
        &paths.templates,
        &paths.audit_log,
    ];
    let before: Vec<Vec<u8>> = files.iter().map(|p| bytes(p)).collect();

    let submitted = renamed(&current_fields(&coordinator), "f_employee_id", "staff_id");
    let result = coordinator.update_schema(submitted);
    assert!(matches!(result, Err(StaffbookError::Validation(_))));

    let after: Vec<Vec<u8>> = files.iter().map(|p| bytes(p)).collect();
    assert_eq!(after, before);
}

#[test]
fn first_startup_records_baseline_without_renames() {
    let dir = TempDir::new().unwrap();
    let paths = StorePaths::new(dir.path());
    SchemaStore::new(&paths.schema)
        .save(&[
            FieldDefinition::new("f_code", 1, "code", FieldType::Text),
            FieldDefinition::new("f_nick", 2, "nick", FieldType::Text),
        ])
        .unwrap();
    fs::write(&paths.records, "code;nickname\r\n1;Bob\r\n").unwrap();

    let report = coordinator(&dir, RecoveryMode::IntentLog).run_startup().unwrap();

    assert!(report.bootstrapped);
    assert!(report.renames.is_empty());
    let snapshot = SnapshotStore::new(&paths.snapshot).load().unwrap().unwrap();
    assert_eq!(snapshot.name_of("f_nick"), Some("nick"));
    assert_eq!(fs::read_to_string(&paths.records).unwrap(), "code;nickname\r\n1;Bob\r\n");
    assert!(!paths.audit_log.exists());
}

#[test]
fn empty_schema_is_a_no_op() {
    let dir = TempDir::new().unwrap();
    let paths = StorePaths::new(dir.path());
    SchemaStore::new(&paths.schema).save(&[]).unwrap();

    let report = coordinator(&dir, RecoveryMode::IntentLog).run_startup().unwrap();

    assert!(!report.bootstrapped);
    assert!(report.renames.is_empty());
    assert!(!paths.snapshot.exists());
}

#[test]
fn unreadable_schema_aborts_startup() {
    let dir = TempDir::new().unwrap();
    let paths = StorePaths::new(dir.path());
    fs::write(&paths.schema, "id;label\r\nf_a;A\r\n").unwrap();
    fs::write(&paths.records, "a\r\n1\r\n").unwrap();

    let result = coordinator(&dir, RecoveryMode::IntentLog).run_startup();

    assert!(matches!(result, Err(StaffbookError::SchemaUnreadable { .. })));
    assert_eq!(fs::read_to_string(&paths.schema).unwrap(), "id;label\r\nf_a;A\r\n");
    assert_eq!(fs::read_to_string(&paths.records).unwrap(), "a\r\n1\r\n");
    assert!(!paths.snapshot.exists());
}

#[test]
fn interrupted_migration_is_completed_on_startup() {
    let dir = TempDir::new().unwrap();
    let coordinator = started(&dir, RecoveryMode::IntentLog);
    let paths = coordinator.paths().clone();
    write_records(&coordinator);
    write_templates(&paths.templates);

    // A valid templates file is replaced with bytes that are not UTF-8, so the
    // template rewrite fails after the record store has been migrated.
    let templates = bytes(&paths.templates);
    fs::write(&paths.templates, [0xff, 0xfe, 0x00, 0xc3]).unwrap();

    let submitted = renamed(&current_fields(&coordinator), "f_last_name", "surname");
    assert!(coordinator.update_schema(submitted).is_err());

    let intent = IntentLog::new(&paths.intent).load().unwrap().unwrap();
    assert!(intent.is_completed(StoreKind::Records));
    assert!(!intent.is_completed(StoreKind::Templates));
    assert_eq!(read(&paths.records).rows[0]["surname"], "Петренко");
    let snapshot = SnapshotStore::new(&paths.snapshot).load().unwrap().unwrap();
    assert_eq!(snapshot.name_of("f_last_name"), Some("last_name"));

    fs::write(&paths.templates, templates).unwrap();
    let restarted = MigrationCoordinator::new(paths.clone(), RecoveryMode::IntentLog);
    let report = restarted.run_startup().unwrap();

    let replayed = report.replayed.as_ref().unwrap();
    assert_eq!(replayed.get("last_name"), Some("surname"));
    assert!(report.renames.is_empty());
    assert!(report
        .stores
        .iter()
        .all(|s| s.store != StoreKind::Records));
    assert_eq!(read(&paths.templates).rows[0]["placeholder_fields"], "surname,first_name");
    assert_eq!(read(&paths.records).rows[0]["surname"], "Петренко");
    let snapshot = SnapshotStore::new(&paths.snapshot).load().unwrap().unwrap();
    assert_eq!(snapshot.name_of("f_last_name"), Some("surname"));
    assert!(!paths.intent.exists());
    let details: Vec<String> = read(&paths.audit_log)
        .rows
        .iter()
        .map(|r| r["details"].clone())
        .collect();
    assert_eq!(
        details,
        [
            "Completed an interrupted migration. Renamed 1 field(s): last_name→surname",
            "Field labels/order updated",
        ]
    );

    let report = restarted.run_startup().unwrap();
    assert!(report.replayed.is_none());
    assert!(report.renames.is_empty());
}

#[test]
fn failed_migration_blocks_record_edits_until_a_migration_completes() {
    let dir = TempDir::new().unwrap();
    let coordinator = started(&dir, RecoveryMode::IntentLog);
    let paths = coordinator.paths().clone();
    write_records(&coordinator);
    write_templates(&paths.templates);
    let templates = bytes(&paths.templates);
    fs::write(&paths.templates, [0xff, 0xfe, 0x00, 0xc3]).unwrap();

    let submitted = renamed(&current_fields(&coordinator), "f_last_name", "surname");
    assert!(coordinator.update_schema(submitted.clone()).is_err());

    // The record store already carries the new names
    let edit = row_of([("employee_id", "2"), ("position", "Cook")]);
    let upsert = || {
        coordinator
            .records()
            .upsert(coordinator.locks(), coordinator.cache(), &edit)
    };
    assert!(matches!(upsert(), Err(StaffbookError::Conflict(_))));
    assert_eq!(read(&paths.records).rows[1]["surname"], "Іваненко");
    assert!(coordinator.columns().unwrap().contains(&"surname".to_owned()));

    fs::write(&paths.templates, templates).unwrap();
    let response = coordinator.update_schema(submitted).unwrap();
    assert!(response.renames.is_empty());
    assert!(!paths.intent.exists());

    assert!(!upsert().unwrap());
    let records = read(&paths.records);
    assert_eq!(records.header, coordinator.columns().unwrap());
    assert_eq!(records.rows[0]["surname"], "Петренко");
    assert_eq!(records.rows[1]["surname"], "Іваненко");
    assert_eq!(records.rows[1]["position"], "Cook");
    assert_eq!(read(&paths.templates).rows[0]["placeholder_fields"], "surname,first_name");
}

#[test]
fn second_edit_after_failed_migration_finishes_the_first() {
    let dir = TempDir::new().unwrap();
    let coordinator = started(&dir, RecoveryMode::IntentLog);
    let paths = coordinator.paths().clone();
    write_records(&coordinator);
    write_templates(&paths.templates);
    let templates = bytes(&paths.templates);
    fs::write(&paths.templates, [0xff, 0xfe, 0x00, 0xc3]).unwrap();

    let surname = renamed(&current_fields(&coordinator), "f_last_name", "surname");
    assert!(coordinator.update_schema(surname.clone()).is_err());

    fs::write(&paths.templates, templates).unwrap();
    let family_name = renamed(&surname, "f_last_name", "family_name");
    let response = coordinator.update_schema(family_name).unwrap();

    assert_eq!(response.rename_count, 1);
    assert_eq!(response.renames.get("surname"), Some("family_name"));
    assert!(!paths.intent.exists());

    let records = read(&paths.records);
    assert_eq!(records.header, coordinator.columns().unwrap());
    assert!(records.header.contains(&"family_name".to_owned()));
    assert!(!records.header.contains(&"surname".to_owned()));
    assert_eq!(records.rows[0]["family_name"], "Петренко");
    assert_eq!(read(&paths.templates).rows[0]["placeholder_fields"], "family_name,first_name");

    let snapshot = SnapshotStore::new(&paths.snapshot).load().unwrap().unwrap();
    assert_eq!(snapshot.name_of("f_last_name"), Some("family_name"));
    let audit = read(&paths.audit_log);
    assert_eq!(
        audit.rows.last().unwrap()["details"],
        "Renamed 1 field(s): surname→family_name"
    );
}

#[test]
fn every_startup_migration_is_audited() {
    let dir = TempDir::new().unwrap();
    let coordinator = started(&dir, RecoveryMode::IntentLog);
    let paths = coordinator.paths().clone();
    assert!(!paths.audit_log.exists());

    let report = coordinator.run_startup().unwrap();
    assert!(!report.bootstrapped);
    assert!(report.renames.is_empty());

    let audit = read(&paths.audit_log);
    assert_eq!(audit.rows.len(), 1);
    assert_eq!(audit.rows[0]["action"], SCHEMA_MIGRATION_ACTION);
    assert_eq!(audit.rows[0]["details"], "Field labels/order updated");
}

#[test]
fn backup_mode_restores_stores_on_failure() {
    let dir = TempDir::new().unwrap();
    let coordinator = started(&dir, RecoveryMode::Backup);
    let paths = coordinator.paths().clone();
    write_records(&coordinator);
    fs::write(&paths.templates, [0xff, 0xfe, 0x00, 0xc3]).unwrap();
    let records_before = bytes(&paths.records);

    let submitted = renamed(&current_fields(&coordinator), "f_last_name", "surname");
    assert!(coordinator.update_schema(submitted).is_err());

    assert_eq!(bytes(&paths.records), records_before);
    let snapshot = SnapshotStore::new(&paths.snapshot).load().unwrap().unwrap();
    assert_eq!(snapshot.name_of("f_last_name"), Some("last_name"));
    assert!(!paths.intent.exists());
}

#[test]
fn no_recovery_skips_the_failed_store() {
    let dir = TempDir::new().unwrap();
    let coordinator = started(&dir, RecoveryMode::None);
    let paths = coordinator.paths().clone();
    write_records(&coordinator);
    fs::write(&paths.templates, [0xff, 0xfe, 0x00, 0xc3]).unwrap();

    let submitted = renamed(&current_fields(&coordinator), "f_last_name", "surname");
    let response = coordinator.update_schema(submitted).unwrap();

    assert_eq!(response.rename_count, 1);
    assert_eq!(read(&paths.records).rows[0]["surname"], "Петренко");
    let snapshot = SnapshotStore::new(&paths.snapshot).load().unwrap().unwrap();
    assert_eq!(snapshot.name_of("f_last_name"), Some("surname"));
}

#[test]
fn preview_reports_impact_without_writing() {
    let dir = TempDir::new().unwrap();
    let coordinator = started(&dir, RecoveryMode::IntentLog);
    let paths = coordinator.paths().clone();
    write_records(&coordinator);
    write_templates(&paths.templates);
    write_audit_log(&paths.audit_log);
    let records_before = bytes(&paths.records);

    let preview = coordinator.preview_rename("f_last_name", "surname").unwrap();
    assert_eq!(preview.old_field_name, "last_name");
    assert_eq!(preview.new_field_name, "surname");
    assert_eq!(preview.renames.len(), 1);
    assert_eq!(preview.impact.records, 2);
    assert_eq!(preview.impact.templates, 1);
    assert_eq!(preview.impact.audit_log, 1);
    assert_eq!(bytes(&paths.records), records_before);

    let file_preview = coordinator.preview_rename("f_medical_file", "health_file").unwrap();
    assert_eq!(file_preview.renames.len(), 3);

    assert!(matches!(
        coordinator.preview_rename("f_missing", "x"),
        Err(StaffbookError::NotFound(_))
    ));
    assert!(matches!(
        coordinator.preview_rename("f_last_name", "first_name"),
        Err(StaffbookError::Validation(_))
    ));
    assert!(matches!(
        coordinator.preview_rename("f_photo", "portrait"),
        Err(StaffbookError::Validation(_))
    ));
    assert!(matches!(
        coordinator.preview_rename("f_last_name", "bad name"),
        Err(StaffbookError::Validation(_))
    ));
}

#[test]
fn schema_with_impact_counts_references() {
    let dir = TempDir::new().unwrap();
    let coordinator = started(&dir, RecoveryMode::IntentLog);
    write_records(&coordinator);
    write_templates(&coordinator.paths().templates);

    let fields = coordinator.schema_with_impact().unwrap();
    let position = fields.iter().find(|f| f.field.field_id == "f_position").unwrap();
    assert_eq!(position.impact.records, 0);
    assert_eq!(position.impact.templates, 1);
    let first_name = fields.iter().find(|f| f.field.field_id == "f_first_name").unwrap();
    assert_eq!(first_name.impact.records, 2);
}

#[test]
fn propagation_outcomes_are_reported() {
    let dir = TempDir::new().unwrap();
    let coordinator = started(&dir, RecoveryMode::IntentLog);
    write_records(&coordinator);

    let paths = coordinator.paths().clone();
    let schema = SchemaStore::new(&paths.schema);
    let fields = renamed(&schema.load().unwrap().unwrap(), "f_first_name", "given_name");
    schema.save(&fields).unwrap();

    let report = coordinator.run_startup().unwrap();
    let outcome = |kind| report.stores.iter().find(|s| s.store == kind).map(|s| s.outcome);
    assert_eq!(outcome(StoreKind::Records), Some(StoreOutcome::Rewritten { rows: 2 }));
    assert_eq!(outcome(StoreKind::Archive), Some(StoreOutcome::Missing));
    assert_eq!(outcome(StoreKind::Templates), Some(StoreOutcome::Missing));

    let audit = read(&paths.audit_log);
    assert_eq!(audit.rows.len(), 1);
    assert_eq!(audit.rows[0]["details"], "Renamed 1 field(s): first_name→given_name");
}

#[test]
fn record_edits_interleave_with_migrations() {
    let dir = TempDir::new().unwrap();
    let coordinator = started(&dir, RecoveryMode::IntentLog);
    write_records(&coordinator);
    let fields = current_fields(&coordinator);

    std::thread::scope(|scope| {
        scope.spawn(|| {
            for i in 100..120 {
                let id = i.to_string();
                coordinator
                    .records()
                    .upsert(
                        coordinator.locks(),
                        coordinator.cache(),
                        &row_of([("employee_id", id.as_str())]),
                    )
                    .unwrap();
            }
        });
        scope.spawn(|| {
            for round in 0..10 {
                let name = if round % 2 == 0 { "surname" } else { "last_name" };
                coordinator
                    .update_schema(renamed(&fields, "f_last_name", name))
                    .unwrap();
            }
        });
    });

    let layout = coordinator.layout().unwrap();
    let last_name = layout.column_for_role(FieldRole::LastName).unwrap();
    assert_eq!(last_name, "last_name");

    let records = read(&coordinator.paths().records);
    assert_eq!(records.header, layout.columns().to_vec());
    assert_eq!(records.rows.len(), 22);
    assert_eq!(records.rows[0][last_name], "Петренко");
    assert_eq!(records.rows[1][last_name], "Іваненко");
}
