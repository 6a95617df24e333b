//! The user-editable field schema.
//!
//! A field has a permanent `field_id` and a mutable `field_name`. The name is
//! what every dependent store references (record column headers, template
//! placeholders, audit-log field references), so renames must be propagated by
//! the migration engine rather than applied in place.

mod columns;
mod snapshot;
mod validate;

pub use columns::{companion_columns, derive_columns, EXPIRY_DATE_SUFFIX, ISSUE_DATE_SUFFIX};
pub use snapshot::{FieldMappingSnapshot, SnapshotStore};
pub use validate::{is_valid_field_id, is_valid_field_name, validate_submission};

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use log::{info, warn};
use serde::{Deserialize, Deserializer, Serialize};
use strum::{AsRefStr, Display, EnumIter, EnumString};

use crate::error::StaffbookError;
use crate::tabular::{columns_of, Row, TabularFile};

/// Column layout of the schema file.
pub const SCHEMA_COLUMNS: [&str; 10] = [
    "field_id",
    "field_order",
    "field_name",
    "field_label",
    "field_type",
    "field_options",
    "show_in_table",
    "field_group",
    "editable_in_table",
    "role",
];

#[derive(
    Debug,
    Default,
    Copy,
    Clone,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
    EnumIter,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum FieldType {
    #[default]
    Text,
    Textarea,
    Select,
    Date,
    /// Uploaded document; carries issue and expiry date companion columns.
    File,
    Photo,
    Checkbox,
}

/// Semantic tags that let business logic find a field without hardcoding its name.
/// At most one field carries any given role.
#[derive(
    Debug,
    Copy,
    Clone,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
    EnumIter,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum FieldRole {
    EmployeeId,
    Photo,
    LastName,
    FirstName,
    MiddleName,
    EmploymentStatus,
}

impl FieldRole {
    /// Roles whose field name other stores treat as a fixed key.
    pub fn is_rename_protected(&self) -> bool {
        match self {
            FieldRole::EmployeeId | FieldRole::Photo => true,
            FieldRole::LastName
            | FieldRole::FirstName
            | FieldRole::MiddleName
            | FieldRole::EmploymentStatus => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDefinition {
    #[serde(default)]
    pub field_id: String,
    #[serde(default, deserialize_with = "lenient_order")]
    pub field_order: i64,
    #[serde(default)]
    pub field_name: String,
    #[serde(default)]
    pub field_label: String,
    #[serde(default)]
    pub field_type: FieldType,
    #[serde(default)]
    pub field_options: String,
    #[serde(default, deserialize_with = "lenient_bool")]
    pub show_in_table: bool,
    #[serde(default)]
    pub field_group: String,
    #[serde(default, deserialize_with = "lenient_bool")]
    pub editable_in_table: bool,
    #[serde(default, deserialize_with = "optional_role")]
    pub role: Option<FieldRole>,
}

impl FieldDefinition {
    pub fn new(field_id: &str, field_order: i64, field_name: &str, field_type: FieldType) -> Self {
        FieldDefinition {
            field_id: field_id.to_owned(),
            field_order,
            field_name: field_name.to_owned(),
            field_label: String::new(),
            field_type,
            field_options: String::new(),
            show_in_table: false,
            field_group: String::new(),
            editable_in_table: false,
            role: None,
        }
    }

    pub fn with_label(mut self, label: &str) -> Self {
        self.field_label = label.to_owned();
        self
    }

    pub fn with_role(mut self, role: FieldRole) -> Self {
        self.role = Some(role);
        self
    }

    pub fn with_group(mut self, group: &str) -> Self {
        self.field_group = group.to_owned();
        self
    }

    pub fn with_options(mut self, options: &str) -> Self {
        self.field_options = options.to_owned();
        self
    }

    pub fn shown_in_table(mut self) -> Self {
        self.show_in_table = true;
        self
    }

    pub fn is_file(&self) -> bool {
        self.field_type == FieldType::File
    }

    /// Parses a schema-file row. Unknown types and roles are read leniently.
    pub fn from_row(row: &Row) -> Self {
        let get = |key: &str| row.get(key).map(|v| v.trim()).unwrap_or("");

        let field_type = get("field_type");
        let field_type = if field_type.is_empty() {
            FieldType::default()
        } else {
            field_type.to_ascii_lowercase().parse().unwrap_or_else(|_| {
                warn!(
                    "Unknown field type '{}' on field '{}', treating as text",
                    field_type,
                    get("field_id")
                );
                FieldType::Text
            })
        };

        let role = get("role");
        let role = if role.is_empty() {
            None
        } else {
            match role.parse::<FieldRole>() {
                Ok(role) => Some(role),
                Err(_) => {
                    warn!(
                        "Unknown role '{}' on field '{}', ignoring it",
                        role,
                        get("field_id")
                    );
                    None
                }
            }
        };

        FieldDefinition {
            field_id: get("field_id").to_owned(),
            field_order: parse_order(get("field_order")),
            field_name: get("field_name").to_owned(),
            field_label: row.get("field_label").cloned().unwrap_or_default(),
            field_type,
            field_options: row.get("field_options").cloned().unwrap_or_default(),
            show_in_table: parse_bool(get("show_in_table")),
            field_group: row.get("field_group").cloned().unwrap_or_default(),
            editable_in_table: parse_bool(get("editable_in_table")),
            role,
        }
    }

    pub fn to_row(&self) -> Row {
        let flag = |b: bool| if b { "1" } else { "0" }.to_owned();
        let mut row = Row::with_capacity(SCHEMA_COLUMNS.len());
        row.insert("field_id".into(), self.field_id.clone());
        row.insert("field_order".into(), self.field_order.to_string());
        row.insert("field_name".into(), self.field_name.clone());
        row.insert("field_label".into(), self.field_label.clone());
        row.insert("field_type".into(), self.field_type.to_string());
        row.insert("field_options".into(), self.field_options.clone());
        row.insert("show_in_table".into(), flag(self.show_in_table));
        row.insert("field_group".into(), self.field_group.clone());
        row.insert("editable_in_table".into(), flag(self.editable_in_table));
        row.insert(
            "role".into(),
            self.role.map(|r| r.to_string()).unwrap_or_default(),
        );
        row
    }
}

/// Non-numeric or missing order sorts as 0.
fn parse_order(value: &str) -> i64 {
    value.trim().parse().unwrap_or(0)
}

fn parse_bool(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Loose {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

fn lenient_order<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i64, D::Error> {
    Ok(match Option::<Loose>::deserialize(deserializer)? {
        Some(Loose::Int(n)) => n,
        Some(Loose::Float(f)) => f as i64,
        Some(Loose::Str(s)) => parse_order(&s),
        Some(Loose::Bool(_)) | None => 0,
    })
}

fn lenient_bool<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
    Ok(match Option::<Loose>::deserialize(deserializer)? {
        Some(Loose::Bool(b)) => b,
        Some(Loose::Int(n)) => n != 0,
        Some(Loose::Float(f)) => f != 0.0,
        Some(Loose::Str(s)) => parse_bool(&s),
        None => false,
    })
}

/// An empty string or null means no role; any other unknown value is an error.
fn optional_role<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<FieldRole>, D::Error> {
    match Option::<String>::deserialize(deserializer)? {
        None => Ok(None),
        Some(s) if s.trim().is_empty() => Ok(None),
        Some(s) => s
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| serde::de::Error::custom(format!("unknown field role '{}'", s))),
    }
}

/// Returns the fields sorted by `field_order`. The sort is stable, so fields that
/// share an order keep their relative position.
pub fn sorted_by_order(fields: &[FieldDefinition]) -> Vec<FieldDefinition> {
    let mut sorted = fields.to_vec();
    sorted.sort_by_key(|f| f.field_order);
    sorted
}

/// Picks a fresh `field_id` for a new field. Ids used by the current schema or
/// remembered in the snapshot are never handed out again.
pub fn allocate_field_id(
    field_name: &str,
    fields: &[FieldDefinition],
    snapshot: Option<&FieldMappingSnapshot>,
) -> String {
    let taken = |id: &str| {
        fields.iter().any(|f| f.field_id == id)
            || snapshot.is_some_and(|s| s.contains_id(id))
    };

    let base = format!("f_{}", field_name);
    if !taken(&base) {
        return base;
    }
    let mut n = 2u64;
    loop {
        let candidate = format!("{}_{}", base, n);
        if !taken(&candidate) {
            return candidate;
        }
        n += 1;
    }
}

/// Field definitions seeded when no schema file exists yet.
pub fn default_fields() -> Vec<FieldDefinition> {
    vec![
        FieldDefinition::new("f_employee_id", 1, "employee_id", FieldType::Text)
            .with_label("Employee ID")
            .with_group("General")
            .with_role(FieldRole::EmployeeId)
            .shown_in_table(),
        FieldDefinition::new("f_last_name", 2, "last_name", FieldType::Text)
            .with_label("Last name")
            .with_group("Personal")
            .with_role(FieldRole::LastName)
            .shown_in_table(),
        FieldDefinition::new("f_first_name", 3, "first_name", FieldType::Text)
            .with_label("First name")
            .with_group("Personal")
            .with_role(FieldRole::FirstName)
            .shown_in_table(),
        FieldDefinition::new("f_middle_name", 4, "middle_name", FieldType::Text)
            .with_label("Middle name")
            .with_group("Personal")
            .with_role(FieldRole::MiddleName),
        FieldDefinition::new("f_birth_date", 5, "birth_date", FieldType::Date)
            .with_label("Date of birth")
            .with_group("Personal"),
        FieldDefinition::new("f_position", 6, "position", FieldType::Text)
            .with_label("Position")
            .with_group("Employment")
            .shown_in_table(),
        FieldDefinition::new("f_department", 7, "department", FieldType::Text)
            .with_label("Department")
            .with_group("Employment"),
        FieldDefinition::new("f_employment_status", 8, "employment_status", FieldType::Select)
            .with_label("Employment status")
            .with_group("Employment")
            .with_options("working|vacation|sick_leave|fired")
            .with_role(FieldRole::EmploymentStatus)
            .shown_in_table(),
        FieldDefinition::new("f_photo", 9, "photo", FieldType::Photo)
            .with_label("Photo")
            .with_group("General")
            .with_role(FieldRole::Photo),
        FieldDefinition::new("f_medical_file", 10, "medical_file", FieldType::File)
            .with_label("Medical certificate")
            .with_group("Documents"),
    ]
}

/// Persists the field definitions in the schema file.
pub struct SchemaStore {
    path: PathBuf,
}

impl SchemaStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Loads the schema. `Ok(None)` if the file does not exist; a present file that
    /// cannot be read or lacks the identity columns is `SchemaUnreadable`.
    pub fn load(&self) -> Result<Option<Vec<FieldDefinition>>, StaffbookError> {
        match fs::metadata(&self.path) {
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(self.unreadable(e.to_string())),
        }

        let table = TabularFile::read(&self.path)
            .map_err(|e| self.unreadable(e.to_string()))?
            .ok_or_else(|| self.unreadable("file disappeared while reading".into()))?;

        for required in ["field_id", "field_name"] {
            if !table.header.iter().any(|h| h == required) {
                return Err(self.unreadable(format!("missing '{}' column", required)));
            }
        }

        Ok(Some(table.rows.iter().map(FieldDefinition::from_row).collect()))
    }

    /// Loads the schema, seeding and persisting the default field set if the file
    /// does not exist yet.
    pub fn load_or_seed(&self) -> Result<Vec<FieldDefinition>, StaffbookError> {
        if let Some(fields) = self.load()? {
            return Ok(fields);
        }

        let fields = default_fields();
        info!(
            "No schema at {}, seeding {} default fields",
            self.path.display(),
            fields.len()
        );
        self.save(&fields)?;
        Ok(fields)
    }

    pub fn save(&self, fields: &[FieldDefinition]) -> Result<(), StaffbookError> {
        let rows: Vec<Row> = fields.iter().map(FieldDefinition::to_row).collect();
        TabularFile::write(&self.path, &columns_of(&SCHEMA_COLUMNS), &rows)
    }

    fn unreadable(&self, reason: String) -> StaffbookError {
        StaffbookError::SchemaUnreadable {
            path: self.path.clone(),
            reason,
        }
    }
}
