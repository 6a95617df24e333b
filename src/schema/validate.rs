use std::collections::{HashMap, HashSet};

use super::{FieldDefinition, FieldRole};
use crate::error::{StaffbookError, ValidationErrors};

/// `^f_[A-Za-z0-9_]+$`
pub fn is_valid_field_id(id: &str) -> bool {
    id.strip_prefix("f_")
        .is_some_and(|rest| !rest.is_empty() && rest.chars().all(is_name_char))
}

/// `^[A-Za-z0-9_]+$`. Names double as column headers and placeholder tokens.
pub fn is_valid_field_name(name: &str) -> bool {
    !name.is_empty() && name.chars().all(is_name_char)
}

fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// Checks a full submitted field list against the schema currently on disk.
/// Every violation is collected; nothing is written by this function.
pub fn validate_submission(
    submitted: &[FieldDefinition],
    current: &[FieldDefinition],
) -> Result<(), StaffbookError> {
    let mut errors = ValidationErrors::new();
    let mut ids = HashSet::new();
    let mut names = HashSet::new();
    let mut role_holders: HashMap<FieldRole, &str> = HashMap::new();

    for (index, field) in submitted.iter().enumerate() {
        let position = index + 1;

        if field.field_id.is_empty() {
            errors.push(format!("Field #{position} has no field_id"));
        } else if !is_valid_field_id(&field.field_id) {
            errors.push(format!(
                "Field #{position}: field_id '{}' must match f_[A-Za-z0-9_]+",
                field.field_id
            ));
        } else if !ids.insert(field.field_id.as_str()) {
            errors.push(format!("Duplicate field_id '{}'", field.field_id));
        }

        if field.field_name.is_empty() {
            errors.push(format!("Field #{position} has an empty field_name"));
        } else if !is_valid_field_name(&field.field_name) {
            errors.push(format!(
                "Field #{position}: field_name '{}' may only contain ASCII letters, digits and underscores",
                field.field_name
            ));
        } else if !names.insert(field.field_name.as_str()) {
            errors.push(format!("Duplicate field_name '{}'", field.field_name));
        }

        if let Some(role) = field.role {
            if let Some(holder) = role_holders.insert(role, field.field_name.as_str()) {
                errors.push(format!(
                    "Role '{}' is assigned to both '{}' and '{}'",
                    role, holder, field.field_name
                ));
            }
        }
    }

    for existing in current {
        let Some(role) = existing.role else {
            continue;
        };

        match submitted.iter().find(|f| f.field_id == existing.field_id) {
            None => errors.push(format!(
                "Field '{}' carries the '{}' role and cannot be deleted",
                existing.field_name, role
            )),
            Some(field) => {
                if field.role != Some(role) {
                    errors.push(format!(
                        "The '{}' role cannot be removed from field '{}'",
                        role, existing.field_name
                    ));
                }
                if role.is_rename_protected() && field.field_name != existing.field_name {
                    errors.push(format!(
                        "Field '{}' carries the '{}' role and cannot be renamed",
                        existing.field_name, role
                    ));
                }
            }
        }
    }

    errors.into_result()
}
