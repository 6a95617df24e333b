use super::{sorted_by_order, FieldDefinition};

pub const ISSUE_DATE_SUFFIX: &str = "_issue_date";
pub const EXPIRY_DATE_SUFFIX: &str = "_expiry_date";

/// The two date columns that travel with a `file` field.
pub fn companion_columns(field_name: &str) -> [String; 2] {
    [
        format!("{}{}", field_name, ISSUE_DATE_SUFFIX),
        format!("{}{}", field_name, EXPIRY_DATE_SUFFIX),
    ]
}

/// Record-store column layout for a schema: fields in `field_order`, unnamed
/// fields skipped, each `file` field followed by its companion date columns.
pub fn derive_columns(fields: &[FieldDefinition]) -> Vec<String> {
    let mut columns = Vec::with_capacity(fields.len() + 4);
    for field in sorted_by_order(fields) {
        if field.field_name.is_empty() {
            continue;
        }
        let is_file = field.is_file();
        if is_file {
            let companions = companion_columns(&field.field_name);
            columns.push(field.field_name);
            columns.extend(companions);
        } else {
            columns.push(field.field_name);
        }
    }
    columns
}
