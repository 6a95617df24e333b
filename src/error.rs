use std::fmt;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StaffbookError {
    #[error("I/O error: {0}")]
    IoError(#[from] io::Error), // Converts io::Error into StaffbookError automatically

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    ConfigError(#[from] Box<figment::Error>),

    #[error("Validation failed: {0}")]
    Validation(ValidationErrors),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Schema file '{}' is unreadable: {reason}", path.display())]
    SchemaUnreadable { path: PathBuf, reason: String },

    #[error("Error: {0}")]
    Error(String), // Allows custom application errors
}

impl From<ValidationErrors> for StaffbookError {
    fn from(errors: ValidationErrors) -> Self {
        StaffbookError::Validation(errors)
    }
}

/// Every rule violation found in a submitted field list. Validation collects
/// all of them so the operator can fix the whole submission in one pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationErrors(Vec<String>);

impl ValidationErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, message: impl Into<String>) {
        self.0.push(message.into());
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn messages(&self) -> &[String] {
        &self.0
    }

    /// `Ok(())` when nothing was recorded, otherwise the collected errors.
    pub fn into_result(self) -> Result<(), StaffbookError> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(StaffbookError::Validation(self))
        }
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.join("; "))
    }
}
