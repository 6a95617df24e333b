//! Staffbook keeps employee records in delimited text files whose columns are
//! defined by a user-editable field schema. Renaming a field is propagated to
//! every store that references it by name.

pub mod api;
pub mod audit;
pub mod cache;
pub mod cli;
pub mod config;
pub mod error;
pub mod logging;
pub mod migration;
pub mod records;
pub mod schema;
pub mod server;
pub mod tabular;
pub mod templates;
