//! The field schema migration engine.
//!
//! A run validates and persists a submitted schema, derives the target column
//! layout, and then, under the records and templates locks, detects renames
//! against the persisted snapshot, propagates them into every dependent store,
//! rewrites the snapshot, and invalidates the layout cache.

mod coordinator;
mod impact;
mod lock;
mod propagate;
mod recovery;
mod rename;

pub use coordinator::{
    FieldWithImpact, MigrationCoordinator, MigrationReport, NewField, RenamePair, RenamePreview,
    SchemaUpdateResponse, StoreReport,
};
pub use impact::{FieldImpact, ImpactIndex};
pub use lock::{LockScope, StoreLocks};
pub use propagate::{
    rename_field_reference, rename_placeholder_list, rename_row_keys, Propagator, StoreKind,
    StoreOutcome,
};
pub use recovery::{BackupSet, IntentLog, MigrationIntent, RecoveryMode};
pub use rename::{detect, RenameSet};
