use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use log::{debug, warn};

use crate::error::StaffbookError;
use crate::schema::{derive_columns, sorted_by_order, FieldDefinition, FieldRole, SchemaStore};

/// Everything request handlers derive from the schema, computed once per load.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SchemaLayout {
    fields: Vec<FieldDefinition>,
    columns: Vec<String>,
    id_to_name: HashMap<String, String>,
    name_to_id: HashMap<String, String>,
}

impl SchemaLayout {
    pub fn from_fields(fields: &[FieldDefinition]) -> Self {
        let fields = sorted_by_order(fields);
        let columns = derive_columns(&fields);
        let mut id_to_name = HashMap::with_capacity(fields.len());
        let mut name_to_id = HashMap::with_capacity(fields.len());
        for field in fields.iter().filter(|f| !f.field_id.is_empty()) {
            id_to_name.insert(field.field_id.clone(), field.field_name.clone());
            name_to_id.insert(field.field_name.clone(), field.field_id.clone());
        }

        Self {
            fields,
            columns,
            id_to_name,
            name_to_id,
        }
    }

    /// Fields in display order.
    pub fn fields(&self) -> &[FieldDefinition] {
        &self.fields
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn name_for_id(&self, field_id: &str) -> Option<&str> {
        self.id_to_name.get(field_id).map(String::as_str)
    }

    pub fn id_for_name(&self, field_name: &str) -> Option<&str> {
        self.name_to_id.get(field_name).map(String::as_str)
    }

    pub fn column_for_role(&self, role: FieldRole) -> Option<&str> {
        self.fields
            .iter()
            .find(|f| f.role == Some(role))
            .map(|f| f.field_name.as_str())
    }
}

/// Process-wide cache of the schema layout.
///
/// Readers get a shared `Arc` and never touch the disk once the cache is warm.
/// The migration coordinator invalidates it while it still holds the store locks
/// and reloads it afterwards, so no reader sees new column names before the
/// record files carry them.
///
/// A failed migration can leave the stores split between the old and the new
/// layout. Until a later migration completes, writers are refused a layout.
pub struct LayoutCache {
    store: SchemaStore,
    slot: RwLock<Option<Arc<SchemaLayout>>>,
    writes_blocked: AtomicBool,
}

impl LayoutCache {
    pub fn new(store: SchemaStore) -> Self {
        Self {
            store,
            slot: RwLock::new(None),
            writes_blocked: AtomicBool::new(false),
        }
    }

    /// The cached layout, loading it on first use.
    pub fn get(&self) -> Result<Arc<SchemaLayout>, StaffbookError> {
        if let Some(layout) = self.read_slot() {
            return Ok(layout);
        }
        self.load()
    }

    /// Reloads from the schema file and replaces the cached layout.
    pub fn load(&self) -> Result<Arc<SchemaLayout>, StaffbookError> {
        let fields = match self.store.load()? {
            Some(fields) => fields,
            None => {
                warn!(
                    "Schema file {} does not exist, using an empty layout",
                    self.store.path().display()
                );
                Vec::new()
            }
        };
        let layout = Arc::new(SchemaLayout::from_fields(&fields));
        debug!("Layout cache loaded with {} columns", layout.columns().len());

        let mut slot = self.slot.write().unwrap_or_else(|e| e.into_inner());
        *slot = Some(Arc::clone(&layout));
        Ok(layout)
    }

    /// The layout a store edit is written under. `Conflict` while writes are blocked.
    pub fn get_for_write(&self) -> Result<Arc<SchemaLayout>, StaffbookError> {
        self.ensure_writable()?;
        self.get()
    }

    pub fn ensure_writable(&self) -> Result<(), StaffbookError> {
        if self.writes_blocked.load(Ordering::Acquire) {
            return Err(StaffbookError::Conflict(
                "a field migration did not finish; edits resume once a migration completes"
                    .to_owned(),
            ));
        }
        Ok(())
    }

    pub fn block_writes(&self) {
        self.writes_blocked.store(true, Ordering::Release);
    }

    pub fn allow_writes(&self) {
        self.writes_blocked.store(false, Ordering::Release);
    }

    pub fn invalidate(&self) {
        let mut slot = self.slot.write().unwrap_or_else(|e| e.into_inner());
        *slot = None;
    }

    fn read_slot(&self) -> Option<Arc<SchemaLayout>> {
        self.slot
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .map(Arc::clone)
    }
}
