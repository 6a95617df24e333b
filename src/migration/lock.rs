use std::sync::{Mutex, MutexGuard, PoisonError};

/// What a caller is about to mutate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockScope {
    /// Active and archived record files.
    Records,
    /// Template metadata.
    Templates,
    /// A field migration: records, then templates, held together.
    Migration,
}

/// The named locks guarding the record and template stores.
///
/// All acquisition goes through [`StoreLocks::with_lock`], which is the only
/// place that knows the order (records before templates). No caller can take
/// the two locks in reverse and deadlock against a migration.
#[derive(Debug, Default)]
pub struct StoreLocks {
    records: Mutex<()>,
    templates: Mutex<()>,
}

impl StoreLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_lock<T>(&self, scope: LockScope, f: impl FnOnce() -> T) -> T {
        match scope {
            LockScope::Records => {
                let _records = acquire(&self.records);
                f()
            }
            LockScope::Templates => {
                let _templates = acquire(&self.templates);
                f()
            }
            LockScope::Migration => {
                let _records = acquire(&self.records);
                let _templates = acquire(&self.templates);
                f()
            }
        }
    }

    pub fn with_migration_lock<T>(&self, f: impl FnOnce() -> T) -> T {
        self.with_lock(LockScope::Migration, f)
    }
}

// A panic inside a critical section leaves files in whatever state the atomic
// rewrites produced; the guarded data is `()`, so a poisoned lock is still usable.
fn acquire(lock: &Mutex<()>) -> MutexGuard<'_, ()> {
    lock.lock().unwrap_or_else(PoisonError::into_inner)
}
