//! What happens when a migration fails between its first store rewrite and the
//! snapshot write. The behaviour is chosen by `migration.recovery`.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::{Local, SecondsFormat};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use tempfile::NamedTempFile;

use super::propagate::StoreKind;
use super::rename::RenameSet;
use crate::error::StaffbookError;
use crate::schema::FieldMappingSnapshot;

#[derive(
    Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum RecoveryMode {
    /// No protection: a failed store is logged and skipped, the snapshot is still written.
    None,
    /// Record planned renames before touching any store and replay the
    /// unfinished stores on the next startup.
    #[default]
    IntentLog,
    /// Copy every dependent store aside first and restore all of them if any rewrite fails.
    Backup,
}

/// A migration that has started propagating but not yet written its snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigrationIntent {
    pub started_at: String,
    pub renames: RenameSet,
    pub target_columns: Vec<String>,
    /// The snapshot written once every store is done.
    pub snapshot: FieldMappingSnapshot,
    #[serde(default)]
    pub completed: Vec<StoreKind>,
}

impl MigrationIntent {
    pub fn is_completed(&self, kind: StoreKind) -> bool {
        self.completed.contains(&kind)
    }
}

pub struct IntentLog {
    path: PathBuf,
}

impl IntentLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn load(&self) -> Result<Option<MigrationIntent>, StaffbookError> {
        let text = match fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        Ok(Some(serde_json::from_str(&text)?))
    }

    pub fn begin(
        &self,
        renames: &RenameSet,
        target_columns: &[String],
        snapshot: &FieldMappingSnapshot,
    ) -> Result<MigrationIntent, StaffbookError> {
        let intent = MigrationIntent {
            started_at: Local::now().to_rfc3339_opts(SecondsFormat::Secs, true),
            renames: renames.clone(),
            target_columns: target_columns.to_vec(),
            snapshot: snapshot.clone(),
            completed: Vec::new(),
        };
        self.write(&intent)?;
        Ok(intent)
    }

    pub fn mark_completed(
        &self,
        intent: &mut MigrationIntent,
        kind: StoreKind,
    ) -> Result<(), StaffbookError> {
        if !intent.is_completed(kind) {
            intent.completed.push(kind);
        }
        self.write(intent)
    }

    pub fn clear(&self) -> Result<(), StaffbookError> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn write(&self, intent: &MigrationIntent) -> Result<(), StaffbookError> {
        let dir = self.path.parent().unwrap_or(Path::new("."));
        fs::create_dir_all(dir)?;
        let mut tmp = NamedTempFile::new_in(dir)?;
        tmp.write_all(serde_json::to_string_pretty(intent)?.as_bytes())?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path)
            .map_err(|e| StaffbookError::IoError(e.error))?;
        Ok(())
    }
}

/// Copies of the dependent store files taken before a migration mutates them.
#[derive(Debug)]
pub struct BackupSet {
    entries: Vec<(PathBuf, PathBuf)>,
}

impl BackupSet {
    /// Copies each existing file in `originals` into `dir`. Missing files are not
    /// backed up; restoring leaves them missing.
    pub fn capture(dir: &Path, originals: &[&Path]) -> Result<Self, StaffbookError> {
        fs::create_dir_all(dir)?;
        let stamp = Local::now().format("%Y%m%d%H%M%S%3f");

        let mut entries = Vec::new();
        for original in originals {
            if !original.exists() {
                continue;
            }
            let file_name = original
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "store".to_owned());
            let copy = dir.join(format!("{}.{}.bak", file_name, stamp));
            fs::copy(original, &copy)?;
            entries.push((original.to_path_buf(), copy));
        }
        info!("Backed up {} store file(s) to {}", entries.len(), dir.display());

        Ok(Self { entries })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Puts every copy back over its original.
    pub fn restore(&self) -> Result<(), StaffbookError> {
        for (original, copy) in &self.entries {
            fs::copy(copy, original)?;
            warn!("Restored {} from backup", original.display());
        }
        Ok(())
    }

    pub fn discard(self) -> Result<(), StaffbookError> {
        for (_, copy) in &self.entries {
            fs::remove_file(copy)?;
        }
        Ok(())
    }
}
