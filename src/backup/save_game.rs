//! Tracked save game records.
//!
//! The JSON shape (PascalCase keys, backup metadata keyed by backup path) is
//! shared with the UI, so unknown fields are carried through untouched.

use bon::Builder;
use getset::{CopyGetters, Getters, MutGetters, Setters};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use uuid::Uuid;
use validator::Validate;

/// Per-backup flags, keyed by the backup directory path.
#[derive(Clone, Copy, Default, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub struct BackupMetadata {
    #[serde(default)]
    pub is_favorite: bool,
}

#[derive(
    Clone,
    Debug,
    Serialize,
    Deserialize,
    Validate,
    Builder,
    Getters,
    CopyGetters,
    MutGetters,
    Setters,
    PartialEq,
)]
#[serde(rename_all = "PascalCase")]
pub struct SaveGame {
    #[builder(default = Uuid::new_v4())]
    #[getset(get_copy = "pub")]
    id: Uuid,
    #[builder(into)]
    #[getset(get = "pub", set = "pub")]
    save_location: PathBuf,
    /// Minutes between two backup attempts.
    #[validate(range(min = 1))]
    #[getset(get_copy = "pub", set = "pub")]
    frequency: u32,
    /// Cap on non-favorite backups.
    #[validate(range(min = 1))]
    #[getset(get_copy = "pub", set = "pub")]
    max_backups: u32,
    #[serde(default = "default_enabled")]
    #[builder(default = true)]
    #[getset(get_copy = "pub", set = "pub")]
    enabled: bool,
    #[serde(default)]
    #[builder(default)]
    #[getset(get = "pub", get_mut = "pub")]
    backup_metadata: HashMap<String, BackupMetadata>,
    #[serde(flatten)]
    #[builder(default)]
    extra: Map<String, Value>,
}

fn default_enabled() -> bool {
    true
}

impl SaveGame {
    pub fn frequency_duration(&self) -> std::time::Duration {
        std::time::Duration::from_secs(u64::from(self.frequency) * 60)
    }

    pub fn set_favorite<P: AsRef<Path>>(&mut self, backup: P, is_favorite: bool) {
        self.backup_metadata
            .entry(backup.as_ref().to_string_lossy().into_owned())
            .or_default()
            .is_favorite = is_favorite;
    }
}

/// Favorite lookup over a backup metadata map.
///
/// Keys are full backup paths. A key whose last component matches the backup
/// directory name also counts, so favorites survive a moved data directory.
pub fn is_favorite(metadata: &HashMap<String, BackupMetadata>, backup: &Path) -> bool {
    if let Some(m) = metadata.get(backup.to_string_lossy().as_ref()) {
        return m.is_favorite;
    }
    let Some(name) = backup.file_name() else {
        return false;
    };
    metadata
        .iter()
        .any(|(k, m)| m.is_favorite && Path::new(k).file_name() == Some(name))
}
