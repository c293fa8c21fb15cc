//! On-disk layout of backups: `<data_dir>/<id>/<ticks>/`.
//!
//! `ticks` counts 100ns intervals since 0001-01-01T00:00:00 UTC, the naming
//! used by existing backup folders.

use crate::backup::copy::TreeCopier;
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::result_error::WithDebugObjectAndFnName;
use crate::backup::result_error::WithMsg;
use chrono::{DateTime, Utc};
use derive_more::{Display, From, Into};
use function_name::named;
use getset::{CopyGetters, Getters};
use itertools::Itertools;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::SystemTime;
use uuid::Uuid;

/// Ticks between 0001-01-01 and the unix epoch.
const UNIX_EPOCH_TICKS: u64 = 621_355_968_000_000_000;
const NANOS_PER_TICK: u64 = 100;

#[derive(Clone, Copy, Debug, Display, From, Into, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BackupTimestamp(u64);

impl BackupTimestamp {
    pub fn now() -> Self {
        Self::from(SystemTime::now())
    }

    pub fn ticks(self) -> u64 {
        self.0
    }

    pub fn to_date_time(self) -> Option<DateTime<Utc>> {
        let since_epoch = self.0.checked_sub(UNIX_EPOCH_TICKS)?;
        let secs = since_epoch / 10_000_000;
        let nanos = (since_epoch % 10_000_000) * NANOS_PER_TICK;
        DateTime::from_timestamp(i64::try_from(secs).ok()?, nanos as u32)
    }

    fn parse(name: &str) -> Option<Self> {
        if name.is_empty() || !name.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        name.parse().ok().map(Self)
    }
}

impl From<SystemTime> for BackupTimestamp {
    fn from(value: SystemTime) -> Self {
        let since_epoch = value
            .duration_since(SystemTime::UNIX_EPOCH)
            .map(|d| d.as_nanos() / u128::from(NANOS_PER_TICK))
            .unwrap_or(0);
        Self(UNIX_EPOCH_TICKS + since_epoch as u64)
    }
}

/// One backup directory, ordered by creation timestamp then path.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Getters, CopyGetters)]
pub struct Backup {
    #[getset(get_copy = "pub")]
    created: BackupTimestamp,
    #[getset(get = "pub")]
    path: PathBuf,
}

impl Backup {
    pub fn new<P: Into<PathBuf>>(path: P, created: BackupTimestamp) -> Self {
        Self {
            created,
            path: path.into(),
        }
    }

    fn from_dir(path: PathBuf) -> Self {
        let created = path
            .file_name()
            .and_then(|n| n.to_str())
            .and_then(BackupTimestamp::parse)
            .or_else(|| {
                let md = fs::metadata(&path).ok()?;
                md.created().or_else(|_| md.modified()).ok().map(Into::into)
            })
            .unwrap_or(BackupTimestamp(0));
        Self { created, path }
    }
}

#[derive(Debug)]
pub struct BackupStore {
    data_dir: Arc<Path>,
    latest_screenshot_name: Arc<str>,
    backup_screenshot_name: Arc<str>,
    copier: TreeCopier,
    last_ticks: AtomicU64,
}

impl BackupStore {
    pub fn new<P: Into<Arc<Path>>, S1: Into<Arc<str>>, S2: Into<Arc<str>>>(
        data_dir: P,
        latest_screenshot_name: S1,
        backup_screenshot_name: S2,
    ) -> Self {
        Self {
            data_dir: data_dir.into(),
            latest_screenshot_name: latest_screenshot_name.into(),
            backup_screenshot_name: backup_screenshot_name.into(),
            copier: TreeCopier,
            last_ticks: AtomicU64::new(0),
        }
    }

    pub fn entity_root(&self, id: Uuid) -> PathBuf {
        self.data_dir.join(id.to_string())
    }

    pub fn backup_screenshot_name(&self) -> &str {
        &self.backup_screenshot_name
    }

    /// All backups of `id`, in no particular order. A missing root means none.
    #[named]
    pub fn list(&self, id: Uuid) -> Result<Vec<Backup>> {
        let root = self.entity_root(id);
        let entries = match fs::read_dir(&root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(vec![]),
            Err(e) => {
                return Err(Error::from(e).with_debug_object_and_fn_name(root, function_name!()))
            }
        };

        let mut backups = vec![];
        for entry in entries {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                backups.push(Backup::from_dir(entry.path()));
            }
        }
        Ok(backups)
    }

    pub fn latest(&self, id: Uuid) -> Result<Option<Backup>> {
        Ok(self.list(id)?.into_iter().max())
    }

    /// Snapshot `source` into a new timestamped backup of `id`.
    ///
    /// With `with_screenshot`, the entity's latest screenshot (if any) is
    /// copied in under the reserved backup screenshot name. On any failure the
    /// new backup directory is removed again.
    pub fn create<P: AsRef<Path>>(
        &self,
        id: Uuid,
        source: P,
        with_screenshot: bool,
    ) -> Result<Backup> {
        let source = source.as_ref();
        if !source.exists() {
            return Err(Error::SourceUnavailable(source.to_path_buf()));
        }

        let root = self.entity_root(id);
        fs::create_dir_all(&root)
            .map_err(Error::from)
            .with_msg(format!("Create backup root {:?} failed", root))?;

        let mut created = self.next_timestamp();
        while root.join(created.to_string()).exists() {
            created = self.next_timestamp();
        }
        let backup = Backup::new(root.join(created.to_string()), created);

        if let Err(e) = self.fill(&root, source, &backup, with_screenshot) {
            tracing::error!("Backup {:?} failed, removing partial copy", backup.path);
            if let Err(e2) = self.delete(&backup) {
                return Err(e.chain(e2));
            }
            return Err(e);
        }

        tracing::info!("Created backup {:?}", backup.path);
        Ok(backup)
    }

    fn fill(
        &self,
        root: &Path,
        source: &Path,
        backup: &Backup,
        with_screenshot: bool,
    ) -> Result<()> {
        self.copier.copy(source, &backup.path)?;

        if with_screenshot {
            let screenshot = root.join(self.latest_screenshot_name.as_ref());
            if screenshot.is_file() {
                self.copier
                    .copy_file_overwrite(
                        &screenshot,
                        backup.path.join(self.backup_screenshot_name.as_ref()),
                    )
                    .with_msg("Copy screenshot failed")?;
            }
        }
        Ok(())
    }

    /// Remove a backup directory; removing an absent one succeeds.
    pub fn delete(&self, backup: &Backup) -> Result<()> {
        match fs::remove_dir_all(&backup.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::from(e)).with_msg(format!("Delete {:?} failed", backup.path)),
        }
    }

    /// Newest first.
    pub fn list_sorted(&self, id: Uuid) -> Result<Vec<Backup>> {
        Ok(self.list(id)?.into_iter().sorted().rev().collect())
    }

    fn next_timestamp(&self) -> BackupTimestamp {
        let now = BackupTimestamp::now().ticks();
        let mut last = self.last_ticks.load(Ordering::Relaxed);
        loop {
            let next = now.max(last + 1);
            match self
                .last_ticks
                .compare_exchange_weak(last, next, Ordering::AcqRel, Ordering::Relaxed)
            {
                Ok(_) => return BackupTimestamp(next),
                Err(actual) => last = actual,
            }
        }
    }
}
