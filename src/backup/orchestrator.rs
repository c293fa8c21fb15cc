//! Registry of tracked save games and the backup pipeline.
//!
//! Lock order: the registry map is only held to look up or insert entries;
//! each entry carries its own `run` mutex serializing hash-check, copy and
//! retention for that save game, and a settings lock read as a snapshot.

use crate::backup::digest::{same_content, ContentHasher};
use crate::backup::notifications::{BackupEvent, EventPublisher};
use crate::backup::repository::SaveGameRepository;
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::result_error::{WithDebugObjectAndFnName, WithMsg};
use crate::backup::retention::RetentionPolicy;
use crate::backup::save_game::{is_favorite, SaveGame};
use crate::backup::schedule::ScheduleManager;
use crate::backup::store::{Backup, BackupStore};
use function_name::named;
use parking_lot::{Mutex, RwLock};
use rayon::ThreadPool;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};
use uuid::Uuid;
use validator::Validate;

struct Entry {
    settings: RwLock<SaveGame>,
    // held across a settings change and the matching timer change
    lifecycle: Mutex<()>,
    run: Mutex<()>,
}

impl Entry {
    fn new(save_game: SaveGame) -> Arc<Self> {
        Arc::new(Self {
            settings: RwLock::new(save_game),
            lifecycle: Mutex::new(()),
            run: Mutex::new(()),
        })
    }

    fn snapshot(&self) -> SaveGame {
        self.settings.read().clone()
    }
}

struct Inner {
    registry: Mutex<HashMap<Uuid, Arc<Entry>>>,
    scheduler: ScheduleManager,
    store: BackupStore,
    hasher: ContentHasher,
    repository: Arc<dyn SaveGameRepository>,
    publisher: Arc<dyn EventPublisher>,
}

/// Owns the tracked save games, their timers and their backups.
///
/// Cloning is cheap and every clone drives the same registry.
#[derive(Clone)]
pub struct BackupOrchestrator {
    inner: Arc<Inner>,
}

impl BackupOrchestrator {
    pub fn new(
        store: BackupStore,
        repository: Arc<dyn SaveGameRepository>,
        publisher: Arc<dyn EventPublisher>,
        pool: Arc<ThreadPool>,
    ) -> Self {
        let hasher = ContentHasher::new(store.backup_screenshot_name());
        let inner = Arc::new_cyclic(|weak: &Weak<Inner>| {
            let weak = weak.clone();
            Inner {
                registry: Mutex::new(HashMap::new()),
                scheduler: ScheduleManager::new(pool, move |id| {
                    if let Some(inner) = weak.upgrade() {
                        inner.handle_tick(id);
                    }
                }),
                store,
                hasher,
                repository,
                publisher,
            }
        });
        Self { inner }
    }

    /// Track every enabled persisted save game that is not tracked yet and
    /// start its timer. No backup is taken here.
    pub fn initialize(&self) -> Result<usize> {
        let added = self.inner.track_persisted(true)?;
        tracing::info!("Loaded {added} save game(s)");
        Ok(added)
    }

    /// Track every persisted save game, disabled ones included, without
    /// starting any timer. For one-shot work on the persisted list.
    pub fn load_persisted(&self) -> Result<usize> {
        self.inner.track_persisted(false)
    }

    /// Track a new save game: take an unconditional first backup, start its
    /// timer, then disable other save games with the same location.
    #[named]
    pub fn register(&self, save_game: SaveGame) -> Result<Backup> {
        save_game.validate()?;
        let id = save_game.id();
        if self.inner.registry.lock().contains_key(&id) {
            return Err(Error::AlreadyRegistered(id));
        }

        let backup = self
            .inner
            .store
            .create(id, save_game.save_location(), false)
            .with_debug_object_and_fn_name(id, function_name!())?;

        let location = save_game.save_location().clone();
        let entry = {
            let mut registry = self.inner.registry.lock();
            if registry.contains_key(&id) {
                return Err(Error::AlreadyRegistered(id));
            }
            let entry = Entry::new(save_game);
            registry.insert(id, entry.clone());
            entry
        };
        {
            let _lifecycle = entry.lifecycle.lock();
            self.inner.sync_timer(id, &entry)?;
        }

        self.disable_duplicates(id, &location);
        Ok(backup)
    }

    /// Replace the settings of a save game and restart its timer to match.
    ///
    /// An unknown enabled save game is tracked from here on.
    pub fn update(&self, save_game: SaveGame) -> Result<()> {
        save_game.validate()?;
        let id = save_game.id();
        let location = save_game.save_location().clone();

        let entry = {
            let mut registry = self.inner.registry.lock();
            match registry.get(&id) {
                Some(entry) => Some(entry.clone()),
                None if save_game.enabled() => {
                    let entry = Entry::new(save_game.clone());
                    registry.insert(id, entry.clone());
                    Some(entry)
                }
                None => None,
            }
        };

        if let Some(entry) = entry {
            let _lifecycle = entry.lifecycle.lock();
            *entry.settings.write() = save_game;
            self.inner.sync_timer(id, &entry)?;
        }

        self.disable_duplicates(id, &location);
        Ok(())
    }

    /// Stop future ticks of `id`; its settings and backups stay.
    pub fn stop(&self, id: Uuid) {
        let entry = self.inner.entry(id);
        let _lifecycle = entry.as_ref().map(|e| e.lifecycle.lock());
        self.inner.scheduler.unschedule(id);
    }

    /// Run the backup pipeline now. Failures are logged, never raised.
    pub fn trigger_manual_backup(&self, id: Uuid) -> bool {
        match self.maybe_backup(id) {
            Ok(created) => created,
            Err(e) => {
                tracing::error!("Manual backup of {id} failed: {e}");
                false
            }
        }
    }

    /// Create a backup of `id` when its content differs from the latest one.
    pub fn maybe_backup(&self, id: Uuid) -> Result<bool> {
        self.inner.maybe_backup(id)
    }

    /// Disable every other save game tracking `location` and stop its timer.
    pub fn disable_duplicates<P: AsRef<Path>>(&self, id: Uuid, location: P) {
        let location = location.as_ref();
        let others: Vec<(Uuid, Arc<Entry>)> = self
            .inner
            .registry
            .lock()
            .iter()
            .filter(|(other, _)| **other != id)
            .map(|(other, entry)| (*other, entry.clone()))
            .collect();

        for (other, entry) in others {
            let _lifecycle = entry.lifecycle.lock();
            {
                let mut settings = entry.settings.write();
                if settings.save_location() != location {
                    continue;
                }
                settings.set_enabled(false);
            }
            tracing::info!("Disabling {other}, {id} already tracks {:?}", location);
            self.inner.scheduler.unschedule(other);
        }
    }

    pub fn save_game(&self, id: Uuid) -> Option<SaveGame> {
        self.inner.entry(id).map(|e| e.snapshot())
    }

    pub fn save_games(&self) -> Vec<SaveGame> {
        self.inner
            .registry
            .lock()
            .values()
            .map(|e| e.snapshot())
            .collect()
    }

    pub fn is_scheduled(&self, id: Uuid) -> bool {
        self.inner.scheduler.is_scheduled(id)
    }

    /// Backups of `id`, newest first.
    pub fn backups(&self, id: Uuid) -> Result<Vec<Backup>> {
        self.inner.store.list_sorted(id)
    }
}

impl Inner {
    fn entry(&self, id: Uuid) -> Option<Arc<Entry>> {
        self.registry.lock().get(&id).cloned()
    }

    /// Make the timer of `id` match its current settings. Callers hold the
    /// entry's lifecycle lock.
    fn sync_timer(&self, id: Uuid, entry: &Entry) -> Result<()> {
        let (period, enabled) = {
            let settings = entry.settings.read();
            (settings.frequency_duration(), settings.enabled())
        };
        self.scheduler.reschedule(id, period, enabled)
    }

    fn track_persisted(&self, schedule: bool) -> Result<usize> {
        let mut added = 0;
        for save_game in self.repository.load_all()? {
            if schedule && !save_game.enabled() {
                continue;
            }
            let id = save_game.id();
            let entry = {
                let mut registry = self.registry.lock();
                if registry.contains_key(&id) {
                    continue;
                }
                let entry = Entry::new(save_game);
                registry.insert(id, entry.clone());
                entry
            };
            if schedule {
                let _lifecycle = entry.lifecycle.lock();
                if let Err(e) = self.sync_timer(id, &entry) {
                    tracing::error!("Cannot schedule {id}: {e}");
                    continue;
                }
            }
            added += 1;
        }
        Ok(added)
    }

    fn handle_tick(&self, id: Uuid) {
        match self.entry(id).map(|e| e.settings.read().enabled()) {
            Some(true) => {}
            Some(false) => {
                tracing::debug!("Skipping tick of disabled {id}");
                return;
            }
            None => {
                tracing::warn!("Skipping tick of unknown {id}");
                return;
            }
        }
        match self.maybe_backup(id) {
            Ok(true) => tracing::info!("Scheduled backup of {id} done"),
            Ok(false) => tracing::debug!("No change for {id}"),
            Err(e) => match e.root() {
                Error::SourceUnavailable(_) => tracing::warn!("Skipped backup of {id}: {e}"),
                _ => tracing::error!("Scheduled backup of {id} failed: {e}"),
            },
        }
    }

    #[named]
    fn maybe_backup(&self, id: Uuid) -> Result<bool> {
        let entry = self.entry(id).ok_or(Error::UnknownSaveGame(id))?;
        let _running = entry.run.lock();
        let save_game = entry.snapshot();
        let source = save_game.save_location();

        if !source.exists() {
            tracing::warn!("Source {:?} of {id} is missing, skipping", source);
            return Err(Error::SourceUnavailable(source.clone()));
        }

        let latest = self.store.latest(id)?;
        if let Some(latest) = &latest {
            let target = comparison_target(latest.path(), source)?;
            let current = self.hasher.hash(source);
            let previous = self.hasher.hash(&target);
            if same_content(current.as_ref(), previous.as_ref()) {
                return Ok(false);
            }
            if let Some(partial) = current.as_ref().filter(|d| !d.is_complete()) {
                tracing::warn!(
                    "{} file(s) of {id} unreadable, backing up to surface the error",
                    partial.unreadable()
                );
            }
        } else {
            tracing::info!("No backup of {id} yet, creating one");
        }

        let backup = self
            .store
            .create(id, source, true)
            .with_debug_object_and_fn_name(id, function_name!())?;

        self.enforce_retention(&save_game);

        if let Err(e) = self.publisher.publish(&BackupEvent::SaveUpdated { id }) {
            tracing::error!("Publishing update of {id} failed: {e}");
        }
        tracing::info!("Backed up {id} to {:?}", backup.path());
        Ok(true)
    }

    fn enforce_retention(&self, save_game: &SaveGame) {
        let id = save_game.id();
        let Some(policy) = RetentionPolicy::from_max_backups(save_game.max_backups()) else {
            return;
        };
        let backups = match self.store.list(id) {
            Ok(b) => b,
            Err(e) => {
                tracing::error!("Listing backups of {id} for retention failed: {e}");
                return;
            }
        };
        // favorites are owned by the persisted list
        let metadata = match self.repository.backup_metadata(id) {
            Ok(Some(m)) => m,
            Ok(None) => save_game.backup_metadata().clone(),
            Err(e) => {
                tracing::warn!("Reading favorites of {id} failed, using cached ones: {e}");
                save_game.backup_metadata().clone()
            }
        };

        let res = policy.apply(
            &backups,
            |b| is_favorite(&metadata, b.path()),
            |doomed| {
                tracing::info!("Removing out of retention backup {:?}", doomed.path());
                self.store.delete(doomed)
            },
        );
        if let Err(e) = res {
            tracing::error!("Some backups of {id} could not be removed, kept in place:\n{e}");
        }
    }
}

/// What to hash on the backup side: the copied file for a single-file
/// source, the backup directory itself otherwise.
fn comparison_target(backup_dir: &Path, source: &Path) -> Result<PathBuf> {
    if !backup_dir.is_dir() {
        return Err(
            Error::MissingBackup(backup_dir.to_path_buf()).with_msg("Latest backup vanished")
        );
    }
    if source.is_file() {
        let name = source
            .file_name()
            .ok_or_else(|| Error::SourceUnavailable(source.to_path_buf()))?;
        Ok(backup_dir.join(name))
    } else {
        Ok(backup_dir.to_path_buf())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::notifications::ChannelPublisher;
    use crate::backup::repository::JsonFileRepository;
    use pretty_assertions::assert_eq;
    use std::sync::mpsc::{channel, Receiver};
    use tempfile::TempDir;

    struct Fixture {
        _data: TempDir,
        source: TempDir,
        repository: Arc<JsonFileRepository>,
        orchestrator: BackupOrchestrator,
        events: Receiver<BackupEvent>,
    }

    impl Fixture {
        fn new() -> Self {
            let data = TempDir::new().unwrap();
            let source = TempDir::new().unwrap();
            let repository = Arc::new(JsonFileRepository::new(data.path().join("saves.json")));
            let (tx, events) = channel();
            let store = BackupStore::new(
                data.path().join("backups"),
                "latest_screenshot.png",
                "screenshot.png",
            );
            let pool = Arc::new(rayon::ThreadPoolBuilder::new().num_threads(2).build().unwrap());
            let orchestrator = BackupOrchestrator::new(
                store,
                repository.clone(),
                Arc::new(ChannelPublisher::new(tx)),
                pool,
            );
            Self {
                _data: data,
                source,
                repository,
                orchestrator,
                events,
            }
        }

        fn save_game(&self, location: &Path, max_backups: u32) -> SaveGame {
            SaveGame::builder()
                .save_location(location)
                .frequency(60)
                .max_backups(max_backups)
                .build()
        }

        fn write(&self, name: &str, content: &str) -> PathBuf {
            let path = self.source.path().join(name);
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).unwrap();
            }
            std::fs::write(&path, content).unwrap();
            path
        }
    }

    #[test]
    fn test_register_creates_first_backup_and_schedules() {
        let f = Fixture::new();
        f.write("slot.sav", "data");
        let save_game = f.save_game(f.source.path(), 3);
        let id = save_game.id();

        let backup = f.orchestrator.register(save_game).unwrap();

        assert_eq!(f.orchestrator.backups(id).unwrap(), vec![backup.clone()]);
        assert_eq!(
            std::fs::read_to_string(backup.path().join("slot.sav")).unwrap(),
            "data"
        );
        assert!(f.orchestrator.is_scheduled(id));
        assert!(f.events.try_recv().is_err());
    }

    #[test]
    fn test_register_twice_rejected() {
        let f = Fixture::new();
        f.write("slot.sav", "data");
        let save_game = f.save_game(f.source.path(), 3);

        f.orchestrator.register(save_game.clone()).unwrap();
        let res = f.orchestrator.register(save_game);
        assert!(matches!(res, Err(Error::AlreadyRegistered(_))));
    }

    #[test]
    fn test_register_missing_source_fails_cleanly() {
        let f = Fixture::new();
        let save_game = f.save_game(&f.source.path().join("missing"), 3);
        let id = save_game.id();

        assert!(f.orchestrator.register(save_game).is_err());
        assert!(f.orchestrator.save_game(id).is_none());
        assert!(!f.orchestrator.is_scheduled(id));
    }

    #[test]
    fn test_unchanged_content_is_idempotent() {
        let f = Fixture::new();
        f.write("slot.sav", "data");
        let save_game = f.save_game(f.source.path(), 3);
        let id = save_game.id();
        f.orchestrator.register(save_game).unwrap();

        assert!(!f.orchestrator.trigger_manual_backup(id));
        assert!(!f.orchestrator.trigger_manual_backup(id));
        assert_eq!(f.orchestrator.backups(id).unwrap().len(), 1);
    }

    #[test]
    fn test_change_and_revert_both_back_up() {
        let f = Fixture::new();
        f.write("nested/dir/slot.sav", "aaaa");
        let save_game = f.save_game(f.source.path(), 10);
        let id = save_game.id();
        f.orchestrator.register(save_game).unwrap();

        f.write("nested/dir/slot.sav", "aaab");
        assert!(f.orchestrator.trigger_manual_backup(id));
        f.write("nested/dir/slot.sav", "aaaa");
        assert!(f.orchestrator.trigger_manual_backup(id));

        assert_eq!(f.orchestrator.backups(id).unwrap().len(), 3);
        assert_eq!(f.events.try_iter().count(), 2);
        assert_eq!(
            f.events.try_recv().ok(),
            None,
            "one event per created backup"
        );
    }

    #[test]
    fn test_single_file_round_trip() {
        let f = Fixture::new();
        let file = f.write("save.dat", "v1");
        let save_game = f.save_game(&file, 3);
        let id = save_game.id();

        let first = f.orchestrator.register(save_game).unwrap();
        std::fs::write(&file, "v2").unwrap();
        assert!(f.orchestrator.trigger_manual_backup(id));

        let backups = f.orchestrator.backups(id).unwrap();
        assert_eq!(backups.len(), 2);
        assert_eq!(
            std::fs::read_to_string(backups[0].path().join("save.dat")).unwrap(),
            "v2"
        );
        assert_eq!(
            std::fs::read_to_string(first.path().join("save.dat")).unwrap(),
            "v1"
        );
        assert_eq!(
            f.events.try_recv().unwrap(),
            BackupEvent::SaveUpdated { id }
        );
    }

    #[test]
    fn test_retention_keeps_cap() {
        let f = Fixture::new();
        let file = f.write("save.dat", "0");
        let save_game = f.save_game(&file, 2);
        let id = save_game.id();
        let first = f.orchestrator.register(save_game).unwrap();

        for i in 1..6 {
            std::fs::write(&file, i.to_string()).unwrap();
            assert!(f.orchestrator.trigger_manual_backup(id));
            assert!(f.orchestrator.backups(id).unwrap().len() <= 2);
        }

        let backups = f.orchestrator.backups(id).unwrap();
        assert_eq!(backups.len(), 2);
        assert!(!first.path().exists());
        assert_eq!(
            std::fs::read_to_string(backups[0].path().join("save.dat")).unwrap(),
            "5"
        );
    }

    #[test]
    fn test_favorites_are_never_deleted() {
        let f = Fixture::new();
        let file = f.write("save.dat", "0");
        let save_game = f.save_game(&file, 2);
        let id = save_game.id();
        let first = f.orchestrator.register(save_game.clone()).unwrap();
        std::fs::write(&file, "1").unwrap();
        assert!(f.orchestrator.trigger_manual_backup(id));

        let mut persisted = save_game;
        let favorites = f.orchestrator.backups(id).unwrap();
        for b in &favorites {
            persisted.set_favorite(b.path(), true);
        }
        f.repository.save_all(&[persisted]).unwrap();

        for i in 2..6 {
            std::fs::write(&file, i.to_string()).unwrap();
            assert!(f.orchestrator.trigger_manual_backup(id));
        }

        // two favorites plus the two newest non-favorites
        assert_eq!(f.orchestrator.backups(id).unwrap().len(), 4);
        assert!(first.path().exists());
        assert!(favorites.iter().all(|b| b.path().exists()));
    }

    #[test]
    fn test_all_favorites_let_count_exceed_cap() {
        let f = Fixture::new();
        let file = f.write("save.dat", "0");
        let save_game = f.save_game(&file, 1);
        let id = save_game.id();
        let first = f.orchestrator.register(save_game.clone()).unwrap();

        let mut persisted = save_game;
        persisted.set_favorite(first.path(), true);
        f.repository.save_all(&[persisted.clone()]).unwrap();

        for i in 1..4 {
            std::fs::write(&file, i.to_string()).unwrap();
            assert!(f.orchestrator.trigger_manual_backup(id));
            for b in f.orchestrator.backups(id).unwrap() {
                persisted.set_favorite(b.path(), true);
            }
            f.repository.save_all(&[persisted.clone()]).unwrap();
        }

        assert_eq!(f.orchestrator.backups(id).unwrap().len(), 4);
    }

    #[test]
    fn test_duplicate_location_disables_previous() {
        let f = Fixture::new();
        f.write("slot.sav", "data");
        let a = f.save_game(f.source.path(), 3);
        let b = f.save_game(f.source.path(), 3);
        let (a_id, b_id) = (a.id(), b.id());

        f.orchestrator.register(a).unwrap();
        let a_backups = f.orchestrator.backups(a_id).unwrap();
        f.orchestrator.register(b).unwrap();

        assert!(!f.orchestrator.save_game(a_id).unwrap().enabled());
        assert!(!f.orchestrator.is_scheduled(a_id));
        assert!(f.orchestrator.save_game(b_id).unwrap().enabled());
        assert!(f.orchestrator.is_scheduled(b_id));
        assert_eq!(f.orchestrator.backups(a_id).unwrap(), a_backups);
    }

    #[test]
    fn test_update_and_stop_manage_timer() {
        let f = Fixture::new();
        f.write("slot.sav", "data");
        let mut save_game = f.save_game(f.source.path(), 3);
        let id = save_game.id();
        f.orchestrator.register(save_game.clone()).unwrap();

        save_game.set_enabled(false);
        f.orchestrator.update(save_game.clone()).unwrap();
        assert!(!f.orchestrator.is_scheduled(id));

        save_game.set_enabled(true);
        save_game.set_frequency(5);
        f.orchestrator.update(save_game.clone()).unwrap();
        assert!(f.orchestrator.is_scheduled(id));
        assert_eq!(f.orchestrator.save_game(id).unwrap().frequency(), 5);

        f.orchestrator.stop(id);
        assert!(!f.orchestrator.is_scheduled(id));
        assert!(f.orchestrator.save_game(id).is_some());
        assert_eq!(f.orchestrator.backups(id).unwrap().len(), 1);
    }

    #[test]
    fn test_unknown_save_game() {
        let f = Fixture::new();
        let id = Uuid::new_v4();

        assert!(!f.orchestrator.trigger_manual_backup(id));
        assert!(matches!(
            f.orchestrator.maybe_backup(id),
            Err(Error::UnknownSaveGame(_))
        ));
    }

    #[test]
    fn test_missing_source_skips_cycle() {
        let f = Fixture::new();
        let file = f.write("save.dat", "v1");
        let save_game = f.save_game(&file, 3);
        let id = save_game.id();
        f.orchestrator.register(save_game).unwrap();

        std::fs::remove_file(&file).unwrap();
        assert!(!f.orchestrator.trigger_manual_backup(id));
        assert_eq!(f.orchestrator.backups(id).unwrap().len(), 1);
    }

    #[test]
    fn test_tracked_without_backup_bootstraps() {
        let f = Fixture::new();
        f.write("slot.sav", "data");
        let save_game = f.save_game(f.source.path(), 3);
        let id = save_game.id();
        f.repository.save_all(&[save_game]).unwrap();

        assert_eq!(f.orchestrator.initialize().unwrap(), 1);
        assert!(f.orchestrator.is_scheduled(id));
        assert_eq!(f.orchestrator.initialize().unwrap(), 0);

        assert!(f.orchestrator.trigger_manual_backup(id));
        assert!(!f.orchestrator.trigger_manual_backup(id));
        assert_eq!(f.orchestrator.backups(id).unwrap().len(), 1);
    }

    #[test]
    fn test_initialize_skips_disabled() {
        let f = Fixture::new();
        let mut save_game = f.save_game(f.source.path(), 3);
        save_game.set_enabled(false);
        let id = save_game.id();
        f.repository.save_all(&[save_game]).unwrap();

        assert_eq!(f.orchestrator.initialize().unwrap(), 0);
        assert!(f.orchestrator.save_game(id).is_none());
    }

    #[test]
    fn test_screenshot_copied_and_ignored_by_hash() {
        let f = Fixture::new();
        f.write("slot.sav", "data");
        let save_game = f.save_game(f.source.path(), 3);
        let id = save_game.id();
        let first = f.orchestrator.register(save_game).unwrap();
        let root = first.path().parent().unwrap().to_path_buf();
        std::fs::write(root.join("latest_screenshot.png"), "png").unwrap();

        f.write("slot.sav", "changed");
        assert!(f.orchestrator.trigger_manual_backup(id));
        let latest = f.orchestrator.backups(id).unwrap().remove(0);
        assert_eq!(
            std::fs::read_to_string(latest.path().join("screenshot.png")).unwrap(),
            "png"
        );

        assert!(!f.orchestrator.trigger_manual_backup(id));
    }

    #[test]
    fn test_concurrent_triggers_create_one_backup() {
        let f = Fixture::new();
        let file = f.write("save.dat", "v1");
        let save_game = f.save_game(&file, 10);
        let id = save_game.id();
        f.orchestrator.register(save_game).unwrap();
        std::fs::write(&file, "v2").unwrap();

        let created: usize = std::thread::scope(|s| {
            let handles: Vec<_> = (0..4)
                .map(|_| {
                    let orchestrator = f.orchestrator.clone();
                    s.spawn(move || orchestrator.trigger_manual_backup(id))
                })
                .collect();
            handles
                .into_iter()
                .map(|h| h.join().unwrap() as usize)
                .sum()
        });

        assert_eq!(created, 1);
        assert_eq!(f.orchestrator.backups(id).unwrap().len(), 2);
    }

    #[test]
    fn test_tick_skips_disabled_and_unknown() {
        let f = Fixture::new();
        f.write("slot.sav", "data");
        let mut save_game = f.save_game(f.source.path(), 3);
        let id = save_game.id();
        f.orchestrator.register(save_game.clone()).unwrap();
        f.write("slot.sav", "changed");

        save_game.set_enabled(false);
        f.orchestrator.update(save_game.clone()).unwrap();
        f.orchestrator.inner.handle_tick(id);
        f.orchestrator.inner.handle_tick(Uuid::new_v4());
        assert_eq!(f.orchestrator.backups(id).unwrap().len(), 1);
        assert!(f.events.try_recv().is_err());

        save_game.set_enabled(true);
        f.orchestrator.update(save_game).unwrap();
        f.orchestrator.inner.handle_tick(id);
        assert_eq!(f.orchestrator.backups(id).unwrap().len(), 2);
        assert_eq!(
            f.events.try_recv().unwrap(),
            BackupEvent::SaveUpdated { id }
        );
    }

    #[test]
    fn test_tick_reads_current_location() {
        let f = Fixture::new();
        let first = f.write("a/save.dat", "a");
        let second = f.write("b/save.dat", "b");
        let mut save_game = f.save_game(&first, 3);
        let id = save_game.id();
        f.orchestrator.register(save_game.clone()).unwrap();

        save_game.set_save_location(second);
        f.orchestrator.update(save_game).unwrap();
        f.orchestrator.inner.handle_tick(id);

        let latest = f.orchestrator.backups(id).unwrap().remove(0);
        assert_eq!(
            std::fs::read_to_string(latest.path().join("save.dat")).unwrap(),
            "b"
        );
    }

    #[test]
    fn test_failed_screenshot_copy_keeps_cap() {
        let f = Fixture::new();
        f.write("slot.sav", "data");
        // occupies the screenshot slot inside every copy of the source
        std::fs::create_dir_all(f.source.path().join("screenshot.png")).unwrap();
        let save_game = f.save_game(f.source.path(), 1);
        let id = save_game.id();
        let first = f.orchestrator.register(save_game).unwrap();
        let root = first.path().parent().unwrap().to_path_buf();
        std::fs::write(root.join("latest_screenshot.png"), "png").unwrap();

        f.write("slot.sav", "changed");
        assert!(!f.orchestrator.trigger_manual_backup(id));
        assert!(!f.orchestrator.trigger_manual_backup(id));

        assert_eq!(f.orchestrator.backups(id).unwrap(), vec![first]);
        assert!(f.events.try_recv().is_err());
    }

    #[test]
    fn test_concurrent_updates_leave_timer_matching_settings() {
        let f = Fixture::new();
        f.write("slot.sav", "data");
        let save_game = f.save_game(f.source.path(), 3);
        let id = save_game.id();
        f.orchestrator.register(save_game.clone()).unwrap();

        std::thread::scope(|s| {
            for i in 0..8 {
                let orchestrator = f.orchestrator.clone();
                let mut save_game = save_game.clone();
                s.spawn(move || {
                    for j in 0..20 {
                        save_game.set_enabled((i + j) % 2 == 0);
                        orchestrator.update(save_game.clone()).unwrap();
                    }
                });
            }
        });

        assert_eq!(
            f.orchestrator.is_scheduled(id),
            f.orchestrator.save_game(id).unwrap().enabled()
        );
    }

    #[test]
    fn test_load_persisted_tracks_all_without_timers() {
        let f = Fixture::new();
        let file = f.write("save.dat", "v1");
        let mut save_game = f.save_game(&file, 3);
        save_game.set_enabled(false);
        let id = save_game.id();
        f.repository.save_all(&[save_game]).unwrap();

        assert_eq!(f.orchestrator.load_persisted().unwrap(), 1);
        assert!(!f.orchestrator.save_game(id).unwrap().enabled());
        assert!(!f.orchestrator.is_scheduled(id));

        assert!(f.orchestrator.trigger_manual_backup(id));
        assert_eq!(f.orchestrator.backups(id).unwrap().len(), 1);
    }
}
