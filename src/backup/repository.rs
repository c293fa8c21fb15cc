//! Persisted list of tracked save games.
//!
//! The file is shared with the UI, which may rewrite it at any time, so every
//! read goes back to disk and nothing is cached here.

use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::result_error::WithMsg;
use crate::backup::save_game::{BackupMetadata, SaveGame};
use serde_json::Value;
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use uuid::Uuid;
use validator::Validate;

pub trait SaveGameRepository: Send + Sync {
    /// Every well-formed record. Malformed records are logged and skipped.
    fn load_all(&self) -> Result<Vec<SaveGame>>;

    fn save_all(&self, save_games: &[SaveGame]) -> Result<()>;

    /// Persisted backup metadata of `id`, `None` when the record is absent.
    fn backup_metadata(&self, id: Uuid) -> Result<Option<HashMap<String, BackupMetadata>>> {
        Ok(self
            .load_all()?
            .into_iter()
            .find(|s| s.id() == id)
            .map(|s| s.backup_metadata().clone()))
    }
}

#[derive(Clone, Debug)]
pub struct JsonFileRepository {
    path: PathBuf,
}

impl JsonFileRepository {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Insert or replace records by id, keeping every other record as is.
    pub fn upsert<'a, I: IntoIterator<Item = &'a SaveGame>>(&self, save_games: I) -> Result<()> {
        let mut all = self.load_all()?;
        for save_game in save_games {
            match all.iter_mut().find(|s| s.id() == save_game.id()) {
                Some(existing) => *existing = save_game.clone(),
                None => all.push(save_game.clone()),
            }
        }
        self.save_all(&all)
    }
}

impl SaveGameRepository for JsonFileRepository {
    fn load_all(&self) -> Result<Vec<SaveGame>> {
        let file = match File::open(&self.path) {
            Ok(f) => f,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(vec![]),
            Err(e) => {
                return Err(Error::from(e).with_msg(format!("Open {:?} failed", self.path)))
            }
        };
        let records: Vec<Value> = serde_json::from_reader(BufReader::new(file))
            .map_err(Error::from)
            .with_msg(format!("Parse save games {:?} failed", self.path))?;

        Ok(records
            .into_iter()
            .enumerate()
            .filter_map(|(i, record)| {
                let parsed = serde_json::from_value::<SaveGame>(record)
                    .map_err(Error::from)
                    .and_then(|s| s.validate().map(|_| s).map_err(Error::from));
                match parsed {
                    Ok(s) => Some(s),
                    Err(e) => {
                        tracing::error!("Skipping save game record #{i} in {:?}: {e}", self.path);
                        None
                    }
                }
            })
            .collect())
    }

    fn save_all(&self, save_games: &[SaveGame]) -> Result<()> {
        let dir = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        let mut tmp = NamedTempFile::new_in(dir)?;
        {
            let mut writer = BufWriter::new(tmp.as_file_mut());
            serde_json::to_writer_pretty(&mut writer, save_games)?;
            writer.flush()?;
        }
        tmp.persist(&self.path)?;
        tracing::debug!("Saved {} save game(s) to {:?}", save_games.len(), self.path);
        Ok(())
    }
}
