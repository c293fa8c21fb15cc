use crate::backup::result_error::result::{convert_error_vec, Result};
use crate::backup::store::Backup;
use itertools::Itertools;
use std::num::NonZeroUsize;

/// Count-based retention: at most `max_backups` non-favorite backups survive.
///
/// Favorites are neither counted nor ever selected.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetentionPolicy {
    max_backups: NonZeroUsize,
}

impl RetentionPolicy {
    pub fn new(max_backups: NonZeroUsize) -> Self {
        Self { max_backups }
    }

    /// `None` when `max_backups` is zero.
    pub fn from_max_backups(max_backups: u32) -> Option<Self> {
        NonZeroUsize::new(max_backups as usize).map(Self::new)
    }

    pub fn max_backups(&self) -> usize {
        self.max_backups.get()
    }

    /// Oldest non-favorite backups to delete, oldest first.
    ///
    /// Ties on creation time break by path, so the choice is reproducible.
    pub fn select_for_deletion<'a, I, F>(&self, backups: I, is_favorite: F) -> Vec<&'a Backup>
    where
        I: IntoIterator<Item = &'a Backup>,
        F: Fn(&Backup) -> bool,
    {
        let candidates = backups
            .into_iter()
            .filter(|b| !is_favorite(*b))
            .sorted()
            .collect_vec();
        let excess = candidates.len().saturating_sub(self.max_backups.get());
        candidates.into_iter().take(excess).collect()
    }

    /// Pass every selected backup to `delete`, oldest first.
    ///
    /// A failed deletion does not stop the rest; all failures are returned
    /// together once every selected backup was tried.
    pub fn apply<'a, I, F, D>(&self, backups: I, is_favorite: F, mut delete: D) -> Result<()>
    where
        I: IntoIterator<Item = &'a Backup>,
        F: Fn(&Backup) -> bool,
        D: FnMut(&Backup) -> Result<()>,
    {
        let errors = self
            .select_for_deletion(backups, is_favorite)
            .into_iter()
            .filter_map(|doomed| delete(doomed).err())
            .collect_vec();
        convert_error_vec(errors)
    }
}
