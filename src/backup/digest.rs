//! Content digests used for change detection.
//!
//! A file digests to the SHA-256 of its bytes. A directory digests to the
//! SHA-256 of the concatenated per-file digests, files taken in sorted
//! relative-path order so the result does not depend on enumeration order.

use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use getset::{CopyGetters, Getters};
use itertools::Itertools;
use rayon::prelude::*;
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use walkdir::WalkDir;

/// Lowercase hex digest of some content.
///
/// `unreadable` counts files that could not be read and were left out.
/// A degraded digest is never equal to anything, itself included.
#[derive(Clone, Debug, Getters, CopyGetters)]
pub struct ContentDigest {
    #[getset(get = "pub")]
    hex: String,
    #[getset(get_copy = "pub")]
    unreadable: usize,
}

impl ContentDigest {
    pub fn is_complete(&self) -> bool {
        self.unreadable == 0
    }

    pub fn matches(&self, other: &ContentDigest) -> bool {
        self.is_complete() && other.is_complete() && self.hex == other.hex
    }
}

/// Compare two optional digests, `None` meaning "no content".
pub fn same_content(a: Option<&ContentDigest>, b: Option<&ContentDigest>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => a.matches(b),
        _ => false,
    }
}

#[derive(Clone, Debug)]
pub struct ContentHasher {
    excluded_file_name: Arc<str>,
}

impl ContentHasher {
    /// `excluded_file_name` is skipped at any depth when hashing directories.
    pub fn new<S: Into<Arc<str>>>(excluded_file_name: S) -> Self {
        Self {
            excluded_file_name: excluded_file_name.into(),
        }
    }

    /// Digest of a file or directory, `None` when the path is neither or a
    /// single file cannot be read.
    pub fn hash<P: AsRef<Path>>(&self, path: P) -> Option<ContentDigest> {
        let path = path.as_ref();
        if path.is_dir() {
            Some(self.hash_dir(path))
        } else if path.is_file() {
            match hash_file(path) {
                Ok(bytes) => Some(ContentDigest {
                    hex: hex::encode(bytes),
                    unreadable: 0,
                }),
                Err(e) => {
                    tracing::error!("Hash error for {:?}: {}", path, e);
                    None
                }
            }
        } else {
            tracing::debug!("Nothing to hash at {:?}", path);
            None
        }
    }

    fn hash_dir(&self, dir: &Path) -> ContentDigest {
        let mut unreadable = 0;
        let files = WalkDir::new(dir)
            .follow_links(true)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|res| match res {
                Ok(de) => Some(de),
                Err(e) => {
                    tracing::error!("Hash error while walking {:?}: {}", dir, e);
                    unreadable += 1;
                    None
                }
            })
            .filter(|de| de.file_type().is_file())
            .filter(|de| de.file_name().to_str() != Some(self.excluded_file_name.as_ref()))
            .map(|de| de.into_path())
            .collect_vec();

        let digests: Vec<(PathBuf, Result<[u8; 32]>)> = files
            .into_par_iter()
            .map(|p| {
                let res = hash_file(&p);
                (p, res)
            })
            .collect();

        let mut hasher = Sha256::new();
        for (p, res) in digests {
            match res {
                Ok(bytes) => hasher.update(bytes),
                Err(e) => {
                    tracing::error!("Hash error for {:?}, file left out: {}", p, e);
                    unreadable += 1;
                }
            }
        }
        if unreadable > 0 {
            tracing::warn!(
                "Digest of {:?} is partial, {} file(s) unreadable",
                dir,
                unreadable
            );
        }

        ContentDigest {
            hex: hex::encode(hasher.finalize()),
            unreadable,
        }
    }
}

fn hash_file(path: &Path) -> Result<[u8; 32]> {
    let mut reader = File::open(path).map(BufReader::new).map_err(Error::from)?;
    let mut hasher = Sha256::new();
    std::io::copy(&mut reader, &mut hasher)?;
    Ok(hasher.finalize().into())
}
