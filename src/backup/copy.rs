use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::result_error::WithMsg;
use std::fs;
use std::path::Path;
use walkdir::WalkDir;

/// Duplicates a file or a directory tree into a fresh destination directory.
///
/// Directories are walked iteratively, parents before children, so tree depth
/// never grows the stack.
#[derive(Clone, Copy, Debug, Default)]
pub struct TreeCopier;

impl TreeCopier {
    /// Copy `source` into `destination`, which must not exist yet.
    ///
    /// A directory source is copied as `destination/...`; a file source ends up
    /// as `destination/<file name>`. Returns the number of files copied.
    pub fn copy<P1: AsRef<Path>, P2: AsRef<Path>>(
        &self,
        source: P1,
        destination: P2,
    ) -> Result<usize> {
        let source = source.as_ref();
        let destination = destination.as_ref();

        if source.is_dir() {
            self.copy_dir(source, destination)
        } else if source.is_file() {
            let file_name = source
                .file_name()
                .ok_or_else(|| Error::SourceUnavailable(source.to_path_buf()))?;
            fs::create_dir(destination)
                .map_err(Error::from)
                .with_msg(format!("Create backup directory {:?} failed", destination))?;
            copy_file(source, &destination.join(file_name))?;
            Ok(1)
        } else {
            Err(Error::SourceUnavailable(source.to_path_buf()))
        }
    }

    fn copy_dir(&self, source: &Path, destination: &Path) -> Result<usize> {
        let mut copied = 0;
        for res in WalkDir::new(source).follow_links(true) {
            let de = res
                .map_err(Error::from)
                .with_msg(format!("Walk {:?} failed", source))?;
            let relative = de
                .path()
                .strip_prefix(source)
                .map_err(Error::from)
                .with_msg(format!("Stripping {:?} from {:?} failed", source, de.path()))?;
            let dst = destination.join(relative);

            if de.file_type().is_dir() {
                fs::create_dir(&dst)
                    .map_err(Error::from)
                    .with_msg(format!("Create directory {:?} failed", dst))?;
            } else if de.file_type().is_file() {
                copy_file(de.path(), &dst)?;
                copied += 1;
            } else {
                tracing::warn!("Skipping {:?}, not a regular file", de.path());
            }
        }

        tracing::debug!("Copied {} file(s) from {:?} to {:?}", copied, source, destination);
        Ok(copied)
    }

    /// Copy one file, replacing `destination` if it exists.
    pub fn copy_file_overwrite<P1: AsRef<Path>, P2: AsRef<Path>>(
        &self,
        source: P1,
        destination: P2,
    ) -> Result<()> {
        copy_file(source.as_ref(), destination.as_ref())
    }
}

fn copy_file(source: &Path, destination: &Path) -> Result<()> {
    fs::copy(source, destination)
        .map(|_| ())
        .map_err(Error::from)
        .with_msg(format!("Copy {:?} to {:?} failed", source, destination))
}
