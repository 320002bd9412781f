use fs2::FileExt;
use std::{
    fs::{self, File, OpenOptions},
    path::{Path, PathBuf},
};

use crate::models::ChangesetType;
use crate::{CommitId, Result};

/// A file-based exclusive lock around materializing one changeset.
///
/// Lock path: `<data dir>/materialize-lock/{type}/{parent|root}..{child}`
#[derive(Debug)]
pub struct MaterializeLock {
    path: PathBuf,
    _lock_file: File,
}

impl MaterializeLock {
    pub fn new(
        data_dir: &Path,
        kind: ChangesetType,
        parent: Option<CommitId>,
        child: CommitId,
    ) -> Result<Self> {
        let path = Self::lock_path(data_dir, kind, parent, child);
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;
        file.lock_exclusive()?;

        log::info!("acquired materialize lock at {}", path.display());
        Ok(Self {
            _lock_file: file,
            path,
        })
    }

    pub fn lock_path(
        data_dir: &Path,
        kind: ChangesetType,
        parent: Option<CommitId>,
        child: CommitId,
    ) -> PathBuf {
        let parent = parent.map_or_else(|| "root".to_string(), |p| p.to_string());
        data_dir
            .join("materialize-lock")
            .join(kind.as_str())
            .join(format!("{parent}..{child}"))
    }
}

impl Drop for MaterializeLock {
    fn drop(&mut self) {
        if let Err(err) = fs::remove_file(&self.path) {
            log::warn!("failed to delete materialize lock file: {}", err);
        }
        log::info!("released materialize lock at {}", self.path.display());
    }
}
