use std::cell::OnceCell;

use serde::Serialize;

use super::chunk::ChangesetChunk;
use super::text;
use crate::db::FileVersionRow;
use crate::models::{ChangesetLine, GITLINK_MODE};
use crate::services::repository::Repository;
use crate::{BlobId, ChangesetId, Database, Error, FileId, Result};

/// One side of a changed file. Content is fetched on first use.
#[derive(Debug, Serialize)]
pub struct FileVersion {
    pub path: String,
    pub sha1: BlobId,
    pub mode: i32,
    #[serde(skip)]
    bytes: OnceCell<Vec<u8>>,
    #[serde(skip)]
    lines: OnceCell<Option<Vec<String>>>,
}

impl FileVersion {
    pub fn new(path: impl Into<String>, sha1: BlobId, mode: i32) -> Self {
        Self {
            path: path.into(),
            sha1,
            mode,
            bytes: OnceCell::new(),
            lines: OnceCell::new(),
        }
    }

    /// Whether this side is a submodule pointer rather than a blob.
    pub fn is_gitlink(&self) -> bool {
        self.mode == GITLINK_MODE
    }

    /// Blob content. A gitlink has none in this repository and reads as empty.
    pub fn bytes(&self, repo: &Repository) -> Result<&[u8]> {
        if let Some(bytes) = self.bytes.get() {
            return Ok(bytes);
        }
        let bytes = if self.is_gitlink() {
            Vec::new()
        } else {
            repo.blob(self.sha1)?
        };
        Ok(self.bytes.get_or_init(|| bytes))
    }

    pub fn size(&self, repo: &Repository) -> Result<usize> {
        Ok(self.bytes(repo)?.len())
    }

    pub fn is_binary(&self, repo: &Repository) -> Result<bool> {
        Ok(self.lines(repo)?.is_none())
    }

    /// Content split into lines, or `None` for binary content.
    pub fn lines(&self, repo: &Repository) -> Result<Option<&[String]>> {
        if let Some(lines) = self.lines.get() {
            return Ok(lines.as_deref());
        }
        let lines = if self.is_gitlink() {
            None
        } else {
            text::blob_lines(self.bytes(repo)?)
        };
        Ok(self.lines.get_or_init(|| lines).as_deref())
    }
}

#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum FileChange {
    Added { new: FileVersion },
    Deleted { old: FileVersion },
    Modified { old: FileVersion, new: FileVersion },
}

impl FileChange {
    pub fn old_version(&self) -> Option<&FileVersion> {
        match self {
            FileChange::Added { .. } => None,
            FileChange::Deleted { old } | FileChange::Modified { old, .. } => Some(old),
        }
    }

    pub fn new_version(&self) -> Option<&FileVersion> {
        match self {
            FileChange::Deleted { .. } => None,
            FileChange::Added { new } | FileChange::Modified { new, .. } => Some(new),
        }
    }
}

/// One file's change within a changeset.
#[derive(Debug, Serialize)]
pub struct ChangesetFile {
    pub changeset: ChangesetId,
    pub id: FileId,
    pub path: String,
    pub change: FileChange,
    #[serde(skip)]
    chunks: OnceCell<Vec<ChangesetChunk>>,
}

impl ChangesetFile {
    pub(crate) fn from_row(changeset: ChangesetId, row: FileVersionRow) -> Result<Self> {
        let old = (!row.old_sha1.is_null())
            .then(|| FileVersion::new(&row.path, row.old_sha1, row.old_mode.unwrap_or(0)));
        let new = (!row.new_sha1.is_null())
            .then(|| FileVersion::new(&row.path, row.new_sha1, row.new_mode.unwrap_or(0)));

        let change = match (old, new) {
            (Some(old), Some(new)) => FileChange::Modified { old, new },
            (None, Some(new)) => FileChange::Added { new },
            (Some(old), None) => FileChange::Deleted { old },
            (None, None) => {
                return Err(Error::InvalidArgument(format!(
                    "file version for {} in changeset {changeset} has neither side",
                    row.path
                )));
            }
        };

        Ok(Self {
            changeset,
            id: row.file,
            path: row.path,
            change,
            chunks: OnceCell::new(),
        })
    }

    pub fn chunks(&self, db: &Database) -> Result<&[ChangesetChunk]> {
        if let Some(chunks) = self.chunks.get() {
            return Ok(chunks);
        }
        let chunks = db
            .changesets()
            .chunks(self.changeset, self.id)?
            .into_iter()
            .map(ChangesetChunk::from_row)
            .collect::<Result<Vec<_>>>()?;
        Ok(self.chunks.get_or_init(|| chunks))
    }

    /// Both sides as lines; an absent side has no lines. `None` when either
    /// side is binary.
    fn sides<'a>(&'a self, repo: &Repository) -> Result<Option<(&'a [String], &'a [String])>> {
        let old = match self.change.old_version() {
            Some(version) => version.lines(repo)?,
            None => Some(&[][..]),
        };
        let new = match self.change.new_version() {
            Some(version) => version.lines(repo)?,
            None => Some(&[][..]),
        };
        Ok(old.zip(new))
    }

    /// All chunk lines in order, without context.
    pub fn lines(&self, db: &Database, repo: &Repository) -> Result<Option<Vec<ChangesetLine>>> {
        let Some((old, new)) = self.sides(repo)? else {
            return Ok(None);
        };

        let mut lines = Vec::new();
        for chunk in self.chunks(db)? {
            lines.extend(chunk.lines(old, new)?);
        }
        Ok(Some(lines))
    }

    /// The whole file, with unchanged regions as context lines between chunks.
    pub fn lines_with_context(
        &self,
        db: &Database,
        repo: &Repository,
    ) -> Result<Option<Vec<ChangesetLine>>> {
        let Some((old, new)) = self.sides(repo)? else {
            return Ok(None);
        };

        let mut lines = Vec::with_capacity(old.len().max(new.len()));
        let mut old_pos = 0;
        let mut new_pos = 0;

        for chunk in self.chunks(db)? {
            let gap = chunk.delete_offset.checked_sub(old_pos);
            if gap.is_none() || gap != chunk.insert_offset.checked_sub(new_pos) {
                return Err(Error::InvalidArgument(format!(
                    "chunk at {}/{} in {} overlaps or misaligns with the previous one",
                    chunk.delete_offset, chunk.insert_offset, self.path
                )));
            }
            for (o, n) in (old_pos..chunk.delete_offset).zip(new_pos..chunk.insert_offset) {
                lines.push(ChangesetLine::context((o, n), &new[n]));
            }
            lines.extend(chunk.lines(old, new)?);
            old_pos = chunk.delete_end();
            new_pos = chunk.insert_end();
        }

        if old.len() - old_pos != new.len() - new_pos {
            return Err(Error::InvalidArgument(format!(
                "chunks of {} do not account for the change in length",
                self.path
            )));
        }
        for (o, n) in (old_pos..old.len()).zip(new_pos..new.len()) {
            lines.push(ChangesetLine::context((o, n), &new[n]));
        }

        Ok(Some(lines))
    }
}
