use rusqlite::{Connection, OptionalExtension, Row};

use crate::models::ChangesetType;
use crate::{BlobId, ChangesetId, CommitId, Error, FileId, RepositoryId, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangesetRow {
    pub id: ChangesetId,
    pub repository: RepositoryId,
    pub kind: ChangesetType,
    pub parent: Option<CommitId>,
    pub child: CommitId,
}

impl ChangesetRow {
    fn try_from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get("id")?,
            repository: row.get("repository")?,
            kind: row.get("type")?,
            parent: row.get("parent")?,
            child: row.get("child")?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileVersionRow {
    pub file: FileId,
    pub path: String,
    pub old_sha1: BlobId,
    pub new_sha1: BlobId,
    pub old_mode: Option<i32>,
    pub new_mode: Option<i32>,
}

impl FileVersionRow {
    fn try_from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            file: row.get("file")?,
            path: row.get("path")?,
            old_sha1: row.get("old_sha1")?,
            new_sha1: row.get("new_sha1")?,
            old_mode: row.get("old_mode")?,
            new_mode: row.get("new_mode")?,
        })
    }
}

/// A stored chunk with its unparsed analysis.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkRow {
    pub delete_offset: usize,
    pub delete_count: usize,
    pub insert_offset: usize,
    pub insert_count: usize,
    pub analysis: String,
    pub whitespace: bool,
}

impl ChunkRow {
    fn try_from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            delete_offset: row.get::<_, i64>("delete_offset")? as usize,
            delete_count: row.get::<_, i64>("delete_count")? as usize,
            insert_offset: row.get::<_, i64>("insert_offset")? as usize,
            insert_count: row.get::<_, i64>("insert_count")? as usize,
            analysis: row.get("analysis")?,
            whitespace: row.get("whitespace")?,
        })
    }
}

const CHANGESET_COLUMNS: &str = "id, repository, type, parent, child";

pub struct ChangesetQueries<'a> {
    conn: &'a Connection,
}

impl<'a> ChangesetQueries<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    pub fn get(&self, id: ChangesetId) -> Result<Option<ChangesetRow>> {
        let sql = format!("SELECT {CHANGESET_COLUMNS} FROM changesets WHERE id = ?1");
        Ok(self
            .conn
            .query_row(&sql, [id], ChangesetRow::try_from_row)
            .optional()?)
    }

    /// Fails with [`Error::ChangesetTypeMismatch`] when the pair is already
    /// stored under the sibling type of `kind`.
    pub fn check_type(
        &self,
        repository: RepositoryId,
        kind: ChangesetType,
        parent: Option<CommitId>,
        child: CommitId,
    ) -> Result<()> {
        let Some(sibling) = kind.sibling() else {
            return Ok(());
        };
        match self.find(repository, sibling, parent, child)? {
            Some(row) => Err(Error::ChangesetTypeMismatch {
                id: row.id,
                expected: kind.to_string(),
                actual: row.kind.to_string(),
            }),
            None => Ok(()),
        }
    }

    /// The changeset of exactly this type between `parent` and `child`.
    pub fn find(
        &self,
        repository: RepositoryId,
        kind: ChangesetType,
        parent: Option<CommitId>,
        child: CommitId,
    ) -> Result<Option<ChangesetRow>> {
        let sql = format!(
            "SELECT {CHANGESET_COLUMNS} FROM changesets
             WHERE repository = ?1 AND type = ?2 AND parent IS ?3 AND child = ?4
             ORDER BY id LIMIT 1"
        );
        Ok(self
            .conn
            .query_row(
                &sql,
                rusqlite::params![repository, kind, parent, child],
                ChangesetRow::try_from_row,
            )
            .optional()?)
    }

    /// Changed files ordered by path.
    pub fn file_versions(&self, changeset: ChangesetId) -> Result<Vec<FileVersionRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT fileversions.file, files.path, old_sha1, new_sha1, old_mode, new_mode
             FROM fileversions
             JOIN files ON files.id = fileversions.file
             WHERE fileversions.changeset = ?1
             ORDER BY files.path",
        )?;
        let rows = stmt
            .query_map([changeset], FileVersionRow::try_from_row)?
            .collect::<rusqlite::Result<_>>()?;
        Ok(rows)
    }

    pub fn chunks(&self, changeset: ChangesetId, file: FileId) -> Result<Vec<ChunkRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT delete_offset, delete_count, insert_offset, insert_count, analysis, whitespace
             FROM chunks
             WHERE changeset = ?1 AND file = ?2
             ORDER BY delete_offset, insert_offset",
        )?;
        let rows = stmt
            .query_map(rusqlite::params![changeset, file], ChunkRow::try_from_row)?
            .collect::<rusqlite::Result<_>>()?;
        Ok(rows)
    }

    pub fn insert_changeset(
        &self,
        repository: RepositoryId,
        kind: ChangesetType,
        parent: Option<CommitId>,
        child: CommitId,
    ) -> Result<ChangesetId> {
        self.conn.execute(
            "INSERT INTO changesets (repository, type, parent, child) VALUES (?1, ?2, ?3, ?4)",
            rusqlite::params![repository, kind, parent, child],
        )?;
        Ok(ChangesetId(self.conn.last_insert_rowid()))
    }

    pub fn insert_file_version(
        &self,
        changeset: ChangesetId,
        file: FileId,
        old: (BlobId, Option<i32>),
        new: (BlobId, Option<i32>),
    ) -> Result<()> {
        self.conn.execute(
            "INSERT INTO fileversions (changeset, file, old_sha1, new_sha1, old_mode, new_mode)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            rusqlite::params![changeset, file, old.0, new.0, old.1, new.1],
        )?;
        Ok(())
    }

    pub fn insert_chunk(&self, changeset: ChangesetId, file: FileId, chunk: &ChunkRow) -> Result<()> {
        self.conn.execute(
            "INSERT INTO chunks
             (changeset, file, delete_offset, delete_count, insert_offset, insert_count,
              analysis, whitespace)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            rusqlite::params![
                changeset,
                file,
                chunk.delete_offset as i64,
                chunk.delete_count as i64,
                chunk.insert_offset as i64,
                chunk.insert_count as i64,
                chunk.analysis,
                chunk.whitespace,
            ],
        )?;
        Ok(())
    }
}
