use std::path::Path;
use std::time::Duration;

use rusqlite::{Connection, OptionalExtension};

use crate::{ChangesetId, FileId, RepositoryId, Result, ReviewId, UserId};

mod changesets;
pub mod schema;

pub use changesets::{ChangesetQueries, ChangesetRow, ChunkRow, FileVersionRow};

/// The relational store. One connection, used from one thread for the
/// duration of a request.
pub struct Database {
    conn: Connection,
}

impl Database {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        log::info!("opened database at {}", path.display());
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(mut conn: Connection) -> Result<Self> {
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        schema::migrate(&mut conn)?;
        Ok(Self { conn })
    }

    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    pub fn changesets(&self) -> ChangesetQueries<'_> {
        ChangesetQueries::new(&self.conn)
    }

    /// Get or create the repository row named `name`.
    pub fn register_repository(&self, name: &str, path: &Path) -> Result<RepositoryId> {
        self.conn.execute(
            "INSERT INTO repositories (name, path) VALUES (?1, ?2)
             ON CONFLICT (name) DO UPDATE SET path = excluded.path",
            rusqlite::params![name, path.to_string_lossy()],
        )?;
        let id = self.conn.query_row(
            "SELECT id FROM repositories WHERE name = ?1",
            [name],
            |r| r.get(0),
        )?;
        Ok(id)
    }

    pub fn create_user(&self, name: &str, fullname: &str) -> Result<UserId> {
        self.conn.execute(
            "INSERT INTO users (name, fullname) VALUES (?1, ?2)",
            rusqlite::params![name, fullname],
        )?;
        Ok(UserId(self.conn.last_insert_rowid()))
    }

    pub fn file_id(&self, path: &str) -> Result<Option<FileId>> {
        Ok(self
            .conn
            .query_row("SELECT id FROM files WHERE path = ?1", [path], |r| r.get(0))
            .optional()?)
    }

    pub fn file_path(&self, file: FileId) -> Result<Option<String>> {
        Ok(self
            .conn
            .query_row("SELECT path FROM files WHERE id = ?1", [file], |r| r.get(0))
            .optional()?)
    }

    /// Id for `path`, allocated on first use.
    pub fn intern_file(&self, path: &str) -> Result<FileId> {
        intern_file(&self.conn, path)
    }

    pub fn create_review(&self, repository: RepositoryId, summary: &str) -> Result<ReviewId> {
        self.conn.execute(
            "INSERT INTO reviews (repository, summary) VALUES (?1, ?2)",
            rusqlite::params![repository, summary],
        )?;
        Ok(ReviewId(self.conn.last_insert_rowid()))
    }

    pub fn add_review_changeset(&self, review: ReviewId, changeset: ChangesetId) -> Result<()> {
        self.conn.execute(
            "INSERT OR IGNORE INTO reviewchangesets (review, changeset) VALUES (?1, ?2)",
            rusqlite::params![review, changeset],
        )?;
        Ok(())
    }

    pub fn review_changesets(&self, review: ReviewId) -> Result<Vec<ChangesetId>> {
        let mut stmt = self.conn.prepare(
            "SELECT changeset FROM reviewchangesets WHERE review = ?1 ORDER BY changeset",
        )?;
        let ids = stmt
            .query_map([review], |r| r.get(0))?
            .collect::<rusqlite::Result<_>>()?;
        Ok(ids)
    }
}

pub(crate) fn intern_file(conn: &Connection, path: &str) -> Result<FileId> {
    conn.execute("INSERT OR IGNORE INTO files (path) VALUES (?1)", [path])?;
    Ok(conn.query_row("SELECT id FROM files WHERE path = ?1", [path], |r| r.get(0))?)
}
