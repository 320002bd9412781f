use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Row};

use crate::model::{
    ChainAnchor, ChainLines, ChainOrigin, ChainState, ChainType, Comment, CommentChain,
    CommentState,
};
use crate::{BlobId, ChainId, CommentId, CommitId, FileId, Result, ReviewId, UserId};

const CHAIN_COLUMNS: &str = "commentchains.id, commentchains.review, commentchains.uid,
    commentchains.type, commentchains.state, commentchains.origin, commentchains.file,
    files.path, commentchains.first_commit, commentchains.last_commit,
    commentchains.closed_by, commentchains.addressed_by";

const CHAIN_FROM: &str = "commentchains LEFT JOIN files ON files.id = commentchains.file";

/// States visible to lookups.
const PUBLISHED: &str = "('open', 'resolved', 'addressed')";

fn chain_from_row(row: &Row<'_>) -> rusqlite::Result<CommentChain> {
    let first_commit: CommitId = row.get(8)?;
    let file: Option<FileId> = row.get(6)?;
    let anchor = match file {
        Some(file) => ChainAnchor::File {
            file,
            path: row.get(7)?,
        },
        None => ChainAnchor::Commit {
            commit: first_commit,
        },
    };
    Ok(CommentChain {
        id: row.get(0)?,
        review: row.get(1)?,
        user: row.get(2)?,
        kind: row.get(3)?,
        state: row.get(4)?,
        origin: row.get(5)?,
        anchor,
        first_commit,
        last_commit: row.get(9)?,
        closed_by: row.get(10)?,
        addressed_by: row.get(11)?,
    })
}

fn lines_from_row(row: &Row<'_>, offset: usize) -> rusqlite::Result<ChainLines> {
    Ok(ChainLines {
        sha1: row.get(offset)?,
        first_line: row.get::<_, i64>(offset + 1)? as usize,
        last_line: row.get::<_, i64>(offset + 2)? as usize,
    })
}

fn comment_from_row(row: &Row<'_>) -> rusqlite::Result<Comment> {
    let time: String = row.get("time")?;
    let time = DateTime::parse_from_rfc3339(&time)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(3, rusqlite::types::Type::Text, e.into())
        })?;
    Ok(Comment {
        id: row.get("id")?,
        chain: row.get("chain")?,
        user: row.get("uid")?,
        time,
        state: row.get("state")?,
        text: row.get("comment")?,
    })
}

/// Row-level access to comment chains, their anchors and comments.
pub struct ChainQueries<'a> {
    conn: &'a Connection,
}

impl<'a> ChainQueries<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    #[allow(clippy::too_many_arguments)]
    pub fn insert_chain(
        &self,
        review: ReviewId,
        user: UserId,
        kind: ChainType,
        origin: Option<ChainOrigin>,
        file: Option<FileId>,
        first_commit: CommitId,
        last_commit: CommitId,
    ) -> Result<ChainId> {
        self.conn.execute(
            "INSERT INTO commentchains
             (review, uid, type, state, origin, file, first_commit, last_commit)
             VALUES (?1, ?2, ?3, 'draft', ?4, ?5, ?6, ?7)",
            rusqlite::params![review, user, kind, origin, file, first_commit, last_commit],
        )?;
        Ok(ChainId(self.conn.last_insert_rowid()))
    }

    pub fn get(&self, id: ChainId) -> Result<Option<CommentChain>> {
        let sql = format!("SELECT {CHAIN_COLUMNS} FROM {CHAIN_FROM} WHERE commentchains.id = ?1");
        Ok(self.conn.query_row(&sql, [id], chain_from_row).optional()?)
    }

    pub fn set_state(
        &self,
        id: ChainId,
        state: ChainState,
        closed_by: Option<UserId>,
        addressed_by: Option<CommitId>,
    ) -> Result<()> {
        self.conn.execute(
            "UPDATE commentchains SET state = ?2, closed_by = ?3, addressed_by = ?4 WHERE id = ?1",
            rusqlite::params![id, state, closed_by, addressed_by],
        )?;
        Ok(())
    }

    pub fn set_last_commit(&self, id: ChainId, commit: CommitId) -> Result<()> {
        self.conn.execute(
            "UPDATE commentchains SET last_commit = ?2 WHERE id = ?1",
            rusqlite::params![id, commit],
        )?;
        Ok(())
    }

    /// Published chains of a review, ordered by id.
    pub fn published_in_review(&self, review: ReviewId) -> Result<Vec<CommentChain>> {
        let sql = format!(
            "SELECT {CHAIN_COLUMNS} FROM {CHAIN_FROM}
             WHERE commentchains.review = ?1 AND commentchains.state IN {PUBLISHED}
             ORDER BY commentchains.id"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let chains = stmt
            .query_map([review], chain_from_row)?
            .collect::<rusqlite::Result<_>>()?;
        Ok(chains)
    }

    /// Published chains with a current anchor for `sha1`, together with that
    /// anchor. `file` of `None` selects commit-message chains.
    pub fn anchored_at(
        &self,
        sha1: BlobId,
        file: Option<FileId>,
        review: Option<ReviewId>,
    ) -> Result<Vec<(CommentChain, ChainLines)>> {
        let sql = format!(
            "SELECT {CHAIN_COLUMNS},
                    commentchainlines.sha1, commentchainlines.first_line,
                    commentchainlines.last_line
             FROM {CHAIN_FROM}
             JOIN commentchainlines ON commentchainlines.chain = commentchains.id
             WHERE commentchainlines.sha1 = ?1
               AND commentchainlines.state = 'current'
               AND commentchains.file IS ?2
               AND (?3 IS NULL OR commentchains.review = ?3)
               AND commentchains.state IN {PUBLISHED}
             ORDER BY commentchains.id"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map(rusqlite::params![sha1, file, review], |row| {
                Ok((chain_from_row(row)?, lines_from_row(row, 12)?))
            })?
            .collect::<rusqlite::Result<_>>()?;
        Ok(rows)
    }

    pub fn insert_lines(
        &self,
        chain: ChainId,
        user: UserId,
        state: CommentState,
        lines: &ChainLines,
    ) -> Result<()> {
        lines.check()?;
        self.conn.execute(
            "INSERT OR IGNORE INTO commentchainlines
             (chain, uid, state, sha1, first_line, last_line)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            rusqlite::params![
                chain,
                user,
                state,
                lines.sha1,
                lines.first_line as i64,
                lines.last_line as i64
            ],
        )?;
        Ok(())
    }

    /// The chain's current anchor for one content hash.
    pub fn lines_for(&self, chain: ChainId, sha1: BlobId) -> Result<Option<ChainLines>> {
        Ok(self
            .conn
            .query_row(
                "SELECT sha1, first_line, last_line FROM commentchainlines
                 WHERE chain = ?1 AND sha1 = ?2 AND state = 'current'",
                rusqlite::params![chain, sha1],
                |row| lines_from_row(row, 0),
            )
            .optional()?)
    }

    /// Every anchor of a chain, drafts included, in insertion order.
    pub fn all_lines(&self, chain: ChainId) -> Result<Vec<ChainLines>> {
        let mut stmt = self.conn.prepare(
            "SELECT sha1, first_line, last_line FROM commentchainlines
             WHERE chain = ?1 ORDER BY rowid",
        )?;
        let lines = stmt
            .query_map([chain], |row| lines_from_row(row, 0))?
            .collect::<rusqlite::Result<_>>()?;
        Ok(lines)
    }

    pub fn insert_comment(
        &self,
        chain: ChainId,
        user: UserId,
        state: CommentState,
        text: &str,
    ) -> Result<CommentId> {
        self.conn.execute(
            "INSERT INTO comments (chain, uid, time, state, comment) VALUES (?1, ?2, ?3, ?4, ?5)",
            rusqlite::params![chain, user, Utc::now().to_rfc3339(), state, text],
        )?;
        Ok(CommentId(self.conn.last_insert_rowid()))
    }

    pub fn comments(&self, chain: ChainId) -> Result<Vec<Comment>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, chain, uid, time, state, comment FROM comments
             WHERE chain = ?1 ORDER BY id",
        )?;
        let comments = stmt
            .query_map([chain], comment_from_row)?
            .collect::<rusqlite::Result<_>>()?;
        Ok(comments)
    }

    /// Turn a chain's draft anchors and comments current.
    pub fn publish_drafts(&self, chain: ChainId) -> Result<()> {
        self.conn.execute(
            "UPDATE commentchainlines SET state = 'current' WHERE chain = ?1",
            [chain],
        )?;
        self.conn.execute(
            "UPDATE comments SET state = 'current' WHERE chain = ?1",
            [chain],
        )?;
        Ok(())
    }

    pub fn insert_code_context(
        &self,
        sha1: BlobId,
        context: &str,
        first_line: usize,
        last_line: usize,
    ) -> Result<()> {
        self.conn.execute(
            "INSERT INTO codecontexts (sha1, context, first_line, last_line)
             VALUES (?1, ?2, ?3, ?4)",
            rusqlite::params![sha1, context, first_line as i64, last_line as i64],
        )?;
        Ok(())
    }

    /// The tightest recorded context enclosing `line`.
    pub fn code_context(&self, sha1: BlobId, line: usize) -> Result<Option<String>> {
        Ok(self
            .conn
            .query_row(
                "SELECT context FROM codecontexts
                 WHERE sha1 = ?1 AND first_line <= ?2 AND last_line >= ?2
                 ORDER BY first_line DESC LIMIT 1",
                rusqlite::params![sha1, line as i64],
                |row| row.get(0),
            )
            .optional()?)
    }
}
