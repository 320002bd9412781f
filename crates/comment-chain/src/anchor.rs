use critic_core::{Database, Repository};
use serde::Serialize;

use crate::context;
use crate::db::ChainQueries;
use crate::model::{ChainAnchor, ChainLines, CommentChain};
use crate::{BlobId, ChainId, CommitId, Error, Result, ReviewId};

/// A published chain together with its anchor in one content version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AnchoredChain {
    pub chain: CommentChain,
    pub lines: ChainLines,
}

impl AnchoredChain {
    pub fn line_index(&self) -> usize {
        self.lines.line_index()
    }

    pub fn line_count(&self) -> usize {
        self.lines.line_count()
    }

    /// Recorded code context around the first anchored line, if any.
    pub fn context(&self, db: &Database) -> Result<Option<String>> {
        ChainQueries::new(db.conn()).code_context(self.lines.sha1, self.lines.first_line)
    }

    /// [`AnchoredChain::context`] with everything from the first `(` on
    /// replaced by `(...)`.
    pub fn minimized_context(&self, db: &Database) -> Result<Option<String>> {
        Ok(self.context(db)?.map(|ctx| context::minimize(&ctx)))
    }
}

pub fn fetch(db: &Database, id: ChainId) -> Result<CommentChain> {
    ChainQueries::new(db.conn())
        .get(id)?
        .ok_or(Error::ChainNotFound(id))
}

/// Chains anchored to the content `path` has at `commit`.
///
/// Matching is by exact content hash: a chain is returned only if one of
/// its anchors was recorded against this very blob.
pub fn find_by_file(
    db: &Database,
    repo: &Repository,
    commit: CommitId,
    path: &str,
    review: Option<ReviewId>,
) -> Result<Vec<AnchoredChain>> {
    let entry = repo.lookup_file(commit, path)?;
    let Some(file) = db.file_id(path)? else {
        return Ok(Vec::new());
    };

    let rows =
        ChainQueries::new(db.conn()).anchored_at(BlobId::from(entry.id), Some(file), review)?;
    Ok(rows
        .into_iter()
        .map(|(chain, lines)| AnchoredChain { chain, lines })
        .collect())
}

/// Chains on the message of `commit`.
pub fn find_by_commit_message(
    db: &Database,
    commit: CommitId,
    review: Option<ReviewId>,
) -> Result<Vec<AnchoredChain>> {
    let rows =
        ChainQueries::new(db.conn()).anchored_at(BlobId::from(commit.oid()), None, review)?;
    Ok(rows
        .into_iter()
        .map(|(chain, lines)| AnchoredChain { chain, lines })
        .collect())
}

fn is_unresolvable(err: &critic_core::Error) -> bool {
    err.is_not_found() || matches!(err, critic_core::Error::NotAFile(_))
}

/// Every chain of `review` that applies to the tree of `commit`.
///
/// A chain whose file cannot be resolved at `commit` is skipped rather than
/// failing the whole lookup.
pub fn find_by_review(
    db: &Database,
    repo: &Repository,
    review: ReviewId,
    commit: CommitId,
) -> Result<Vec<AnchoredChain>> {
    let queries = ChainQueries::new(db.conn());
    let mut found = Vec::new();

    for chain in queries.published_in_review(review)? {
        let sha1 = match &chain.anchor {
            ChainAnchor::Commit { .. } => BlobId::from(commit.oid()),
            ChainAnchor::File { path, .. } => match repo.lookup_file(commit, path) {
                Ok(entry) => BlobId::from(entry.id),
                Err(err) if is_unresolvable(&err) => {
                    log::warn!("chain {}: {path} not resolvable at {commit}: {err}", chain.id);
                    continue;
                }
                Err(err) => return Err(err.into()),
            },
        };

        if let Some(lines) = queries.lines_for(chain.id, sha1)? {
            found.push(AnchoredChain { chain, lines });
        }
    }

    Ok(found)
}
