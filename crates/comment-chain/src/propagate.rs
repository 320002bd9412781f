use critic_core::{Changeset, ChangesetChunk, ChangesetFile, Database, Repository};
use serde::Serialize;

use crate::db::ChainQueries;
use crate::model::{ChainLines, ChainState, ChainType, CommentChain, CommentState};
use crate::{ChainId, Result, ReviewId};

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct PropagationReport {
    /// Chains that gained an anchor in the new version.
    pub carried: Vec<ChainId>,
    /// Open issues whose lines the changeset touched.
    pub addressed: Vec<ChainId>,
}

/// Does `chunk` touch the 0-based inclusive line range `first..=last`?
fn touches(chunk: &ChangesetChunk, first: usize, last: usize) -> bool {
    if chunk.delete_count > 0 {
        chunk.delete_offset <= last && chunk.delete_end() > first
    } else {
        chunk.delete_offset > first && chunk.delete_offset <= last
    }
}

/// Where the range lands in the new version, or `None` if a chunk touches it.
fn carry(
    chunks: &[ChangesetChunk],
    lines: &ChainLines,
    file: &ChangesetFile,
) -> Option<ChainLines> {
    let new = file.change.new_version()?;
    let first = lines.line_index();
    let last = first + lines.line_count() - 1;

    let mut delta: isize = 0;
    for chunk in chunks {
        if touches(chunk, first, last) {
            return None;
        }
        if chunk.delete_end() <= first {
            delta += chunk.insert_count as isize - chunk.delete_count as isize;
        }
    }
    Some(lines.shifted(new.sha1, delta))
}

fn address(
    queries: &ChainQueries<'_>,
    chain: &CommentChain,
    changeset: &Changeset,
    report: &mut PropagationReport,
) -> Result<()> {
    if chain.kind == ChainType::Issue && chain.state == ChainState::Open {
        let commit = changeset.child().id;
        queries.set_state(chain.id, ChainState::Addressed, None, Some(commit))?;
        log::info!("chain {} addressed by {commit}", chain.id);
        report.addressed.push(chain.id);
    }
    Ok(())
}

/// Carry the review's chains across `changeset`.
///
/// A chain anchored to the old side of a changed file gets a new anchor on
/// the new side when no chunk touches its lines, shifted by the chunks
/// before it. Otherwise, or when the file is deleted or binary, an open
/// issue becomes addressed by the changeset's child commit.
pub fn propagate(
    db: &Database,
    repo: &Repository,
    review: ReviewId,
    changeset: &Changeset,
) -> Result<PropagationReport> {
    db.add_review_changeset(review, changeset.id())?;

    let mut report = PropagationReport::default();
    let tx = db.conn().unchecked_transaction()?;
    let queries = ChainQueries::new(&tx);

    for file in changeset.files(db)? {
        let Some(old) = file.change.old_version() else {
            continue;
        };
        let anchored = queries.anchored_at(old.sha1, Some(file.id), Some(review))?;
        if anchored.is_empty() {
            continue;
        }

        let textual = file.lines(db, repo)?.is_some();
        let chunks = file.chunks(db)?;
        for (chain, lines) in anchored {
            let carried = if textual {
                carry(chunks, &lines, file)
            } else {
                None
            };
            match carried {
                Some(new_lines) => {
                    queries.insert_lines(chain.id, chain.user, CommentState::Current, &new_lines)?;
                    queries.set_last_commit(chain.id, changeset.child().id)?;
                    report.carried.push(chain.id);
                }
                None => address(&queries, &chain, changeset, &mut report)?,
            }
        }
    }

    tx.commit()?;
    log::info!(
        "propagated review {review} across changeset {}: {} carried, {} addressed",
        changeset.id(),
        report.carried.len(),
        report.addressed.len()
    );
    Ok(report)
}
