use critic_core::{Database, Repository, services::changeset::text};

use crate::db::ChainQueries;
use crate::model::{
    ChainLines, ChainOrigin, ChainState, ChainType, CommentChain, CommentState, check_shape,
};
use crate::{BlobId, ChainId, CommentId, CommitId, Error, Result, ReviewId, UserId};

/// Where a new chain is attached. Lines are 1-based and inclusive.
#[derive(Debug, Clone)]
pub enum ChainTarget {
    File {
        commit: CommitId,
        path: String,
        origin: ChainOrigin,
        first_line: usize,
        last_line: usize,
    },
    CommitMessage {
        commit: CommitId,
        first_line: usize,
        last_line: usize,
    },
}

fn check_range(first_line: usize, last_line: usize, available: usize) -> Result<()> {
    check_shape(first_line, last_line)?;
    if last_line > available {
        return Err(Error::InvalidRange {
            first_line,
            last_line,
            reason: "range extends past the last line".to_string(),
        });
    }
    Ok(())
}

fn load(db: &Database, chain: ChainId) -> Result<CommentChain> {
    ChainQueries::new(db.conn())
        .get(chain)?
        .ok_or(Error::ChainNotFound(chain))
}

/// Create a draft chain with its anchor and first comment.
pub fn create_chain(
    db: &Database,
    repo: &Repository,
    review: ReviewId,
    user: UserId,
    kind: ChainType,
    target: &ChainTarget,
    text: &str,
) -> Result<ChainId> {
    let (commit, origin, file, lines) = match target {
        ChainTarget::File {
            commit,
            path,
            origin,
            first_line,
            last_line,
        } => {
            let entry = repo.lookup_file(*commit, path)?;
            let sha1 = BlobId::from(entry.id);
            let data = repo.blob(sha1)?;
            let available = text::blob_lines(&data).map_or(0, |lines| lines.len());
            check_range(*first_line, *last_line, available)?;
            let file = db.intern_file(path)?;
            let lines = ChainLines {
                sha1,
                first_line: *first_line,
                last_line: *last_line,
            };
            (*commit, Some(*origin), Some(file), lines)
        }
        ChainTarget::CommitMessage {
            commit,
            first_line,
            last_line,
        } => {
            let message = &repo.commit(*commit)?.message;
            check_range(*first_line, *last_line, text::split_lines(message).len())?;
            let lines = ChainLines {
                sha1: BlobId::from(commit.oid()),
                first_line: *first_line,
                last_line: *last_line,
            };
            (*commit, None, None, lines)
        }
    };

    let tx = db.conn().unchecked_transaction()?;
    let queries = ChainQueries::new(&tx);
    let id = queries.insert_chain(review, user, kind, origin, file, commit, commit)?;
    queries.insert_lines(id, user, CommentState::Draft, &lines)?;
    queries.insert_comment(id, user, CommentState::Draft, text)?;
    tx.commit()?;

    log::debug!("created draft {kind} chain {id} in review {review}");
    Ok(id)
}

/// Make a draft chain visible: state becomes open and its anchor and
/// comments current.
pub fn publish(db: &Database, chain: ChainId) -> Result<()> {
    let current = load(db, chain)?;
    if current.state != ChainState::Draft {
        return Err(Error::InvalidState {
            chain,
            state: current.state,
            action: "publish",
        });
    }

    let tx = db.conn().unchecked_transaction()?;
    let queries = ChainQueries::new(&tx);
    queries.publish_drafts(chain)?;
    queries.set_state(chain, ChainState::Open, None, None)?;
    tx.commit()?;

    log::info!("published chain {chain}");
    Ok(())
}

pub fn reply(db: &Database, chain: ChainId, user: UserId, text: &str) -> Result<CommentId> {
    let current = load(db, chain)?;
    if current.state == ChainState::Draft {
        return Err(Error::InvalidState {
            chain,
            state: current.state,
            action: "reply to",
        });
    }
    ChainQueries::new(db.conn()).insert_comment(chain, user, CommentState::Current, text)
}

/// Close an open issue by hand.
pub fn resolve(db: &Database, chain: ChainId, user: UserId) -> Result<()> {
    let current = load(db, chain)?;
    if current.kind != ChainType::Issue || current.state != ChainState::Open {
        return Err(Error::InvalidState {
            chain,
            state: current.state,
            action: "resolve",
        });
    }
    ChainQueries::new(db.conn()).set_state(chain, ChainState::Resolved, Some(user), None)
}

/// Reopen a resolved or addressed issue.
pub fn reopen(db: &Database, chain: ChainId) -> Result<()> {
    let current = load(db, chain)?;
    if !matches!(current.state, ChainState::Resolved | ChainState::Addressed) {
        return Err(Error::InvalidState {
            chain,
            state: current.state,
            action: "reopen",
        });
    }
    ChainQueries::new(db.conn()).set_state(chain, ChainState::Open, None, None)
}

/// Record that `commit` changed the lines an open issue is anchored to.
pub fn mark_addressed(db: &Database, chain: ChainId, commit: CommitId) -> Result<()> {
    let current = load(db, chain)?;
    if current.kind != ChainType::Issue || current.state != ChainState::Open {
        return Err(Error::InvalidState {
            chain,
            state: current.state,
            action: "address",
        });
    }
    ChainQueries::new(db.conn()).set_state(chain, ChainState::Addressed, None, Some(commit))?;
    log::info!("chain {chain} addressed by {commit}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ChainAnchor;
    use crate::testing::fixture;

    fn target(commit: CommitId, first_line: usize, last_line: usize) -> ChainTarget {
        ChainTarget::File {
            commit,
            path: "src/a.rs".to_string(),
            origin: ChainOrigin::New,
            first_line,
            last_line,
        }
    }

    #[test]
    fn chain_lifecycle() {
        let f = fixture();
        let c = f
            .t
            .commit_tree(&[], &[("src/a.rs", "1\n2\n3\n4\n5\n")], "c")
            .unwrap();

        let id = create_chain(
            &f.db,
            &f.repo,
            f.review,
            f.alice,
            ChainType::Issue,
            &target(c, 2, 3),
            "why?",
        )
        .unwrap();

        let chain = load(&f.db, id).unwrap();
        assert_eq!(chain.state, ChainState::Draft);
        assert_eq!(chain.path(), Some("src/a.rs"));
        assert!(matches!(chain.anchor, ChainAnchor::File { .. }));
        assert!(reply(&f.db, id, f.alice, "early").is_err());

        publish(&f.db, id).unwrap();
        assert!(matches!(
            publish(&f.db, id),
            Err(Error::InvalidState { action: "publish", .. })
        ));

        reply(&f.db, id, f.alice, "because").unwrap();
        let comments = ChainQueries::new(f.db.conn()).comments(id).unwrap();
        let texts: Vec<_> = comments.iter().map(|c| c.text.as_str()).collect();
        assert_eq!(texts, vec!["why?", "because"]);
        assert!(comments.iter().all(|c| c.state == CommentState::Current));

        resolve(&f.db, id, f.alice).unwrap();
        let chain = load(&f.db, id).unwrap();
        assert_eq!(chain.state, ChainState::Resolved);
        assert_eq!(chain.closed_by, Some(f.alice));

        reopen(&f.db, id).unwrap();
        mark_addressed(&f.db, id, c).unwrap();
        let chain = load(&f.db, id).unwrap();
        assert_eq!(chain.state, ChainState::Addressed);
        assert_eq!(chain.addressed_by, Some(c));
        assert!(resolve(&f.db, id, f.alice).is_err());
    }

    #[test]
    fn notes_cannot_be_resolved() {
        let f = fixture();
        let c = f.t.commit_tree(&[], &[("src/a.rs", "1\n")], "c").unwrap();
        let id = create_chain(
            &f.db,
            &f.repo,
            f.review,
            f.alice,
            ChainType::Note,
            &target(c, 1, 1),
            "fyi",
        )
        .unwrap();
        publish(&f.db, id).unwrap();

        assert!(resolve(&f.db, id, f.alice).is_err());
        assert!(mark_addressed(&f.db, id, c).is_err());
    }

    #[test]
    fn range_is_validated() {
        let f = fixture();
        let c = f.t.commit_tree(&[], &[("src/a.rs", "1\n2\n")], "c").unwrap();
        for (first, last) in [(0, 1), (2, 1), (1, 3)] {
            let err = create_chain(
                &f.db,
                &f.repo,
                f.review,
                f.alice,
                ChainType::Issue,
                &target(c, first, last),
                "x",
            )
            .unwrap_err();
            assert!(matches!(err, Error::InvalidRange { .. }), "{first}-{last}: {err}");
        }

        let err = create_chain(
            &f.db,
            &f.repo,
            f.review,
            f.alice,
            ChainType::Issue,
            &ChainTarget::File {
                commit: c,
                path: "missing.rs".to_string(),
                origin: ChainOrigin::Old,
                first_line: 1,
                last_line: 1,
            },
            "x",
        )
        .unwrap_err();
        assert!(err.is_not_found(), "unexpected error: {err}");
    }

    #[test]
    fn stored_anchor_rejects_malformed_ranges() {
        let f = fixture();
        let c = f
            .t
            .commit_tree(&[], &[("src/a.rs", "1\n2\n3\n")], "c")
            .unwrap();
        let id = create_chain(
            &f.db,
            &f.repo,
            f.review,
            f.alice,
            ChainType::Note,
            &target(c, 1, 1),
            "n",
        )
        .unwrap();

        let queries = ChainQueries::new(f.db.conn());
        let sha1 = BlobId::null();
        for (first_line, last_line) in [(0, 2), (3, 2)] {
            let lines = ChainLines {
                sha1,
                first_line,
                last_line,
            };
            let err = queries
                .insert_lines(id, f.alice, CommentState::Current, &lines)
                .unwrap_err();
            assert!(
                matches!(err, Error::InvalidRange { .. }),
                "{first_line}-{last_line}: {err}"
            );
        }
        assert_eq!(queries.lines_for(id, sha1).unwrap(), None);

        let reversed = ChainLines {
            sha1,
            first_line: 3,
            last_line: 2,
        };
        assert_eq!(reversed.line_index(), 2);
        assert_eq!(reversed.line_count(), 0);
    }

    #[test]
    fn unknown_chain_is_not_found() {
        let f = fixture();
        let err = publish(&f.db, ChainId(42)).unwrap_err();
        assert!(matches!(err, Error::ChainNotFound(ChainId(42))));
    }
}
