use std::collections::HashMap;
use std::ops::Index;
use std::rc::Rc;

use super::{Changeset, Materializer};
use crate::models::{ChangesetType, Commit};
use crate::services::repository::Repository;
use crate::{CommitId, Database, Error, Result};

/// One merge-type changeset per parent of a merge commit.
///
/// Indexable by position in parent order and by parent hash; both give the
/// same `Changeset`.
#[derive(Debug)]
pub struct MergeChangeset {
    merge: Rc<Commit>,
    changesets: Vec<Changeset>,
    by_parent: HashMap<CommitId, usize>,
}

impl MergeChangeset {
    pub fn new(db: &Database, repo: &Repository, merge: CommitId) -> Result<Self> {
        Self::build(repo, merge, |parent| {
            Changeset::from_commits(db, repo, Some(parent), merge, ChangesetType::Merge)
        })
    }

    /// Like [`MergeChangeset::new`], materializing missing changesets.
    pub fn ensure(
        db: &Database,
        repo: &Repository,
        materializer: &dyn Materializer,
        merge: CommitId,
    ) -> Result<Self> {
        Self::build(repo, merge, |parent| {
            Changeset::ensure(
                db,
                repo,
                materializer,
                Some(parent),
                merge,
                ChangesetType::Merge,
            )
        })
    }

    fn build(
        repo: &Repository,
        merge: CommitId,
        mut changeset: impl FnMut(CommitId) -> Result<Changeset>,
    ) -> Result<Self> {
        let merge = repo.commit(merge)?;
        if !merge.is_merge() {
            return Err(Error::NotAMergeCommit(merge.id));
        }

        let mut changesets = Vec::with_capacity(merge.parents.len());
        let mut by_parent = HashMap::with_capacity(merge.parents.len());
        for (index, parent) in merge.parents.iter().enumerate() {
            changesets.push(changeset(*parent)?);
            by_parent.entry(*parent).or_insert(index);
        }

        Ok(Self {
            merge,
            changesets,
            by_parent,
        })
    }

    pub fn merge(&self) -> &Rc<Commit> {
        &self.merge
    }

    pub fn changesets(&self) -> &[Changeset] {
        &self.changesets
    }

    pub fn len(&self) -> usize {
        self.changesets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.changesets.is_empty()
    }

    pub fn for_parent(&self, parent: CommitId) -> Option<&Changeset> {
        self.by_parent.get(&parent).map(|&i| &self.changesets[i])
    }

    /// Pairs of parent hash and changeset, in parent order.
    pub fn iter(&self) -> impl Iterator<Item = (CommitId, &Changeset)> {
        self.merge.parents.iter().copied().zip(&self.changesets)
    }
}

impl Index<usize> for MergeChangeset {
    type Output = Changeset;

    fn index(&self, index: usize) -> &Changeset {
        &self.changesets[index]
    }
}

impl Index<CommitId> for MergeChangeset {
    type Output = Changeset;

    fn index(&self, parent: CommitId) -> &Changeset {
        self.for_parent(parent)
            .unwrap_or_else(|| panic!("{parent} is not a parent of {}", self.merge.id))
    }
}
