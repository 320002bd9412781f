use std::cell::OnceCell;
use std::collections::{HashMap, HashSet};
use std::rc::Rc;

use crate::db::Database;
use crate::models::{ChangesetType, Commit};
use crate::services::changeset::Changeset;
use crate::services::repository::Repository;
use crate::{CommitId, Error, Result};

/// An immutable DAG view over an explicit set of commits.
///
/// Parent/child edges are only recorded between members. Parents outside the
/// set are the set's tails.
#[derive(Debug, Clone)]
pub struct CommitSet {
    commits: Vec<Rc<Commit>>,
    index: HashMap<CommitId, usize>,
    parents: HashMap<CommitId, Vec<CommitId>>,
    children: HashMap<CommitId, Vec<CommitId>>,
    heads: Vec<CommitId>,
    tails: Vec<CommitId>,
    upstreams: OnceCell<Vec<CommitId>>,
}

impl CommitSet {
    pub fn new(commits: impl IntoIterator<Item = Rc<Commit>>) -> Self {
        let mut members: Vec<Rc<Commit>> = Vec::new();
        let mut index = HashMap::new();
        for commit in commits {
            if !index.contains_key(&commit.id) {
                index.insert(commit.id, members.len());
                members.push(commit);
            }
        }

        let mut parents: HashMap<CommitId, Vec<CommitId>> = HashMap::new();
        let mut children: HashMap<CommitId, Vec<CommitId>> = HashMap::new();
        let mut tails = Vec::new();
        let mut seen_tails = HashSet::new();

        for commit in &members {
            let in_set = parents.entry(commit.id).or_default();
            for parent in &commit.parents {
                if index.contains_key(parent) {
                    in_set.push(*parent);
                } else if seen_tails.insert(*parent) {
                    tails.push(*parent);
                }
            }
        }
        for commit in &members {
            for parent in &parents[&commit.id] {
                children.entry(*parent).or_default().push(commit.id);
            }
        }

        let heads = members
            .iter()
            .filter(|commit| !children.contains_key(&commit.id))
            .map(|commit| commit.id)
            .collect();

        Self {
            commits: members,
            index,
            parents,
            children,
            heads,
            tails,
            upstreams: OnceCell::new(),
        }
    }

    /// The commits in `base..head`.
    pub fn from_range(repo: &Repository, base: Option<CommitId>, head: CommitId) -> Result<Self> {
        Ok(Self::new(repo.commits_in_range(base, head)?))
    }

    pub fn len(&self) -> usize {
        self.commits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commits.is_empty()
    }

    pub fn contains(&self, id: &CommitId) -> bool {
        self.index.contains_key(id)
    }

    pub fn get(&self, id: &CommitId) -> Option<&Rc<Commit>> {
        self.index.get(id).map(|&i| &self.commits[i])
    }

    pub fn commits(&self) -> &[Rc<Commit>] {
        &self.commits
    }

    /// In-set parents of a member.
    pub fn parents_of(&self, id: &CommitId) -> &[CommitId] {
        self.parents.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// In-set children of a member.
    pub fn children_of(&self, id: &CommitId) -> &[CommitId] {
        self.children.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Members that no member names as a parent.
    pub fn heads(&self) -> &[CommitId] {
        &self.heads
    }

    /// Non-members that are a parent of some member.
    pub fn tails(&self) -> &[CommitId] {
        &self.tails
    }

    /// Tails that are neither an ancestor of another tail nor reachable from
    /// one of the set's heads.
    pub fn upstreams(&self, repo: &Repository) -> Result<&[CommitId]> {
        if let Some(upstreams) = self.upstreams.get() {
            return Ok(upstreams);
        }
        let computed = self.compute_upstreams(repo)?;
        Ok(self.upstreams.get_or_init(|| computed))
    }

    fn compute_upstreams(&self, repo: &Repository) -> Result<Vec<CommitId>> {
        let mut ancestry = Ancestry::new(repo);
        let below = self.tails_below_heads();

        let mut candidates = Vec::with_capacity(self.tails.len());
        'tails: for &tail in &self.tails {
            for &head in &self.heads {
                // A tail under this head is its ancestor, so never its descendant.
                if below[&head].contains(&tail) {
                    continue;
                }
                if ancestry.is_ancestor(head, tail)? {
                    log::debug!("tail {tail} is downstream of head {head}");
                    continue 'tails;
                }
            }
            candidates.push(tail);
        }

        let mut kept: Vec<CommitId> = Vec::new();
        'candidates: for tail in candidates {
            for &other in &kept {
                if ancestry.is_ancestor(tail, other)? {
                    continue 'candidates;
                }
            }
            let mut retained = Vec::with_capacity(kept.len() + 1);
            for other in kept {
                if !ancestry.is_ancestor(other, tail)? {
                    retained.push(other);
                }
            }
            retained.push(tail);
            kept = retained;
        }

        log::debug!(
            "upstreams of {} commits: {} of {} tails kept after {} reachability queries",
            self.commits.len(),
            kept.len(),
            self.tails.len(),
            ancestry.queries
        );
        Ok(kept)
    }

    /// For each head, the tails reached by walking its in-set ancestry.
    fn tails_below_heads(&self) -> HashMap<CommitId, HashSet<CommitId>> {
        let mut below = HashMap::with_capacity(self.heads.len());
        for &head in &self.heads {
            let mut visited = HashSet::new();
            let mut tails = HashSet::new();
            let mut stack = vec![head];
            while let Some(id) = stack.pop() {
                if !visited.insert(id) {
                    continue;
                }
                let Some(commit) = self.get(&id) else { continue };
                for parent in &commit.parents {
                    if self.contains(parent) {
                        stack.push(*parent);
                    } else {
                        tails.insert(*parent);
                    }
                }
            }
            below.insert(head, tails);
        }
        below
    }

    /// The commits reachable from `heads` without passing through `tails`.
    ///
    /// Heads that are not members are ignored. Every tail must be a member or
    /// one of this set's tails.
    pub fn restrict(&self, heads: &[CommitId], tails: &[CommitId]) -> Result<CommitSet> {
        for tail in tails {
            if !self.contains(tail) && !self.tails.contains(tail) {
                return Err(Error::InvalidArgument(format!(
                    "{tail} is neither a member nor a tail of the commit set"
                )));
            }
        }

        let exclude: HashSet<CommitId> = tails.iter().copied().collect();
        let mut visited: HashSet<CommitId> = HashSet::new();
        let mut stack: Vec<CommitId> = heads
            .iter()
            .rev()
            .filter(|head| self.contains(head))
            .copied()
            .collect();

        while let Some(id) = stack.pop() {
            if exclude.contains(&id) || !visited.insert(id) {
                continue;
            }
            stack.extend(
                self.parents_of(&id)
                    .iter()
                    .filter(|parent| !visited.contains(parent)),
            );
        }

        Ok(CommitSet::new(
            self.commits
                .iter()
                .filter(|commit| visited.contains(&commit.id))
                .cloned(),
        ))
    }

    /// A fresh set without the given commits.
    pub fn without(&self, commits: &[CommitId]) -> CommitSet {
        let excluded: HashSet<&CommitId> = commits.iter().collect();
        CommitSet::new(
            self.commits
                .iter()
                .filter(|commit| !excluded.contains(&commit.id))
                .cloned(),
        )
    }

    /// The changeset spanning the whole set. Requires exactly one head and
    /// exactly one upstream.
    pub fn changeset(&self, db: &Database, repo: &Repository) -> Result<Changeset> {
        let (head, upstream) = self.span(repo)?;
        let kind = match self.get(&head) {
            Some(commit) if commit.parents == [upstream] => ChangesetType::Direct,
            _ => ChangesetType::Custom,
        };
        let changeset = Changeset::from_commits(db, repo, Some(upstream), head, kind)?;
        Ok(changeset.with_commits(self.clone()))
    }

    /// The single (head, upstream) pair of the set.
    pub fn span(&self, repo: &Repository) -> Result<(CommitId, CommitId)> {
        let [head] = self.heads.as_slice() else {
            return Err(Error::MultipleHeads(self.heads.len()));
        };
        let upstreams = self.upstreams(repo)?;
        let [upstream] = upstreams else {
            return Err(Error::MultipleUpstreams(upstreams.len()));
        };
        Ok((*head, *upstream))
    }
}

/// Memoized reachability queries for one computation.
struct Ancestry<'r> {
    repo: &'r Repository,
    known: HashMap<(CommitId, CommitId), bool>,
    queries: usize,
}

impl<'r> Ancestry<'r> {
    fn new(repo: &'r Repository) -> Self {
        Self {
            repo,
            known: HashMap::new(),
            queries: 0,
        }
    }

    fn is_ancestor(&mut self, ancestor: CommitId, descendant: CommitId) -> Result<bool> {
        if ancestor == descendant {
            return Ok(true);
        }
        if let Some(&known) = self.known.get(&(ancestor, descendant)) {
            return Ok(known);
        }
        // Commits never cycle.
        if self.known.get(&(descendant, ancestor)) == Some(&true) {
            self.known.insert((ancestor, descendant), false);
            return Ok(false);
        }
        let transitive = self.known.iter().any(|(&(a, middle), &is)| {
            is && a == ancestor && self.known.get(&(middle, descendant)) == Some(&true)
        });
        if transitive {
            self.known.insert((ancestor, descendant), true);
            return Ok(true);
        }

        self.queries += 1;
        let base = self.repo.store().merge_base(ancestor, descendant)?;
        let forward = base == Some(ancestor);
        // One merge base answers both directions.
        self.known.insert((ancestor, descendant), forward);
        self.known.insert((descendant, ancestor), base == Some(descendant));
        Ok(forward)
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::path::PathBuf;

    use super::*;
    use crate::RepositoryId;
    use crate::models::{Object, TreeChange, TreeEntry};
    use crate::services::git::ObjectStore;
    use proptest::prelude::*;
    use test_repo::TestRepo;

    fn open(t: &TestRepo) -> Repository {
        Repository::new(RepositoryId(1), t.open().unwrap())
    }

    fn set_of(repo: &Repository, ids: &[CommitId]) -> CommitSet {
        CommitSet::new(ids.iter().map(|id| repo.commit(*id).unwrap()))
    }

    /// ```text
    ///     E
    ///    / \
    ///   C   D
    ///    \ /
    ///     B
    ///     |
    ///     A
    /// ```
    struct Diamond {
        t: TestRepo,
        a: CommitId,
        b: CommitId,
        c: CommitId,
        d: CommitId,
        e: CommitId,
    }

    fn diamond() -> Diamond {
        let t = TestRepo::new().unwrap();
        let a = t.commit_tree(&[], &[("f", "a\n")], "a").unwrap();
        let b = t.commit_tree(&[a], &[("f", "b\n")], "b").unwrap();
        let c = t.commit_tree(&[b], &[("f", "c\n")], "c").unwrap();
        let d = t.commit_tree(&[b], &[("g", "d\n")], "d").unwrap();
        let e = t.commit_tree(&[c, d], &[("f", "e\n")], "e").unwrap();
        Diamond { t, a, b, c, d, e }
    }

    #[test]
    fn heads_and_tails_of_linear_range() {
        let g = diamond();
        let repo = open(&g.t);
        let set = set_of(&repo, &[g.c, g.b]);

        assert_eq!(set.heads(), &[g.c]);
        assert_eq!(set.tails(), &[g.a]);
        assert_eq!(set.parents_of(&g.c), &[g.b]);
        assert_eq!(set.children_of(&g.b), &[g.c]);
        assert_eq!(set.upstreams(&repo).unwrap(), &[g.a]);
    }

    #[test]
    fn duplicates_are_collapsed() {
        let g = diamond();
        let repo = open(&g.t);
        let set = set_of(&repo, &[g.b, g.b, g.c]);
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn merge_parents_outside_set_are_tails() {
        let g = diamond();
        let repo = open(&g.t);
        let set = set_of(&repo, &[g.e]);

        assert_eq!(set.heads(), &[g.e]);
        assert_eq!(set.tails(), &[g.c, g.d]);
        assert_eq!(set.upstreams(&repo).unwrap().len(), 2);
    }

    #[test]
    fn redundant_tail_is_dropped_from_upstreams() {
        // {C, E}: tails are B (parent of C) and D (parent of E); B is an
        // ancestor of D so only D remains.
        let g = diamond();
        let repo = open(&g.t);
        let set = set_of(&repo, &[g.e, g.c]);

        assert_eq!(set.heads(), &[g.e]);
        assert_eq!(set.tails(), &[g.d, g.b]);
        assert_eq!(set.upstreams(&repo).unwrap(), &[g.d]);
    }

    #[test]
    fn tail_downstream_of_a_head_is_not_an_upstream() {
        // {B, E}: C and D are tails, but both descend from head B.
        let g = diamond();
        let repo = open(&g.t);
        let set = set_of(&repo, &[g.e, g.b]);

        assert_eq!(set.heads(), &[g.e, g.b]);
        assert!(set.tails().contains(&g.a));
        assert_eq!(set.upstreams(&repo).unwrap(), &[g.a]);
    }

    #[test]
    fn every_parent_edge_is_recorded() {
        let g = diamond();
        let repo = open(&g.t);
        let set = set_of(&repo, &[g.e, g.c, g.b]);

        for commit in set.commits() {
            for parent in &commit.parents {
                assert!(
                    set.parents_of(&commit.id).contains(parent) || set.tails().contains(parent),
                    "parent {parent} of {} was dropped",
                    commit.id
                );
            }
        }
    }

    #[test]
    fn restrict_walks_from_heads_to_tails() {
        let g = diamond();
        let repo = open(&g.t);
        let set = set_of(&repo, &[g.e, g.d, g.c, g.b]);

        let restricted = set.restrict(&[g.e], &[g.b]).unwrap();
        let mut ids: Vec<_> = restricted.commits().iter().map(|c| c.id).collect();
        ids.sort();
        let mut expected = vec![g.e, g.c, g.d];
        expected.sort();
        assert_eq!(ids, expected);
        assert_eq!(restricted.tails(), &[g.b]);

        let branch = set.restrict(&[g.c], &[g.a]).unwrap();
        let ids: Vec<_> = branch.commits().iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![g.c, g.b]);
    }

    #[test]
    fn restrict_ignores_heads_outside_the_set() {
        let g = diamond();
        let repo = open(&g.t);
        let set = set_of(&repo, &[g.c, g.b]);

        let restricted = set.restrict(&[g.e], &[]).unwrap();
        assert!(restricted.is_empty());
    }

    #[test]
    fn restrict_rejects_unknown_tail() {
        let g = diamond();
        let repo = open(&g.t);
        let set = set_of(&repo, &[g.c]);

        let err = set.restrict(&[g.c], &[g.e]).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[test]
    fn without_recomputes_heads_and_tails() {
        let g = diamond();
        let repo = open(&g.t);
        let set = set_of(&repo, &[g.e, g.d, g.c, g.b]);
        assert_eq!(set.heads(), &[g.e]);

        let trimmed = set.without(&[g.e]);
        assert_eq!(trimmed.len(), 3);
        assert_eq!(trimmed.heads(), &[g.d, g.c]);
        assert_eq!(trimmed.tails(), &[g.a]);
        assert_eq!(set.len(), 4);
    }

    #[test]
    fn span_requires_single_head_and_upstream() {
        let g = diamond();
        let repo = open(&g.t);

        let two_heads = set_of(&repo, &[g.c, g.d]);
        assert!(matches!(two_heads.span(&repo), Err(Error::MultipleHeads(2))));

        let two_upstreams = set_of(&repo, &[g.e]);
        assert!(matches!(
            two_upstreams.span(&repo),
            Err(Error::MultipleUpstreams(2))
        ));

        let linear = set_of(&repo, &[g.c, g.b]);
        assert_eq!(linear.span(&repo).unwrap(), (g.c, g.a));
    }

    #[test]
    fn changeset_spans_the_set() {
        use crate::services::changeset::{LocalMaterializer, Materializer};

        let g = diamond();
        let db = Database::open_in_memory().unwrap();
        let id = db
            .register_repository("diamond", std::path::Path::new("/diamond"))
            .unwrap();
        let repo = Repository::new(id, g.t.open().unwrap());
        let set = set_of(&repo, &[g.c, g.b]);

        let err = set.changeset(&db, &repo).unwrap_err();
        assert!(err.is_not_cached(), "unexpected error: {err}");

        LocalMaterializer::default()
            .materialize(&db, &repo, ChangesetType::Custom, Some(g.a), g.c)
            .unwrap();
        let changeset = set.changeset(&db, &repo).unwrap();
        assert_eq!(changeset.kind(), ChangesetType::Custom);
        assert_eq!(changeset.parent().map(|c| c.id), Some(g.a));
        assert_eq!(changeset.commits().map(CommitSet::len), Some(2));
    }

    /// Counts merge-base requests that reach git.
    struct CountingStore {
        inner: git2::Repository,
        merge_bases: Rc<Cell<usize>>,
    }

    impl ObjectStore for CountingStore {
        fn fetch(&self, id: git2::Oid) -> Result<Object> {
            ObjectStore::fetch(&self.inner, id)
        }

        fn read_commit(&self, id: CommitId) -> Result<Commit> {
            ObjectStore::read_commit(&self.inner, id)
        }

        fn ls_tree(&self, commit: CommitId, path: &str) -> Result<Vec<TreeEntry>> {
            ObjectStore::ls_tree(&self.inner, commit, path)
        }

        fn lookup(&self, commit: CommitId, path: &str) -> Result<TreeEntry> {
            ObjectStore::lookup(&self.inner, commit, path)
        }

        fn rev_parse(&self, reference: &str) -> Result<CommitId> {
            ObjectStore::rev_parse(&self.inner, reference)
        }

        fn merge_base(&self, a: CommitId, b: CommitId) -> Result<Option<CommitId>> {
            self.merge_bases.set(self.merge_bases.get() + 1);
            ObjectStore::merge_base(&self.inner, a, b)
        }

        fn rev_list(&self, base: Option<CommitId>, head: CommitId) -> Result<Vec<CommitId>> {
            ObjectStore::rev_list(&self.inner, base, head)
        }

        fn diff_trees(&self, parent: Option<CommitId>, child: CommitId) -> Result<Vec<TreeChange>> {
            ObjectStore::diff_trees(&self.inner, parent, child)
        }

        fn data_dir(&self) -> Option<PathBuf> {
            None
        }
    }

    #[test]
    fn upstreams_deduce_instead_of_requerying() {
        // t1 <- t2 <- t3, each the parent of one member; h merges the members.
        let t = TestRepo::new().unwrap();
        let t1 = t.commit_tree(&[], &[("f", "1\n")], "t1").unwrap();
        let t2 = t.commit_tree(&[t1], &[("f", "2\n")], "t2").unwrap();
        let t3 = t.commit_tree(&[t2], &[("f", "3\n")], "t3").unwrap();
        let m1 = t.commit_tree(&[t1], &[("f", "m1\n")], "m1").unwrap();
        let m2 = t.commit_tree(&[t2], &[("f", "m2\n")], "m2").unwrap();
        let m3 = t.commit_tree(&[t3], &[("f", "m3\n")], "m3").unwrap();
        let h = t.commit_tree(&[m1, m2, m3], &[("f", "h\n")], "h").unwrap();

        let merge_bases = Rc::new(Cell::new(0));
        let store = CountingStore {
            inner: t.open().unwrap(),
            merge_bases: Rc::clone(&merge_bases),
        };
        let repo = Repository::new(RepositoryId(1), store);
        let set = set_of(&repo, &[h, m1, m2, m3]);
        assert_eq!(set.tails(), &[t1, t2, t3]);

        assert_eq!(set.upstreams(&repo).unwrap(), &[t3]);
        let tail_pairs = 3;
        assert_eq!(merge_bases.get(), 2);
        assert!(merge_bases.get() < tail_pairs);

        set.upstreams(&repo).unwrap();
        assert_eq!(merge_bases.get(), 2);
    }

    #[test]
    fn deep_history_restrict_does_not_recurse() {
        let t = TestRepo::new().unwrap();
        let mut ids = Vec::new();
        let mut parent: Option<CommitId> = None;
        for i in 0..2000 {
            let parents: Vec<CommitId> = parent.into_iter().collect();
            let content = format!("{i}\n");
            let id = t
                .commit_tree(&parents, &[("f", content.as_str())], &format!("c{i}"))
                .unwrap();
            ids.push(id);
            parent = Some(id);
        }
        let repo = open(&t);
        let set = set_of(&repo, &ids);
        let head = *ids.last().unwrap();

        let restricted = set.restrict(&[head], &[ids[0]]).unwrap();
        assert_eq!(restricted.len(), 1999);
        assert_eq!(restricted.tails(), &[ids[0]]);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(16))]

        /// Random DAGs: every commit picks up to two earlier commits as
        /// parents. The set is a random subset of the commits.
        #[test]
        fn upstreams_are_minimal(
            edges in proptest::collection::vec((any::<prop::sample::Index>(), any::<prop::sample::Index>(), any::<bool>()), 1..12),
            members in proptest::collection::vec(any::<bool>(), 13),
        ) {
            let t = TestRepo::new().unwrap();
            let root = t.commit_tree(&[], &[("f", "root\n")], "root").unwrap();
            let mut ids = vec![root];
            for (i, (first, second, merge)) in edges.iter().enumerate() {
                let mut parents = vec![ids[first.index(ids.len())]];
                let other = ids[second.index(ids.len())];
                if *merge && !parents.contains(&other) {
                    parents.push(other);
                }
                let content = format!("{i}\n");
                let id = t.commit_tree(&parents, &[("f", content.as_str())], &format!("c{i}")).unwrap();
                ids.push(id);
            }
            let repo = open(&t);
            let chosen: Vec<CommitId> = ids
                .iter()
                .zip(members.iter())
                .filter(|(_, keep)| **keep)
                .map(|(id, _)| *id)
                .collect();
            let set = set_of(&repo, &chosen);

            let upstreams = set.upstreams(&repo).unwrap().to_vec();
            for &u in &upstreams {
                prop_assert!(set.tails().contains(&u));
                for &other in &upstreams {
                    if u != other {
                        prop_assert!(!repo.is_ancestor(u, other).unwrap());
                    }
                }
                for &head in set.heads() {
                    prop_assert!(!repo.is_ancestor(head, u).unwrap());
                }
            }
            // Every dropped tail is covered by a kept upstream or lies below a head.
            for &tail in set.tails() {
                let covered = upstreams.iter().any(|&u| repo.is_ancestor(tail, u).unwrap())
                    || set.heads().iter().any(|&h| repo.is_ancestor(h, tail).unwrap());
                prop_assert!(covered);
            }
        }
    }
}
