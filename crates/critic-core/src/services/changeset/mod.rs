mod analysis;
mod chunk;
mod file;
mod lock;
mod materialize;
mod merge;
pub mod text;
mod word_diff;

use std::cell::OnceCell;
use std::collections::BTreeSet;
use std::rc::Rc;

pub use analysis::Pairing;
pub use chunk::ChangesetChunk;
pub use file::{ChangesetFile, FileChange, FileVersion};
pub use lock::MaterializeLock;
pub use materialize::{LocalMaterializer, MaterializeOptions, Materializer};
pub use merge::MergeChangeset;

use crate::db::ChangesetRow;
use crate::models::{ChangesetType, Commit};
use crate::services::commit_set::CommitSet;
use crate::services::repository::Repository;
use crate::{ChangesetId, CommitId, Database, Error, FileId, RepositoryId, Result, ReviewId};

/// The file-level difference between two commits, as stored.
///
/// Files are loaded on first access and kept for the lifetime of the value.
pub struct Changeset {
    id: ChangesetId,
    repository: RepositoryId,
    kind: ChangesetType,
    parent: Option<Rc<Commit>>,
    child: Rc<Commit>,
    review: Option<ReviewId>,
    commits: Option<CommitSet>,
    filter: Option<BTreeSet<FileId>>,
    files: OnceCell<Vec<ChangesetFile>>,
}

impl std::fmt::Debug for Changeset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Changeset")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("parent", &self.parent.as_ref().map(|c| c.id))
            .field("child", &self.child.id)
            .finish_non_exhaustive()
    }
}

impl Changeset {
    fn from_row(repo: &Repository, row: ChangesetRow) -> Result<Self> {
        let parent = row.parent.map(|id| repo.commit(id)).transpose()?;
        Ok(Self {
            id: row.id,
            repository: row.repository,
            kind: row.kind,
            parent,
            child: repo.commit(row.child)?,
            review: None,
            commits: None,
            filter: None,
            files: OnceCell::new(),
        })
    }

    pub fn fetch(db: &Database, repo: &Repository, id: ChangesetId) -> Result<Self> {
        let row = db
            .changesets()
            .get(id)?
            .filter(|row| row.repository == repo.id())
            .ok_or(Error::InvalidChangesetId(id))?;
        Self::from_row(repo, row)
    }

    /// Look up the cached changeset of type `kind` between two commits.
    ///
    /// Fails with `NotCached` if it was never materialized, and with
    /// `ChangesetTypeMismatch` if the pair is stored as direct when custom
    /// was asked for, or the other way round.
    pub fn from_commits(
        db: &Database,
        repo: &Repository,
        parent: Option<CommitId>,
        child: CommitId,
        kind: ChangesetType,
    ) -> Result<Self> {
        let queries = db.changesets();
        if let Some(row) = queries.find(repo.id(), kind, parent, child)? {
            return Self::from_row(repo, row);
        }

        queries.check_type(repo.id(), kind, parent, child)?;
        Err(Error::NotCached { parent, child })
    }

    /// Like [`Changeset::from_commits`], materializing once on a cache miss.
    pub fn ensure(
        db: &Database,
        repo: &Repository,
        materializer: &dyn Materializer,
        parent: Option<CommitId>,
        child: CommitId,
        kind: ChangesetType,
    ) -> Result<Self> {
        match Self::from_commits(db, repo, parent, child, kind) {
            Err(err) if err.is_not_cached() => {
                log::debug!("{err}; requesting materialization");
                materializer.materialize(db, repo, kind, parent, child)?;
                Self::from_commits(db, repo, parent, child, kind)
            }
            other => other,
        }
    }

    /// Restrict [`Changeset::files`] to the given file ids.
    pub fn with_filter(mut self, files: impl IntoIterator<Item = FileId>) -> Self {
        self.filter = Some(files.into_iter().collect());
        self.files = OnceCell::new();
        self
    }

    pub fn with_commits(mut self, commits: CommitSet) -> Self {
        self.commits = Some(commits);
        self
    }

    pub fn with_review(mut self, review: ReviewId) -> Self {
        self.review = Some(review);
        self
    }

    pub fn id(&self) -> ChangesetId {
        self.id
    }

    pub fn repository(&self) -> RepositoryId {
        self.repository
    }

    pub fn kind(&self) -> ChangesetType {
        self.kind
    }

    pub fn parent(&self) -> Option<&Rc<Commit>> {
        self.parent.as_ref()
    }

    pub fn child(&self) -> &Rc<Commit> {
        &self.child
    }

    pub fn review(&self) -> Option<ReviewId> {
        self.review
    }

    pub fn commits(&self) -> Option<&CommitSet> {
        self.commits.as_ref()
    }

    /// Changed files ordered by path.
    pub fn files(&self, db: &Database) -> Result<&[ChangesetFile]> {
        if let Some(files) = self.files.get() {
            return Ok(files);
        }

        let files = db
            .changesets()
            .file_versions(self.id)?
            .into_iter()
            .filter(|row| self.filter.as_ref().is_none_or(|f| f.contains(&row.file)))
            .map(|row| ChangesetFile::from_row(self.id, row))
            .collect::<Result<Vec<_>>>()?;
        Ok(self.files.get_or_init(|| files))
    }

    pub fn file(&self, db: &Database, path: &str) -> Result<Option<&ChangesetFile>> {
        Ok(self.files(db)?.iter().find(|f| f.path == path))
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::*;
    use crate::models::LineType;
    use test_repo::TestRepo;

    struct Fixture {
        db: Database,
        repo: Repository,
        _t: TestRepo,
    }

    fn fixture(t: TestRepo) -> Fixture {
        let db = Database::open_in_memory().unwrap();
        let id = db.register_repository("test", Path::new("/test")).unwrap();
        let repo = Repository::new(id, t.open().unwrap());
        Fixture { db, repo, _t: t }
    }

    fn materialize(f: &Fixture, parent: Option<CommitId>, child: CommitId) -> Changeset {
        Changeset::ensure(
            &f.db,
            &f.repo,
            &LocalMaterializer::default(),
            parent,
            child,
            ChangesetType::Direct,
        )
        .unwrap()
    }

    #[test]
    fn inserted_line_outside_context() {
        let t = TestRepo::new().unwrap();
        let p = t.commit_tree(&[], &[("a.txt", "foo\nbar\n")], "p").unwrap();
        let c = t
            .commit_tree(&[p], &[("a.txt", "foo\nbaz\nbar\n")], "c")
            .unwrap();
        let f = fixture(t);

        let changeset = materialize(&f, Some(p), c);
        let files = changeset.files(&f.db).unwrap();
        assert_eq!(files.len(), 1);
        let file = &files[0];
        assert_eq!(file.path, "a.txt");
        assert!(matches!(file.change, FileChange::Modified { .. }));

        let chunks = file.chunks(&f.db).unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(
            (
                chunks[0].delete_offset,
                chunks[0].delete_count,
                chunks[0].insert_offset,
                chunks[0].insert_count
            ),
            (1, 0, 1, 1)
        );

        let lines = file.lines(&f.db, &f.repo).unwrap().unwrap();
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].line_type, LineType::Inserted);
        assert_eq!(lines[0].new_index, Some(1));
        assert_eq!(lines[0].new_text.as_deref(), Some("baz"));

        let full = file.lines_with_context(&f.db, &f.repo).unwrap().unwrap();
        let summary: Vec<_> = full
            .iter()
            .map(|l| (l.line_type, l.old_index, l.new_index))
            .collect();
        assert_eq!(
            summary,
            vec![
                (LineType::Context, Some(0), Some(0)),
                (LineType::Inserted, None, Some(1)),
                (LineType::Context, Some(1), Some(2)),
            ]
        );
    }

    #[test]
    fn modified_line_round_trips_through_storage() {
        let t = TestRepo::new().unwrap();
        let p = t.commit_tree(&[], &[("a.txt", "hello world\n")], "p").unwrap();
        let c = t.commit_tree(&[p], &[("a.txt", "hello there\n")], "c").unwrap();
        let f = fixture(t);

        let changeset = materialize(&f, Some(p), c);
        let file = changeset.file(&f.db, "a.txt").unwrap().unwrap();
        assert_eq!(file.chunks(&f.db).unwrap()[0].analysis(), "0=0:r6-11=6-11");

        let lines = file.lines(&f.db, &f.repo).unwrap().unwrap();
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].line_type, LineType::Modified);
        assert_eq!((lines[0].old_index, lines[0].new_index), (Some(0), Some(0)));
    }

    #[test]
    fn lookup_before_materialization_is_not_cached() {
        let t = TestRepo::new().unwrap();
        let p = t.commit_tree(&[], &[("a", "1\n")], "p").unwrap();
        let c = t.commit_tree(&[p], &[("a", "2\n")], "c").unwrap();
        let f = fixture(t);

        let err = Changeset::from_commits(&f.db, &f.repo, Some(p), c, ChangesetType::Direct)
            .unwrap_err();
        assert!(err.is_not_cached(), "unexpected error: {err}");
        assert!(!err.is_not_found());

        let changeset = materialize(&f, Some(p), c);
        let again =
            Changeset::from_commits(&f.db, &f.repo, Some(p), c, ChangesetType::Direct).unwrap();
        assert_eq!(changeset.id(), again.id());
        assert_eq!(again.parent().map(|c| c.id), Some(p));
        assert_eq!(again.child().id, c);
    }

    #[test]
    fn materialization_is_idempotent() {
        let t = TestRepo::new().unwrap();
        let p = t.commit_tree(&[], &[("a", "1\n")], "p").unwrap();
        let c = t.commit_tree(&[p], &[("a", "2\n")], "c").unwrap();
        let f = fixture(t);
        let m = LocalMaterializer::default();

        let first = m
            .materialize(&f.db, &f.repo, ChangesetType::Direct, Some(p), c)
            .unwrap();
        let second = m
            .materialize(&f.db, &f.repo, ChangesetType::Direct, Some(p), c)
            .unwrap();
        assert_eq!(first, second);

        let count: i64 = f
            .db
            .conn()
            .query_row("SELECT COUNT(*) FROM chunks", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn fetch_by_id() {
        let t = TestRepo::new().unwrap();
        let p = t.commit_tree(&[], &[("a", "1\n")], "p").unwrap();
        let c = t.commit_tree(&[p], &[("a", "2\n")], "c").unwrap();
        let f = fixture(t);

        let changeset = materialize(&f, Some(p), c);
        let fetched = Changeset::fetch(&f.db, &f.repo, changeset.id()).unwrap();
        assert_eq!(fetched.kind(), ChangesetType::Direct);
        assert_eq!(fetched.child().id, c);

        let err = Changeset::fetch(&f.db, &f.repo, ChangesetId(9999)).unwrap_err();
        assert!(matches!(err, Error::InvalidChangesetId(ChangesetId(9999))));
        assert!(err.is_not_found());
    }

    #[test]
    fn type_mismatch_between_direct_and_custom() {
        let t = TestRepo::new().unwrap();
        let p = t.commit_tree(&[], &[("a", "1\n")], "p").unwrap();
        let c = t.commit_tree(&[p], &[("a", "2\n")], "c").unwrap();
        let f = fixture(t);
        materialize(&f, Some(p), c);

        let err = Changeset::from_commits(&f.db, &f.repo, Some(p), c, ChangesetType::Custom)
            .unwrap_err();
        assert!(
            matches!(err, Error::ChangesetTypeMismatch { ref actual, .. } if actual == "direct"),
            "unexpected error: {err}"
        );
    }

    #[test]
    fn materializing_sibling_type_is_rejected() {
        let t = TestRepo::new().unwrap();
        let p = t.commit_tree(&[], &[("a", "1\n")], "p").unwrap();
        let c = t.commit_tree(&[p], &[("a", "2\n")], "c").unwrap();
        let f = fixture(t);
        let direct = materialize(&f, Some(p), c);

        let err = LocalMaterializer::default()
            .materialize(&f.db, &f.repo, ChangesetType::Custom, Some(p), c)
            .unwrap_err();
        assert!(
            matches!(err, Error::ChangesetTypeMismatch { id, ref actual, .. }
                if id == direct.id() && actual == "direct"),
            "unexpected error: {err}"
        );

        let rows: i64 = f
            .db
            .conn()
            .query_row("SELECT COUNT(*) FROM changesets", [], |row| row.get(0))
            .unwrap();
        assert_eq!(rows, 1);
    }

    #[test]
    fn added_deleted_and_binary_files() {
        let t = TestRepo::new().unwrap();
        let p = t
            .commit_tree(&[], &[("gone.txt", &b"x\n"[..]), ("img.bin", &b"\0\x01"[..])], "p")
            .unwrap();
        let c = t
            .commit_tree(
                &[p],
                &[("img.bin", &b"\0\x02"[..]), ("new.txt", &b"a\nb\n"[..])],
                "c",
            )
            .unwrap();
        let f = fixture(t);
        let changeset = materialize(&f, Some(p), c);

        let paths: Vec<_> = changeset
            .files(&f.db)
            .unwrap()
            .iter()
            .map(|f| f.path.as_str())
            .collect();
        assert_eq!(paths, vec!["gone.txt", "img.bin", "new.txt"]);

        let gone = changeset.file(&f.db, "gone.txt").unwrap().unwrap();
        assert!(matches!(gone.change, FileChange::Deleted { .. }));
        let lines = gone.lines(&f.db, &f.repo).unwrap().unwrap();
        assert_eq!(lines, vec![crate::models::ChangesetLine::deleted(0, "x")]);

        let added = changeset.file(&f.db, "new.txt").unwrap().unwrap();
        assert!(added.change.old_version().is_none());
        let new = added.change.new_version().unwrap();
        assert_eq!(new.size(&f.repo).unwrap(), 4);
        assert_eq!(added.lines(&f.db, &f.repo).unwrap().unwrap().len(), 2);

        let binary = changeset.file(&f.db, "img.bin").unwrap().unwrap();
        assert!(binary.chunks(&f.db).unwrap().is_empty());
        assert!(binary.lines(&f.db, &f.repo).unwrap().is_none());
        assert!(binary.change.new_version().unwrap().is_binary(&f.repo).unwrap());
    }

    #[test]
    fn submodule_bump_is_stored_without_lines() {
        let t = TestRepo::new().unwrap();
        let old_target = git2::Oid::from_str(&"1".repeat(40)).unwrap();
        let new_target = git2::Oid::from_str(&"2".repeat(40)).unwrap();
        let p = t
            .commit_gitlink(&[], &[("README", "docs\n")], ("sub", old_target), "p")
            .unwrap();
        let c = t
            .commit_gitlink(&[p], &[("README", "docs\n")], ("sub", new_target), "c")
            .unwrap();
        let f = fixture(t);
        let changeset = materialize(&f, Some(p), c);

        let files = changeset.files(&f.db).unwrap();
        assert_eq!(files.len(), 1);
        let sub = &files[0];
        assert_eq!(sub.path, "sub");
        let FileChange::Modified { old, new } = &sub.change else {
            panic!("expected a modified entry, got {:?}", sub.change);
        };
        assert_eq!(old.sha1, crate::BlobId::from(old_target));
        assert_eq!(new.mode, crate::models::GITLINK_MODE);
        assert!(new.is_gitlink());
        assert!(sub.chunks(&f.db).unwrap().is_empty());
        assert!(sub.lines(&f.db, &f.repo).unwrap().is_none());
        assert_eq!(new.size(&f.repo).unwrap(), 0);
    }

    #[test]
    fn root_commit_diffs_against_empty_tree() {
        let t = TestRepo::new().unwrap();
        let root = t.commit_tree(&[], &[("a", "1\n2\n")], "root").unwrap();
        let f = fixture(t);

        let changeset = materialize(&f, None, root);
        assert!(changeset.parent().is_none());
        let file = changeset.file(&f.db, "a").unwrap().unwrap();
        assert!(matches!(file.change, FileChange::Added { .. }));
    }

    #[test]
    fn filter_limits_files() {
        let t = TestRepo::new().unwrap();
        let p = t.commit_tree(&[], &[("a", "1\n"), ("b", "1\n")], "p").unwrap();
        let c = t.commit_tree(&[p], &[("a", "2\n"), ("b", "2\n")], "c").unwrap();
        let f = fixture(t);
        let id = materialize(&f, Some(p), c).id();

        let b = f.db.file_id("b").unwrap().unwrap();
        let filtered = Changeset::fetch(&f.db, &f.repo, id).unwrap().with_filter([b]);
        let files = filtered.files(&f.db).unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].path, "b");
    }

    #[test]
    fn merge_changeset_indexes_by_parent() {
        let t = TestRepo::new().unwrap();
        let base = t
            .commit_tree(&[], &[("f", "base\n"), ("g", "base\n")], "base")
            .unwrap();
        let left = t
            .commit_tree(&[base], &[("f", "left\n"), ("g", "base\n")], "left")
            .unwrap();
        let right = t
            .commit_tree(&[base], &[("f", "base\n"), ("g", "right\n")], "right")
            .unwrap();
        let merge = t
            .commit_tree(
                &[left, right],
                &[("f", "merged\n"), ("g", "right\n")],
                "merge",
            )
            .unwrap();
        let f = fixture(t);

        let err = MergeChangeset::new(&f.db, &f.repo, merge).unwrap_err();
        assert!(err.is_not_cached());

        let mc =
            MergeChangeset::ensure(&f.db, &f.repo, &LocalMaterializer::default(), merge).unwrap();
        assert_eq!(mc.len(), 2);
        assert!(std::ptr::eq(&mc[0usize], &mc[left]));
        assert!(std::ptr::eq(&mc[1usize], &mc[right]));
        assert_eq!(mc[left].kind(), ChangesetType::Merge);
        assert_eq!(mc[right].parent().map(|c| c.id), Some(right));

        // Only `f` differs from both parents; `g` was taken from `right`.
        for (_, changeset) in mc.iter() {
            let paths: Vec<_> = changeset
                .files(&f.db)
                .unwrap()
                .iter()
                .map(|f| f.path.clone())
                .collect();
            assert_eq!(paths, vec!["f".to_string()]);
        }

        let again = MergeChangeset::new(&f.db, &f.repo, merge).unwrap();
        assert_eq!(again[left].id(), mc[left].id());
    }

    #[test]
    fn merge_changeset_requires_a_merge() {
        let t = TestRepo::new().unwrap();
        let p = t.commit_tree(&[], &[("a", "1\n")], "p").unwrap();
        let c = t.commit_tree(&[p], &[("a", "2\n")], "c").unwrap();
        let f = fixture(t);

        let err = MergeChangeset::new(&f.db, &f.repo, c).unwrap_err();
        assert!(matches!(err, Error::NotAMergeCommit(id) if id == c));
    }
}
