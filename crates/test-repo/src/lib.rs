use std::path::Path;

use critic_types::CommitId;
use git2::{FileMode, IndexAddOption, Oid, Repository, Signature};
use tempfile::TempDir;

mod tree;

use tree::NestedTreeBuilder;

pub struct TestRepo {
    pub repo: Repository,
    _dir: TempDir,
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Git error: {0}")]
    Git(#[from] git2::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

type Result<T> = std::result::Result<T, Error>;

impl TestRepo {
    pub fn new() -> Result<Self> {
        let dir = TempDir::new()?;
        let repo = Repository::init(dir.path())?;
        Ok(Self { _dir: dir, repo })
    }

    pub fn path(&self) -> &Path {
        self._dir.path()
    }

    /// Open a second handle on the same repository.
    pub fn open(&self) -> Result<Repository> {
        Ok(Repository::open(self._dir.path())?)
    }

    pub fn write_file(&self, path: &str, content: &str) -> Result<()> {
        let file_path = self._dir.path().join(path);
        if let Some(parent) = file_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&file_path, content)?;
        Ok(())
    }

    pub fn delete_file(&self, path: &str) -> Result<()> {
        std::fs::remove_file(self._dir.path().join(path))?;
        Ok(())
    }

    /// Stage the whole work tree (including deletions) and commit it on top of HEAD.
    pub fn commit(&self, message: &str) -> Result<CommitId> {
        let mut index = self.repo.index()?;
        index.add_all(["*"].iter(), IndexAddOption::DEFAULT, None)?;
        index.update_all(["*"].iter(), None)?;
        index.write()?;

        let tree_id = index.write_tree()?;
        let tree = self.repo.find_tree(tree_id)?;

        let sig = signature()?;
        let parent = self.repo.head().ok().and_then(|h| h.peel_to_commit().ok());
        let parents: Vec<&git2::Commit> = parent.iter().collect();

        let oid = self
            .repo
            .commit(Some("HEAD"), &sig, &sig, message, &tree, &parents)?;
        Ok(CommitId::from(oid))
    }

    /// Create a commit whose tree holds exactly `files`, with explicit parents.
    /// HEAD is left untouched, so arbitrary DAGs (including merges) can be built.
    pub fn commit_tree<C: AsRef<[u8]>>(
        &self,
        parents: &[CommitId],
        files: &[(&str, C)],
        message: &str,
    ) -> Result<CommitId> {
        let tree = self.build_tree(files)?;
        self.commit_with_tree(parents, &tree, message)
    }

    /// Like [`TestRepo::commit_tree`], plus a submodule entry at `path` pointing
    /// to `target`. The target commit need not exist in this repository.
    pub fn commit_gitlink<C: AsRef<[u8]>>(
        &self,
        parents: &[CommitId],
        files: &[(&str, C)],
        (path, target): (&str, Oid),
        message: &str,
    ) -> Result<CommitId> {
        let tree = self.build_tree(files)?;
        let tree = NestedTreeBuilder::new(&self.repo).insert_file(
            &tree,
            Path::new(path),
            target,
            FileMode::Commit,
        )?;
        self.commit_with_tree(parents, &tree, message)
    }

    fn build_tree<C: AsRef<[u8]>>(&self, files: &[(&str, C)]) -> Result<git2::Tree<'_>> {
        let builder = NestedTreeBuilder::new(&self.repo);
        let mut tree = builder.empty_tree()?;
        for (path, content) in files {
            let blob = self.repo.blob(content.as_ref())?;
            tree = builder.insert_file(&tree, Path::new(path), blob, FileMode::Blob)?;
        }
        Ok(tree)
    }

    fn commit_with_tree(
        &self,
        parents: &[CommitId],
        tree: &git2::Tree<'_>,
        message: &str,
    ) -> Result<CommitId> {
        let parents = parents
            .iter()
            .map(|id| self.repo.find_commit(id.oid()))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        let parent_refs: Vec<&git2::Commit> = parents.iter().collect();

        let sig = signature()?;
        let oid = self
            .repo
            .commit(None, &sig, &sig, message, tree, &parent_refs)?;
        Ok(CommitId::from(oid))
    }

    /// Create a commit with the same tree as its first parent.
    pub fn empty_commit(&self, parents: &[CommitId], message: &str) -> Result<CommitId> {
        let first = parents
            .first()
            .ok_or_else(|| git2::Error::from_str("empty_commit needs a parent"))?;
        let tree = self.repo.find_commit(first.oid())?.tree()?;
        let parents = parents
            .iter()
            .map(|id| self.repo.find_commit(id.oid()))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        let parent_refs: Vec<&git2::Commit> = parents.iter().collect();

        let sig = signature()?;
        let oid = self
            .repo
            .commit(None, &sig, &sig, message, &tree, &parent_refs)?;
        Ok(CommitId::from(oid))
    }

    /// Point a branch at `commit`.
    pub fn branch(&self, name: &str, commit: CommitId) -> Result<()> {
        let commit = self.repo.find_commit(commit.oid())?;
        self.repo.branch(name, &commit, true)?;
        Ok(())
    }
}

fn signature() -> Result<Signature<'static>> {
    Ok(Signature::now("Test", "test@test.com")?)
}
