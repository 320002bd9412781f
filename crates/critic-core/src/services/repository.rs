use std::cell::RefCell;
use std::collections::HashMap;
use std::path::Path;
use std::rc::Rc;

use crate::models::{Commit, ObjectKind, TreeEntry};
use crate::services::git::{ObjectStore, open_repository};
use crate::{BlobId, CommitId, Error, RepositoryId, Result};

/// Commit and tree access for one repository.
///
/// Commits are cached by hash for the lifetime of this value. The cache is
/// owned here rather than shared process-wide, and since objects are
/// content-addressed an entry can be incomplete but never stale.
pub struct Repository {
    id: RepositoryId,
    store: Box<dyn ObjectStore>,
    commits: RefCell<HashMap<CommitId, Rc<Commit>>>,
}

impl Repository {
    pub fn new(id: RepositoryId, store: impl ObjectStore + 'static) -> Self {
        Self {
            id,
            store: Box::new(store),
            commits: RefCell::new(HashMap::new()),
        }
    }

    pub fn open(id: RepositoryId, local_dir: &Path) -> Result<Self> {
        Ok(Self::new(id, open_repository(local_dir)?))
    }

    pub fn id(&self) -> RepositoryId {
        self.id
    }

    pub fn store(&self) -> &dyn ObjectStore {
        self.store.as_ref()
    }

    pub fn commit(&self, id: CommitId) -> Result<Rc<Commit>> {
        if let Some(commit) = self.commits.borrow().get(&id) {
            return Ok(Rc::clone(commit));
        }

        log::debug!("commit cache miss: {id}");
        let commit = Rc::new(self.store.read_commit(id)?);
        self.commits.borrow_mut().insert(id, Rc::clone(&commit));
        Ok(commit)
    }

    pub fn resolve(&self, reference: &str) -> Result<Rc<Commit>> {
        let id = self.store.rev_parse(reference)?;
        self.commit(id)
    }

    pub fn parents(&self, commit: &Commit) -> Result<Vec<Rc<Commit>>> {
        commit.parents.iter().map(|id| self.commit(*id)).collect()
    }

    /// Look up a blob at `path`; fails with `NotAFile` for anything else.
    pub fn lookup_file(&self, commit: CommitId, path: &str) -> Result<TreeEntry> {
        let entry = self.store.lookup(commit, path)?;
        if entry.kind != ObjectKind::Blob {
            return Err(Error::NotAFile(path.to_string()));
        }
        Ok(entry)
    }

    pub fn list_directory(&self, commit: CommitId, path: &str) -> Result<Vec<TreeEntry>> {
        self.store.ls_tree(commit, path)
    }

    pub fn blob(&self, id: BlobId) -> Result<Vec<u8>> {
        let object = self.store.fetch(id.oid())?;
        if object.kind != ObjectKind::Blob {
            return Err(Error::NotAFile(id.to_string()));
        }
        Ok(object.data)
    }

    pub fn is_ancestor(&self, ancestor: CommitId, descendant: CommitId) -> Result<bool> {
        if ancestor == descendant {
            return Ok(true);
        }
        Ok(self.store.merge_base(ancestor, descendant)? == Some(ancestor))
    }

    /// Commits in `base..head`, newest first.
    pub fn commits_in_range(
        &self,
        base: Option<CommitId>,
        head: CommitId,
    ) -> Result<Vec<Rc<Commit>>> {
        self.store
            .rev_list(base, head)?
            .into_iter()
            .map(|id| self.commit(id))
            .collect()
    }
}
