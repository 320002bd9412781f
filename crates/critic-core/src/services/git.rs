use std::path::{Path, PathBuf};

use git2::{Delta, ErrorCode, Oid, Repository};

use crate::models::{Commit, Object, ObjectKind, Signature, TreeChange, TreeEntry, VersionInfo};
use crate::{BlobId, CommitId, Error, Result};

/// Request/response interface to the content-addressed object store.
///
/// Implementations are not required to be reentrant; one store serves one
/// logical operation at a time.
pub trait ObjectStore {
    /// Read a raw object. Fails with `ObjectNotFound` for unknown hashes.
    fn fetch(&self, id: Oid) -> Result<Object>;

    /// Read and parse a commit object.
    fn read_commit(&self, id: CommitId) -> Result<Commit>;

    /// List the tree at `path` (empty for the root) in `commit`.
    fn ls_tree(&self, commit: CommitId, path: &str) -> Result<Vec<TreeEntry>>;

    /// Look up the entry for `path` in `commit`, whatever its type.
    fn lookup(&self, commit: CommitId, path: &str) -> Result<TreeEntry>;

    /// Resolve a ref or revision expression to a commit.
    fn rev_parse(&self, reference: &str) -> Result<CommitId>;

    /// Best common ancestor of two commits, if they share history.
    fn merge_base(&self, a: CommitId, b: CommitId) -> Result<Option<CommitId>>;

    /// Commits reachable from `head` but not from `base`, newest first.
    fn rev_list(&self, base: Option<CommitId>, head: CommitId) -> Result<Vec<CommitId>>;

    /// Blob-level differences between two commit trees. A missing parent
    /// means the empty tree.
    fn diff_trees(&self, parent: Option<CommitId>, child: CommitId) -> Result<Vec<TreeChange>>;

    /// Directory for auxiliary files such as locks.
    fn data_dir(&self) -> Option<PathBuf>;
}

pub fn open_repository(local_dir: &Path) -> Result<Repository> {
    Repository::open(local_dir).map_err(|err| {
        log::warn!("failed to open repository at {}: {err}", local_dir.display());
        Error::from(err)
    })
}

fn find_commit(repo: &Repository, id: CommitId) -> Result<git2::Commit<'_>> {
    repo.find_commit(id.oid()).map_err(|err| match err.code() {
        ErrorCode::NotFound => Error::CommitNotFound(id.to_string()),
        _ => Error::Git(err),
    })
}

fn blob_size(repo: &Repository, id: Oid) -> Result<usize> {
    let (size, _) = repo.odb()?.read_header(id)?;
    Ok(size)
}

fn tree_entry(repo: &Repository, entry: &git2::TreeEntry<'_>) -> Result<TreeEntry> {
    let kind = ObjectKind::from_git(entry.kind()).unwrap_or(ObjectKind::Blob);
    let size = match kind {
        ObjectKind::Blob => Some(blob_size(repo, entry.id())?),
        _ => None,
    };
    Ok(TreeEntry {
        mode: entry.filemode(),
        kind,
        id: entry.id(),
        size,
        name: String::from_utf8_lossy(entry.name_bytes()).into_owned(),
    })
}

fn version_info(file: &git2::DiffFile<'_>) -> Option<VersionInfo> {
    if file.id().is_zero() {
        return None;
    }
    Some(VersionInfo {
        sha1: BlobId::from(file.id()),
        mode: i32::from(file.mode()),
    })
}

impl ObjectStore for Repository {
    fn fetch(&self, id: Oid) -> Result<Object> {
        let odb = self.odb()?;
        let object = odb.read(id).map_err(|err| match err.code() {
            ErrorCode::NotFound => Error::ObjectNotFound(id.to_string()),
            _ => Error::Git(err),
        })?;
        let kind = ObjectKind::from_git(Some(object.kind()))
            .ok_or_else(|| Error::ObjectNotFound(id.to_string()))?;
        Ok(Object {
            kind,
            size: object.len(),
            data: object.data().to_vec(),
        })
    }

    fn read_commit(&self, id: CommitId) -> Result<Commit> {
        let commit = find_commit(self, id)?;
        Ok(Commit {
            id,
            parents: commit.parent_ids().map(CommitId::from).collect(),
            tree: commit.tree_id(),
            author: Signature::from_git(&commit.author()),
            committer: Signature::from_git(&commit.committer()),
            message: String::from_utf8_lossy(commit.message_bytes()).into_owned(),
        })
    }

    fn ls_tree(&self, commit: CommitId, path: &str) -> Result<Vec<TreeEntry>> {
        let root = find_commit(self, commit)?.tree()?;
        let tree = if path.is_empty() {
            root
        } else {
            let entry = self.lookup(commit, path)?;
            if entry.kind != ObjectKind::Tree {
                return Err(Error::NotADirectory(path.to_string()));
            }
            self.find_tree(entry.id)?
        };

        tree.iter().map(|entry| tree_entry(self, &entry)).collect()
    }

    fn lookup(&self, commit: CommitId, path: &str) -> Result<TreeEntry> {
        let tree = find_commit(self, commit)?.tree()?;
        let entry = tree.get_path(Path::new(path)).map_err(|err| match err.code() {
            ErrorCode::NotFound => Error::PathNotFound {
                commit,
                path: path.to_string(),
            },
            _ => Error::Git(err),
        })?;
        tree_entry(self, &entry)
    }

    fn rev_parse(&self, reference: &str) -> Result<CommitId> {
        let object = self
            .revparse_single(reference)
            .map_err(|_| Error::InvalidRef(reference.to_string()))?;
        let commit = object
            .peel_to_commit()
            .map_err(|_| Error::InvalidRef(reference.to_string()))?;
        Ok(CommitId::from(commit.id()))
    }

    fn merge_base(&self, a: CommitId, b: CommitId) -> Result<Option<CommitId>> {
        match Repository::merge_base(self, a.oid(), b.oid()) {
            Ok(oid) => Ok(Some(CommitId::from(oid))),
            Err(err) if err.code() == ErrorCode::NotFound => Ok(None),
            Err(err) => Err(Error::Git(err)),
        }
    }

    fn rev_list(&self, base: Option<CommitId>, head: CommitId) -> Result<Vec<CommitId>> {
        let mut revwalk = self.revwalk()?;
        revwalk.set_sorting(git2::Sort::TOPOLOGICAL | git2::Sort::TIME)?;
        revwalk.push(head.oid())?;
        if let Some(base) = base {
            revwalk.hide(base.oid())?;
        }

        revwalk
            .map(|oid| oid.map(CommitId::from).map_err(Error::from))
            .collect()
    }

    fn diff_trees(&self, parent: Option<CommitId>, child: CommitId) -> Result<Vec<TreeChange>> {
        let new_tree = find_commit(self, child)?.tree()?;
        let old_tree = match parent {
            Some(parent) => Some(find_commit(self, parent)?.tree()?),
            None => None,
        };

        let mut opts = git2::DiffOptions::new();
        opts.context_lines(0).ignore_whitespace(false);
        let diff = self.diff_tree_to_tree(old_tree.as_ref(), Some(&new_tree), Some(&mut opts))?;

        let mut changes = Vec::new();
        for delta in diff.deltas() {
            // libgit2 reports the old path on deletions in new_file too.
            let path = match delta.status() {
                Delta::Deleted => delta.old_file().path(),
                _ => delta.new_file().path(),
            };
            let Some(path) = path else { continue };
            changes.push(TreeChange {
                path: path.to_string_lossy().into_owned(),
                old: version_info(&delta.old_file()),
                new: version_info(&delta.new_file()),
            });
        }

        Ok(changes)
    }

    fn data_dir(&self) -> Option<PathBuf> {
        Some(self.path().join("info/critic"))
    }
}
