use std::path::{Path, PathBuf};

use git2::{FileMode, Oid, Repository, Tree};

use crate::Result;

/// Inserts blobs at nested paths. git2's TreeBuilder only accepts single path
/// components, so subtrees are rebuilt bottom-up.
pub(crate) struct NestedTreeBuilder<'repo> {
    repo: &'repo Repository,
}

impl<'repo> NestedTreeBuilder<'repo> {
    pub(crate) fn new(repo: &'repo Repository) -> Self {
        Self { repo }
    }

    pub(crate) fn empty_tree(&self) -> Result<Tree<'repo>> {
        let oid = self.repo.treebuilder(None)?.write()?;
        Ok(self.repo.find_tree(oid)?)
    }

    pub(crate) fn insert_file(
        &self,
        root: &Tree<'repo>,
        file_path: &Path,
        blob: Oid,
        mode: FileMode,
    ) -> Result<Tree<'repo>> {
        let mut components: Vec<PathBuf> = file_path
            .components()
            .map(|c| PathBuf::from(c.as_os_str()))
            .collect();
        let Some(filename) = components.pop() else {
            return Err(git2::Error::from_str("empty path").into());
        };
        let oid = self.upsert(root, &components, &filename, blob, mode)?;
        Ok(self.repo.find_tree(oid)?)
    }

    fn upsert(
        &self,
        tree: &Tree<'repo>,
        components: &[PathBuf],
        filename: &Path,
        blob: Oid,
        mode: FileMode,
    ) -> Result<Oid> {
        let mut builder = self.repo.treebuilder(Some(tree))?;

        match components.split_first() {
            None => {
                builder.insert(filename, blob, mode.into())?;
            }
            Some((component, rest)) => {
                let subtree = match tree.get_path(component) {
                    Ok(entry) => self.repo.find_tree(entry.id())?,
                    Err(e) if e.code() == git2::ErrorCode::NotFound => self.empty_tree()?,
                    Err(e) => return Err(e.into()),
                };
                let subtree_oid = self.upsert(&subtree, rest, filename, blob, mode)?;
                builder.insert(component, subtree_oid, FileMode::Tree.into())?;
            }
        }

        Ok(builder.write()?)
    }
}
