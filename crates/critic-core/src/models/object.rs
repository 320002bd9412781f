use git2::Oid;

use crate::BlobId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectKind {
    Commit,
    Tree,
    Blob,
    Tag,
}

impl ObjectKind {
    pub(crate) fn from_git(kind: Option<git2::ObjectType>) -> Option<Self> {
        match kind? {
            git2::ObjectType::Commit => Some(Self::Commit),
            git2::ObjectType::Tree => Some(Self::Tree),
            git2::ObjectType::Blob => Some(Self::Blob),
            git2::ObjectType::Tag => Some(Self::Tag),
            _ => None,
        }
    }
}

/// Raw object as returned by the object store.
#[derive(Debug, Clone)]
pub struct Object {
    pub kind: ObjectKind,
    pub size: usize,
    pub data: Vec<u8>,
}

/// One entry of a tree listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeEntry {
    pub mode: i32,
    pub kind: ObjectKind,
    pub id: Oid,
    /// Only known for blobs.
    pub size: Option<usize>,
    pub name: String,
}

impl TreeEntry {
    pub fn blob_id(&self) -> Option<BlobId> {
        (self.kind == ObjectKind::Blob).then(|| BlobId::from(self.id))
    }
}

/// Tree entry mode of a submodule. The entry names a commit in another
/// repository, not a blob in this one.
pub const GITLINK_MODE: i32 = 0o160000;

/// One side of a changed path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VersionInfo {
    pub sha1: BlobId,
    pub mode: i32,
}

impl VersionInfo {
    pub fn is_gitlink(&self) -> bool {
        self.mode == GITLINK_MODE
    }
}

/// A path whose blob differs between two trees. A missing side means the
/// path does not exist in that tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeChange {
    pub path: String,
    pub old: Option<VersionInfo>,
    pub new: Option<VersionInfo>,
}
