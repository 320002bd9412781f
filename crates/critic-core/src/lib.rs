pub mod db;
pub mod models;
pub mod services;

pub use critic_types::{
    BlobId, ChainId, ChangesetId, CommentId, CommitId, FileId, RepositoryId, ReviewId, UserId,
};
pub use db::Database;
pub use services::changeset::{
    Changeset, ChangesetChunk, ChangesetFile, FileChange, FileVersion, LocalMaterializer,
    MaterializeOptions, Materializer, MergeChangeset,
};
pub use services::commit_set::CommitSet;
pub use services::git::ObjectStore;
pub use services::repository::Repository;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Commit not found: {0}")]
    CommitNotFound(String),

    #[error("Object not found: {0}")]
    ObjectNotFound(String),

    #[error("Path not found: {path} in {commit}")]
    PathNotFound { commit: CommitId, path: String },

    #[error("Invalid changeset id: {0}")]
    InvalidChangesetId(ChangesetId),

    #[error("Invalid ref: {0}")]
    InvalidRef(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Not a file: {0}")]
    NotAFile(String),

    #[error("Not a directory: {0}")]
    NotADirectory(String),

    #[error("Invalid chunk analysis {analysis:?}: {reason}")]
    InvalidAnalysis { analysis: String, reason: String },

    #[error("Expected a single head, found {0}")]
    MultipleHeads(usize),

    #[error("Expected a single upstream, found {0}")]
    MultipleUpstreams(usize),

    #[error("Not a merge commit: {0}")]
    NotAMergeCommit(CommitId),

    #[error("Changeset {id} has type {actual}, expected {expected}")]
    ChangesetTypeMismatch {
        id: ChangesetId,
        expected: String,
        actual: String,
    },

    #[error("Changeset not cached: {parent:?}..{child}")]
    NotCached {
        parent: Option<CommitId>,
        child: CommitId,
    },

    #[error("Git error: {0}")]
    Git(#[from] git2::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Error::CommitNotFound(_)
                | Error::ObjectNotFound(_)
                | Error::PathNotFound { .. }
                | Error::InvalidChangesetId(_)
        )
    }

    pub fn is_not_cached(&self) -> bool {
        matches!(self, Error::NotCached { .. })
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
