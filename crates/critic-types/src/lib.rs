mod object_id;
mod row_id;

pub use object_id::{BlobId, CommitId};
pub use row_id::{ChainId, ChangesetId, CommentId, FileId, RepositoryId, ReviewId, UserId};
