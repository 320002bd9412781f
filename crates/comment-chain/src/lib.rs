mod anchor;
mod context;
mod db;
mod lifecycle;
pub(crate) mod model;
mod propagate;

pub use anchor::{AnchoredChain, fetch, find_by_commit_message, find_by_file, find_by_review};
pub use context::record_code_context;
pub use critic_types::{BlobId, ChainId, CommentId, CommitId, FileId, ReviewId, UserId};
pub use db::ChainQueries;
pub use lifecycle::{
    ChainTarget, create_chain, mark_addressed, publish, reopen, reply, resolve,
};
pub use model::{
    ChainAnchor, ChainLines, ChainOrigin, ChainState, ChainType, Comment, CommentChain,
    CommentState,
};
pub use propagate::{PropagationReport, propagate};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Comment chain not found: {0}")]
    ChainNotFound(ChainId),

    #[error("Cannot {action} chain {chain} in state {state}")]
    InvalidState {
        chain: ChainId,
        state: ChainState,
        action: &'static str,
    },

    #[error("Invalid line range {first_line}-{last_line}: {reason}")]
    InvalidRange {
        first_line: usize,
        last_line: usize,
        reason: String,
    },

    #[error(transparent)]
    Core(#[from] critic_core::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),
}

impl Error {
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::ChainNotFound(_) => true,
            Error::Core(err) => err.is_not_found(),
            _ => false,
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
