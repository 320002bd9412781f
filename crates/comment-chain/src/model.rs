use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::{BlobId, ChainId, CommentId, CommitId, Error, FileId, Result, ReviewId, UserId};

/// A lowercase text enum stored as-is in the database.
macro_rules! text_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
        #[serde(rename_all = "lowercase")]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub fn as_str(self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $name {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($name::$variant),)+
                    other => Err(format!("unknown {}: {other}", stringify!($name))),
                }
            }
        }

        impl rusqlite::types::FromSql for $name {
            fn column_result(
                value: rusqlite::types::ValueRef<'_>,
            ) -> rusqlite::types::FromSqlResult<Self> {
                value
                    .as_str()?
                    .parse()
                    .map_err(|e: String| rusqlite::types::FromSqlError::Other(e.into()))
            }
        }

        impl rusqlite::types::ToSql for $name {
            fn to_sql(&self) -> rusqlite::Result<rusqlite::types::ToSqlOutput<'_>> {
                Ok(rusqlite::types::ToSqlOutput::from(self.as_str()))
            }
        }
    };
}

text_enum!(ChainType {
    Issue => "issue",
    Note => "note",
});

text_enum!(
    /// Drafts are visible only to their author and never returned by lookups.
    ChainState {
        Draft => "draft",
        Open => "open",
        Resolved => "resolved",
        Addressed => "addressed",
    }
);

text_enum!(
    /// Which side of the diff the chain was created on.
    ChainOrigin {
        Old => "old",
        New => "new",
    }
);

text_enum!(CommentState {
    Draft => "draft",
    Current => "current",
});

/// What a chain is attached to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ChainAnchor {
    File { file: FileId, path: String },
    /// The commit message of `commit`.
    Commit { commit: CommitId },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommentChain {
    pub id: ChainId,
    pub review: ReviewId,
    pub user: UserId,
    pub kind: ChainType,
    pub state: ChainState,
    pub origin: Option<ChainOrigin>,
    pub anchor: ChainAnchor,
    pub first_commit: CommitId,
    pub last_commit: CommitId,
    pub closed_by: Option<UserId>,
    pub addressed_by: Option<CommitId>,
}

impl CommentChain {
    pub fn path(&self) -> Option<&str> {
        match &self.anchor {
            ChainAnchor::File { path, .. } => Some(path),
            ChainAnchor::Commit { .. } => None,
        }
    }
}

pub(crate) fn check_shape(first_line: usize, last_line: usize) -> Result<()> {
    let reason = if first_line == 0 {
        "lines are 1-based"
    } else if first_line > last_line {
        "range is reversed"
    } else {
        return Ok(());
    };
    Err(Error::InvalidRange {
        first_line,
        last_line,
        reason: reason.to_string(),
    })
}

/// A chain's line range within one content version.
///
/// Lines are 1-based and inclusive. For commit-message chains the hash is
/// the commit's own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ChainLines {
    pub sha1: BlobId,
    pub first_line: usize,
    pub last_line: usize,
}

impl ChainLines {
    /// 0-based index of the first line.
    pub fn line_index(&self) -> usize {
        self.first_line.saturating_sub(1)
    }

    pub fn line_count(&self) -> usize {
        (self.last_line + 1).saturating_sub(self.first_line)
    }

    /// Rejects ranges that are not 1-based or are reversed.
    pub(crate) fn check(&self) -> Result<()> {
        check_shape(self.first_line, self.last_line)
    }

    pub(crate) fn shifted(&self, sha1: BlobId, delta: isize) -> Self {
        Self {
            sha1,
            first_line: self.first_line.saturating_add_signed(delta),
            last_line: self.last_line.saturating_add_signed(delta),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Comment {
    pub id: CommentId,
    pub chain: ChainId,
    pub user: UserId,
    pub time: DateTime<Utc>,
    pub state: CommentState,
    pub text: String,
}
