use std::str::FromStr;

use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangesetType {
    /// A commit against its single parent.
    Direct,
    /// An arbitrary parent/child pair, typically the span of a commit set.
    Custom,
    /// One parent of a merge commit against the merge.
    Merge,
    Conflicts,
}

impl ChangesetType {
    pub fn as_str(self) -> &'static str {
        match self {
            ChangesetType::Direct => "direct",
            ChangesetType::Custom => "custom",
            ChangesetType::Merge => "merge",
            ChangesetType::Conflicts => "conflicts",
        }
    }

    /// The type that shares the one-changeset-per-pair rule with this one.
    pub fn sibling(self) -> Option<ChangesetType> {
        match self {
            ChangesetType::Direct => Some(ChangesetType::Custom),
            ChangesetType::Custom => Some(ChangesetType::Direct),
            ChangesetType::Merge | ChangesetType::Conflicts => None,
        }
    }
}

impl std::fmt::Display for ChangesetType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChangesetType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "direct" => Ok(ChangesetType::Direct),
            "custom" => Ok(ChangesetType::Custom),
            "merge" => Ok(ChangesetType::Merge),
            "conflicts" => Ok(ChangesetType::Conflicts),
            other => Err(format!("unknown changeset type: {other}")),
        }
    }
}

impl FromSql for ChangesetType {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse()
            .map_err(|e: String| FromSqlError::Other(e.into()))
    }
}

impl ToSql for ChangesetType {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LineType {
    Context,
    Deleted,
    Modified,
    Replaced,
    Inserted,
}

/// Intra-line edit span. Offsets are half-open byte ranges within the line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Operation {
    Replace {
        old_start: usize,
        old_end: usize,
        new_start: usize,
        new_end: usize,
    },
    Delete {
        start: usize,
        end: usize,
    },
    Insert {
        start: usize,
        end: usize,
    },
}

/// One reconstructed diff line. Indices are 0-based line numbers in the old
/// and new file; a side is absent for pure deletions and insertions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChangesetLine {
    pub line_type: LineType,
    pub old_index: Option<usize>,
    pub new_index: Option<usize>,
    pub old_text: Option<String>,
    pub new_text: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub operations: Vec<Operation>,
    /// Set on modified lines that differ only in whitespace.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub whitespace: bool,
}

impl ChangesetLine {
    pub(crate) fn context(index: (usize, usize), text: &str) -> Self {
        Self {
            line_type: LineType::Context,
            old_index: Some(index.0),
            new_index: Some(index.1),
            old_text: Some(text.to_owned()),
            new_text: Some(text.to_owned()),
            operations: Vec::new(),
            whitespace: false,
        }
    }

    pub(crate) fn paired(
        line_type: LineType,
        index: (usize, usize),
        old_text: &str,
        new_text: &str,
    ) -> Self {
        Self {
            line_type,
            old_index: Some(index.0),
            new_index: Some(index.1),
            old_text: Some(old_text.to_owned()),
            new_text: Some(new_text.to_owned()),
            operations: Vec::new(),
            whitespace: false,
        }
    }

    pub(crate) fn deleted(index: usize, text: &str) -> Self {
        Self {
            line_type: LineType::Deleted,
            old_index: Some(index),
            new_index: None,
            old_text: Some(text.to_owned()),
            new_text: None,
            operations: Vec::new(),
            whitespace: false,
        }
    }

    pub(crate) fn inserted(index: usize, text: &str) -> Self {
        Self {
            line_type: LineType::Inserted,
            old_index: None,
            new_index: Some(index),
            old_text: None,
            new_text: Some(text.to_owned()),
            operations: Vec::new(),
            whitespace: false,
        }
    }
}
