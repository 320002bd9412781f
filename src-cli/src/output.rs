use comment_chain::AnchoredChain;
use critic_core::models::{ChangesetLine, ChangesetType};
use critic_core::{
    BlobId, Changeset, ChangesetChunk, ChangesetFile, ChangesetId, CommitId, Database, FileChange,
    Repository,
};
use serde::Serialize;

#[derive(Serialize)]
pub struct ChangesetView {
    pub id: ChangesetId,
    #[serde(rename = "type")]
    pub kind: ChangesetType,
    pub parent: Option<CommitId>,
    pub child: CommitId,
    pub files: Vec<FileView>,
}

#[derive(Serialize)]
pub struct FileView {
    pub path: String,
    pub status: &'static str,
    pub old_sha1: Option<BlobId>,
    pub new_sha1: Option<BlobId>,
    pub binary: bool,
    pub chunks: Vec<ChangesetChunk>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lines: Option<Vec<ChangesetLine>>,
}

impl ChangesetView {
    /// `lines`: `None` to omit them, `Some(true)` for the whole file with
    /// context.
    pub fn build(
        db: &Database,
        repo: &Repository,
        changeset: &Changeset,
        lines: Option<bool>,
    ) -> critic_core::Result<Self> {
        let files = changeset
            .files(db)?
            .iter()
            .map(|file| FileView::build(db, repo, file, lines))
            .collect::<critic_core::Result<_>>()?;
        Ok(Self {
            id: changeset.id(),
            kind: changeset.kind(),
            parent: changeset.parent().map(|c| c.id),
            child: changeset.child().id,
            files,
        })
    }
}

impl FileView {
    fn build(
        db: &Database,
        repo: &Repository,
        file: &ChangesetFile,
        lines: Option<bool>,
    ) -> critic_core::Result<Self> {
        let status = match file.change {
            FileChange::Added { .. } => "added",
            FileChange::Deleted { .. } => "deleted",
            FileChange::Modified { .. } => "modified",
        };
        let lines = match lines {
            Some(true) => file.lines_with_context(db, repo)?,
            Some(false) => file.lines(db, repo)?,
            None => None,
        };
        let mut binary = false;
        for version in [file.change.old_version(), file.change.new_version()]
            .into_iter()
            .flatten()
        {
            binary |= version.is_binary(repo)?;
        }
        Ok(Self {
            path: file.path.clone(),
            status,
            old_sha1: file.change.old_version().map(|v| v.sha1),
            new_sha1: file.change.new_version().map(|v| v.sha1),
            binary,
            chunks: file.chunks(db)?.to_vec(),
            lines,
        })
    }
}

#[derive(Serialize)]
pub struct CommitSetView {
    pub commits: Vec<CommitId>,
    pub heads: Vec<CommitId>,
    pub tails: Vec<CommitId>,
    pub upstreams: Vec<CommitId>,
}

#[derive(Serialize)]
pub struct ChainView {
    #[serde(flatten)]
    pub anchored: AnchoredChain,
    pub context: Option<String>,
    pub comments: Vec<comment_chain::Comment>,
}
