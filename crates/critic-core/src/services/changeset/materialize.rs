use std::collections::HashSet;

use similar::{DiffTag, TextDiff};

use super::analysis::Pairing;
use super::chunk::ChangesetChunk;
use super::lock::MaterializeLock;
use super::{text, word_diff};
use crate::db::{self, ChangesetQueries};
use crate::models::{ChangesetType, TreeChange, VersionInfo};
use crate::services::repository::Repository;
use crate::{BlobId, ChangesetId, CommitId, Database, Error, Result};

/// Computes and persists a changeset that is not cached yet.
pub trait Materializer {
    fn materialize(
        &self,
        db: &Database,
        repo: &Repository,
        kind: ChangesetType,
        parent: Option<CommitId>,
        child: CommitId,
    ) -> Result<ChangesetId>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct MaterializeOptions {
    /// Minimum character similarity for a deleted and an inserted line to
    /// be stored as a modified pair.
    pub pair_threshold: f32,
    /// Chunks with more deleted x inserted lines than this are not paired.
    pub pairing_limit: usize,
    /// Flag chunks consisting only of whitespace changes.
    pub whitespace_chunks: bool,
}

impl Default for MaterializeOptions {
    fn default() -> Self {
        Self {
            pair_threshold: 0.5,
            pairing_limit: 10_000,
            whitespace_chunks: true,
        }
    }
}

/// Diffs in-process with git2 and similar. Chunks carry no context lines.
#[derive(Debug, Clone, Default)]
pub struct LocalMaterializer {
    options: MaterializeOptions,
}

impl LocalMaterializer {
    pub fn new(options: MaterializeOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &MaterializeOptions {
        &self.options
    }

    /// Changed paths, restricted for merges to those that differ from every
    /// parent.
    fn changes(
        &self,
        repo: &Repository,
        kind: ChangesetType,
        parent: Option<CommitId>,
        child: CommitId,
    ) -> Result<Vec<TreeChange>> {
        let mut changes = repo.store().diff_trees(parent, child)?;
        if kind != ChangesetType::Merge {
            return Ok(changes);
        }

        let parent = parent.ok_or_else(|| {
            Error::InvalidArgument(format!("merge changeset for {child} needs a parent"))
        })?;
        let merge = repo.commit(child)?;
        if !merge.is_merge() {
            return Err(Error::NotAMergeCommit(child));
        }
        for other in merge.parents.iter().filter(|p| **p != parent) {
            let touched: HashSet<String> = repo
                .store()
                .diff_trees(Some(*other), child)?
                .into_iter()
                .map(|c| c.path)
                .collect();
            changes.retain(|c| touched.contains(&c.path));
        }
        Ok(changes)
    }

    fn side_lines(repo: &Repository, side: Option<VersionInfo>) -> Result<Option<Vec<String>>> {
        match side {
            Some(version) if version.is_gitlink() => Ok(None),
            Some(version) => Ok(text::blob_lines(&repo.blob(version.sha1)?)),
            None => Ok(Some(Vec::new())),
        }
    }

    fn chunks(&self, repo: &Repository, change: &TreeChange) -> Result<Vec<ChangesetChunk>> {
        let old = Self::side_lines(repo, change.old)?;
        let new = Self::side_lines(repo, change.new)?;
        match (old, new) {
            (Some(old), Some(new)) => Ok(diff_lines(&old, &new, &self.options)),
            _ => {
                log::debug!("{} has no line content, storing without chunks", change.path);
                Ok(Vec::new())
            }
        }
    }
}

impl Materializer for LocalMaterializer {
    fn materialize(
        &self,
        db: &Database,
        repo: &Repository,
        kind: ChangesetType,
        parent: Option<CommitId>,
        child: CommitId,
    ) -> Result<ChangesetId> {
        if let Some(row) = db.changesets().find(repo.id(), kind, parent, child)? {
            return Ok(row.id);
        }
        db.changesets().check_type(repo.id(), kind, parent, child)?;

        let _lock = repo
            .store()
            .data_dir()
            .map(|dir| MaterializeLock::new(&dir, kind, parent, child))
            .transpose()?;

        if let Some(row) = db.changesets().find(repo.id(), kind, parent, child)? {
            return Ok(row.id);
        }
        db.changesets().check_type(repo.id(), kind, parent, child)?;

        log::info!(
            "materializing {kind} changeset {}..{child}",
            parent.map_or_else(|| "root".to_string(), |p| p.to_string())
        );

        let mut files = Vec::new();
        for change in self.changes(repo, kind, parent, child)? {
            let chunks = self.chunks(repo, &change)?;
            files.push((change, chunks));
        }

        let tx = db.conn().unchecked_transaction()?;
        let queries = ChangesetQueries::new(&tx);
        let id = queries.insert_changeset(repo.id(), kind, parent, child)?;
        for (change, chunks) in &files {
            let file = db::intern_file(&tx, &change.path)?;
            let side = |v: Option<VersionInfo>| match v {
                Some(v) => (v.sha1, Some(v.mode)),
                None => (BlobId::null(), None),
            };
            queries.insert_file_version(id, file, side(change.old), side(change.new))?;
            for chunk in chunks {
                queries.insert_chunk(id, file, &chunk.to_row())?;
            }
        }
        tx.commit()?;

        log::info!("materialized changeset {id} with {} files", files.len());
        Ok(id)
    }
}

/// Line chunks between two files, with modified lines paired.
pub(crate) fn diff_lines(
    old: &[String],
    new: &[String],
    options: &MaterializeOptions,
) -> Vec<ChangesetChunk> {
    let old_refs: Vec<&str> = old.iter().map(String::as_str).collect();
    let new_refs: Vec<&str> = new.iter().map(String::as_str).collect();
    let diff = TextDiff::from_slices(&old_refs, &new_refs);

    let mut chunks = Vec::new();
    let mut current: Option<(usize, usize, usize, usize)> = None;

    for op in diff.ops() {
        let (tag, o, n) = op.as_tag_tuple();
        if tag == DiffTag::Equal {
            if let Some(region) = current.take() {
                chunks.push(region);
            }
            continue;
        }
        let region = current.get_or_insert((o.start, o.start, n.start, n.start));
        region.1 = o.end;
        region.3 = n.end;
    }
    chunks.extend(current);

    chunks
        .into_iter()
        .map(|(old_start, old_end, new_start, new_end)| {
            build_chunk(
                &old[old_start..old_end],
                &new[new_start..new_end],
                (old_start, new_start),
                options,
            )
        })
        .collect()
}

fn build_chunk(
    deleted: &[String],
    inserted: &[String],
    offsets: (usize, usize),
    options: &MaterializeOptions,
) -> ChangesetChunk {
    let pairings = if deleted.len() * inserted.len() <= options.pairing_limit {
        pair_lines(deleted, inserted, options.pair_threshold)
    } else {
        Vec::new()
    };

    let whitespace = options.whitespace_chunks
        && !deleted.is_empty()
        && deleted.len() == inserted.len()
        && pairings.len() == deleted.len()
        && pairings.iter().all(|p| p.whitespace);

    ChangesetChunk {
        delete_offset: offsets.0,
        delete_count: deleted.len(),
        insert_offset: offsets.1,
        insert_count: inserted.len(),
        pairings,
        whitespace,
    }
}

/// Greedy monotonic pairing: each deleted line takes the most similar
/// remaining inserted line at or above `threshold`.
fn pair_lines(deleted: &[String], inserted: &[String], threshold: f32) -> Vec<Pairing> {
    let mut pairings = Vec::new();
    let mut next = 0;

    for (i, old) in deleted.iter().enumerate() {
        let mut best: Option<(usize, f32)> = None;
        for (j, new) in inserted.iter().enumerate().skip(next) {
            let score = if word_diff::is_whitespace_change(old, new) {
                1.0
            } else {
                word_diff::similarity(old, new)
            };
            if score >= threshold && best.is_none_or(|(_, s)| score > s) {
                best = Some((j, score));
            }
        }

        let Some((j, _)) = best else { continue };
        let new = &inserted[j];
        let mut pairing = Pairing::new(i, j);
        if word_diff::is_whitespace_change(old, new) {
            pairing.whitespace = true;
        } else {
            pairing.operations = word_diff::line_operations(old, new);
        }
        pairings.push(pairing);
        next = j + 1;
    }

    pairings
}
