use serde::Serialize;

use super::analysis::{self, Pairing};
use crate::db::ChunkRow;
use crate::models::{ChangesetLine, LineType};
use crate::{Error, Result};

/// A contiguous changed region of one file.
///
/// Offsets are 0-based line numbers in the old and new file. Pairings are
/// chunk-relative.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChangesetChunk {
    pub delete_offset: usize,
    pub delete_count: usize,
    pub insert_offset: usize,
    pub insert_count: usize,
    #[serde(skip)]
    pub pairings: Vec<Pairing>,
    pub whitespace: bool,
}

impl ChangesetChunk {
    pub(crate) fn from_row(row: ChunkRow) -> Result<Self> {
        let pairings = analysis::parse(&row.analysis, row.delete_count, row.insert_count)?;
        Ok(Self {
            delete_offset: row.delete_offset,
            delete_count: row.delete_count,
            insert_offset: row.insert_offset,
            insert_count: row.insert_count,
            pairings,
            whitespace: row.whitespace,
        })
    }

    pub(crate) fn to_row(&self) -> ChunkRow {
        ChunkRow {
            delete_offset: self.delete_offset,
            delete_count: self.delete_count,
            insert_offset: self.insert_offset,
            insert_count: self.insert_count,
            analysis: self.analysis(),
            whitespace: self.whitespace,
        }
    }

    pub fn analysis(&self) -> String {
        analysis::format(&self.pairings)
    }

    pub fn delete_end(&self) -> usize {
        self.delete_offset + self.delete_count
    }

    pub fn insert_end(&self) -> usize {
        self.insert_offset + self.insert_count
    }

    /// Reconstruct the chunk's lines from the full old and new file.
    ///
    /// Between pairings, lines are consumed in lock-step as `replaced`, then
    /// the remaining old lines are `deleted` and the remaining new lines
    /// `inserted`.
    pub fn lines(&self, old: &[String], new: &[String]) -> Result<Vec<ChangesetLine>> {
        if self.delete_end() > old.len() || self.insert_end() > new.len() {
            return Err(Error::InvalidArgument(format!(
                "chunk {}+{}/{}+{} exceeds file of {}/{} lines",
                self.delete_offset,
                self.delete_count,
                self.insert_offset,
                self.insert_count,
                old.len(),
                new.len()
            )));
        }

        let mut builder = LineBuilder {
            chunk: self,
            old,
            new,
            old_pos: 0,
            new_pos: 0,
            lines: Vec::with_capacity(self.delete_count.max(self.insert_count)),
        };

        for pairing in &self.pairings {
            builder.fill(pairing.old, pairing.new);
            builder.modified(pairing);
        }
        builder.fill(self.delete_count, self.insert_count);

        Ok(builder.lines)
    }
}

struct LineBuilder<'a> {
    chunk: &'a ChangesetChunk,
    old: &'a [String],
    new: &'a [String],
    old_pos: usize,
    new_pos: usize,
    lines: Vec<ChangesetLine>,
}

impl LineBuilder<'_> {
    fn old_index(&self) -> usize {
        self.chunk.delete_offset + self.old_pos
    }

    fn new_index(&self) -> usize {
        self.chunk.insert_offset + self.new_pos
    }

    fn fill(&mut self, to_old: usize, to_new: usize) {
        while self.old_pos < to_old && self.new_pos < to_new {
            let (o, n) = (self.old_index(), self.new_index());
            self.lines.push(ChangesetLine::paired(
                LineType::Replaced,
                (o, n),
                &self.old[o],
                &self.new[n],
            ));
            self.old_pos += 1;
            self.new_pos += 1;
        }
        while self.old_pos < to_old {
            let o = self.old_index();
            self.lines.push(ChangesetLine::deleted(o, &self.old[o]));
            self.old_pos += 1;
        }
        while self.new_pos < to_new {
            let n = self.new_index();
            self.lines.push(ChangesetLine::inserted(n, &self.new[n]));
            self.new_pos += 1;
        }
    }

    fn modified(&mut self, pairing: &Pairing) {
        let (o, n) = (self.old_index(), self.new_index());
        let mut line =
            ChangesetLine::paired(LineType::Modified, (o, n), &self.old[o], &self.new[n]);
        line.operations = pairing.operations.clone();
        line.whitespace = pairing.whitespace;
        self.lines.push(line);
        self.old_pos += 1;
        self.new_pos += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Operation;
    use proptest::prelude::*;

    fn strings(lines: &[&str]) -> Vec<String> {
        lines.iter().map(|s| s.to_string()).collect()
    }

    fn chunk(d: (usize, usize), i: (usize, usize), analysis: &str) -> ChangesetChunk {
        ChangesetChunk::from_row(ChunkRow {
            delete_offset: d.0,
            delete_count: d.1,
            insert_offset: i.0,
            insert_count: i.1,
            analysis: analysis.to_string(),
            whitespace: false,
        })
        .unwrap()
    }

    #[test]
    fn pure_insertion() {
        let old = strings(&["foo", "bar"]);
        let new = strings(&["foo", "baz", "bar"]);
        let lines = chunk((1, 0), (1, 1), "").lines(&old, &new).unwrap();

        assert_eq!(lines, vec![ChangesetLine::inserted(1, "baz")]);
    }

    #[test]
    fn modified_line_carries_operations() {
        let old = strings(&["hello world"]);
        let new = strings(&["hello there"]);
        let lines = chunk((0, 1), (0, 1), "0=0:r6-11=6-11")
            .lines(&old, &new)
            .unwrap();

        assert_eq!(lines.len(), 1);
        let line = &lines[0];
        assert_eq!(line.line_type, LineType::Modified);
        assert_eq!((line.old_index, line.new_index), (Some(0), Some(0)));
        assert_eq!(line.old_text.as_deref(), Some("hello world"));
        assert_eq!(line.new_text.as_deref(), Some("hello there"));
        assert_eq!(
            line.operations,
            vec![Operation::Replace {
                old_start: 6,
                old_end: 11,
                new_start: 6,
                new_end: 11,
            }]
        );
    }

    #[test]
    fn deletions_precede_insertions_in_each_gap() {
        // old: a b c d      new: x y c' z
        // pairing c=c' at chunk-relative 2=2.
        let old = strings(&["a", "b", "c", "d"]);
        let new = strings(&["x", "c'", "z", "w"]);
        let lines = chunk((0, 4), (0, 4), "2=1").lines(&old, &new).unwrap();

        let summary: Vec<_> = lines
            .iter()
            .map(|l| (l.line_type, l.old_index, l.new_index))
            .collect();
        assert_eq!(
            summary,
            vec![
                (LineType::Replaced, Some(0), Some(0)),
                (LineType::Deleted, Some(1), None),
                (LineType::Modified, Some(2), Some(1)),
                (LineType::Replaced, Some(3), Some(2)),
                (LineType::Inserted, None, Some(3)),
            ]
        );
    }

    #[test]
    fn offsets_shift_indices() {
        let old = strings(&["ctx", "ctx", "old"]);
        let new = strings(&["ctx", "ctx", "new", "more"]);
        let lines = chunk((2, 1), (2, 2), "0=0:ws").lines(&old, &new).unwrap();

        assert_eq!(lines[0].line_type, LineType::Modified);
        assert!(lines[0].whitespace);
        assert_eq!((lines[0].old_index, lines[0].new_index), (Some(2), Some(2)));
        assert_eq!(lines[1], ChangesetLine::inserted(3, "more"));
    }

    #[test]
    fn chunk_past_end_of_file_is_rejected() {
        let old = strings(&["a"]);
        let new = strings(&["a"]);
        assert!(chunk((0, 2), (0, 1), "").lines(&old, &new).is_err());
    }

    #[test]
    fn row_round_trip_keeps_analysis() {
        let c = chunk((3, 2), (3, 2), "0=0:ws;1=1:d0-1");
        assert_eq!(c.to_row().analysis, "0=0:ws;1=1:d0-1");
    }

    fn arb_chunk() -> impl Strategy<Value = (ChangesetChunk, Vec<String>, Vec<String>)> {
        (0usize..6, 0usize..6).prop_flat_map(|(dc, ic)| {
            let max_pairs = dc.min(ic);
            (
                Just(dc),
                Just(ic),
                proptest::sample::subsequence((0..dc).collect::<Vec<_>>(), 0..=max_pairs),
                proptest::sample::subsequence((0..ic).collect::<Vec<_>>(), 0..=max_pairs),
            )
                .prop_map(|(dc, ic, olds, news)| {
                    let n = olds.len().min(news.len());
                    let pairings = olds[..n]
                        .iter()
                        .zip(&news[..n])
                        .map(|(&o, &i)| Pairing::new(o, i))
                        .collect();
                    let chunk = ChangesetChunk {
                        delete_offset: 1,
                        delete_count: dc,
                        insert_offset: 2,
                        insert_count: ic,
                        pairings,
                        whitespace: false,
                    };
                    let old = (0..dc + 2).map(|i| format!("o{i}")).collect();
                    let new = (0..ic + 3).map(|i| format!("n{i}")).collect();
                    (chunk, old, new)
                })
        })
    }

    proptest! {
        #[test]
        fn reconstruction_is_deterministic_and_ordered((chunk, old, new) in arb_chunk()) {
            let first = chunk.lines(&old, &new).unwrap();
            let second = chunk.lines(&old, &new).unwrap();
            prop_assert_eq!(&first, &second);

            // Every old and new line of the chunk appears exactly once, in order.
            let olds: Vec<_> = first.iter().filter_map(|l| l.old_index).collect();
            let news: Vec<_> = first.iter().filter_map(|l| l.new_index).collect();
            prop_assert_eq!(olds, (chunk.delete_offset..chunk.delete_end()).collect::<Vec<_>>());
            prop_assert_eq!(news, (chunk.insert_offset..chunk.insert_end()).collect::<Vec<_>>());

            // An inserted line is only ever followed by another insertion or a pair.
            for pair in first.windows(2) {
                if pair[0].line_type == LineType::Inserted {
                    prop_assert_ne!(pair[1].line_type, LineType::Deleted);
                }
            }
        }
    }
}
