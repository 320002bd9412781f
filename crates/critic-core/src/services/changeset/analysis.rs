//! Compact chunk analysis encoding.
//!
//! An analysis is a `;`-separated list of records `old=new[:ops]`, each
//! naming one deleted and one inserted line of the chunk (chunk-relative,
//! 0-based) that form a modified pair. `ops` is a `,`-separated list of
//! `r<a>-<b>=<c>-<d>`, `d<a>-<b>`, `i<a>-<b>` spans (half-open byte ranges)
//! or the single token `ws` for a whitespace-only change.

use std::fmt::Write;

use crate::models::Operation;
use crate::{Error, Result};

/// One modified line pair within a chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pairing {
    pub old: usize,
    pub new: usize,
    pub whitespace: bool,
    pub operations: Vec<Operation>,
}

impl Pairing {
    pub fn new(old: usize, new: usize) -> Self {
        Self {
            old,
            new,
            whitespace: false,
            operations: Vec::new(),
        }
    }
}

fn invalid(analysis: &str, reason: impl Into<String>) -> Error {
    Error::InvalidAnalysis {
        analysis: analysis.to_string(),
        reason: reason.into(),
    }
}

fn parse_index(analysis: &str, s: &str) -> Result<usize> {
    s.parse()
        .map_err(|_| invalid(analysis, format!("bad index {s:?}")))
}

fn parse_span(analysis: &str, s: &str) -> Result<(usize, usize)> {
    let (start, end) = s
        .split_once('-')
        .ok_or_else(|| invalid(analysis, format!("bad span {s:?}")))?;
    let start = parse_index(analysis, start)?;
    let end = parse_index(analysis, end)?;
    if start > end {
        return Err(invalid(analysis, format!("reversed span {s:?}")));
    }
    Ok((start, end))
}

fn parse_operation(analysis: &str, token: &str) -> Result<Operation> {
    let mut chars = token.chars();
    let code = chars.next();
    let rest = chars.as_str();
    match code {
        Some('r') => {
            let (old, new) = rest
                .split_once('=')
                .ok_or_else(|| invalid(analysis, format!("bad replace {token:?}")))?;
            let (old_start, old_end) = parse_span(analysis, old)?;
            let (new_start, new_end) = parse_span(analysis, new)?;
            Ok(Operation::Replace {
                old_start,
                old_end,
                new_start,
                new_end,
            })
        }
        Some('d') => {
            let (start, end) = parse_span(analysis, rest)?;
            Ok(Operation::Delete { start, end })
        }
        Some('i') => {
            let (start, end) = parse_span(analysis, rest)?;
            Ok(Operation::Insert { start, end })
        }
        _ => Err(invalid(analysis, format!("unknown operation {token:?}"))),
    }
}

fn parse_record(analysis: &str, record: &str) -> Result<Pairing> {
    let (indices, ops) = match record.split_once(':') {
        Some((indices, ops)) => (indices, Some(ops)),
        None => (record, None),
    };
    let (old, new) = indices
        .split_once('=')
        .ok_or_else(|| invalid(analysis, format!("bad record {record:?}")))?;

    let mut pairing = Pairing::new(parse_index(analysis, old)?, parse_index(analysis, new)?);
    for token in ops.into_iter().flat_map(|ops| ops.split(',')) {
        if token == "ws" {
            pairing.whitespace = true;
        } else {
            pairing.operations.push(parse_operation(analysis, token)?);
        }
    }
    Ok(pairing)
}

/// Parse and validate an analysis string against a chunk's line counts.
pub fn parse(analysis: &str, delete_count: usize, insert_count: usize) -> Result<Vec<Pairing>> {
    let mut pairings: Vec<Pairing> = Vec::new();

    for record in analysis.split(';').filter(|r| !r.is_empty()) {
        let pairing = parse_record(analysis, record)?;

        if pairing.old >= delete_count || pairing.new >= insert_count {
            return Err(invalid(
                analysis,
                format!(
                    "pair {}={} outside chunk of {delete_count}/{insert_count} lines",
                    pairing.old, pairing.new
                ),
            ));
        }
        let ordered = pairings
            .last()
            .is_none_or(|last| pairing.old > last.old && pairing.new > last.new);
        if !ordered {
            return Err(invalid(
                analysis,
                format!("pair {}={} out of order", pairing.old, pairing.new),
            ));
        }

        pairings.push(pairing);
    }

    Ok(pairings)
}

/// Encode pairings; the inverse of [`parse`].
pub fn format(pairings: &[Pairing]) -> String {
    let mut out = String::new();
    for (i, pairing) in pairings.iter().enumerate() {
        if i > 0 {
            out.push(';');
        }
        let _ = write!(out, "{}={}", pairing.old, pairing.new);

        let mut tokens = Vec::new();
        if pairing.whitespace {
            tokens.push("ws".to_string());
        }
        for op in &pairing.operations {
            tokens.push(match *op {
                Operation::Replace {
                    old_start,
                    old_end,
                    new_start,
                    new_end,
                } => format!("r{old_start}-{old_end}={new_start}-{new_end}"),
                Operation::Delete { start, end } => format!("d{start}-{end}"),
                Operation::Insert { start, end } => format!("i{start}-{end}"),
            });
        }
        if !tokens.is_empty() {
            out.push(':');
            out.push_str(&tokens.join(","));
        }
    }
    out
}
