use similar::{DiffTag, TextDiff};

use crate::models::Operation;

/// Split a line into word, whitespace-run and delimiter tokens. Quotes,
/// `:`, `(` and `)` stand alone so surrounding words can still match.
fn tokenize_words(s: &str) -> Vec<&str> {
    let mut tokens = Vec::new();
    let mut start = 0;
    for (i, c) in s.char_indices() {
        if matches!(c, '"' | '\'' | '`' | ':' | '(' | ')') {
            if i > start {
                tokens.push(&s[start..i]);
            }
            tokens.push(&s[i..i + 1]);
            start = i + 1;
        } else if c.is_whitespace() {
            if i > start && !s[start..i].chars().all(char::is_whitespace) {
                tokens.push(&s[start..i]);
                start = i;
            }
        } else if i > start && s.as_bytes()[i - 1].is_ascii_whitespace() {
            tokens.push(&s[start..i]);
            start = i;
        }
    }
    if start < s.len() {
        tokens.push(&s[start..]);
    }
    tokens
}

/// Byte offset of each token boundary, with the total length last.
fn boundaries(tokens: &[&str]) -> Vec<usize> {
    let mut offsets = Vec::with_capacity(tokens.len() + 1);
    let mut pos = 0;
    offsets.push(pos);
    for token in tokens {
        pos += token.len();
        offsets.push(pos);
    }
    offsets
}

/// True when the lines differ, but only in whitespace.
pub(crate) fn is_whitespace_change(old: &str, new: &str) -> bool {
    old != new
        && old
            .chars()
            .filter(|c| !c.is_whitespace())
            .eq(new.chars().filter(|c| !c.is_whitespace()))
}

/// Character-level similarity in `0.0..=1.0`.
pub(crate) fn similarity(old: &str, new: &str) -> f32 {
    if old == new {
        return 1.0;
    }
    TextDiff::from_chars(old, new).ratio()
}

/// Intra-line operations turning `old` into `new`, as byte spans.
pub(crate) fn line_operations(old: &str, new: &str) -> Vec<Operation> {
    let old_tokens = tokenize_words(old);
    let new_tokens = tokenize_words(new);
    let old_at = boundaries(&old_tokens);
    let new_at = boundaries(&new_tokens);

    let diff = TextDiff::from_slices(&old_tokens, &new_tokens);
    diff.ops()
        .iter()
        .filter_map(|op| {
            let (tag, o, n) = op.as_tag_tuple();
            match tag {
                DiffTag::Equal => None,
                DiffTag::Delete => Some(Operation::Delete {
                    start: old_at[o.start],
                    end: old_at[o.end],
                }),
                DiffTag::Insert => Some(Operation::Insert {
                    start: new_at[n.start],
                    end: new_at[n.end],
                }),
                DiffTag::Replace => Some(Operation::Replace {
                    old_start: old_at[o.start],
                    old_end: old_at[o.end],
                    new_start: new_at[n.start],
                    new_end: new_at[n.end],
                }),
            }
        })
        .collect()
}
