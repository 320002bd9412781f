use critic_core::Database;

use crate::db::ChainQueries;
use crate::{BlobId, Result};

/// Record that lines `first_line..=last_line` of `sha1` belong to the code
/// structure described by `context`, e.g. a function signature.
pub fn record_code_context(
    db: &Database,
    sha1: BlobId,
    context: &str,
    first_line: usize,
    last_line: usize,
) -> Result<()> {
    ChainQueries::new(db.conn()).insert_code_context(sha1, context, first_line, last_line)
}

pub(crate) fn minimize(context: &str) -> String {
    match context.find('(') {
        Some(pos) => format!("{}(...)", &context[..pos]),
        None => context.to_string(),
    }
}
