//! Bulk submission of many articles at once.
//!
//! Every entry goes through the pending area like a single submission would,
//! so an import never races a compaction over the canonical object.

use serde_json::Value;
use tracing::{info, warn};

use crate::article::Article;
use crate::codec::decode_json;
use crate::error::{CodecError, Result};
use crate::pending::PendingArea;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportReport {
    /// Keys written, in input order
    pub staged: Vec<String>,
    /// Input positions that failed validation
    pub rejected: Vec<usize>,
}

/// Parse an import document: a JSON array of article mappings or a single
/// mapping, optionally gzip-compressed.
pub fn parse_batch(body: &[u8]) -> Result<Vec<Value>, CodecError> {
    match decode_json::<Value>(body)? {
        Value::Array(values) => Ok(values),
        single => Ok(vec![single]),
    }
}

/// Validate and stage each value. Invalid entries are logged and reported;
/// a store failure stops the import.
pub async fn stage_batch(pending: &PendingArea, values: Vec<Value>) -> Result<ImportReport> {
    let mut report = ImportReport::default();
    let total = values.len();

    for (index, value) in values.into_iter().enumerate() {
        let article = match Article::from_value(value) {
            Ok(article) => article,
            Err(e) => {
                warn!(index, "Rejecting import entry: {e}");
                report.rejected.push(index);
                continue;
            }
        };

        report.staged.push(pending.stage(&article).await?);
    }

    info!(
        total,
        staged = report.staged.len(),
        rejected = report.rejected.len(),
        "Parsed {} articles",
        report.staged.len()
    );

    Ok(report)
}
