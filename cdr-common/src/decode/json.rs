use crate::record::RawRecord;

use super::{records_from_document, DecodeError};

pub(super) fn decode(content: &str) -> Result<Vec<RawRecord>, DecodeError> {
    let document: serde_json::Value = serde_json::from_str(content)?;

    records_from_document(document)
}
