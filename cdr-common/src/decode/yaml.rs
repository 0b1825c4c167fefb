use crate::record::RawRecord;

use super::{records_from_document, DecodeError};

pub(super) fn decode(content: &str) -> Result<Vec<RawRecord>, DecodeError> {
    if content.trim().is_empty() {
        return Ok(Vec::new());
    }

    let document: serde_json::Value = serde_yaml::from_str(content)?;

    records_from_document(document)
}
