use crate::record::RawRecord;

use super::DecodeError;

/// The first row names the columns. Unknown columns are ignored; missing ones, empty cells and
/// the cells a short row never reaches leave the field unset.
pub(super) fn decode(content: &str) -> Result<Vec<RawRecord>, DecodeError> {
    let mut reader = ::csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(::csv::Trim::Headers)
        .from_reader(content.as_bytes());

    let headers = reader.headers()?.clone();

    let mut records = Vec::new();
    for row in reader.records() {
        let row = row?;
        let mut record = RawRecord::default();
        for (name, value) in headers.iter().zip(row.iter()) {
            if !value.is_empty() {
                record.set_field(name, Some(value.to_owned()));
            }
        }
        records.push(record);
    }

    Ok(records)
}
