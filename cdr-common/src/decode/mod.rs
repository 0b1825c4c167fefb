//! # Decoders
//!
//! One decoder per supported file format. Every decoder reads a whole file and yields its records
//! as `RawRecord`s in document order; syntax handling is left to the format's crate.
use std::path::Path;

use thiserror::Error;

use crate::gate::FileFormat;
use crate::record::RawRecord;

mod csv;
mod json;
mod xml;
mod yaml;

/// Enumeration of errors decoding a file. Any of them invalidates the whole file.
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("could not read {path}: {error}")]
    Io { path: String, error: std::io::Error },
    #[error("invalid CSV: {0}")]
    Csv(#[from] ::csv::Error),
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("invalid XML: {0}")]
    Xml(#[from] quick_xml::Error),
    #[error("unexpected document shape: {0}")]
    Shape(String),
}

/// Decode the contents of a file already known to be in `format`.
pub fn decode_str(content: &str, format: FileFormat) -> Result<Vec<RawRecord>, DecodeError> {
    match format {
        FileFormat::Csv => self::csv::decode(content),
        FileFormat::Json => json::decode(content),
        FileFormat::Xml => xml::decode(content),
        FileFormat::Yaml => yaml::decode(content),
    }
}

/// Read and decode the file at `path`.
pub fn decode_file(path: &Path, format: FileFormat) -> Result<Vec<RawRecord>, DecodeError> {
    let content = std::fs::read_to_string(path).map_err(|error| DecodeError::Io {
        path: path.display().to_string(),
        error,
    })?;

    decode_str(&content, format)
}

/// JSON and YAML documents hold either a bare list of records, or an object with the list under
/// a `records` key. A document with no content at all holds no records.
fn records_from_document(document: serde_json::Value) -> Result<Vec<RawRecord>, DecodeError> {
    let items = match document {
        serde_json::Value::Null => return Ok(Vec::new()),
        serde_json::Value::Array(items) => items,
        serde_json::Value::Object(mut object) => match object.remove("records") {
            Some(serde_json::Value::Array(items)) => items,
            Some(serde_json::Value::Null) => return Ok(Vec::new()),
            Some(_) => {
                return Err(DecodeError::Shape(
                    "`records` must be a list of records".to_owned(),
                ))
            }
            None => {
                return Err(DecodeError::Shape(
                    "expected a list of records or an object with a `records` key".to_owned(),
                ))
            }
        },
        other => {
            return Err(DecodeError::Shape(format!(
                "expected a list of records, got: {other}"
            )))
        }
    };

    items
        .iter()
        .enumerate()
        .map(|(index, item)| match item {
            serde_json::Value::Object(object) => Ok(RawRecord::from_json_object(object)),
            other => Err(DecodeError::Shape(format!(
                "record {} is not an object: {other}",
                index + 1
            ))),
        })
        .collect()
}
