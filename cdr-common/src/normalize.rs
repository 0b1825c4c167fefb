use thiserror::Error;

use crate::record::{CanonicalRecord, RawRecord, ServiceType};
use crate::validation::{parse_starttime, parse_usage};

/// Enumeration of errors turning a `RawRecord` into a `CanonicalRecord`.
/// Only reachable for records that were not (or not fully) validated first.
#[derive(Error, Debug, PartialEq)]
pub enum TransformError {
    #[error("missing required field: {0}")]
    MissingField(&'static str),
    #[error("{0} is not a valid service type")]
    InvalidService(String),
    #[error("could not parse starttime: {0}")]
    InvalidStartTime(String),
    #[error("could not parse usage: {0}")]
    InvalidUsage(String),
}

fn required<'a>(record: &'a RawRecord, name: &'static str) -> Result<&'a str, TransformError> {
    record.field(name).ok_or(TransformError::MissingField(name))
}

/// Convert a validated `RawRecord` read from `file_name` into its canonical form.
pub fn normalize(record: &RawRecord, file_name: &str) -> Result<CanonicalRecord, TransformError> {
    let source = required(record, "source")?;
    let destination = required(record, "destination")?;
    let raw_starttime = required(record, "starttime")?;
    let raw_service = required(record, "service")?;
    let raw_usage = required(record, "usage")?;

    let starttime = parse_starttime(raw_starttime)
        .ok_or_else(|| TransformError::InvalidStartTime(raw_starttime.to_owned()))?;
    let service = raw_service
        .parse::<ServiceType>()
        .map_err(|_| TransformError::InvalidService(raw_service.to_owned()))?;
    let usage =
        parse_usage(raw_usage).ok_or_else(|| TransformError::InvalidUsage(raw_usage.to_owned()))?;

    Ok(CanonicalRecord {
        file_name: file_name.to_owned(),
        source: source.to_owned(),
        destination: destination.to_owned(),
        starttime,
        service,
        usage,
    })
}
