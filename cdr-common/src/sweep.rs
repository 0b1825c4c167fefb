//! # Sweep
//!
//! A sweep walks every file of a directory once, decoding, validating and normalizing its
//! records, and hands back the valid records together with a `ValidationSummary`.
use std::path::Path;

use chrono::{DateTime, Utc};
use metrics::counter;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::decode::decode_file;
use crate::gate::{check, FileFormat};
use crate::normalize::normalize;
use crate::record::{CanonicalRecord, RawRecord, ServiceType};
use crate::validation::validate_at;

pub const DIRECTORY_NOT_FOUND: &str = "Directory not found";

/// Rejection of a single record. `record_number` counts from 1 in decode order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecordError {
    pub file_name: String,
    pub record_number: usize,
    pub reasons: Vec<String>,
}

/// A file that could not be decoded at all.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProcessingError {
    pub file_name: String,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ValidationSummary {
    pub files_processed: usize,
    pub valid_files: usize,
    pub invalid_files: usize,
    pub total_valid_records: usize,
    pub errors: Vec<RecordError>,
    pub processing_errors: Vec<ProcessingError>,
    pub error: Option<String>,
}

pub fn sweep(directory: &Path) -> (Vec<CanonicalRecord>, ValidationSummary) {
    sweep_at(directory, Utc::now())
}

/// Like `sweep`, with timestamps checked against `now` instead of the wall clock.
pub fn sweep_at(directory: &Path, now: DateTime<Utc>) -> (Vec<CanonicalRecord>, ValidationSummary) {
    let mut summary = ValidationSummary::default();
    let mut records = Vec::new();

    let entries = match std::fs::read_dir(directory) {
        Ok(entries) => entries,
        Err(e) => {
            error!("could not read {}: {}", directory.display(), e);
            summary.error = Some(DIRECTORY_NOT_FOUND.to_owned());
            return (records, summary);
        }
    };

    for entry in entries {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!("skipping unreadable entry in {}: {}", directory.display(), e);
                continue;
            }
        };

        let path = entry.path();
        if !path.is_file() || FileFormat::from_path(&path).is_none() {
            continue;
        }

        let file_name = entry.file_name().to_string_lossy().into_owned();
        summary.files_processed += 1;
        counter!("cdr_files_processed_total").increment(1);

        let decoded = check(&path)
            .map_err(|rejection| rejection.to_string())
            .and_then(|format| decode_file(&path, format).map_err(|e| e.to_string()));

        let raw_records = match decoded {
            Ok(raw_records) => raw_records,
            Err(message) => {
                warn!("failed to process {}: {}", file_name, message);
                summary.invalid_files += 1;
                summary.processing_errors.push(ProcessingError { file_name, message });
                continue;
            }
        };

        let valid_before = records.len();
        for (index, raw) in raw_records.iter().enumerate() {
            match admit(raw, &file_name, now) {
                Ok(record) => records.push(record),
                Err(reasons) => {
                    counter!("cdr_records_invalid_total").increment(1);
                    summary.errors.push(RecordError {
                        file_name: file_name.clone(),
                        record_number: index + 1,
                        reasons,
                    });
                }
            }
        }

        let valid_in_file = records.len() - valid_before;
        counter!("cdr_records_valid_total").increment(valid_in_file as u64);
        summary.total_valid_records += valid_in_file;
        if valid_in_file > 0 {
            summary.valid_files += 1;
        } else {
            summary.invalid_files += 1;
        }

        info!(
            "{}: {} of {} records valid",
            file_name,
            valid_in_file,
            raw_records.len()
        );
    }

    (records, summary)
}

/// Validate then normalize one record, returning the rejection reasons on failure.
fn admit(raw: &RawRecord, file_name: &str, now: DateTime<Utc>) -> Result<CanonicalRecord, Vec<String>> {
    if let Err(errors) = validate_at(raw, now) {
        let reasons: Vec<String> = errors.iter().map(ToString::to_string).collect();
        warn!("invalid record in {}: {}", file_name, reasons.join("; "));
        if let Some(service) = raw.field("service").and_then(|s| s.parse::<ServiceType>().ok()) {
            debug!("{}", service.guidance());
        }
        return Err(reasons);
    }

    normalize(raw, file_name).map_err(|e| {
        warn!("could not normalize record in {}: {}", file_name, e);
        vec![e.to_string()]
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::fs;
    use tempfile::TempDir;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_sweep_mixed_csv() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(
            temp_dir.path().join("cdr_mixed.csv"),
            "source,destination,starttime,service,usage\n\
             +1234567890,+9876543210,2025-05-25T14:30:00,voice,12.5\n\
             +1234567890,+9876543210,2025-05-25T14:31:00,sms,5\n\
             +1234567890,not a url,2025-05-25T14:32:00,data,100\n",
        )
        .unwrap();

        let (records, summary) = sweep_at(temp_dir.path(), now());

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].service, ServiceType::Voice);
        assert_eq!(records[0].file_name, "cdr_mixed.csv");
        assert_eq!(summary.files_processed, 1);
        assert_eq!(summary.valid_files, 1);
        assert_eq!(summary.invalid_files, 0);
        assert_eq!(summary.total_valid_records, 1);
        assert_eq!(summary.errors.len(), 2);
        assert_eq!(summary.errors[0].record_number, 2);
        assert!(summary.errors[0].reasons[0].starts_with("SMS usage must be exactly 1"));
        assert_eq!(summary.errors[1].record_number, 3);
        assert_eq!(
            summary.errors[1].reasons,
            vec!["Invalid URL format for DATA service: not a url".to_owned()]
        );
    }

    #[test]
    fn test_short_csv_row_is_a_record_error() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(
            temp_dir.path().join("short.csv"),
            "source,destination,starttime,service,usage,note\n\
             +1234567890,+9876543210,2025-05-25T14:30:00,voice,12.5,ok\n\
             +1234567890\n",
        )
        .unwrap();

        let (records, summary) = sweep_at(temp_dir.path(), now());

        assert_eq!(records.len(), 1);
        assert!(summary.processing_errors.is_empty());
        assert_eq!(summary.valid_files, 1);
        assert_eq!(summary.errors.len(), 1);
        assert_eq!(summary.errors[0].record_number, 2);
        assert_eq!(summary.errors[0].reasons.len(), 4);
    }

    #[test]
    fn test_sweep_empty_directory() {
        let temp_dir = TempDir::new().unwrap();

        let (records, summary) = sweep_at(temp_dir.path(), now());

        assert!(records.is_empty());
        assert_eq!(summary, ValidationSummary::default());
    }

    #[test]
    fn test_sweep_missing_directory() {
        let temp_dir = TempDir::new().unwrap();

        let (records, summary) = sweep_at(&temp_dir.path().join("nope"), now());

        assert!(records.is_empty());
        assert_eq!(summary.files_processed, 0);
        assert_eq!(summary.error.as_deref(), Some(DIRECTORY_NOT_FOUND));
    }

    #[test]
    fn test_sweep_records_decode_failures_and_continues() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(temp_dir.path().join("broken.json"), "[{\"source\": ").unwrap();
        fs::write(
            temp_dir.path().join("good.yml"),
            "- source: \"+15550001\"\n  destination: \"https://example.com\"\n  \
             starttime: \"2025-05-01T08:00:00Z\"\n  service: data\n  usage: 20\n",
        )
        .unwrap();

        let (records, summary) = sweep_at(temp_dir.path(), now());

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].file_name, "good.yml");
        assert_eq!(summary.files_processed, 2);
        assert_eq!(summary.valid_files, 1);
        assert_eq!(summary.invalid_files, 1);
        assert_eq!(summary.processing_errors.len(), 1);
        assert_eq!(summary.processing_errors[0].file_name, "broken.json");
    }

    #[test]
    fn test_sweep_counts_empty_and_all_invalid_files_as_invalid() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(temp_dir.path().join("empty.csv"), "").unwrap();
        fs::write(
            temp_dir.path().join("bad.xml"),
            "<records><record><source>abc</source></record></records>",
        )
        .unwrap();

        let (records, summary) = sweep_at(temp_dir.path(), now());

        assert!(records.is_empty());
        assert_eq!(summary.files_processed, 2);
        assert_eq!(summary.valid_files, 0);
        assert_eq!(summary.invalid_files, 2);
        assert_eq!(summary.processing_errors.len(), 1);
        assert!(summary.processing_errors[0].message.starts_with("File is empty"));
        assert_eq!(summary.errors.len(), 1);
        assert_eq!(summary.errors[0].reasons.len(), 4);
    }

    #[test]
    fn test_sweep_ignores_unsupported_files_and_directories() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(temp_dir.path().join("notes.txt"), "hello").unwrap();
        fs::create_dir(temp_dir.path().join("archive.csv")).unwrap();

        let (_, summary) = sweep_at(temp_dir.path(), now());

        assert_eq!(summary.files_processed, 0);
        assert!(summary.processing_errors.is_empty());
    }
}
