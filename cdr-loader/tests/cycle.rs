use std::fs;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{Duration, Utc};
use tempfile::TempDir;

use cdr_common::record::{CanonicalRecord, ServiceType};
use cdr_common::sink::{PublishError, RecordSink};
use cdr_common::store::{CdrStore, MemoryStore};
use cdr_loader::cycle::Loader;

#[derive(Default)]
struct RecordingSink {
    published: Mutex<Vec<CanonicalRecord>>,
    fail: bool,
}

impl RecordingSink {
    fn published(&self) -> Vec<CanonicalRecord> {
        self.published.lock().unwrap().clone()
    }
}

#[async_trait]
impl RecordSink for RecordingSink {
    async fn publish(&self, records: &[CanonicalRecord]) -> Result<(), PublishError> {
        if self.fail {
            return Err(PublishError::Delivery {
                failed: records.len(),
                total: records.len(),
                message: "broker unavailable".to_owned(),
            });
        }
        self.published.lock().unwrap().extend_from_slice(records);
        Ok(())
    }
}

fn recent() -> String {
    (Utc::now() - Duration::days(2))
        .format("%Y-%m-%dT%H:%M:%S")
        .to_string()
}

fn write_voice_csv(dir: &TempDir, name: &str, source: &str) {
    fs::write(
        dir.path().join(name),
        format!(
            "source,destination,starttime,service,usage\n{},+9876543210,{},voice,12.5\n",
            source,
            recent()
        ),
    )
    .unwrap();
}

#[tokio::test]
async fn cycle_persists_and_publishes_new_files_once() {
    let dir = TempDir::new().unwrap();
    write_voice_csv(&dir, "cdr_1.csv", "+1234567890");
    fs::write(
        dir.path().join("cdr_2.json"),
        format!(
            r#"{{"records": [{{"source": "+15550001", "destination": "https://example.com/data",
                "starttime": "{}Z", "service": "DATA", "usage": 250}}]}}"#,
            recent()
        ),
    )
    .unwrap();

    let store = MemoryStore::new();
    let sink = Arc::new(RecordingSink::default());
    let loader = Loader::new(dir.path().to_owned(), Arc::new(store.clone()), sink.clone());

    let first = loader.run_cycle().await;

    assert_eq!(first.summary.files_processed, 2);
    assert_eq!(first.summary.total_valid_records, 2);
    assert_eq!(first.published, 2);
    assert_eq!(store.records().len(), 2);
    let published = sink.published();
    assert_eq!(published.len(), 2);
    assert!(published
        .iter()
        .any(|record| record.service == ServiceType::Data && record.usage == 250.0));

    let second = loader.run_cycle().await;

    let outcome = second.persist.expect("records were found, so persist should run");
    assert!(outcome.persisted.is_empty());
    assert_eq!(outcome.skipped.len(), 2);
    assert_eq!(second.published, 0);
    assert_eq!(sink.published().len(), 2);
    assert_eq!(store.records().len(), 2);
}

#[tokio::test]
async fn cycle_publishes_only_newly_persisted_files() {
    let dir = TempDir::new().unwrap();
    write_voice_csv(&dir, "cdr_1.csv", "+1234567890");

    let store = MemoryStore::new();
    let sink = Arc::new(RecordingSink::default());
    let loader = Loader::new(dir.path().to_owned(), Arc::new(store.clone()), sink.clone());
    loader.run_cycle().await;

    write_voice_csv(&dir, "cdr_2.csv", "+1234567899");
    let report = loader.run_cycle().await;

    assert_eq!(report.published, 1);
    let published = sink.published();
    assert_eq!(published.len(), 2);
    assert_eq!(published[1].file_name, "cdr_2.csv");
    assert_eq!(published[1].source, "+1234567899");
    assert!(store.is_processed("cdr_2.csv").await.unwrap());
}

#[tokio::test]
async fn cycle_without_records_does_nothing() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("empty.yaml"), "").unwrap();

    let store = MemoryStore::new();
    let sink = Arc::new(RecordingSink::default());
    let loader = Loader::new(dir.path().to_owned(), Arc::new(store.clone()), sink.clone());

    let report = loader.run_cycle().await;

    assert!(report.persist.is_none());
    assert_eq!(report.summary.invalid_files, 1);
    assert!(sink.published().is_empty());
    assert!(store.processed_files().is_empty());
}

#[tokio::test]
async fn cycle_on_missing_directory_reports_it() {
    let dir = TempDir::new().unwrap();
    let sink = Arc::new(RecordingSink::default());
    let loader = Loader::new(
        dir.path().join("missing"),
        Arc::new(MemoryStore::new()),
        sink.clone(),
    );

    let report = loader.run_cycle().await;

    assert_eq!(report.summary.error.as_deref(), Some("Directory not found"));
    assert!(report.persist.is_none());
}

#[tokio::test]
async fn failed_file_is_not_published_and_is_retried() {
    let dir = TempDir::new().unwrap();
    write_voice_csv(&dir, "good.csv", "+1234567890");
    write_voice_csv(&dir, "bad.csv", "+1234567891");

    let store = MemoryStore::new();
    store.fail_inserts_for("bad.csv");
    let sink = Arc::new(RecordingSink::default());
    let loader = Loader::new(dir.path().to_owned(), Arc::new(store.clone()), sink.clone());

    let report = loader.run_cycle().await;

    let outcome = report.persist.unwrap();
    assert_eq!(outcome.persisted, vec!["good.csv".to_owned()]);
    assert_eq!(outcome.failed, vec!["bad.csv".to_owned()]);
    assert_eq!(report.published, 1);
    assert_eq!(sink.published()[0].file_name, "good.csv");
    assert!(!store.is_processed("bad.csv").await.unwrap());

    store.clear_failures();
    let retry = loader.run_cycle().await;

    let outcome = retry.persist.unwrap();
    assert_eq!(outcome.persisted, vec!["bad.csv".to_owned()]);
    assert_eq!(outcome.skipped, vec!["good.csv".to_owned()]);
    assert!(outcome.failed.is_empty());
    assert_eq!(retry.published, 1);
    assert!(store.is_processed("bad.csv").await.unwrap());
    assert_eq!(store.fetch_records("bad.csv").await.unwrap().len(), 1);
    assert_eq!(store.fetch_records("good.csv").await.unwrap().len(), 1);
    let published = sink.published();
    assert_eq!(published.len(), 2);
    assert_eq!(published[1].file_name, "bad.csv");
    assert_eq!(published[1].source, "+1234567891");
}

#[tokio::test]
async fn publish_failure_keeps_records_stored() {
    let dir = TempDir::new().unwrap();
    write_voice_csv(&dir, "cdr_1.csv", "+1234567890");

    let store = MemoryStore::new();
    let sink = Arc::new(RecordingSink {
        fail: true,
        ..Default::default()
    });
    let loader = Loader::new(dir.path().to_owned(), Arc::new(store.clone()), sink);

    let report = loader.run_cycle().await;

    assert_eq!(report.published, 0);
    assert!(report.persist.unwrap().is_success());
    assert_eq!(store.records().len(), 1);
}
