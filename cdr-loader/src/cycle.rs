use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use metrics::histogram;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

use cdr_common::health::HealthHandle;
use cdr_common::persist::{BatchPersister, PersistOutcome};
use cdr_common::record::CanonicalRecord;
use cdr_common::sink::RecordSink;
use cdr_common::store::CdrStore;
use cdr_common::sweep::{sweep, ValidationSummary};

/// Everything one cycle did, for logging and tests.
#[derive(Debug, Default)]
pub struct CycleReport {
    pub summary: ValidationSummary,
    /// `None` when there was nothing to persist.
    pub persist: Option<PersistOutcome>,
    /// Number of records handed to the sink without error.
    pub published: usize,
}

/// Runs the sweep, persist and publish stages over one directory.
pub struct Loader {
    directory: PathBuf,
    persister: BatchPersister,
    sink: Arc<dyn RecordSink>,
}

impl Loader {
    pub fn new(directory: PathBuf, store: Arc<dyn CdrStore>, sink: Arc<dyn RecordSink>) -> Self {
        Self {
            directory,
            persister: BatchPersister::new(store),
            sink,
        }
    }

    /// Run a single cycle. Every failure is logged and reflected in the report, never returned.
    pub async fn run_cycle(&self) -> CycleReport {
        let start = Instant::now();
        let report = self.sweep_persist_publish().await;
        histogram!("cdr_cycle_duration_seconds").record(start.elapsed().as_secs_f64());
        report
    }

    async fn sweep_persist_publish(&self) -> CycleReport {
        let directory = self.directory.clone();
        let (records, summary) = match tokio::task::spawn_blocking(move || sweep(&directory)).await
        {
            Ok(swept) => swept,
            Err(e) => {
                error!("directory sweep panicked: {}", e);
                return CycleReport::default();
            }
        };

        if let Some(error) = &summary.error {
            error!("{}: {}", error, self.directory.display());
        }
        info!(
            "swept {} files: {} valid, {} invalid, {} valid records",
            summary.files_processed,
            summary.valid_files,
            summary.invalid_files,
            summary.total_valid_records
        );

        if records.is_empty() {
            warn!("no records found to process");
            return CycleReport {
                summary,
                ..Default::default()
            };
        }

        let outcome = self.persister.persist_groups(&records).await;
        if !outcome.failed.is_empty() {
            error!("failed to persist records from {:?}", outcome.failed);
        }

        let fresh: Vec<CanonicalRecord> = records
            .into_iter()
            .filter(|record| outcome.persisted.contains(&record.file_name))
            .collect();

        let mut published = 0;
        if !fresh.is_empty() {
            match self.sink.publish(&fresh).await {
                Ok(()) => {
                    info!("published {} records", fresh.len());
                    published = fresh.len();
                }
                Err(e) => error!("failed to publish records: {}", e),
            }
        }

        CycleReport {
            summary,
            persist: Some(outcome),
            published,
        }
    }
}

/// Run a cycle on every tick of a fixed interval. Cycles are awaited in turn, so a slow cycle
/// delays the next tick instead of overlapping with it. `interval` must not be zero.
pub async fn cycle_loop(loader: Loader, interval: Duration, liveness: HealthHandle) {
    let mut interval = tokio::time::interval(interval);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        interval.tick().await;
        liveness.report_healthy();
        loader.run_cycle().await;
        liveness.report_healthy();
    }
}
