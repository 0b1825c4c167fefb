//! # Persist
//!
//! Stores canonical records one source file at a time, using the ingestion ledger so that every
//! file contributes its records at most once.
use std::sync::Arc;

use metrics::counter;
use tracing::{error, info, warn};

use crate::record::CanonicalRecord;
use crate::store::{CdrStore, IngestTransaction, PersistenceError};

/// The records of one batch that share a file name, in batch order.
#[derive(Debug, PartialEq)]
pub struct FileGroup {
    pub file_name: String,
    pub records: Vec<CanonicalRecord>,
}

/// Group `records` by file name. Groups come out in the order their file was first seen.
pub fn group_by_file(records: &[CanonicalRecord]) -> Vec<FileGroup> {
    let mut groups: Vec<FileGroup> = Vec::new();

    for record in records {
        match groups
            .iter_mut()
            .find(|group| group.file_name == record.file_name)
        {
            Some(group) => group.records.push(record.clone()),
            None => groups.push(FileGroup {
                file_name: record.file_name.clone(),
                records: vec![record.clone()],
            }),
        }
    }

    groups
}

/// What happened to each file of a batch.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PersistOutcome {
    pub persisted: Vec<String>,
    pub skipped: Vec<String>,
    pub failed: Vec<String>,
    pub records_inserted: u64,
}

impl PersistOutcome {
    /// At least one file was newly stored and none failed.
    pub fn is_success(&self) -> bool {
        self.failed.is_empty() && !self.persisted.is_empty()
    }
}

enum GroupResult {
    Persisted(u64),
    Skipped,
}

pub struct BatchPersister {
    store: Arc<dyn CdrStore>,
}

impl BatchPersister {
    pub fn new(store: Arc<dyn CdrStore>) -> Self {
        Self { store }
    }

    /// Store `records`, returning `true` only if every file was either newly stored or already
    /// known and at least one was new. Failures are logged and never raised.
    pub async fn persist(&self, records: &[CanonicalRecord]) -> bool {
        self.persist_groups(records).await.is_success()
    }

    pub async fn persist_groups(&self, records: &[CanonicalRecord]) -> PersistOutcome {
        let mut outcome = PersistOutcome::default();

        if records.is_empty() {
            warn!("no records to persist");
            return outcome;
        }

        for group in group_by_file(records) {
            let file_name = group.file_name.clone();

            match self.persist_group(&group).await {
                Ok(GroupResult::Persisted(inserted)) => {
                    info!("persisted {} records from {}", inserted, file_name);
                    counter!("cdr_files_persisted_total").increment(1);
                    outcome.records_inserted += inserted;
                    outcome.persisted.push(file_name);
                }
                Ok(GroupResult::Skipped) | Err(PersistenceError::AlreadyProcessed(_)) => {
                    info!("{} has already been processed, skipping", file_name);
                    counter!("cdr_files_skipped_total").increment(1);
                    outcome.skipped.push(file_name);
                }
                Err(e) => {
                    error!("failed to persist records from {}: {}", file_name, e);
                    counter!("cdr_persist_failures_total").increment(1);
                    outcome.failed.push(file_name);
                }
            }
        }

        outcome
    }

    /// One transaction per file: ledger check, inserts and ledger mark commit together or not at
    /// all.
    async fn persist_group(&self, group: &FileGroup) -> Result<GroupResult, PersistenceError> {
        let mut transaction = self.store.begin().await?;

        match write_group(transaction.as_mut(), group).await {
            Ok(GroupResult::Skipped) => {
                if let Err(e) = transaction.rollback().await {
                    warn!("rollback after skipping {} failed: {}", group.file_name, e);
                }
                Ok(GroupResult::Skipped)
            }
            Ok(persisted) => {
                transaction.commit().await?;
                Ok(persisted)
            }
            Err(e) => {
                if let Err(rollback_error) = transaction.rollback().await {
                    warn!("rollback of {} failed: {}", group.file_name, rollback_error);
                }
                Err(e)
            }
        }
    }
}

async fn write_group(
    transaction: &mut dyn IngestTransaction,
    group: &FileGroup,
) -> Result<GroupResult, PersistenceError> {
    if transaction.is_processed(&group.file_name).await? {
        return Ok(GroupResult::Skipped);
    }

    let inserted = transaction.insert_records(&group.records).await?;
    transaction.mark_processed(&group.file_name).await?;

    Ok(GroupResult::Persisted(inserted))
}
