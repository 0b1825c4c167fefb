use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;

use super::{CdrStore, IngestTransaction, PersistenceError};
use crate::record::CanonicalRecord;

#[derive(Default)]
struct State {
    records: Vec<CanonicalRecord>,
    processed: HashSet<String>,
    failing_files: HashSet<String>,
}

/// A non-durable CdrStore. Writes are staged per transaction and applied at commit, so readers
/// never observe a half-written file.
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<State>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make every subsequent insert of records from `file_name` fail.
    pub fn fail_inserts_for(&self, file_name: &str) {
        self.lock().failing_files.insert(file_name.to_owned());
    }

    /// Undo every `fail_inserts_for`.
    pub fn clear_failures(&self) {
        self.lock().failing_files.clear();
    }

    /// Every committed record, in commit order.
    pub fn records(&self) -> Vec<CanonicalRecord> {
        self.lock().records.clone()
    }

    pub fn processed_files(&self) -> HashSet<String> {
        self.lock().processed.clone()
    }
}

#[async_trait]
impl CdrStore for MemoryStore {
    async fn begin(&self) -> Result<Box<dyn IngestTransaction>, PersistenceError> {
        Ok(Box::new(MemoryTransaction {
            store: self.clone(),
            records: Vec::new(),
            marks: Vec::new(),
        }))
    }

    async fn is_processed(&self, file_name: &str) -> Result<bool, PersistenceError> {
        Ok(self.lock().processed.contains(file_name))
    }

    async fn fetch_records(
        &self,
        file_name: &str,
    ) -> Result<Vec<CanonicalRecord>, PersistenceError> {
        Ok(self
            .lock()
            .records
            .iter()
            .filter(|record| record.file_name == file_name)
            .cloned()
            .collect())
    }
}

pub struct MemoryTransaction {
    store: MemoryStore,
    records: Vec<CanonicalRecord>,
    marks: Vec<String>,
}

#[async_trait]
impl IngestTransaction for MemoryTransaction {
    async fn is_processed(&mut self, file_name: &str) -> Result<bool, PersistenceError> {
        Ok(self.marks.iter().any(|mark| mark == file_name)
            || self.store.lock().processed.contains(file_name))
    }

    async fn insert_records(
        &mut self,
        records: &[CanonicalRecord],
    ) -> Result<u64, PersistenceError> {
        {
            let state = self.store.lock();
            if let Some(record) = records
                .iter()
                .find(|record| state.failing_files.contains(&record.file_name))
            {
                return Err(PersistenceError::Unavailable(format!(
                    "inserts for {} are failing",
                    record.file_name
                )));
            }
        }

        self.records.extend_from_slice(records);
        Ok(records.len() as u64)
    }

    async fn mark_processed(&mut self, file_name: &str) -> Result<(), PersistenceError> {
        if self.is_processed(file_name).await? {
            return Err(PersistenceError::AlreadyProcessed(file_name.to_owned()));
        }

        self.marks.push(file_name.to_owned());
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), PersistenceError> {
        let MemoryTransaction {
            store,
            records,
            marks,
        } = *self;
        let mut state = store.lock();

        // Another transaction may have marked the same file since we checked.
        if let Some(mark) = marks.iter().find(|mark| state.processed.contains(*mark)) {
            return Err(PersistenceError::AlreadyProcessed(mark.clone()));
        }

        state.records.extend(records);
        state.processed.extend(marks);
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), PersistenceError> {
        Ok(())
    }
}
