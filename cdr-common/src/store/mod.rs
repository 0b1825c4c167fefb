//! # Store
//!
//! Durable home of canonical records and of the ingestion ledger: the set of file names whose
//! records have already been stored. A file's records and its ledger mark are always written in
//! the same transaction, so a file is either fully ingested and marked, or neither.
use async_trait::async_trait;
use thiserror::Error;

use crate::record::CanonicalRecord;

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// Enumeration of errors for operations with a CdrStore.
/// Errors can originate from sqlx and are wrapped by us to provide additional context.
#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("pool creation failed with: {error}")]
    PoolCreationError { error: sqlx::Error },
    #[error("connection failed with: {error}")]
    ConnectionError { error: sqlx::Error },
    #[error("{command} query failed with: {error}")]
    QueryError { command: String, error: sqlx::Error },
    #[error("transaction {command} failed with: {error}")]
    TransactionError { command: String, error: sqlx::Error },
    #[error("migrations failed with: {0}")]
    MigrationError(#[from] sqlx::migrate::MigrateError),
    #[error("{0} has already been processed")]
    AlreadyProcessed(String),
    #[error("{0} is not a valid ServiceType")]
    InvalidServiceType(String),
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// An open unit of work against a store. Dropping it without committing discards every write.
#[async_trait]
pub trait IngestTransaction: Send {
    /// Whether `file_name` is already in the ledger, as seen by this transaction.
    async fn is_processed(&mut self, file_name: &str) -> Result<bool, PersistenceError>;

    /// Stage `records` for insertion, returning how many rows were written.
    async fn insert_records(&mut self, records: &[CanonicalRecord]) -> Result<u64, PersistenceError>;

    /// Add `file_name` to the ledger. Fails with `AlreadyProcessed` if another writer got there
    /// first.
    async fn mark_processed(&mut self, file_name: &str) -> Result<(), PersistenceError>;

    async fn commit(self: Box<Self>) -> Result<(), PersistenceError>;

    async fn rollback(self: Box<Self>) -> Result<(), PersistenceError>;
}

#[async_trait]
pub trait CdrStore: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn IngestTransaction>, PersistenceError>;

    /// Whether `file_name` has been committed to the ledger.
    async fn is_processed(&self, file_name: &str) -> Result<bool, PersistenceError>;

    /// Read back every stored record of `file_name`, in insertion order.
    async fn fetch_records(&self, file_name: &str)
        -> Result<Vec<CanonicalRecord>, PersistenceError>;
}
