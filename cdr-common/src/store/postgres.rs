use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions};
use sqlx::{Postgres, QueryBuilder, Transaction};

use super::{CdrStore, IngestTransaction, PersistenceError};
use crate::record::{CanonicalRecord, ServiceType};

/// Rows per INSERT statement. Six binds per row keeps us well below the protocol's bind limit.
const INSERT_CHUNK_SIZE: usize = 1000;

/// A CdrStore backed by the `cdrs` and `processed_files` PostgreSQL tables.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Initialize a new PgStore backed by a lazily connecting pool: no connection is attempted
    /// until the first query.
    pub fn new(
        url: &str,
        max_connections: u32,
        app_name: &'static str,
    ) -> Result<Self, PersistenceError> {
        let options = PgConnectOptions::from_str(url)
            .map_err(|error| PersistenceError::PoolCreationError { error })?
            .application_name(app_name);
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect_lazy_with(options);

        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn run_migrations(&self) -> Result<(), PersistenceError> {
        sqlx::migrate!("../migrations").run(&self.pool).await?;
        Ok(())
    }
}

#[derive(sqlx::FromRow)]
struct CdrRow {
    file_name: String,
    source: String,
    destination: String,
    starttime: DateTime<Utc>,
    service: String,
    usage: f64,
}

impl TryFrom<CdrRow> for CanonicalRecord {
    type Error = PersistenceError;

    fn try_from(row: CdrRow) -> Result<Self, Self::Error> {
        let service = ServiceType::from_str(&row.service)
            .map_err(|_| PersistenceError::InvalidServiceType(row.service.clone()))?;

        Ok(CanonicalRecord {
            file_name: row.file_name,
            source: row.source,
            destination: row.destination,
            starttime: row.starttime,
            service,
            usage: row.usage,
        })
    }
}

async fn query_is_processed<'c, E>(executor: E, file_name: &str) -> Result<bool, PersistenceError>
where
    E: sqlx::Executor<'c, Database = Postgres>,
{
    sqlx::query_scalar::<_, bool>(
        "SELECT EXISTS(SELECT 1 FROM processed_files WHERE file_name = $1)",
    )
    .bind(file_name)
    .fetch_one(executor)
    .await
    .map_err(|error| PersistenceError::QueryError {
        command: "SELECT".to_owned(),
        error,
    })
}

#[async_trait]
impl CdrStore for PgStore {
    async fn begin(&self) -> Result<Box<dyn IngestTransaction>, PersistenceError> {
        let transaction = self
            .pool
            .begin()
            .await
            .map_err(|error| PersistenceError::ConnectionError { error })?;

        Ok(Box::new(PgIngestTransaction { transaction }))
    }

    async fn is_processed(&self, file_name: &str) -> Result<bool, PersistenceError> {
        query_is_processed(&self.pool, file_name).await
    }

    async fn fetch_records(
        &self,
        file_name: &str,
    ) -> Result<Vec<CanonicalRecord>, PersistenceError> {
        let rows: Vec<CdrRow> = sqlx::query_as(
            r#"
SELECT file_name, source, destination, starttime, service, usage
FROM cdrs
WHERE file_name = $1
ORDER BY id
            "#,
        )
        .bind(file_name)
        .fetch_all(&self.pool)
        .await
        .map_err(|error| PersistenceError::QueryError {
            command: "SELECT".to_owned(),
            error,
        })?;

        rows.into_iter().map(CanonicalRecord::try_from).collect()
    }
}

pub struct PgIngestTransaction {
    transaction: Transaction<'static, Postgres>,
}

#[async_trait]
impl IngestTransaction for PgIngestTransaction {
    async fn is_processed(&mut self, file_name: &str) -> Result<bool, PersistenceError> {
        query_is_processed(&mut *self.transaction, file_name).await
    }

    async fn insert_records(
        &mut self,
        records: &[CanonicalRecord],
    ) -> Result<u64, PersistenceError> {
        let mut inserted = 0;

        for chunk in records.chunks(INSERT_CHUNK_SIZE) {
            let mut builder = QueryBuilder::<Postgres>::new(
                "INSERT INTO cdrs (file_name, source, destination, starttime, service, usage) ",
            );
            builder.push_values(chunk, |mut row, record| {
                row.push_bind(record.file_name.as_str())
                    .push_bind(record.source.as_str())
                    .push_bind(record.destination.as_str())
                    .push_bind(record.starttime)
                    .push_bind(record.service.as_str())
                    .push_bind(record.usage);
            });

            let result = builder
                .build()
                .execute(&mut *self.transaction)
                .await
                .map_err(|error| PersistenceError::QueryError {
                    command: "INSERT".to_owned(),
                    error,
                })?;
            inserted += result.rows_affected();
        }

        Ok(inserted)
    }

    async fn mark_processed(&mut self, file_name: &str) -> Result<(), PersistenceError> {
        sqlx::query("INSERT INTO processed_files (file_name) VALUES ($1)")
            .bind(file_name)
            .execute(&mut *self.transaction)
            .await
            .map_err(|error| match error {
                sqlx::Error::Database(ref db_error) if db_error.is_unique_violation() => {
                    PersistenceError::AlreadyProcessed(file_name.to_owned())
                }
                error => PersistenceError::QueryError {
                    command: "INSERT".to_owned(),
                    error,
                },
            })?;

        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), PersistenceError> {
        self.transaction
            .commit()
            .await
            .map_err(|error| PersistenceError::TransactionError {
                command: "COMMIT".to_owned(),
                error,
            })
    }

    async fn rollback(self: Box<Self>) -> Result<(), PersistenceError> {
        self.transaction
            .rollback()
            .await
            .map_err(|error| PersistenceError::TransactionError {
                command: "ROLLBACK".to_owned(),
                error,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn record(file_name: &str, source: &str) -> CanonicalRecord {
        CanonicalRecord {
            file_name: file_name.to_owned(),
            source: source.to_owned(),
            destination: "+9876543210".to_owned(),
            starttime: Utc.with_ymd_and_hms(2024, 1, 15, 10, 30, 0).unwrap(),
            service: ServiceType::Voice,
            usage: 15.5,
        }
    }

    #[sqlx::test(migrations = "../migrations")]
    #[ignore = "requires a postgres database"]
    async fn test_committed_records_can_be_read_back(db: PgPool) {
        let store = PgStore::from_pool(db);
        let records = vec![record("cdr_1.csv", "+1234567890"), record("cdr_1.csv", "+1234567891")];

        let mut transaction = store.begin().await.expect("failed to begin transaction");
        assert!(!transaction.is_processed("cdr_1.csv").await.unwrap());
        let inserted = transaction
            .insert_records(&records)
            .await
            .expect("failed to insert records");
        transaction
            .mark_processed("cdr_1.csv")
            .await
            .expect("failed to mark file");
        transaction.commit().await.expect("failed to commit");

        assert_eq!(inserted, 2);
        assert!(store.is_processed("cdr_1.csv").await.unwrap());
        assert_eq!(store.fetch_records("cdr_1.csv").await.unwrap(), records);
    }

    #[sqlx::test(migrations = "../migrations")]
    #[ignore = "requires a postgres database"]
    async fn test_rolled_back_transaction_leaves_nothing(db: PgPool) {
        let store = PgStore::from_pool(db);

        let mut transaction = store.begin().await.unwrap();
        transaction
            .insert_records(&[record("cdr_2.csv", "+1234567890")])
            .await
            .unwrap();
        transaction.mark_processed("cdr_2.csv").await.unwrap();
        transaction.rollback().await.unwrap();

        assert!(!store.is_processed("cdr_2.csv").await.unwrap());
        assert!(store.fetch_records("cdr_2.csv").await.unwrap().is_empty());
    }

    #[sqlx::test(migrations = "../migrations")]
    #[ignore = "requires a postgres database"]
    async fn test_marking_twice_is_already_processed(db: PgPool) {
        let store = PgStore::from_pool(db);

        let mut first = store.begin().await.unwrap();
        first.mark_processed("cdr_3.csv").await.unwrap();
        first.commit().await.unwrap();

        let mut second = store.begin().await.unwrap();
        let result = second.mark_processed("cdr_3.csv").await;

        assert!(matches!(result, Err(PersistenceError::AlreadyProcessed(name)) if name == "cdr_3.csv"));
        second.rollback().await.unwrap();
    }
}
