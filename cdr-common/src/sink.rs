use async_trait::async_trait;
use metrics::counter;
use thiserror::Error;
use tracing::info;

use crate::record::CanonicalRecord;

#[derive(Error, Debug)]
pub enum PublishError {
    #[error("failed to serialize record: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("{failed} of {total} records were not delivered: {message}")]
    Delivery {
        failed: usize,
        total: usize,
        message: String,
    },
}

/// Where canonical records go once they have been stored.
#[async_trait]
pub trait RecordSink: Send + Sync {
    async fn publish(&self, records: &[CanonicalRecord]) -> Result<(), PublishError>;
}

/// Logs every record instead of sending it anywhere. Handy for local runs.
pub struct PrintSink {}

#[async_trait]
impl RecordSink for PrintSink {
    async fn publish(&self, records: &[CanonicalRecord]) -> Result<(), PublishError> {
        let span = tracing::span!(tracing::Level::INFO, "batch of records");
        let _enter = span.enter();

        for record in records {
            info!("record: {}", serde_json::to_string(record)?);
        }
        counter!("cdr_records_published_total").increment(records.len() as u64);

        Ok(())
    }
}
