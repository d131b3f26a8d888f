use futures_util::stream::BoxStream;
use thiserror::Error;

use super::types::{IngestRequest, RecordOutcome};

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("malformed CSV at row {row}: {message}")]
    Parse { row: u64, message: String },
    #[error("adapter failure: {0}")]
    Adapter(String),
}

/// Lazy sequence of record outcomes
pub type OutcomeStream = BoxStream<'static, Result<RecordOutcome, IngestError>>;

/// Streaming CSV-to-domain converter consumed by the worker
///
/// Implementations own batching (`batch_size`, `batch_delay`) and the
/// upsert semantics behind each outcome. Redelivery of the same job must be
/// safe: a second run over rows already ingested should not duplicate them.
pub trait IngestionAdapter: Send + Sync {
    fn ingest(&self, request: IngestRequest) -> OutcomeStream;
}
