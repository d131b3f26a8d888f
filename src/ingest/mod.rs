//! Streaming ingestion adapters
//!
//! The worker hands decoded CSV text to an [`IngestionAdapter`] and consumes
//! the lazy stream of per-record outcomes it yields. What a record becomes
//! in the domain is the adapter's business; the worker only counts.
//!
//! ## Key Components
//!
//! - [`IngestionAdapter`] - Streaming contract consumed by the worker
//! - [`CsvIngestionAdapter`] - Built-in adapter classifying rows per user
//! - [`IngestRequest`] / [`RecordOutcome`] - Input and per-record output
//!
//! ## Example
//!
//! ```rust,ignore
//! use futures_util::StreamExt;
//! use importd::ingest::{CsvIngestionAdapter, IngestionAdapter, IngestRequest};
//!
//! let adapter = CsvIngestionAdapter::new();
//! let mut outcomes = adapter.ingest(request);
//! while let Some(outcome) = outcomes.next().await {
//!     println!("{}", outcome?.action);
//! }
//! ```

mod default;
mod traits;
mod types;

pub use default::CsvIngestionAdapter;
pub use traits::{IngestError, IngestionAdapter, OutcomeStream};
pub use types::{IngestRequest, RecordOutcome};
