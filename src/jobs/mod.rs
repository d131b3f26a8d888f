//! Import job domain types shared by the queue, the worker pool, the status
//! store and the gateway.
//!
//! - [`ImportJob`] - one queued unit of CSV import work owned by a user
//! - [`JobStats`] - outcome counters accumulated while a job runs
//! - [`ProgressEvent`] - the pub/sub payload relayed to WebSocket clients

mod stats;
mod types;

pub use stats::{JobStats, RecordAction, UnknownAction};
pub use types::{
    ImportJob, ImportOptions, JobRequest, JobStatus, PayloadRef, ProgressEvent,
};
