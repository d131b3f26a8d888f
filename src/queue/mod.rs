pub mod broker;
pub mod producer;
pub mod retry;
pub mod store;

pub use broker::{Delivery, Dispatch, JobQueue, Recovery, Settlement, EXHAUSTED_REASON};
pub use producer::{ImportProducer, ImportUpload, SubmitError, SubmitOutcome};
pub use retry::{Backoff, RetryPolicy};
pub use store::{FjallQueue, JobFilter, JobView, QueueEntry, QueueError, QueueState};
