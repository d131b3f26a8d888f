//! Import worker service
//!
//! Workers receive dispatch notices from mpsc channels, claim the job from
//! the queue, decode its payload, drive the ingestion adapter and report
//! status and progress.

pub mod processor;
pub mod runner;

pub use processor::{ImportProcessor, JobOutcome, WorkerError};
pub use runner::WorkerPool;
