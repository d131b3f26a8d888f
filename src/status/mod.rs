/// Fjall-backed job status store
///
/// Holds one status record per job (status, stats, failure reason) so that
/// clients can poll the state of an import independently of the queue and of
/// the WebSocket channel. Every write refreshes a fixed TTL; abandoned
/// records expire on their own and are swept by [`StatusStore::prune_expired`].
///
/// Records that fail to deserialize are treated as absent and removed on
/// read, so a corrupt value never surfaces as an error to callers.
///
/// ## Usage
///
/// ```rust,ignore
/// use importd::status::StatusStore;
///
/// let store = StatusStore::open("data/status", Duration::from_secs(86_400))?;
/// store.set_status(&job_id, JobStatus::Processing, &stats)?;
/// let record = store.get_status(&job_id)?;
/// ```

pub mod error;
pub mod partitions;
pub mod pruning;
pub mod store;

pub use error::{Result, StatusError};
pub use pruning::PruneStats;
pub use store::{StatusRecord, StatusStore, DEFAULT_STATUS_TTL};
