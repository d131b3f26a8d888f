/// Sweep of expired and corrupt status records
use chrono::{DateTime, Utc};
use fjall::{Keyspace, PartitionHandle};
use tracing::{debug, info, warn};

use super::error::Result;
use super::partitions::decode_status_key;
use super::store::StatusRecord;

/// Pruning statistics
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PruneStats {
    pub expired: usize,
    pub corrupt: usize,
    pub retained: usize,
}

/// Delete every record whose TTL has elapsed at `now`, plus undecodable ones
pub fn prune_expired(
    keyspace: &Keyspace,
    statuses: &PartitionHandle,
    now: DateTime<Utc>,
) -> Result<PruneStats> {
    let mut stats = PruneStats::default();
    let mut doomed = Vec::new();

    for item in statuses.iter() {
        let (key, value) = item?;
        match serde_json::from_slice::<StatusRecord>(&value) {
            Ok(record) if record.is_expired(now) => {
                debug!(job_id = %record.job_id, "Status record expired");
                stats.expired += 1;
                doomed.push(key);
            }
            Ok(_) => stats.retained += 1,
            Err(e) => {
                warn!(
                    job_id = ?decode_status_key(&key),
                    error = %e,
                    "Dropping corrupt status record"
                );
                stats.corrupt += 1;
                doomed.push(key);
            }
        }
    }

    for key in doomed {
        statuses.remove(key)?;
    }

    keyspace.persist(fjall::PersistMode::SyncAll)?;
    info!(?stats, "Status pruning complete");

    Ok(stats)
}
