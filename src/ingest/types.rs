use crate::jobs::ImportOptions;

/// Input handed to an ingestion adapter for one job run
#[derive(Debug, Clone)]
pub struct IngestRequest {
    /// Decoded CSV text, header included
    pub content: String,
    pub user_id: String,
    pub file_name: String,
    pub options: ImportOptions,
}

/// One yielded per-record outcome
///
/// `action` is kept as a raw key: adapters are external code and may emit
/// keys the processor does not know.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordOutcome {
    pub action: String,
    /// 1-based data row number, header excluded
    pub row: u64,
}

impl RecordOutcome {
    pub fn new(action: impl Into<String>, row: u64) -> Self {
        Self {
            action: action.into(),
            row,
        }
    }
}
