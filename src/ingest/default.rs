use std::collections::HashSet;
use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use futures_util::{StreamExt, stream};
use tracing::debug;

use super::traits::{IngestError, IngestionAdapter, OutcomeStream};
use super::types::{IngestRequest, RecordOutcome};
use crate::jobs::{ImportOptions, RecordAction};

const FIELD_SEPARATOR: char = '\u{1f}';

/// Rows remembered per user before that user's index is reset
pub const DEFAULT_ROWS_PER_USER: usize = 100_000;

/// Rows already ingested for one user
#[derive(Debug, Default)]
struct UserIndex {
    rows: HashSet<String>,
    keys: HashSet<String>,
}

/// Built-in adapter that classifies CSV rows against what each user has
/// already imported
///
/// - field count differs from the header: `invalid`
/// - identical to a seen row: `skipped`
/// - same first column as a seen row, other fields differ: `merged` when
///   `dedupeThreshold < 100`, otherwise `created`
/// - anything else: `created`
///
/// Re-running a file therefore yields `skipped` for every row it already
/// ingested, which keeps redelivery harmless.
///
/// The index lives in process memory and stands in for a real
/// persistence layer. Each user's index holds at most `rows_per_user`
/// fingerprints; reaching the cap clears it, after which earlier rows
/// classify as new again.
#[derive(Debug, Clone)]
pub struct CsvIngestionAdapter {
    index: Arc<DashMap<String, UserIndex>>,
    rows_per_user: usize,
}

impl Default for CsvIngestionAdapter {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_ROWS_PER_USER)
    }
}

impl CsvIngestionAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(rows_per_user: usize) -> Self {
        Self {
            index: Arc::new(DashMap::new()),
            rows_per_user: rows_per_user.max(1),
        }
    }
}

impl IngestionAdapter for CsvIngestionAdapter {
    fn ingest(&self, request: IngestRequest) -> OutcomeStream {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(Cursor::new(request.content.into_bytes()));

        let width = match reader.headers() {
            Ok(headers) => headers.len(),
            Err(e) => {
                let err = IngestError::Parse {
                    row: 0,
                    message: e.to_string(),
                };
                return stream::once(async move { Err(err) }).boxed();
            }
        };

        let cursor = RowCursor {
            reader,
            width,
            row: 0,
            done: false,
            user_id: request.user_id,
            options: request.options,
            index: Arc::clone(&self.index),
            rows_per_user: self.rows_per_user,
        };

        stream::unfold(cursor, |mut cursor| async move {
            let item = cursor.next_outcome()?;

            if item.is_ok() && cursor.starts_new_batch() {
                tokio::time::sleep(Duration::from_millis(cursor.options.batch_delay_ms)).await;
            }

            Some((item, cursor))
        })
        .boxed()
    }
}

struct RowCursor {
    reader: csv::Reader<Cursor<Vec<u8>>>,
    width: usize,
    row: u64,
    done: bool,
    user_id: String,
    options: ImportOptions,
    index: Arc<DashMap<String, UserIndex>>,
    rows_per_user: usize,
}

impl RowCursor {
    fn next_outcome(&mut self) -> Option<Result<RecordOutcome, IngestError>> {
        if self.done {
            return None;
        }

        let mut record = csv::StringRecord::new();
        match self.reader.read_record(&mut record) {
            Ok(false) => None,
            Ok(true) => {
                self.row += 1;
                let action = self.classify(&record);
                Some(Ok(RecordOutcome::new(action.as_str(), self.row)))
            }
            Err(e) => {
                self.done = true;
                Some(Err(IngestError::Parse {
                    row: self.row + 1,
                    message: e.to_string(),
                }))
            }
        }
    }

    /// First row of every batch after the first one
    fn starts_new_batch(&self) -> bool {
        let batch = u64::from(self.options.batch_size.max(1));
        self.options.batch_delay_ms > 0 && self.row > 1 && (self.row - 1) % batch == 0
    }

    fn classify(&self, record: &csv::StringRecord) -> RecordAction {
        if record.len() != self.width {
            return RecordAction::Invalid;
        }

        let fingerprint = record
            .iter()
            .collect::<Vec<_>>()
            .join(&FIELD_SEPARATOR.to_string());
        let key = record.get(0).unwrap_or_default().to_string();

        let mut index = self.index.entry(self.user_id.clone()).or_default();
        if index.rows.contains(&fingerprint) {
            return RecordAction::Skipped;
        }

        if index.rows.len() >= self.rows_per_user {
            debug!(user_id = %self.user_id, rows = index.rows.len(), "Row index full, resetting");
            index.rows.clear();
            index.keys.clear();
        }

        index.rows.insert(fingerprint);
        if !index.keys.insert(key) && self.options.dedupe_threshold < 100 {
            RecordAction::Merged
        } else {
            RecordAction::Created
        }
    }
}
