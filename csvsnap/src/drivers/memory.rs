//! An in-memory destination for tests, with failure injection.

use std::{
    fmt,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Mutex,
    },
};

use crate::common::*;

/// A snapshot, as the memory destination stores it.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub(crate) struct Snapshot {
    pub(crate) columns: Vec<String>,
    pub(crate) rows: Vec<Vec<String>>,
}

/// A table which lives in memory.
///
/// Loads parse the whole payload into a new snapshot first and only swap it
/// in at the end, which is what a real warehouse's atomic replace looks like
/// from outside.
#[derive(Debug, Default)]
pub(crate) struct MemoryDestination {
    table: Mutex<Option<Snapshot>>,
    /// Fail the next load after this many rows have been submitted.
    fail_after_rows: Mutex<Option<usize>>,
    /// Fail the next row count.
    fail_row_count: AtomicBool,
    loads: AtomicUsize,
}

impl MemoryDestination {
    /// A destination which already holds `snapshot`.
    pub(crate) fn with_snapshot(snapshot: Snapshot) -> MemoryDestination {
        MemoryDestination {
            table: Mutex::new(Some(snapshot)),
            ..Default::default()
        }
    }

    /// Make the next load fail part-way through, after `rows` rows.
    pub(crate) fn fail_next_load_after(&self, rows: usize) {
        *self.fail_after_rows.lock().unwrap() = Some(rows);
    }

    /// Make the next row count fail.
    pub(crate) fn fail_next_row_count(&self) {
        self.fail_row_count.store(true, Ordering::SeqCst);
    }

    /// The snapshot currently visible, if any.
    pub(crate) fn snapshot(&self) -> Option<Snapshot> {
        self.table.lock().unwrap().clone()
    }

    /// How many loads were attempted.
    pub(crate) fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }
}

impl fmt::Display for MemoryDestination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "memory:test")
    }
}

#[async_trait]
impl Destination for MemoryDestination {
    async fn load_full_refresh(
        &self,
        schema: &TableSchema,
        delimiter: Delimiter,
        data: Bytes,
    ) -> Result<(), LoadError> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        let fail_after = self.fail_after_rows.lock().unwrap().take();

        let columns = schema
            .column_names()
            .map(|c| c.as_str().to_owned())
            .collect::<Vec<_>>();
        let mut rdr = csv::ReaderBuilder::new()
            .delimiter(delimiter.as_byte())
            .has_headers(true)
            .flexible(true)
            .from_reader(&data[..]);
        let mut staged = Snapshot {
            columns,
            rows: vec![],
        };
        let mut row_errors = vec![];
        for (idx, record) in rdr.records().enumerate() {
            if fail_after == Some(idx) {
                return Err(LoadError::new(
                    LoadErrorKind::Transport,
                    format!("connection reset after {} rows", idx),
                ));
            }
            let record = record.map_err(|err| {
                LoadError::new(LoadErrorKind::RowRejected, err.to_string())
            })?;
            if record.len() != staged.columns.len() {
                row_errors.push(RowError {
                    location: Some(format!("line {}", idx + 2)),
                    message: format!(
                        "expected {} fields, found {}",
                        staged.columns.len(),
                        record.len(),
                    ),
                });
                continue;
            }
            staged.rows.push(record.iter().map(|f| f.to_owned()).collect());
        }
        if !row_errors.is_empty() {
            return Err(LoadError::new(
                LoadErrorKind::RowRejected,
                format!("{} rows rejected", row_errors.len()),
            )
            .with_row_errors(row_errors));
        }

        *self.table.lock().unwrap() = Some(staged);
        Ok(())
    }

    async fn row_count(&self) -> Result<u64, LoadError> {
        if self.fail_row_count.swap(false, Ordering::SeqCst) {
            return Err(LoadError::new(LoadErrorKind::Transport, "connection refused"));
        }
        Ok(self
            .table
            .lock()
            .unwrap()
            .as_ref()
            .map_or(0, |t| t.rows.len() as u64))
    }
}
