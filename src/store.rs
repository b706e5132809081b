//! The reservation record store: a single CSV file plus the status-column
//! convention every workflow tracks itself through.

use anyhow::{Context, Result};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::model::{
    ReservationRecord, WorkflowColumns, COL_CHECK_IN, COL_CHECK_OUT, COL_FIRST_NAME, COL_LAST_NAME,
};

/// Columns a store file must carry to be usable at all. Everything else is
/// optional and defaults to empty text.
const REQUIRED_COLUMNS: [&str; 4] = [COL_FIRST_NAME, COL_LAST_NAME, COL_CHECK_IN, COL_CHECK_OUT];

/// In-memory view of the store CSV. Header casing is normalised to lower
/// case on load; saves preserve column order and emit an empty cell for any
/// column a record has no value for.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Table {
    pub columns: Vec<String>,
    pub records: Vec<ReservationRecord>,
}

impl Table {
    pub fn new(columns: Vec<String>, records: Vec<ReservationRecord>) -> Self {
        Self { columns, records }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let file = std::fs::File::open(path)
            .with_context(|| format!("failed to open store file {}", path.display()))?;
        Self::from_reader(file)
            .with_context(|| format!("failed to parse store file {}", path.display()))
    }

    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        let mut csv = csv::ReaderBuilder::new()
            .has_headers(true)
            .trim(csv::Trim::All)
            .flexible(true)
            .from_reader(reader);

        let columns: Vec<String> = csv
            .headers()
            .context("failed to read CSV header")?
            .iter()
            .map(|h| h.trim().to_lowercase())
            .collect();

        for required in REQUIRED_COLUMNS {
            if !columns.iter().any(|c| c == required) {
                anyhow::bail!("store is missing required column '{}'", required);
            }
        }

        let mut records = Vec::new();
        for row in csv.records() {
            let row = row.context("failed to read CSV row")?;
            let mut record = ReservationRecord::default();
            for (column, value) in columns.iter().zip(row.iter()) {
                record.set(column, value.to_string());
            }
            records.push(record);
        }

        Ok(Self { columns, records })
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let file = std::fs::File::create(path)
            .with_context(|| format!("failed to write store file {}", path.display()))?;
        self.write_to(file)
    }

    pub fn write_to<W: Write>(&self, writer: W) -> Result<()> {
        let mut csv = csv::WriterBuilder::new().from_writer(writer);
        csv.write_record(&self.columns)?;
        for record in &self.records {
            let row: Vec<&str> = self
                .columns
                .iter()
                .map(|c| record.get(c).unwrap_or(""))
                .collect();
            csv.write_record(&row)?;
        }
        csv.flush()?;
        Ok(())
    }

    /// Append a workflow's status/date columns if the store has not seen
    /// this workflow yet. A fresh status column starts as `"Pending"`, the
    /// date column empty.
    pub fn ensure_workflow_columns(&mut self, columns: &WorkflowColumns) {
        if !self.columns.iter().any(|c| *c == columns.status) {
            self.columns.push(columns.status.clone());
            for record in &mut self.records {
                record.set(&columns.status, "Pending".to_string());
            }
        }
        if !self.columns.iter().any(|c| *c == columns.date) {
            self.columns.push(columns.date.clone());
        }
    }

    /// Rows still pending for a workflow, with their row indices.
    pub fn pending(&self, columns: &WorkflowColumns, marker: &str) -> Vec<(usize, ReservationRecord)> {
        self.records
            .iter()
            .enumerate()
            .filter(|(_, r)| is_pending(r, columns, marker))
            .map(|(i, r)| (i, r.clone()))
            .collect()
    }
}

/// A record is pending for a workflow iff its status cell is absent, blank,
/// or anything other than the completed marker. Failure text therefore
/// leaves the row pending, so the next run retries it.
pub fn is_pending(record: &ReservationRecord, columns: &WorkflowColumns, marker: &str) -> bool {
    match record.get(&columns.status) {
        Some(status) => status.trim().is_empty() || status != marker,
        None => true,
    }
}

/// Write a workflow outcome into a record. Overwrites whatever was there;
/// nothing is ever cleared except by a newer outcome.
pub fn mark_outcome(
    record: &mut ReservationRecord,
    columns: &WorkflowColumns,
    status: &str,
    stamp: &str,
) {
    record.set(&columns.status, status.to_string());
    record.set(&columns.date, stamp.to_string());
}

/// Shared handle over the store file. Every mutation is a locked
/// read-modify-write-persist, so concurrent dispatch tasks cannot lose or
/// interleave each other's status updates. The file is rewritten once per
/// recorded outcome: partial progress is already on disk if the process
/// dies mid-run.
#[derive(Clone)]
pub struct SharedStore {
    inner: Arc<Mutex<Inner>>,
}

struct Inner {
    path: PathBuf,
    table: Table,
}

impl SharedStore {
    pub fn open(path: &Path) -> Result<Self> {
        let table = Table::load(path)?;
        Ok(Self {
            inner: Arc::new(Mutex::new(Inner {
                path: path.to_path_buf(),
                table,
            })),
        })
    }

    /// Make sure the workflow's columns exist, then return the pending
    /// rows. Column additions are persisted together with the first
    /// recorded outcome, not eagerly.
    pub async fn pending_rows(
        &self,
        columns: &WorkflowColumns,
        marker: &str,
    ) -> Vec<(usize, ReservationRecord)> {
        let mut inner = self.inner.lock().await;
        inner.table.ensure_workflow_columns(columns);
        inner.table.pending(columns, marker)
    }

    /// Record one row's outcome and persist the whole table.
    pub async fn record_outcome(
        &self,
        row: usize,
        columns: &WorkflowColumns,
        status: &str,
        stamp: &str,
    ) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let record = inner
            .table
            .records
            .get_mut(row)
            .with_context(|| format!("row {} out of range", row))?;
        mark_outcome(record, columns, status, stamp);
        inner.table.save(&inner.path)
    }

    /// Record the same outcome for a whole batch of rows, persisting once.
    pub async fn record_batch_outcome(
        &self,
        rows: &[usize],
        columns: &WorkflowColumns,
        status: &str,
        stamp: &str,
    ) -> Result<()> {
        let mut inner = self.inner.lock().await;
        for &row in rows {
            let record = inner
                .table
                .records
                .get_mut(row)
                .with_context(|| format!("row {} out of range", row))?;
            mark_outcome(record, columns, status, stamp);
        }
        inner.table.save(&inner.path)
    }

    pub async fn snapshot(&self) -> Table {
        self.inner.lock().await.table.clone()
    }
}
