//! Generic idempotent dispatcher: build a workflow-specific request for
//! every pending row, send it under bounded concurrency, and write each
//! outcome back through the store. One row's failure never aborts the
//! batch; the failure text lands in the status column and the row is
//! retried on the next run.

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{info, warn};

use crate::dates;
use crate::model::{DispatchSummary, Outcome, ReservationRecord, WorkflowColumns};
use crate::store::SharedStore;

/// One outbound workflow. Implementations supply the payload building,
/// the send, and the success predicate; the dispatch shape is shared.
#[async_trait]
pub trait RowWorkflow: Send + Sync {
    fn name(&self) -> &'static str;
    fn columns(&self) -> &WorkflowColumns;
    async fn submit(&self, record: &ReservationRecord) -> Outcome;
}

/// Dispatch every pending row of `workflow`, at most `workers` in flight.
/// Blocks until all submitted tasks have completed (barrier join) and
/// returns the aggregated counters.
pub async fn run(
    store: &SharedStore,
    workflow: Arc<dyn RowWorkflow>,
    completed_marker: &str,
    workers: usize,
) -> Result<DispatchSummary> {
    let pending = store.pending_rows(workflow.columns(), completed_marker).await;
    info!(
        workflow = workflow.name(),
        pending = pending.len(),
        "dispatching pending rows"
    );

    let semaphore = Arc::new(Semaphore::new(workers.max(1)));
    let mut tasks: JoinSet<Outcome> = JoinSet::new();

    for (row, record) in pending {
        let workflow = Arc::clone(&workflow);
        let semaphore = Arc::clone(&semaphore);
        let store = store.clone();
        let marker = completed_marker.to_string();
        tasks.spawn(async move {
            let _permit = semaphore
                .acquire_owned()
                .await
                .expect("dispatch semaphore closed");

            let outcome = workflow.submit(&record).await;
            if let Outcome::Failed(reason) = &outcome {
                warn!(workflow = workflow.name(), row, reason = %reason, "row failed");
            }

            let status = outcome.status_text(&marker);
            let stamp = dates::stamp_now();
            if let Err(err) = store
                .record_outcome(row, workflow.columns(), &status, &stamp)
                .await
            {
                warn!(?err, row, "failed to persist row outcome");
                return Outcome::Failed(format!("Error: {}", err));
            }
            outcome
        });
    }

    let mut summary = DispatchSummary::default();
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(outcome) => summary.tally(&outcome),
            Err(err) => {
                warn!(?err, "dispatch task panicked");
                summary.failed += 1;
            }
        }
    }

    info!(
        completed = summary.completed,
        failed = summary.failed,
        "dispatch finished"
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Table;
    use std::sync::Mutex;

    fn store_csv(rows: &[(&str, &str, &str)]) -> String {
        let mut csv = String::from(
            "booking reference,guest first name,guest last name,check in date,check out date,form status,form date\n",
        );
        for (booking, first, status) in rows {
            csv.push_str(&format!(
                "{},{},Tan,01/06/2025,05/06/2025,{},\n",
                booking, first, status
            ));
        }
        csv
    }

    struct RecordingWorkflow {
        columns: WorkflowColumns,
        submitted: Mutex<Vec<String>>,
        fail_for: Option<String>,
    }

    impl RecordingWorkflow {
        fn new(fail_for: Option<&str>) -> Self {
            Self {
                columns: WorkflowColumns::new("form status", "form date"),
                submitted: Mutex::new(Vec::new()),
                fail_for: fail_for.map(str::to_string),
            }
        }

        fn submitted(&self) -> Vec<String> {
            self.submitted.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl RowWorkflow for RecordingWorkflow {
        fn name(&self) -> &'static str {
            "recording"
        }

        fn columns(&self) -> &WorkflowColumns {
            &self.columns
        }

        async fn submit(&self, record: &ReservationRecord) -> Outcome {
            self.submitted
                .lock()
                .unwrap()
                .push(record.booking_reference.clone());
            match &self.fail_for {
                Some(booking) if *booking == record.booking_reference => {
                    Outcome::Failed("Error: connection refused".into())
                }
                _ => Outcome::Completed,
            }
        }
    }

    async fn open_store(rows: &[(&str, &str, &str)]) -> (tempfile::TempDir, SharedStore) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reservations.csv");
        std::fs::write(&path, store_csv(rows)).unwrap();
        let store = SharedStore::open(&path).unwrap();
        (dir, store)
    }

    #[tokio::test]
    async fn completed_rows_are_never_resent() {
        let (_dir, store) = open_store(&[
            ("B-1", "Aisha", "Completed"),
            ("B-2", "Ben", "Pending"),
            ("B-3", "Chen", "Failed with status code 500"),
        ])
        .await;
        let workflow = Arc::new(RecordingWorkflow::new(None));

        let summary = run(&store, workflow.clone(), "Completed", 5).await.unwrap();

        assert_eq!(summary.completed, 2);
        assert_eq!(summary.failed, 0);
        let mut submitted = workflow.submitted();
        submitted.sort();
        // The already-completed row was skipped; the failed row retried.
        assert_eq!(submitted, vec!["B-2", "B-3"]);
    }

    #[tokio::test]
    async fn rerun_after_full_success_sends_nothing() {
        let (_dir, store) = open_store(&[("B-1", "Aisha", "Pending"), ("B-2", "Ben", "Pending")]).await;

        let first = Arc::new(RecordingWorkflow::new(None));
        run(&store, first.clone(), "Completed", 5).await.unwrap();
        assert_eq!(first.submitted().len(), 2);

        let second = Arc::new(RecordingWorkflow::new(None));
        let summary = run(&store, second.clone(), "Completed", 5).await.unwrap();
        assert_eq!(summary, DispatchSummary::default());
        assert!(second.submitted().is_empty());
    }

    #[tokio::test]
    async fn failure_is_recorded_and_does_not_abort_the_batch() {
        let (dir, store) = open_store(&[("B-1", "Aisha", "Pending"), ("B-2", "Ben", "Pending")]).await;
        let workflow = Arc::new(RecordingWorkflow::new(Some("B-1")));

        let summary = run(&store, workflow, "Completed", 5).await.unwrap();
        assert_eq!(summary.completed, 1);
        assert_eq!(summary.failed, 1);

        let table = Table::load(&dir.path().join("reservations.csv")).unwrap();
        let by_booking = |b: &str| {
            table
                .records
                .iter()
                .find(|r| r.booking_reference == b)
                .unwrap()
                .clone()
        };
        assert_eq!(
            by_booking("B-1").get("form status"),
            Some("Error: connection refused")
        );
        assert_eq!(by_booking("B-2").get("form status"), Some("Completed"));
    }

    #[tokio::test]
    async fn concurrent_dispatch_loses_no_updates() {
        let rows: Vec<(String, String)> = (0..20)
            .map(|i| (format!("B-{:02}", i), format!("Guest{:02}", i)))
            .collect();
        let refs: Vec<(&str, &str, &str)> = rows
            .iter()
            .map(|(b, f)| (b.as_str(), f.as_str(), "Pending"))
            .collect();
        let (dir, store) = open_store(&refs).await;
        let workflow = Arc::new(RecordingWorkflow::new(None));

        let summary = run(&store, workflow, "Completed", 5).await.unwrap();
        assert_eq!(summary.completed, 20);

        let table = Table::load(&dir.path().join("reservations.csv")).unwrap();
        assert_eq!(table.records.len(), 20);
        assert!(table
            .records
            .iter()
            .all(|r| r.get("form status") == Some("Completed")));
        assert!(table
            .records
            .iter()
            .all(|r| !r.get("form date").unwrap_or("").is_empty()));
    }
}
