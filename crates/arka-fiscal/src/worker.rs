//! # Print Worker
//!
//! Background task that drains the print queue onto the printer.
//!
//! ## Loop
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         PrintWorker::run()                              │
//! │                                                                         │
//! │  startup: requeue jobs a crashed run left in `claimed`                 │
//! │                                                                         │
//! │  select! {                                                              │
//! │    poll tick     ──► drain: run_once() until the queue is empty        │
//! │    cleanup tick  ──► delete finished jobs past retention               │
//! │    shutdown      ──► stop (a job in flight finishes first)             │
//! │  }                                                                      │
//! │                                                                         │
//! │  run_once():                                                            │
//! │    retry unwritten marks ──► reconnect backoff gate ──► ensure_connected│
//! │    ──► claim_next ──► execute_job ──► mark completed / failed           │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! A mark that fails on a transient database error is buffered and retried
//! before the next claim, so every claimed job reaches a terminal status.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use arka_core::PrintJob;
use arka_db::{Database, DbError, DbResult};
use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::config::WorkerSettings;
use crate::device::ReceiptKind;
use crate::error::{FiscalError, FiscalResult};
use crate::receipt::ReceiptOutcome;
use crate::service::{FiscalService, JobOutcome};

// =============================================================================
// Storno Callback
// =============================================================================

/// Told about every printed storno so stock can be returned elsewhere.
pub trait StornoListener: Send + Sync {
    fn on_storno_printed(&self, job: &PrintJob, outcome: &ReceiptOutcome);
}

/// Logs the storno and nothing else.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogStornoListener;

impl StornoListener for LogStornoListener {
    fn on_storno_printed(&self, job: &PrintJob, outcome: &ReceiptOutcome) {
        info!(
            job_id = %job.id,
            fiscal_sale_id = ?job.fiscal_sale_id,
            items = outcome.item_count,
            "Storno printed, stock should be returned"
        );
    }
}

// =============================================================================
// Print Worker
// =============================================================================

#[derive(Debug, Clone)]
enum Mark {
    Complete,
    Failed(String),
}

#[derive(Debug, Clone)]
struct PendingMark {
    job_id: String,
    mark: Mark,
}

/// Claims jobs one at a time and prints them.
pub struct PrintWorker {
    service: Arc<FiscalService>,
    db: Database,
    settings: WorkerSettings,
    storno_listener: Arc<dyn StornoListener>,
    reconnect: ExponentialBackoff,
    retry_at: Option<Instant>,
    pending_marks: VecDeque<PendingMark>,
    shutdown_rx: mpsc::Receiver<()>,
    stopping: bool,
}

/// Handle for controlling a running worker.
#[derive(Clone)]
pub struct PrintWorkerHandle {
    shutdown_tx: mpsc::Sender<()>,
}

impl PrintWorkerHandle {
    /// Triggers graceful shutdown.
    pub async fn shutdown(&self) -> FiscalResult<()> {
        self.shutdown_tx
            .send(())
            .await
            .map_err(|_| FiscalError::Internal("Print worker already stopped".into()))
    }
}

impl PrintWorker {
    /// Creates a new worker and returns a handle.
    pub fn new(
        service: Arc<FiscalService>,
        db: Database,
        storno_listener: Arc<dyn StornoListener>,
    ) -> (Self, PrintWorkerHandle) {
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let settings = service.config().worker.clone();
        let reconnect = create_backoff(&service);

        let worker = PrintWorker {
            service,
            db,
            settings,
            storno_listener,
            reconnect,
            retry_at: None,
            pending_marks: VecDeque::new(),
            shutdown_rx,
            stopping: false,
        };

        (worker, PrintWorkerHandle { shutdown_tx })
    }

    /// Runs the worker loop.
    ///
    /// This should be spawned as a background task.
    pub async fn run(mut self) {
        info!(worker_id = %self.settings.id, "Print worker starting");

        let stale_after = chrono::Duration::seconds(self.settings.stale_claim_secs as i64);
        match self.db.print_jobs().requeue_stale(stale_after).await {
            Ok(0) => {}
            Ok(requeued) => info!(requeued, "Requeued jobs from a previous run"),
            Err(e) => error!(error = %e, "Failed to requeue stale jobs"),
        }

        let mut poll = tokio::time::interval(self.settings.poll_interval());
        poll.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        let mut cleanup = tokio::time::interval(self.settings.cleanup_interval());
        cleanup.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        while !self.stopping {
            tokio::select! {
                _ = poll.tick() => {
                    self.drain().await;
                }

                _ = cleanup.tick() => {
                    self.cleanup().await;
                }

                _ = self.shutdown_rx.recv() => {
                    info!("Print worker shutting down");
                    self.stopping = true;
                }
            }
        }

        self.flush_pending_marks().await;
        if !self.pending_marks.is_empty() {
            error!(
                unwritten = self.pending_marks.len(),
                "Print worker stopped with unwritten job results"
            );
        }

        info!("Print worker stopped");
    }

    /// Processes jobs back to back until the queue is empty, the printer is
    /// unreachable, or shutdown is requested.
    async fn drain(&mut self) {
        loop {
            match self.run_once().await {
                Ok(true) => {}
                Ok(false) => break,
                Err(e) => {
                    warn!(error = %e, "Print worker iteration failed");
                    break;
                }
            }

            match self.shutdown_rx.try_recv() {
                Err(TryRecvError::Empty) => {}
                Ok(()) | Err(TryRecvError::Disconnected) => {
                    info!("Print worker shutting down");
                    self.stopping = true;
                    break;
                }
            }
        }
    }

    /// One claim-print-mark cycle.
    ///
    /// ## Returns
    /// * `Ok(true)` - A job was processed
    /// * `Ok(false)` - Nothing to do right now
    /// * `Err(_)` - The printer or queue could not be reached; no job was claimed
    pub async fn run_once(&mut self) -> FiscalResult<bool> {
        self.flush_pending_marks().await;
        if !self.pending_marks.is_empty() {
            debug!("Job results still unwritten, not claiming");
            return Ok(false);
        }

        if let Some(at) = self.retry_at {
            if Instant::now() < at {
                return Ok(false);
            }
        }

        if let Err(e) = self.service.ensure_connected().await {
            let delay = self
                .reconnect
                .next_backoff()
                .unwrap_or(self.reconnect.max_interval);
            self.retry_at = Some(Instant::now() + delay);
            warn!(error = %e, ?delay, "Printer unavailable, backing off");
            return Err(e);
        }
        self.reconnect.reset();
        self.retry_at = None;

        let job = match self.db.print_jobs().claim_next(&self.settings.id).await? {
            Some(job) => job,
            None => return Ok(false),
        };

        info!(
            job_id = %job.id,
            job_type = %job.job_type,
            attempts = job.attempts,
            "Print job claimed"
        );

        let mark = match self.service.execute_job(&job).await {
            Ok(outcome) => {
                if let JobOutcome::Receipt(receipt) = &outcome {
                    if receipt.kind == ReceiptKind::Storno {
                        self.storno_listener.on_storno_printed(&job, receipt);
                    }
                }
                info!(job_id = %job.id, "Print job completed");
                Mark::Complete
            }
            Err(e) => {
                error!(job_id = %job.id, error = %e, category = ?e.category(), "Print job failed");
                Mark::Failed(e.to_string())
            }
        };

        self.apply_mark(PendingMark {
            job_id: job.id,
            mark,
        })
        .await;

        Ok(true)
    }

    async fn apply_mark(&mut self, pending: PendingMark) {
        match self.write_mark(&pending).await {
            Ok(true) => {}
            Ok(false) => debug!(job_id = %pending.job_id, "Job result was already recorded"),
            Err(e) if e.is_transient() => {
                error!(job_id = %pending.job_id, error = %e, "Failed to record job result, will retry");
                self.pending_marks.push_back(pending);
            }
            Err(e) => {
                error!(job_id = %pending.job_id, error = %e, "Job result rejected by the queue");
                warn!(
                    job_id = %pending.job_id,
                    "Job stays claimed and will be requeued when the worker next starts"
                );
            }
        }
    }

    async fn write_mark(&self, pending: &PendingMark) -> DbResult<bool> {
        let jobs = self.db.print_jobs();
        match &pending.mark {
            Mark::Complete => jobs.mark_complete(&pending.job_id).await,
            Mark::Failed(message) => jobs.mark_failed(&pending.job_id, message).await,
        }
    }

    async fn flush_pending_marks(&mut self) {
        for _ in 0..self.pending_marks.len() {
            if let Some(pending) = self.pending_marks.pop_front() {
                self.apply_mark(pending).await;
            }
        }
    }

    async fn cleanup(&self) {
        let result: Result<u64, DbError> = self
            .db
            .print_jobs()
            .cleanup(self.settings.retention_days)
            .await;

        match result {
            Ok(deleted) => debug!(deleted, "Print queue cleanup finished"),
            Err(e) => error!(error = %e, "Print queue cleanup failed"),
        }
    }
}

fn create_backoff(service: &FiscalService) -> ExponentialBackoff {
    let pool = &service.config().pool;
    ExponentialBackoff {
        initial_interval: Duration::from_millis(pool.reconnect_initial_ms),
        max_interval: Duration::from_secs(pool.reconnect_max_secs),
        multiplier: 2.0,
        max_elapsed_time: None,
        ..Default::default()
    }
}
