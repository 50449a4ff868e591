//! # Print Job Repository
//!
//! The persisted queue between terminals and the fiscal worker.
//!
//! ## Claim Contract
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Claim-Once Semantics                                 │
//! │                                                                         │
//! │  UPDATE print_jobs SET status = 'claimed', ...                         │
//! │  WHERE id = (SELECT id FROM print_jobs                                 │
//! │              WHERE status = 'pending'                                  │
//! │              ORDER BY priority ASC, seq ASC LIMIT 1)                   │
//! │    AND status = 'pending'                                              │
//! │  RETURNING ...                                                          │
//! │                                                                         │
//! │  One statement, one writer at a time (SQLite write lock):              │
//! │  two callers can never both see the same row as 'pending'.             │
//! │                                                                         │
//! │  Caller A ──► row 7 claimed ──► returns job 7                          │
//! │  Caller B ──► (waits for lock) ──► row 8 claimed ──► returns job 8     │
//! │  Caller C ──► no pending rows ──► returns None                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Terminal Transitions
//! ```text
//!   claimed ──mark_complete──► completed     (again: Ok(false))
//!   claimed ──mark_failed────► failed        (again: Ok(false))
//!   completed ──mark_failed──► InvalidTransition, outcome untouched
//! ```

use arka_core::validation::validate_new_job;
use arka_core::{new_job_id, JobPayload, JobStatus, JobType, NewPrintJob, PrintJob, QueueStats};
use chrono::{DateTime, Duration, Utc};
use sqlx::SqlitePool;
use tracing::{debug, info, warn};

use crate::error::{DbError, DbResult};

/// Column list shared by every query that returns whole jobs.
macro_rules! job_columns {
    () => {
        "id, job_type, payload, device_id, fiscal_sale_id, priority, status, \
         error, claimed_by, attempts, created_at, claimed_at, completed_at"
    };
}

/// Raw row; `payload` is still JSON text.
#[derive(Debug, sqlx::FromRow)]
struct PrintJobRow {
    id: String,
    job_type: JobType,
    payload: String,
    device_id: String,
    fiscal_sale_id: Option<String>,
    priority: i64,
    status: JobStatus,
    error: Option<String>,
    claimed_by: Option<String>,
    attempts: i64,
    created_at: DateTime<Utc>,
    claimed_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
}

impl TryFrom<PrintJobRow> for PrintJob {
    type Error = DbError;

    fn try_from(row: PrintJobRow) -> Result<Self, Self::Error> {
        let payload = JobPayload::from_json(&row.payload)
            .map_err(|e| DbError::InvalidData(format!("job {}: {}", row.id, e)))?;

        Ok(PrintJob {
            id: row.id,
            job_type: row.job_type,
            payload,
            device_id: row.device_id,
            fiscal_sale_id: row.fiscal_sale_id,
            priority: row.priority,
            status: row.status,
            error: row.error,
            claimed_by: row.claimed_by,
            attempts: row.attempts,
            created_at: row.created_at,
            claimed_at: row.claimed_at,
            completed_at: row.completed_at,
        })
    }
}

/// Repository for print job queue operations.
#[derive(Debug, Clone)]
pub struct PrintJobRepository {
    pool: SqlitePool,
}

impl PrintJobRepository {
    /// Creates a new PrintJobRepository.
    pub fn new(pool: SqlitePool) -> Self {
        PrintJobRepository { pool }
    }

    // =========================================================================
    // Submission
    // =========================================================================

    /// Validates and persists a job in `pending` status.
    ///
    /// Returns as soon as the row is written; the terminal polls `get` for the
    /// outcome.
    ///
    /// ## Returns
    /// * `Ok(PrintJob)` - The stored job with its new id
    /// * `Err(DbError::Validation)` - Submission rejected, nothing stored
    pub async fn submit(&self, new_job: NewPrintJob) -> DbResult<PrintJob> {
        validate_new_job(&new_job)?;

        let job = PrintJob::from_new(new_job, new_job_id(), Utc::now());
        let payload = job
            .payload
            .to_json()
            .map_err(|e| DbError::InvalidData(e.to_string()))?;

        sqlx::query(
            r#"
            INSERT INTO print_jobs (
                id, job_type, payload, device_id, fiscal_sale_id,
                priority, status, attempts, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 0, ?8)
            "#,
        )
        .bind(&job.id)
        .bind(job.job_type)
        .bind(&payload)
        .bind(&job.device_id)
        .bind(&job.fiscal_sale_id)
        .bind(job.priority)
        .bind(job.status)
        .bind(job.created_at)
        .execute(&self.pool)
        .await?;

        info!(
            job_id = %job.id,
            job_type = %job.job_type,
            device_id = %job.device_id,
            priority = job.priority,
            "Print job queued"
        );

        Ok(job)
    }

    /// Fetches a job by id.
    pub async fn get(&self, id: &str) -> DbResult<Option<PrintJob>> {
        let row: Option<PrintJobRow> =
            sqlx::query_as(concat!("SELECT ", job_columns!(), " FROM print_jobs WHERE id = ?1"))
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;

        row.map(PrintJob::try_from).transpose()
    }

    // =========================================================================
    // Claim
    // =========================================================================

    /// Atomically claims the next pending job.
    ///
    /// Lowest priority value first, then insertion order. Never blocks waiting
    /// for work.
    ///
    /// ## Arguments
    /// * `worker_id` - Identity recorded in `claimed_by`
    ///
    /// ## Returns
    /// * `Ok(Some(job))` - The job, now `claimed` by this caller only
    /// * `Ok(None)` - No job available
    pub async fn claim_next(&self, worker_id: &str) -> DbResult<Option<PrintJob>> {
        let now = Utc::now();

        let row: Option<PrintJobRow> = sqlx::query_as(concat!(
            r#"
            UPDATE print_jobs SET
                status = 'claimed',
                claimed_at = ?1,
                claimed_by = ?2,
                attempts = attempts + 1
            WHERE id = (
                SELECT id FROM print_jobs
                WHERE status = 'pending'
                ORDER BY priority ASC, seq ASC
                LIMIT 1
            )
            AND status = 'pending'
            RETURNING "#,
            job_columns!()
        ))
        .bind(now)
        .bind(worker_id)
        .fetch_optional(&self.pool)
        .await?;

        let job = row.map(PrintJob::try_from).transpose()?;

        if let Some(job) = &job {
            debug!(
                job_id = %job.id,
                job_type = %job.job_type,
                attempts = job.attempts,
                worker_id = %worker_id,
                "Print job claimed"
            );
        }

        Ok(job)
    }

    // =========================================================================
    // Terminal Transitions
    // =========================================================================

    /// Marks a claimed job as completed.
    ///
    /// ## Returns
    /// * `Ok(true)` - Transitioned now
    /// * `Ok(false)` - Already completed; nothing changed
    /// * `Err(InvalidTransition)` - Job is pending or failed
    pub async fn mark_complete(&self, id: &str) -> DbResult<bool> {
        self.finish(id, JobStatus::Completed, None).await
    }

    /// Marks a claimed job as failed, keeping the raw error text.
    ///
    /// ## Returns
    /// * `Ok(true)` - Transitioned now
    /// * `Ok(false)` - Already failed; the first error text is kept
    /// * `Err(InvalidTransition)` - Job is pending or completed
    pub async fn mark_failed(&self, id: &str, error: &str) -> DbResult<bool> {
        self.finish(id, JobStatus::Failed, Some(error)).await
    }

    async fn finish(&self, id: &str, to: JobStatus, error: Option<&str>) -> DbResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE print_jobs SET
                status = ?1,
                error = ?2,
                completed_at = ?3
            WHERE id = ?4 AND status = 'claimed'
            "#,
        )
        .bind(to)
        .bind(error)
        .bind(Utc::now())
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 1 {
            match error {
                Some(error) => warn!(job_id = %id, error = %error, "Print job failed"),
                None => info!(job_id = %id, "Print job completed"),
            }
            return Ok(true);
        }

        let current: Option<JobStatus> =
            sqlx::query_scalar("SELECT status FROM print_jobs WHERE id = ?1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;

        match current {
            None => Err(DbError::not_found("PrintJob", id)),
            Some(status) if status == to => {
                debug!(job_id = %id, status = %status, "Repeated mark ignored");
                Ok(false)
            }
            Some(from) => Err(DbError::InvalidTransition {
                id: id.to_string(),
                from,
                to,
            }),
        }
    }

    // =========================================================================
    // Maintenance
    // =========================================================================

    /// Deletes completed and failed jobs that finished before the retention
    /// window. Pending and claimed jobs are never touched.
    ///
    /// ## Returns
    /// Number of deleted jobs.
    pub async fn cleanup(&self, older_than_days: u32) -> DbResult<u64> {
        let cutoff = Utc::now() - Duration::days(i64::from(older_than_days));

        let result = sqlx::query(
            r#"
            DELETE FROM print_jobs
            WHERE status IN ('completed', 'failed')
              AND completed_at IS NOT NULL
              AND completed_at < ?1
            "#,
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await?;

        let deleted = result.rows_affected();
        if deleted > 0 {
            info!(deleted, older_than_days, "Cleaned up finished print jobs");
        }
        Ok(deleted)
    }

    /// Returns jobs stuck in `claimed` for longer than `older_than` to
    /// `pending`.
    ///
    /// A claim only outlives its worker when the process died mid-job. The
    /// worker calls this at startup.
    pub async fn requeue_stale(&self, older_than: Duration) -> DbResult<u64> {
        let cutoff = Utc::now() - older_than;

        let result = sqlx::query(
            r#"
            UPDATE print_jobs SET
                status = 'pending',
                claimed_at = NULL,
                claimed_by = NULL
            WHERE status = 'claimed'
              AND claimed_at <= ?1
            "#,
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await?;

        let requeued = result.rows_affected();
        if requeued > 0 {
            warn!(requeued, "Requeued print jobs left claimed by a previous run");
        }
        Ok(requeued)
    }

    /// Counts jobs per status and the age of the oldest pending job.
    pub async fn stats(&self) -> DbResult<QueueStats> {
        let counts: Vec<(JobStatus, i64)> =
            sqlx::query_as("SELECT status, COUNT(*) FROM print_jobs GROUP BY status")
                .fetch_all(&self.pool)
                .await?;

        let mut stats = QueueStats::default();
        for (status, count) in counts {
            match status {
                JobStatus::Pending => stats.pending = count,
                JobStatus::Claimed => stats.claimed = count,
                JobStatus::Completed => stats.completed = count,
                JobStatus::Failed => stats.failed = count,
            }
        }

        let oldest: Option<DateTime<Utc>> = sqlx::query_scalar(
            "SELECT created_at FROM print_jobs WHERE status = 'pending' ORDER BY seq ASC LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await?;

        stats.oldest_pending_age_secs =
            oldest.map(|created| (Utc::now() - created).num_seconds().max(0));

        Ok(stats)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{Database, DbConfig};
    use arka_core::{LineItem, PaymentMethod, Quantity, ZREPORT_PRIORITY};
    use std::collections::HashSet;

    async fn test_db() -> Database {
        Database::new(DbConfig::in_memory()).await.unwrap()
    }

    fn sale(device: &str) -> NewPrintJob {
        NewPrintJob::receipt(
            device,
            JobPayload::with_items(
                vec![
                    LineItem::new("Kafe", 100, Quantity::from_units(2)),
                    LineItem::new("Uje", 50, Quantity::from_units(1)),
                ],
                PaymentMethod::Cash,
            ),
        )
    }

    async fn backdate_completion(db: &Database, id: &str, days: i64) {
        sqlx::query("UPDATE print_jobs SET completed_at = ?1 WHERE id = ?2")
            .bind(Utc::now() - Duration::days(days))
            .bind(id)
            .execute(db.pool())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_submit_and_get() {
        let db = test_db().await;
        let repo = db.print_jobs();

        let job = repo
            .submit(sale("pos-1").with_fiscal_sale_id("sale-42"))
            .await
            .unwrap();
        assert_eq!(job.status, JobStatus::Pending);

        let stored = repo.get(&job.id).await.unwrap().unwrap();
        assert_eq!(stored.job_type, JobType::Receipt);
        assert_eq!(stored.payload.items.len(), 2);
        assert_eq!(stored.payload.payment_method, PaymentMethod::Cash);
        assert_eq!(stored.fiscal_sale_id.as_deref(), Some("sale-42"));
        assert_eq!(stored.attempts, 0);
        assert!(stored.claimed_at.is_none());

        assert!(repo.get("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_invalid_submission_is_not_stored() {
        let db = test_db().await;
        let repo = db.print_jobs();

        let empty = NewPrintJob::receipt("pos-1", JobPayload::default());
        let err = repo.submit(empty).await.unwrap_err();
        assert!(matches!(err, DbError::Validation(_)));

        assert_eq!(repo.stats().await.unwrap().total(), 0);
    }

    #[tokio::test]
    async fn test_claim_on_empty_queue() {
        let db = test_db().await;
        assert!(db.print_jobs().claim_next("w1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_claim_order_priority_then_insertion() {
        let db = test_db().await;
        let repo = db.print_jobs();

        let first = repo.submit(sale("pos-1")).await.unwrap();
        let second = repo.submit(sale("pos-2")).await.unwrap();
        let z = repo.submit(NewPrintJob::z_report("pos-3")).await.unwrap();
        assert_eq!(z.priority, ZREPORT_PRIORITY);

        let order: Vec<String> = {
            let mut ids = Vec::new();
            while let Some(job) = repo.claim_next("w1").await.unwrap() {
                ids.push(job.id);
            }
            ids
        };

        assert_eq!(order, vec![z.id, first.id, second.id]);
    }

    #[tokio::test]
    async fn test_claim_records_worker() {
        let db = test_db().await;
        let repo = db.print_jobs();
        let job = repo.submit(sale("pos-1")).await.unwrap();

        let claimed = repo.claim_next("worker-a").await.unwrap().unwrap();
        assert_eq!(claimed.id, job.id);
        assert_eq!(claimed.status, JobStatus::Claimed);
        assert_eq!(claimed.claimed_by.as_deref(), Some("worker-a"));
        assert_eq!(claimed.attempts, 1);
        assert!(claimed.claimed_at.is_some());

        assert!(repo.claim_next("worker-b").await.unwrap().is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_claims_never_share_a_job() {
        let db = test_db().await;
        let repo = db.print_jobs();

        for i in 0..5 {
            repo.submit(sale(&format!("pos-{}", i))).await.unwrap();
        }

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let repo = repo.clone();
                tokio::spawn(async move { repo.claim_next(&format!("w{}", i)).await })
            })
            .collect();

        let mut claimed = Vec::new();
        for handle in handles {
            if let Some(job) = handle.await.unwrap().unwrap() {
                claimed.push(job.id);
            }
        }

        let distinct: HashSet<_> = claimed.iter().collect();
        assert_eq!(claimed.len(), 5);
        assert_eq!(distinct.len(), 5);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_claims_across_connections() {
        let path = std::env::temp_dir().join(format!("arka-claim-{}.db", new_job_id()));
        let db = Database::new(DbConfig::new(&path).max_connections(4))
            .await
            .unwrap();
        let repo = db.print_jobs();

        for i in 0..6 {
            repo.submit(sale(&format!("pos-{}", i))).await.unwrap();
        }

        let handles: Vec<_> = (0..10)
            .map(|i| {
                let repo = repo.clone();
                tokio::spawn(async move { repo.claim_next(&format!("w{}", i)).await })
            })
            .collect();

        let mut claimed = Vec::new();
        for handle in handles {
            if let Some(job) = handle.await.unwrap().unwrap() {
                claimed.push(job.id);
            }
        }
        let distinct: HashSet<_> = claimed.iter().collect();

        db.close().await;
        for suffix in ["", "-wal", "-shm"] {
            let _ = std::fs::remove_file(format!("{}{}", path.display(), suffix));
        }

        assert_eq!(claimed.len(), 6);
        assert_eq!(distinct.len(), 6);
    }

    #[tokio::test]
    async fn test_mark_complete_is_idempotent() {
        let db = test_db().await;
        let repo = db.print_jobs();
        let job = repo.submit(sale("pos-1")).await.unwrap();
        repo.claim_next("w1").await.unwrap();

        assert!(repo.mark_complete(&job.id).await.unwrap());
        assert!(!repo.mark_complete(&job.id).await.unwrap());

        let err = repo.mark_failed(&job.id, "late failure").await.unwrap_err();
        assert!(matches!(
            err,
            DbError::InvalidTransition {
                from: JobStatus::Completed,
                to: JobStatus::Failed,
                ..
            }
        ));

        let stored = repo.get(&job.id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Completed);
        assert!(stored.error.is_none());
        assert!(stored.completed_at.is_some());
    }

    #[tokio::test]
    async fn test_mark_failed_keeps_first_error() {
        let db = test_db().await;
        let repo = db.print_jobs();
        let job = repo.submit(sale("pos-1")).await.unwrap();
        repo.claim_next("w1").await.unwrap();

        assert!(repo.mark_failed(&job.id, "paper out").await.unwrap());
        assert!(!repo.mark_failed(&job.id, "second").await.unwrap());
        assert!(repo.mark_complete(&job.id).await.is_err());

        let stored = repo.get(&job.id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Failed);
        assert_eq!(stored.error.as_deref(), Some("paper out"));
    }

    #[tokio::test]
    async fn test_mark_requires_claim() {
        let db = test_db().await;
        let repo = db.print_jobs();
        let job = repo.submit(sale("pos-1")).await.unwrap();

        assert!(matches!(
            repo.mark_complete(&job.id).await,
            Err(DbError::InvalidTransition {
                from: JobStatus::Pending,
                ..
            })
        ));
        assert!(matches!(
            repo.mark_complete("nope").await,
            Err(DbError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_cleanup_only_removes_old_finished_jobs() {
        let db = test_db().await;
        let repo = db.print_jobs();

        let old_done = repo.submit(sale("pos-1")).await.unwrap();
        let old_failed = repo.submit(sale("pos-2")).await.unwrap();
        let recent_done = repo.submit(sale("pos-3")).await.unwrap();
        let claimed = repo.submit(sale("pos-4")).await.unwrap();
        let pending = repo.submit(sale("pos-5")).await.unwrap();

        repo.claim_next("w1").await.unwrap();
        repo.claim_next("w1").await.unwrap();
        repo.claim_next("w1").await.unwrap();
        repo.claim_next("w1").await.unwrap();
        repo.mark_complete(&old_done.id).await.unwrap();
        repo.mark_failed(&old_failed.id, "x").await.unwrap();
        repo.mark_complete(&recent_done.id).await.unwrap();

        backdate_completion(&db, &old_done.id, 10).await;
        backdate_completion(&db, &old_failed.id, 8).await;
        backdate_completion(&db, &recent_done.id, 2).await;

        assert_eq!(repo.cleanup(7).await.unwrap(), 2);

        assert!(repo.get(&old_done.id).await.unwrap().is_none());
        assert!(repo.get(&old_failed.id).await.unwrap().is_none());
        assert!(repo.get(&recent_done.id).await.unwrap().is_some());
        assert!(repo.get(&claimed.id).await.unwrap().is_some());
        assert!(repo.get(&pending.id).await.unwrap().is_some());

        // Even a zero-day window never touches unfinished work
        repo.cleanup(0).await.unwrap();
        assert!(repo.get(&claimed.id).await.unwrap().is_some());
        assert!(repo.get(&pending.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_requeue_stale_claims() {
        let db = test_db().await;
        let repo = db.print_jobs();
        let job = repo.submit(sale("pos-1")).await.unwrap();
        repo.claim_next("crashed-worker").await.unwrap();

        assert_eq!(repo.requeue_stale(Duration::hours(1)).await.unwrap(), 0);
        assert_eq!(repo.requeue_stale(Duration::zero()).await.unwrap(), 1);

        let stored = repo.get(&job.id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Pending);
        assert!(stored.claimed_by.is_none());

        let again = repo.claim_next("w2").await.unwrap().unwrap();
        assert_eq!(again.id, job.id);
        assert_eq!(again.attempts, 2);
    }

    #[tokio::test]
    async fn test_stats() {
        let db = test_db().await;
        let repo = db.print_jobs();

        assert_eq!(repo.stats().await.unwrap(), QueueStats::default());

        let a = repo.submit(sale("pos-1")).await.unwrap();
        repo.submit(sale("pos-2")).await.unwrap();
        repo.submit(sale("pos-3")).await.unwrap();
        repo.claim_next("w1").await.unwrap();
        repo.mark_complete(&a.id).await.unwrap();
        repo.claim_next("w1").await.unwrap();

        let stats = repo.stats().await.unwrap();
        assert_eq!(stats.pending, 1);
        assert_eq!(stats.claimed, 1);
        assert_eq!(stats.completed, 1);
        assert_eq!(stats.failed, 0);
        assert!(stats.oldest_pending_age_secs.is_some());
    }
}
