//! # Daily Reports
//!
//! X-reports print straight away. Z-reports close the fiscal day, so they
//! are refused while any blocking condition is present.
//!
//! ```text
//!   Z-report:  ladder ──► status ──► still open? ladder again ──► status
//!                                        │
//!                     blockers found ────┴──► ReportBlocked([...])   (no print)
//!                     none           ───────► print_daily_report(Z)
//! ```

use std::fmt;

use serde::Serialize;
use tracing::{info, warn};

use crate::config::FiscalConfig;
use crate::device::{DeviceSession, DeviceStatus, ReportMode};
use crate::error::{FiscalError, FiscalResult};
use crate::pool::ConnectionPool;
use crate::recovery::ensure_receipt_closed;

/// A condition that forbids printing a Z-report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ReportBlocker {
    ReportSumOverflow,
    InvalidDate,
    JournalNearFull,
    JournalFull,
    FiscalMemoryNearFull,
    FiscalMemoryFull,
    NonFiscalReceiptOpen,
    FiscalReceiptOpen,
    PaperOut,
    CoverOpen,
}

impl fmt::Display for ReportBlocker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            ReportBlocker::ReportSumOverflow => "daily report sums overflowed",
            ReportBlocker::InvalidDate => "device date is invalid",
            ReportBlocker::JournalNearFull => "electronic journal is nearly full",
            ReportBlocker::JournalFull => "electronic journal is full",
            ReportBlocker::FiscalMemoryNearFull => "fiscal memory is nearly full",
            ReportBlocker::FiscalMemoryFull => "fiscal memory is full",
            ReportBlocker::NonFiscalReceiptOpen => "a non-fiscal receipt is still open",
            ReportBlocker::FiscalReceiptOpen => "a fiscal receipt is still open",
            ReportBlocker::PaperOut => "printer is out of paper",
            ReportBlocker::CoverOpen => "printer cover is open",
        };
        f.write_str(text)
    }
}

/// Blocking conditions present in `status`.
///
/// An exceeded 24-hour period is not a blocker; a Z-report is what clears it.
pub fn blockers_from_status(status: &DeviceStatus) -> Vec<ReportBlocker> {
    let checks = [
        (status.report_sum_overflow, ReportBlocker::ReportSumOverflow),
        (status.invalid_date, ReportBlocker::InvalidDate),
        (status.journal_near_full, ReportBlocker::JournalNearFull),
        (status.journal_full, ReportBlocker::JournalFull),
        (status.fiscal_memory_near_full, ReportBlocker::FiscalMemoryNearFull),
        (status.fiscal_memory_full, ReportBlocker::FiscalMemoryFull),
        (status.non_fiscal_receipt_open, ReportBlocker::NonFiscalReceiptOpen),
        (status.fiscal_receipt_open, ReportBlocker::FiscalReceiptOpen),
        (status.paper_out, ReportBlocker::PaperOut),
        (status.cover_open, ReportBlocker::CoverOpen),
    ];

    checks
        .into_iter()
        .filter_map(|(set, blocker)| set.then_some(blocker))
        .collect()
}

/// Prints X and Z reports.
pub struct ReportController<'a> {
    pool: &'a ConnectionPool,
    config: &'a FiscalConfig,
}

impl<'a> ReportController<'a> {
    pub fn new(pool: &'a ConnectionPool, config: &'a FiscalConfig) -> Self {
        ReportController { pool, config }
    }

    /// Informational snapshot. Never queued.
    pub async fn print_x_report(&self) -> FiscalResult<()> {
        let session = self.pool.session().await?;
        session
            .print_daily_report(ReportMode::X)
            .await
            .map_err(|e| FiscalError::step("print_x_report", e))?;
        self.pool.mark_healthy().await;
        info!("X-report printed");
        Ok(())
    }

    /// Closes the fiscal day.
    ///
    /// ## Returns
    /// * `Err(ReportBlocked)` - One or more blockers; nothing was printed
    pub async fn print_z_report(&self) -> FiscalResult<()> {
        let session = self.pool.session().await?;

        self.recover(&session).await?;
        let mut status = self.read_status(&session).await?;

        if status.fiscal_receipt_open {
            warn!("Receipt survived recovery, trying once more before Z-report");
            self.recover(&session).await?;
            status = self.read_status(&session).await?;
        }

        let blockers = blockers_from_status(&status);
        if !blockers.is_empty() {
            warn!(?blockers, "Z-report blocked");
            return Err(FiscalError::ReportBlocked(blockers));
        }

        session
            .print_daily_report(ReportMode::Z)
            .await
            .map_err(|e| FiscalError::step("print_z_report", e))?;
        self.pool.mark_healthy().await;
        info!("Z-report printed");
        Ok(())
    }

    /// A failed ladder is reported through the blocker list, not as an error.
    async fn recover(&self, session: &DeviceSession) -> FiscalResult<()> {
        match ensure_receipt_closed(session, &self.config.recovery).await {
            Ok(_) => Ok(()),
            Err(FiscalError::RecoveryFailed) => {
                warn!("Recovery failed before Z-report");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn read_status(&self, session: &DeviceSession) -> FiscalResult<DeviceStatus> {
        session
            .read_status()
            .await
            .map_err(|e| FiscalError::step("read_status", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::DeviceError;
    use crate::simulator::{SimOp, SimulatedPrinter, SimulatorFactory};
    use arka_core::Money;
    use std::sync::Arc;

    async fn setup() -> (Arc<SimulatedPrinter>, ConnectionPool, FiscalConfig) {
        let printer = Arc::new(SimulatedPrinter::new());
        let mut config = FiscalConfig::default();
        config.recovery.settle_delay_ms = 1;
        let pool = ConnectionPool::new(
            Arc::new(SimulatorFactory::new(printer.clone())),
            config.gateway.clone(),
            config.device.clone(),
            config.pool.clone(),
        );
        pool.connect_server().await.unwrap();
        pool.connect_printer().await.unwrap();
        (printer, pool, config)
    }

    #[test]
    fn test_period_exceeded_is_not_a_blocker() {
        let status = DeviceStatus {
            period_exceeded_24h: true,
            ..DeviceStatus::default()
        };
        assert!(blockers_from_status(&status).is_empty());

        let status = DeviceStatus {
            paper_out: true,
            journal_full: true,
            ..DeviceStatus::default()
        };
        assert_eq!(
            blockers_from_status(&status),
            vec![ReportBlocker::JournalFull, ReportBlocker::PaperOut]
        );
    }

    #[tokio::test]
    async fn test_x_report() {
        let (printer, pool, config) = setup().await;
        ReportController::new(&pool, &config)
            .print_x_report()
            .await
            .unwrap();
        assert_eq!(printer.report_counts(), (1, 0));
    }

    #[tokio::test]
    async fn test_z_report_closes_left_open_receipt_first() {
        let (printer, pool, config) = setup().await;
        printer.leave_receipt_open(Money::from_cents(250));

        ReportController::new(&pool, &config)
            .print_z_report()
            .await
            .unwrap();

        assert_eq!(printer.report_counts(), (0, 1));
        assert_eq!(printer.printed_receipts().len(), 1);
    }

    #[tokio::test]
    async fn test_blocker_vetoes_z_report() {
        let (printer, pool, config) = setup().await;
        printer.set_status(DeviceStatus {
            fiscal_memory_near_full: true,
            invalid_date: true,
            ..DeviceStatus::default()
        });

        let err = ReportController::new(&pool, &config)
            .print_z_report()
            .await
            .unwrap_err();

        match err {
            FiscalError::ReportBlocked(blockers) => assert_eq!(
                blockers,
                vec![ReportBlocker::InvalidDate, ReportBlocker::FiscalMemoryNearFull]
            ),
            other => panic!("expected ReportBlocked, got {other:?}"),
        }
        assert_eq!(printer.call_count(SimOp::DailyReport), 0);
    }

    #[tokio::test]
    async fn test_unrecoverable_receipt_blocks_z_report() {
        let (printer, pool, config) = setup().await;
        printer.leave_receipt_open(Money::from_cents(250));
        for op in [SimOp::Pay, SimOp::CloseReceipt, SimOp::DirectCommand] {
            printer.fail_always(op, DeviceError::rejected("refused"));
        }

        let err = ReportController::new(&pool, &config)
            .print_z_report()
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            FiscalError::ReportBlocked(ref b) if b == &vec![ReportBlocker::FiscalReceiptOpen]
        ));
        assert_eq!(printer.call_count(SimOp::DailyReport), 0);
        // Two full ladder passes.
        assert_eq!(printer.call_count(SimOp::DirectCommand), 2);
    }
}
