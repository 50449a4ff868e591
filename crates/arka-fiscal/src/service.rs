//! # Fiscal Service
//!
//! The one object that owns the printer. The worker and the operator routes
//! both go through it, and the device lock keeps their operations from
//! interleaving on the wire.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  PrintWorker ──execute_job──┐                                           │
//! │                              ├──► device lock ──► ConnectionPool        │
//! │  /printer/* routes ─────────┘          │                                │
//! │                                        ├──► ReceiptController           │
//! │                                        ├──► ReportController            │
//! │                                        └──► HeaderSync                  │
//! │                                                                         │
//! │  Transport failures reset the pool so the next call reconnects fully.  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::future::Future;
use std::sync::Arc;

use arka_core::{JobType, PrintJob};
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::config::FiscalConfig;
use crate::device::{DriverFactory, ReceiptKind};
use crate::error::FiscalResult;
use crate::header::{CompanySettingsSource, HeaderSync, HeaderSyncOutcome};
use crate::pool::{ConnectPath, ConnectionPool, PoolSnapshot};
use crate::receipt::{ReceiptController, ReceiptOutcome};
use crate::recovery::{ensure_receipt_closed, RecoveryOutcome};
use crate::report::ReportController;

/// What a job produced on the printer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase", tag = "type")]
pub enum JobOutcome {
    Receipt(ReceiptOutcome),
    ZReport,
}

pub struct FiscalService {
    pool: ConnectionPool,
    config: FiscalConfig,
    company: Arc<dyn CompanySettingsSource>,
    device_lock: Mutex<()>,
}

impl FiscalService {
    pub fn new(
        factory: Arc<dyn DriverFactory>,
        config: FiscalConfig,
        company: Arc<dyn CompanySettingsSource>,
    ) -> Self {
        let pool = ConnectionPool::new(
            factory,
            config.gateway.clone(),
            config.device.clone(),
            config.pool.clone(),
        );

        FiscalService {
            pool,
            config,
            company,
            device_lock: Mutex::new(()),
        }
    }

    pub fn pool(&self) -> &ConnectionPool {
        &self.pool
    }

    pub fn config(&self) -> &FiscalConfig {
        &self.config
    }

    // =========================================================================
    // Operations
    // =========================================================================

    /// Connects the gateway if needed, then the printer.
    pub async fn ensure_connected(&self) -> FiscalResult<ConnectPath> {
        self.locked("ensure_connected", move || self.connect_locked()).await
    }

    /// Prints one claimed job.
    pub async fn execute_job(&self, job: &PrintJob) -> FiscalResult<JobOutcome> {
        self.locked("execute_job", move || async move {
            self.connect_locked().await?;

            match job.job_type {
                JobType::Receipt => ReceiptController::new(&self.pool, &self.config)
                    .execute(ReceiptKind::Sale, &job.payload)
                    .await
                    .map(JobOutcome::Receipt),
                JobType::Storno => ReceiptController::new(&self.pool, &self.config)
                    .execute(ReceiptKind::Storno, &job.payload)
                    .await
                    .map(JobOutcome::Receipt),
                JobType::ZReport => ReportController::new(&self.pool, &self.config)
                    .print_z_report()
                    .await
                    .map(|()| JobOutcome::ZReport),
            }
        })
        .await
    }

    /// Operator action: informational X-report.
    pub async fn print_x_report(&self) -> FiscalResult<()> {
        self.locked("print_x_report", move || async move {
            self.connect_locked().await?;
            ReportController::new(&self.pool, &self.config)
                .print_x_report()
                .await
        })
        .await
    }

    /// Operator action: run the recovery ladder now.
    pub async fn force_close(&self) -> FiscalResult<RecoveryOutcome> {
        self.locked("force_close", move || async move {
            self.connect_locked().await?;
            let session = self.pool.session().await?;
            let outcome = ensure_receipt_closed(&session, &self.config.recovery).await?;
            self.pool.mark_healthy().await;
            info!(?outcome, "Force close finished");
            Ok(outcome)
        })
        .await
    }

    /// Pushes the header if the company record changed.
    pub async fn sync_header(&self) -> FiscalResult<HeaderSyncOutcome> {
        self.locked("sync_header", move || async move {
            self.connect_locked().await?;
            HeaderSync::new(&self.pool, &self.config)
                .sync(self.company.as_ref())
                .await
        })
        .await
    }

    pub async fn status(&self) -> PoolSnapshot {
        self.pool.snapshot().await
    }

    // =========================================================================
    // Internals
    // =========================================================================

    /// Runs `op` under the device lock and resets the pool on transport errors.
    async fn locked<T, F, Fut>(&self, name: &'static str, op: F) -> FiscalResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = FiscalResult<T>>,
    {
        let _device = self.device_lock.lock().await;
        let result = op().await;

        if let Err(e) = &result {
            if e.is_retryable() {
                warn!(operation = name, error = %e, "Transport failure, resetting printer connection");
                self.pool.reset().await;
            }
        }

        result
    }

    /// Caller holds the device lock.
    async fn connect_locked(&self) -> FiscalResult<ConnectPath> {
        if !self.pool.is_server_connected().await {
            self.pool.connect_server().await?;
        }

        let path = self.pool.connect_printer().await?;

        if path != ConnectPath::Fast {
            if let Err(e) = HeaderSync::new(&self.pool, &self.config)
                .sync(self.company.as_ref())
                .await
            {
                warn!(error = %e, "Header sync after connect failed");
            }
        }

        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::DeviceError;
    use crate::error::FiscalError;
    use crate::header::StaticCompanySource;
    use crate::simulator::{SimOp, SimulatedPrinter, SimulatorFactory};
    use arka_core::{CompanySettings, JobPayload, LineItem, NewPrintJob, PaymentMethod, Quantity};
    use chrono::Utc;

    fn service(printer: Arc<SimulatedPrinter>) -> FiscalService {
        let mut config = FiscalConfig::default();
        config.recovery.settle_delay_ms = 1;
        config.recovery.retry_backoff_ms = 5;
        let company = CompanySettings {
            name: "Arka Market".to_string(),
            ..CompanySettings::default()
        };
        FiscalService::new(
            Arc::new(SimulatorFactory::new(printer)),
            config,
            Arc::new(StaticCompanySource::new(company)),
        )
    }

    fn receipt_job() -> PrintJob {
        let payload = JobPayload::with_items(
            vec![LineItem::new("Kafe", 100, Quantity::from_units(1))],
            PaymentMethod::Cash,
        );
        PrintJob::from_new(
            NewPrintJob::receipt("pos-1", payload),
            "job-1".to_string(),
            Utc::now(),
        )
    }

    #[tokio::test]
    async fn test_first_connect_syncs_header() {
        let printer = Arc::new(SimulatedPrinter::new());
        let service = service(printer.clone());

        assert_eq!(service.ensure_connected().await.unwrap(), ConnectPath::Slow);
        assert_eq!(printer.header_lines()[&1], "Arka Market");

        printer.clear_calls();
        assert_eq!(service.ensure_connected().await.unwrap(), ConnectPath::Fast);
        assert_eq!(printer.call_count(SimOp::ProgramHeader), 0);
    }

    #[tokio::test]
    async fn test_failed_header_sync_does_not_fail_connect() {
        let printer = Arc::new(SimulatedPrinter::new());
        let service = service(printer.clone());
        printer.fail_always(SimOp::ProgramHeader, DeviceError::rejected("header locked"));

        assert_eq!(service.ensure_connected().await.unwrap(), ConnectPath::Slow);

        let snapshot = service.status().await;
        assert!(snapshot.printer_connected);
        assert!(snapshot.header_fingerprint.is_none());
        assert!(printer.header_lines().is_empty());

        // Once the device accepts writes, an explicit sync pushes the header.
        printer.clear_faults();
        assert!(matches!(
            service.sync_header().await.unwrap(),
            HeaderSyncOutcome::Pushed { .. }
        ));
        assert!(service.status().await.header_fingerprint.is_some());
    }

    #[tokio::test]
    async fn test_execute_receipt_job() {
        let printer = Arc::new(SimulatedPrinter::new());
        let service = service(printer.clone());

        let outcome = service.execute_job(&receipt_job()).await.unwrap();
        assert!(matches!(outcome, JobOutcome::Receipt(ref r) if r.item_count == 1));
        assert_eq!(printer.printed_receipts().len(), 1);
    }

    #[tokio::test]
    async fn test_transport_failure_resets_pool() {
        let printer = Arc::new(SimulatedPrinter::new());
        let service = service(printer.clone());
        service.ensure_connected().await.unwrap();

        printer.fail_next(SimOp::SellItem, DeviceError::transport("cable pulled"));
        let err = service.execute_job(&receipt_job()).await.unwrap_err();
        assert!(err.is_retryable());

        let snapshot = service.status().await;
        assert!(!snapshot.server_connected);
        assert!(snapshot.descriptor.is_none());
        assert!(snapshot.header_fingerprint.is_none());
    }

    #[tokio::test]
    async fn test_non_transport_failure_keeps_pool() {
        let printer = Arc::new(SimulatedPrinter::new().with_passwords(&["never"]));
        let service = service(printer.clone());

        let err = service.execute_job(&receipt_job()).await.unwrap_err();
        assert!(matches!(err, FiscalError::OperatorLoginFailed { .. }));
        assert!(service.status().await.printer_connected);
    }

    #[tokio::test]
    async fn test_force_close_and_x_report() {
        let printer = Arc::new(SimulatedPrinter::new());
        let service = service(printer.clone());
        printer.set_phantom_receipt_open(true);

        // Header sync on connect already runs the ladder.
        assert_eq!(
            service.force_close().await.unwrap(),
            RecoveryOutcome::AlreadyClosed
        );
        service.print_x_report().await.unwrap();
        assert_eq!(printer.report_counts(), (1, 0));
    }
}
