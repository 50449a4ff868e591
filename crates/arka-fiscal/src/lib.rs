//! # arka-fiscal: Fiscal Printer Orchestration for Arka
//!
//! Drives a fiscal printer from a durable print queue. Everything that
//! touches the device lives here; the HTTP surface lives in the print agent.
//!
//! ## Architecture Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Fiscal Layer Architecture                        │
//! │                                                                         │
//! │  ┌──────────────────────────────────────────────────────────────────┐  │
//! │  │                     PrintWorker (background task)                │  │
//! │  │                                                                  │  │
//! │  │  claim_next ──► FiscalService::execute_job ──► mark result       │  │
//! │  └────────────────────────────┬─────────────────────────────────────┘  │
//! │                               │                                         │
//! │                               ▼                                         │
//! │  ┌──────────────────────────────────────────────────────────────────┐  │
//! │  │                 FiscalService (device lock)                      │  │
//! │  └──────┬───────────────┬───────────────┬───────────────┬───────────┘  │
//! │         ▼               ▼               ▼               ▼               │
//! │  ┌────────────┐  ┌────────────┐  ┌────────────┐  ┌────────────────┐    │
//! │  │ Connection │  │  Receipt   │  │  Report    │  │  HeaderSync    │    │
//! │  │ Pool       │  │ Controller │  │ Controller │  │                │    │
//! │  │            │  │            │  │            │  │ Fingerprinted  │    │
//! │  │ fast/medium│  │ credentials│  │ Z blockers │  │ header push    │    │
//! │  │ /slow path │  │ pay ladder │  │            │  │                │    │
//! │  └─────┬──────┘  └─────┬──────┘  └─────┬──────┘  └───────┬────────┘    │
//! │        └───────────────┴──── recovery ─┴─────────────────┘             │
//! │                               │                                         │
//! │                               ▼                                         │
//! │              DeviceSession ──► dyn FiscalDevice (vendor / simulator)   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//! - [`config`] - Layered agent configuration
//! - [`device`] - Vendor capability trait and the blocking-call session
//! - [`error`] - Fiscal error types and categories
//! - [`header`] - Receipt header sync
//! - [`pool`] - Gateway and printer connection state
//! - [`receipt`] - Sale and storno receipt printing
//! - [`recovery`] - Open-receipt recovery ladder
//! - [`report`] - X and Z reports
//! - [`service`] - Device-serialized entry point
//! - [`simulator`] - In-process printer with fault injection
//! - [`worker`] - Queue-draining background worker
//!
//! ## Usage
//!
//! ```rust,ignore
//! use arka_fiscal::{FiscalConfig, FiscalService, PrintWorker, LogStornoListener};
//!
//! let config = FiscalConfig::load(None)?;
//! let service = Arc::new(FiscalService::new(factory, config, company));
//!
//! let (worker, handle) = PrintWorker::new(service.clone(), db, Arc::new(LogStornoListener));
//! tokio::spawn(worker.run());
//!
//! // later
//! handle.shutdown().await?;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod config;
pub mod device;
pub mod error;
pub mod header;
pub mod pool;
pub mod receipt;
pub mod recovery;
pub mod report;
pub mod service;
pub mod simulator;
pub mod worker;

// =============================================================================
// Re-exports
// =============================================================================

pub use config::FiscalConfig;
pub use device::{
    DeviceDescriptor, DeviceError, DeviceErrorKind, DeviceSession, DeviceStatus, DriverFactory,
    FiscalDevice, ReceiptKind, ReportMode,
};
pub use error::{ErrorCategory, FiscalError, FiscalResult};
pub use header::{CompanySettingsSource, HeaderSyncOutcome, StaticCompanySource};
pub use pool::{ConnectPath, ConnectionPool, PoolSnapshot};
pub use receipt::{PaymentStrategy, ReceiptOutcome};
pub use recovery::RecoveryOutcome;
pub use report::ReportBlocker;
pub use service::{FiscalService, JobOutcome};
pub use simulator::{SimulatedPrinter, SimulatorFactory};
pub use worker::{LogStornoListener, PrintWorker, PrintWorkerHandle, StornoListener};
