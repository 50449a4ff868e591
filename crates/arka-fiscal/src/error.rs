//! # Fiscal Error Types
//!
//! Orchestration errors for the fiscal printer.
//!
//! ## Error Taxonomy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Fiscal Error Categories                           │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │   Transport     │  │ Protocol State  │  │     Credential          │ │
//! │  │                 │  │                 │  │                         │ │
//! │  │  ServerConn     │  │  receipt open   │  │  invalid password       │ │
//! │  │  DeviceNotFound │  │  non-fiscal open│  │  OperatorLoginFailed    │ │
//! │  │  DeviceSetup    │  │  (ladder fixes) │  │  (after K attempts)     │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │    Blocking     │  │    Terminal     │  │      Internal           │ │
//! │  │                 │  │                 │  │                         │ │
//! │  │  ReportBlocked  │  │  RecoveryFailed │  │  Config / Database      │ │
//! │  │  (itemized)     │  │  (power-cycle)  │  │  InvalidPayload         │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! │                                                                         │
//! │  Only Transport is retried by the worker (after a pool reset).         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use arka_db::DbError;
use thiserror::Error;

use crate::device::{DeviceError, DeviceErrorKind};
use crate::report::ReportBlocker;

/// Result type alias for fiscal operations.
pub type FiscalResult<T> = Result<T, FiscalError>;

/// Where an error sits in the handling taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Gateway unreachable, device missing, link dropped.
    Transport,
    /// Device in a state the ladder could not fix within its retries.
    ProtocolState,
    /// Every operator password was rejected.
    Credential,
    /// Status flags veto the operation until an operator acts.
    Blocking,
    /// Needs physical intervention.
    Terminal,
    Internal,
}

/// Fiscal orchestration error.
#[derive(Debug, Error)]
pub enum FiscalError {
    // =========================================================================
    // Connection Errors
    // =========================================================================
    /// Another connect attempt holds the guard.
    #[error("Connection in progress")]
    ConnectionInProgress,

    /// Gateway configuration or handle creation failed.
    #[error("Gateway connection failed: {0}")]
    ServerConnection(String),

    /// Scan found nothing.
    #[error("No fiscal printer found: {0}")]
    DeviceNotFound(String),

    /// Printer was found but serial setup or the verifying status read failed.
    #[error("Fiscal printer found on {port} but setup failed: {message}")]
    DeviceSetup { port: String, message: String },

    /// An operation needs a session that does not exist.
    #[error("Fiscal printer not connected")]
    NotConnected,

    // =========================================================================
    // Device Step Errors
    // =========================================================================
    /// A device call inside a receipt, report or header flow failed.
    #[error("{step} failed: {source}")]
    Step {
        step: &'static str,
        #[source]
        source: DeviceError,
    },

    /// Every configured operator password was rejected.
    #[error("Operator login failed after {attempts} attempt(s)")]
    OperatorLoginFailed { attempts: usize },

    /// The recovery ladder ran out of remedies.
    #[error("Auto-recovery failed: power-cycle the fiscal printer")]
    RecoveryFailed,

    /// Status flags forbid a Z-report.
    #[error("Z-report blocked: {}", format_blockers(.0))]
    ReportBlocked(Vec<ReportBlocker>),

    // =========================================================================
    // Internal Errors
    // =========================================================================
    /// The job payload could not be read.
    #[error("Invalid job payload: {0}")]
    InvalidPayload(String),

    #[error("Invalid fiscal configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Database(#[from] DbError),

    #[error("Internal error: {0}")]
    Internal(String),
}

fn format_blockers(blockers: &[ReportBlocker]) -> String {
    blockers
        .iter()
        .map(|b| b.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

impl FiscalError {
    /// Wraps a device error with the step that produced it.
    pub fn step(step: &'static str, source: DeviceError) -> Self {
        FiscalError::Step { step, source }
    }

    /// Returns the taxonomy bucket for this error.
    pub fn category(&self) -> ErrorCategory {
        match self {
            FiscalError::ConnectionInProgress
            | FiscalError::ServerConnection(_)
            | FiscalError::DeviceNotFound(_)
            | FiscalError::DeviceSetup { .. }
            | FiscalError::NotConnected => ErrorCategory::Transport,

            FiscalError::Step { source, .. } => match source.kind {
                DeviceErrorKind::Transport | DeviceErrorKind::DeviceNotFound => {
                    ErrorCategory::Transport
                }
                DeviceErrorKind::ReceiptAlreadyOpen | DeviceErrorKind::NonFiscalReceiptOpen => {
                    ErrorCategory::ProtocolState
                }
                DeviceErrorKind::InvalidPassword => ErrorCategory::Credential,
                DeviceErrorKind::Unsupported | DeviceErrorKind::Rejected => {
                    ErrorCategory::Internal
                }
            },

            FiscalError::OperatorLoginFailed { .. } => ErrorCategory::Credential,
            FiscalError::RecoveryFailed => ErrorCategory::Terminal,
            FiscalError::ReportBlocked(_) => ErrorCategory::Blocking,

            FiscalError::InvalidPayload(_)
            | FiscalError::Config(_)
            | FiscalError::Database(_)
            | FiscalError::Internal(_) => ErrorCategory::Internal,
        }
    }

    /// Returns true if reconnecting and trying again could succeed.
    pub fn is_retryable(&self) -> bool {
        self.category() == ErrorCategory::Transport
    }
}

impl From<toml::de::Error> for FiscalError {
    fn from(err: toml::de::Error) -> Self {
        FiscalError::Config(err.to_string())
    }
}

impl From<std::io::Error> for FiscalError {
    fn from(err: std::io::Error) -> Self {
        FiscalError::Config(err.to_string())
    }
}

impl From<arka_core::CoreError> for FiscalError {
    fn from(err: arka_core::CoreError) -> Self {
        FiscalError::InvalidPayload(err.to_string())
    }
}
