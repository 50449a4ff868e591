//! # arka-core: Pure Types for the Arka Fiscal Print Service
//!
//! Everything the print queue, the fiscal worker and the terminals agree on,
//! with zero I/O dependencies.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                     Arka Fiscal Print Data Flow                         │
//! │                                                                         │
//! │  Terminal ──submit──► print_jobs (arka-db) ──claim──► worker            │
//! │                                                        (arka-fiscal)    │
//! │                                                            │            │
//! │  ┌─────────────────────────────────────────────────────────▼────────┐  │
//! │  │                 ★ arka-core (THIS CRATE) ★                       │  │
//! │  │                                                                  │  │
//! │  │   ┌───────────┐  ┌───────────┐  ┌───────────┐  ┌────────────┐   │  │
//! │  │   │   types   │  │   money   │  │  header   │  │ validation │   │  │
//! │  │   │ PrintJob  │  │   Money   │  │ 4 lines + │  │ submission │   │  │
//! │  │   │ JobPayload│  │ Quantity  │  │fingerprint│  │   rules    │   │  │
//! │  │   └───────────┘  └───────────┘  └───────────┘  └────────────┘   │  │
//! │  │                                                                  │  │
//! │  │   NO I/O • NO DATABASE • NO DEVICE • PURE FUNCTIONS              │  │
//! │  └──────────────────────────────────────────────────────────────────┘  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`types`] - Print jobs, payloads, queue statistics, company settings
//! - [`money`] - Integer money and fixed-point quantities
//! - [`header`] - Canonical receipt header text and its fingerprint
//! - [`error`] - Domain error types
//! - [`validation`] - Submission validation
//!
//! ## Example Usage
//!
//! ```rust
//! use arka_core::money::{Money, Quantity};
//!
//! let price = Money::from_cents(250);
//! let qty = Quantity::from_units(3);
//! assert_eq!(price.times(qty).cents(), 750);
//! assert_eq!(price.to_device_string(), "2.50");
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod header;
pub mod money;
pub mod types;
pub mod validation;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use error::{CoreError, CoreResult, ValidationError};
pub use header::ReceiptHeader;
pub use money::{Money, Quantity};
pub use types::*;

// =============================================================================
// Crate-Level Constants
// =============================================================================

/// Queue priority for ordinary receipts and stornos. Lower runs sooner.
pub const DEFAULT_PRIORITY: i64 = 100;

/// Queue priority for Z-reports.
///
/// A Z-report closes the fiscal day; it jumps ahead of receipts already
/// waiting so the day boundary lands where the operator asked for it.
pub const ZREPORT_PRIORITY: i64 = 10;

/// Default retention window for finished jobs, in days.
pub const DEFAULT_RETENTION_DAYS: u32 = 7;

/// Number of header lines the canonical header uses.
pub const HEADER_LINES_IN_USE: usize = 4;

/// Maximum items accepted in a single receipt job.
pub const MAX_RECEIPT_ITEMS: usize = 500;
