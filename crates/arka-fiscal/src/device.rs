//! # Device Capability Interface
//!
//! The fixed set of primitives a vendor fiscal driver exposes, and the async
//! session wrapper the rest of this crate talks to.
//!
//! ## Layering
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  controllers (receipt, report, recovery, header)                       │
//! │       │  async, one call at a time                                     │
//! │       ▼                                                                 │
//! │  DeviceSession ──spawn_blocking──► Arc<dyn FiscalDevice>                │
//! │                                         │  synchronous vendor calls     │
//! │                                         ▼                               │
//! │                              vendor adapter / SimulatedPrinter          │
//! │                                                                         │
//! │  Errors come back as DeviceError { kind, code, message }; callers      │
//! │  branch on `kind`, never on message text.                              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::fmt;
use std::sync::Arc;

use arka_core::{Money, Quantity};
use serde::Serialize;
use thiserror::Error;

// =============================================================================
// Device Errors
// =============================================================================

/// Result type for raw device calls.
pub type DeviceResult<T> = Result<T, DeviceError>;

/// What went wrong on the device side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceErrorKind {
    /// Gateway or serial link failure.
    Transport,
    /// Scan found no fiscal printer.
    DeviceNotFound,
    /// A fiscal receipt is already open.
    ReceiptAlreadyOpen,
    /// A non-fiscal receipt is open and blocks the command.
    NonFiscalReceiptOpen,
    /// Operator password rejected.
    InvalidPassword,
    /// Command not available on this firmware.
    Unsupported,
    /// Any other refusal.
    Rejected,
}

impl DeviceErrorKind {
    /// Maps a vendor driver error code onto a kind.
    ///
    /// ```text
    ///   -1 .. -3     port closed / timeout / write failed   Transport
    ///   -4           no device answered the scan            DeviceNotFound
    ///   -101         fiscal receipt already open            ReceiptAlreadyOpen
    ///   -102         non-fiscal receipt open                NonFiscalReceiptOpen
    ///   -103         wrong operator password                InvalidPassword
    ///   -104, -105   unknown / unsupported command          Unsupported
    ///   anything else                                       Rejected
    /// ```
    pub fn from_vendor_code(code: i32) -> Self {
        match code {
            -3..=-1 => DeviceErrorKind::Transport,
            -4 => DeviceErrorKind::DeviceNotFound,
            -101 => DeviceErrorKind::ReceiptAlreadyOpen,
            -102 => DeviceErrorKind::NonFiscalReceiptOpen,
            -103 => DeviceErrorKind::InvalidPassword,
            -105..=-104 => DeviceErrorKind::Unsupported,
            _ => DeviceErrorKind::Rejected,
        }
    }
}

impl fmt::Display for DeviceErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            DeviceErrorKind::Transport => "transport error",
            DeviceErrorKind::DeviceNotFound => "device not found",
            DeviceErrorKind::ReceiptAlreadyOpen => "receipt already open",
            DeviceErrorKind::NonFiscalReceiptOpen => "non-fiscal receipt open",
            DeviceErrorKind::InvalidPassword => "invalid password",
            DeviceErrorKind::Unsupported => "unsupported command",
            DeviceErrorKind::Rejected => "rejected",
        };
        f.write_str(text)
    }
}

/// Error returned by a vendor adapter.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: {message}")]
pub struct DeviceError {
    pub kind: DeviceErrorKind,
    /// Raw vendor code, when the driver supplied one.
    pub code: Option<i32>,
    /// Raw vendor message.
    pub message: String,
}

impl DeviceError {
    pub fn new(kind: DeviceErrorKind, message: impl Into<String>) -> Self {
        DeviceError {
            kind,
            code: None,
            message: message.into(),
        }
    }

    /// Builds an error from a vendor code using the single mapping table.
    pub fn from_vendor(code: i32, message: impl Into<String>) -> Self {
        DeviceError {
            kind: DeviceErrorKind::from_vendor_code(code),
            code: Some(code),
            message: message.into(),
        }
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::new(DeviceErrorKind::Transport, message)
    }

    pub fn unsupported(message: impl Into<String>) -> Self {
        Self::new(DeviceErrorKind::Unsupported, message)
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        Self::new(DeviceErrorKind::Rejected, message)
    }

    pub fn is_transport(&self) -> bool {
        matches!(
            self.kind,
            DeviceErrorKind::Transport | DeviceErrorKind::DeviceNotFound
        )
    }
}

// =============================================================================
// Device Data
// =============================================================================

/// Status flags read from the device.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceStatus {
    pub fiscal_receipt_open: bool,
    pub non_fiscal_receipt_open: bool,
    pub paper_out: bool,
    pub cover_open: bool,
    pub report_sum_overflow: bool,
    pub invalid_date: bool,
    pub journal_near_full: bool,
    pub journal_full: bool,
    pub fiscal_memory_near_full: bool,
    pub fiscal_memory_full: bool,
    /// More than 24 hours since the last Z-report.
    pub period_exceeded_24h: bool,
}

/// Snapshot of the receipt currently open on the device.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReceiptInfo {
    pub is_open: bool,
    pub item_count: u32,
    /// Amount still owed.
    pub subtotal: Money,
    /// Payment covers the total; only close is left.
    pub payment_finalized: bool,
}

/// Where the printer is attached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceDescriptor {
    pub port: String,
    pub baud: u32,
}

/// The open call's sale/storno flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ReceiptKind {
    Sale,
    Storno,
}

impl fmt::Display for ReceiptKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReceiptKind::Sale => f.write_str("sale"),
            ReceiptKind::Storno => f.write_str("storno"),
        }
    }
}

/// Daily report mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportMode {
    /// Informational snapshot.
    X,
    /// Closes the fiscal day.
    Z,
}

// =============================================================================
// Capability Interface
// =============================================================================

/// Primitives exposed by a vendor fiscal driver.
///
/// Calls are synchronous and may block on serial I/O; [`DeviceSession`] moves
/// them onto tokio's blocking pool.
pub trait FiscalDevice: Send + Sync {
    fn read_status(&self) -> DeviceResult<DeviceStatus>;

    fn read_current_receipt_info(&self) -> DeviceResult<ReceiptInfo>;

    fn open_receipt(&self, operator_id: u32, password: &str, kind: ReceiptKind)
        -> DeviceResult<()>;

    fn sell_item(
        &self,
        name: &str,
        vat_class: &str,
        price: Money,
        discount: Money,
        quantity: Quantity,
    ) -> DeviceResult<()>;

    /// Returns the amount still owed on the open receipt.
    fn subtotal(&self) -> DeviceResult<Money>;

    fn pay(&self, payment_type: u8, amount: Money) -> DeviceResult<()>;

    /// Settles the whole remaining amount with one payment type.
    fn pay_exact(&self, payment_type: u8) -> DeviceResult<()>;

    fn close_receipt(&self) -> DeviceResult<()>;

    fn close_non_fiscal_receipt(&self) -> DeviceResult<()>;

    fn print_daily_report(&self, mode: ReportMode) -> DeviceResult<()>;

    /// Programs header line `line` (1-based).
    fn program_header_line(&self, line: u8, text: &str) -> DeviceResult<()>;

    fn direct_command(&self, raw: &[u8]) -> DeviceResult<Vec<u8>>;

    /// Scans ports. `Ok(None)` means nothing answered.
    fn find_device(&self) -> DeviceResult<Option<DeviceDescriptor>>;

    fn set_serial_settings(&self, port: &str, baud: u32, persistent: bool) -> DeviceResult<()>;

    fn set_server_settings(&self, host: &str, port: u16) -> DeviceResult<()>;
}

/// Creates driver handles. The vendor adapter seam.
pub trait DriverFactory: Send + Sync {
    fn create(&self) -> DeviceResult<Arc<dyn FiscalDevice>>;
}

// =============================================================================
// Device Session
// =============================================================================

/// Async facade over a driver handle.
///
/// Cloning shares the handle. Every method runs the vendor call on the
/// blocking pool so the async caller is suspended rather than blocked.
#[derive(Clone)]
pub struct DeviceSession {
    handle: Arc<dyn FiscalDevice>,
}

impl fmt::Debug for DeviceSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceSession").finish_non_exhaustive()
    }
}

impl DeviceSession {
    pub fn new(handle: Arc<dyn FiscalDevice>) -> Self {
        DeviceSession { handle }
    }

    pub fn handle(&self) -> &Arc<dyn FiscalDevice> {
        &self.handle
    }

    async fn call<T, F>(&self, op: &'static str, f: F) -> DeviceResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&dyn FiscalDevice) -> DeviceResult<T> + Send + 'static,
    {
        let handle = Arc::clone(&self.handle);
        tokio::task::spawn_blocking(move || f(handle.as_ref()))
            .await
            .map_err(|e| DeviceError::transport(format!("{} did not complete: {}", op, e)))?
    }

    pub async fn read_status(&self) -> DeviceResult<DeviceStatus> {
        self.call("read_status", |d| d.read_status()).await
    }

    pub async fn read_current_receipt_info(&self) -> DeviceResult<ReceiptInfo> {
        self.call("read_current_receipt_info", |d| d.read_current_receipt_info())
            .await
    }

    pub async fn open_receipt(
        &self,
        operator_id: u32,
        password: &str,
        kind: ReceiptKind,
    ) -> DeviceResult<()> {
        let password = password.to_string();
        self.call("open_receipt", move |d| {
            d.open_receipt(operator_id, &password, kind)
        })
        .await
    }

    pub async fn sell_item(
        &self,
        name: &str,
        vat_class: &str,
        price: Money,
        discount: Money,
        quantity: Quantity,
    ) -> DeviceResult<()> {
        let name = name.to_string();
        let vat_class = vat_class.to_string();
        self.call("sell_item", move |d| {
            d.sell_item(&name, &vat_class, price, discount, quantity)
        })
        .await
    }

    pub async fn subtotal(&self) -> DeviceResult<Money> {
        self.call("subtotal", |d| d.subtotal()).await
    }

    pub async fn pay(&self, payment_type: u8, amount: Money) -> DeviceResult<()> {
        self.call("pay", move |d| d.pay(payment_type, amount)).await
    }

    pub async fn pay_exact(&self, payment_type: u8) -> DeviceResult<()> {
        self.call("pay_exact", move |d| d.pay_exact(payment_type))
            .await
    }

    pub async fn close_receipt(&self) -> DeviceResult<()> {
        self.call("close_receipt", |d| d.close_receipt()).await
    }

    pub async fn close_non_fiscal_receipt(&self) -> DeviceResult<()> {
        self.call("close_non_fiscal_receipt", |d| d.close_non_fiscal_receipt())
            .await
    }

    pub async fn print_daily_report(&self, mode: ReportMode) -> DeviceResult<()> {
        self.call("print_daily_report", move |d| d.print_daily_report(mode))
            .await
    }

    pub async fn program_header_line(&self, line: u8, text: &str) -> DeviceResult<()> {
        let text = text.to_string();
        self.call("program_header_line", move |d| {
            d.program_header_line(line, &text)
        })
        .await
    }

    pub async fn direct_command(&self, raw: &[u8]) -> DeviceResult<Vec<u8>> {
        let raw = raw.to_vec();
        self.call("direct_command", move |d| d.direct_command(&raw))
            .await
    }

    pub async fn find_device(&self) -> DeviceResult<Option<DeviceDescriptor>> {
        self.call("find_device", |d| d.find_device()).await
    }

    pub async fn set_serial_settings(
        &self,
        port: &str,
        baud: u32,
        persistent: bool,
    ) -> DeviceResult<()> {
        let port = port.to_string();
        self.call("set_serial_settings", move |d| {
            d.set_serial_settings(&port, baud, persistent)
        })
        .await
    }

    pub async fn set_server_settings(&self, host: &str, port: u16) -> DeviceResult<()> {
        let host = host.to_string();
        self.call("set_server_settings", move |d| {
            d.set_server_settings(&host, port)
        })
        .await
    }

    /// True when status or the current receipt info says a fiscal receipt is
    /// open. Receipt info that cannot be read is ignored.
    pub async fn fiscal_receipt_open(&self) -> DeviceResult<bool> {
        let status = self.read_status().await?;
        if status.fiscal_receipt_open {
            return Ok(true);
        }
        Ok(self
            .read_current_receipt_info()
            .await
            .map(|info| info.is_open)
            .unwrap_or(false))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vendor_code_mapping() {
        assert_eq!(DeviceErrorKind::from_vendor_code(-2), DeviceErrorKind::Transport);
        assert_eq!(DeviceErrorKind::from_vendor_code(-4), DeviceErrorKind::DeviceNotFound);
        assert_eq!(
            DeviceErrorKind::from_vendor_code(-101),
            DeviceErrorKind::ReceiptAlreadyOpen
        );
        assert_eq!(
            DeviceErrorKind::from_vendor_code(-103),
            DeviceErrorKind::InvalidPassword
        );
        assert_eq!(DeviceErrorKind::from_vendor_code(-105), DeviceErrorKind::Unsupported);
        assert_eq!(DeviceErrorKind::from_vendor_code(-999), DeviceErrorKind::Rejected);
        assert_eq!(DeviceErrorKind::from_vendor_code(7), DeviceErrorKind::Rejected);
    }

    #[test]
    fn test_device_error_display_keeps_raw_message() {
        let err = DeviceError::from_vendor(-101, "ERR 0x2A");
        assert_eq!(err.code, Some(-101));
        assert_eq!(err.to_string(), "receipt already open: ERR 0x2A");
    }
}
