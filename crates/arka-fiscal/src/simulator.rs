//! # Simulated Fiscal Printer
//!
//! In-memory [`FiscalDevice`] used by the print agent in simulation mode and
//! by the test suite.
//!
//! ## Model
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │   open_receipt ──► OpenReceipt { kind, items, paid }                   │
//! │        │                 │                                              │
//! │        │           sell_item / pay / pay_exact                          │
//! │        │                 │                                              │
//! │        ▼                 ▼                                              │
//! │   close_receipt: paid >= total → PrintedReceipt, else Rejected         │
//! │   cancel command: drops the receipt without printing                   │
//! │                                                                         │
//! │   phantom open: status says "receipt open" with nothing behind it;     │
//! │   any close or cancel clears it.                                       │
//! │                                                                         │
//! │   Faults: fail_next(op, err) queues one-shot errors,                   │
//! │           fail_always(op, err) fails every call until cleared.         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use arka_core::{Money, Quantity};

use crate::device::{
    DeviceDescriptor, DeviceError, DeviceErrorKind, DeviceResult, DeviceStatus, DriverFactory,
    FiscalDevice, ReceiptInfo, ReceiptKind, ReportMode,
};

/// One entry per capability call, in call order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SimOp {
    ReadStatus,
    ReadReceiptInfo,
    OpenReceipt,
    SellItem,
    Subtotal,
    Pay,
    PayExact,
    CloseReceipt,
    CloseNonFiscal,
    DailyReport,
    ProgramHeader,
    DirectCommand,
    FindDevice,
    SetSerial,
    SetServer,
}

/// A line registered on a simulated receipt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SoldItem {
    pub name: String,
    pub vat_class: String,
    pub price: Money,
    pub quantity: Quantity,
}

/// A receipt the simulator closed successfully.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrintedReceipt {
    pub kind: ReceiptKind,
    pub items: Vec<SoldItem>,
    pub total: Money,
    pub paid: Money,
    /// Payment types in the order they were applied.
    pub payment_types: Vec<u8>,
}

#[derive(Debug)]
struct OpenReceipt {
    kind: ReceiptKind,
    items: Vec<SoldItem>,
    paid: Money,
    payment_types: Vec<u8>,
}

impl OpenReceipt {
    fn total(&self) -> Money {
        self.items.iter().map(|i| i.price.times(i.quantity)).sum()
    }

    fn remaining(&self) -> Money {
        self.total() - self.paid
    }
}

#[derive(Debug)]
struct SimState {
    calls: Vec<SimOp>,
    next_faults: HashMap<SimOp, VecDeque<DeviceError>>,
    always_faults: HashMap<SimOp, DeviceError>,
    delays: HashMap<SimOp, Duration>,

    status: DeviceStatus,
    receipt: Option<OpenReceipt>,
    phantom_open: bool,
    non_fiscal_open: bool,
    close_ignored: bool,

    accepted_passwords: Vec<String>,
    password_attempts: Vec<String>,
    device: Option<DeviceDescriptor>,
    subtotal_supported: bool,
    cancel_command: Vec<u8>,

    printed: Vec<PrintedReceipt>,
    cancelled: usize,
    header_lines: BTreeMap<u8, String>,
    x_reports: usize,
    z_reports: usize,
    serial_settings: Option<(String, u32)>,
    server_settings: Option<(String, u16)>,
}

/// In-memory fiscal printer with a call log and fault injection.
#[derive(Debug)]
pub struct SimulatedPrinter {
    state: Mutex<SimState>,
}

impl Default for SimulatedPrinter {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedPrinter {
    /// A healthy printer on `/dev/ttyUSB0` accepting password `"0000"`.
    pub fn new() -> Self {
        SimulatedPrinter {
            state: Mutex::new(SimState {
                calls: Vec::new(),
                next_faults: HashMap::new(),
                always_faults: HashMap::new(),
                delays: HashMap::new(),
                status: DeviceStatus::default(),
                receipt: None,
                phantom_open: false,
                non_fiscal_open: false,
                close_ignored: false,
                accepted_passwords: vec!["0000".to_string()],
                password_attempts: Vec::new(),
                device: Some(DeviceDescriptor {
                    port: "/dev/ttyUSB0".to_string(),
                    baud: 115_200,
                }),
                subtotal_supported: true,
                cancel_command: vec![0x3C],
                printed: Vec::new(),
                cancelled: 0,
                header_lines: BTreeMap::new(),
                x_reports: 0,
                z_reports: 0,
                serial_settings: None,
                server_settings: None,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    // =========================================================================
    // Builders
    // =========================================================================

    /// Scanning finds nothing.
    pub fn without_device(self) -> Self {
        self.lock().device = None;
        self
    }

    /// Firmware without the subtotal command.
    pub fn without_subtotal(self) -> Self {
        self.lock().subtotal_supported = false;
        self
    }

    pub fn with_passwords(self, passwords: &[&str]) -> Self {
        self.lock().accepted_passwords = passwords.iter().map(|p| p.to_string()).collect();
        self
    }

    // =========================================================================
    // Fault Injection
    // =========================================================================

    /// The next call to `op` fails with `err`. Queued faults fire in order.
    pub fn fail_next(&self, op: SimOp, err: DeviceError) {
        self.lock().next_faults.entry(op).or_default().push_back(err);
    }

    /// Every call to `op` fails with `err` until [`clear_faults`](Self::clear_faults).
    pub fn fail_always(&self, op: SimOp, err: DeviceError) {
        self.lock().always_faults.insert(op, err);
    }

    pub fn clear_faults(&self) {
        let mut state = self.lock();
        state.next_faults.clear();
        state.always_faults.clear();
    }

    /// Makes every call to `op` block the calling thread for `delay`.
    pub fn set_delay(&self, op: SimOp, delay: Duration) {
        self.lock().delays.insert(op, delay);
    }

    /// Status reports an open fiscal receipt that nothing backs.
    pub fn set_phantom_receipt_open(&self, open: bool) {
        self.lock().phantom_open = open;
    }

    /// `close_receipt` answers Ok and changes nothing.
    pub fn set_close_ignored(&self, ignored: bool) {
        self.lock().close_ignored = ignored;
    }

    pub fn set_non_fiscal_open(&self, open: bool) {
        self.lock().non_fiscal_open = open;
    }

    /// Replaces the status flags. Receipt flags stay driven by receipt state.
    pub fn set_status(&self, status: DeviceStatus) {
        self.lock().status = status;
    }

    // =========================================================================
    // Inspection
    // =========================================================================

    pub fn calls(&self) -> Vec<SimOp> {
        self.lock().calls.clone()
    }

    pub fn call_count(&self, op: SimOp) -> usize {
        self.lock().calls.iter().filter(|c| **c == op).count()
    }

    pub fn clear_calls(&self) {
        let mut state = self.lock();
        state.calls.clear();
        state.password_attempts.clear();
    }

    /// Passwords tried by `open_receipt`, in order.
    pub fn password_attempts(&self) -> Vec<String> {
        self.lock().password_attempts.clone()
    }

    pub fn printed_receipts(&self) -> Vec<PrintedReceipt> {
        self.lock().printed.clone()
    }

    pub fn cancelled_receipts(&self) -> usize {
        self.lock().cancelled
    }

    pub fn header_lines(&self) -> BTreeMap<u8, String> {
        self.lock().header_lines.clone()
    }

    pub fn report_counts(&self) -> (usize, usize) {
        let state = self.lock();
        (state.x_reports, state.z_reports)
    }

    pub fn is_receipt_open(&self) -> bool {
        let state = self.lock();
        state.receipt.is_some() || state.phantom_open
    }

    pub fn serial_settings(&self) -> Option<(String, u32)> {
        self.lock().serial_settings.clone()
    }

    pub fn server_settings(&self) -> Option<(String, u16)> {
        self.lock().server_settings.clone()
    }

    /// Opens a sale receipt with one unpaid item, as a crashed job would leave it.
    pub fn leave_receipt_open(&self, price: Money) {
        self.lock().receipt = Some(OpenReceipt {
            kind: ReceiptKind::Sale,
            items: vec![SoldItem {
                name: "abandoned".to_string(),
                vat_class: "A".to_string(),
                price,
                quantity: Quantity::from_units(1),
            }],
            paid: Money::zero(),
            payment_types: Vec::new(),
        });
    }

    // =========================================================================
    // Call Plumbing
    // =========================================================================

    /// Logs the call, applies any delay, and returns the locked state or the
    /// injected fault.
    fn enter(&self, op: SimOp) -> DeviceResult<MutexGuard<'_, SimState>> {
        let delay = {
            let mut state = self.lock();
            state.calls.push(op);
            state.delays.get(&op).copied()
        };

        if let Some(delay) = delay {
            std::thread::sleep(delay);
        }

        let mut state = self.lock();
        if let Some(err) = state.always_faults.get(&op) {
            return Err(err.clone());
        }
        if let Some(err) = state.next_faults.get_mut(&op).and_then(VecDeque::pop_front) {
            return Err(err);
        }
        Ok(state)
    }
}

fn already_open() -> DeviceError {
    DeviceError::from_vendor(-101, "fiscal receipt already open")
}

fn no_receipt() -> DeviceError {
    DeviceError::rejected("no fiscal receipt open")
}

impl FiscalDevice for SimulatedPrinter {
    fn read_status(&self) -> DeviceResult<DeviceStatus> {
        let state = self.enter(SimOp::ReadStatus)?;
        let mut status = state.status.clone();
        status.fiscal_receipt_open = state.receipt.is_some() || state.phantom_open;
        status.non_fiscal_receipt_open = state.non_fiscal_open;
        Ok(status)
    }

    fn read_current_receipt_info(&self) -> DeviceResult<ReceiptInfo> {
        let state = self.enter(SimOp::ReadReceiptInfo)?;
        Ok(match &state.receipt {
            Some(receipt) => ReceiptInfo {
                is_open: true,
                item_count: receipt.items.len() as u32,
                subtotal: receipt.remaining(),
                payment_finalized: !receipt.items.is_empty() && !receipt.remaining().is_positive(),
            },
            None => ReceiptInfo {
                is_open: state.phantom_open,
                ..ReceiptInfo::default()
            },
        })
    }

    fn open_receipt(&self, _operator_id: u32, password: &str, kind: ReceiptKind) -> DeviceResult<()> {
        let mut state = self.enter(SimOp::OpenReceipt)?;
        state.password_attempts.push(password.to_string());

        if state.receipt.is_some() || state.phantom_open {
            return Err(already_open());
        }
        if state.non_fiscal_open {
            return Err(DeviceError::from_vendor(-102, "non-fiscal receipt open"));
        }
        if !state.accepted_passwords.iter().any(|p| p == password) {
            return Err(DeviceError::from_vendor(-103, "wrong operator password"));
        }

        state.receipt = Some(OpenReceipt {
            kind,
            items: Vec::new(),
            paid: Money::zero(),
            payment_types: Vec::new(),
        });
        Ok(())
    }

    fn sell_item(
        &self,
        name: &str,
        vat_class: &str,
        price: Money,
        _discount: Money,
        quantity: Quantity,
    ) -> DeviceResult<()> {
        let mut state = self.enter(SimOp::SellItem)?;
        let receipt = state.receipt.as_mut().ok_or_else(no_receipt)?;
        receipt.items.push(SoldItem {
            name: name.to_string(),
            vat_class: vat_class.to_string(),
            price,
            quantity,
        });
        Ok(())
    }

    fn subtotal(&self) -> DeviceResult<Money> {
        let state = self.enter(SimOp::Subtotal)?;
        if !state.subtotal_supported {
            return Err(DeviceError::from_vendor(-104, "unknown command"));
        }
        match &state.receipt {
            Some(receipt) => Ok(receipt.remaining()),
            None if state.phantom_open => Ok(Money::zero()),
            None => Err(no_receipt()),
        }
    }

    fn pay(&self, payment_type: u8, amount: Money) -> DeviceResult<()> {
        let mut state = self.enter(SimOp::Pay)?;
        let receipt = state.receipt.as_mut().ok_or_else(no_receipt)?;
        receipt.paid += amount;
        receipt.payment_types.push(payment_type);
        Ok(())
    }

    fn pay_exact(&self, payment_type: u8) -> DeviceResult<()> {
        let mut state = self.enter(SimOp::PayExact)?;
        let receipt = state.receipt.as_mut().ok_or_else(no_receipt)?;
        receipt.paid = receipt.total();
        receipt.payment_types.push(payment_type);
        Ok(())
    }

    fn close_receipt(&self) -> DeviceResult<()> {
        let mut state = self.enter(SimOp::CloseReceipt)?;
        if state.close_ignored {
            return Ok(());
        }

        if let Some(receipt) = &state.receipt {
            if receipt.remaining().is_positive() {
                return Err(DeviceError::rejected("payment incomplete"));
            }
        }

        match state.receipt.take() {
            Some(receipt) => {
                let total = receipt.total();
                state.printed.push(PrintedReceipt {
                    kind: receipt.kind,
                    items: receipt.items,
                    total,
                    paid: receipt.paid,
                    payment_types: receipt.payment_types,
                });
                state.phantom_open = false;
                Ok(())
            }
            None if state.phantom_open => {
                state.phantom_open = false;
                Ok(())
            }
            None => Err(no_receipt()),
        }
    }

    fn close_non_fiscal_receipt(&self) -> DeviceResult<()> {
        let mut state = self.enter(SimOp::CloseNonFiscal)?;
        if !state.non_fiscal_open {
            return Err(DeviceError::rejected("no non-fiscal receipt open"));
        }
        state.non_fiscal_open = false;
        Ok(())
    }

    fn print_daily_report(&self, mode: ReportMode) -> DeviceResult<()> {
        let mut state = self.enter(SimOp::DailyReport)?;
        if state.receipt.is_some() || state.phantom_open {
            return Err(already_open());
        }
        match mode {
            ReportMode::X => state.x_reports += 1,
            ReportMode::Z => {
                state.z_reports += 1;
                state.status.period_exceeded_24h = false;
            }
        }
        Ok(())
    }

    fn program_header_line(&self, line: u8, text: &str) -> DeviceResult<()> {
        let mut state = self.enter(SimOp::ProgramHeader)?;
        if state.receipt.is_some() || state.phantom_open {
            return Err(already_open());
        }
        state.header_lines.insert(line, text.to_string());
        Ok(())
    }

    fn direct_command(&self, raw: &[u8]) -> DeviceResult<Vec<u8>> {
        let mut state = self.enter(SimOp::DirectCommand)?;
        if raw == state.cancel_command.as_slice() {
            if state.receipt.take().is_some() {
                state.cancelled += 1;
            }
            state.phantom_open = false;
            return Ok(Vec::new());
        }
        Err(DeviceError::new(
            DeviceErrorKind::Unsupported,
            format!("unknown command {}", hex::encode(raw)),
        ))
    }

    fn find_device(&self) -> DeviceResult<Option<DeviceDescriptor>> {
        let state = self.enter(SimOp::FindDevice)?;
        Ok(state.device.clone())
    }

    fn set_serial_settings(&self, port: &str, baud: u32, _persistent: bool) -> DeviceResult<()> {
        let mut state = self.enter(SimOp::SetSerial)?;
        state.serial_settings = Some((port.to_string(), baud));
        Ok(())
    }

    fn set_server_settings(&self, host: &str, port: u16) -> DeviceResult<()> {
        let mut state = self.enter(SimOp::SetServer)?;
        state.server_settings = Some((host.to_string(), port));
        Ok(())
    }
}

// =============================================================================
// Factory
// =============================================================================

/// Hands out the same simulated printer on every `create`.
#[derive(Debug, Clone)]
pub struct SimulatorFactory {
    printer: Arc<SimulatedPrinter>,
}

impl SimulatorFactory {
    pub fn new(printer: Arc<SimulatedPrinter>) -> Self {
        SimulatorFactory { printer }
    }

    pub fn printer(&self) -> &Arc<SimulatedPrinter> {
        &self.printer
    }
}

impl DriverFactory for SimulatorFactory {
    fn create(&self) -> DeviceResult<Arc<dyn FiscalDevice>> {
        Ok(self.printer.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sale_cycle() {
        let sim = SimulatedPrinter::new();
        sim.open_receipt(1, "0000", ReceiptKind::Sale).unwrap();
        sim.sell_item("Buke", "A", Money::from_cents(150), Money::zero(), Quantity::from_units(2))
            .unwrap();
        assert_eq!(sim.subtotal().unwrap(), Money::from_cents(300));

        // Closing an unpaid receipt is refused.
        assert!(sim.close_receipt().is_err());

        sim.pay(0, Money::from_cents(300)).unwrap();
        sim.close_receipt().unwrap();

        let printed = sim.printed_receipts();
        assert_eq!(printed.len(), 1);
        assert_eq!(printed[0].total, Money::from_cents(300));
        assert!(!sim.is_receipt_open());
    }

    #[test]
    fn test_wrong_password_and_already_open() {
        let sim = SimulatedPrinter::new();
        let err = sim.open_receipt(1, "9999", ReceiptKind::Sale).unwrap_err();
        assert_eq!(err.kind, DeviceErrorKind::InvalidPassword);

        sim.set_phantom_receipt_open(true);
        let err = sim.open_receipt(1, "0000", ReceiptKind::Sale).unwrap_err();
        assert_eq!(err.kind, DeviceErrorKind::ReceiptAlreadyOpen);
        assert_eq!(sim.password_attempts(), vec!["9999", "0000"]);
    }

    #[test]
    fn test_cancel_command_drops_receipt() {
        let sim = SimulatedPrinter::new();
        sim.leave_receipt_open(Money::from_cents(500));
        sim.direct_command(&[0x3C]).unwrap();
        assert!(!sim.is_receipt_open());
        assert_eq!(sim.cancelled_receipts(), 1);
        assert!(sim.printed_receipts().is_empty());
    }

    #[test]
    fn test_fault_injection() {
        let sim = SimulatedPrinter::new();
        sim.fail_next(SimOp::ReadStatus, DeviceError::transport("timeout"));
        assert!(sim.read_status().is_err());
        assert!(sim.read_status().is_ok());

        sim.fail_always(SimOp::FindDevice, DeviceError::transport("no port"));
        assert!(sim.find_device().is_err());
        assert!(sim.find_device().is_err());
        sim.clear_faults();
        assert!(sim.find_device().unwrap().is_some());

        assert_eq!(sim.call_count(SimOp::ReadStatus), 2);
        assert_eq!(sim.call_count(SimOp::FindDevice), 3);
    }
}
