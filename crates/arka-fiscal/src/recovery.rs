//! # Recovery Ladder
//!
//! Brings the printer back to "no fiscal receipt open" without an operator.
//!
//! ```text
//!   1. close non-fiscal receipt          best effort, errors ignored
//!   2. read status + receipt info        nothing open ──► AlreadyClosed
//!   3. payment finalized?  close         ──► ClosedFinalized
//!   4. subtotal > 0?  pay it, close      ──► PaidAndClosed
//!   5. close anyway                      ──► ForcedClose
//!   6. raw cancel command                ──► Cancelled
//!      nothing worked                    ──► RecoveryFailed
//! ```
//!
//! A remedy only counts once a fresh status read shows the receipt closed.
//! Every state-changing command is followed by the settle delay.

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::RecoverySettings;
use crate::device::{DeviceError, DeviceSession};
use crate::error::{FiscalError, FiscalResult};

/// The remedy that closed the receipt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum RecoveryOutcome {
    AlreadyClosed,
    ClosedFinalized,
    PaidAndClosed,
    ForcedClose,
    Cancelled,
}

/// Runs the ladder once.
///
/// ## Returns
/// * `Ok(outcome)` - No fiscal receipt is open any more
/// * `Err(RecoveryFailed)` - Every remedy was tried and the receipt is still open
/// * `Err(Step)` - The printer stopped answering status reads
pub async fn ensure_receipt_closed(
    session: &DeviceSession,
    settings: &RecoverySettings,
) -> FiscalResult<RecoveryOutcome> {
    let settle = settings.settle_delay();

    // 1
    match session.close_non_fiscal_receipt().await {
        Ok(()) => {
            debug!("Closed a non-fiscal receipt");
            tokio::time::sleep(settle).await;
        }
        Err(e) => debug!(error = %e, "No non-fiscal receipt to close"),
    }

    // 2
    let status = session
        .read_status()
        .await
        .map_err(|e| FiscalError::step("read_status", e))?;
    let info = session.read_current_receipt_info().await.ok();
    let open = status.fiscal_receipt_open || info.as_ref().is_some_and(|i| i.is_open);

    if !open {
        return Ok(RecoveryOutcome::AlreadyClosed);
    }

    warn!(?info, "Fiscal receipt left open, recovering");

    // 3
    if info.as_ref().is_some_and(|i| i.payment_finalized) {
        let closed = session.close_receipt().await;
        if settled_closed(session, settings, "close finalized", closed).await? {
            return Ok(RecoveryOutcome::ClosedFinalized);
        }
    }

    // 4
    let owed = match session.subtotal().await {
        Ok(amount) => Some(amount),
        Err(e) => {
            debug!(error = %e, "Subtotal unavailable, using receipt info");
            info.as_ref().map(|i| i.subtotal)
        }
    };

    if let Some(amount) = owed.filter(|a| a.is_positive()) {
        match session.pay(settings.finalize_payment_type, amount).await {
            Ok(()) => {
                tokio::time::sleep(settle).await;
                let closed = session.close_receipt().await;
                if settled_closed(session, settings, "pay and close", closed).await? {
                    return Ok(RecoveryOutcome::PaidAndClosed);
                }
            }
            Err(e) => warn!(error = %e, amount = %amount, "Settling open receipt failed"),
        }
    }

    // 5
    let closed = session.close_receipt().await;
    if settled_closed(session, settings, "forced close", closed).await? {
        return Ok(RecoveryOutcome::ForcedClose);
    }

    // 6
    let cancel = settings.cancel_bytes()?;
    let cancelled = session.direct_command(&cancel).await.map(|_| ());
    if settled_closed(session, settings, "cancel command", cancelled).await? {
        return Ok(RecoveryOutcome::Cancelled);
    }

    warn!("Every recovery remedy failed");
    Err(FiscalError::RecoveryFailed)
}

/// Settles, then confirms with a status read.
///
/// Transport errors on the confirming read propagate; anything else counts
/// as "still open".
async fn settled_closed(
    session: &DeviceSession,
    settings: &RecoverySettings,
    remedy: &'static str,
    result: Result<(), DeviceError>,
) -> FiscalResult<bool> {
    if let Err(e) = result {
        debug!(remedy, error = %e, "Remedy refused");
        if e.is_transport() {
            return Err(FiscalError::step(remedy, e));
        }
        return Ok(false);
    }

    tokio::time::sleep(settings.settle_delay()).await;

    match session.fiscal_receipt_open().await {
        Ok(false) => {
            info!(remedy, "Open receipt recovered");
            Ok(true)
        }
        Ok(true) => {
            debug!(remedy, "Receipt still open after remedy");
            Ok(false)
        }
        Err(e) if e.is_transport() => Err(FiscalError::step("read_status", e)),
        Err(e) => {
            debug!(remedy, error = %e, "Could not confirm remedy");
            Ok(false)
        }
    }
}
