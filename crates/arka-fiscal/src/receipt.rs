//! # Receipt Controller
//!
//! Runs one sale or storno against the printer.
//!
//! ## Sequence
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  force closed ──► open (password 1..K) ──► sell × N ──► pay ──► close   │
//! │      │                 │                                  │             │
//! │      │                 ├─ invalid password: next password │             │
//! │      │                 ├─ already open: ladder, retry ≤2  │             │
//! │      │                 └─ anything else: abort            │             │
//! │      │                                                    │             │
//! │      └─ ladder; still open → wait, ladder again           │             │
//! │                                                           ▼             │
//! │                                  [Subtotal, PayExact] tried in order   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use arka_core::header::truncate_chars;
use arka_core::{JobPayload, Money, PaymentMethod};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::FiscalConfig;
use crate::device::{DeviceErrorKind, DeviceSession, ReceiptKind};
use crate::error::{FiscalError, FiscalResult};
use crate::pool::ConnectionPool;
use crate::recovery::ensure_receipt_closed;

/// How the receipt was paid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum PaymentStrategy {
    /// Read the device subtotal and pay exactly that amount.
    ///
    /// Needs the subtotal command and a positive amount owed.
    Subtotal,
    /// Let the device settle the remainder itself.
    PayExact,
}

impl PaymentStrategy {
    /// Strategies in the order they are tried.
    pub const ORDER: [PaymentStrategy; 2] = [PaymentStrategy::Subtotal, PaymentStrategy::PayExact];
}

/// Summary of a printed receipt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceiptOutcome {
    pub kind: ReceiptKind,
    pub item_count: usize,
    pub total_paid: Money,
    pub strategy: PaymentStrategy,
    /// Position of the password that opened the receipt.
    pub credential_index: usize,
}

/// Drives the open → sell → pay → close sequence.
pub struct ReceiptController<'a> {
    pool: &'a ConnectionPool,
    config: &'a FiscalConfig,
}

impl<'a> ReceiptController<'a> {
    pub fn new(pool: &'a ConnectionPool, config: &'a FiscalConfig) -> Self {
        ReceiptController { pool, config }
    }

    /// Prints a sale or storno for `payload`.
    ///
    /// The pool must already be connected.
    pub async fn execute(&self, kind: ReceiptKind, payload: &JobPayload) -> FiscalResult<ReceiptOutcome> {
        if payload.items.is_empty() {
            return Err(FiscalError::InvalidPayload(format!(
                "{} receipt has no items",
                kind
            )));
        }

        let session = self.pool.session().await?;

        self.force_closed(&session).await?;

        let credential_index = self.open_with_credentials(&session, kind).await?;
        debug!(%kind, credential_index, "Receipt opened");

        self.sell_items(&session, payload).await?;

        let (strategy, total_paid) = self.pay(&session, payload).await?;

        session
            .close_receipt()
            .await
            .map_err(|e| FiscalError::step("close_receipt", e))?;
        self.pool.mark_healthy().await;

        let outcome = ReceiptOutcome {
            kind,
            item_count: payload.items.len(),
            total_paid,
            strategy,
            credential_index,
        };
        info!(
            %kind,
            items = outcome.item_count,
            total = %outcome.total_paid,
            strategy = ?outcome.strategy,
            "Receipt printed"
        );
        Ok(outcome)
    }

    /// Runs the ladder, and once more after the retry backoff if the printer
    /// still reports an open receipt.
    async fn force_closed(&self, session: &DeviceSession) -> FiscalResult<()> {
        let recovery = &self.config.recovery;

        match ensure_receipt_closed(session, recovery).await {
            Ok(_) => {
                let still_open = session
                    .fiscal_receipt_open()
                    .await
                    .map_err(|e| FiscalError::step("read_status", e))?;
                if !still_open {
                    return Ok(());
                }
                warn!("Receipt still open after recovery, retrying");
            }
            Err(FiscalError::RecoveryFailed) => {
                warn!("Recovery failed, retrying after backoff");
            }
            Err(e) => return Err(e),
        }

        tokio::time::sleep(recovery.retry_backoff()).await;
        ensure_receipt_closed(session, recovery).await?;

        let still_open = session
            .fiscal_receipt_open()
            .await
            .map_err(|e| FiscalError::step("read_status", e))?;
        if still_open {
            return Err(FiscalError::RecoveryFailed);
        }
        Ok(())
    }

    /// Tries every configured password in order.
    ///
    /// ## Returns
    /// Index of the password that worked.
    async fn open_with_credentials(
        &self,
        session: &DeviceSession,
        kind: ReceiptKind,
    ) -> FiscalResult<usize> {
        let operator = &self.config.operator;
        let max_busy_retries = self.config.receipt.max_open_retries;
        let mut attempts = 0;

        for (index, password) in operator.passwords.iter().enumerate() {
            let mut busy_retries = 0;

            loop {
                attempts += 1;
                let err = match session.open_receipt(operator.id, password, kind).await {
                    Ok(()) => return Ok(index),
                    Err(e) => e,
                };

                match err.kind {
                    DeviceErrorKind::InvalidPassword => {
                        debug!(index, "Operator password rejected");
                        break;
                    }
                    DeviceErrorKind::ReceiptAlreadyOpen | DeviceErrorKind::NonFiscalReceiptOpen
                        if busy_retries < max_busy_retries =>
                    {
                        busy_retries += 1;
                        warn!(error = %err, retry = busy_retries, "Open refused, recovering");
                        ensure_receipt_closed(session, &self.config.recovery).await?;
                    }
                    _ => return Err(FiscalError::step("open_receipt", err)),
                }
            }
        }

        Err(FiscalError::OperatorLoginFailed { attempts })
    }

    async fn sell_items(&self, session: &DeviceSession, payload: &JobPayload) -> FiscalResult<()> {
        let settings = &self.config.receipt;

        for item in &payload.items {
            let name = truncate_chars(&item.name, settings.name_width);
            session
                .sell_item(
                    &name,
                    &settings.vat_class,
                    item.price_cents,
                    Money::zero(),
                    item.quantity,
                )
                .await
                .map_err(|e| FiscalError::step("sell_item", e))?;
        }

        Ok(())
    }

    async fn pay(
        &self,
        session: &DeviceSession,
        payload: &JobPayload,
    ) -> FiscalResult<(PaymentStrategy, Money)> {
        let payment_type = match payload.payment_method {
            PaymentMethod::Cash => self.config.receipt.cash_payment_type,
            PaymentMethod::Card => self.config.receipt.card_payment_type,
        };

        for strategy in PaymentStrategy::ORDER {
            match strategy {
                PaymentStrategy::Subtotal => {
                    let amount = match session.subtotal().await {
                        Ok(amount) if amount.is_positive() => amount,
                        Ok(amount) => {
                            debug!(%amount, "Subtotal not positive, paying exact");
                            continue;
                        }
                        Err(e) if e.kind == DeviceErrorKind::Unsupported => {
                            debug!("Subtotal unsupported, paying exact");
                            continue;
                        }
                        Err(e) => return Err(FiscalError::step("subtotal", e)),
                    };

                    match session.pay(payment_type, amount).await {
                        Ok(()) => return Ok((strategy, amount)),
                        Err(e) if e.kind == DeviceErrorKind::Unsupported => continue,
                        Err(e) => return Err(FiscalError::step("pay", e)),
                    }
                }
                PaymentStrategy::PayExact => {
                    let total = payload.total()?;
                    session
                        .pay_exact(payment_type)
                        .await
                        .map_err(|e| FiscalError::step("pay_exact", e))?;
                    return Ok((strategy, total));
                }
            }
        }

        Err(FiscalError::Internal("no payment strategy applied".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RecoverySettings;
    use crate::device::DeviceError;
    use crate::simulator::{SimOp, SimulatedPrinter, SimulatorFactory};
    use arka_core::{LineItem, Quantity};
    use std::sync::Arc;

    fn test_config(passwords: &[&str]) -> FiscalConfig {
        let mut config = FiscalConfig::default();
        config.operator.passwords = passwords.iter().map(|p| p.to_string()).collect();
        config.recovery = RecoverySettings {
            settle_delay_ms: 1,
            retry_backoff_ms: 5,
            ..RecoverySettings::default()
        };
        config
    }

    async fn connected_pool(printer: Arc<SimulatedPrinter>, config: &FiscalConfig) -> ConnectionPool {
        let pool = ConnectionPool::new(
            Arc::new(SimulatorFactory::new(printer)),
            config.gateway.clone(),
            config.device.clone(),
            config.pool.clone(),
        );
        pool.connect_server().await.unwrap();
        pool.connect_printer().await.unwrap();
        pool
    }

    fn two_items(method: PaymentMethod) -> JobPayload {
        JobPayload::with_items(
            vec![
                LineItem::new("Qumesht 1L", 95, Quantity::from_units(2)),
                LineItem::new("Buke", 40, Quantity::from_units(1)),
            ],
            method,
        )
    }

    #[tokio::test]
    async fn test_sale_pays_subtotal() {
        let printer = Arc::new(SimulatedPrinter::new());
        let config = test_config(&["0000"]);
        let pool = connected_pool(printer.clone(), &config).await;
        printer.clear_calls();

        let outcome = ReceiptController::new(&pool, &config)
            .execute(ReceiptKind::Sale, &two_items(PaymentMethod::Cash))
            .await
            .unwrap();

        assert_eq!(outcome.strategy, PaymentStrategy::Subtotal);
        assert_eq!(outcome.total_paid, Money::from_cents(230));
        assert_eq!(outcome.credential_index, 0);

        assert_eq!(printer.call_count(SimOp::OpenReceipt), 1);
        assert_eq!(printer.call_count(SimOp::SellItem), 2);
        assert_eq!(printer.call_count(SimOp::Subtotal), 1);
        assert_eq!(printer.call_count(SimOp::Pay), 1);
        assert_eq!(printer.call_count(SimOp::PayExact), 0);

        let printed = printer.printed_receipts();
        assert_eq!(printed.len(), 1);
        assert_eq!(printed[0].kind, ReceiptKind::Sale);
        assert_eq!(printed[0].items[0].name, "Qumesht 1L");
        assert_eq!(printed[0].payment_types, vec![0]);
    }

    #[tokio::test]
    async fn test_pay_exact_fallback_when_subtotal_unsupported() {
        let printer = Arc::new(SimulatedPrinter::new().without_subtotal());
        let config = test_config(&["0000"]);
        let pool = connected_pool(printer.clone(), &config).await;

        let outcome = ReceiptController::new(&pool, &config)
            .execute(ReceiptKind::Sale, &two_items(PaymentMethod::Card))
            .await
            .unwrap();

        assert_eq!(outcome.strategy, PaymentStrategy::PayExact);
        assert_eq!(outcome.total_paid, Money::from_cents(230));
        assert_eq!(printer.printed_receipts()[0].payment_types, vec![1]);
    }

    #[tokio::test]
    async fn test_credentials_advance_until_one_works() {
        let printer = Arc::new(SimulatedPrinter::new().with_passwords(&["4321"]));
        let config = test_config(&["0000", "1111", "4321"]);
        let pool = connected_pool(printer.clone(), &config).await;

        let outcome = ReceiptController::new(&pool, &config)
            .execute(ReceiptKind::Sale, &two_items(PaymentMethod::Cash))
            .await
            .unwrap();

        assert_eq!(outcome.credential_index, 2);
        assert_eq!(printer.password_attempts(), vec!["0000", "1111", "4321"]);
    }

    #[tokio::test]
    async fn test_credential_exhaustion_after_exactly_k_attempts() {
        let printer = Arc::new(SimulatedPrinter::new().with_passwords(&["never"]));
        let config = test_config(&["a", "b", "c", "d"]);
        let pool = connected_pool(printer.clone(), &config).await;

        let err = ReceiptController::new(&pool, &config)
            .execute(ReceiptKind::Sale, &two_items(PaymentMethod::Cash))
            .await
            .unwrap_err();

        assert!(matches!(err, FiscalError::OperatorLoginFailed { attempts: 4 }));
        assert_eq!(printer.call_count(SimOp::OpenReceipt), 4);
        assert_eq!(printer.call_count(SimOp::SellItem), 0);
    }

    #[tokio::test]
    async fn test_already_open_is_recovered_inline() {
        let printer = Arc::new(SimulatedPrinter::new());
        let config = test_config(&["0000"]);
        let pool = connected_pool(printer.clone(), &config).await;

        // The device refuses the first open even though status looked clean.
        printer.fail_next(SimOp::OpenReceipt, DeviceError::from_vendor(-101, "busy"));

        let outcome = ReceiptController::new(&pool, &config)
            .execute(ReceiptKind::Sale, &two_items(PaymentMethod::Cash))
            .await
            .unwrap();

        assert_eq!(outcome.credential_index, 0);
        assert_eq!(printer.call_count(SimOp::OpenReceipt), 2);
    }

    #[tokio::test]
    async fn test_already_open_retries_are_bounded() {
        let printer = Arc::new(SimulatedPrinter::new());
        let config = test_config(&["0000", "1111"]);
        let pool = connected_pool(printer.clone(), &config).await;

        printer.fail_always(SimOp::OpenReceipt, DeviceError::from_vendor(-101, "busy"));

        let err = ReceiptController::new(&pool, &config)
            .execute(ReceiptKind::Sale, &two_items(PaymentMethod::Cash))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            FiscalError::Step { step: "open_receipt", ref source }
                if source.kind == DeviceErrorKind::ReceiptAlreadyOpen
        ));
        // One attempt plus two retries, never reaching the second password.
        assert_eq!(printer.call_count(SimOp::OpenReceipt), 3);
    }

    #[tokio::test]
    async fn test_other_open_error_aborts() {
        let printer = Arc::new(SimulatedPrinter::new());
        let config = test_config(&["0000", "1111"]);
        let pool = connected_pool(printer.clone(), &config).await;

        printer.fail_next(SimOp::OpenReceipt, DeviceError::rejected("paper jam"));

        let err = ReceiptController::new(&pool, &config)
            .execute(ReceiptKind::Sale, &two_items(PaymentMethod::Cash))
            .await
            .unwrap_err();
        assert!(matches!(err, FiscalError::Step { step: "open_receipt", .. }));
        assert_eq!(printer.call_count(SimOp::OpenReceipt), 1);
    }

    #[tokio::test]
    async fn test_names_truncated_by_characters() {
        let printer = Arc::new(SimulatedPrinter::new());
        let mut config = test_config(&["0000"]);
        config.receipt.name_width = 5;
        let pool = connected_pool(printer.clone(), &config).await;

        let payload = JobPayload::with_items(
            vec![LineItem::new("Çokollatë e zezë", 150, Quantity::from_units(1))],
            PaymentMethod::Cash,
        );
        ReceiptController::new(&pool, &config)
            .execute(ReceiptKind::Sale, &payload)
            .await
            .unwrap();

        assert_eq!(printer.printed_receipts()[0].items[0].name, "Çokol");
    }

    #[tokio::test]
    async fn test_storno_sets_storno_flag() {
        let printer = Arc::new(SimulatedPrinter::new());
        let config = test_config(&["0000"]);
        let pool = connected_pool(printer.clone(), &config).await;

        let outcome = ReceiptController::new(&pool, &config)
            .execute(ReceiptKind::Storno, &two_items(PaymentMethod::Cash))
            .await
            .unwrap();

        assert_eq!(outcome.kind, ReceiptKind::Storno);
        assert_eq!(printer.printed_receipts()[0].kind, ReceiptKind::Storno);
    }

    #[tokio::test]
    async fn test_empty_payload_rejected_before_device() {
        let printer = Arc::new(SimulatedPrinter::new());
        let config = test_config(&["0000"]);
        let pool = connected_pool(printer.clone(), &config).await;
        printer.clear_calls();

        let err = ReceiptController::new(&pool, &config)
            .execute(ReceiptKind::Sale, &JobPayload::default())
            .await
            .unwrap_err();
        assert!(matches!(err, FiscalError::InvalidPayload(_)));
        assert!(printer.calls().is_empty());
    }
}
