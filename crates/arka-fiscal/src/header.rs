//! # Header Sync
//!
//! Pushes the receipt header to the printer when the company record changed.
//!
//! ```text
//!   company settings ──► ReceiptHeader (4 lines) ──► fingerprint
//!                                                       │
//!                         same as cached? ──yes──► Unchanged (no writes)
//!                                                       │ no
//!                         ladder ──► lines 1..4 ──► blank 5..total ──► cache
//! ```

use arka_core::{CompanySettings, ReceiptHeader, HEADER_LINES_IN_USE};
use serde::Serialize;
use tracing::{debug, info};

use crate::config::FiscalConfig;
use crate::error::{FiscalError, FiscalResult};
use crate::pool::ConnectionPool;
use crate::recovery::ensure_receipt_closed;

/// Where the header's company record comes from.
pub trait CompanySettingsSource: Send + Sync {
    fn company_settings(&self) -> FiscalResult<CompanySettings>;
}

/// A fixed company record, e.g. the `[company]` config section.
#[derive(Debug, Clone)]
pub struct StaticCompanySource {
    settings: CompanySettings,
}

impl StaticCompanySource {
    pub fn new(settings: CompanySettings) -> Self {
        StaticCompanySource { settings }
    }
}

impl CompanySettingsSource for StaticCompanySource {
    fn company_settings(&self) -> FiscalResult<CompanySettings> {
        Ok(self.settings.clone())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase", tag = "result")]
pub enum HeaderSyncOutcome {
    Unchanged,
    Pushed { lines_written: usize },
}

pub struct HeaderSync<'a> {
    pool: &'a ConnectionPool,
    config: &'a FiscalConfig,
}

impl<'a> HeaderSync<'a> {
    pub fn new(pool: &'a ConnectionPool, config: &'a FiscalConfig) -> Self {
        HeaderSync { pool, config }
    }

    /// Writes the header if its fingerprint differs from the last push.
    ///
    /// The cached fingerprint only moves after every write succeeded, so a
    /// partial push is retried on the next call.
    pub async fn sync(&self, source: &dyn CompanySettingsSource) -> FiscalResult<HeaderSyncOutcome> {
        let settings = source.company_settings()?;
        let header = ReceiptHeader::from_company(&settings, self.config.header.line_width);
        let fingerprint = header.fingerprint();

        if self.pool.header_fingerprint().await.as_deref() == Some(fingerprint.as_str()) {
            debug!("Header unchanged, skipping device writes");
            return Ok(HeaderSyncOutcome::Unchanged);
        }

        let session = self.pool.session().await?;
        ensure_receipt_closed(&session, &self.config.recovery).await?;

        let mut lines_written = 0;
        for (index, text) in header.lines().iter().enumerate() {
            let line = (index + 1) as u8;
            session
                .program_header_line(line, text)
                .await
                .map_err(|e| FiscalError::step("program_header_line", e))?;
            lines_written += 1;
        }

        let first_unused = HEADER_LINES_IN_USE as u8 + 1;
        for line in first_unused..=self.config.header.total_lines {
            session
                .program_header_line(line, "")
                .await
                .map_err(|e| FiscalError::step("program_header_line", e))?;
            lines_written += 1;
        }

        self.pool.set_header_fingerprint(Some(fingerprint)).await;
        self.pool.mark_healthy().await;
        info!(lines_written, "Receipt header programmed");

        Ok(HeaderSyncOutcome::Pushed { lines_written })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::DeviceError;
    use crate::simulator::{SimOp, SimulatedPrinter, SimulatorFactory};
    use arka_core::Money;
    use std::sync::Arc;

    fn company() -> CompanySettings {
        CompanySettings {
            name: "Arka Market".to_string(),
            address: "Rr. Nena Tereze 12".to_string(),
            business_number: Some("810123456".to_string()),
            fiscal_number: None,
            vat_number: Some("330000001".to_string()),
        }
    }

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

    #[tokio::test]
    async fn test_push_then_skip() {
        let (printer, pool, config) = setup().await;
        let source = StaticCompanySource::new(company());
        let sync = HeaderSync::new(&pool, &config);

        let outcome = sync.sync(&source).await.unwrap();
        assert_eq!(outcome, HeaderSyncOutcome::Pushed { lines_written: 8 });

        let lines = printer.header_lines();
        assert_eq!(lines[&1], "Arka Market");
        assert_eq!(lines[&3], "");
        assert_eq!(lines[&4], "NUI: 810123456  TVSH: 330000001");
        assert_eq!(lines[&8], "");

        printer.clear_calls();
        assert_eq!(sync.sync(&source).await.unwrap(), HeaderSyncOutcome::Unchanged);
        assert_eq!(printer.call_count(SimOp::ProgramHeader), 0);
        assert!(printer.calls().is_empty());
    }

    #[tokio::test]
    async fn test_changed_settings_push_again() {
        let (printer, pool, config) = setup().await;
        let sync = HeaderSync::new(&pool, &config);
        sync.sync(&StaticCompanySource::new(company())).await.unwrap();

        let mut moved = company();
        moved.address = "Rr. Agim Ramadani 3".to_string();
        printer.clear_calls();
        sync.sync(&StaticCompanySource::new(moved)).await.unwrap();

        assert_eq!(printer.call_count(SimOp::ProgramHeader), 8);
        assert_eq!(printer.header_lines()[&2], "Rr. Agim Ramadani 3");
    }

    #[tokio::test]
    async fn test_open_receipt_is_closed_before_writing() {
        let (printer, pool, config) = setup().await;
        printer.leave_receipt_open(Money::from_cents(100));

        HeaderSync::new(&pool, &config)
            .sync(&StaticCompanySource::new(company()))
            .await
            .unwrap();

        assert!(!printer.is_receipt_open());
        assert_eq!(printer.header_lines().len(), 8);
    }

    #[tokio::test]
    async fn test_partial_push_keeps_old_fingerprint() {
        let (printer, pool, config) = setup().await;
        printer.fail_always(SimOp::ProgramHeader, DeviceError::transport("timeout"));

        let sync = HeaderSync::new(&pool, &config);
        assert!(sync.sync(&StaticCompanySource::new(company())).await.is_err());
        assert!(pool.header_fingerprint().await.is_none());

        printer.clear_faults();
        assert!(matches!(
            sync.sync(&StaticCompanySource::new(company())).await.unwrap(),
            HeaderSyncOutcome::Pushed { .. }
        ));
    }
}
