//! # Fiscal Configuration
//!
//! Configuration for the print agent and the fiscal device orchestration.
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Priority                               │
//! │                                                                         │
//! │  1. Environment Variables (highest priority)                           │
//! │     ARKA_GATEWAY_HOST=127.0.0.1                                        │
//! │     ARKA_OPERATOR_PASSWORDS=0000,1234                                  │
//! │                                                                         │
//! │  2. TOML Config File                                                   │
//! │     $ARKA_CONFIG, or                                                   │
//! │     ~/.config/arka/fiscal.toml (Linux)                                 │
//! │     ~/Library/Application Support/com.arka.arka/fiscal.toml (macOS)    │
//! │                                                                         │
//! │  3. Default Values (lowest priority)                                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration File Format
//! ```toml
//! [gateway]
//! host = "127.0.0.1"
//! port = 4444
//!
//! [device]
//! port = "/dev/ttyUSB0"   # omit to scan
//! baud = 115200
//!
//! [operator]
//! id = 1
//! passwords = ["0000", "1234"]
//!
//! [company]
//! name = "Arka Market"
//! address = "Rr. Nena Tereze 12, Prishtine"
//! business_number = "810123456"
//! ```

use std::path::PathBuf;
use std::time::Duration;

use arka_core::CompanySettings;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{FiscalError, FiscalResult};

// =============================================================================
// Gateway
// =============================================================================

/// Local hardware bridge the vendor driver talks through.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewaySettings {
    #[serde(default = "default_gateway_host")]
    pub host: String,

    #[serde(default = "default_gateway_port")]
    pub port: u16,
}

fn default_gateway_host() -> String {
    "127.0.0.1".to_string()
}

fn default_gateway_port() -> u16 {
    4444
}

impl Default for GatewaySettings {
    fn default() -> Self {
        GatewaySettings {
            host: default_gateway_host(),
            port: default_gateway_port(),
        }
    }
}

// =============================================================================
// Device
// =============================================================================

/// Where the printer is attached.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceSettings {
    /// Fixed serial port. When unset the printer is found by scanning.
    #[serde(default)]
    pub port: Option<String>,

    /// Baud rate used together with `port`.
    #[serde(default = "default_baud")]
    pub baud: u32,

    /// Drive the in-memory simulator instead of a vendor adapter.
    #[serde(default)]
    pub simulate: bool,
}

fn default_baud() -> u32 {
    115_200
}

impl Default for DeviceSettings {
    fn default() -> Self {
        DeviceSettings {
            port: None,
            baud: default_baud(),
            simulate: false,
        }
    }
}

// =============================================================================
// Operator
// =============================================================================

/// Operator identity used when opening receipts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperatorSettings {
    #[serde(default = "default_operator_id")]
    pub id: u32,

    /// Tried in order until one opens the receipt.
    #[serde(default = "default_passwords")]
    pub passwords: Vec<String>,
}

fn default_operator_id() -> u32 {
    1
}

fn default_passwords() -> Vec<String> {
    vec!["0000".to_string(), "1".to_string()]
}

impl Default for OperatorSettings {
    fn default() -> Self {
        OperatorSettings {
            id: default_operator_id(),
            passwords: default_passwords(),
        }
    }
}

// =============================================================================
// Receipt
// =============================================================================

/// Receipt printing settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReceiptSettings {
    /// Item name field width, in characters.
    #[serde(default = "default_name_width")]
    pub name_width: usize,

    #[serde(default = "default_vat_class")]
    pub vat_class: String,

    #[serde(default)]
    pub cash_payment_type: u8,

    #[serde(default = "default_card_payment_type")]
    pub card_payment_type: u8,

    /// Extra open attempts after a "receipt already open" answer.
    #[serde(default = "default_max_open_retries")]
    pub max_open_retries: u32,
}

fn default_name_width() -> usize {
    32
}

fn default_vat_class() -> String {
    "A".to_string()
}

fn default_card_payment_type() -> u8 {
    1
}

fn default_max_open_retries() -> u32 {
    2
}

impl Default for ReceiptSettings {
    fn default() -> Self {
        ReceiptSettings {
            name_width: default_name_width(),
            vat_class: default_vat_class(),
            cash_payment_type: 0,
            card_payment_type: default_card_payment_type(),
            max_open_retries: default_max_open_retries(),
        }
    }
}

// =============================================================================
// Recovery
// =============================================================================

/// Recovery ladder settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoverySettings {
    /// Pause after every state-changing command.
    #[serde(default = "default_settle_delay")]
    pub settle_delay_ms: u64,

    /// Pause before the second force-close attempt.
    #[serde(default = "default_retry_backoff")]
    pub retry_backoff_ms: u64,

    /// Raw cancel command, hex encoded.
    #[serde(default = "default_cancel_command")]
    pub cancel_command: String,

    /// Payment type used to settle an abandoned receipt.
    #[serde(default)]
    pub finalize_payment_type: u8,
}

fn default_settle_delay() -> u64 {
    50
}

fn default_retry_backoff() -> u64 {
    500
}

fn default_cancel_command() -> String {
    "3C".to_string()
}

impl Default for RecoverySettings {
    fn default() -> Self {
        RecoverySettings {
            settle_delay_ms: default_settle_delay(),
            retry_backoff_ms: default_retry_backoff(),
            cancel_command: default_cancel_command(),
            finalize_payment_type: 0,
        }
    }
}

impl RecoverySettings {
    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    /// Decodes `cancel_command`.
    pub fn cancel_bytes(&self) -> FiscalResult<Vec<u8>> {
        hex::decode(self.cancel_command.trim()).map_err(|e| {
            FiscalError::Config(format!(
                "recovery.cancel_command '{}' is not valid hex: {}",
                self.cancel_command, e
            ))
        })
    }
}

// =============================================================================
// Pool
// =============================================================================

/// Connection pool settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolSettings {
    /// A health check younger than this lets a connect take the fast path.
    #[serde(default = "default_freshness_window")]
    pub freshness_window_ms: u64,

    /// First pause after a failed connect.
    #[serde(default = "default_reconnect_initial")]
    pub reconnect_initial_ms: u64,

    /// Longest pause between connect attempts.
    #[serde(default = "default_reconnect_max")]
    pub reconnect_max_secs: u64,
}

fn default_freshness_window() -> u64 {
    5_000
}

fn default_reconnect_initial() -> u64 {
    1_000
}

fn default_reconnect_max() -> u64 {
    30
}

impl Default for PoolSettings {
    fn default() -> Self {
        PoolSettings {
            freshness_window_ms: default_freshness_window(),
            reconnect_initial_ms: default_reconnect_initial(),
            reconnect_max_secs: default_reconnect_max(),
        }
    }
}

impl PoolSettings {
    pub fn freshness_window(&self) -> Duration {
        Duration::from_millis(self.freshness_window_ms)
    }
}

// =============================================================================
// Header
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeaderSettings {
    /// Characters per header line.
    #[serde(default = "default_line_width")]
    pub line_width: usize,

    /// Header lines the device has. Lines past the canonical four are blanked.
    #[serde(default = "default_total_lines")]
    pub total_lines: u8,
}

fn default_line_width() -> usize {
    32
}

fn default_total_lines() -> u8 {
    8
}

impl Default for HeaderSettings {
    fn default() -> Self {
        HeaderSettings {
            line_width: default_line_width(),
            total_lines: default_total_lines(),
        }
    }
}

// =============================================================================
// Company
// =============================================================================

/// Company record used for the receipt header.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CompanyConfig {
    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub address: String,

    #[serde(default)]
    pub business_number: Option<String>,

    #[serde(default)]
    pub fiscal_number: Option<String>,

    #[serde(default, alias = "tvsh_number")]
    pub vat_number: Option<String>,
}

impl From<&CompanyConfig> for CompanySettings {
    fn from(config: &CompanyConfig) -> Self {
        CompanySettings {
            name: config.name.clone(),
            address: config.address.clone(),
            business_number: config.business_number.clone(),
            fiscal_number: config.fiscal_number.clone(),
            vat_number: config.vat_number.clone(),
        }
    }
}

// =============================================================================
// Worker
// =============================================================================

/// Background print worker settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerSettings {
    /// Written to `claimed_by` on every claim.
    #[serde(default = "default_worker_id")]
    pub id: String,

    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,

    #[serde(default = "default_cleanup_interval")]
    pub cleanup_interval_secs: u64,

    /// Finished jobs older than this are deleted.
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,

    /// Claims older than this are returned to pending at startup.
    #[serde(default = "default_stale_claim")]
    pub stale_claim_secs: u64,

    /// Queue database path.
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,
}

fn default_worker_id() -> String {
    "print-agent".to_string()
}

fn default_poll_interval() -> u64 {
    1_000
}

fn default_cleanup_interval() -> u64 {
    3_600
}

fn default_retention_days() -> u32 {
    arka_core::DEFAULT_RETENTION_DAYS
}

fn default_stale_claim() -> u64 {
    0
}

fn default_db_path() -> PathBuf {
    directories::ProjectDirs::from("com", "arka", "arka")
        .map(|dirs| dirs.data_dir().join("print-queue.db"))
        .unwrap_or_else(|| PathBuf::from("print-queue.db"))
}

impl Default for WorkerSettings {
    fn default() -> Self {
        WorkerSettings {
            id: default_worker_id(),
            poll_interval_ms: default_poll_interval(),
            cleanup_interval_secs: default_cleanup_interval(),
            retention_days: default_retention_days(),
            stale_claim_secs: default_stale_claim(),
            db_path: default_db_path(),
        }
    }
}

impl WorkerSettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs)
    }
}

// =============================================================================
// API
// =============================================================================

/// Submission API listener.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiSettings {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    #[serde(default = "default_api_port")]
    pub port: u16,
}

fn default_bind_addr() -> String {
    "127.0.0.1".to_string()
}

fn default_api_port() -> u16 {
    8790
}

impl Default for ApiSettings {
    fn default() -> Self {
        ApiSettings {
            bind_addr: default_bind_addr(),
            port: default_api_port(),
        }
    }
}

impl ApiSettings {
    /// Returns the full bind address.
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.bind_addr, self.port)
    }
}

// =============================================================================
// Main Configuration
// =============================================================================

/// Complete print agent configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FiscalConfig {
    #[serde(default)]
    pub gateway: GatewaySettings,

    #[serde(default)]
    pub device: DeviceSettings,

    #[serde(default)]
    pub operator: OperatorSettings,

    #[serde(default)]
    pub receipt: ReceiptSettings,

    #[serde(default)]
    pub recovery: RecoverySettings,

    #[serde(default)]
    pub pool: PoolSettings,

    #[serde(default)]
    pub header: HeaderSettings,

    #[serde(default)]
    pub company: CompanyConfig,

    #[serde(default)]
    pub worker: WorkerSettings,

    #[serde(default)]
    pub api: ApiSettings,
}

impl FiscalConfig {
    /// Loads configuration from file, environment, and defaults.
    ///
    /// ## Load Order (later overrides earlier)
    /// 1. Default values
    /// 2. Config file (`config_path`, `$ARKA_CONFIG`, or the platform config dir)
    /// 3. Environment variables
    pub fn load(config_path: Option<PathBuf>) -> FiscalResult<Self> {
        let mut config = Self::default();

        let path = config_path
            .or_else(|| std::env::var("ARKA_CONFIG").ok().map(PathBuf::from))
            .or_else(Self::default_config_path);

        if let Some(path) = path {
            if path.exists() {
                info!(?path, "Loading fiscal config from file");
                let contents = std::fs::read_to_string(&path)?;
                config = toml::from_str(&contents)?;
            } else {
                debug!(?path, "Config file not found, using defaults");
            }
        }

        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;

        Ok(config)
    }

    /// Parses a TOML document on top of the defaults.
    pub fn from_toml(contents: &str) -> FiscalResult<Self> {
        let config: FiscalConfig = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration.
    pub fn validate(&self) -> FiscalResult<()> {
        if self.gateway.host.trim().is_empty() {
            return Err(FiscalError::Config("gateway.host must not be empty".into()));
        }

        if self.operator.passwords.is_empty() {
            return Err(FiscalError::Config(
                "operator.passwords must list at least one password".into(),
            ));
        }

        if self.receipt.name_width == 0 || self.header.line_width == 0 {
            return Err(FiscalError::Config(
                "receipt.name_width and header.line_width must be greater than 0".into(),
            ));
        }

        if usize::from(self.header.total_lines) < arka_core::HEADER_LINES_IN_USE {
            return Err(FiscalError::Config(format!(
                "header.total_lines must be at least {}",
                arka_core::HEADER_LINES_IN_USE
            )));
        }

        if self.worker.id.trim().is_empty() {
            return Err(FiscalError::Config("worker.id must not be empty".into()));
        }

        if self.worker.poll_interval_ms == 0 || self.worker.cleanup_interval_secs == 0 {
            return Err(FiscalError::Config(
                "worker intervals must be greater than 0".into(),
            ));
        }

        self.recovery.cancel_bytes()?;

        Ok(())
    }

    /// Applies `ARKA_*` overrides read through `lookup`.
    ///
    /// `load` passes the process environment; tests pass a map.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup("ARKA_GATEWAY_HOST") {
            debug!(host = %host, "Overriding gateway host from environment");
            self.gateway.host = host;
        }

        if let Some(port) = lookup("ARKA_GATEWAY_PORT") {
            match port.parse::<u16>() {
                Ok(p) => self.gateway.port = p,
                Err(_) => warn!(value = %port, "Ignoring invalid ARKA_GATEWAY_PORT"),
            }
        }

        if let Some(port) = lookup("ARKA_DEVICE_PORT") {
            debug!(port = %port, "Overriding device port from environment");
            self.device.port = if port.trim().is_empty() {
                None
            } else {
                Some(port)
            };
        }

        if let Some(baud) = lookup("ARKA_DEVICE_BAUD") {
            match baud.parse::<u32>() {
                Ok(b) => self.device.baud = b,
                Err(_) => warn!(value = %baud, "Ignoring invalid ARKA_DEVICE_BAUD"),
            }
        }

        if let Some(id) = lookup("ARKA_OPERATOR_ID") {
            match id.parse::<u32>() {
                Ok(i) => self.operator.id = i,
                Err(_) => warn!(value = %id, "Ignoring invalid ARKA_OPERATOR_ID"),
            }
        }

        if let Some(passwords) = lookup("ARKA_OPERATOR_PASSWORDS") {
            let parsed: Vec<String> = passwords
                .split(',')
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(String::from)
                .collect();
            if parsed.is_empty() {
                warn!("Ignoring empty ARKA_OPERATOR_PASSWORDS");
            } else {
                self.operator.passwords = parsed;
            }
        }

        if let Some(id) = lookup("ARKA_WORKER_ID") {
            self.worker.id = id;
        }

        if let Some(path) = lookup("ARKA_DB_PATH") {
            self.worker.db_path = PathBuf::from(path);
        }

        if let Some(port) = lookup("ARKA_API_PORT") {
            match port.parse::<u16>() {
                Ok(p) => self.api.port = p,
                Err(_) => warn!(value = %port, "Ignoring invalid ARKA_API_PORT"),
            }
        }

        if let Some(simulate) = lookup("ARKA_SIMULATE") {
            match simulate.to_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => self.device.simulate = true,
                "0" | "false" | "no" | "off" => self.device.simulate = false,
                _ => warn!(value = %simulate, "Ignoring invalid ARKA_SIMULATE"),
            }
        }
    }

    /// Returns the default config file path.
    fn default_config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("com", "arka", "arka")
            .map(|dirs| dirs.config_dir().join("fiscal.toml"))
    }

    /// Company settings from the `[company]` section.
    pub fn company_settings(&self) -> CompanySettings {
        CompanySettings::from(&self.company)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config() {
        let config = FiscalConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.receipt.name_width, 32);
        assert_eq!(config.receipt.vat_class, "A");
        assert_eq!(config.recovery.settle_delay_ms, 50);
        assert_eq!(config.recovery.cancel_bytes().unwrap(), vec![0x3C]);
        assert_eq!(config.pool.freshness_window(), Duration::from_secs(5));
        assert_eq!(config.header.total_lines, 8);
        assert_eq!(config.worker.retention_days, 7);
    }

    #[test]
    fn test_toml_sections() {
        let config = FiscalConfig::from_toml(
            r#"
            [device]
            port = "/dev/ttyUSB0"
            baud = 9600

            [operator]
            id = 3
            passwords = ["9999"]

            [company]
            name = "Arka Market"
            tvsh_number = "330000001"
            "#,
        )
        .unwrap();

        assert_eq!(config.device.port.as_deref(), Some("/dev/ttyUSB0"));
        assert_eq!(config.device.baud, 9600);
        assert_eq!(config.operator.id, 3);
        assert_eq!(config.operator.passwords, vec!["9999".to_string()]);
        assert_eq!(
            config.company_settings().vat_number.as_deref(),
            Some("330000001")
        );
        // Untouched sections keep defaults.
        assert_eq!(config.gateway.port, 4444);
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("ARKA_GATEWAY_HOST", "10.0.0.5"),
            ("ARKA_GATEWAY_PORT", "not-a-port"),
            ("ARKA_OPERATOR_PASSWORDS", " 1111, ,2222 "),
            ("ARKA_SIMULATE", "true"),
            ("ARKA_DB_PATH", "/tmp/q.db"),
        ]
        .into_iter()
        .collect();

        let mut config = FiscalConfig::default();
        config.apply_overrides(|k| env.get(k).map(|v| v.to_string()));

        assert_eq!(config.gateway.host, "10.0.0.5");
        assert_eq!(config.gateway.port, 4444);
        assert_eq!(
            config.operator.passwords,
            vec!["1111".to_string(), "2222".to_string()]
        );
        assert!(config.device.simulate);
        assert_eq!(config.worker.db_path, PathBuf::from("/tmp/q.db"));
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut config = FiscalConfig::default();
        config.operator.passwords.clear();
        assert!(config.validate().is_err());

        let mut config = FiscalConfig::default();
        config.recovery.cancel_command = "zz".to_string();
        assert!(matches!(config.validate(), Err(FiscalError::Config(_))));

        let mut config = FiscalConfig::default();
        config.header.total_lines = 2;
        assert!(config.validate().is_err());
    }
}
