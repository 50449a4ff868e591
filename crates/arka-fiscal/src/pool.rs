//! # Printer Connection Pool
//!
//! Owns the single hardware session of the process.
//!
//! ## Connect Tiers
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       connect_printer()                                 │
//! │                                                                         │
//! │  connecting flag taken? ──yes──► ConnectionInProgress                   │
//! │       │ no                                                              │
//! │       ▼                                                                 │
//! │  FAST    cached descriptor + connected + health check < 5s             │
//! │          + status read ok                      ──► return               │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  MEDIUM  cached descriptor + status read ok    ──► refresh, return      │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  SLOW    configured port or find_device()                              │
//! │          → set_serial_settings → status read   ──► cache, return        │
//! │          any failure: clear descriptor, DeviceNotFound / DeviceSetup   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! State sits behind one async mutex; the `connecting` flag sits beside it so
//! a second connect is refused instead of queued.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::{DeviceSettings, GatewaySettings, PoolSettings};
use crate::device::{DeviceDescriptor, DeviceSession, DriverFactory};
use crate::error::{FiscalError, FiscalResult};

/// Which tier satisfied a `connect_printer` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectPath {
    Fast,
    Medium,
    Slow,
}

#[derive(Default)]
struct PoolState {
    session: Option<DeviceSession>,
    descriptor: Option<DeviceDescriptor>,
    header_fingerprint: Option<String>,
    last_health_check: Option<Instant>,
    server_connected: bool,
    printer_connected: bool,
}

/// Read-only view of the pool for diagnostics.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolSnapshot {
    pub server_connected: bool,
    pub printer_connected: bool,
    pub connecting: bool,
    pub descriptor: Option<DeviceDescriptor>,
    pub header_fingerprint: Option<String>,
    pub last_health_check_age_ms: Option<u64>,
}

/// Releases the `connecting` flag on drop.
struct ConnectGuard<'a> {
    flag: &'a AtomicBool,
}

impl Drop for ConnectGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

/// The process-wide printer session.
pub struct ConnectionPool {
    factory: Arc<dyn DriverFactory>,
    gateway: GatewaySettings,
    device: DeviceSettings,
    settings: PoolSettings,
    state: Mutex<PoolState>,
    connecting: AtomicBool,
}

impl ConnectionPool {
    pub fn new(
        factory: Arc<dyn DriverFactory>,
        gateway: GatewaySettings,
        device: DeviceSettings,
        settings: PoolSettings,
    ) -> Self {
        ConnectionPool {
            factory,
            gateway,
            device,
            settings,
            state: Mutex::new(PoolState::default()),
            connecting: AtomicBool::new(false),
        }
    }

    fn try_guard(&self) -> FiscalResult<ConnectGuard<'_>> {
        self.connecting
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| FiscalError::ConnectionInProgress)?;
        Ok(ConnectGuard {
            flag: &self.connecting,
        })
    }

    fn configured_descriptor(&self) -> Option<DeviceDescriptor> {
        self.device.port.as_ref().map(|port| DeviceDescriptor {
            port: port.clone(),
            baud: self.device.baud,
        })
    }

    // =========================================================================
    // Connect
    // =========================================================================

    /// Points the driver at the local gateway.
    ///
    /// Idempotent. On failure the pool is left as it was.
    pub async fn connect_server(&self) -> FiscalResult<()> {
        let _guard = self.try_guard()?;
        let mut state = self.state.lock().await;

        if state.server_connected && state.session.is_some() {
            return Ok(());
        }

        let session = match &state.session {
            Some(session) => session.clone(),
            None => DeviceSession::new(
                self.factory
                    .create()
                    .map_err(|e| FiscalError::ServerConnection(e.to_string()))?,
            ),
        };

        session
            .set_server_settings(&self.gateway.host, self.gateway.port)
            .await
            .map_err(|e| FiscalError::ServerConnection(e.to_string()))?;

        info!(host = %self.gateway.host, port = self.gateway.port, "Gateway connected");
        state.session = Some(session);
        state.server_connected = true;
        Ok(())
    }

    /// Makes sure the printer answers, taking the cheapest tier that works.
    pub async fn connect_printer(&self) -> FiscalResult<ConnectPath> {
        let _guard = self.try_guard()?;
        let mut state = self.state.lock().await;

        let session = match (&state.session, state.server_connected) {
            (Some(session), true) => session.clone(),
            _ => return Err(FiscalError::NotConnected),
        };

        if state.descriptor.is_some() {
            let fresh = state.printer_connected
                && state
                    .last_health_check
                    .is_some_and(|at| at.elapsed() < self.settings.freshness_window());

            match session.read_status().await {
                Ok(_) => {
                    state.printer_connected = true;
                    state.last_health_check = Some(Instant::now());
                    let path = if fresh {
                        ConnectPath::Fast
                    } else {
                        ConnectPath::Medium
                    };
                    debug!(?path, "Printer connection reused");
                    return Ok(path);
                }
                Err(e) => {
                    warn!(error = %e, "Cached printer did not answer, reconnecting");
                    state.printer_connected = false;
                }
            }
        }

        let descriptor = match state.descriptor.clone().or_else(|| self.configured_descriptor()) {
            Some(descriptor) => descriptor,
            None => {
                info!("Scanning for fiscal printer");
                match session.find_device().await {
                    Ok(Some(descriptor)) => descriptor,
                    Ok(None) => {
                        state.descriptor = None;
                        return Err(FiscalError::DeviceNotFound(
                            "no device answered the scan".to_string(),
                        ));
                    }
                    Err(e) => {
                        state.descriptor = None;
                        return Err(FiscalError::DeviceNotFound(e.to_string()));
                    }
                }
            }
        };

        let setup = async {
            session
                .set_serial_settings(&descriptor.port, descriptor.baud, false)
                .await?;
            session.read_status().await
        };

        if let Err(e) = setup.await {
            state.descriptor = None;
            state.printer_connected = false;
            return Err(FiscalError::DeviceSetup {
                port: descriptor.port,
                message: e.to_string(),
            });
        }

        info!(port = %descriptor.port, baud = descriptor.baud, "Fiscal printer connected");
        state.descriptor = Some(descriptor);
        state.printer_connected = true;
        state.last_health_check = Some(Instant::now());
        Ok(ConnectPath::Slow)
    }

    /// Clears everything. The next connect behaves like the first one.
    pub async fn reset(&self) {
        let mut state = self.state.lock().await;
        *state = PoolState::default();
        info!("Printer connection reset");
    }

    // =========================================================================
    // Session Access
    // =========================================================================

    /// Session of a connected printer.
    pub async fn session(&self) -> FiscalResult<DeviceSession> {
        let state = self.state.lock().await;
        match (&state.session, state.printer_connected) {
            (Some(session), true) => Ok(session.clone()),
            _ => Err(FiscalError::NotConnected),
        }
    }

    pub async fn is_server_connected(&self) -> bool {
        self.state.lock().await.server_connected
    }

    /// Records that the printer just answered.
    pub async fn mark_healthy(&self) {
        self.state.lock().await.last_health_check = Some(Instant::now());
    }

    pub async fn header_fingerprint(&self) -> Option<String> {
        self.state.lock().await.header_fingerprint.clone()
    }

    pub async fn set_header_fingerprint(&self, fingerprint: Option<String>) {
        self.state.lock().await.header_fingerprint = fingerprint;
    }

    pub async fn snapshot(&self) -> PoolSnapshot {
        let state = self.state.lock().await;
        PoolSnapshot {
            server_connected: state.server_connected,
            printer_connected: state.printer_connected,
            connecting: self.connecting.load(Ordering::Acquire),
            descriptor: state.descriptor.clone(),
            header_fingerprint: state.header_fingerprint.clone(),
            last_health_check_age_ms: state
                .last_health_check
                .map(|at| at.elapsed().as_millis() as u64),
        }
    }
}
