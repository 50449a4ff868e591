//! # Domain Types
//!
//! Types shared by terminals, the print queue and the fiscal worker.
//!
//! ## Type Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Domain Types                                    │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌─────────────────┐   ┌─────────────────┐       │
//! │  │    PrintJob     │   │   JobPayload    │   │    LineItem     │       │
//! │  │  ─────────────  │   │  ─────────────  │   │  ─────────────  │       │
//! │  │  id (UUID)      │   │  items          │──►│  name           │       │
//! │  │  type           │   │  paymentMethod  │   │  priceCents     │       │
//! │  │  payload ───────┼──►└─────────────────┘   │  quantity       │       │
//! │  │  status         │                         └─────────────────┘       │
//! │  │  priority       │   ┌─────────────────┐   ┌─────────────────┐       │
//! │  └─────────────────┘   │    JobStatus    │   │     JobType     │       │
//! │                        │  ─────────────  │   │  ─────────────  │       │
//! │                        │  Pending        │   │  Receipt        │       │
//! │                        │  Claimed        │   │  Storno         │       │
//! │                        │  Completed      │   │  ZReport        │       │
//! │                        │  Failed         │   └─────────────────┘       │
//! │                        └─────────────────┘                              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Job Status Lifecycle
//! ```text
//!   submit ──► Pending ──claim──► Claimed ──┬──► Completed
//!                 ▲                          └──► Failed
//!                 └──── requeue (stale claim after a crash)
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use ts_rs::TS;
use uuid::Uuid;

use crate::error::CoreError;
use crate::money::{Money, Quantity};
use crate::{DEFAULT_PRIORITY, ZREPORT_PRIORITY};

// =============================================================================
// Job Type
// =============================================================================

/// What a print job asks the fiscal device to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[ts(export)]
#[serde(rename_all = "lowercase")]
pub enum JobType {
    /// A fiscal sale receipt.
    Receipt,
    /// A fiscal reversal of a previously printed sale.
    Storno,
    /// The day-closing report.
    #[serde(rename = "zreport", alias = "z_report")]
    ZReport,
}

impl JobType {
    /// Returns the wire/database name.
    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::Receipt => "receipt",
            JobType::Storno => "storno",
            JobType::ZReport => "zreport",
        }
    }

    /// Queue priority used when the submitter does not set one.
    pub fn default_priority(&self) -> i64 {
        match self {
            JobType::ZReport => ZREPORT_PRIORITY,
            JobType::Receipt | JobType::Storno => DEFAULT_PRIORITY,
        }
    }

    /// Returns true for jobs that print line items.
    pub fn carries_items(&self) -> bool {
        matches!(self, JobType::Receipt | JobType::Storno)
    }
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobType {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "receipt" | "sale" => Ok(JobType::Receipt),
            "storno" => Ok(JobType::Storno),
            "zreport" | "z_report" | "z" => Ok(JobType::ZReport),
            other => Err(CoreError::UnknownJobType(other.to_string())),
        }
    }
}

// =============================================================================
// Job Status
// =============================================================================

/// Queue status of a print job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[ts(export)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Waiting for the worker.
    Pending,
    /// Owned by exactly one worker.
    Claimed,
    /// Printed successfully.
    Completed,
    /// Gave up; `error` holds the reason.
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Claimed => "claimed",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    /// Completed and failed jobs never change again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

impl Default for JobStatus {
    fn default() -> Self {
        JobStatus::Pending
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(JobStatus::Pending),
            "claimed" => Ok(JobStatus::Claimed),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            other => Err(CoreError::UnknownJobStatus(other.to_string())),
        }
    }
}

// =============================================================================
// Payment Method
// =============================================================================

/// How the customer paid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "lowercase")]
pub enum PaymentMethod {
    Cash,
    Card,
}

impl Default for PaymentMethod {
    fn default() -> Self {
        PaymentMethod::Cash
    }
}

impl fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PaymentMethod::Cash => f.write_str("cash"),
            PaymentMethod::Card => f.write_str("card"),
        }
    }
}

impl FromStr for PaymentMethod {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "cash" | "para" => Ok(PaymentMethod::Cash),
            "card" | "kartel" | "bank" => Ok(PaymentMethod::Card),
            other => Err(CoreError::UnknownPaymentMethod(other.to_string())),
        }
    }
}

// =============================================================================
// Payload
// =============================================================================

/// A single receipt line, in the order the terminal submitted it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct LineItem {
    /// Display name; truncated to the device field width when printed.
    pub name: String,

    /// Unit price in cents.
    pub price_cents: Money,

    /// Quantity in thousandths (1000 = 1 unit).
    #[serde(default)]
    pub quantity: Quantity,
}

impl LineItem {
    pub fn new(name: impl Into<String>, price_cents: i64, quantity: Quantity) -> Self {
        LineItem {
            name: name.into(),
            price_cents: Money::from_cents(price_cents),
            quantity,
        }
    }

    /// Line total before any device-side rounding.
    pub fn line_total(&self) -> Result<Money, CoreError> {
        self.price_cents.checked_times(self.quantity).ok_or_else(|| {
            CoreError::InvalidPayload(format!("line total overflows for item '{}'", self.name))
        })
    }
}

/// Job payload: line items and payment method, or empty for a Z-report.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct JobPayload {
    #[serde(default)]
    pub items: Vec<LineItem>,

    #[serde(default)]
    pub payment_method: PaymentMethod,
}

impl JobPayload {
    /// Payload for a sale or storno.
    pub fn with_items(items: Vec<LineItem>, payment_method: PaymentMethod) -> Self {
        JobPayload {
            items,
            payment_method,
        }
    }

    /// Sum of line totals.
    pub fn total(&self) -> Result<Money, CoreError> {
        let lines = self
            .items
            .iter()
            .map(LineItem::line_total)
            .collect::<Result<Vec<_>, _>>()?;
        Money::checked_sum(lines)
            .ok_or_else(|| CoreError::InvalidPayload("receipt total overflows".to_string()))
    }

    /// Serializes to the JSON text stored in the queue.
    pub fn to_json(&self) -> Result<String, CoreError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parses the JSON text stored in the queue. Empty text is an empty payload.
    pub fn from_json(json: &str) -> Result<Self, CoreError> {
        if json.trim().is_empty() {
            return Ok(JobPayload::default());
        }
        Ok(serde_json::from_str(json)?)
    }
}

// =============================================================================
// Print Job
// =============================================================================

/// A submission from a terminal, before it has an id.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct NewPrintJob {
    #[serde(rename = "type")]
    pub job_type: JobType,

    #[serde(default)]
    pub payload: JobPayload,

    /// Identity of the submitting terminal.
    pub device_id: String,

    /// Back-reference into the business domain's sale record.
    #[serde(default)]
    pub fiscal_sale_id: Option<String>,

    /// Lower runs sooner. Defaults by job type.
    #[serde(default)]
    pub priority: Option<i64>,
}

impl NewPrintJob {
    /// A sale receipt from `device_id`.
    pub fn receipt(device_id: impl Into<String>, payload: JobPayload) -> Self {
        NewPrintJob {
            job_type: JobType::Receipt,
            payload,
            device_id: device_id.into(),
            fiscal_sale_id: None,
            priority: None,
        }
    }

    /// A storno reversing a previously printed sale.
    pub fn storno(device_id: impl Into<String>, payload: JobPayload) -> Self {
        NewPrintJob {
            job_type: JobType::Storno,
            ..NewPrintJob::receipt(device_id, payload)
        }
    }

    /// A Z-report.
    pub fn z_report(device_id: impl Into<String>) -> Self {
        NewPrintJob {
            job_type: JobType::ZReport,
            ..NewPrintJob::receipt(device_id, JobPayload::default())
        }
    }

    pub fn with_fiscal_sale_id(mut self, id: impl Into<String>) -> Self {
        self.fiscal_sale_id = Some(id.into());
        self
    }

    pub fn with_priority(mut self, priority: i64) -> Self {
        self.priority = Some(priority);
        self
    }

    /// Priority that will be stored.
    pub fn effective_priority(&self) -> i64 {
        self.priority
            .unwrap_or_else(|| self.job_type.default_priority())
    }
}

/// Generates a fresh job identifier.
pub fn new_job_id() -> String {
    Uuid::new_v4().to_string()
}

/// A persisted print job.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct PrintJob {
    pub id: String,

    #[serde(rename = "type")]
    pub job_type: JobType,

    pub payload: JobPayload,

    pub device_id: String,

    pub fiscal_sale_id: Option<String>,

    pub priority: i64,

    pub status: JobStatus,

    /// Raw failure text, kept so an operator can diagnose without reproducing.
    pub error: Option<String>,

    /// Worker that holds or last held the claim.
    pub claimed_by: Option<String>,

    /// Number of times the job has been claimed.
    pub attempts: i64,

    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,

    #[ts(as = "Option<String>")]
    pub claimed_at: Option<DateTime<Utc>>,

    #[ts(as = "Option<String>")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl PrintJob {
    /// Builds a pending job from a submission.
    pub fn from_new(new: NewPrintJob, id: String, created_at: DateTime<Utc>) -> Self {
        let priority = new.effective_priority();
        PrintJob {
            id,
            job_type: new.job_type,
            payload: new.payload,
            device_id: new.device_id,
            fiscal_sale_id: new.fiscal_sale_id,
            priority,
            status: JobStatus::Pending,
            error: None,
            claimed_by: None,
            attempts: 0,
            created_at,
            claimed_at: None,
            completed_at: None,
        }
    }
}

// =============================================================================
// Queue Statistics
// =============================================================================

/// Queue counters returned to terminals and operators.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct QueueStats {
    pub pending: i64,
    pub claimed: i64,
    pub completed: i64,
    pub failed: i64,
    /// Age of the oldest pending job, if any.
    pub oldest_pending_age_secs: Option<i64>,
}

impl QueueStats {
    pub fn total(&self) -> i64 {
        self.pending + self.claimed + self.completed + self.failed
    }
}

// =============================================================================
// Company Settings
// =============================================================================

/// Company record owned by the business domain; only the header uses it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct CompanySettings {
    pub name: String,

    #[serde(default)]
    pub address: String,

    /// Business registration number (NUI).
    #[serde(default)]
    pub business_number: Option<String>,

    /// Fiscal number (NF).
    #[serde(default)]
    pub fiscal_number: Option<String>,

    /// VAT number (TVSH).
    #[serde(default, alias = "tvshNumber", alias = "tvsh_number")]
    pub vat_number: Option<String>,
}

// =============================================================================
// Unit Tests
// =============================================================================
