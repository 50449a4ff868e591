//! # arka-db: Print Job Queue Storage
//!
//! SQLite persistence for the fiscal print queue, using sqlx.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                     Arka Fiscal Print Data Flow                         │
//! │                                                                         │
//! │  Terminal ──POST /print-jobs──► print agent                            │
//! │                                      │                                  │
//! │  ┌───────────────────────────────────▼─────────────────────────────┐   │
//! │  │                     arka-db (THIS CRATE)                        │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────────┐    ┌────────────────────┐  ┌────────────┐  │   │
//! │  │   │   Database    │    │ PrintJobRepository │  │ Migrations │  │   │
//! │  │   │   (pool.rs)   │◄───│ submit / claim     │  │ (embedded) │  │   │
//! │  │   │  SqlitePool   │    │ mark / cleanup     │  │            │  │   │
//! │  │   └───────────────┘    └────────────────────┘  └────────────┘  │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                      │                                  │
//! │                                      ▼                                  │
//! │                         fiscal worker (arka-fiscal)                     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use arka_db::{Database, DbConfig};
//!
//! let db = Database::new(DbConfig::new("print-queue.db")).await?;
//! let job = db.print_jobs().submit(new_job).await?;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod migrations;
pub mod pool;
pub mod repository;

// =============================================================================
// Re-exports
// =============================================================================

pub use error::{DbError, DbResult};
pub use pool::{Database, DbConfig};

pub use repository::print_job::PrintJobRepository;
