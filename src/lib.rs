//! # Fuel Telemetry
//!
//! Ingests the line-oriented telemetry a fuel-dispensing terminal prints on
//! its serial port and reconciles it against persistent card balances.
//!
//! ## Design Principles
//!
//! - **Audit first**: every non-blank line is stored verbatim before it is
//!   interpreted
//! - **Never fail on input**: unknown lines classify as `Unrecognized`
//! - **Fixed-point volumes**: 2 decimal places via `rust_decimal`
//! - **Explicit upsert**: update, then create when zero rows were touched
//! - **Injected storage**: the core only sees the `BalanceGateway` trait
//!
//! ## Example
//!
//! ```
//! use fuel_telemetry::{Ingestor, MemoryGateway, Outcome};
//!
//! let mut ingestor = Ingestor::new(MemoryGateway::new());
//! let report = ingestor.ingest("C#12345-100.00L");
//! assert_eq!(report.outcome, Some(Outcome::Applied));
//! ```

pub mod card;
pub mod decimal;
pub mod engine;
pub mod error;
pub mod gateway;
pub mod ingest;
pub mod record;
pub mod report;
pub mod sqlite;

pub use card::{AuditEntry, CardBalance, TransactionEntry, DEFAULT_CARD_TYPE};
pub use decimal::Liters;
pub use engine::{Outcome, ReconciliationEngine};
pub use error::{QuantityError, Result, StoreError, TelemetryError};
pub use gateway::{BalanceGateway, MemoryGateway, RowsAffected};
pub use ingest::{
    Cancellable, IngestStats, Ingestor, LineReader, LineReport, LineSource, DEFAULT_MAX_LINE,
};
pub use record::{parse, Parser, Record};
pub use report::ReportWriter;
pub use sqlite::SqliteGateway;
