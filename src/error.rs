//! Error types for the telemetry ingester.

use thiserror::Error;

/// Result type alias for top-level operations
pub type Result<T> = std::result::Result<T, TelemetryError>;

/// Errors that stop the binary before or outside of line processing.
#[derive(Error, Debug)]
pub enum TelemetryError {
    /// Failed to open or read the input
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to write the CSV report
    #[error("CSV output error: {0}")]
    Csv(#[from] csv::Error),

    /// Failed to open or prepare the balance store
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

/// Errors reported by a balance store gateway.
///
/// Line-level failures carry this value inside `Outcome::Failed`, so it is
/// cheap to clone and comparable in tests.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// A create collided with an existing card row
    #[error("card {card_id} already exists")]
    DuplicateCard { card_id: String },

    /// A card that had to exist was not found
    #[error("card {card_id} not found")]
    CardNotFound { card_id: String },

    /// Connectivity, constraint or encoding failure in the backend
    #[error("backend failure: {0}")]
    Backend(String),
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        StoreError::Backend(err.to_string())
    }
}

/// Reasons a quantity token cannot become a `Liters` value.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QuantityError {
    /// Not a decimal number at all
    #[error("malformed quantity: {0}")]
    Malformed(String),

    /// Fuel quantities are never negative
    #[error("negative quantity: {0}")]
    Negative(String),

    /// More fractional digits than the fixed-point scale holds
    #[error("quantity {0} has more than two decimal places")]
    TooPrecise(String),
}
