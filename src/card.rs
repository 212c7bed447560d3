//! Persistent card state and the append-only logs kept beside it.

use crate::decimal::Liters;
use chrono::{DateTime, Utc};

/// Card type assigned to cards first seen through telemetry.
pub const DEFAULT_CARD_TYPE: &str = "Standard";

/// Remaining fuel on a card.
///
/// Created on the first report that mentions the card, overwritten by every
/// later report, never deleted.
#[derive(Debug, Clone, PartialEq)]
pub struct CardBalance {
    /// Card number as printed by the terminal (digits, leading zeros kept).
    pub card_id: String,

    /// Last reported balance.
    pub balance_liters: Liters,

    /// Account category, if known.
    pub card_type: Option<String>,

    /// When the balance was last written.
    pub last_updated: DateTime<Utc>,
}

impl CardBalance {
    /// Creates a balance row stamped with the current time.
    pub fn new(card_id: &str, balance_liters: Liters, card_type: Option<&str>) -> Self {
        CardBalance {
            card_id: card_id.to_string(),
            balance_liters,
            card_type: card_type.map(str::to_string),
            last_updated: Utc::now(),
        }
    }

    /// Overwrites the balance and refreshes `last_updated`.
    pub fn set_balance(&mut self, balance_liters: Liters) {
        self.balance_liters = balance_liters;
        self.last_updated = Utc::now();
    }
}

/// One accepted sale. Immutable once written.
#[derive(Debug, Clone, PartialEq)]
pub struct TransactionEntry {
    pub card_id: String,
    pub used_liters: Liters,
    pub created_at: DateTime<Utc>,
}

/// One physically received line, stored verbatim.
#[derive(Debug, Clone, PartialEq)]
pub struct AuditEntry {
    pub raw_line: String,
    pub created_at: DateTime<Utc>,
}
