//! Reconciliation of classified records against card balance storage.
//!
//! The engine holds no state of its own. Each record is applied as a short,
//! fixed sequence of gateway operations; none of them are assumed to commit
//! together, so every sequence is safe to retry from the start.

use crate::card::DEFAULT_CARD_TYPE;
use crate::decimal::Liters;
use crate::error::StoreError;
use crate::gateway::BalanceGateway;
use crate::record::Record;
use log::{debug, warn};

/// Result of reconciling one record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Store now reflects the record.
    Applied,

    /// Nothing to apply (unrecognized line).
    Skipped,

    /// A store operation failed; the record may be partially applied.
    Failed(StoreError),
}

impl Outcome {
    /// Short, stable name of the variant, used in reports.
    pub fn label(&self) -> &'static str {
        match self {
            Outcome::Applied => "applied",
            Outcome::Skipped => "skipped",
            Outcome::Failed(_) => "failed",
        }
    }

    /// Returns `true` for [`Outcome::Failed`].
    pub fn is_failed(&self) -> bool {
        matches!(self, Outcome::Failed(_))
    }
}

impl From<Result<(), StoreError>> for Outcome {
    fn from(result: Result<(), StoreError>) -> Self {
        match result {
            Ok(()) => Outcome::Applied,
            Err(e) => Outcome::Failed(e),
        }
    }
}

/// Applies records to a [`BalanceGateway`].
#[derive(Debug, Clone)]
pub struct ReconciliationEngine {
    /// Card type given to cards created on first sighting.
    card_type: String,
}

impl ReconciliationEngine {
    /// Creates an engine that files new cards as [`DEFAULT_CARD_TYPE`].
    pub fn new() -> Self {
        Self::with_card_type(DEFAULT_CARD_TYPE)
    }

    /// Creates an engine that files new cards under `card_type`.
    pub fn with_card_type(card_type: &str) -> Self {
        ReconciliationEngine {
            card_type: card_type.to_string(),
        }
    }

    /// Applies one record.
    ///
    /// The raw line must already be in the audit log; the engine never
    /// writes audit entries.
    pub fn reconcile<G>(&self, record: &Record, gateway: &mut G) -> Outcome
    where
        G: BalanceGateway + ?Sized,
    {
        let outcome: Outcome = match record {
            Record::BalanceReport {
                card_id,
                balance_liters,
            } => self.apply_balance(card_id, *balance_liters, gateway).into(),
            Record::TransactionReport {
                card_id,
                used_liters,
                balance_liters,
            } => self
                .apply_transaction(card_id, *used_liters, *balance_liters, gateway)
                .into(),
            Record::Unrecognized { .. } => Outcome::Skipped,
        };

        if let Outcome::Failed(e) = &outcome {
            warn!("Reconciling {} record failed: {}", record.kind(), e);
        }
        outcome
    }

    /// Upsert: update first, create on a zero-row update.
    ///
    /// A create that loses the race to a concurrent creator re-applies the
    /// update, so the reported balance still wins.
    fn apply_balance<G>(
        &self,
        card_id: &str,
        balance: Liters,
        gateway: &mut G,
    ) -> Result<(), StoreError>
    where
        G: BalanceGateway + ?Sized,
    {
        if gateway.update_balance(card_id, balance)? > 0 {
            debug!("Card {} balance set to {}", card_id, balance);
            return Ok(());
        }

        debug!("Card {} unknown, creating with {}", card_id, balance);
        match gateway.create_balance(card_id, balance, Some(self.card_type.as_str())) {
            Ok(()) => Ok(()),
            Err(StoreError::DuplicateCard { .. }) => {
                debug!("Card {} created concurrently, re-applying update", card_id);
                if gateway.update_balance(card_id, balance)? == 0 {
                    return Err(StoreError::CardNotFound {
                        card_id: card_id.to_string(),
                    });
                }
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Seeds unknown cards with the post-sale balance, then logs the sale
    /// before overwriting the balance.
    fn apply_transaction<G>(
        &self,
        card_id: &str,
        used: Liters,
        balance: Liters,
        gateway: &mut G,
    ) -> Result<(), StoreError>
    where
        G: BalanceGateway + ?Sized,
    {
        if gateway.get_balance(card_id)?.is_none() {
            debug!("Card {} unknown, seeding with {}", card_id, balance);
            match gateway.create_balance(card_id, balance, Some(self.card_type.as_str())) {
                Ok(()) | Err(StoreError::DuplicateCard { .. }) => {}
                Err(e) => return Err(e),
            }
        }

        gateway.append_transaction(card_id, used)?;
        if gateway.update_balance(card_id, balance)? == 0 {
            return Err(StoreError::CardNotFound {
                card_id: card_id.to_string(),
            });
        }
        debug!("Card {} sold {}, balance {}", card_id, used, balance);
        Ok(())
    }
}

impl Default for ReconciliationEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::card::CardBalance;
    use crate::gateway::fakes::FlakyGateway;
    use crate::gateway::{MemoryGateway, RowsAffected};
    use crate::record::parse;
    use std::str::FromStr;

    fn qty(s: &str) -> Liters {
        Liters::from_str(s).unwrap()
    }

    fn reconcile_str(line: &str, store: &mut MemoryGateway) -> Outcome {
        ReconciliationEngine::new().reconcile(&parse(line), store)
    }

    /// Gateway whose creates always collide, as if another terminal created
    /// the card between our update and create. With no competitor balance
    /// the card is gone again by the time we look.
    struct RacingGateway {
        inner: MemoryGateway,
        competitor_balance: Option<Liters>,
    }

    impl BalanceGateway for RacingGateway {
        fn append_audit(&mut self, raw: &str) -> Result<(), StoreError> {
            self.inner.append_audit(raw)
        }

        fn get_balance(&mut self, card_id: &str) -> Result<Option<CardBalance>, StoreError> {
            self.inner.get_balance(card_id)
        }

        fn create_balance(
            &mut self,
            card_id: &str,
            _balance: Liters,
            card_type: Option<&str>,
        ) -> Result<(), StoreError> {
            if let Some(competitor) = self.competitor_balance {
                self.inner.create_balance(card_id, competitor, card_type)?;
            }
            Err(StoreError::DuplicateCard {
                card_id: card_id.to_string(),
            })
        }

        fn update_balance(
            &mut self,
            card_id: &str,
            balance: Liters,
        ) -> Result<RowsAffected, StoreError> {
            self.inner.update_balance(card_id, balance)
        }

        fn append_transaction(&mut self, card_id: &str, used: Liters) -> Result<(), StoreError> {
            self.inner.append_transaction(card_id, used)
        }
    }

    #[test]
    fn test_balance_report_creates_unknown_card() {
        let mut store = MemoryGateway::new();
        assert_eq!(reconcile_str("C#12345-100.00L", &mut store), Outcome::Applied);

        let card = store.balance("12345").unwrap();
        assert_eq!(card.balance_liters, qty("100.00"));
        assert_eq!(card.card_type.as_deref(), Some(DEFAULT_CARD_TYPE));
    }

    #[test]
    fn test_balance_report_overwrites_known_card() {
        let mut store = MemoryGateway::new();
        reconcile_str("C#1-100.00L", &mut store);
        assert_eq!(reconcile_str("C#1-42.00L", &mut store), Outcome::Applied);
        assert_eq!(store.balance("1").unwrap().balance_liters, qty("42"));
        assert_eq!(store.balances().count(), 1);
    }

    #[test]
    fn test_transaction_on_known_card() {
        let mut store = MemoryGateway::new();
        reconcile_str("C#12345-100.00L", &mut store);

        let outcome = reconcile_str("Card:12345 Sale:5.00L Bal:95.00L", &mut store);

        assert_eq!(outcome, Outcome::Applied);
        assert_eq!(store.balance("12345").unwrap().balance_liters, qty("95"));
        assert_eq!(store.transactions().len(), 1);
        assert_eq!(store.transactions()[0].card_id, "12345");
        assert_eq!(store.transactions()[0].used_liters, qty("5"));
    }

    #[test]
    fn test_transaction_seeds_unknown_card_with_resulting_balance() {
        let mut store = MemoryGateway::new();

        let outcome = reconcile_str("Card:67890 Sale:10.00L Bal:90.00L", &mut store);

        assert_eq!(outcome, Outcome::Applied);
        let card = store.balance("67890").unwrap();
        assert_eq!(card.balance_liters, qty("90.00"));
        assert_eq!(card.card_type.as_deref(), Some("Standard"));
        assert_eq!(store.transactions().len(), 1);
        assert_eq!(store.transactions()[0].used_liters, qty("10.00"));
    }

    #[test]
    fn test_unrecognized_is_skipped_without_mutation() {
        let mut store = MemoryGateway::new();
        assert_eq!(reconcile_str("garbage line", &mut store), Outcome::Skipped);
        assert_eq!(store.balances().count(), 0);
        assert!(store.transactions().is_empty());
        assert!(store.audit_log().is_empty());
    }

    #[test]
    fn test_custom_card_type() {
        let mut store = MemoryGateway::new();
        let engine = ReconciliationEngine::with_card_type("Fleet");
        engine.reconcile(&parse("C#5-1.00L"), &mut store);
        assert_eq!(store.balance("5").unwrap().card_type.as_deref(), Some("Fleet"));
    }

    #[test]
    fn test_duplicate_create_race_still_applies_reported_balance() {
        let mut store = RacingGateway {
            inner: MemoryGateway::new(),
            competitor_balance: Some(qty("1.00")),
        };

        let outcome = ReconciliationEngine::new().reconcile(&parse("C#7-55.00L"), &mut store);

        assert_eq!(outcome, Outcome::Applied);
        assert_eq!(store.inner.balance("7").unwrap().balance_liters, qty("55"));
    }

    #[test]
    fn test_transaction_tolerates_duplicate_create_race() {
        let mut store = RacingGateway {
            inner: MemoryGateway::new(),
            competitor_balance: Some(qty("100.00")),
        };

        let outcome = ReconciliationEngine::new()
            .reconcile(&parse("Card:7 Sale:5.00L Bal:95.00L"), &mut store);

        assert_eq!(outcome, Outcome::Applied);
        assert_eq!(store.inner.balance("7").unwrap().balance_liters, qty("95"));
        assert_eq!(store.inner.transactions().len(), 1);
    }

    #[test]
    fn test_duplicate_race_with_vanished_card_fails() {
        let mut store = RacingGateway {
            inner: MemoryGateway::new(),
            competitor_balance: None,
        };

        let outcome = ReconciliationEngine::new().reconcile(&parse("C#7-55.00L"), &mut store);

        assert_eq!(
            outcome,
            Outcome::Failed(StoreError::CardNotFound {
                card_id: "7".to_string()
            })
        );
        assert!(store.inner.balance("7").is_none());
    }

    fn seeded(failing: &[&'static str]) -> FlakyGateway {
        let mut store = FlakyGateway::failing(failing);
        store
            .inner
            .create_balance("1", qty("100.00"), Some(DEFAULT_CARD_TYPE))
            .unwrap();
        store
    }

    #[test]
    fn test_create_failure_after_update_miss() {
        let mut store = FlakyGateway::failing(&["create_balance"]);

        let outcome = ReconciliationEngine::new().reconcile(&parse("C#1-5.00L"), &mut store);

        assert!(matches!(outcome, Outcome::Failed(StoreError::Backend(_))));
        assert_eq!(store.calls, vec!["update_balance", "create_balance"]);
        assert!(store.inner.balance("1").is_none());
    }

    #[test]
    fn test_append_failure_leaves_balance_untouched() {
        let mut store = seeded(&["append_transaction"]);

        let outcome = ReconciliationEngine::new()
            .reconcile(&parse("Card:1 Sale:5.00L Bal:95.00L"), &mut store);

        assert!(outcome.is_failed());
        assert_eq!(store.calls, vec!["get_balance", "append_transaction"]);
        assert_eq!(store.inner.balance("1").unwrap().balance_liters, qty("100"));
        assert!(store.inner.transactions().is_empty());
    }

    #[test]
    fn test_update_failure_after_append_keeps_logged_sale() {
        let mut store = seeded(&["update_balance"]);

        let outcome = ReconciliationEngine::new()
            .reconcile(&parse("Card:1 Sale:5.00L Bal:95.00L"), &mut store);

        assert!(outcome.is_failed());
        assert_eq!(
            store.calls,
            vec!["get_balance", "append_transaction", "update_balance"]
        );
        assert_eq!(store.inner.transactions().len(), 1);
        assert_eq!(store.inner.balance("1").unwrap().balance_liters, qty("100"));
    }

    #[test]
    fn test_lookup_failure_stops_transaction_before_any_write() {
        let mut store = FlakyGateway::failing(&["get_balance"]);

        let outcome = ReconciliationEngine::new()
            .reconcile(&parse("Card:1 Sale:5.00L Bal:95.00L"), &mut store);

        assert!(outcome.is_failed());
        assert_eq!(store.calls, vec!["get_balance"]);
        assert_eq!(store.inner.balances().count(), 0);
        assert!(store.inner.transactions().is_empty());
    }

    #[test]
    fn test_outcome_labels() {
        assert_eq!(Outcome::Applied.label(), "applied");
        assert_eq!(Outcome::Skipped.label(), "skipped");
        let failed = Outcome::Failed(StoreError::Backend("down".to_string()));
        assert_eq!(failed.label(), "failed");
        assert!(failed.is_failed());
    }
}
