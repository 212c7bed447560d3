//! Storage contract required by the reconciliation core, plus an in-memory
//! implementation.

use crate::card::{AuditEntry, CardBalance, TransactionEntry};
use crate::decimal::Liters;
use crate::error::StoreError;
use chrono::Utc;
use std::collections::BTreeMap;

/// Number of rows touched by an update.
pub type RowsAffected = usize;

/// Operations the core performs against card balance storage.
///
/// Every operation is atomic on its own; callers never assume that two
/// operations commit together. When several line sources share one store,
/// the implementation must serialize mutations of the same `card_id`.
pub trait BalanceGateway {
    /// Appends a raw line to the audit log.
    fn append_audit(&mut self, raw: &str) -> Result<(), StoreError>;

    /// Looks up a card's balance.
    fn get_balance(&mut self, card_id: &str) -> Result<Option<CardBalance>, StoreError>;

    /// Creates a card row. Fails with [`StoreError::DuplicateCard`] when the
    /// card already exists.
    fn create_balance(
        &mut self,
        card_id: &str,
        balance_liters: Liters,
        card_type: Option<&str>,
    ) -> Result<(), StoreError>;

    /// Overwrites a card's balance. Reports `0` rows, not an error, when the
    /// card does not exist.
    fn update_balance(
        &mut self,
        card_id: &str,
        balance_liters: Liters,
    ) -> Result<RowsAffected, StoreError>;

    /// Appends a sale to the transaction log.
    fn append_transaction(&mut self, card_id: &str, used_liters: Liters)
        -> Result<(), StoreError>;
}

impl<G: BalanceGateway + ?Sized> BalanceGateway for &mut G {
    fn append_audit(&mut self, raw: &str) -> Result<(), StoreError> {
        (**self).append_audit(raw)
    }

    fn get_balance(&mut self, card_id: &str) -> Result<Option<CardBalance>, StoreError> {
        (**self).get_balance(card_id)
    }

    fn create_balance(
        &mut self,
        card_id: &str,
        balance_liters: Liters,
        card_type: Option<&str>,
    ) -> Result<(), StoreError> {
        (**self).create_balance(card_id, balance_liters, card_type)
    }

    fn update_balance(
        &mut self,
        card_id: &str,
        balance_liters: Liters,
    ) -> Result<RowsAffected, StoreError> {
        (**self).update_balance(card_id, balance_liters)
    }

    fn append_transaction(
        &mut self,
        card_id: &str,
        used_liters: Liters,
    ) -> Result<(), StoreError> {
        (**self).append_transaction(card_id, used_liters)
    }
}

impl<G: BalanceGateway + ?Sized> BalanceGateway for Box<G> {
    fn append_audit(&mut self, raw: &str) -> Result<(), StoreError> {
        (**self).append_audit(raw)
    }

    fn get_balance(&mut self, card_id: &str) -> Result<Option<CardBalance>, StoreError> {
        (**self).get_balance(card_id)
    }

    fn create_balance(
        &mut self,
        card_id: &str,
        balance_liters: Liters,
        card_type: Option<&str>,
    ) -> Result<(), StoreError> {
        (**self).create_balance(card_id, balance_liters, card_type)
    }

    fn update_balance(
        &mut self,
        card_id: &str,
        balance_liters: Liters,
    ) -> Result<RowsAffected, StoreError> {
        (**self).update_balance(card_id, balance_liters)
    }

    fn append_transaction(
        &mut self,
        card_id: &str,
        used_liters: Liters,
    ) -> Result<(), StoreError> {
        (**self).append_transaction(card_id, used_liters)
    }
}

/// Process-local store, used when no database is configured and in tests.
#[derive(Debug, Default)]
pub struct MemoryGateway {
    balances: BTreeMap<String, CardBalance>,
    transactions: Vec<TransactionEntry>,
    audit_log: Vec<AuditEntry>,
}

impl MemoryGateway {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// All cards, ordered by card number.
    pub fn balances(&self) -> impl Iterator<Item = &CardBalance> {
        self.balances.values()
    }

    /// A single card, if present.
    pub fn balance(&self, card_id: &str) -> Option<&CardBalance> {
        self.balances.get(card_id)
    }

    /// Transaction log in append order.
    pub fn transactions(&self) -> &[TransactionEntry] {
        &self.transactions
    }

    /// Audit log in append order.
    pub fn audit_log(&self) -> &[AuditEntry] {
        &self.audit_log
    }
}

impl BalanceGateway for MemoryGateway {
    fn append_audit(&mut self, raw: &str) -> Result<(), StoreError> {
        self.audit_log.push(AuditEntry {
            raw_line: raw.to_string(),
            created_at: Utc::now(),
        });
        Ok(())
    }

    fn get_balance(&mut self, card_id: &str) -> Result<Option<CardBalance>, StoreError> {
        Ok(self.balances.get(card_id).cloned())
    }

    fn create_balance(
        &mut self,
        card_id: &str,
        balance_liters: Liters,
        card_type: Option<&str>,
    ) -> Result<(), StoreError> {
        if self.balances.contains_key(card_id) {
            return Err(StoreError::DuplicateCard {
                card_id: card_id.to_string(),
            });
        }
        self.balances.insert(
            card_id.to_string(),
            CardBalance::new(card_id, balance_liters, card_type),
        );
        Ok(())
    }

    fn update_balance(
        &mut self,
        card_id: &str,
        balance_liters: Liters,
    ) -> Result<RowsAffected, StoreError> {
        match self.balances.get_mut(card_id) {
            Some(card) => {
                card.set_balance(balance_liters);
                Ok(1)
            }
            None => Ok(0),
        }
    }

    fn append_transaction(
        &mut self,
        card_id: &str,
        used_liters: Liters,
    ) -> Result<(), StoreError> {
        self.transactions.push(TransactionEntry {
            card_id: card_id.to_string(),
            used_liters,
            created_at: Utc::now(),
        });
        Ok(())
    }
}
