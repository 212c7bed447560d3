//! Durable [`BalanceGateway`] backed by SQLite.
//!
//! Quantities are stored as fixed-point text so balances round-trip exactly,
//! timestamps as RFC 3339 UTC strings. Each gateway operation is a single
//! statement and therefore atomic on its own.

use crate::card::CardBalance;
use crate::decimal::Liters;
use crate::error::StoreError;
use crate::gateway::{BalanceGateway, RowsAffected};
use chrono::{DateTime, Utc};
use log::debug;
use rusqlite::{params, Connection, ErrorCode, OptionalExtension};
use std::path::Path;
use std::str::FromStr;

/// SQLite-backed card balance store.
pub struct SqliteGateway {
    conn: Connection,
}

impl SqliteGateway {
    /// Opens (or creates) a database file and prepares the schema.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let conn = Connection::open(path.as_ref())?;
        // WAL keeps readers unblocked while the ingester writes
        conn.pragma_update(None, "journal_mode", "WAL")?;
        debug!("Opened balance store at {}", path.as_ref().display());
        Self::with_connection(conn)
    }

    /// Creates a private in-memory database.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, StoreError> {
        setup_schema(&conn)?;
        Ok(SqliteGateway { conn })
    }

    /// All cards, ordered by card number.
    pub fn balances(&self) -> Result<Vec<CardBalance>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT card_number, fuel_balance, card_type, last_updated
             FROM card_balances
             ORDER BY card_number",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok(BalanceRow {
                    card_id: row.get(0)?,
                    balance: row.get(1)?,
                    card_type: row.get(2)?,
                    last_updated: row.get(3)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter().map(BalanceRow::into_card_balance).collect()
    }

    /// Number of rows in the transaction log.
    pub fn transaction_count(&self) -> Result<usize, StoreError> {
        self.count("transaction_log")
    }

    /// Number of rows in the audit log.
    pub fn audit_count(&self) -> Result<usize, StoreError> {
        self.count("audit_log")
    }

    fn count(&self, table: &str) -> Result<usize, StoreError> {
        let count: i64 = self
            .conn
            .query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))?;
        Ok(count as usize)
    }
}

/// Creates the three tables if they do not exist yet.
fn setup_schema(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS card_balances (
            card_number TEXT PRIMARY KEY NOT NULL,
            fuel_balance TEXT NOT NULL,
            card_type TEXT,
            last_updated TEXT NOT NULL
        );
        CREATE TABLE IF NOT EXISTS transaction_log (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            card_number TEXT NOT NULL,
            fuel_used TEXT NOT NULL,
            created_at TEXT NOT NULL
        );
        CREATE TABLE IF NOT EXISTS audit_log (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            raw_data TEXT NOT NULL,
            created_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_transaction_card ON transaction_log(card_number);",
    )?;
    Ok(())
}

/// Card row as stored, before decoding.
struct BalanceRow {
    card_id: String,
    balance: String,
    card_type: Option<String>,
    last_updated: String,
}

impl BalanceRow {
    fn into_card_balance(self) -> Result<CardBalance, StoreError> {
        let balance_liters = Liters::from_str(&self.balance).map_err(|e| {
            StoreError::Backend(format!("card {} has bad balance: {}", self.card_id, e))
        })?;
        let last_updated = DateTime::parse_from_rfc3339(&self.last_updated)
            .map_err(|e| {
                StoreError::Backend(format!("card {} has bad timestamp: {}", self.card_id, e))
            })?
            .with_timezone(&Utc);

        Ok(CardBalance {
            card_id: self.card_id,
            balance_liters,
            card_type: self.card_type,
            last_updated,
        })
    }
}

fn now() -> String {
    Utc::now().to_rfc3339()
}

impl BalanceGateway for SqliteGateway {
    fn append_audit(&mut self, raw: &str) -> Result<(), StoreError> {
        self.conn.execute(
            "INSERT INTO audit_log (raw_data, created_at) VALUES (?1, ?2)",
            params![raw, now()],
        )?;
        Ok(())
    }

    fn get_balance(&mut self, card_id: &str) -> Result<Option<CardBalance>, StoreError> {
        let row = self
            .conn
            .query_row(
                "SELECT card_number, fuel_balance, card_type, last_updated
                 FROM card_balances
                 WHERE card_number = ?1",
                params![card_id],
                |row| {
                    Ok(BalanceRow {
                        card_id: row.get(0)?,
                        balance: row.get(1)?,
                        card_type: row.get(2)?,
                        last_updated: row.get(3)?,
                    })
                },
            )
            .optional()?;

        row.map(BalanceRow::into_card_balance).transpose()
    }

    fn create_balance(
        &mut self,
        card_id: &str,
        balance_liters: Liters,
        card_type: Option<&str>,
    ) -> Result<(), StoreError> {
        let result = self.conn.execute(
            "INSERT INTO card_balances (card_number, fuel_balance, card_type, last_updated)
             VALUES (?1, ?2, ?3, ?4)",
            params![card_id, balance_liters.to_string(), card_type, now()],
        );

        match result {
            Ok(_) => Ok(()),
            Err(rusqlite::Error::SqliteFailure(err, _))
                if err.code == ErrorCode::ConstraintViolation =>
            {
                Err(StoreError::DuplicateCard {
                    card_id: card_id.to_string(),
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    fn update_balance(
        &mut self,
        card_id: &str,
        balance_liters: Liters,
    ) -> Result<RowsAffected, StoreError> {
        let rows = self.conn.execute(
            "UPDATE card_balances
             SET fuel_balance = ?1, last_updated = ?2
             WHERE card_number = ?3",
            params![balance_liters.to_string(), now(), card_id],
        )?;
        Ok(rows)
    }

    fn append_transaction(
        &mut self,
        card_id: &str,
        used_liters: Liters,
    ) -> Result<(), StoreError> {
        self.conn.execute(
            "INSERT INTO transaction_log (card_number, fuel_used, created_at) VALUES (?1, ?2, ?3)",
            params![card_id, used_liters.to_string(), now()],
        )?;
        Ok(())
    }
}
