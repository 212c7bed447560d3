//! Record formats emitted by the dispensing terminal and their parser.
//!
//! Two canonical line formats are understood:
//!
//! - balance report: `C#<card>-<qty>L`
//! - transaction report: `Card:<card> Sale:<qty>L Bal:<qty>L`
//!
//! Digits are ASCII only and fields are separated by spaces or tabs.
//!
//! Anything else classifies as [`Record::Unrecognized`]. Classification never
//! fails with an error.

use crate::decimal::Liters;
use log::debug;
use regex::{Captures, Regex};
use std::str::FromStr;
use std::sync::OnceLock;

const QTY: &str = r"([0-9]+(?:\.[0-9]+)?)";

/// A classified telemetry line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Record {
    /// Authoritative snapshot of a card's remaining fuel.
    BalanceReport {
        card_id: String,
        balance_liters: Liters,
    },

    /// Completed sale plus the balance left on the card afterwards.
    TransactionReport {
        card_id: String,
        used_liters: Liters,
        balance_liters: Liters,
    },

    /// Line matched no known format.
    Unrecognized { raw: String },
}

impl Record {
    /// Short, stable name of the variant, used in reports.
    pub fn kind(&self) -> &'static str {
        match self {
            Record::BalanceReport { .. } => "balance",
            Record::TransactionReport { .. } => "transaction",
            Record::Unrecognized { .. } => "unrecognized",
        }
    }

    /// Card the record refers to, if it refers to one.
    pub fn card_id(&self) -> Option<&str> {
        match self {
            Record::BalanceReport { card_id, .. } | Record::TransactionReport { card_id, .. } => {
                Some(card_id.as_str())
            }
            Record::Unrecognized { .. } => None,
        }
    }
}

/// Line classifier.
///
/// Patterns are tried in priority order: balance, transaction, then the
/// lenient transaction fallback when it is enabled. The first match wins.
#[derive(Debug, Clone)]
pub struct Parser {
    balance: Regex,
    transaction: Regex,
    lenient_transaction: Option<Regex>,
    balance_token: Regex,
}

impl Parser {
    /// Creates a parser that only accepts the two canonical formats.
    pub fn new() -> Self {
        Parser {
            balance: compile(&format!(r"^C#([0-9]+)-{QTY}L$")),
            transaction: compile(&format!(r"^Card:([0-9]+)[ \t]+Sale:{QTY}L[ \t]+Bal:{QTY}L$")),
            lenient_transaction: None,
            balance_token: compile(&format!(r"C#[0-9]+-{QTY}L")),
        }
    }

    /// Creates a parser that additionally accepts transaction lines with
    /// malformed separators, e.g. `Card 12345 / 5.00L, Bal 95.00L`.
    pub fn lenient() -> Self {
        Parser {
            lenient_transaction: Some(compile(&format!(
                r"Card[: \t]*([0-9]+)[^0-9]+{QTY}L[^0-9]+Bal[: \t]*{QTY}L"
            ))),
            ..Parser::new()
        }
    }

    /// Classifies one raw line.
    ///
    /// Surrounding whitespace is ignored; the canonical formats must then
    /// match the whole line.
    pub fn parse(&self, raw: &str) -> Record {
        let line = raw.trim();

        if let Some(caps) = self.balance.captures(line) {
            debug!("Balance pattern matched: {}", line);
            return balance_report(&caps).unwrap_or_else(|| unrecognized(raw));
        }

        if let Some(caps) = self.transaction.captures(line) {
            debug!("Transaction pattern matched: {}", line);
            return transaction_report(&caps).unwrap_or_else(|| unrecognized(raw));
        }

        if let Some(caps) = self
            .lenient_transaction
            .as_ref()
            .and_then(|re| re.captures(line))
        {
            debug!("Lenient transaction pattern matched: {}", line);
            return transaction_report(&caps).unwrap_or_else(|| unrecognized(raw));
        }

        unrecognized(raw)
    }

    /// Extracts the balance tokens of a line carrying several balance
    /// reports back to back. Returns an empty list unless at least two
    /// tokens are present.
    pub fn split_batch<'a>(&self, raw: &'a str) -> Vec<&'a str> {
        let tokens: Vec<&str> = self
            .balance_token
            .find_iter(raw)
            .map(|m| m.as_str())
            .collect();
        if tokens.len() < 2 {
            return Vec::new();
        }
        tokens
    }
}

impl Default for Parser {
    fn default() -> Self {
        Self::new()
    }
}

/// Classifies one raw line with the canonical formats only.
pub fn parse(raw: &str) -> Record {
    static PARSER: OnceLock<Parser> = OnceLock::new();
    PARSER.get_or_init(Parser::new).parse(raw)
}

fn compile(pattern: &str) -> Regex {
    // Patterns are constants; a failure here is a programming error.
    Regex::new(pattern).expect("record pattern is a valid regex")
}

fn unrecognized(raw: &str) -> Record {
    Record::Unrecognized {
        raw: raw.to_string(),
    }
}

fn liters(caps: &Captures<'_>, group: usize) -> Option<Liters> {
    let token = caps.get(group)?.as_str();
    match Liters::from_str(token) {
        Ok(value) => Some(value),
        Err(e) => {
            debug!("Quantity token {:?} rejected: {}", token, e);
            None
        }
    }
}

fn balance_report(caps: &Captures<'_>) -> Option<Record> {
    Some(Record::BalanceReport {
        card_id: caps.get(1)?.as_str().to_string(),
        balance_liters: liters(caps, 2)?,
    })
}

fn transaction_report(caps: &Captures<'_>) -> Option<Record> {
    Some(Record::TransactionReport {
        card_id: caps.get(1)?.as_str().to_string(),
        used_liters: liters(caps, 2)?,
        balance_liters: liters(caps, 3)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn qty(s: &str) -> Liters {
        Liters::from_str(s).unwrap()
    }

    #[test]
    fn test_parse_balance_report() {
        match parse("C#12345-100.00L") {
            Record::BalanceReport {
                card_id,
                balance_liters,
            } => {
                assert_eq!(card_id, "12345");
                assert_eq!(balance_liters, qty("100.00"));
            }
            other => panic!("Expected BalanceReport, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_balance_without_fraction() {
        let record = parse("C#7-40L");
        assert_eq!(
            record,
            Record::BalanceReport {
                card_id: "7".to_string(),
                balance_liters: qty("40"),
            }
        );
    }

    #[test]
    fn test_parse_transaction_report() {
        let record = parse("Card:12345 Sale:5.00L Bal:95.00L");
        assert_eq!(
            record,
            Record::TransactionReport {
                card_id: "12345".to_string(),
                used_liters: qty("5.00"),
                balance_liters: qty("95.00"),
            }
        );
    }

    #[test]
    fn test_parse_transaction_with_tabs_and_runs_of_spaces() {
        let record = parse("Card:42\tSale:1.50L   \t Bal:8.50L");
        assert_eq!(record.kind(), "transaction");
        assert_eq!(record.card_id(), Some("42"));
    }

    #[test]
    fn test_parse_keeps_leading_zeros_in_card_id() {
        assert_eq!(parse("C#00042-1.00L").card_id(), Some("00042"));
    }

    #[test]
    fn test_parse_ignores_surrounding_whitespace() {
        assert_eq!(parse("  C#1-2.00L\r").kind(), "balance");
    }

    #[test]
    fn test_garbage_is_unrecognized() {
        assert_eq!(
            parse("garbage line"),
            Record::Unrecognized {
                raw: "garbage line".to_string()
            }
        );
    }

    #[test]
    fn test_near_misses_are_unrecognized() {
        for line in [
            "C#-100.00L",
            "C#12a-1.00L",
            "C#12-1.00",
            "C#12-.50L",
            "Card:1 Sale:1.00L",
            "Card:1Sale:1.00L Bal:2.00L",
            "prefix C#12-1.00L",
            "Card 12345 Sale 5.00L Bal 95.00L",
            "C#\u{0661}\u{0662}-5.00L",
            "C#12-\u{0665}.00L",
            "Card:1\u{3000}Sale:1.00L\u{2003}Bal:2.00L",
            "Card:1 Sale:1.00L\u{a0}Bal:2.00L",
        ] {
            assert_eq!(parse(line).kind(), "unrecognized", "line {:?}", line);
        }
    }

    #[test]
    fn test_excess_precision_is_unrecognized() {
        let record = parse("C#12-1.234L");
        assert_eq!(
            record,
            Record::Unrecognized {
                raw: "C#12-1.234L".to_string()
            }
        );
    }

    #[test]
    fn test_precision_beyond_decimal_range_is_unrecognized() {
        assert_eq!(
            parse("C#1-5.000000000000000000000000000001L").kind(),
            "unrecognized"
        );
        assert_eq!(
            parse("C#1-5.000000000000000000000000000000L"),
            Record::BalanceReport {
                card_id: "1".to_string(),
                balance_liters: qty("5"),
            }
        );
    }

    #[test]
    fn test_lenient_pattern_is_opt_in() {
        let line = "Card 12345 / 5.00L, Bal 95.00L";
        assert_eq!(Parser::new().parse(line).kind(), "unrecognized");
        assert_eq!(
            Parser::lenient().parse(line),
            Record::TransactionReport {
                card_id: "12345".to_string(),
                used_liters: qty("5.00"),
                balance_liters: qty("95.00"),
            }
        );
    }

    #[test]
    fn test_lenient_parser_still_prefers_canonical_balance() {
        assert_eq!(Parser::lenient().parse("C#9-3.00L").kind(), "balance");
    }

    #[test]
    fn test_split_batch() {
        let parser = Parser::new();
        assert_eq!(
            parser.split_batch("C#1-10.00L C#2-20.50L\tC#3-0.00L"),
            vec!["C#1-10.00L", "C#2-20.50L", "C#3-0.00L"]
        );
        assert!(parser.split_batch("C#1-10.00L").is_empty());
        assert!(parser.split_batch("nothing here").is_empty());
    }
}
