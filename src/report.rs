//! CSV rendering of per-line reports.

use crate::decimal::Liters;
use crate::engine::Outcome;
use crate::error::{Result, TelemetryError};
use crate::ingest::LineReport;
use crate::record::Record;
use serde::Serialize;
use std::io::Write;

/// One CSV row. Quantities render with exactly 2 decimal places.
#[derive(Debug, Serialize)]
struct ReportRow<'a> {
    raw: &'a str,
    kind: &'a str,
    card_id: Option<&'a str>,
    used_liters: Option<Liters>,
    balance_liters: Option<Liters>,
    outcome: &'a str,
    reason: Option<String>,
}

impl<'a> ReportRow<'a> {
    fn from_report(report: &'a LineReport) -> Option<Self> {
        let outcome = report.outcome.as_ref()?;

        let (used_liters, balance_liters) = match &report.record {
            Some(Record::BalanceReport { balance_liters, .. }) => (None, Some(*balance_liters)),
            Some(Record::TransactionReport {
                used_liters,
                balance_liters,
                ..
            }) => (Some(*used_liters), Some(*balance_liters)),
            _ => (None, None),
        };

        Some(ReportRow {
            raw: &report.raw,
            kind: report.record.as_ref().map_or("", Record::kind),
            card_id: report.record.as_ref().and_then(Record::card_id),
            used_liters,
            balance_liters,
            outcome: outcome.label(),
            reason: match outcome {
                Outcome::Failed(e) => Some(e.to_string()),
                _ => None,
            },
        })
    }
}

/// Writes [`LineReport`]s as CSV rows, skipping blank-line no-ops.
pub struct ReportWriter<W: Write> {
    writer: csv::Writer<W>,
}

impl<W: Write> ReportWriter<W> {
    pub fn new(writer: W) -> Self {
        ReportWriter {
            writer: csv::Writer::from_writer(writer),
        }
    }

    /// Writes one report; no-op reports produce no row.
    ///
    /// Rows are flushed immediately since the line source may never end.
    pub fn write(&mut self, report: &LineReport) -> Result<()> {
        if let Some(row) = ReportRow::from_report(report) {
            self.writer.serialize(row)?;
            self.writer.flush()?;
        }
        Ok(())
    }

    /// Flushes and returns the underlying writer.
    pub fn into_inner(self) -> Result<W> {
        self.writer
            .into_inner()
            .map_err(|e| TelemetryError::Io(e.into_error()))
    }
}
