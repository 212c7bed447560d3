//! Line-by-line ingestion: audit, classify, reconcile.
//!
//! Lines are handled strictly in arrival order. A line's audit write and
//! reconciliation run to completion before the next line is pulled, so two
//! reports for the same card can never interleave within one source.
//! Cancellation is only observed between lines, when the source returns
//! `None`.

use crate::engine::{Outcome, ReconciliationEngine};
use crate::gateway::BalanceGateway;
use crate::record::{Parser, Record};
use log::{error, info, warn};
use std::io::{self, BufRead, Read};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// What happened to one ingested line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineReport {
    /// The line as received (or the batch token, for split batch lines).
    pub raw: String,

    /// Classification, absent for blank lines and failed audit writes.
    pub record: Option<Record>,

    /// Reconciliation result, absent for blank lines.
    pub outcome: Option<Outcome>,
}

impl LineReport {
    fn noop(raw: &str) -> Self {
        LineReport {
            raw: raw.to_string(),
            record: None,
            outcome: None,
        }
    }

    /// Returns `true` for blank input that was neither audited nor reconciled.
    pub fn is_noop(&self) -> bool {
        self.outcome.is_none()
    }
}

/// Counters accumulated over a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestStats {
    /// Physical lines pulled from the source, blank ones included.
    pub lines: usize,
    pub applied: usize,
    pub skipped: usize,
    pub failed: usize,
    /// Blank lines ignored without an audit entry.
    pub empty: usize,
}

impl IngestStats {
    fn record(&mut self, report: &LineReport) {
        match &report.outcome {
            Some(Outcome::Applied) => self.applied += 1,
            Some(Outcome::Skipped) => self.skipped += 1,
            Some(Outcome::Failed(_)) => self.failed += 1,
            None => self.empty += 1,
        }
    }
}

/// A source of telemetry lines with newlines already stripped.
///
/// `None` means the source is closed or was cancelled.
pub trait LineSource {
    fn next_line(&mut self) -> Option<String>;
}

impl<I: Iterator<Item = String>> LineSource for I {
    fn next_line(&mut self) -> Option<String> {
        self.next()
    }
}

/// Longest line [`LineReader`] keeps by default, in bytes.
pub const DEFAULT_MAX_LINE: usize = 4096;

/// Adapts a byte stream into lines.
///
/// Splits on `\n`, drops a trailing `\r`, and decodes lossily so that
/// transmission noise never ends the stream. Lines longer than the cap are
/// cut at the cap and the rest, up to the next newline, is discarded. A read
/// error is logged and treated as end of stream.
pub struct LineReader<R> {
    reader: R,
    buf: Vec<u8>,
    max_line: usize,
}

impl<R: BufRead> LineReader<R> {
    pub fn new(reader: R) -> Self {
        Self::with_max_line(reader, DEFAULT_MAX_LINE)
    }

    /// Creates a reader keeping at most `max_line` bytes of each line.
    pub fn with_max_line(reader: R, max_line: usize) -> Self {
        LineReader {
            reader,
            buf: Vec::new(),
            max_line: max_line.max(1),
        }
    }

    fn read_line(&mut self) -> io::Result<Option<String>> {
        self.buf.clear();
        let limit = self.max_line as u64;
        let read = (&mut self.reader).take(limit).read_until(b'\n', &mut self.buf)?;
        if read == 0 {
            return Ok(None);
        }

        if self.buf.ends_with(b"\n") {
            self.buf.pop();
        } else if read == self.max_line {
            warn!("Line longer than {} bytes, truncating", self.max_line);
            self.skip_rest_of_line()?;
        }
        if self.buf.ends_with(b"\r") {
            self.buf.pop();
        }
        Ok(Some(String::from_utf8_lossy(&self.buf).into_owned()))
    }

    fn skip_rest_of_line(&mut self) -> io::Result<()> {
        let limit = self.max_line as u64;
        let mut discarded = Vec::new();
        loop {
            discarded.clear();
            let read = (&mut self.reader)
                .take(limit)
                .read_until(b'\n', &mut discarded)?;
            if read == 0 || discarded.ends_with(b"\n") {
                return Ok(());
            }
        }
    }
}

impl<R: BufRead> Iterator for LineReader<R> {
    type Item = String;

    fn next(&mut self) -> Option<String> {
        match self.read_line() {
            Ok(line) => line,
            Err(e) => {
                error!("Line source read failed, stopping: {}", e);
                None
            }
        }
    }
}

/// Wraps a [`LineSource`] so that it closes once `cancelled` is set.
///
/// The flag is checked before each line is pulled, so a line already handed
/// out is always processed to completion.
pub struct Cancellable<S> {
    source: S,
    cancelled: Arc<AtomicBool>,
}

impl<S: LineSource> Cancellable<S> {
    pub fn new(source: S, cancelled: Arc<AtomicBool>) -> Self {
        Cancellable { source, cancelled }
    }
}

impl<S: LineSource> Iterator for Cancellable<S> {
    type Item = String;

    fn next(&mut self) -> Option<String> {
        if self.cancelled.load(Ordering::SeqCst) {
            info!("Shutdown requested, closing line source");
            return None;
        }
        self.source.next_line()
    }
}

/// Drives lines through audit, parsing and reconciliation against one
/// gateway.
pub struct Ingestor<G> {
    gateway: G,
    parser: Parser,
    engine: ReconciliationEngine,
    split_batches: bool,
}

impl<G: BalanceGateway> Ingestor<G> {
    /// Creates an ingestor with the canonical parser and default engine.
    pub fn new(gateway: G) -> Self {
        Ingestor {
            gateway,
            parser: Parser::new(),
            engine: ReconciliationEngine::new(),
            split_batches: false,
        }
    }

    /// Replaces the line parser.
    pub fn with_parser(mut self, parser: Parser) -> Self {
        self.parser = parser;
        self
    }

    /// Replaces the reconciliation engine.
    pub fn with_engine(mut self, engine: ReconciliationEngine) -> Self {
        self.engine = engine;
        self
    }

    /// Enables splitting of lines that carry several balance records.
    pub fn split_batches(mut self, enabled: bool) -> Self {
        self.split_batches = enabled;
        self
    }

    pub fn gateway(&self) -> &G {
        &self.gateway
    }

    /// Ingests one line.
    ///
    /// Blank lines yield a no-op report. Otherwise the raw line is audited
    /// first; if that write fails the line is reported failed without being
    /// parsed or reconciled.
    pub fn ingest(&mut self, line: &str) -> LineReport {
        if line.trim().is_empty() {
            return LineReport::noop(line);
        }

        if let Err(e) = self.gateway.append_audit(line) {
            warn!("Audit write failed, skipping line {:?}: {}", line, e);
            return LineReport {
                raw: line.to_string(),
                record: None,
                outcome: Some(Outcome::Failed(e)),
            };
        }

        self.classify_and_reconcile(line)
    }

    /// Ingests one physical line that may carry several balance records.
    ///
    /// With splitting enabled and two or more balance tokens present, the
    /// line is audited once and each token is reconciled in order. Any
    /// other line behaves exactly like [`Ingestor::ingest`].
    pub fn ingest_batch(&mut self, line: &str) -> Vec<LineReport> {
        let tokens = if self.split_batches {
            self.parser.split_batch(line)
        } else {
            Vec::new()
        };
        if tokens.is_empty() {
            return vec![self.ingest(line)];
        }

        if let Err(e) = self.gateway.append_audit(line) {
            warn!("Audit write failed, skipping batch line {:?}: {}", line, e);
            return vec![LineReport {
                raw: line.to_string(),
                record: None,
                outcome: Some(Outcome::Failed(e)),
            }];
        }

        info!("Batch line carries {} balance records", tokens.len());
        tokens
            .into_iter()
            .map(|token| self.classify_and_reconcile(token))
            .collect()
    }

    /// Drains `source`, handing every report to `on_report`, until the
    /// source is exhausted.
    pub fn run<S, F>(&mut self, source: &mut S, mut on_report: F) -> IngestStats
    where
        S: LineSource + ?Sized,
        F: FnMut(&LineReport),
    {
        let mut stats = IngestStats::default();

        while let Some(line) = source.next_line() {
            stats.lines += 1;
            for report in self.ingest_batch(&line) {
                stats.record(&report);
                on_report(&report);
            }
        }

        info!(
            "Line source closed: {} lines, {} applied, {} skipped, {} failed, {} blank",
            stats.lines, stats.applied, stats.skipped, stats.failed, stats.empty
        );
        stats
    }

    fn classify_and_reconcile(&mut self, raw: &str) -> LineReport {
        let record = self.parser.parse(raw);
        if let Record::Unrecognized { .. } = &record {
            warn!("Unrecognized line: {:?}", raw);
        }
        let outcome = self.engine.reconcile(&record, &mut self.gateway);

        LineReport {
            raw: raw.to_string(),
            record: Some(record),
            outcome: Some(outcome),
        }
    }
}
