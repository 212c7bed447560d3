//! Fuel Telemetry CLI
//!
//! Reads terminal telemetry line by line, reconciles card balances, and
//! writes one CSV report row per processed line to stdout.
//!
//! # Usage
//!
//! ```bash
//! cargo run -- --database balances.db /dev/ttyUSB0
//! cat capture.log | cargo run -- --database balances.db
//! ```
//!
//! # Environment Variables
//!
//! - `RUST_LOG`: Set to `debug` or `warn` to control logging verbosity
//! - `FUEL_TELEMETRY_DATABASE`: Default for `--database`
//! - `FUEL_TELEMETRY_CARD_TYPE`: Default for `--card-type`
//!
//! SIGINT and SIGTERM stop ingestion once the line in flight is done.

use clap::Parser;
use fuel_telemetry::{
    BalanceGateway, Cancellable, Ingestor, LineReader, MemoryGateway, Parser as RecordParser,
    ReconciliationEngine, ReportWriter, Result, SqliteGateway, DEFAULT_CARD_TYPE,
};
use log::{error, info, warn};
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::process;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Reconcile fuel card balances from terminal telemetry
#[derive(Parser, Debug)]
#[command(name = "fuel-telemetry", version)]
#[command(about = "Reconcile fuel card balances from terminal telemetry", long_about = None)]
struct Args {
    /// Telemetry input: a capture file, a serial device, or `-` for stdin
    #[arg(value_name = "INPUT")]
    input: Option<PathBuf>,

    /// SQLite database holding balances and logs (in-memory when omitted)
    #[arg(long, value_name = "PATH", env = "FUEL_TELEMETRY_DATABASE")]
    database: Option<PathBuf>,

    /// Card type assigned to cards seen for the first time
    #[arg(
        long,
        value_name = "NAME",
        env = "FUEL_TELEMETRY_CARD_TYPE",
        default_value = DEFAULT_CARD_TYPE
    )]
    card_type: String,

    /// Also accept transaction lines with malformed separators
    #[arg(long)]
    lenient: bool,

    /// Split lines carrying several balance records into one report each
    #[arg(long)]
    split_batches: bool,

    /// Do not write the CSV report to stdout
    #[arg(long)]
    no_report: bool,
}

fn main() {
    env_logger::init();

    if let Err(e) = run(Args::parse()) {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

fn run(args: Args) -> Result<()> {
    let gateway: Box<dyn BalanceGateway> = match &args.database {
        Some(path) => Box::new(SqliteGateway::open(path)?),
        None => {
            warn!("No database configured, balances will not outlive this process");
            Box::new(MemoryGateway::new())
        }
    };

    let parser = if args.lenient {
        RecordParser::lenient()
    } else {
        RecordParser::new()
    };
    let mut ingestor = Ingestor::new(gateway)
        .with_parser(parser)
        .with_engine(ReconciliationEngine::with_card_type(&args.card_type))
        .split_batches(args.split_batches);

    let cancelled = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&cancelled);
    if let Err(e) = ctrlc::set_handler(move || {
        info!("Shutdown signal received, finishing current line");
        flag.store(true, Ordering::SeqCst);
    }) {
        warn!("Could not install shutdown handler: {}", e);
    }

    let reader = LineReader::new(open_input(args.input.as_deref())?);
    let mut source = Cancellable::new(reader, cancelled);
    let mut report = (!args.no_report).then(|| ReportWriter::new(io::stdout()));

    ingestor.run(&mut source, |line_report| {
        let failed = match report.as_mut() {
            Some(writer) => writer.write(line_report).err(),
            None => None,
        };
        if let Some(e) = failed {
            error!("Report output failed, disabling it: {}", e);
            report = None;
        }
    });

    info!("Ingestion finished");
    Ok(())
}

fn open_input(path: Option<&Path>) -> Result<Box<dyn BufRead>> {
    match path {
        Some(path) if path.as_os_str() != "-" => {
            info!("Reading telemetry from {}", path.display());
            Ok(Box::new(BufReader::new(File::open(path)?)))
        }
        _ => {
            info!("Reading telemetry from stdin");
            Ok(Box::new(io::stdin().lock()))
        }
    }
}
