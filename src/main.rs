use clap::Parser;
use miette::{IntoDiagnostic, Result};
use shoutout::domain::ports::{EventLogRef, LedgerStoreRef};
use shoutout::infrastructure::in_memory::{InMemoryEventLog, InMemoryLedgerStore, LogNotifier};
use shoutout::interfaces::csv::order_writer::OrderWriter;
use shoutout::interfaces::jsonl::command_reader::CommandReader;
use shoutout::interfaces::runner::CommandRunner;
use shoutout::settings::Settings;
use std::fs::File;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Input commands, one JSON object per line
    input: PathBuf,

    /// Path to persistent database (optional). If provided, uses RocksDB.
    #[arg(long)]
    db_path: Option<PathBuf>,

    /// TOML configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Run a booking repair sweep before writing the summary
    #[arg(long)]
    repair_bookings: bool,
}

#[cfg(feature = "storage-rocksdb")]
fn persistent_stores(db_path: PathBuf) -> Result<(LedgerStoreRef, EventLogRef)> {
    let store = shoutout::infrastructure::rocksdb::RocksDBStore::open(db_path).into_diagnostic()?;
    Ok((Arc::new(store.clone()), Arc::new(store)))
}

#[cfg(not(feature = "storage-rocksdb"))]
fn persistent_stores(_db_path: PathBuf) -> Result<(LedgerStoreRef, EventLogRef)> {
    Err(miette::miette!(
        "--db-path needs a build with the `storage-rocksdb` feature"
    ))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(io::stderr)
        .init();

    let settings = Settings::load(cli.config.as_deref()).into_diagnostic()?;

    let (store, events) = match cli.db_path {
        Some(db_path) => persistent_stores(db_path)?,
        None => {
            let store: LedgerStoreRef = Arc::new(InMemoryLedgerStore::new());
            let events: EventLogRef = Arc::new(InMemoryEventLog::new());
            (store, events)
        }
    };
    let runner = CommandRunner::new(store, events, Arc::new(LogNotifier), &settings).into_diagnostic()?;

    let file = File::open(cli.input).into_diagnostic()?;
    let reader = CommandReader::new(file);
    for command in reader.commands() {
        match command {
            Ok(command) => {
                if let Err(e) = runner.execute(command).await {
                    eprintln!("Error executing command: {}", e);
                }
            }
            Err(e) => {
                eprintln!("Error reading command: {}", e);
            }
        }
    }

    // events that arrived early get one more chance once the script is done
    runner.replay_deferred().await.into_diagnostic()?;
    if cli.repair_bookings {
        runner.repair_bookings().await.into_diagnostic()?;
    }

    let summaries = runner.summaries().await.into_diagnostic()?;
    let stdout = io::stdout();
    let mut writer = OrderWriter::new(stdout.lock());
    writer.write_orders(summaries).into_diagnostic()?;

    Ok(())
}
