use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use meterkeep_host::{
    ArchiveConfig, ArchiveWriter, Config, DeviceFleet, EventJournal, MemoryArchive, MemoryStore,
    SnapshotStore, SqliteArchive, SqliteStore, StorageConfig,
};
use tokio::io::AsyncBufReadExt;
use tracing::info;

#[derive(Parser)]
#[command(name = "meterkeep-host")]
#[command(about = "Meterkeep sensor reading persistence host")]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long, default_value = "meterkeep.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;

    let filter =
        std::env::var("RUST_LOG").unwrap_or_else(|_| "meterkeep_host=info,meterkeep_core=info".to_owned());
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cli = Cli::parse();

    let config = if cli.config.exists() {
        info!(path = ?cli.config, "Loading configuration");
        Config::load(&cli.config)?
    } else {
        info!("No configuration file found, using defaults");
        Config::default()
    };

    match config.storage {
        StorageConfig::Memory => {
            info!("Using in-memory journal");
            let store = MemoryStore::new();
            run_with_archive(config, store).await?;
        }
        StorageConfig::Sqlite { ref path } => {
            info!(path = ?path, "Using SQLite journal");
            let store = SqliteStore::new(path).await?;
            run_with_archive(config, store).await?;
        }
    }

    Ok(())
}

async fn run_with_archive<S>(config: Config, store: S) -> color_eyre::Result<()>
where
    S: EventJournal + SnapshotStore + Clone,
{
    match config.archive {
        ArchiveConfig::Memory => {
            info!("Using in-memory archive");
            let archive = MemoryArchive::new();
            run_host(config, store, archive).await
        }
        ArchiveConfig::Sqlite { ref path } => {
            info!(path = ?path, "Using SQLite archive");
            let archive = SqliteArchive::new(path).await?;
            run_host(config, store, archive).await
        }
    }
}

async fn run_host<S, A>(config: Config, store: S, archive: A) -> color_eyre::Result<()>
where
    S: EventJournal + SnapshotStore + Clone,
    A: ArchiveWriter,
{
    let snapshot_period = Duration::from_secs(config.snapshot.period_secs);
    let fleet = DeviceFleet::new(store.clone(), store, archive, snapshot_period);

    info!(
        snapshot_period_secs = snapshot_period.as_secs(),
        "meterkeep host started"
    );

    process_console_commands_until_exit().await?;

    fleet.shutdown().await;
    info!("meterkeep host stopped");
    Ok(())
}

/// Blocking console loop; the only recognized command is `exit`. Ctrl+C
/// also triggers an orderly shutdown.
async fn process_console_commands_until_exit() -> color_eyre::Result<()> {
    let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
    println!("Please type exit to shut down:");

    loop {
        tokio::select! {
            line = lines.next_line() => {
                match line? {
                    Some(cmd) if cmd.trim() == "exit" => break,
                    Some(_) => println!("Please type exit to shut down:"),
                    None => break,
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl+C, shutting down...");
                break;
            }
        }
    }

    Ok(())
}
