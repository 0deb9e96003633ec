//! OSMWatch CLI - runs the replication monitor loop.

use std::process;
use std::time::Duration;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use osmwatch::changeset::RetentionPolicy;
use osmwatch::fetch::HttpReplicationClient;
use osmwatch::logging;
use osmwatch::sequencer::FileStateStore;
use osmwatch::service::{MonitorConfig, MonitorService, DEFAULT_POLL_INTERVAL_SECS};

#[derive(Parser)]
#[command(name = "osmwatch", version = osmwatch::VERSION)]
#[command(about = "Watch the OSM replication feed for suspicious changesets", long_about = None)]
struct Args {
    /// Path to the persisted replication state descriptor
    #[arg(long, default_value = "state.txt")]
    state_file: String,

    /// Base URL of the replication directory
    #[arg(
        long,
        default_value = "https://planet.openstreetmap.org/replication/minute"
    )]
    replication_url: String,

    /// Base URL of the primitive-lookup API
    #[arg(long, default_value = "http://localhost:8080/xapi")]
    lookup_url: String,

    /// Seconds to sleep between polls at the live edge
    #[arg(long, default_value_t = DEFAULT_POLL_INTERVAL_SECS)]
    interval: u64,

    /// Maximum node ids per lookup request
    #[arg(long, default_value_t = osmwatch::resolver::DEFAULT_LOOKUP_BATCH_SIZE)]
    lookup_batch_size: usize,

    /// Accumulate changeset aggregates for the process lifetime instead of
    /// resetting them per batch
    #[arg(long)]
    accumulate: bool,

    /// Directory for log files
    #[arg(long, default_value = "logs")]
    log_dir: String,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let _logging_guard = match logging::init_logging(&args.log_dir, logging::default_log_file()) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("failed to initialize logging: {e}");
            process::exit(1);
        }
    };

    if let Err(e) = run(args).await {
        error!(error = %e, "osmwatch failed");
        process::exit(1);
    }
}

async fn run(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    info!(version = osmwatch::VERSION, "osmwatch starting");

    let client = HttpReplicationClient::new(&args.replication_url, &args.lookup_url)?;
    let store = FileStateStore::new(&args.state_file);

    let config = MonitorConfig {
        poll_interval: Duration::from_secs(args.interval),
        lookup_batch_size: args.lookup_batch_size,
        retention: if args.accumulate {
            RetentionPolicy::ProcessLifetime
        } else {
            RetentionPolicy::PerBatch
        },
    };

    let service = MonitorService::new(client, store, config)?;

    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received, shutting down");
            signal_token.cancel();
        }
    });

    service.run(shutdown).await;
    Ok(())
}
