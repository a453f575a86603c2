use clap::Parser;
use log::{error, info};
use server::config::{default_zones, load_zones};
use server::network::{Server, ServerMessage};
use server::persistence::{AccountStore, JsonAccountStore};
use server::room::Room;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about = "Authoritative platformer world server")]
struct Args {
    /// Server IP address to bind to
    #[arg(short = 'H', long, default_value = "127.0.0.1")]
    host: String,

    /// Server port to listen on
    #[arg(short, long, default_value = "8080")]
    port: u16,

    /// Scheduler rate in Hz. Physics always steps at 60Hz.
    #[arg(short, long, default_value = "60")]
    tick_rate: u32,

    /// Maximum number of concurrent players
    #[arg(short, long, default_value = "64")]
    max_clients: usize,

    /// JSON file holding player accounts
    #[arg(long, default_value = "data/players.json")]
    accounts: PathBuf,

    /// JSON zone table replacing the built-in zones
    #[arg(long)]
    zones: Option<PathBuf>,

    /// Directory the zone map files are read from
    #[arg(long, default_value = "maps")]
    map_dir: PathBuf,

    /// Seconds between account file writes
    #[arg(long, default_value = "60")]
    save_interval_secs: u64,

    /// Log filter used when RUST_LOG is not set
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&args.log_level))
        .init();

    let store = Arc::new(JsonAccountStore::open(&args.accounts)?);
    let zones = match &args.zones {
        Some(path) => load_zones(path)?,
        None => default_zones(),
    };

    let mut rooms = Vec::with_capacity(zones.len());
    for zone in &zones {
        let room = Room::create(zone, &args.map_dir, store.clone()).map_err(|e| {
            error!("Failed to create room {}: {}", zone.name, e);
            e
        })?;
        rooms.push(room);
    }

    let tick_duration = Duration::from_secs_f64(1.0 / args.tick_rate.max(1) as f64);
    let address = format!("{}:{}", args.host, args.port);
    let mut server = Server::new(&address, tick_duration, args.max_clients, rooms, store.clone()).await?;

    let saver = {
        let store = Arc::clone(&store);
        let period = Duration::from_secs(args.save_interval_secs.max(1));
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            // Skip the first tick since it fires immediately
            interval.tick().await;
            loop {
                interval.tick().await;
                store.flush();
            }
        })
    };

    let shutdown = server.shutdown_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl+C, shutting down gracefully...");
            let _ = shutdown.send(ServerMessage::Shutdown);
        }
    });

    server.run().await?;

    saver.abort();
    store.flush_blocking()?;
    info!("Shutdown complete");
    Ok(())
}
