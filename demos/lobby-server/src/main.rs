use std::time::Duration;

use clap::Parser;
use racelane::prelude::*;
use tracing_subscriber::EnvFilter;

/// Racelane lobby and race server.
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Address to listen on
    #[arg(short, long, default_value = "127.0.0.1:8080")]
    bind: String,
    /// Seats per room
    #[arg(long, default_value_t = 4)]
    max_players: usize,
    /// Milliseconds between race ticks
    #[arg(long, default_value_t = 200)]
    tick_ms: u64,
    /// Start the race this many seconds after a room becomes ready
    #[arg(long)]
    auto_start_secs: Option<u64>,
    /// Reset finished rooms to open after this many idle seconds
    #[arg(long)]
    reset_after_secs: Option<u64>,
    /// Seconds a disconnected player keeps their seat
    #[arg(long, default_value_t = 30)]
    grace_secs: u64,
    /// Close open or finished rooms idle for this many seconds
    #[arg(long, default_value_t = 600)]
    room_ttl_secs: u64,
    /// Seconds between janitor sweeps
    #[arg(long, default_value_t = 30)]
    janitor_secs: u64,
    /// Use this seed for every race instead of random ones
    #[arg(long)]
    seed: Option<u64>,
}

impl Args {
    fn server_config(&self) -> ServerConfig {
        let defaults = ServerConfig::default();
        ServerConfig {
            bind_addr: self.bind.clone(),
            room: RoomConfig {
                max_players: self.max_players,
                race: RaceConfig {
                    tick_interval: Duration::from_millis(self.tick_ms),
                    ..RaceConfig::default()
                },
                auto_start_after: self.auto_start_secs.map(Duration::from_secs),
                finished_reset_after: self.reset_after_secs.map(Duration::from_secs),
                ..RoomConfig::default()
            },
            session: SessionConfig {
                reconnect_grace: Duration::from_secs(self.grace_secs),
            },
            room_ttl: Duration::from_secs(self.room_ttl_secs),
            janitor_interval: Duration::from_secs(self.janitor_secs),
            ..defaults
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let mut builder = RacelaneServer::builder().config(args.server_config());
    if let Some(seed) = args.seed {
        tracing::warn!(seed, "every race uses the same seed");
        builder = builder.seeds(FixedSeed(seed));
    }

    let server = builder.build().await?;
    println!("Racelane listening on ws://{}", server.local_addr()?);
    server.run().await?;
    Ok(())
}
