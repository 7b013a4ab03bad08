use std::path::PathBuf;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use cadenza_server::{DevLookup, Server, ServerConfig, ServerError};

#[derive(Parser, Debug)]
#[clap(author, version, about = "Multiplayer session server for rhythm game rooms")]
struct Args {
    /// Address to bind to ("::" also accepts IPv4 on dual-stack hosts)
    #[clap(short = 'H', long, default_value = "::")]
    host: String,

    /// TCP port to listen on
    #[clap(short, long, default_value = "12346")]
    port: u16,

    /// Path to the JSON config file
    #[clap(short, long, default_value = "cadenza.json")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<(), ServerError> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let config = ServerConfig::load(&args.config);
    tracing::info!(
        monitors = config.monitors.len(),
        replay_enabled = config.replay_enabled,
        room_creation_enabled = config.room_creation_enabled,
        "config loaded"
    );

    // TODO: replace with the HTTP lookup client once its endpoint config
    // lands; DevLookup accepts any numeric token.
    tracing::warn!("running with the development lookup");

    let server = Server::bind((args.host.as_str(), args.port), config, DevLookup).await?;
    tracing::info!(addr = %server.local_addr()?, "listening");
    server.run().await
}
