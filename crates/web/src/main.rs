use clap::Parser;
use std::net::SocketAddr;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use spacedrop_web::auth::{AccessGate, IdentityResolver, ResolverSettings};

#[derive(Parser)]
#[command(name = "spacedrop")]
#[command(about = "Spacedrop - drop content onto this host over your mesh VPN")]
#[command(version)]
struct Cli {
    /// Listen address
    #[arg(short, long, env = "SPACEDROP_LISTEN", default_value = "0.0.0.0:8080")]
    listen: SocketAddr,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    info!("Spacedrop v{}", spacedrop_common::VERSION);

    // The policy must be in place before the listener accepts anything.
    let resolver = IdentityResolver::tailscale(ResolverSettings::from_env());
    let (gate, ok) = AccessGate::init_from_env(resolver).await;
    if !ok {
        warn!("Running with fallback access policy (EVERYONE)");
    }

    spacedrop_web::server::serve(cli.listen, gate).await
}
