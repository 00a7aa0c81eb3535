use clap::Parser;
use p2p_peer::client::{NeighbourClient, ReqwestNeighbourClient};
use p2p_peer::config::{Args, PeerConfig};
use p2p_peer::{supervisor, tracing_init};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = PeerConfig::load(&args.config)?;

    tracing_init::init_tracer(&args.log_level);
    tracing::info!(peer = %config.name, config = %args.config.display(), "loaded configuration");

    let client: &'static dyn NeighbourClient = Box::leak(Box::new(ReqwestNeighbourClient));

    supervisor::run(config, client).await
}
