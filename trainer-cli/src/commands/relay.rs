use crate::output;

use clap::Args;
use color_eyre::Result;
use tokio_util::sync::CancellationToken;

use pipeline_relay::{Relay, RelayConfig};
use training_pipeline::protocol::EXECUTE_ROUTE;

/// Forward execution channels to a worker
#[derive(Args, Debug)]
pub struct RelayArgs {
    /// Address to accept clients on
    #[arg(long, env = "RELAY_LISTEN", default_value = "0.0.0.0:3000")]
    pub listen: String,

    /// Worker base address (http://, https://, ws://, wss:// or host:port)
    #[arg(long, env = "PYTHON_SERVICE_URL", default_value = "http://localhost:3001")]
    pub downstream: String,

    /// Route accepted from clients
    #[arg(long, default_value = EXECUTE_ROUTE)]
    pub route: String,

    /// Route on the worker
    #[arg(long, default_value = EXECUTE_ROUTE)]
    pub downstream_path: String,
}

pub async fn execute(args: RelayArgs) -> Result<()> {
    let config = RelayConfig::default()
        .with_listen(args.listen)
        .with_downstream(args.downstream)
        .with_upstream_route(args.route)
        .with_downstream_path(args.downstream_path);
    let relay = Relay::new(config);

    output::status("Relaying", &format!("{} -> {}", relay.config().listen, relay.downstream_url()));

    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            signal.cancel();
        }
    });

    relay.run(shutdown).await?;
    output::info("Relay stopped");
    Ok(())
}
