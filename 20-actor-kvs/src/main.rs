use anyhow::Result;
use clap::Parser;
use tracing::{info, warn};

use actor_kvs::{cli::Cli, supervisor::Supervisor};

fn init_tracing() {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).with_target(false).try_init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let supervisor = Supervisor::bind(&cli).await?;
    info!("http listening on {}", supervisor.http_addr()?);
    info!("tcp listening on {}", supervisor.tcp_addr()?);

    let result = supervisor
        .run_until(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!(error = ?err, "failed to install ctrl-c handler");
            }
        })
        .await;

    if let Err(err) = &result {
        warn!("kvs exited with error: {err:?}");
    }
    result.map(|_| ())
}
