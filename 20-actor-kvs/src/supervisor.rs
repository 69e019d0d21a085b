//! Process wiring: brings the store up before the adapters and takes it down
//! only after both adapters have finished.
//!
//! Shutdown order:
//!
//! 1. the caller's shutdown future resolves (or an adapter exits on its own);
//! 2. the stop signal is published on a `watch` channel both adapters follow;
//! 3. the adapter `JoinSet` is drained, so every in-flight request or line is
//!    answered before anything else happens;
//! 4. the engine drains its intake and stops;
//! 5. the metrics aggregator stops and its final counters are returned.

use std::{collections::HashMap, future::Future, net::SocketAddr, path::Path};

use anyhow::{Context, Result, anyhow, ensure};
use serde_json::Value;
use tokio::{
    net::TcpListener,
    select,
    sync::watch,
    task::{JoinError, JoinSet},
};
use tracing::{info, warn};

use crate::{
    cli::Cli,
    engine::{Engine, EngineConfig, Seed},
    http,
    id::Identifier,
    metrics::{Metrics, MetricsSnapshot},
    tcp::TcpServer,
};

type AdapterExit = (&'static str, Result<()>);

pub struct Supervisor {
    engine_config: EngineConfig,
    seed: Seed,
    http_listener: TcpListener,
    tcp_listener: TcpListener,
}

impl Supervisor {
    pub fn new(
        engine_config: EngineConfig,
        seed: Seed,
        http_listener: TcpListener,
        tcp_listener: TcpListener,
    ) -> Self {
        Self {
            engine_config,
            seed,
            http_listener,
            tcp_listener,
        }
    }

    /// Loads the seed file (if any) and binds both listeners.
    pub async fn bind(cli: &Cli) -> Result<Self> {
        let seed = match &cli.seed {
            Some(path) => load_seed(path).await?,
            None => Seed::new(),
        };
        let http_listener = TcpListener::bind(cli.http_listen)
            .await
            .with_context(|| format!("failed to bind http listener on {}", cli.http_listen))?;
        let tcp_listener = TcpListener::bind(cli.tcp_listen)
            .await
            .with_context(|| format!("failed to bind tcp listener on {}", cli.tcp_listen))?;

        Ok(Self::new(
            cli.engine_config(),
            seed,
            http_listener,
            tcp_listener,
        ))
    }

    pub fn http_addr(&self) -> std::io::Result<SocketAddr> {
        self.http_listener.local_addr()
    }

    pub fn tcp_addr(&self) -> std::io::Result<SocketAddr> {
        self.tcp_listener.local_addr()
    }

    /// Runs everything until `shutdown` resolves, then stops it all in order
    /// and returns the final counters.
    ///
    /// An adapter that exits early also triggers shutdown; its error is
    /// returned once the rest has been stopped.
    pub async fn run_until<F>(self, shutdown: F) -> Result<MetricsSnapshot>
    where
        F: Future<Output = ()> + Send,
    {
        let Supervisor {
            engine_config,
            seed,
            http_listener,
            tcp_listener,
        } = self;

        let metrics = Metrics::start();
        let engine = Engine::start(engine_config, seed, metrics.handle());
        let store = engine.handle();

        let (stop_tx, stop_rx) = watch::channel(false);
        let mut adapters: JoinSet<AdapterExit> = JoinSet::new();
        {
            let store = store.clone();
            let stop = stop_requested(stop_rx.clone());
            adapters.spawn(async move {
                let result = http::serve(http_listener, store, stop).await;
                ("http", result)
            });
        }
        {
            let server = TcpServer::new(tcp_listener, store);
            let stop = stop_requested(stop_rx);
            adapters.spawn(async move {
                let result = server.run_until(stop).await;
                ("tcp", result)
            });
        }

        let mut failure = None;
        tokio::pin!(shutdown);
        select! {
            _ = &mut shutdown => info!("shutdown requested, stopping adapters"),
            Some(joined) = adapters.join_next() => {
                warn!("adapter exited before shutdown was requested");
                record_adapter_exit(joined, &mut failure);
            }
        }

        let _ = stop_tx.send(true);
        while let Some(joined) = adapters.join_next().await {
            record_adapter_exit(joined, &mut failure);
        }

        let remaining = engine.stop().await;
        let last = metrics.stop().await;
        info!(
            entries = remaining,
            size = last.size,
            operations = last.operations,
            successful_operations = last.successful_operations,
            "kvs stopped"
        );

        match failure {
            Some(err) => Err(err),
            None => Ok(last),
        }
    }
}

async fn stop_requested(mut stop: watch::Receiver<bool>) {
    let _ = stop.wait_for(|stop| *stop).await;
}

fn record_adapter_exit(joined: Result<AdapterExit, JoinError>, failure: &mut Option<anyhow::Error>) {
    let err = match joined {
        Ok((name, Ok(()))) => {
            info!(adapter = name, "adapter stopped");
            return;
        }
        Ok((name, Err(err))) => err.context(format!("{name} adapter failed")),
        Err(err) => anyhow!(err).context("adapter task panicked"),
    };
    warn!(error = ?err, "adapter stopped with error");
    failure.get_or_insert(err);
}

/// Reads a seed file: a JSON object mapping identifiers to non-null values.
pub async fn load_seed(path: &Path) -> Result<Seed> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("failed to read seed file {}", path.display()))?;
    let seed =
        parse_seed(&raw).with_context(|| format!("invalid seed file {}", path.display()))?;
    info!(entries = seed.len(), path = %path.display(), "loaded seed");
    Ok(seed)
}

pub fn parse_seed(raw: &str) -> Result<Seed> {
    let entries: HashMap<String, Value> =
        serde_json::from_str(raw).context("seed must be a JSON object")?;

    entries
        .into_iter()
        .map(|(key, value)| -> Result<(Identifier, Value)> {
            let id = Identifier::parse(&key)?;
            ensure!(!value.is_null(), "seed value for {id} is null");
            Ok((id, value))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn parses_seed_objects() {
        let id = Identifier::generate();
        let raw = json!({ id.to_string(): {"nested": [1, 2]} }).to_string();

        let seed = parse_seed(&raw).expect("valid seed");
        assert_eq!(seed.get(&id), Some(&json!({"nested": [1, 2]})));
    }

    #[test]
    fn rejects_bad_seeds() {
        assert!(parse_seed("[1, 2]").is_err());
        assert!(parse_seed(r#"{"not-an-id": 1}"#).is_err());

        let id = Identifier::generate();
        let raw = json!({ id.to_string(): null }).to_string();
        assert!(parse_seed(&raw).is_err());
    }

    #[tokio::test]
    async fn stops_cleanly_when_asked() {
        let http = TcpListener::bind("127.0.0.1:0").await.expect("bind http");
        let tcp = TcpListener::bind("127.0.0.1:0").await.expect("bind tcp");
        let supervisor = Supervisor::new(EngineConfig::default(), Seed::new(), http, tcp);

        let last = supervisor
            .run_until(async {})
            .await
            .expect("clean shutdown");
        assert_eq!(last, MetricsSnapshot::default());
    }
}
