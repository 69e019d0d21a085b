//! Both adapters running against one store, the way the binary wires them.

use std::time::Duration;

use actor_kvs::{
    engine::{EngineConfig, Seed},
    metrics::MetricsSnapshot,
    protocol::{Response, read_line},
    supervisor::Supervisor,
};
use anyhow::{Context, Result};
use serde_json::{Value, json};
use tokio::{
    io::{AsyncWriteExt, BufReader},
    net::{TcpListener, TcpStream},
    sync::oneshot,
    time::timeout,
};

const READ_TIMEOUT: Duration = Duration::from_secs(2);

#[tokio::test]
async fn http_writes_are_visible_over_tcp() -> Result<()> {
    let http_listener = TcpListener::bind("127.0.0.1:0").await?;
    let tcp_listener = TcpListener::bind("127.0.0.1:0").await?;
    let supervisor = Supervisor::new(
        EngineConfig::default(),
        Seed::new(),
        http_listener,
        tcp_listener,
    );
    let http_addr = supervisor.http_addr()?;
    let tcp_addr = supervisor.tcp_addr()?;

    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let running = tokio::spawn(supervisor.run_until(async move {
        let _ = shutdown_rx.await;
    }));

    let client = reqwest::Client::new();
    let created: Value = client
        .post(format!("http://{http_addr}/kvs"))
        .json(&json!({"value": {"from": "http"}}))
        .send()
        .await?
        .json()
        .await?;
    let id = created["id"].as_str().context("id")?.to_string();
    drop(client);

    let stream = TcpStream::connect(tcp_addr).await?;
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let fetch = format!("{{\"reqId\":\"x\",\"op\":\"FETCH\",\"id\":\"{id}\"}}\n");
    writer.write_all(fetch.as_bytes()).await?;

    let line = timeout(READ_TIMEOUT, read_line(&mut reader))
        .await??
        .context("tcp response")?;
    let response: Response = serde_json::from_str(&line)?;
    assert_eq!(response, Response::success("x".into(), json!({"from": "http"})));

    let _ = shutdown_tx.send(());
    let last = timeout(READ_TIMEOUT, running).await???;
    assert_eq!(
        last,
        MetricsSnapshot {
            size: 1,
            operations: 2,
            successful_operations: 2,
        }
    );

    // The TCP connection was closed as part of shutdown.
    let next = timeout(READ_TIMEOUT, read_line(&mut reader)).await??;
    assert_eq!(next, None);
    Ok(())
}
