use std::{future::Future, net::SocketAddr};

use anyhow::Result;
use serde_json::Value;
use tokio::{
    io::{AsyncBufRead, AsyncWrite, BufReader},
    net::{TcpListener, TcpStream},
    select,
    sync::watch,
    task::{JoinError, JoinSet},
};
use tracing::{debug, info, warn};

use crate::{
    engine::StoreHandle,
    protocol::{Op, Request, Response, decode_request, read_line, write_message},
};

/// Accepts line-protocol clients and forwards their requests to the store.
pub struct TcpServer {
    listener: TcpListener,
    store: StoreHandle,
}

impl TcpServer {
    pub fn new(listener: TcpListener, store: StoreHandle) -> Self {
        Self { listener, store }
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Serves clients until `shutdown` resolves, then stops accepting, tells
    /// every open connection to close after its current line and waits for
    /// all of them to finish.
    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        let TcpServer { listener, store } = self;
        let (stop_tx, stop_rx) = watch::channel(false);
        let mut connections = JoinSet::new();
        tokio::pin!(shutdown);

        loop {
            select! {
                _ = &mut shutdown => break,
                accept_result = listener.accept() => {
                    handle_accept_result(accept_result, &store, &stop_rx, &mut connections);
                }
                Some(joined) = connections.join_next() => log_join_result(joined),
            }
        }

        drop(listener);
        info!(open = connections.len(), "tcp server draining connections");
        let _ = stop_tx.send(true);
        while let Some(joined) = connections.join_next().await {
            log_join_result(joined);
        }
        info!("tcp server stopped");

        Ok(())
    }
}

fn handle_accept_result(
    result: std::io::Result<(TcpStream, SocketAddr)>,
    store: &StoreHandle,
    stop: &watch::Receiver<bool>,
    connections: &mut JoinSet<()>,
) {
    match result {
        Ok((stream, peer)) => {
            let store = store.clone();
            let stop = stop.clone();
            connections.spawn(async move {
                debug!(peer = %peer, "tcp client connected");
                if let Err(err) = handle_connection(stream, store, stop).await {
                    warn!(peer = %peer, error = ?err, "tcp connection closed with error");
                } else {
                    debug!(peer = %peer, "tcp client disconnected");
                }
            });
        }
        Err(err) => warn!(error = ?err, "failed to accept connection"),
    }
}

fn log_join_result(joined: Result<(), JoinError>) {
    if let Err(err) = joined {
        warn!(error = ?err, "tcp connection task failed");
    }
}

async fn handle_connection(
    stream: TcpStream,
    store: StoreHandle,
    stop: watch::Receiver<bool>,
) -> Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    serve_lines(&mut reader, &mut writer, &store, stop).await
}

async fn serve_lines<R, W>(
    reader: &mut R,
    writer: &mut W,
    store: &StoreHandle,
    mut stop: watch::Receiver<bool>,
) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    loop {
        select! {
            _ = stop.changed() => {
                debug!("closing tcp connection for shutdown");
                break;
            }
            line = read_line(reader) => {
                let line = match line {
                    Ok(Some(line)) => line,
                    Ok(None) => break,
                    Err(err) if err.is_malformed_line() => {
                        warn!(error = %err, "skipping malformed request line");
                        continue;
                    }
                    Err(err) => return Err(err.into()),
                };
                if !handle_line(&line, writer, store).await? {
                    break;
                }
            }
        }
    }

    Ok(())
}

/// Returns `false` when the client asked to close the connection.
async fn handle_line<W>(line: &str, writer: &mut W, store: &StoreHandle) -> Result<bool>
where
    W: AsyncWrite + Unpin,
{
    let request = match decode_request(line) {
        Ok(request) => request,
        Err(err) => {
            warn!(error = %err, "skipping malformed request line");
            return Ok(true);
        }
    };

    match respond(store, request).await {
        Some(response) => {
            write_message(writer, &response).await?;
            Ok(true)
        }
        None => Ok(false),
    }
}

/// Runs one request against the store. `STOP` has no response.
async fn respond(store: &StoreHandle, request: Request) -> Option<Response> {
    let op = match request.operation() {
        Ok(op) => op,
        Err(err) => return Some(Response::failure(request.req_id, err)),
    };
    let Request { req_id, val, id, .. } = request;

    let result = match op {
        Op::Store => store.set(val).await.map(|id| Value::String(id.to_string())),
        Op::Fetch => store.get(&id).await.map(Option::unwrap_or_default),
        Op::Update => store.update(&id, val).await.map(|()| Value::Null),
        Op::Delete => store.delete(&id).await.map(|()| Value::Null),
        Op::Stop => return None,
    };

    Some(match result {
        Ok(res) => Response::success(req_id, res),
        Err(err) => Response::failure(req_id, err),
    })
}
