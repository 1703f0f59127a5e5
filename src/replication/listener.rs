//! Inbound Peer Listener
//!
//! Accepts peer connections and applies their messages to a local engine.

use std::net::SocketAddr;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, warn};

use crate::cache::SharedEngine;
use crate::error::Result;
use crate::replication::ReplicationMessage;

// == Peer Listener ==
/// A bound socket waiting to serve peer updates.
///
/// Binding and serving are separate steps so callers can learn the local
/// address (port 0 picks a free one) before wiring peers together.
#[derive(Debug)]
pub struct PeerListener {
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl PeerListener {
    pub async fn bind(address: impl ToSocketAddrs) -> Result<Self> {
        let listener = TcpListener::bind(address).await?;
        let local_addr = listener.local_addr()?;
        Ok(Self {
            listener,
            local_addr,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    // == Serve ==
    /// Applies every received message to `engine` until shutdown.
    ///
    /// Messages go straight to `engine`, never back out to other peers.
    pub fn serve(self, engine: SharedEngine, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(address = %self.local_addr, "peer listener started");
            let connection_shutdown = shutdown.clone();
            let mut connections = JoinSet::new();

            loop {
                tokio::select! {
                    accepted = self.listener.accept() => match accepted {
                        Ok((stream, remote)) => {
                            debug!(%remote, open = connections.len() + 1, "peer connected");
                            connections.spawn(read_updates(
                                stream,
                                remote,
                                engine.clone(),
                                connection_shutdown.clone(),
                            ));
                        }
                        Err(e) => warn!(error = %e, "failed to accept peer connection"),
                    },
                    Some(finished) = connections.join_next(), if !connections.is_empty() => {
                        if let Err(e) = finished {
                            warn!(error = %e, "peer connection task failed");
                        }
                    }
                    _ = shutdown.changed() => break,
                }
            }

            connections.shutdown().await;
            info!(address = %self.local_addr, "peer listener stopped");
        })
    }
}

async fn read_updates(
    stream: TcpStream,
    remote: SocketAddr,
    engine: SharedEngine,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut lines = BufReader::new(stream).lines();

    loop {
        let line = tokio::select! {
            line = lines.next_line() => line,
            _ = shutdown.changed() => break,
        };

        match line {
            Ok(Some(line)) if line.trim().is_empty() => continue,
            Ok(Some(line)) => apply_line(&line, &engine, remote).await,
            Ok(None) => break,
            Err(e) => {
                warn!(%remote, error = %e, "peer connection error");
                break;
            }
        }
    }

    debug!(%remote, "peer disconnected");
}

async fn apply_line(line: &str, engine: &SharedEngine, remote: SocketAddr) {
    let message = match ReplicationMessage::decode(line) {
        Ok(message) => message,
        Err(e) => {
            warn!(%remote, error = %e, "discarding malformed peer message");
            return;
        }
    };

    let engine = engine.clone();
    match tokio::task::spawn_blocking(move || message.apply(engine.as_ref())).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(%remote, error = %e, "failed to apply peer update"),
        Err(e) => warn!(%remote, error = %e, "peer update task failed"),
    }
}
