//! Outbound Peer Connection
//!
//! Each peer gets its own task owning one reused TCP connection. Local
//! writes hand messages to that task through a bounded queue and never wait
//! on the network.

use std::io;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::replication::ReplicationMessage;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const WRITE_TIMEOUT: Duration = Duration::from_secs(5);

// == Peer Sender ==
/// Handle for pushing messages to one peer.
#[derive(Debug, Clone)]
pub struct PeerSender {
    address: String,
    queue: mpsc::Sender<ReplicationMessage>,
}

impl PeerSender {
    /// Starts the delivery task for `address`.
    ///
    /// At most `capacity` messages wait for delivery; further messages are
    /// dropped until the peer catches up.
    pub fn spawn(
        address: impl Into<String>,
        capacity: usize,
        shutdown: watch::Receiver<bool>,
    ) -> (Self, JoinHandle<()>) {
        let address = address.into();
        let (queue, pending) = mpsc::channel(capacity.max(1));
        let handle = tokio::spawn(deliver_loop(address.clone(), pending, shutdown));
        (Self { address, queue }, handle)
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// Queues a message without blocking.
    pub fn send(&self, message: ReplicationMessage) {
        match self.queue.try_send(message) {
            Ok(()) => {}
            Err(TrySendError::Full(message)) => {
                warn!(peer = %self.address, key = %message.key(), "peer queue full, dropping update");
            }
            Err(TrySendError::Closed(_)) => {
                debug!(peer = %self.address, "peer sender stopped");
            }
        }
    }
}

// == Delivery Loop ==
async fn deliver_loop(
    address: String,
    mut pending: mpsc::Receiver<ReplicationMessage>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut stream: Option<TcpStream> = None;

    loop {
        let message = tokio::select! {
            message = pending.recv() => match message {
                Some(message) => message,
                None => break,
            },
            _ = shutdown.changed() => break,
        };

        let payload = match message.encode() {
            Ok(payload) => payload,
            Err(e) => {
                warn!(peer = %address, error = %e, "failed to encode update");
                continue;
            }
        };

        // A pooled connection may have been closed by the peer; retry once
        // on a fresh one before giving up on this message.
        let mut delivered = false;
        for _ in 0..2 {
            match write_line(&address, &mut stream, &payload).await {
                Ok(()) => {
                    delivered = true;
                    break;
                }
                Err(e) => {
                    debug!(peer = %address, error = %e, "peer connection failed");
                    stream = None;
                }
            }
        }
        if !delivered {
            warn!(peer = %address, key = %message.key(), "could not deliver update to peer");
        }
    }

    info!(peer = %address, "peer sender stopped");
}

async fn write_line(address: &str, stream: &mut Option<TcpStream>, payload: &[u8]) -> io::Result<()> {
    if stream.is_none() {
        let connected = tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect(address))
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "connect timed out"))??;
        connected.set_nodelay(true)?;
        *stream = Some(connected);
    }

    let Some(conn) = stream.as_mut() else {
        return Err(io::Error::new(io::ErrorKind::NotConnected, "no connection"));
    };

    tokio::time::timeout(WRITE_TIMEOUT, conn.write_all(payload))
        .await
        .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "write timed out"))?
}
