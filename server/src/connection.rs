//! Per-client connection handles
//!
//! A client holds two sockets: the command connection (request/response) and
//! the notification connection (server push). Neither is written directly by
//! handlers. Each socket gets a writer task fed by an unbounded channel, and a
//! [`ConnectionHandle`] carries the sending halves, so queueing a message never
//! blocks and never happens across a socket write.

use duel_shared::Response;
use log::{debug, warn};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;

pub type ConnectionId = u64;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Sending side of one client's connection pair. Cheap to clone.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    pub id: ConnectionId,
    pub peer: SocketAddr,
    replies: mpsc::UnboundedSender<String>,
    notifications: mpsc::UnboundedSender<String>,
}

/// Receiving side of a connection pair, drained by the writer tasks.
#[derive(Debug)]
pub struct Outbox {
    pub replies: mpsc::UnboundedReceiver<String>,
    pub notifications: mpsc::UnboundedReceiver<String>,
}

impl ConnectionHandle {
    pub fn new(peer: SocketAddr) -> (Self, Outbox) {
        let (reply_tx, reply_rx) = mpsc::unbounded_channel();
        let (notify_tx, notify_rx) = mpsc::unbounded_channel();

        let handle = Self {
            id: NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed),
            peer,
            replies: reply_tx,
            notifications: notify_tx,
        };
        let outbox = Outbox {
            replies: reply_rx,
            notifications: notify_rx,
        };
        (handle, outbox)
    }

    /// Queues a reply on the command connection. Returns false once the
    /// client is gone.
    pub fn reply(&self, response: &Response) -> bool {
        match serde_json::to_string(response) {
            Ok(text) => self.replies.send(text).is_ok(),
            Err(e) => {
                warn!("Failed to encode reply for {}: {}", self.peer, e);
                false
            }
        }
    }

    /// Queues an already-encoded notification, so a broadcast encodes once.
    pub fn notify_encoded(&self, text: String) -> bool {
        self.notifications.send(text).is_ok()
    }
}

/// Drains `outgoing` into `writer` until the channel closes or the write fails.
pub async fn pump<W>(mut outgoing: mpsc::UnboundedReceiver<String>, mut writer: W, peer: SocketAddr)
where
    W: AsyncWrite + Unpin,
{
    while let Some(message) = outgoing.recv().await {
        if let Err(e) = writer.write_all(message.as_bytes()).await {
            debug!("Write to {} failed: {}", peer, e);
            break;
        }
        if let Err(e) = writer.flush().await {
            debug!("Flush to {} failed: {}", peer, e);
            break;
        }
    }
}
