//! Fan-out of notifications to everyone seated in a game

use crate::registry::{Registry, UserId};
use duel_shared::Notification;
use log::{debug, error};
use std::sync::Arc;

/// Pushes one notification to a set of users over their notification
/// connections.
///
/// Callers hold the game's lock while broadcasting so every player sees a
/// game's notifications in transition order. That is safe because delivery
/// only queues onto each connection's writer channel; no socket write
/// happens here.
#[derive(Debug, Clone)]
pub struct Broadcaster {
    registry: Arc<Registry>,
}

impl Broadcaster {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self { registry }
    }

    /// Returns how many recipients had a live connection to queue onto.
    /// Users without a live session simply miss the message.
    pub async fn send(&self, recipients: &[UserId], notification: &Notification) -> usize {
        let text = match serde_json::to_string(notification) {
            Ok(text) => text,
            Err(e) => {
                error!("Failed to encode {} notification: {}", notification.name(), e);
                return 0;
            }
        };

        let connections = self.registry.accounts().read().await.connections_of(recipients);
        let delivered = connections
            .iter()
            .filter(|conn| conn.notify_encoded(text.clone()))
            .count();

        debug!(
            "Broadcast {} to {}/{} players",
            notification.name(),
            delivered,
            recipients.len()
        );
        delivered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::ConnectionHandle;
    use std::net::SocketAddr;

    fn peer() -> SocketAddr {
        "127.0.0.1:8082".parse().unwrap()
    }

    #[tokio::test]
    async fn test_broadcast_reaches_live_sessions_only() {
        let registry = Arc::new(Registry::new());
        let (ann_conn, mut ann_outbox) = ConnectionHandle::new(peer());
        let (bob_conn, _bob_outbox) = ConnectionHandle::new(peer());

        let (ann, bob) = {
            let mut accounts = registry.accounts().write().await;
            let ann = accounts.register("ann", "pw", &ann_conn).unwrap();
            let bob = accounts.register("bob", "pw", &bob_conn).unwrap();
            accounts.drop_connection(bob_conn.id);
            (ann, bob)
        };

        let broadcaster = Broadcaster::new(Arc::clone(&registry));
        let delivered = broadcaster
            .send(&[ann.user_id, bob.user_id], &Notification::EveryoneAnswered)
            .await;

        assert_eq!(delivered, 1);
        assert_eq!(
            ann_outbox.notifications.recv().await.unwrap(),
            r#"{"message":"everyoneanswered"}"#
        );
        assert!(ann_outbox.replies.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_broadcast_to_closed_connection_is_not_counted() {
        let registry = Arc::new(Registry::new());
        let (conn, outbox) = ConnectionHandle::new(peer());
        let ann = registry
            .accounts()
            .write()
            .await
            .register("ann", "pw", &conn)
            .unwrap();
        drop(outbox);

        let broadcaster = Broadcaster::new(registry);
        let delivered = broadcaster.send(&[ann.user_id], &Notification::GameEnded).await;
        assert_eq!(delivered, 0);
    }
}
