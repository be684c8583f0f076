//! Server network layer accepting paired command and notification connections

use crate::config::ServerConfig;
use crate::connection::{pump, ConnectionHandle};
use crate::dispatcher;
use crate::service::GameService;
use log::{error, info, warn};
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Main server: two listeners and the game service behind them
pub struct Server {
    command: TcpListener,
    notification: TcpListener,
    service: Arc<GameService>,
}

impl Server {
    pub async fn bind(config: ServerConfig) -> Result<Self, BoxError> {
        config.validate()?;

        let command = TcpListener::bind(&config.command_addr).await?;
        let notification = TcpListener::bind(&config.notification_addr).await?;
        info!(
            "Server listening on {} (commands) and {} (notifications)",
            command.local_addr()?,
            notification.local_addr()?
        );
        info!(
            "{} seats per game, {} rounds, {} prompts",
            config.rules.seats,
            config.rules.max_rounds,
            config.prompts.len()
        );

        Ok(Server {
            command,
            notification,
            service: GameService::start(config),
        })
    }

    pub fn command_addr(&self) -> io::Result<SocketAddr> {
        self.command.local_addr()
    }

    pub fn notification_addr(&self) -> io::Result<SocketAddr> {
        self.notification.local_addr()
    }

    pub fn service(&self) -> &Arc<GameService> {
        &self.service
    }

    /// Accepts clients forever. Each client opens its command connection
    /// first and its notification connection second; the two are paired in
    /// accept order.
    pub async fn run(self) {
        loop {
            let (command, peer) = match self.command.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    error!("Error accepting command connection: {}", e);
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    continue;
                }
            };
            let notification = loop {
                match self.notification.accept().await {
                    Ok((stream, _)) => break stream,
                    Err(e) => {
                        error!("Error accepting notification connection: {}", e);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    }
                }
            };

            self.spawn_client(command, notification, peer);
        }
    }

    /// Spawns the writer task for each socket and the request reader.
    fn spawn_client(&self, command: TcpStream, notification: TcpStream, peer: SocketAddr) {
        for stream in [&command, &notification] {
            if let Err(e) = stream.set_nodelay(true) {
                warn!("Failed to set TCP_NODELAY for {}: {}", peer, e);
            }
        }

        let (conn, outbox) = ConnectionHandle::new(peer);
        info!("Client {} connected as connection {}", peer, conn.id);

        let (command_reader, command_writer) = command.into_split();
        let (_, notification_writer) = notification.into_split();

        tokio::spawn(pump(outbox.replies, command_writer, peer));
        tokio::spawn(pump(outbox.notifications, notification_writer, peer));
        tokio::spawn(dispatcher::serve(Arc::clone(&self.service), conn, command_reader));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    fn ephemeral_config() -> ServerConfig {
        ServerConfig {
            command_addr: "127.0.0.1:0".to_string(),
            notification_addr: "127.0.0.1:0".to_string(),
            ..ServerConfig::default()
        }
    }

    #[tokio::test]
    async fn test_bind_rejects_invalid_config() {
        let mut config = ephemeral_config();
        config.rules.seats = 1;
        assert!(Server::bind(config).await.is_err());
    }

    #[tokio::test]
    async fn test_paired_connections_get_replies() {
        let server = Server::bind(ephemeral_config()).await.unwrap();
        let command_addr = server.command_addr().unwrap();
        let notification_addr = server.notification_addr().unwrap();
        tokio::spawn(server.run());

        let mut command = TcpStream::connect(command_addr).await.unwrap();
        let _notification = TcpStream::connect(notification_addr).await.unwrap();

        command
            .write_all(br#"{"method":"register","username":"ann","password":"pw"}"#)
            .await
            .unwrap();

        let mut buffer = vec![0u8; 1024];
        let read = command.read(&mut buffer).await.unwrap();
        let reply: serde_json::Value = serde_json::from_slice(&buffer[..read]).unwrap();
        assert_eq!(reply["status"], 200);
    }
}
