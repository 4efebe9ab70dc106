use futures::future::join_all;
use rand::RngCore;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::error::ToolError;
use crate::ssh::{Connector, RemoteSession, SshConfig};

/// Public description of one registered connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionInfo {
    pub id: String,
    pub host: String,
    pub port: u16,
    pub username: String,
}

struct Connection {
    info: ConnectionInfo,
    session: Arc<dyn RemoteSession>,
}

/// Generate an unpredictable connection identifier: 128 random bits as hex.
pub fn generate_connection_id() -> String {
    let mut bytes = [0u8; 16];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Owns the remote sessions of one server context.
///
/// Stateless transports (stdio, HTTP) share one registry per process; the
/// WebSocket transport creates one per accepted socket so a client's sessions
/// can be torn down when it goes away. The map lock is never held across
/// remote I/O.
#[derive(Clone)]
pub struct ConnectionRegistry {
    connector: Arc<dyn Connector>,
    connections: Arc<RwLock<HashMap<String, Connection>>>,
}

impl ConnectionRegistry {
    pub fn new(connector: Arc<dyn Connector>) -> Self {
        Self {
            connector,
            connections: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Open a session and register it under a fresh identifier.
    ///
    /// The session is only inserted once the connector returns it fully
    /// connected, so callers never observe a half-open entry.
    pub async fn create(&self, config: SshConfig) -> Result<String, ToolError> {
        let session = self.connector.connect(&config).await?;

        let mut connections = self.connections.write().await;
        let mut id = generate_connection_id();
        while connections.contains_key(&id) {
            id = generate_connection_id();
        }

        connections.insert(
            id.clone(),
            Connection {
                info: ConnectionInfo {
                    id: id.clone(),
                    host: config.host,
                    port: config.port,
                    username: config.username,
                },
                session,
            },
        );

        tracing::info!("Registered connection {} ({} active)", id, connections.len());
        Ok(id)
    }

    pub async fn lookup(&self, id: &str) -> Result<Arc<dyn RemoteSession>, ToolError> {
        let connections = self.connections.read().await;
        connections
            .get(id)
            .map(|c| c.session.clone())
            .ok_or_else(|| ToolError::ConnectionNotFound(id.to_string()))
    }

    /// Remove a connection and close its channels.
    ///
    /// The entry is gone before closing starts, so a close failure is
    /// reported but never leaves a stale identifier behind.
    pub async fn remove(&self, id: &str) -> Result<(), ToolError> {
        let connection = {
            let mut connections = self.connections.write().await;
            connections.remove(id)
        }
        .ok_or_else(|| ToolError::ConnectionNotFound(id.to_string()))?;

        tracing::info!("Closing connection {}", id);
        connection.session.close().await
    }

    /// Snapshot of all connections, ordered by host, port, username and id.
    pub async fn list(&self) -> Vec<ConnectionInfo> {
        let connections = self.connections.read().await;
        let mut infos: Vec<ConnectionInfo> = connections.values().map(|c| c.info.clone()).collect();
        infos.sort_by(|a, b| {
            (&a.host, a.port, &a.username, &a.id).cmp(&(&b.host, b.port, &b.username, &b.id))
        });
        infos
    }

    /// Close and remove every connection. Each close runs independently;
    /// failures are logged and do not stop the others. Returns how many
    /// connections were removed.
    pub async fn remove_all(&self) -> usize {
        let drained: Vec<(String, Connection)> = {
            let mut connections = self.connections.write().await;
            connections.drain().collect()
        };

        let count = drained.len();
        let closes = drained.into_iter().map(|(id, connection)| async move {
            if let Err(e) = connection.session.close().await {
                tracing::warn!("Error closing connection {}: {}", id, e);
            }
        });
        join_all(closes).await;

        if count > 0 {
            tracing::info!("Closed {} connection(s)", count);
        }
        count
    }

    pub async fn len(&self) -> usize {
        self.connections.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.connections.read().await.is_empty()
    }
}
