//! [`ServerRegistry`] – the configured servers and their last known state.
//!
//! The registry follows each server's `sessionInfo-<id>` topic and keeps the
//! display name and [`ConnectionState`] current, so the HTTP surface and the
//! chat commands can list servers without talking to the connectors.

use std::sync::{Arc, Mutex};

use livetiming_types::{ConnectionState, Server, SessionInfo, topic};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::bus::TopicBus;

#[derive(Clone, Debug, Default)]
pub struct ServerRegistry {
    servers: Arc<Mutex<Vec<Server>>>,
}

impl ServerRegistry {
    /// A registry holding `servers` in configuration order.
    pub fn new(servers: Vec<Server>) -> Self {
        Self {
            servers: Arc::new(Mutex::new(servers)),
        }
    }

    /// Copy of every server in configuration order.
    pub fn snapshot(&self) -> Vec<Server> {
        self.servers.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// A copy of server `id`, if configured.
    pub fn get(&self, id: &str) -> Option<Server> {
        self.servers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .find(|s| s.id == id)
            .cloned()
    }

    /// Number of configured servers.
    pub fn len(&self) -> usize {
        self.servers.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Fold a session-info snapshot into the matching server.
    ///
    /// Returns `true` when the name or state changed. Snapshots for unknown
    /// server ids are ignored.
    pub fn apply(&self, info: &SessionInfo) -> bool {
        let mut servers = self.servers.lock().unwrap_or_else(|e| e.into_inner());
        let Some(server) = servers.iter_mut().find(|s| s.id == info.server_id) else {
            return false;
        };

        let state = ConnectionState::from_flags(info.websocket_running, info.receiving_data);
        let name = if info.server_name.is_empty() {
            server.name.clone()
        } else {
            info.server_name.clone()
        };
        if server.state == state && server.name == name {
            return false;
        }

        info!(server = %server.id, name = %name, from = ?server.state, to = ?state, "server state changed");
        server.state = state;
        server.name = name;
        true
    }

    /// Spawn one task per server that applies its session-info snapshots.
    ///
    /// Subscriptions are registered before this returns, so no snapshot
    /// published afterwards is missed.
    pub fn spawn_updaters(
        &self,
        bus: &TopicBus<Arc<SessionInfo>>,
        cancel: CancellationToken,
    ) -> Vec<JoinHandle<()>> {
        self.snapshot()
            .into_iter()
            .map(|server| {
                let mut sub = bus.subscribe(topic::session_info(&server.id));
                let registry = self.clone();
                let cancel = cancel.clone();
                tokio::spawn(async move {
                    loop {
                        let info = tokio::select! {
                            _ = cancel.cancelled() => break,
                            info = sub.recv() => info,
                        };
                        match info {
                            Some(info) => {
                                registry.apply(&info);
                            }
                            None => break,
                        }
                    }
                    debug!(server = %server.id, "registry updater stopped");
                })
            })
            .collect()
    }
}
