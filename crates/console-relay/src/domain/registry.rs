//! Where the relay learns which region a server lives in.
//!
//! Server records are owned by an external collaborator (the admin
//! surface's persistence layer).  The relay only needs `server_id → region`,
//! so that is all the trait asks for.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use console_core::{Region, ServerId};

/// Read-only lookup of registered game servers.
#[cfg_attr(test, mockall::automock)]
pub trait ServerRegistry: Send + Sync {
    /// Region of `server_id`, or `None` if it is not registered.
    fn region_of(&self, server_id: ServerId) -> Option<Region>;

    /// Every registered server id, ascending.
    fn server_ids(&self) -> Vec<ServerId>;
}

/// One `[[servers]]` entry of the config file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisteredServer {
    pub id: ServerId,
    pub region: Region,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// In-memory registry, populated from configuration.
#[derive(Debug, Clone, Default)]
pub struct StaticRegistry {
    servers: BTreeMap<ServerId, RegisteredServer>,
}

impl StaticRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces a server.
    pub fn insert(&mut self, server: RegisteredServer) {
        self.servers.insert(server.id, server);
    }

    pub fn get(&self, server_id: ServerId) -> Option<&RegisteredServer> {
        self.servers.get(&server_id)
    }

    pub fn len(&self) -> usize {
        self.servers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }
}

impl FromIterator<RegisteredServer> for StaticRegistry {
    fn from_iter<I: IntoIterator<Item = RegisteredServer>>(iter: I) -> Self {
        let mut registry = Self::new();
        for server in iter {
            registry.insert(server);
        }
        registry
    }
}

impl ServerRegistry for StaticRegistry {
    fn region_of(&self, server_id: ServerId) -> Option<Region> {
        self.servers.get(&server_id).map(|s| s.region)
    }

    fn server_ids(&self) -> Vec<ServerId> {
        self.servers.keys().copied().collect()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
