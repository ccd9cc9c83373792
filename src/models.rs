//! Server-reported entities.
//!
//! These structs mirror the JSON shapes the audio server returns from
//! `Server.GetStatus`, `Group.GetStatus` and `Client.GetStatus`. They are
//! decoded fresh on each query - the core never caches them. Unknown
//! fields are ignored and optional fields default, so newer servers with
//! richer status trees still decode.

use serde::{Deserialize, Serialize};

/// Full server status tree: every group with its member clients.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Server {
    #[serde(default)]
    pub groups: Vec<Group>,
}

impl Server {
    /// Groups sorted by display name, the order the UI renders them in.
    pub fn sorted_groups(&self) -> Vec<&Group> {
        let mut groups: Vec<&Group> = self.groups.iter().collect();
        groups.sort_by_key(|g| g.display_name());
        groups
    }

    pub fn find_group(&self, id: &str) -> Option<&Group> {
        self.groups.iter().find(|g| g.id == id)
    }

    pub fn find_client(&self, id: &str) -> Option<&Client> {
        self.groups
            .iter()
            .flat_map(|g| g.clients.iter())
            .find(|c| c.id == id)
    }
}

/// A playback group: shares one stream, carries a group-level mute.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Group {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub muted: bool,
    #[serde(default)]
    pub stream_id: String,
    #[serde(default)]
    pub clients: Vec<Client>,
}

impl Group {
    /// Group name, falling back to the id when the server reports none.
    pub fn display_name(&self) -> String {
        if self.name.is_empty() {
            format!("Group {}", self.id)
        } else {
            self.name.clone()
        }
    }

    /// Member clients sorted by display name.
    pub fn sorted_clients(&self) -> Vec<&Client> {
        let mut clients: Vec<&Client> = self.clients.iter().collect();
        clients.sort_by_key(|c| c.display_name());
        clients
    }
}

/// A playback client (one speaker endpoint).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Client {
    pub id: String,
    #[serde(default)]
    pub connected: bool,
    #[serde(default)]
    pub host: Host,
    #[serde(default)]
    pub config: ClientConfig,
}

impl Client {
    /// Configured name, then host name, then the id.
    pub fn display_name(&self) -> String {
        if !self.config.name.is_empty() {
            self.config.name.clone()
        } else if !self.host.name.is_empty() {
            self.host.name.clone()
        } else {
            format!("Client {}", self.id)
        }
    }
}

/// The machine a client runs on.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Host {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub ip: String,
}

/// Server-side per-client configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClientConfig {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub latency: i32,
    #[serde(default)]
    pub volume: ClientVolume,
}

/// Volume state of one client.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientVolume {
    #[serde(default)]
    pub percent: u32,
    #[serde(default)]
    pub muted: bool,
}
