//! Mixer facade: server semantics on top of the generic RPC client.
//!
//! A stateless wrapper that encodes the server's method names, parameter
//! shapes and result-field extraction. Every query round-trips - there is
//! no cache - and every transmitted volume is clamped into [0,100] before
//! it goes on the wire, regardless of caller input.
//!
//! Read-modify-write operations (`adjust_*`, `toggle_*`, the group-wide
//! volume operations) are two or more round trips and are not atomic: a
//! concurrent external change between the read and the write is not
//! detected.

use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tracing::debug;

use crate::models::{Client, Group, Server};
use crate::rpc::{ConnectionState, Endpoint, RpcClient, RpcError};

/// Clamp a requested percentage into the closed range [0,100].
fn clamp_percent(percent: i64) -> u32 {
    percent.clamp(0, 100) as u32
}

/// Scale one member's volume so the loudest member lands on `target`.
fn scale_percent(current: u32, target: u32, loudest: u32) -> u32 {
    let scaled = current as f64 * target as f64 / loudest as f64;
    clamp_percent(scaled.round() as i64)
}

/// Pull a named field out of a call result and decode it.
fn extract_field<T: DeserializeOwned>(mut result: Value, field: &str) -> Result<T, RpcError> {
    let value = result
        .get_mut(field)
        .map(Value::take)
        .ok_or_else(|| RpcError::Protocol(format!("result missing {field:?} field")))?;
    serde_json::from_value(value).map_err(RpcError::Decode)
}

/// Stateless mixer controls for one server connection.
///
/// Safe to invoke concurrently for different entities; it only ever
/// forwards to the RPC client, whose pending table serializes per id.
pub struct Mixer {
    client: RpcClient,
}

impl Mixer {
    pub fn new(client: RpcClient) -> Self {
        Self { client }
    }

    /// Connect and wrap in one step.
    pub async fn connect(endpoint: &Endpoint) -> Result<Self, RpcError> {
        Ok(Self::new(RpcClient::connect(endpoint).await?))
    }

    /// The underlying RPC client (subscription point, raw calls).
    pub fn client(&self) -> &RpcClient {
        &self.client
    }

    pub fn state(&self) -> ConnectionState {
        self.client.state()
    }

    pub async fn close(&self) {
        self.client.close().await;
    }

    /// Fetch the full status tree: every group and its member clients.
    pub async fn get_server_status(&self) -> Result<Server, RpcError> {
        let result = self.client.call("Server.GetStatus", None).await?;
        extract_field(result, "server")
    }

    pub async fn get_client_status(&self, client_id: &str) -> Result<Client, RpcError> {
        let result = self
            .client
            .call("Client.GetStatus", Some(json!({"id": client_id})))
            .await?;
        extract_field(result, "client")
    }

    pub async fn get_client_volume_percent(&self, client_id: &str) -> Result<u32, RpcError> {
        Ok(self.get_client_status(client_id).await?.config.volume.percent)
    }

    pub async fn get_client_muted(&self, client_id: &str) -> Result<bool, RpcError> {
        Ok(self.get_client_status(client_id).await?.config.volume.muted)
    }

    pub async fn set_client_muted(&self, client_id: &str, muted: bool) -> Result<(), RpcError> {
        self.client
            .call(
                "Client.SetVolume",
                Some(json!({"id": client_id, "volume": {"muted": muted}})),
            )
            .await
            .map(|_| ())
    }

    /// Set a client's volume, clamping into [0,100] before transmit.
    pub async fn set_client_volume_percent(
        &self,
        client_id: &str,
        percent: i64,
    ) -> Result<(), RpcError> {
        let clamped = clamp_percent(percent);
        debug!(client_id, percent = clamped, "setting client volume");
        self.client
            .call(
                "Client.SetVolume",
                Some(json!({"id": client_id, "volume": {"percent": clamped}})),
            )
            .await
            .map(|_| ())
    }

    /// Read the current volume, apply `delta`, clamp and write back.
    pub async fn adjust_client_volume(&self, client_id: &str, delta: i64) -> Result<(), RpcError> {
        let current = self.get_client_volume_percent(client_id).await? as i64;
        self.set_client_volume_percent(client_id, current + delta)
            .await
    }

    /// Invert the current mute state. Returns the new state.
    pub async fn toggle_client_mute(&self, client_id: &str) -> Result<bool, RpcError> {
        let muted = !self.get_client_muted(client_id).await?;
        self.set_client_muted(client_id, muted).await?;
        Ok(muted)
    }

    pub async fn get_group_status(&self, group_id: &str) -> Result<Group, RpcError> {
        let result = self
            .client
            .call("Group.GetStatus", Some(json!({"id": group_id})))
            .await?;
        extract_field(result, "group")
    }

    pub async fn get_group_muted(&self, group_id: &str) -> Result<bool, RpcError> {
        Ok(self.get_group_status(group_id).await?.muted)
    }

    pub async fn set_group_muted(&self, group_id: &str, muted: bool) -> Result<(), RpcError> {
        self.client
            .call(
                "Group.SetMute",
                Some(json!({"id": group_id, "mute": muted})),
            )
            .await
            .map(|_| ())
    }

    /// Invert the group mute state. Returns the new state.
    pub async fn toggle_group_mute(&self, group_id: &str) -> Result<bool, RpcError> {
        let muted = !self.get_group_muted(group_id).await?;
        self.set_group_muted(group_id, muted).await?;
        Ok(muted)
    }

    /// Set a group's volume by scaling every member proportionally so the
    /// loudest member lands on `percent`. When every member sits at zero
    /// there is no ratio to preserve and all members jump to the target.
    pub async fn set_group_volume_percent(
        &self,
        group_id: &str,
        percent: i64,
    ) -> Result<(), RpcError> {
        let group = self.get_group_status(group_id).await?;
        self.scale_group_members(&group, clamp_percent(percent))
            .await
    }

    /// Shift a group's volume: the loudest member moves by `delta` and the
    /// rest keep their ratio to it.
    pub async fn adjust_group_volume(&self, group_id: &str, delta: i64) -> Result<(), RpcError> {
        let group = self.get_group_status(group_id).await?;
        let loudest = loudest_percent(&group) as i64;
        self.scale_group_members(&group, clamp_percent(loudest + delta))
            .await
    }

    async fn scale_group_members(&self, group: &Group, target: u32) -> Result<(), RpcError> {
        let loudest = loudest_percent(group);
        for client in &group.clients {
            let percent = if loudest == 0 {
                target
            } else {
                scale_percent(client.config.volume.percent, target, loudest)
            };
            self.set_client_volume_percent(&client.id, percent as i64)
                .await?;
        }
        Ok(())
    }
}

fn loudest_percent(group: &Group) -> u32 {
    group
        .clients
        .iter()
        .map(|c| c.config.volume.percent)
        .max()
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ClientConfig, ClientVolume};
    use pretty_assertions::assert_eq;

    fn member(id: &str, percent: u32) -> Client {
        Client {
            id: id.to_string(),
            config: ClientConfig {
                volume: ClientVolume {
                    percent,
                    muted: false,
                },
                ..ClientConfig::default()
            },
            ..Client::default()
        }
    }

    #[test]
    fn test_clamp_percent_bounds() {
        assert_eq!(clamp_percent(-5), 0);
        assert_eq!(clamp_percent(0), 0);
        assert_eq!(clamp_percent(55), 55);
        assert_eq!(clamp_percent(100), 100);
        assert_eq!(clamp_percent(150), 100);
    }

    #[test]
    fn test_scale_percent_preserves_ratio() {
        // Loudest at 100, target 50: everything halves.
        assert_eq!(scale_percent(100, 50, 100), 50);
        assert_eq!(scale_percent(60, 50, 100), 30);
        assert_eq!(scale_percent(1, 50, 100), 1); // 0.5 rounds up
    }

    #[test]
    fn test_scale_percent_never_exceeds_bounds() {
        assert_eq!(scale_percent(100, 100, 50), 100); // would be 200
        assert_eq!(scale_percent(0, 100, 50), 0);
    }

    #[test]
    fn test_loudest_percent_of_group() {
        let group = Group {
            clients: vec![member("a", 30), member("b", 80), member("c", 55)],
            ..Group::default()
        };
        assert_eq!(loudest_percent(&group), 80);

        let empty = Group::default();
        assert_eq!(loudest_percent(&empty), 0);
    }

    #[test]
    fn test_extract_field_pulls_named_object() {
        let result = json!({"client": {"id": "x", "connected": true}});
        let client: Client = extract_field(result, "client").unwrap();
        assert_eq!(client.id, "x");

        let missing: Result<Client, _> = extract_field(json!({}), "client");
        assert!(matches!(missing, Err(RpcError::Protocol(_))));
    }
}
