/// Network Controller Client
///
/// Typed facade over the ZeroTier controller API. The jobs depend on the
/// `ControllerClient` trait only, so tests can substitute fixtures for the
/// HTTP implementation.

pub mod http;
pub mod wire;

pub use http::HttpControllerClient;

use crate::error::WardenResult;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Member ids in a network mapped to their controller revision
pub type MemberIndex = BTreeMap<String, u64>;

#[async_trait]
pub trait ControllerClient: Send + Sync {
    /// List the members of a network
    async fn list_members(
        &self,
        owner_id: &str,
        nwid: &str,
        use_remote_controller: bool,
    ) -> WardenResult<MemberIndex>;

    /// Change a member's configuration and return the updated member
    async fn update_member(
        &self,
        owner_id: &str,
        nwid: &str,
        member_id: &str,
        params: &MemberUpdate,
        use_remote_controller: bool,
    ) -> WardenResult<ControllerMember>;

    /// Fetch a network together with its members and their peer state.
    ///
    /// `Ok(None)` means the controller does not know the network.
    async fn get_network_info(
        &self,
        owner_id: &str,
        nwid: &str,
        use_remote_controller: bool,
    ) -> WardenResult<Option<NetworkInfo>>;
}

/// Member configuration change
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub authorized: Option<bool>,
}

impl MemberUpdate {
    pub fn deauthorize() -> Self {
        Self {
            authorized: Some(false),
        }
    }
}

/// Network as described by the controller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkDescriptor {
    pub id: String,
    pub name: Option<String>,
    pub private: bool,
}

/// Network descriptor plus member listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkInfo {
    pub network: NetworkDescriptor,
    /// Absent when the controller did not return member data
    pub members: Option<Vec<ControllerMember>>,
}

/// One member as reported by the controller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControllerMember {
    pub id: String,
    pub nwid: String,
    pub authorized: bool,
    pub ip_assignments: Vec<String>,
    pub revision: u64,
    pub client_version: Option<String>,
    /// Live peer record, when the controller host can see the node
    pub peer: Option<PeerInfo>,
    /// Last time the node was online (Central only)
    pub last_online: Option<DateTime<Utc>>,
    /// Physical address reported by Central
    pub physical_address: Option<String>,
}

/// Peer record from the local node's peer table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerInfo {
    pub address: String,
    /// -1 when unknown
    pub latency: i64,
    pub role: String,
    pub version: Option<String>,
    pub paths: Vec<PeerPath>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerPath {
    pub address: String,
    pub active: bool,
    pub expired: bool,
    pub preferred: bool,
    pub last_receive: Option<DateTime<Utc>>,
}

impl PeerInfo {
    /// Returns the path traffic is currently flowing over, if any
    pub fn active_path(&self) -> Option<&PeerPath> {
        let mut live = self.paths.iter().filter(|p| p.active && !p.expired);
        let first = live.clone().next();
        live.find(|p| p.preferred).or(first)
    }

    /// Most recent receive time across all paths
    pub fn last_receive(&self) -> Option<DateTime<Utc>> {
        self.paths.iter().filter_map(|p| p.last_receive).max()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path(address: &str, active: bool, preferred: bool) -> PeerPath {
        PeerPath {
            address: address.to_string(),
            active,
            expired: false,
            preferred,
            last_receive: None,
        }
    }

    #[test]
    fn test_active_path_prefers_preferred() {
        let peer = PeerInfo {
            address: "a1b2c3d4e5".to_string(),
            latency: 10,
            role: "LEAF".to_string(),
            version: None,
            paths: vec![
                path("192.168.1.4/9993", true, false),
                path("203.0.113.7/9993", true, true),
                path("198.51.100.1/9993", false, true),
            ],
        };
        assert_eq!(peer.active_path().unwrap().address, "203.0.113.7/9993");
    }

    #[test]
    fn test_active_path_none_when_all_inactive() {
        let peer = PeerInfo {
            address: "a1b2c3d4e5".to_string(),
            latency: -1,
            role: "LEAF".to_string(),
            version: None,
            paths: vec![path("192.168.1.4/9993", false, false)],
        };
        assert!(peer.active_path().is_none());
    }

    #[test]
    fn test_deauthorize_payload() {
        let body = serde_json::to_value(MemberUpdate::deauthorize()).unwrap();
        assert_eq!(body, serde_json::json!({ "authorized": false }));
        let empty = serde_json::to_value(MemberUpdate::default()).unwrap();
        assert_eq!(empty, serde_json::json!({}));
    }
}
