/// JSON shapes of the local controller and ZeroTier Central APIs
use crate::controller::{ControllerMember, NetworkDescriptor, PeerInfo, PeerPath};
use chrono::{DateTime, Utc};
use serde::Deserialize;

/// Millisecond epoch timestamps; zero means "never"
fn millis(value: Option<i64>) -> Option<DateTime<Utc>> {
    value.filter(|ms| *ms > 0).and_then(DateTime::from_timestamp_millis)
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.trim().is_empty())
}

/// `GET /controller/network/{nwid}` on the local service
#[derive(Debug, Deserialize)]
pub struct LocalNetwork {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub private: bool,
}

impl From<LocalNetwork> for NetworkDescriptor {
    fn from(n: LocalNetwork) -> Self {
        NetworkDescriptor {
            id: n.id,
            name: non_empty(n.name),
            private: n.private,
        }
    }
}

/// `GET /controller/network/{nwid}/member/{id}` on the local service
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalMember {
    pub id: String,
    pub nwid: String,
    #[serde(default)]
    pub authorized: bool,
    #[serde(default)]
    pub ip_assignments: Vec<String>,
    #[serde(default)]
    pub revision: u64,
    #[serde(default = "unknown_version", rename = "vMajor")]
    pub v_major: i64,
    #[serde(default = "unknown_version", rename = "vMinor")]
    pub v_minor: i64,
    #[serde(default = "unknown_version", rename = "vRev")]
    pub v_rev: i64,
}

fn unknown_version() -> i64 {
    -1
}

impl LocalMember {
    pub fn into_member(self, peer: Option<PeerInfo>) -> ControllerMember {
        let client_version = if self.v_major >= 0 {
            Some(format!("{}.{}.{}", self.v_major, self.v_minor.max(0), self.v_rev.max(0)))
        } else {
            peer.as_ref().and_then(|p| p.version.clone())
        };

        ControllerMember {
            id: self.id,
            nwid: self.nwid,
            authorized: self.authorized,
            ip_assignments: self.ip_assignments,
            revision: self.revision,
            client_version,
            peer,
            last_online: None,
            physical_address: None,
        }
    }
}

/// `GET /peer/{id}` on the local service
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalPeer {
    pub address: String,
    #[serde(default = "unknown_version")]
    pub latency: i64,
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub paths: Vec<LocalPath>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalPath {
    pub address: String,
    #[serde(default)]
    pub active: bool,
    #[serde(default)]
    pub expired: bool,
    #[serde(default)]
    pub preferred: bool,
    #[serde(default)]
    pub last_receive: Option<i64>,
}

impl From<LocalPeer> for PeerInfo {
    fn from(p: LocalPeer) -> Self {
        PeerInfo {
            address: p.address,
            latency: p.latency,
            role: p.role,
            version: non_empty(p.version).filter(|v| v != "-1.-1.-1"),
            paths: p
                .paths
                .into_iter()
                .map(|path| PeerPath {
                    address: path.address,
                    active: path.active,
                    expired: path.expired,
                    preferred: path.preferred,
                    last_receive: millis(path.last_receive),
                })
                .collect(),
        }
    }
}

/// `GET /network/{nwid}` on Central
#[derive(Debug, Deserialize)]
pub struct CentralNetwork {
    pub id: String,
    #[serde(default)]
    pub config: CentralNetworkConfig,
}

#[derive(Debug, Default, Deserialize)]
pub struct CentralNetworkConfig {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub private: bool,
}

impl From<CentralNetwork> for NetworkDescriptor {
    fn from(n: CentralNetwork) -> Self {
        NetworkDescriptor {
            id: n.id,
            name: non_empty(n.config.name),
            private: n.config.private,
        }
    }
}

/// Element of `GET /network/{nwid}/member` on Central
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CentralMember {
    pub node_id: String,
    pub network_id: String,
    #[serde(default)]
    pub last_online: Option<i64>,
    #[serde(default)]
    pub physical_address: Option<String>,
    #[serde(default)]
    pub client_version: Option<String>,
    #[serde(default)]
    pub config: CentralMemberConfig,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CentralMemberConfig {
    #[serde(default)]
    pub authorized: bool,
    #[serde(default)]
    pub ip_assignments: Vec<String>,
    #[serde(default)]
    pub revision: u64,
}

impl From<CentralMember> for ControllerMember {
    fn from(m: CentralMember) -> Self {
        ControllerMember {
            id: m.node_id,
            nwid: m.network_id,
            authorized: m.config.authorized,
            ip_assignments: m.config.ip_assignments,
            revision: m.config.revision,
            client_version: non_empty(m.client_version),
            peer: None,
            last_online: millis(m.last_online),
            physical_address: non_empty(m.physical_address),
        }
    }
}
