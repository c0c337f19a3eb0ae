/// In-process controller double and store seeding for tests
use crate::{
    config::{ControllerConfig, DatabaseConfig, JobsConfig, LoggingConfig, MetricsConfig, ServerConfig},
    controller::{ControllerClient, ControllerMember, MemberIndex, MemberUpdate, NetworkDescriptor, NetworkInfo},
    db::models::format_timestamp,
    error::{WardenError, WardenResult},
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use std::collections::{BTreeMap, HashSet};
use std::sync::Mutex;

/// Controller call as observed by the fake
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    ListMembers(String),
    UpdateMember(String, String, MemberUpdate),
    GetNetworkInfo(String),
}

/// Controller with in-memory networks and a call log
#[derive(Default)]
pub struct FakeController {
    networks: Mutex<BTreeMap<String, BTreeMap<String, ControllerMember>>>,
    /// Networks that answer without a member listing
    memberless: Mutex<HashSet<String>>,
    /// Networks whose every call fails
    failing: Mutex<HashSet<String>>,
    calls: Mutex<Vec<Call>>,
}

impl FakeController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_member(self, nwid: &str, member_id: &str, authorized: bool) -> Self {
        self.networks
            .lock()
            .unwrap()
            .entry(nwid.to_string())
            .or_default()
            .insert(member_id.to_string(), member(nwid, member_id, authorized));
        self
    }

    pub fn with_network(self, nwid: &str) -> Self {
        self.networks.lock().unwrap().entry(nwid.to_string()).or_default();
        self
    }

    pub fn without_members(self, nwid: &str) -> Self {
        self.memberless.lock().unwrap().insert(nwid.to_string());
        self.with_network(nwid)
    }

    pub fn failing(self, nwid: &str) -> Self {
        self.failing.lock().unwrap().insert(nwid.to_string());
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn fetches(&self, nwid: &str) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, Call::GetNetworkInfo(n) if n == nwid))
            .count()
    }

    pub fn is_authorized(&self, nwid: &str, member_id: &str) -> Option<bool> {
        self.networks
            .lock()
            .unwrap()
            .get(nwid)
            .and_then(|members| members.get(member_id))
            .map(|m| m.authorized)
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }

    fn check(&self, nwid: &str) -> WardenResult<()> {
        if self.failing.lock().unwrap().contains(nwid) {
            return Err(WardenError::Controller(format!("{} unreachable", nwid)));
        }
        Ok(())
    }
}

pub fn member(nwid: &str, member_id: &str, authorized: bool) -> ControllerMember {
    ControllerMember {
        id: member_id.to_string(),
        nwid: nwid.to_string(),
        authorized,
        ip_assignments: vec![],
        revision: 1,
        client_version: None,
        peer: None,
        last_online: None,
        physical_address: None,
    }
}

#[async_trait]
impl ControllerClient for FakeController {
    async fn list_members(&self, _owner_id: &str, nwid: &str, _remote: bool) -> WardenResult<MemberIndex> {
        self.record(Call::ListMembers(nwid.to_string()));
        self.check(nwid)?;

        Ok(self
            .networks
            .lock()
            .unwrap()
            .get(nwid)
            .map(|members| members.values().map(|m| (m.id.clone(), m.revision)).collect())
            .unwrap_or_default())
    }

    async fn update_member(
        &self,
        _owner_id: &str,
        nwid: &str,
        member_id: &str,
        params: &MemberUpdate,
        _remote: bool,
    ) -> WardenResult<ControllerMember> {
        self.record(Call::UpdateMember(nwid.to_string(), member_id.to_string(), params.clone()));
        self.check(nwid)?;

        let mut networks = self.networks.lock().unwrap();
        let member = networks
            .get_mut(nwid)
            .and_then(|members| members.get_mut(member_id))
            .ok_or_else(|| WardenError::ControllerStatus {
                status: 404,
                url: format!("/controller/network/{}/member/{}", nwid, member_id),
            })?;

        if let Some(authorized) = params.authorized {
            member.authorized = authorized;
            member.revision += 1;
        }

        Ok(member.clone())
    }

    async fn get_network_info(&self, _owner_id: &str, nwid: &str, _remote: bool) -> WardenResult<Option<NetworkInfo>> {
        self.record(Call::GetNetworkInfo(nwid.to_string()));
        self.check(nwid)?;

        let networks = self.networks.lock().unwrap();
        let Some(members) = networks.get(nwid) else {
            return Ok(None);
        };

        let members = if self.memberless.lock().unwrap().contains(nwid) {
            None
        } else {
            Some(members.values().cloned().collect())
        };

        Ok(Some(NetworkInfo {
            network: NetworkDescriptor {
                id: nwid.to_string(),
                name: None,
                private: true,
            },
            members,
        }))
    }
}

pub async fn insert_user(
    pool: &SqlitePool,
    id: &str,
    role: &str,
    expires_at: Option<DateTime<Utc>>,
    last_seen: Option<DateTime<Utc>>,
) {
    sqlx::query("INSERT INTO user (id, role, is_active, expires_at, last_seen) VALUES (?1, ?2, 1, ?3, ?4)")
        .bind(id)
        .bind(role)
        .bind(expires_at.map(format_timestamp))
        .bind(last_seen.map(format_timestamp))
        .execute(pool)
        .await
        .unwrap();
}

pub async fn insert_network(pool: &SqlitePool, nwid: &str, author: Option<&str>, organization: Option<&str>) {
    sqlx::query("INSERT INTO network (nwid, author_id, organization_id) VALUES (?1, ?2, ?3)")
        .bind(nwid)
        .bind(author)
        .bind(organization)
        .execute(pool)
        .await
        .unwrap();
}

pub async fn insert_membership(pool: &SqlitePool, user_id: &str, organization_id: &str) {
    sqlx::query("INSERT OR IGNORE INTO organization (id, name) VALUES (?1, ?1)")
        .bind(organization_id)
        .execute(pool)
        .await
        .unwrap();
    sqlx::query("INSERT INTO user_organization (user_id, organization_id) VALUES (?1, ?2)")
        .bind(user_id)
        .bind(organization_id)
        .execute(pool)
        .await
        .unwrap();
}

pub async fn is_active(pool: &SqlitePool, user_id: &str) -> bool {
    let (active,): (bool,) = sqlx::query_as("SELECT is_active FROM user WHERE id = ?1")
        .bind(user_id)
        .fetch_one(pool)
        .await
        .unwrap();
    active
}

/// Valid configuration with a long peer interval so only the first tick fires
pub fn config() -> ServerConfig {
    ServerConfig {
        database: DatabaseConfig {
            path: ":memory:".into(),
            max_connections: 1,
        },
        controller: ControllerConfig {
            local_url: "http://127.0.0.1:9993".to_string(),
            local_secret: "secret".to_string(),
            central_url: "https://api.zerotier.com/api/v1".to_string(),
            central_token: None,
            timeout_secs: 1,
            user_agent: "netwarden/test".to_string(),
        },
        jobs: JobsConfig {
            peer_sync_interval_secs: 3600,
            ..JobsConfig::default()
        },
        logging: LoggingConfig {
            level: "netwarden=debug".to_string(),
            json: false,
        },
        metrics: MetricsConfig { addr: None },
    }
}
