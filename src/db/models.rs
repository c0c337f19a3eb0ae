/// Membership database models
use crate::error::{WardenError, WardenResult};
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

/// Dashboard user roles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    /// Administrative role, exempt from account expiration
    Admin,
    User,
    ReadOnly,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "ADMIN",
            Role::User => "USER",
            Role::ReadOnly => "READ_ONLY",
        }
    }

    pub fn from_str(s: &str) -> WardenResult<Self> {
        match s {
            "ADMIN" => Ok(Role::Admin),
            "USER" => Ok(Role::User),
            "READ_ONLY" => Ok(Role::ReadOnly),
            _ => Err(WardenError::Decode(format!("Invalid role: {}", s))),
        }
    }

    /// Only the exact administrative role is exempt; no hierarchy is implied
    pub fn is_expiration_exempt(&self) -> bool {
        matches!(self, Role::Admin)
    }
}

/// User projection used by the background jobs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    pub id: String,
    pub role: Role,
    pub is_active: bool,
    pub expires_at: Option<DateTime<Utc>>,
    pub last_seen: Option<DateTime<Utc>>,
}

impl UserRecord {
    /// Whether the user has been away for longer than `window` as of `now`.
    ///
    /// A user that has never been seen has no baseline and is not considered idle.
    pub fn is_idle(&self, now: DateTime<Utc>, window: chrono::Duration) -> bool {
        let cutoff = now - window;
        self.last_seen.map_or(false, |seen| seen < cutoff)
    }

    /// Whether the account has lapsed and should be deactivated
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.is_active
            && !self.role.is_expiration_exempt()
            && self.expires_at.map_or(false, |exp| exp < now)
    }
}

/// Network ownership record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkRecord {
    pub nwid: String,
    pub name: Option<String>,
    pub author_id: Option<String>,
    pub organization_id: Option<String>,
}

/// Peer connectivity as seen by the controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    Offline,
    Relayed,
    DirectLan,
    DirectWan,
}

impl ConnectionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionStatus::Offline => "offline",
            ConnectionStatus::Relayed => "relayed",
            ConnectionStatus::DirectLan => "direct_lan",
            ConnectionStatus::DirectWan => "direct_wan",
        }
    }

    pub fn from_str(s: &str) -> WardenResult<Self> {
        match s {
            "offline" => Ok(ConnectionStatus::Offline),
            "relayed" => Ok(ConnectionStatus::Relayed),
            "direct_lan" => Ok(ConnectionStatus::DirectLan),
            "direct_wan" => Ok(ConnectionStatus::DirectWan),
            _ => Err(WardenError::Decode(format!("Invalid connection status: {}", s))),
        }
    }

    pub fn is_online(&self) -> bool {
        !matches!(self, ConnectionStatus::Offline)
    }
}

/// Locally mirrored status of one member in one network
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberStatus {
    pub id: String,
    pub authorized: bool,
    pub ip_assignments: Vec<String>,
    pub physical_address: Option<String>,
    pub client_version: Option<String>,
    pub latency_ms: Option<i64>,
    pub conn_status: ConnectionStatus,
    pub last_seen: Option<DateTime<Utc>>,
}

/// Per-owner controller endpoint override
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerOverride {
    pub local_url: Option<String>,
    pub local_secret: Option<String>,
}

/// Parse a timestamp column.
///
/// Besides RFC 3339 this accepts what other writers of the dashboard database
/// produce: SQLite `datetime()` text (`YYYY-MM-DD HH:MM:SS`, taken as UTC) and
/// integer epoch milliseconds.
pub fn parse_timestamp(value: &str) -> WardenResult<DateTime<Utc>> {
    let value = value.trim();

    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Ok(dt.with_timezone(&Utc));
    }

    for format in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(value, format) {
            return Ok(naive.and_utc());
        }
    }

    if let Ok(millis) = value.parse::<i64>() {
        if let Some(dt) = DateTime::from_timestamp_millis(millis) {
            return Ok(dt);
        }
    }

    Err(WardenError::Decode(format!("Invalid timestamp {}", value)))
}

/// Format a timestamp for storage (UTC, fixed microsecond precision)
pub fn format_timestamp(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(chrono::SecondsFormat::Micros, true)
}

/// Parse a nullable RFC 3339 timestamp column
pub fn parse_optional_timestamp(value: Option<String>) -> WardenResult<Option<DateTime<Utc>>> {
    value.as_deref().map(parse_timestamp).transpose()
}
