/// SQLite-backed membership store
use crate::{
    db::models::{
        format_timestamp, parse_optional_timestamp, ConnectionStatus, ControllerOverride,
        MemberStatus, NetworkRecord, Role, UserRecord,
    },
    error::WardenResult,
    store::MembershipStore,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqliteRow, Row, SqlitePool};

/// Membership store over the shared SQLite pool
#[derive(Clone)]
pub struct SqliteMembershipStore {
    db: SqlitePool,
}

impl SqliteMembershipStore {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    fn decode_user(row: &SqliteRow) -> WardenResult<UserRecord> {
        let role: String = row.try_get("role")?;

        Ok(UserRecord {
            id: row.try_get("id")?,
            role: Role::from_str(&role)?,
            is_active: row.try_get("is_active")?,
            expires_at: parse_optional_timestamp(row.try_get("expires_at")?)?,
            last_seen: parse_optional_timestamp(row.try_get("last_seen")?)?,
        })
    }

    /// Decode user rows, skipping any that do not decode
    fn decode_users(rows: &[SqliteRow]) -> Vec<UserRecord> {
        rows.iter()
            .filter_map(|row| match Self::decode_user(row) {
                Ok(user) => Some(user),
                Err(e) => {
                    let id: String = row.try_get("id").unwrap_or_default();
                    tracing::warn!("Skipping malformed user row {}: {}", id, e);
                    None
                }
            })
            .collect()
    }

    fn decode_network(row: &SqliteRow) -> WardenResult<NetworkRecord> {
        Ok(NetworkRecord {
            nwid: row.try_get("nwid")?,
            name: row.try_get("name")?,
            author_id: row.try_get("author_id")?,
            organization_id: row.try_get("organization_id")?,
        })
    }

    fn decode_member(row: &SqliteRow) -> WardenResult<MemberStatus> {
        let ip_assignments: String = row.try_get("ip_assignments")?;
        let conn_status: String = row.try_get("conn_status")?;

        Ok(MemberStatus {
            id: row.try_get("id")?,
            authorized: row.try_get("authorized")?,
            ip_assignments: serde_json::from_str(&ip_assignments)?,
            physical_address: row.try_get("physical_address")?,
            client_version: row.try_get("client_version")?,
            latency_ms: row.try_get("latency_ms")?,
            conn_status: ConnectionStatus::from_str(&conn_status)?,
            last_seen: parse_optional_timestamp(row.try_get("last_seen")?)?,
        })
    }
}

#[async_trait]
impl MembershipStore for SqliteMembershipStore {
    async fn find_expired_users(&self, now: DateTime<Utc>) -> WardenResult<Vec<UserRecord>> {
        // Timestamps written by other components may not share our format, so
        // the expiry comparison itself happens after decoding.
        let rows = sqlx::query(
            r#"
            SELECT id, role, is_active,
                   CAST(expires_at AS TEXT) AS expires_at,
                   CAST(last_seen AS TEXT) AS last_seen
            FROM user
            WHERE is_active = 1
              AND role != ?1
              AND expires_at IS NOT NULL
            ORDER BY rowid
            "#,
        )
        .bind(Role::Admin.as_str())
        .fetch_all(&self.db)
        .await?;

        Ok(Self::decode_users(&rows)
            .into_iter()
            .filter(|user| user.is_expired(now))
            .collect())
    }

    async fn find_active_users(&self) -> WardenResult<Vec<UserRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT id, role, is_active,
                   CAST(expires_at AS TEXT) AS expires_at,
                   CAST(last_seen AS TEXT) AS last_seen
            FROM user
            WHERE is_active = 1
            ORDER BY rowid
            "#,
        )
        .fetch_all(&self.db)
        .await?;

        Ok(Self::decode_users(&rows))
    }

    async fn networks_owned_by(&self, user_id: &str) -> WardenResult<Vec<NetworkRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT nwid, name, author_id, organization_id
            FROM network
            WHERE author_id = ?1
            ORDER BY rowid
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.db)
        .await?;

        rows.iter().map(Self::decode_network).collect()
    }

    async fn organization_networks(&self, user_id: &str) -> WardenResult<Vec<NetworkRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT n.nwid, n.name, n.author_id, n.organization_id
            FROM network n
            JOIN user_organization uo ON uo.organization_id = n.organization_id
            WHERE uo.user_id = ?1
            ORDER BY uo.organization_id, n.rowid
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.db)
        .await?;

        rows.iter().map(Self::decode_network).collect()
    }

    async fn deactivate_user(&self, user_id: &str) -> WardenResult<bool> {
        let result = sqlx::query("UPDATE user SET is_active = 0 WHERE id = ?1 AND is_active = 1")
            .bind(user_id)
            .execute(&self.db)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn upsert_member(&self, nwid: &str, status: &MemberStatus) -> WardenResult<bool> {
        // One statement, so no read-then-write lock upgrade. The WHERE clause
        // turns an unchanged snapshot into a no-op; last_seen only moves forward.
        let result = sqlx::query(
            r#"
            INSERT INTO network_member
            (id, nwid, authorized, ip_assignments, physical_address, client_version,
             latency_ms, conn_status, last_seen, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            ON CONFLICT(id, nwid) DO UPDATE SET
                authorized = excluded.authorized,
                ip_assignments = excluded.ip_assignments,
                physical_address = excluded.physical_address,
                client_version = excluded.client_version,
                latency_ms = excluded.latency_ms,
                conn_status = excluded.conn_status,
                last_seen = MAX(
                    COALESCE(network_member.last_seen, excluded.last_seen),
                    COALESCE(excluded.last_seen, network_member.last_seen)
                ),
                updated_at = excluded.updated_at
            WHERE network_member.authorized IS NOT excluded.authorized
               OR network_member.ip_assignments IS NOT excluded.ip_assignments
               OR network_member.physical_address IS NOT excluded.physical_address
               OR network_member.client_version IS NOT excluded.client_version
               OR network_member.latency_ms IS NOT excluded.latency_ms
               OR network_member.conn_status IS NOT excluded.conn_status
               OR (excluded.last_seen IS NOT NULL
                   AND (network_member.last_seen IS NULL
                        OR excluded.last_seen > network_member.last_seen))
            "#,
        )
        .bind(&status.id)
        .bind(nwid)
        .bind(status.authorized)
        .bind(serde_json::to_string(&status.ip_assignments)?)
        .bind(&status.physical_address)
        .bind(&status.client_version)
        .bind(status.latency_ms)
        .bind(status.conn_status.as_str())
        .bind(status.last_seen.map(format_timestamp))
        .bind(format_timestamp(Utc::now()))
        .execute(&self.db)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn get_member(&self, nwid: &str, member_id: &str) -> WardenResult<Option<MemberStatus>> {
        let row = sqlx::query(
            r#"
            SELECT id, authorized, ip_assignments, physical_address, client_version,
                   latency_ms, conn_status, last_seen
            FROM network_member
            WHERE nwid = ?1 AND id = ?2
            "#,
        )
        .bind(nwid)
        .bind(member_id)
        .fetch_optional(&self.db)
        .await?;

        row.as_ref().map(Self::decode_member).transpose()
    }

    async fn controller_override(&self, user_id: &str) -> WardenResult<Option<ControllerOverride>> {
        let row = sqlx::query(
            r#"
            SELECT local_controller_url, local_controller_secret
            FROM user_options
            WHERE user_id = ?1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.db)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let local_url: Option<String> = row.try_get("local_controller_url")?;
        let local_secret: Option<String> = row.try_get("local_controller_secret")?;

        // Empty strings are how the dashboard clears an override
        let local_url = local_url.filter(|s| !s.trim().is_empty());
        let local_secret = local_secret.filter(|s| !s.trim().is_empty());

        if local_url.is_none() && local_secret.is_none() {
            return Ok(None);
        }

        Ok(Some(ControllerOverride {
            local_url,
            local_secret,
        }))
    }
}
