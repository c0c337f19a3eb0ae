/// Membership Store
///
/// Local relational view of users, the networks they are responsible for and
/// the mirrored member state. The background jobs only ever see the store
/// through this trait.

pub mod sqlite;

pub use sqlite::SqliteMembershipStore;

use crate::{
    db::models::{ControllerOverride, MemberStatus, NetworkRecord, UserRecord},
    error::WardenResult,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

#[async_trait]
pub trait MembershipStore: Send + Sync {
    /// Active, non-administrative users whose `expires_at` is before `now`
    async fn find_expired_users(&self, now: DateTime<Utc>) -> WardenResult<Vec<UserRecord>>;

    /// All users with `is_active` set
    async fn find_active_users(&self) -> WardenResult<Vec<UserRecord>>;

    /// Networks the user authored directly
    async fn networks_owned_by(&self, user_id: &str) -> WardenResult<Vec<NetworkRecord>>;

    /// Networks owned by any organization the user belongs to
    async fn organization_networks(&self, user_id: &str) -> WardenResult<Vec<NetworkRecord>>;

    /// Flip `is_active` to false. Returns whether a row changed.
    async fn deactivate_user(&self, user_id: &str) -> WardenResult<bool>;

    /// Create or update the member row for `(nwid, status.id)`.
    ///
    /// Returns whether stored state changed.
    async fn upsert_member(&self, nwid: &str, status: &MemberStatus) -> WardenResult<bool>;

    async fn get_member(&self, nwid: &str, member_id: &str) -> WardenResult<Option<MemberStatus>>;

    /// Controller endpoint override configured for this owner, if any
    async fn controller_override(&self, user_id: &str) -> WardenResult<Option<ControllerOverride>>;
}
