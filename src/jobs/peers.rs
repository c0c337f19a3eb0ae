/// Peer reconciliation
///
/// Pulls live member state from the controller for networks belonging to
/// users who are currently away from the dashboard, and merges it into the
/// store. Online users refresh their own networks interactively, so they are
/// skipped here.
use crate::{
    controller::ControllerClient,
    error::WardenResult,
    jobs::sync::sync_member_peers_and_status,
    store::MembershipStore,
};
use chrono::{DateTime, Duration, Utc};
use std::collections::HashSet;

/// Result of one reconciliation run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileOutcome {
    pub users_considered: u64,
    pub networks_synced: u64,
    /// Controller did not know the network or returned no member data
    pub networks_skipped: u64,
    pub networks_failed: u64,
    /// Already handled earlier in this run through another owner
    pub networks_deduplicated: u64,
    pub members_written: u64,
}

/// Run one reconciliation pass as of `now`.
///
/// Users are idle once `last_seen` is older than `inactivity`; users that
/// were never seen are skipped.
pub async fn reconcile_peers(
    store: &dyn MembershipStore,
    controller: &dyn ControllerClient,
    now: DateTime<Utc>,
    inactivity: Duration,
) -> WardenResult<ReconcileOutcome> {
    let users = store.find_active_users().await?;
    let mut outcome = ReconcileOutcome::default();

    if users.is_empty() {
        return Ok(outcome);
    }

    let idle: Vec<_> = users
        .into_iter()
        .filter(|user| user.is_idle(now, inactivity))
        .collect();

    // Scoped to this run only
    let mut processed: HashSet<String> = HashSet::new();

    for user in idle {
        outcome.users_considered += 1;

        let mut networks = store.networks_owned_by(&user.id).await?;
        networks.extend(store.organization_networks(&user.id).await?);

        if networks.is_empty() {
            continue;
        }

        for network in networks {
            if !processed.insert(network.nwid.clone()) {
                outcome.networks_deduplicated += 1;
                continue;
            }

            let info = match controller.get_network_info(&user.id, &network.nwid, false).await {
                Ok(info) => info,
                Err(e) => {
                    outcome.networks_failed += 1;
                    tracing::warn!("Failed to fetch network {} for user {}: {}", network.nwid, user.id, e);
                    continue;
                }
            };

            let Some(members) = info.and_then(|info| info.members) else {
                outcome.networks_skipped += 1;
                tracing::debug!("No member data for network {}", network.nwid);
                continue;
            };

            match sync_member_peers_and_status(store, &user.id, &network.nwid, &members).await {
                Ok(synced) => {
                    outcome.networks_synced += 1;
                    outcome.members_written += synced.written;
                }
                Err(e) => {
                    outcome.networks_failed += 1;
                    tracing::warn!("Failed to store members of network {}: {}", network.nwid, e);
                }
            }
        }
    }

    Ok(outcome)
}

/// Run a reconciliation pass, logging instead of propagating any failure.
///
/// The next scheduled tick starts over regardless of how far this one got.
pub async fn run_guarded(
    store: &dyn MembershipStore,
    controller: &dyn ControllerClient,
    now: DateTime<Utc>,
    inactivity: Duration,
) -> Option<ReconcileOutcome> {
    match reconcile_peers(store, controller, now, inactivity).await {
        Ok(outcome) => Some(outcome),
        Err(e) => {
            tracing::error!("Peer reconciliation run aborted: {}", e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        db,
        store::SqliteMembershipStore,
        testing::{insert_membership, insert_network, insert_user, FakeController},
    };

    fn window() -> Duration {
        Duration::minutes(5)
    }

    #[tokio::test]
    async fn test_shared_network_fetched_once() {
        let pool = db::memory_pool().await.unwrap();
        let now = Utc::now();
        insert_user(&pool, "u1", "USER", None, Some(now - Duration::minutes(10))).await;
        insert_membership(&pool, "u1", "org1").await;
        insert_network(&pool, "n1", Some("u1"), None).await;
        insert_network(&pool, "n2", None, Some("org1")).await;
        // Shared by a second idle member of the same organization
        insert_user(&pool, "u2", "USER", None, Some(now - Duration::hours(1))).await;
        insert_membership(&pool, "u2", "org1").await;
        let store = SqliteMembershipStore::new(pool.clone());

        let controller = FakeController::new()
            .with_member("n1", "m1", true)
            .with_member("n2", "m2", true);

        let outcome = reconcile_peers(&store, &controller, now, window()).await.unwrap();

        assert_eq!(controller.fetches("n1"), 1);
        assert_eq!(controller.fetches("n2"), 1);
        assert_eq!(outcome.networks_synced, 2);
        assert_eq!(outcome.networks_deduplicated, 1);
        assert_eq!(outcome.members_written, 2);
        assert!(store.get_member("n2", "m2").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_recent_and_unseen_users_are_skipped() {
        let pool = db::memory_pool().await.unwrap();
        let now = Utc::now();
        insert_user(&pool, "online", "USER", None, Some(now - Duration::minutes(2))).await;
        insert_user(&pool, "never", "USER", None, None).await;
        insert_network(&pool, "n1", Some("online"), None).await;
        insert_network(&pool, "n2", Some("never"), None).await;
        let store = SqliteMembershipStore::new(pool.clone());
        let controller = FakeController::new()
            .with_member("n1", "m1", true)
            .with_member("n2", "m2", true);

        let outcome = reconcile_peers(&store, &controller, now, window()).await.unwrap();

        assert_eq!(outcome, ReconcileOutcome::default());
        assert!(controller.calls().is_empty());
    }

    #[tokio::test]
    async fn test_missing_members_and_failures_do_not_stop_the_run() {
        let pool = db::memory_pool().await.unwrap();
        let now = Utc::now();
        insert_user(&pool, "u1", "USER", None, Some(now - Duration::minutes(30))).await;
        insert_network(&pool, "n3", Some("u1"), None).await;
        insert_network(&pool, "down", Some("u1"), None).await;
        insert_network(&pool, "gone", Some("u1"), None).await;
        insert_network(&pool, "n4", Some("u1"), None).await;
        let store = SqliteMembershipStore::new(pool.clone());

        let controller = FakeController::new()
            .without_members("n3")
            .with_member("down", "m0", true)
            .failing("down")
            .with_member("n4", "m4", false);

        let outcome = reconcile_peers(&store, &controller, now, window()).await.unwrap();

        assert_eq!(outcome.networks_skipped, 2);
        assert_eq!(outcome.networks_failed, 1);
        assert_eq!(outcome.networks_synced, 1);
        assert!(store.get_member("n4", "m4").await.unwrap().is_some());
        assert!(store.get_member("down", "m0").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_user_without_networks_does_not_end_run() {
        let pool = db::memory_pool().await.unwrap();
        let now = Utc::now();
        insert_user(&pool, "empty", "USER", None, Some(now - Duration::minutes(30))).await;
        insert_user(&pool, "u2", "USER", None, Some(now - Duration::minutes(30))).await;
        insert_network(&pool, "n1", Some("u2"), None).await;
        let store = SqliteMembershipStore::new(pool.clone());
        let controller = FakeController::new().with_member("n1", "m1", true);

        let outcome = reconcile_peers(&store, &controller, now, window()).await.unwrap();

        assert_eq!(outcome.users_considered, 2);
        assert_eq!(outcome.networks_synced, 1);
    }

    #[tokio::test]
    async fn test_guard_swallows_storage_errors() {
        let pool = db::memory_pool().await.unwrap();
        sqlx::query("DROP TABLE network_member").execute(&pool).await.unwrap();
        sqlx::query("DROP TABLE network").execute(&pool).await.unwrap();
        let now = Utc::now();
        insert_user(&pool, "u1", "USER", None, Some(now - Duration::minutes(30))).await;
        let store = SqliteMembershipStore::new(pool.clone());
        let controller = FakeController::new();

        assert!(reconcile_peers(&store, &controller, now, window()).await.is_err());
        assert!(run_guarded(&store, &controller, now, window()).await.is_none());
    }

    #[tokio::test]
    async fn test_unreadable_user_row_does_not_drop_the_run() {
        let pool = db::memory_pool().await.unwrap();
        let now = Utc::now();
        insert_user(&pool, "u1", "USER", None, Some(now - Duration::minutes(30))).await;
        insert_network(&pool, "n1", Some("u1"), None).await;
        sqlx::query("INSERT INTO user (id, role, last_seen) VALUES ('u2', 'USER', 'last tuesday')")
            .execute(&pool)
            .await
            .unwrap();
        let store = SqliteMembershipStore::new(pool.clone());
        let controller = FakeController::new().with_member("n1", "m1", true);

        let outcome = reconcile_peers(&store, &controller, now, window()).await.unwrap();

        assert_eq!(outcome.users_considered, 1);
        assert_eq!(outcome.networks_synced, 1);
        assert!(store.get_member("n1", "m1").await.unwrap().is_some());
    }
}
