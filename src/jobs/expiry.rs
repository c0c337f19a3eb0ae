/// Expiration enforcement
///
/// Revokes controller authorization for every member of every network owned
/// by a user whose account has lapsed, then deactivates the user. A user is
/// only deactivated once all of its networks were revoked, so a user whose
/// revocation failed part way keeps matching the selection and is retried on
/// the next run.
use crate::{
    controller::{ControllerClient, MemberUpdate},
    db::models::UserRecord,
    error::{WardenError, WardenResult},
    store::MembershipStore,
};
use chrono::{DateTime, Utc};

/// Result of one enforcement run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExpiryOutcome {
    pub users_expired: u64,
    pub users_deactivated: u64,
    /// Users left active because a network or storage call failed
    pub users_failed: u64,
    pub members_deauthorized: u64,
    pub networks_failed: u64,
}

/// Run one expiration pass as of `now`
pub async fn enforce_expirations(
    store: &dyn MembershipStore,
    controller: &dyn ControllerClient,
    now: DateTime<Utc>,
) -> WardenResult<ExpiryOutcome> {
    let users = store.find_expired_users(now).await?;
    let mut outcome = ExpiryOutcome::default();

    if users.is_empty() {
        return Ok(outcome);
    }

    for user in users {
        // Administrators are exempt even if the selection returned them
        if user.role.is_expiration_exempt() {
            continue;
        }
        outcome.users_expired += 1;

        match expire_user(store, controller, &user, &mut outcome).await {
            Ok(true) => {
                outcome.users_deactivated += 1;
                tracing::info!("Deactivated expired user {}", user.id);
            }
            Ok(false) => {
                outcome.users_failed += 1;
                tracing::warn!(
                    "User {} kept active, revocation incomplete; will retry next run",
                    user.id
                );
            }
            Err(e) => {
                outcome.users_failed += 1;
                tracing::warn!("Failed to expire user {}: {}", user.id, e);
            }
        }
    }

    Ok(outcome)
}

/// Revoke all of a user's networks. Returns whether the user was deactivated.
async fn expire_user(
    store: &dyn MembershipStore,
    controller: &dyn ControllerClient,
    user: &UserRecord,
    outcome: &mut ExpiryOutcome,
) -> WardenResult<bool> {
    let networks = store.networks_owned_by(&user.id).await?;
    let mut complete = true;

    for network in &networks {
        match deauthorize_network(controller, &user.id, &network.nwid).await {
            Ok(count) => outcome.members_deauthorized += count,
            Err((count, e)) => {
                outcome.members_deauthorized += count;
                outcome.networks_failed += 1;
                complete = false;
                tracing::warn!(
                    "Failed to revoke members of network {} for user {}: {}",
                    network.nwid,
                    user.id,
                    e
                );
            }
        }
    }

    if !complete {
        return Ok(false);
    }

    store.deactivate_user(&user.id).await?;
    Ok(true)
}

/// Deauthorize every member of one network.
///
/// Stops at the first controller error; the error carries how many members
/// had already been revoked.
async fn deauthorize_network(
    controller: &dyn ControllerClient,
    owner_id: &str,
    nwid: &str,
) -> Result<u64, (u64, WardenError)> {
    let members = controller
        .list_members(owner_id, nwid, false)
        .await
        .map_err(|e| (0, e))?;

    let update = MemberUpdate::deauthorize();
    let mut revoked = 0;

    for member_id in members.keys() {
        controller
            .update_member(owner_id, nwid, member_id, &update, false)
            .await
            .map_err(|e| (revoked, e))?;
        revoked += 1;
    }

    Ok(revoked)
}
