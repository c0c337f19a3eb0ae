/// Membership merge routine
///
/// Converts the controller's member listing into stored member status.
/// Entries missing from the listing are left untouched.
use crate::{
    controller::ControllerMember,
    db::models::{ConnectionStatus, MemberStatus},
    error::WardenResult,
    store::MembershipStore,
};
use std::net::IpAddr;

/// Counts from merging one network snapshot
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncOutcome {
    pub written: u64,
    pub unchanged: u64,
}

/// Upsert every member of `members` into the store for `nwid`
pub async fn sync_member_peers_and_status(
    store: &dyn MembershipStore,
    user_id: &str,
    nwid: &str,
    members: &[ControllerMember],
) -> WardenResult<SyncOutcome> {
    let mut outcome = SyncOutcome::default();

    for member in members {
        let status = member_status(member);
        if store.upsert_member(nwid, &status).await? {
            outcome.written += 1;
        } else {
            outcome.unchanged += 1;
        }
    }

    tracing::debug!(
        user = user_id,
        nwid,
        written = outcome.written,
        unchanged = outcome.unchanged,
        "Merged controller members"
    );

    Ok(outcome)
}

/// Derive the stored status of a member from the controller's view
pub fn member_status(member: &ControllerMember) -> MemberStatus {
    let conn_status = connection_status(member);

    let (physical_address, latency_ms, last_seen) = match &member.peer {
        Some(peer) => {
            let path = peer.active_path();
            (
                path.map(|p| p.address.clone()),
                (conn_status.is_online() && peer.latency >= 0).then_some(peer.latency),
                // Receive times of an unreachable peer are stale
                if conn_status.is_online() { peer.last_receive() } else { None },
            )
        }
        None => (member.physical_address.clone(), None, member.last_online),
    };

    MemberStatus {
        id: member.id.clone(),
        authorized: member.authorized,
        ip_assignments: member.ip_assignments.clone(),
        physical_address,
        client_version: member.client_version.clone(),
        latency_ms,
        conn_status,
        last_seen,
    }
}

/// Classify how the controller host reaches the member
pub fn connection_status(member: &ControllerMember) -> ConnectionStatus {
    match &member.peer {
        Some(peer) => {
            if peer.latency < 0 || peer.role.eq_ignore_ascii_case("PLANET") {
                return if peer.paths.is_empty() {
                    ConnectionStatus::Offline
                } else {
                    ConnectionStatus::Relayed
                };
            }

            match peer.active_path() {
                None if peer.paths.is_empty() => ConnectionStatus::Offline,
                None => ConnectionStatus::Relayed,
                Some(path) if is_private_address(&path.address) => ConnectionStatus::DirectLan,
                Some(_) => ConnectionStatus::DirectWan,
            }
        }
        // Central reports only the last physical address
        None => match member.physical_address.as_deref() {
            Some(addr) if is_private_address(addr) => ConnectionStatus::DirectLan,
            Some(_) => ConnectionStatus::DirectWan,
            None => ConnectionStatus::Offline,
        },
    }
}

/// Whether a ZeroTier path address ("ip/port") is on a local network
pub fn is_private_address(path: &str) -> bool {
    let host = path.rsplit_once('/').map_or(path, |(ip, _)| ip);

    match host.parse::<IpAddr>() {
        Ok(IpAddr::V4(ip)) => ip.is_private() || ip.is_loopback() || ip.is_link_local(),
        Ok(IpAddr::V6(ip)) => {
            let first = ip.segments()[0];
            ip.is_loopback() || (first & 0xfe00) == 0xfc00 || (first & 0xffc0) == 0xfe80
        }
        Err(_) => false,
    }
}
