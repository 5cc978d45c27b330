//! Zone-level changes: replication factor and zone type.

use reef_topology::TopologyCandidate;
use reef_types::{ZoneId, ZoneType};
use tracing::info;

use crate::error::PlannerError;
use crate::layout::{commit, rebalance_in_place};
use crate::placement::Pool;

type Result<T> = std::result::Result<T, PlannerError>;

/// Majority of `n` electable replicas.
pub fn quorum(n: u32) -> u32 {
    n / 2 + 1
}

/// Reject a drop of the total primary replication factor from `old` to
/// `new` that leaves no electable replica or removes a quorum's worth.
pub fn check_primary_reduction(old: u32, new: u32) -> Result<()> {
    if new >= old {
        return Ok(());
    }
    if new < 1 || old - new >= quorum(old) {
        return Err(PlannerError::PrimaryQuorumReduction { old, new });
    }
    Ok(())
}

/// Change a zone's replication factor and rebalance that zone.
///
/// A primary zone's factor can only grow; lowering it directly is rejected
/// with an error naming the zone and both factors.
pub fn change_repfactor(
    cand: &mut TopologyCandidate,
    pool: &Pool,
    zone: ZoneId,
    repfactor: u32,
) -> Result<()> {
    let current = cand.topology.zone(zone)?;
    let old = current.repfactor;
    if current.is_primary() && repfactor < old {
        return Err(PlannerError::RepFactorReduction {
            zone: current.name.clone(),
            old,
            new: repfactor,
        });
    }
    if repfactor == old {
        cand.note(format!("{zone} already has replication factor {old}"));
        return Ok(());
    }
    let mut work = cand.topology.clone();
    let mut notes = vec![format!(
        "changed replication factor of {zone} from {old} to {repfactor}"
    )];
    work.zone_mut(zone)?.repfactor = repfactor;
    rebalance_in_place(&mut work, pool, Some(zone), &mut notes)?;
    info!(candidate = %cand.name, %zone, old, new = repfactor, "changed replication factor");
    commit(cand, work, notes);
    Ok(())
}

/// Convert a zone between primary and secondary and rebalance.
///
/// Primary to secondary clears the arbiter and master-affinity flags;
/// secondary to primary with replication factor zero enables arbiters.
pub fn change_zone_type(
    cand: &mut TopologyCandidate,
    pool: &Pool,
    zone: ZoneId,
    zone_type: ZoneType,
) -> Result<()> {
    let current = cand.topology.zone(zone)?;
    if current.zone_type == zone_type {
        cand.note(format!("{zone} is already {zone_type}"));
        return Ok(());
    }
    if current.is_primary() {
        let old = cand.topology.primary_repfactor();
        check_primary_reduction(old, old - current.repfactor)?;
    }

    let mut work = cand.topology.clone();
    let z = work.zone_mut(zone)?;
    z.zone_type = zone_type;
    match zone_type {
        ZoneType::Secondary => {
            z.allow_arbiters = false;
            z.master_affinity = false;
        }
        ZoneType::Primary => {
            if z.repfactor == 0 {
                z.allow_arbiters = true;
            }
        }
    }
    let mut notes = vec![format!("changed {zone} to {zone_type}")];
    rebalance_in_place(&mut work, pool, None, &mut notes)?;
    info!(candidate = %cand.name, %zone, %zone_type, "changed zone type");
    commit(cand, work, notes);
    Ok(())
}
