//! Integration test: topology changes.
//!
//! Candidates built by the planner are previewed, deployed through plans
//! and end up as the live topology with every replica running.

use reef_admin::{AdminError, ZoneSpec};
use reef_planner::PlannerError;
use reef_tests::TestCluster;
use reef_topology::DEFAULT_POOL;
use reef_types::{ServiceId, ZoneType};

/// Adding storage nodes and redistributing creates new shards and moves
/// partitions to them.
#[tokio::test]
async fn test_grow_store_with_redistribute() {
    let c = TestCluster::new();
    let (zone, _) = c.deploy_store(1, 2, 1, 20).await;
    assert_eq!(c.admin.current_topology().rep_groups.len(), 2);
    c.deploy_sn(zone, 3, 1).await;
    c.deploy_sn(zone, 4, 1).await;

    c.admin.copy_current_topology("grow").unwrap();
    let cand = c.admin.redistribute_topology("grow", DEFAULT_POOL).unwrap();
    assert!(!cand.log.is_empty());
    let diff = c.admin.preview_topology("grow").unwrap();
    assert_eq!(diff.new_shards.len(), 2);
    assert_eq!(diff.added_rns.len(), 2);
    assert!(!diff.moved_partitions.is_empty());

    let id = c.admin.create_deploy_topology_plan("deploy grow", "grow").unwrap();
    c.run_ok(id).await;

    let topo = c.admin.current_topology();
    assert_eq!(topo.rep_groups.len(), 4);
    assert_eq!(topo.partition_count(), 20);
    let counts: Vec<usize> = topo
        .rep_groups
        .keys()
        .map(|g| topo.partitions_of(*g).len())
        .collect();
    let (min, max) = (
        *counts.iter().min().unwrap(),
        *counts.iter().max().unwrap(),
    );
    assert!(max - min <= 1, "uneven partitions: {counts:?}");
    assert_eq!(c.nodes.count_prefix("migrate "), diff.moved_partitions.len());
    for service in c.rep_node_services() {
        assert!(c.nodes.is_running(service));
    }

    // Deploying the same candidate again changes nothing.
    assert!(c.admin.preview_topology("grow").unwrap().is_empty());
    let err = c
        .admin
        .create_deploy_topology_plan("again", "grow")
        .unwrap_err();
    assert!(matches!(err, AdminError::InvalidRequest(_)), "{err}");
}

/// Raising a zone's replication factor adds replicas to every shard.
#[tokio::test]
async fn test_raise_repfactor() {
    let c = TestCluster::new();
    let (zone, _) = c.deploy_store(1, 1, 1, 10).await;
    c.deploy_sn(zone, 2, 1).await;
    c.deploy_sn(zone, 3, 1).await;

    c.admin.copy_current_topology("rf3").unwrap();
    c.admin.change_repfactor("rf3", DEFAULT_POOL, zone, 3).unwrap();
    let diff = c.admin.preview_topology("rf3").unwrap();
    assert_eq!(diff.added_rns.len(), 2);
    assert!(diff.moved_partitions.is_empty());
    assert_eq!(diff.changed_zones, vec![zone]);

    let id = c.admin.create_deploy_topology_plan("deploy rf3", "rf3").unwrap();
    c.run_ok(id).await;

    let topo = c.admin.current_topology();
    assert_eq!(topo.zone(zone).unwrap().repfactor, 3);
    let shard = *topo.rep_groups.keys().next().unwrap();
    let members = topo.group_members(shard);
    assert_eq!(members.len(), 3);
    for rn in members {
        assert!(c.nodes.is_running(ServiceId::RepNode(rn)));
    }

    // Primary zones never shrink directly.
    c.admin.copy_current_topology("rf1").unwrap();
    let err = c
        .admin
        .change_repfactor("rf1", DEFAULT_POOL, zone, 1)
        .unwrap_err();
    assert!(
        matches!(
            err,
            AdminError::Planner(PlannerError::RepFactorReduction { old: 3, new: 1, .. })
        ),
        "{err}"
    );
    assert_eq!(
        c.admin.get_topology_candidate("rf1").unwrap().topology,
        c.admin.current_topology()
    );
}

/// A secondary zone gets replicas of every shard after a rebalance.
#[tokio::test]
async fn test_add_secondary_zone() {
    let c = TestCluster::new();
    c.deploy_store(1, 2, 1, 8).await;
    let backup = c
        .deploy_zone_spec(ZoneSpec {
            name: "backup".to_string(),
            repfactor: 1,
            zone_type: ZoneType::Secondary,
            allow_arbiters: false,
            master_affinity: false,
        })
        .await;
    c.deploy_sn(backup, 10, 1).await;
    c.deploy_sn(backup, 11, 1).await;

    c.admin.copy_current_topology("replicas").unwrap();
    c.admin
        .rebalance_topology("replicas", DEFAULT_POOL, Some(backup))
        .unwrap();
    let diff = c.admin.preview_topology("replicas").unwrap();
    assert_eq!(diff.added_rns.len(), 2);
    assert!(diff.new_shards.is_empty());

    let id = c
        .admin
        .create_deploy_topology_plan("deploy replicas", "replicas")
        .unwrap();
    c.run_ok(id).await;

    let topo = c.admin.current_topology();
    for shard in topo.rep_groups.keys() {
        let remote = topo.group_members_in_zone(*shard, backup);
        assert_eq!(remote.len(), 1, "{shard} has no backup replica");
        assert!(c.nodes.is_running(ServiceId::RepNode(remote[0])));
    }
}

/// Contracting onto a pool moves replicas off the other nodes and drops
/// them.
#[tokio::test]
async fn test_contract_onto_pool() {
    let c = TestCluster::new();
    let zone = c.deploy_zone("east", 1).await;
    let old = c.deploy_sn(zone, 1, 1).await;
    let kept = c.deploy_sn(zone, 2, 1).await;
    c.deploy_candidate("initial", |admin| {
        admin.create_topology("initial", DEFAULT_POOL, 6)
    })
    .await;
    let big = c.deploy_sn(zone, 3, 2).await;
    let moving = c.admin.current_topology().rep_nodes_on(old);
    assert_eq!(moving.len(), 1);

    c.admin.create_pool("keep").unwrap();
    c.admin.add_to_pool("keep", kept).unwrap();
    c.admin.add_to_pool("keep", big).unwrap();
    assert_eq!(c.admin.get_pool("keep").unwrap().members.len(), 2);

    c.admin.copy_current_topology("shrink").unwrap();
    c.admin.contract_topology("shrink", "keep").unwrap();
    let diff = c.admin.preview_topology("shrink").unwrap();
    assert_eq!(diff.removed_storage_nodes, vec![old]);
    assert_eq!(diff.relocated_rns.len(), 1);
    assert_eq!(diff.relocated_rns[0].to.sn, big);

    let id = c
        .admin
        .create_deploy_topology_plan("deploy shrink", "shrink")
        .unwrap();
    c.run_ok(id).await;

    let topo = c.admin.current_topology();
    assert!(!topo.storage_nodes.contains_key(&old));
    assert_eq!(topo.rep_nodes_on(big), moving);
    assert_eq!(topo.partition_count(), 6);
    assert!(!c.nodes.is_registered(old));
    assert_eq!(c.nodes.count(&format!("unregister {old}")), 1);
    assert!(c.nodes.is_running(ServiceId::RepNode(moving[0])));
}

/// A single replica can be moved by hand.
#[tokio::test]
async fn test_move_rep_node() {
    let c = TestCluster::new();
    let (zone, sns) = c.deploy_store(1, 1, 1, 4).await;
    let spare = c.deploy_sn(zone, 2, 1).await;
    let rn = c.admin.current_topology().rep_nodes_on(sns[0])[0];

    c.admin.copy_current_topology("move").unwrap();
    c.admin
        .move_rn("move", DEFAULT_POOL, rn, Some(spare))
        .unwrap();
    let id = c.admin.create_deploy_topology_plan("deploy move", "move").unwrap();
    c.run_ok(id).await;

    let topo = c.admin.current_topology();
    assert_eq!(topo.rep_node(rn).unwrap().sn, spare);
    assert!(topo.rep_nodes_on(sns[0]).is_empty());
    assert_eq!(c.nodes.count(&format!("remove {rn}")), 1);
    assert!(c.nodes.is_running(ServiceId::RepNode(rn)));
    assert_eq!(c.nodes.count_prefix("migrate "), 0);
}

/// A failed node's services move to a spare; afterwards the failed node
/// can be dropped and the store verifies clean.
#[tokio::test]
async fn test_replace_failed_storage_node() {
    let c = TestCluster::new();
    let (zone, sns) = c.deploy_store(3, 3, 1, 9).await;
    let spare = c.deploy_sn(zone, 4, 1).await;
    let failed = sns[2];
    let moved = c.admin.current_topology().rep_nodes_on(failed);

    c.nodes.take_down(failed);
    let report = c.admin.verify_configuration().await;
    assert_eq!(report.of_kind("RpcFailed").count(), 1);

    let id = c
        .admin
        .create_migrate_sn_plan("replace", failed, spare)
        .await
        .unwrap();
    c.run_ok(id).await;
    assert_eq!(c.admin.current_topology().rep_nodes_on(spare), moved);

    let id = c.admin.create_remove_sn_plan("drop", failed).await.unwrap();
    c.run_ok(id).await;
    assert_eq!(c.nodes.count(&format!("unregister {failed}")), 0);

    let report = c.admin.verify_configuration().await;
    assert!(report.violations.is_empty(), "{:?}", report.violations);
}

/// Moving a partition by hand migrates exactly that partition.
#[tokio::test]
async fn test_move_partition() {
    let c = TestCluster::new();
    c.deploy_store(1, 2, 1, 4).await;
    let topo = c.admin.current_topology();
    let shards: Vec<_> = topo.rep_groups.keys().copied().collect();
    let partition = topo.partitions_of(shards[0])[0];

    c.admin.copy_current_topology("one").unwrap();
    c.admin.move_partition("one", partition, shards[1]).unwrap();
    let id = c.admin.create_deploy_topology_plan("deploy one", "one").unwrap();
    c.run_ok(id).await;

    let topo = c.admin.current_topology();
    assert!(topo.partitions_of(shards[1]).contains(&partition));
    assert_eq!(c.nodes.count_prefix("migrate "), 1);
    assert_eq!(
        c.nodes.count(&format!("migrate {partition} {} {}", shards[0], shards[1])),
        1
    );
}

/// A candidate copied before another change was committed cannot be
/// deployed over it.
#[tokio::test]
async fn test_out_of_date_candidate_is_refused() {
    let c = TestCluster::new();
    let (zone, _) = c.deploy_store(1, 3, 1, 6).await;
    c.admin.copy_current_topology("old").unwrap();

    let late = c.deploy_sn(zone, 4, 1).await;
    let err = c
        .admin
        .create_deploy_topology_plan("deploy old", "old")
        .unwrap_err();
    assert!(matches!(err, AdminError::InvalidRequest(_)), "{err}");

    let topo = c.admin.current_topology();
    assert_eq!(topo.storage_nodes.len(), 4);
    assert!(topo.storage_nodes.contains_key(&late));
    assert!(c.nodes.is_registered(late));
    assert_eq!(c.nodes.count(&format!("unregister {late}")), 0);
}
