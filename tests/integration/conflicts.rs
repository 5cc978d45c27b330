//! Integration test: lock conflicts between plans.
//!
//! Plans whose lock sets overlap a running plan's are refused with 5200;
//! plans touching disjoint resources run side by side.

use reef_admin::{AdminError, ZoneSpec};
use reef_plan::PlanError;
use reef_tests::{TestCluster, WAIT};
use reef_types::{PlanState, ResultCode, ServiceId};

/// A plan touching the same services as a running one is refused until
/// the running one finishes.
#[tokio::test]
async fn test_overlapping_services_conflict() {
    let c = TestCluster::new();
    c.deploy_store(3, 3, 1, 6).await;
    let services = c.rep_node_services();
    c.stop(&services).await;

    c.nodes.hold_starts();
    let running = c.start_in_background("start all", &services).await;
    c.nodes.wait_in_flight(services.len()).await;

    let blocked = c
        .admin
        .create_stop_services_plan("stop one", &services[..1])
        .unwrap();
    c.admin.approve_plan(blocked).await.unwrap();
    let err = c.admin.execute_plan(blocked, false).await.unwrap_err();
    assert_eq!(err.code(), Some(ResultCode::OperationConflict.code()));
    assert_eq!(err.code(), Some(5200));
    match err {
        AdminError::Plan(PlanError::Conflict { plan, blocking }) => {
            assert_eq!(plan, blocked);
            assert_eq!(blocking, running);
        }
        other => panic!("expected a conflict, got {other}"),
    }
    // The refused plan is untouched and can run later.
    assert_eq!(c.admin.get_plan(blocked).unwrap().state, PlanState::Approved);

    c.nodes.release();
    assert_eq!(c.admin.await_plan(running, WAIT).await.unwrap(), PlanState::Succeeded);

    c.admin.execute_plan(blocked, false).await.unwrap();
    assert_eq!(c.admin.await_plan(blocked, WAIT).await.unwrap(), PlanState::Succeeded);
    assert!(!c.nodes.is_running(services[0]));
    assert!(c.nodes.is_running(services[1]));
}

/// Plans on different shards and storage nodes run concurrently.
#[tokio::test]
async fn test_disjoint_plans_run_together() {
    let c = TestCluster::new();
    let (_, sns) = c.deploy_store(1, 2, 1, 4).await;
    let services = c.rep_node_services();
    assert_eq!(services.len(), 2);
    c.stop(&services).await;

    c.nodes.hold_starts();
    let first = c.start_in_background("start first", &services[..1]).await;
    let second = c.start_in_background("start second", &services[1..]).await;
    c.nodes.wait_in_flight(2).await;

    let mut running = c.admin.running_plans();
    running.sort();
    assert_eq!(running, vec![first, second]);

    // Each node is locked by exactly one of them.
    let topo = c.admin.current_topology();
    for sn in &sns {
        let holders = [first, second]
            .iter()
            .filter(|id| {
                c.admin
                    .get_plan(**id)
                    .unwrap()
                    .locks
                    .storage_nodes
                    .contains(sn)
            })
            .count();
        assert_eq!(holders, 1, "{sn} hosts {:?}", topo.rep_nodes_on(*sn));
    }

    c.nodes.release();
    for id in [first, second] {
        assert_eq!(c.admin.await_plan(id, WAIT).await.unwrap(), PlanState::Succeeded);
    }
    assert!(services.iter().all(|s| c.nodes.is_running(*s)));
    assert_eq!(c.nodes.max_in_flight(), 2);
}

/// Only one topology-changing plan runs at a time, and a plan computed
/// against an older topology cannot run after another one commits.
#[tokio::test]
async fn test_topology_writers_serialize() {
    let c = TestCluster::new();
    let (_, sns) = c.deploy_store(1, 2, 1, 2).await;
    let free = sns[1];
    assert!(c.admin.current_topology().admins_on(free).is_empty());

    let admin_plan = c.admin.create_deploy_admin_plan("second admin", free).unwrap();
    let zone_plan = c
        .admin
        .create_deploy_zone_plan("west", ZoneSpec::primary("west", 1))
        .unwrap();
    c.admin.approve_plan(zone_plan).await.unwrap();

    c.nodes.hold_starts();
    c.admin.approve_plan(admin_plan).await.unwrap();
    c.admin.execute_plan(admin_plan, false).await.unwrap();
    c.nodes.wait_in_flight(1).await;

    let err = c.admin.execute_plan(zone_plan, false).await.unwrap_err();
    assert_eq!(err.code(), Some(5200));

    c.nodes.release();
    c.admin.await_plan(admin_plan, WAIT).await.unwrap();
    assert_eq!(c.admin.get_plan(admin_plan).unwrap().state, PlanState::Succeeded);
    assert_eq!(c.admin.current_topology().admins.len(), 2);

    let err = c.admin.execute_plan(zone_plan, false).await.unwrap_err();
    assert!(
        matches!(err, AdminError::Plan(PlanError::StaleTopology { .. })),
        "{err}"
    );
    assert_eq!(err.code(), None);
    assert_eq!(c.admin.get_plan(zone_plan).unwrap().state, PlanState::Approved);
    assert!(c.admin.running_plans().is_empty());

    // Recomputed against the new topology it goes through.
    let retry = c
        .admin
        .create_deploy_zone_plan("west again", ZoneSpec::primary("west", 1))
        .unwrap();
    c.run_ok(retry).await;
    assert!(c.admin.current_topology().zone_by_name("west").is_some());
}

/// Services plans on the same storage node conflict even when they name
/// different services.
#[tokio::test]
async fn test_same_storage_node_conflicts() {
    let c = TestCluster::new();
    let (_, sns) = c.deploy_store(1, 1, 2, 4).await;
    let services = c.rep_node_services();
    assert_eq!(services.len(), 2);
    c.stop(&services).await;

    c.nodes.hold_starts();
    let first = c.start_in_background("start first", &services[..1]).await;
    c.nodes.wait_in_flight(1).await;

    let second = c
        .admin
        .create_start_services_plan("start second", &services[1..])
        .unwrap();
    c.admin.approve_plan(second).await.unwrap();
    let err = c.admin.execute_plan(second, false).await.unwrap_err();
    assert_eq!(err.code(), Some(5200));

    c.nodes.release();
    c.admin.await_plan(first, WAIT).await.unwrap();
    c.admin.execute_plan(second, false).await.unwrap();
    assert_eq!(c.admin.await_plan(second, WAIT).await.unwrap(), PlanState::Succeeded);
    assert!(c.nodes.is_running(ServiceId::StorageNode(sns[0])));
    assert!(services.iter().all(|s| c.nodes.is_running(*s)));
}
