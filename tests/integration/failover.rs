//! Integration test: admin failover.
//!
//! An admin dies while a plan is mid-flight. A new admin over the same
//! metadata finds the plan INTERRUPTED with an admin-failover record and
//! resumes it on request.
//!
//! Each admin gets its own runtime; shutting down the first runtime drops
//! the plan worker at whatever await point it was parked on.

use reef_admin::ZoneSpec;
use reef_tests::{TestCluster, WAIT};
use reef_topology::DEFAULT_POOL;
use reef_types::{FailureKind, PlanState, ServiceId, TaskKind, TaskState};
use tokio::runtime::{Builder, Runtime};

fn runtime() -> Runtime {
    Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .unwrap()
}

/// A services plan left running is interrupted on reopen and resumes from
/// the task that was in flight.
#[test]
fn test_plan_interrupted_by_failover_resumes() {
    let first = runtime();
    let (cluster, id, services) = first.block_on(async {
        let c = TestCluster::new();
        c.deploy_store(3, 3, 1, 6).await;
        let services = c.rep_node_services();
        c.stop(&services).await;

        c.nodes.hold_starts();
        let id = c.start_in_background("start", &services).await;
        c.nodes.wait_in_flight(services.len()).await;
        (c, id, services)
    });
    first.shutdown_background();

    // Nothing was recorded after the tasks started.
    let stored = cluster.meta.get_plan(id).unwrap().unwrap();
    assert_eq!(stored.state, PlanState::Running);
    assert!(
        stored
            .tasks
            .iter()
            .filter(|t| matches!(t.kind, TaskKind::StartService { .. }))
            .all(|t| t.state == TaskState::Running)
    );

    let second = runtime();
    second.block_on(async move {
        cluster.nodes.release();
        let c = cluster.failover();

        let plan = c.admin.get_plan(id).unwrap();
        assert_eq!(plan.state, PlanState::Interrupted);
        let failure = plan.failure.as_ref().expect("failover record");
        assert_eq!(failure.kind, FailureKind::AdminFailover);
        assert!(plan.tasks.iter().all(|t| t.state == TaskState::Pending));
        assert!(c.admin.running_plans().is_empty());
        // Already settled: awaiting returns at once.
        assert_eq!(c.admin.await_plan(id, WAIT).await.unwrap(), PlanState::Interrupted);

        c.admin.execute_plan(id, false).await.unwrap();
        assert_eq!(c.admin.await_plan(id, WAIT).await.unwrap(), PlanState::Succeeded);
        let plan = c.admin.get_plan(id).unwrap();
        assert_eq!(plan.attempts, 2);
        assert!(plan.failure.is_none());
        for service in &services {
            assert!(c.nodes.is_running(*service));
        }
    });
}

/// A topology deployment cut off before its commit leaves the live
/// topology untouched; resuming commits it exactly once.
#[test]
fn test_deploy_interrupted_before_commit() {
    let first = runtime();
    let (cluster, id, sequence) = first.block_on(async {
        let c = TestCluster::new();
        let zone = c.deploy_zone("east", 3).await;
        for n in 1..=3 {
            c.deploy_sn(zone, n, 1).await;
        }
        c.admin.create_topology("initial", DEFAULT_POOL, 12).unwrap();
        let id = c
            .admin
            .create_deploy_topology_plan("deploy", "initial")
            .unwrap();
        let sequence = c.admin.current_topology().sequence;

        c.nodes.hold_starts();
        c.admin.approve_plan(id).await.unwrap();
        c.admin.execute_plan(id, false).await.unwrap();
        c.nodes.wait_in_flight(3).await;
        (c, id, sequence)
    });
    first.shutdown_background();

    let second = runtime();
    second.block_on(async move {
        cluster.nodes.release();
        let c = cluster.failover();

        let topo = c.admin.current_topology();
        assert_eq!(topo.sequence, sequence);
        assert!(topo.rep_nodes.is_empty());
        assert_eq!(c.admin.get_plan(id).unwrap().state, PlanState::Interrupted);

        c.admin.execute_plan(id, false).await.unwrap();
        assert_eq!(c.admin.await_plan(id, WAIT).await.unwrap(), PlanState::Succeeded);

        let topo = c.admin.current_topology();
        assert_eq!(topo.sequence, sequence + 1);
        assert_eq!(topo.rep_nodes.len(), 3);
        assert_eq!(topo.partition_count(), 12);
        for rn in topo.rep_nodes.keys() {
            assert!(c.nodes.is_running(ServiceId::RepNode(*rn)));
        }

        let next = c
            .admin
            .create_deploy_zone_plan("west", ZoneSpec::primary("west", 1))
            .unwrap();
        c.run_ok(next).await;
    });
}

/// Plans that were not running are left as they were.
#[test]
fn test_failover_leaves_idle_plans_alone() {
    let rt = runtime();
    rt.block_on(async {
        let c = TestCluster::new();
        let zone = c.deploy_zone("east", 1).await;
        let pending = c
            .admin
            .create_deploy_sn_plan("sn", reef_tests::sn_spec(zone, 1, 1))
            .unwrap();
        let approved = c
            .admin
            .create_deploy_zone_plan("west", ZoneSpec::primary("west", 1))
            .unwrap();
        c.admin.approve_plan(approved).await.unwrap();

        let c = c.failover();
        assert_eq!(c.admin.get_plan(pending).unwrap().state, PlanState::Pending);
        assert_eq!(c.admin.get_plan(approved).unwrap().state, PlanState::Approved);
        let ids = c.admin.plan_ids().unwrap();
        assert_eq!(c.admin.get_plan(ids[0]).unwrap().state, PlanState::Succeeded);
        assert!(c.admin.get_plan(pending).unwrap().failure.is_none());
    });
}
