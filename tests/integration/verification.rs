//! Integration test: configuration verification.
//!
//! Live verification against simulated agents, repair plans built from its
//! findings and the deploy checks that guard topology deployments.

use reef_admin::{AdminError, ZoneSpec};
use reef_tests::{DIR_SIZE, TestCluster, WAIT, fast_config, sn_spec};
use reef_topology::{DEFAULT_POOL, StorageDir};
use reef_types::{PlanState, ServiceId, TaskKind};
use reef_verify::{Problem, Severity};

/// An unreachable agent is reported once; its services are not probed.
#[tokio::test]
async fn test_unreachable_agent_reported_once() {
    let c = TestCluster::new();
    let (_, sns) = c.deploy_store(3, 3, 1, 3).await;
    assert!(c.admin.verify_configuration().await.violations.is_empty());

    c.nodes.take_down(sns[1]);
    let report = c.admin.verify_configuration().await;
    let failed: Vec<&Problem> = report.of_kind("RpcFailed").collect();
    assert_eq!(failed.len(), 1);
    match failed[0] {
        Problem::RpcFailed { service, sn, error } => {
            assert_eq!(*service, ServiceId::StorageNode(sns[1]));
            assert_eq!(*sn, sns[1]);
            assert!(error.contains("unreachable"));
        }
        other => panic!("unexpected {other}"),
    }
    assert_eq!(failed[0].severity(), Severity::Violation);
    assert_eq!(report.of_kind("ServiceStopped").count(), 0);
}

/// Directory usage beyond the declared size or the free-space threshold is
/// flagged.
#[tokio::test]
async fn test_storage_usage_problems() {
    let c = TestCluster::new();
    let (_, sns) = c.deploy_store(1, 2, 1, 4).await;
    c.nodes.set_usage(sns[0], "/disk1", DIR_SIZE + 1, 1 << 20);
    c.nodes.set_usage(sns[1], "/disk1", 1 << 30, 50 << 30);

    let report = c.admin.verify_configuration().await;
    let exceeded: Vec<&Problem> = report.of_kind("AvailableStorageExceeded").collect();
    assert_eq!(exceeded.len(), 1);
    assert!(exceeded[0].is_violation());
    assert!(matches!(
        exceeded[0],
        Problem::AvailableStorageExceeded { sn, used, size, .. }
            if *sn == sns[0] && *used == DIR_SIZE + 1 && *size == DIR_SIZE
    ));

    let low: Vec<&Problem> = report.of_kind("AvailableStorageLow").collect();
    assert_eq!(low.len(), 1);
    assert!(!low[0].is_violation());
    assert!(matches!(
        low[0],
        Problem::AvailableStorageLow { sn, path, available, .. }
            if *sn == sns[0] && path == "/disk1" && *available == 1 << 20
    ));
}

/// The free-space threshold comes from the admin's configuration.
#[tokio::test]
async fn test_storage_threshold_is_configurable() {
    let mut config = fast_config();
    config.verify.available_storage_low_bytes = 0;
    let c = TestCluster::with_config(config);
    let (_, sns) = c.deploy_store(1, 1, 1, 2).await;
    c.nodes.set_usage(sns[0], "/disk1", 1 << 30, 1);

    let report = c.admin.verify_configuration().await;
    assert_eq!(report.of_kind("AvailableStorageLow").count(), 0);
}

/// Too few admins for the zone's replication factor is a warning that
/// deploying more admins clears.
#[tokio::test]
async fn test_admin_shortfall_warning() {
    let c = TestCluster::new();
    let (_, sns) = c.deploy_store(3, 3, 1, 3).await;

    let report = c.admin.verify_configuration().await;
    assert!(report.violations.is_empty());
    assert!(report.warnings.iter().any(|p| matches!(
        p,
        Problem::InsufficientAdmins { required: 3, actual: 1, .. }
    )));

    for sn in &sns[1..] {
        let id = c
            .admin
            .create_deploy_admin_plan(&format!("admin on {sn}"), *sn)
            .unwrap();
        c.run_ok(id).await;
    }
    let report = c.admin.verify_configuration().await;
    assert_eq!(report.of_kind("InsufficientAdmins").count(), 0);
    assert!(report.is_clean(), "{:?}", report.warnings);
}

/// A replica whose configuration vanished is redeployed and started by a
/// repair plan.
#[tokio::test]
async fn test_repair_redeploys_missing_service() {
    let c = TestCluster::new();
    c.deploy_store(3, 3, 1, 3).await;
    let services = c.rep_node_services();
    c.nodes.wipe(services[1]);
    c.nodes.crash(services[2]);

    let report = c.admin.verify_configuration().await;
    let stopped: Vec<(ServiceId, bool)> = report
        .of_kind("ServiceStopped")
        .filter_map(|p| match p {
            Problem::ServiceStopped {
                service, deployed, ..
            } => Some((*service, *deployed)),
            _ => None,
        })
        .collect();
    assert_eq!(stopped.len(), 2);
    assert!(stopped.contains(&(services[1], false)));
    assert!(stopped.contains(&(services[2], true)));

    let id = c.admin.create_repair_plan("repair").await.unwrap();
    let plan = c.admin.get_plan(id).unwrap();
    let deploys = plan
        .tasks
        .iter()
        .filter(|t| matches!(t.kind, TaskKind::DeployRepNode { .. }))
        .count();
    assert_eq!(deploys, 1);
    assert!(!plan.locks.topology_writer);

    c.run_ok(id).await;
    assert!(services.iter().all(|s| c.nodes.is_running(*s)));
    assert_eq!(c.admin.verify_configuration().await.of_kind("ServiceStopped").count(), 0);
}

/// Deploy checks refuse a target with unsized storage directories unless
/// the execution is forced.
#[tokio::test]
async fn test_deploy_checks_block_unless_forced() {
    let c = TestCluster::new();
    let zone = c.deploy_zone_spec(ZoneSpec::primary("east", 1)).await;
    let mut spec = sn_spec(zone, 1, 1);
    spec.storage_dirs = vec![StorageDir::without_size("/disk1")];
    let id = c.admin.create_deploy_sn_plan("unsized", spec).unwrap();
    c.run_ok(id).await;

    c.admin.create_topology("initial", DEFAULT_POOL, 4).unwrap();
    let id = c
        .admin
        .create_deploy_topology_plan("deploy", "initial")
        .unwrap();
    c.admin.approve_plan(id).await.unwrap();

    let err = c.admin.execute_plan(id, false).await.unwrap_err();
    match &err {
        AdminError::DeployBlocked { plan, problems } => {
            assert_eq!(*plan, id);
            assert!(
                problems
                    .iter()
                    .any(|p| matches!(p, Problem::MissingStorageDirectorySize { .. }))
            );
        }
        other => panic!("expected blocked deploy, got {other}"),
    }
    assert_eq!(err.code(), None);
    assert_eq!(c.admin.get_plan(id).unwrap().state, PlanState::Approved);

    c.admin.execute_plan(id, true).await.unwrap();
    assert_eq!(c.admin.await_plan(id, WAIT).await.unwrap(), PlanState::Succeeded);
    assert_eq!(c.admin.current_topology().rep_nodes.len(), 1);

    // The live store still carries the problem.
    let report = c.admin.verify_configuration().await;
    assert_eq!(report.of_kind("MissingStorageDirectorySize").count(), 1);
}
