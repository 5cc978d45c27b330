//! Integration test: task failures.
//!
//! Fatal, transient and injected failures settle plans in ERROR with a
//! failure record; fixing the cause and re-executing resumes the plan.

use reef_tests::{TestCluster, WAIT};
use reef_types::events::TaskFinished;
use reef_types::{FailureKind, PlanState, ResultCode, TaskKind, TaskState};

/// A service that cannot start fails the plan with 5500 and a task-failed
/// record naming the task.
#[tokio::test]
async fn test_fatal_failure_reports_5500() {
    let c = TestCluster::new();
    c.deploy_store(1, 1, 1, 2).await;
    let services = c.rep_node_services();
    c.stop(&services).await;
    c.nodes.break_service(services[0]);

    let id = c.start_in_background("start", &services).await;
    let (state, code) = c.admin.await_plan_result(id, WAIT).await.unwrap();
    assert_eq!(state, PlanState::Error);
    assert_eq!(code, ResultCode::PlanFailed);
    assert_eq!(code.code(), 5500);

    let plan = c.admin.get_plan(id).unwrap();
    let failure = plan.failure.as_ref().expect("failure record");
    assert_eq!(failure.kind, FailureKind::TaskFailed);
    assert_eq!(failure.task, Some(0));
    assert!(failure.message.contains("cannot open its environment"));
    let task = &plan.tasks[0];
    assert_eq!(task.state, TaskState::Failed);
    // Fatal errors are not retried.
    assert_eq!(task.attempts, 1);
    assert!(task.error.is_some());
    assert_eq!(plan.tasks[1].state, TaskState::Pending);

    c.nodes.fix_service(services[0]);
    c.admin.execute_plan(id, false).await.unwrap();
    assert_eq!(c.admin.await_plan(id, WAIT).await.unwrap(), PlanState::Succeeded);
    let plan = c.admin.get_plan(id).unwrap();
    assert!(plan.failure.is_none());
    assert_eq!(plan.attempts, 2);
    assert_eq!(plan.tasks[0].attempts, 2);
    assert!(c.nodes.is_running(services[0]));
}

/// Transient failures within the retry budget are invisible to the plan.
#[tokio::test]
async fn test_transient_failures_are_retried() {
    let c = TestCluster::new();
    c.deploy_store(1, 1, 1, 2).await;
    let services = c.rep_node_services();
    c.stop(&services).await;
    c.nodes.fail_starts(services[0], 2);

    let id = c.start_in_background("start", &services).await;
    assert_eq!(c.admin.await_plan(id, WAIT).await.unwrap(), PlanState::Succeeded);
    let plan = c.admin.get_plan(id).unwrap();
    assert_eq!(plan.tasks[0].attempts, 3);
    assert_eq!(c.nodes.count(&format!("start {}", services[0])), 4);
}

/// Exhausting the retry budget records why; the next execution gets a
/// fresh budget.
#[tokio::test]
async fn test_retries_exhausted() {
    let c = TestCluster::new();
    c.deploy_store(1, 1, 1, 2).await;
    let services = c.rep_node_services();
    c.stop(&services).await;
    let max_attempts = c.admin.config().executor.retry.max_attempts;
    c.nodes.fail_starts(services[0], max_attempts + 1);

    let id = c.start_in_background("start", &services).await;
    assert_eq!(c.admin.await_plan(id, WAIT).await.unwrap(), PlanState::Error);
    let plan = c.admin.get_plan(id).unwrap();
    let failure = plan.failure.as_ref().unwrap();
    assert_eq!(failure.kind, FailureKind::RetriesExhausted);
    assert_eq!(plan.tasks[0].attempts, max_attempts);

    // One transient failure is left; the second run absorbs it.
    c.admin.execute_plan(id, false).await.unwrap();
    assert_eq!(c.admin.await_plan(id, WAIT).await.unwrap(), PlanState::Succeeded);
    assert_eq!(c.admin.get_plan(id).unwrap().tasks[0].attempts, max_attempts + 2);
}

/// An injected fault fails the chosen task once.
#[tokio::test]
async fn test_injected_fault_then_resume() {
    let c = TestCluster::new();
    c.deploy_store(3, 3, 1, 3).await;
    let services = c.rep_node_services();
    c.stop(&services).await;

    let id = c
        .admin
        .create_start_services_plan("start", &services)
        .unwrap();
    let wait_index = c
        .admin
        .get_plan(id)
        .unwrap()
        .tasks
        .iter()
        .find(|t| matches!(t.kind, TaskKind::WaitForService { .. }))
        .unwrap()
        .index;
    c.faults.arm(id, wait_index);
    assert_eq!(c.faults.pending(), 1);

    let mut finished = c.admin.event_bus().subscribe_plan::<TaskFinished>(id);
    assert_eq!(c.run(id).await, PlanState::Error);
    assert_eq!(c.faults.pending(), 0);

    let plan = c.admin.get_plan(id).unwrap();
    let failure = plan.failure.as_ref().unwrap();
    assert_eq!(failure.kind, FailureKind::Injected);
    assert_eq!(failure.task, Some(wait_index));
    // The rest of the parallel group still ran.
    let failed: Vec<u32> = plan
        .tasks
        .iter()
        .filter(|t| t.state == TaskState::Failed)
        .map(|t| t.index)
        .collect();
    assert_eq!(failed, vec![wait_index]);
    assert!(plan.tasks.iter().all(|t| t.state != TaskState::Pending));

    let mut failed_events = 0;
    while let Some(event) = finished.try_recv() {
        if event.state == TaskState::Failed {
            assert_eq!(event.task, wait_index);
            failed_events += 1;
        }
    }
    assert_eq!(failed_events, 1);

    c.admin.execute_plan(id, false).await.unwrap();
    assert_eq!(c.admin.await_plan(id, WAIT).await.unwrap(), PlanState::Succeeded);
}

/// A service that never answers fails its wait task after the timeout.
#[tokio::test]
async fn test_wait_for_service_times_out() {
    let c = TestCluster::new();
    c.deploy_store(1, 1, 1, 2).await;
    let services = c.rep_node_services();
    c.stop(&services).await;
    c.nodes.never_comes_up(services[0]);

    let id = c.start_in_background("start", &services).await;
    assert_eq!(c.admin.await_plan(id, WAIT).await.unwrap(), PlanState::Error);
    let plan = c.admin.get_plan(id).unwrap();
    let failure = plan.failure.as_ref().unwrap();
    assert_eq!(failure.kind, FailureKind::TaskFailed);
    assert!(failure.message.contains("did not become reachable"));
    assert_eq!(plan.tasks[0].state, TaskState::Succeeded);
    assert_eq!(plan.tasks[1].state, TaskState::Failed);

    // Re-executing would only repeat the wait, so start over.
    c.nodes.fix_service(services[0]);
    c.admin.cancel_plan(id).await.unwrap();
    let id = c.start_in_background("start again", &services).await;
    assert_eq!(c.admin.await_plan(id, WAIT).await.unwrap(), PlanState::Succeeded);
    assert!(c.nodes.is_running(services[0]));
}

/// An unreachable storage node exhausts retries rather than failing fast.
#[tokio::test]
async fn test_unreachable_node_is_retried() {
    let c = TestCluster::new();
    let (_, sns) = c.deploy_store(1, 1, 1, 2).await;
    let services = c.rep_node_services();
    c.stop(&services).await;
    c.nodes.take_down(sns[0]);

    let id = c.start_in_background("start", &services).await;
    assert_eq!(c.admin.await_plan(id, WAIT).await.unwrap(), PlanState::Error);
    let plan = c.admin.get_plan(id).unwrap();
    assert_eq!(
        plan.failure.as_ref().unwrap().kind,
        FailureKind::RetriesExhausted
    );
    assert_eq!(
        plan.tasks[0].attempts,
        c.admin.config().executor.retry.max_attempts
    );

    c.nodes.bring_up(sns[0]);
    c.admin.execute_plan(id, false).await.unwrap();
    assert_eq!(c.admin.await_plan(id, WAIT).await.unwrap(), PlanState::Succeeded);
}
