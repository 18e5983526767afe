//! End-to-end runs over the scheduler loop with scripted collaborators.

use conductor::core::TaskStatus;
use conductor::state::{ConductorState, RunStatus};
use conductor::Error;

use crate::support::*;

const PRD_TWO_TASKS: &str = "\
---
project_name: demo
tasks:
  - id: T1
    title: First task
  - id: T2
    title: Second task
    depends_on: [T1]
---
# Demo

Build the thing.
";

#[tokio::test]
async fn test_two_tasks_run_in_dependency_order() {
    let h = Harness::new();
    let worker = ScriptedWorker::new(h.repo.path(), Vec::new());
    let conductor = h.conductor(
        StubPlanner::unreachable(),
        worker.clone(),
        ScriptedReviewer::approve_all(h.repo.path()),
    );

    let mut state = h.state();
    let status = conductor
        .run(&mut state, &prd_from(PRD_TWO_TASKS))
        .await
        .unwrap();

    assert_eq!(status, RunStatus::Completed);
    assert_eq!(status.exit_code(), 0);
    assert_eq!(worker.task_order(), vec!["T1", "T2"]);

    let dag = state.dag.as_ref().unwrap();
    assert_eq!(dag.get("T1").unwrap().status, TaskStatus::Done);
    assert_eq!(dag.get("T1").unwrap().attempts, 1);
    assert_eq!(dag.get("T2").unwrap().status, TaskStatus::Done);
    assert_eq!(dag.get("T2").unwrap().attempts, 1);
}

#[tokio::test]
async fn test_state_file_is_always_complete_json() {
    let h = Harness::new();
    let conductor = h.conductor(
        StubPlanner::unreachable(),
        ScriptedWorker::new(h.repo.path(), Vec::new()),
        ScriptedReviewer::approve_all(h.repo.path()),
    );

    let mut state = h.state();
    conductor
        .run(&mut state, &prd_from(PRD_TWO_TASKS))
        .await
        .unwrap();

    let json = std::fs::read_to_string(h.state_path()).unwrap();
    let loaded: ConductorState = serde_json::from_str(&json).unwrap();
    assert_eq!(loaded.status, RunStatus::Completed);
    assert_eq!(loaded.dag.unwrap().len(), 2);
    assert!(!h.state_path().with_extension("json.tmp").exists());
}

#[tokio::test]
async fn test_ready_peers_run_in_ascending_id_order() {
    let h = Harness::new();
    let prd = prd_from(
        "\
---
tasks:
  - id: T3
    title: third
    depends_on: [T1]
  - id: T2
    title: second
    depends_on: [T1]
  - id: T1
    title: first
---
body
",
    );
    let worker = ScriptedWorker::new(h.repo.path(), Vec::new());
    let conductor = h.conductor(
        StubPlanner::unreachable(),
        worker.clone(),
        ScriptedReviewer::approve_all(h.repo.path()),
    );

    let mut state = h.state();
    let status = conductor.run(&mut state, &prd).await.unwrap();

    assert_eq!(status, RunStatus::Completed);
    // T2 and T3 become ready together once T1 is done; lower id first.
    assert_eq!(worker.task_order(), vec!["T1", "T2", "T3"]);
}

#[tokio::test]
async fn test_planner_runs_when_prd_has_no_frontmatter() {
    let h = Harness::new();
    let planned = dag_with("planned", vec![task_with_deps("T1", &[], 3)]);
    let planner = StubPlanner::returning(planned);
    let worker = ScriptedWorker::new(h.repo.path(), Vec::new());
    let conductor = h.conductor(
        planner.clone(),
        worker.clone(),
        ScriptedReviewer::approve_all(h.repo.path()),
    );

    let mut state = h.state();
    let status = conductor
        .run(&mut state, &prd("# Freeform PRD\n\nNo task list here."))
        .await
        .unwrap();

    assert_eq!(status, RunStatus::Completed);
    assert_eq!(planner.prds_seen().len(), 1);
    assert!(planner.prds_seen()[0].contains("Freeform PRD"));
    assert_eq!(worker.task_order(), vec!["T1"]);
    assert_eq!(state.dag.unwrap().project_name, "planned");
}

#[tokio::test]
async fn test_cyclic_frontmatter_fails_before_any_task_runs() {
    let h = Harness::new();
    let prd = prd_from(
        "\
---
tasks:
  - id: T1
    title: a
    depends_on: [T2]
  - id: T2
    title: b
    depends_on: [T1]
---
body
",
    );
    let worker = ScriptedWorker::new(h.repo.path(), Vec::new());
    let conductor = h.conductor(
        StubPlanner::unreachable(),
        worker.clone(),
        ScriptedReviewer::approve_all(h.repo.path()),
    );

    let mut state = h.state();
    let err = conductor.run(&mut state, &prd).await.unwrap_err();
    assert!(matches!(err, Error::Validation(_)));
    assert!(worker.calls().is_empty());
}

#[tokio::test]
async fn test_cancel_sentinel_pauses_before_selecting_a_task() {
    let h = Harness::new();
    std::fs::create_dir_all(h.session_dir()).unwrap();
    std::fs::write(h.session_dir().join("cancel"), "").unwrap();

    let worker = ScriptedWorker::new(h.repo.path(), Vec::new());
    let conductor = h.conductor(
        StubPlanner::unreachable(),
        worker.clone(),
        ScriptedReviewer::approve_all(h.repo.path()),
    );

    let mut state = h.state();
    let status = conductor
        .run(&mut state, &prd_from(PRD_TWO_TASKS))
        .await
        .unwrap();

    assert!(matches!(status, RunStatus::Paused { .. }));
    assert_eq!(status.exit_code(), 3);
    assert!(worker.calls().is_empty());
}

#[tokio::test]
async fn test_worker_edits_become_a_tagged_commit() {
    let h = Harness::new();
    let worker = ScriptedWorker::new(h.repo.path(), vec![WorkerStep::CompleteWrite("lib.rs")]);
    let conductor = h.conductor(
        StubPlanner::unreachable(),
        worker,
        ScriptedReviewer::approve_all(h.repo.path()),
    );

    let mut state = h.state();
    let prd = prd_from(
        "\
---
tasks:
  - id: T1
    title: Add the library
---
body
",
    );
    let status = conductor.run(&mut state, &prd).await.unwrap();

    assert_eq!(status, RunStatus::Completed);
    let task = state.dag.as_ref().unwrap().get("T1").unwrap();
    assert_eq!(task.commit_shas.len(), 1);
    assert_eq!(h.head_message(), "conductor: T1 - Add the library");
}

#[tokio::test]
async fn test_no_commit_recorded_when_worker_makes_no_edits() {
    let h = Harness::new();
    let base = h.git().head_commit().unwrap();
    let conductor = h.conductor(
        StubPlanner::unreachable(),
        ScriptedWorker::new(h.repo.path(), vec![WorkerStep::Complete]),
        ScriptedReviewer::approve_all(h.repo.path()),
    );

    let mut state = h.state();
    let prd = prd_from("---\ntasks:\n  - id: T1\n    title: noop\n---\nbody\n");
    let status = conductor.run(&mut state, &prd).await.unwrap();

    assert_eq!(status, RunStatus::Completed);
    let task = state.dag.as_ref().unwrap().get("T1").unwrap();
    assert!(task.commit_shas.is_empty());
    assert_eq!(h.git().head_commit().unwrap(), base);
}

#[tokio::test]
async fn test_worker_usage_accumulates_on_the_task() {
    let h = Harness::new();
    let conductor = h.conductor(
        StubPlanner::unreachable(),
        ScriptedWorker::new(h.repo.path(), Vec::new()),
        ScriptedReviewer::approve_all(h.repo.path()),
    );

    let mut state = h.state();
    let prd = prd_from("---\ntasks:\n  - id: T1\n    title: one\n---\nbody\n");
    conductor.run(&mut state, &prd).await.unwrap();

    let usage = &state.dag.as_ref().unwrap().get("T1").unwrap().usage;
    assert_eq!(usage.worker_sessions, 1);
    assert_eq!(usage.worker_input_tokens, 1000);
    assert_eq!(usage.worker_output_tokens, 200);
    assert!((usage.worker_cost_usd - 0.01).abs() < 1e-9);
}
