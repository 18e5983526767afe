//! Crash-resume behavior: interrupted tasks are reselected, finished work
//! is never redone.

use conductor::core::TaskStatus;
use conductor::state::RunStatus;

use crate::support::*;

#[tokio::test]
async fn test_interrupted_task_is_reset_and_reselected_first() {
    let h = Harness::new();

    // Simulate a crash mid-task: T1 was InProgress when the state was
    // last persisted.
    let mut dag = dag_with(
        "demo",
        vec![
            task_with_deps("T1", &[], 3),
            task_with_deps("T2", &["T1"], 3),
        ],
    );
    dag.get_mut("T1").unwrap().start_attempt();
    let mut state = h.state();
    state.dag = Some(dag);
    h.store().save(&mut state).unwrap();

    let mut loaded = h.store().load().unwrap();
    let t1 = loaded.dag.as_ref().unwrap().get("T1").unwrap();
    assert_eq!(t1.status, TaskStatus::Pending);
    assert_eq!(t1.attempts, 1);

    let worker = ScriptedWorker::new(h.repo.path(), Vec::new());
    let conductor = h.conductor(
        StubPlanner::unreachable(),
        worker.clone(),
        ScriptedReviewer::approve_all(h.repo.path()),
    );
    let status = conductor.run(&mut loaded, &prd("body")).await.unwrap();

    assert_eq!(status, RunStatus::Completed);
    // T1 runs again before its dependent, consuming a second attempt.
    assert_eq!(worker.task_order(), vec!["T1", "T2"]);
    let dag = loaded.dag.as_ref().unwrap();
    assert_eq!(dag.get("T1").unwrap().attempts, 2);
    assert_eq!(dag.get("T1").unwrap().status, TaskStatus::Done);
}

#[tokio::test]
async fn test_resume_skips_completed_tasks() {
    let h = Harness::new();

    let mut dag = dag_with(
        "demo",
        vec![
            task_with_deps("T1", &[], 3),
            task_with_deps("T2", &["T1"], 3),
        ],
    );
    {
        let t1 = dag.get_mut("T1").unwrap();
        t1.start_attempt();
        t1.complete();
    }
    let mut state = h.state();
    state.dag = Some(dag);
    h.store().save(&mut state).unwrap();

    let mut loaded = h.store().load().unwrap();
    let worker = ScriptedWorker::new(h.repo.path(), Vec::new());
    let conductor = h.conductor(
        StubPlanner::unreachable(),
        worker.clone(),
        ScriptedReviewer::approve_all(h.repo.path()),
    );
    let status = conductor.run(&mut loaded, &prd("body")).await.unwrap();

    assert_eq!(status, RunStatus::Completed);
    assert_eq!(worker.task_order(), vec!["T2"]);
    assert_eq!(
        loaded.dag.as_ref().unwrap().get("T1").unwrap().attempts,
        1
    );
}

#[tokio::test]
async fn test_failed_tasks_stay_failed_across_resume() {
    let h = Harness::new();

    let mut dag = dag_with(
        "demo",
        vec![
            task_with_deps("T1", &[], 2),
            task_with_deps("T2", &["T1"], 2),
            task_with_deps("T3", &[], 2),
        ],
    );
    {
        let t1 = dag.get_mut("T1").unwrap();
        t1.start_attempt();
        t1.start_attempt();
        t1.fail("checks never passed");
    }
    let mut state = h.state();
    state.dag = Some(dag);
    h.store().save(&mut state).unwrap();

    let mut loaded = h.store().load().unwrap();
    let worker = ScriptedWorker::new(h.repo.path(), Vec::new());
    let conductor = h.conductor(
        StubPlanner::unreachable(),
        worker.clone(),
        ScriptedReviewer::approve_all(h.repo.path()),
    );
    let status = conductor.run(&mut loaded, &prd("body")).await.unwrap();

    // T3 still runs; T1 is never re-attempted and keeps T2 blocked.
    assert_eq!(status, RunStatus::Blocked);
    assert_eq!(worker.task_order(), vec!["T3"]);
    let dag = loaded.dag.as_ref().unwrap();
    assert_eq!(dag.get("T1").unwrap().status, TaskStatus::Failed);
    assert_eq!(dag.get("T1").unwrap().attempts, 2);
    assert_eq!(dag.get("T2").unwrap().status, TaskStatus::Pending);
    assert_eq!(dag.get("T3").unwrap().status, TaskStatus::Done);
}

#[tokio::test]
async fn test_dirty_work_tree_is_fatal() {
    let h = Harness::new();
    std::fs::write(h.repo.path().join("uncommitted.txt"), "leftover\n").unwrap();

    let worker = ScriptedWorker::new(h.repo.path(), Vec::new());
    let conductor = h.conductor(
        StubPlanner::unreachable(),
        worker.clone(),
        ScriptedReviewer::approve_all(h.repo.path()),
    );

    let mut state = h.state();
    let prd = prd_from("---\ntasks:\n  - id: T1\n    title: one\n---\nbody\n");
    let err = conductor.run(&mut state, &prd).await.unwrap_err();

    assert!(matches!(err, conductor::Error::DirtyWorkTree(_)));
    assert!(worker.calls().is_empty());
    assert_eq!(state.status, RunStatus::Error);
    assert_eq!(h.store().load().unwrap().status, RunStatus::Error);
}
