//! The reviewer gate: diff delivery, fix commits, forced re-checks, and
//! pausing on explicit rejection.

use conductor::core::TaskStatus;
use conductor::state::RunStatus;

use crate::support::*;

const PRD_ONE_TASK: &str = "---\ntasks:\n  - id: T1\n    title: one\n---\nbody\n";

#[tokio::test]
async fn test_reviewer_sees_the_task_diff_and_approves() {
    let mut h = Harness::new();
    h.config.enable_reviewer = true;

    let reviewer = ScriptedReviewer::approve_all(h.repo.path());
    let conductor = h.conductor(
        StubPlanner::unreachable(),
        ScriptedWorker::new(h.repo.path(), vec![WorkerStep::CompleteWrite("feature.rs")]),
        reviewer.clone(),
    );

    let mut state = h.state();
    let status = conductor
        .run(&mut state, &prd_from(PRD_ONE_TASK))
        .await
        .unwrap();

    assert_eq!(status, RunStatus::Completed);
    let diffs = reviewer.diffs();
    assert_eq!(diffs.len(), 1);
    assert!(diffs[0].contains("feature.rs"));

    let task = state.dag.as_ref().unwrap().get("T1").unwrap();
    assert_eq!(task.status, TaskStatus::Done);
    assert_eq!(task.usage.reviewer_input_tokens, 500);
    assert!((task.usage.reviewer_cost_usd - 0.005).abs() < 1e-9);
}

#[tokio::test]
async fn test_reviewer_is_skipped_when_nothing_was_committed() {
    let mut h = Harness::new();
    h.config.enable_reviewer = true;

    let reviewer = ScriptedReviewer::approve_all(h.repo.path());
    let conductor = h.conductor(
        StubPlanner::unreachable(),
        ScriptedWorker::new(h.repo.path(), vec![WorkerStep::Complete]),
        reviewer.clone(),
    );

    let mut state = h.state();
    let status = conductor
        .run(&mut state, &prd_from(PRD_ONE_TASK))
        .await
        .unwrap();

    assert_eq!(status, RunStatus::Completed);
    assert!(reviewer.diffs().is_empty());
}

#[tokio::test]
async fn test_reviewer_fixes_are_committed_separately() {
    let mut h = Harness::new();
    h.config.enable_reviewer = true;

    let reviewer = ScriptedReviewer::new(
        h.repo.path(),
        vec![ReviewStep {
            approved: true,
            fixes_applied: true,
            write_file: Some("fixed.rs"),
        }],
    );
    let conductor = h.conductor(
        StubPlanner::unreachable(),
        ScriptedWorker::new(h.repo.path(), vec![WorkerStep::CompleteWrite("feature.rs")]),
        reviewer,
    );

    let mut state = h.state();
    let status = conductor
        .run(&mut state, &prd_from(PRD_ONE_TASK))
        .await
        .unwrap();

    assert_eq!(status, RunStatus::Completed);
    let task = state.dag.as_ref().unwrap().get("T1").unwrap();
    assert_eq!(task.status, TaskStatus::Done);
    assert_eq!(task.commit_shas.len(), 2);
    assert_eq!(h.head_message(), "conductor: T1 - reviewer fixes");
}

#[tokio::test]
async fn test_reviewer_fixes_that_break_checks_fail_the_task() {
    let mut h = Harness::new();
    h.config.enable_reviewer = true;
    // Passes for the worker's tree, fails once the reviewer adds its file.
    h.config.test_cmd = Some("test ! -f fixed.rs".to_string());

    let reviewer = ScriptedReviewer::new(
        h.repo.path(),
        vec![ReviewStep {
            approved: true,
            fixes_applied: true,
            write_file: Some("fixed.rs"),
        }],
    );
    let conductor = h.conductor(
        StubPlanner::unreachable(),
        ScriptedWorker::new(h.repo.path(), vec![WorkerStep::CompleteWrite("feature.rs")]),
        reviewer,
    );

    let mut state = h.state();
    let status = conductor
        .run(&mut state, &prd_from(PRD_ONE_TASK))
        .await
        .unwrap();

    assert_eq!(status, RunStatus::Blocked);
    let task = state.dag.as_ref().unwrap().get("T1").unwrap();
    assert_eq!(task.status, TaskStatus::Failed);
}

#[tokio::test]
async fn test_reviewer_rejection_pauses_the_run() {
    let mut h = Harness::new();
    h.config.enable_reviewer = true;

    let reviewer = ScriptedReviewer::new(
        h.repo.path(),
        vec![ReviewStep {
            approved: false,
            fixes_applied: false,
            write_file: None,
        }],
    );
    let conductor = h.conductor(
        StubPlanner::unreachable(),
        ScriptedWorker::new(h.repo.path(), vec![WorkerStep::CompleteWrite("feature.rs")]),
        reviewer,
    );

    let mut state = h.state();
    let status = conductor
        .run(&mut state, &prd_from(PRD_ONE_TASK))
        .await
        .unwrap();

    match &status {
        RunStatus::Paused { reason } => assert!(reason.contains("T1")),
        other => panic!("expected paused, got {:?}", other),
    }
    assert_eq!(status.exit_code(), 3);
    // The task stays InProgress so a resume reselects and retries it.
    let saved = h.store().load().unwrap();
    let t1 = saved.dag.as_ref().unwrap().get("T1").unwrap();
    assert_eq!(t1.status, TaskStatus::Pending);
    assert_eq!(t1.attempts, 1);
}

#[tokio::test]
async fn test_no_reviewer_flag_bypasses_the_gate() {
    let h = Harness::new();
    assert!(!h.config.enable_reviewer);

    let reviewer = ScriptedReviewer::new(
        h.repo.path(),
        vec![ReviewStep {
            approved: false,
            fixes_applied: false,
            write_file: None,
        }],
    );
    let conductor = h.conductor(
        StubPlanner::unreachable(),
        ScriptedWorker::new(h.repo.path(), vec![WorkerStep::CompleteWrite("feature.rs")]),
        reviewer.clone(),
    );

    let mut state = h.state();
    let status = conductor
        .run(&mut state, &prd_from(PRD_ONE_TASK))
        .await
        .unwrap();

    assert_eq!(status, RunStatus::Completed);
    assert!(reviewer.diffs().is_empty());
}
