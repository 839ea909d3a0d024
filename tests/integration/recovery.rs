//! Crash-and-resume tests: a turn continues from its last durable
//! checkpoint without re-running completed tasks.

use chrono::Utc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use relay::adapter::{ReplanDecision, ToolSpec};
use relay::audit::RunId;
use relay::core::execution::{Execution, ToolOutcome};
use relay::core::plan::Plan;
use relay::core::task::{TaskId, TaskStatus};
use relay::orchestration::TurnPhase;
use relay::store::CheckpointStore;
use relay::{Session, TurnOutcome};

use crate::fixtures::{harness, key, standard_registry, task, CountingTool, ScriptedPlanner};

/// Build a session checkpointed mid-turn at the given phase.
///
/// `phases` is walked from Planning through each listed transition, the way
/// the scheduler would have checkpointed it before the crash.
fn mid_turn_session(user_message: &str, plan: Plan, phases: &[TurnPhase]) -> Session {
    let mut session = Session::new(key("user-1"));
    session.begin_turn(RunId::new(), user_message);
    session.replace_plan(plan);
    for phase in phases {
        session
            .turn
            .as_mut()
            .expect("turn in progress")
            .transition(*phase)
            .expect("valid transition");
    }
    session
}

#[tokio::test]
async fn test_resume_skips_completed_tasks() {
    let calls = Arc::new(AtomicUsize::new(0));
    let mut tools = standard_registry();
    tools.register(
        ToolSpec::new("count", "counts invocations"),
        Arc::new(CountingTool { calls: calls.clone() }),
    );

    // The crash happened after step_1 completed and its transition back to
    // Checking was durably recorded.
    let mut plan = Plan::new(
        vec![
            task("step_1", "count", "first", &[]),
            task("step_2", "count", "second", &["step_1"]),
        ],
        "",
    );
    plan.task_mut(&TaskId::new("step_1")).unwrap().start();
    plan.task_mut(&TaskId::new("step_1")).unwrap().complete();

    let mut session = mid_turn_session("two steps", plan, &[TurnPhase::Checking]);
    session.record_execution(Execution::record(
        TaskId::new("step_1"),
        "count",
        "first",
        ToolOutcome::ok(serde_json::json!("done")),
        Utc::now(),
    ));
    session.touch();

    // No initial plan scripted: resuming must not call the planner at all.
    let planner = Arc::new(ScriptedPlanner::new(vec![]));
    let h = harness(planner.clone(), tools);
    h.store.save(&session).await.unwrap();

    let outcome = h.scheduler.run_turn(&key("user-1"), "two steps").await.unwrap();

    assert_eq!(
        outcome,
        TurnOutcome::Response("ran [count:ok, count:ok]".to_string())
    );
    // Only step_2 was dispatched after the resume.
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(planner.seen().await.is_empty());

    let loaded = h.store.load(&key("user-1")).await.unwrap().unwrap();
    assert_eq!(loaded.executions.len(), 2);
    assert!(!loaded.turn_in_progress());
    // The resumed turn did not re-append the user message.
    assert_eq!(loaded.history.len(), 2);
}

#[tokio::test]
async fn test_interrupted_running_task_is_failed_not_rerun() {
    let calls = Arc::new(AtomicUsize::new(0));
    let mut tools = standard_registry();
    tools.register(
        ToolSpec::new("side-effect", "must not run twice"),
        Arc::new(CountingTool { calls: calls.clone() }),
    );

    // Crash window: the task was durably marked Running, but no outcome was
    // recorded. Whether the side effect happened is unknowable.
    let mut plan = Plan::new(vec![task("step_1", "side-effect", "charge the card", &[])], "");
    plan.task_mut(&TaskId::new("step_1")).unwrap().start();
    let session = mid_turn_session(
        "charge",
        plan,
        &[TurnPhase::Checking, TurnPhase::Executing],
    );

    let planner = Arc::new(ScriptedPlanner::new(vec![]).with_replans(vec![
        ReplanDecision::Revised(Plan::new(
            vec![task("retry_1", "echo", "verify charge status first", &[])],
            "check before retrying a side effect",
        )),
    ]));
    let h = harness(planner, tools);
    h.store.save(&session).await.unwrap();

    let outcome = h.scheduler.run_turn(&key("user-1"), "charge").await.unwrap();

    // The interrupted task was never re-dispatched.
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert_eq!(outcome, TurnOutcome::Response("ran [echo:ok]".to_string()));

    let loaded = h.store.load(&key("user-1")).await.unwrap().unwrap();
    let archived = &loaded.archived_plans.last().unwrap();
    match &archived.task(&TaskId::new("step_1")).unwrap().status {
        TaskStatus::Failed { error } => assert!(error.contains("interrupted")),
        other => panic!("Expected Failed, got {:?}", other),
    }
}

#[tokio::test]
async fn test_new_message_supersedes_stalled_turn() {
    let plan = Plan::new(vec![task("step_1", "echo", "old work", &[])], "");
    let session = mid_turn_session("old message", plan, &[TurnPhase::Checking]);

    let planner = Arc::new(ScriptedPlanner::new(vec![Plan::new(
        vec![task("fresh_1", "echo", "new work", &[])],
        "",
    )]));
    let h = harness(planner, standard_registry());
    h.store.save(&session).await.unwrap();

    let outcome = h
        .scheduler
        .run_turn(&key("user-1"), "something else entirely")
        .await
        .unwrap();

    assert_eq!(outcome, TurnOutcome::Response("ran [echo:ok]".to_string()));

    let loaded = h.store.load(&key("user-1")).await.unwrap().unwrap();
    // The stalled plan was archived with its task abandoned.
    assert!(!loaded.archived_plans.is_empty());
    assert_eq!(
        loaded.archived_plans[0].task(&TaskId::new("step_1")).unwrap().status,
        TaskStatus::Superseded
    );
    assert_eq!(loaded.user_message, "something else entirely");
}

#[tokio::test]
async fn test_version_is_monotonic_across_resume() {
    let mut plan = Plan::new(vec![task("step_1", "echo", "x", &[])], "");
    plan.task_mut(&TaskId::new("step_1")).unwrap().start();
    plan.task_mut(&TaskId::new("step_1")).unwrap().complete();

    let mut session = mid_turn_session("go", plan, &[TurnPhase::Checking]);
    session.record_execution(Execution::record(
        TaskId::new("step_1"),
        "echo",
        "x",
        ToolOutcome::ok(serde_json::json!("x")),
        Utc::now(),
    ));
    for _ in 0..5 {
        session.touch();
    }
    let saved_version = session.version;

    let planner = Arc::new(ScriptedPlanner::new(vec![]));
    let h = harness(planner, standard_registry());
    h.store.save(&session).await.unwrap();

    h.scheduler.run_turn(&key("user-1"), "go").await.unwrap();

    let loaded = h.store.load(&key("user-1")).await.unwrap().unwrap();
    assert!(loaded.version > saved_version);
}

#[tokio::test]
async fn test_turn_over_file_store_leaves_loadable_snapshot() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(
        relay::FileCheckpointStore::new(dir.path())
            .await
            .unwrap(),
    );

    let planner = Arc::new(ScriptedPlanner::new(vec![Plan::new(
        vec![task("step_1", "echo", "persist me", &[])],
        "",
    )]));
    let scheduler = relay::Scheduler::new(
        planner,
        Arc::new(crate::fixtures::RecordingResponder),
        crate::fixtures::standard_registry(),
        store.clone(),
    );

    let outcome = scheduler.run_turn(&key("user-1"), "go").await.unwrap();
    assert_eq!(outcome, TurnOutcome::Response("ran [echo:ok]".to_string()));

    assert!(dir.path().join("user-1.json").exists());
    let loaded = store.load(&key("user-1")).await.unwrap().unwrap();
    assert!(!loaded.turn_in_progress());
    assert_eq!(loaded.executions.len(), 1);
}

#[tokio::test]
async fn test_checkpoint_after_every_transition_is_loadable() {
    // Drive a full turn and verify the durable snapshot reflects the final
    // transition exactly: complete, with every execution recorded once.
    let planner = Arc::new(ScriptedPlanner::new(vec![Plan::new(
        vec![
            task("step_1", "search", "a", &[]),
            task("step_2", "notify", "b {{step_1.count}}", &["step_1"]),
        ],
        "",
    )]));
    let h = harness(planner, standard_registry());

    h.scheduler.run_turn(&key("user-1"), "go").await.unwrap();

    let loaded = h.store.load(&key("user-1")).await.unwrap().unwrap();
    assert!(!loaded.turn_in_progress());
    assert_eq!(loaded.executions.len(), 2);
    let ids: Vec<&str> = loaded.executions.iter().map(|e| e.task_id.as_str()).collect();
    assert_eq!(ids, vec!["step_1", "step_2"]);
    assert_eq!(loaded.final_response.as_deref(), Some("ran [search:ok, notify:ok]"));
}
