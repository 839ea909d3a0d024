//! Full-turn execution tests: plan, execute in dependency order, respond.

use std::sync::Arc;

use relay::audit::{AuditEvent, RunStatus};
use relay::core::plan::Plan;
use relay::core::task::{TaskId, TaskStatus};
use relay::store::CheckpointStore;
use relay::TurnOutcome;

use crate::fixtures::{harness, key, standard_registry, task, ScriptedPlanner};

#[tokio::test]
async fn test_single_task_turn() {
    let planner = Arc::new(ScriptedPlanner::new(vec![Plan::new(
        vec![task("step_1", "search", "find fitness trends", &[])],
        "one lookup is enough",
    )]));
    let h = harness(planner.clone(), standard_registry());

    let outcome = h
        .scheduler
        .run_turn(&key("user-1"), "what are the latest fitness trends?")
        .await
        .unwrap();

    assert_eq!(outcome, TurnOutcome::Response("ran [search:ok]".to_string()));

    // Planner saw the message and the full catalog.
    let seen = planner.seen().await;
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].user_message, "what are the latest fitness trends?");
    assert!(seen[0].catalog.contains(&"search".to_string()));
    // The inbound message is already part of the history window.
    assert_eq!(seen[0].history_len, 1);
}

#[tokio::test]
async fn test_diamond_graph_executes_in_dependency_order() {
    //     step_1
    //    /      \
    // step_2   step_3
    //    \      /
    //     step_4
    let planner = Arc::new(ScriptedPlanner::new(vec![Plan::new(
        vec![
            task("step_1", "search", "gather data", &[]),
            task("step_2", "echo", "summarize {{step_1.count}} hits", &["step_1"]),
            task("step_3", "echo", "extract first title {{step_1.results.0.title}}", &["step_1"]),
            task("step_4", "notify", "send {{step_2}} and {{step_3}}", &["step_2", "step_3"]),
        ],
        "fan out then join",
    )]));
    let h = harness(planner, standard_registry());

    h.scheduler.run_turn(&key("user-1"), "weekly report").await.unwrap();

    let session = h.store.load(&key("user-1")).await.unwrap().unwrap();
    let order: Vec<&str> = session
        .executions
        .iter()
        .map(|e| e.task_id.as_str())
        .collect();
    assert_eq!(order, vec!["step_1", "step_2", "step_3", "step_4"]);

    // References were substituted from real outputs before dispatch.
    assert_eq!(session.executions[1].input, "summarize 1 hits");
    assert_eq!(session.executions[2].input, "extract first title First hit");
    assert_eq!(
        session.executions[3].input,
        "send summarize 1 hits and extract first title First hit"
    );

    assert!(session.plan.unwrap().all_done());
}

#[tokio::test]
async fn test_dependent_never_dispatched_before_dependency() {
    let planner = Arc::new(ScriptedPlanner::new(vec![Plan::new(
        vec![
            task("step_2", "echo", "second {{step_1}}", &["step_1"]),
            task("step_1", "echo", "first", &[]),
        ],
        "listed out of order on purpose",
    )]));
    let h = harness(planner, standard_registry());

    h.scheduler.run_turn(&key("user-1"), "go").await.unwrap();

    let session = h.store.load(&key("user-1")).await.unwrap().unwrap();
    let order: Vec<&str> = session
        .executions
        .iter()
        .map(|e| e.task_id.as_str())
        .collect();
    // step_2 is first in insertion order but blocked until step_1 succeeds.
    assert_eq!(order, vec!["step_1", "step_2"]);
}

#[tokio::test]
async fn test_clarification_turn_executes_nothing() {
    let planner = Arc::new(ScriptedPlanner::new(vec![Plan::clarification(
        "Do you mean your private calendar or the studio calendar?",
    )]));
    let h = harness(planner, standard_registry());

    let outcome = h
        .scheduler
        .run_turn(&key("user-1"), "book the appointment")
        .await
        .unwrap();

    assert!(outcome.is_clarification());
    assert_eq!(
        outcome.text(),
        "Do you mean your private calendar or the studio calendar?"
    );

    let session = h.store.load(&key("user-1")).await.unwrap().unwrap();
    assert!(session.executions.is_empty());
    assert!(!session.turn_in_progress());
}

#[tokio::test]
async fn test_clarification_context_carries_into_next_turn() {
    let planner = Arc::new(
        ScriptedPlanner::new(vec![
            Plan::clarification("Which day?"),
            Plan::new(vec![task("step_1", "echo", "book for friday", &[])], ""),
        ]),
    );
    let h = harness(planner.clone(), standard_registry());

    h.scheduler.run_turn(&key("user-1"), "book a slot").await.unwrap();
    let outcome = h.scheduler.run_turn(&key("user-1"), "friday").await.unwrap();

    assert_eq!(outcome, TurnOutcome::Response("ran [echo:ok]".to_string()));

    // The second planner call saw the whole exchange: question and answer.
    let seen = planner.seen().await;
    assert_eq!(seen.len(), 2);
    assert_eq!(seen[1].history_len, 3); // user, assistant question, user answer
}

#[tokio::test]
async fn test_audit_trail_for_completed_turn() {
    let planner = Arc::new(ScriptedPlanner::new(vec![Plan::new(
        vec![
            task("step_1", "search", "look", &[]),
            task("step_2", "notify", "tell {{step_1.count}}", &["step_1"]),
        ],
        "",
    )]));
    let h = harness(planner, standard_registry());

    h.scheduler.run_turn(&key("user-1"), "go").await.unwrap();

    let events = h.audit.events().await;
    assert!(matches!(events.first(), Some(AuditEvent::RunStarted { .. })));
    assert!(matches!(events.last(), Some(AuditEvent::RunFinished { .. })));

    let decisions = events
        .iter()
        .filter(|e| matches!(e, AuditEvent::PlannerDecision { .. }))
        .count();
    assert_eq!(decisions, 1);

    let executions = events
        .iter()
        .filter(|e| matches!(e, AuditEvent::Execution { .. }))
        .count();
    assert_eq!(executions, 2);

    if let Some(AuditEvent::RunFinished { record }) = events.last() {
        assert_eq!(record.status, RunStatus::Completed);
        assert_eq!(record.tasks_planned, 2);
        assert_eq!(record.tasks_executed, 2);
        assert_eq!(record.tasks_failed, 0);
        assert_eq!(record.replans, 0);
        assert!(record.duration_ms.unwrap() >= 0);
    } else {
        panic!("Expected RunFinished last");
    }
}

#[tokio::test]
async fn test_sessions_are_isolated() {
    let planner = Arc::new(ScriptedPlanner::new(vec![
        Plan::new(vec![task("a_1", "echo", "for alice", &[])], ""),
        Plan::new(vec![task("b_1", "echo", "for bob", &[])], ""),
    ]));
    let h = harness(planner, standard_registry());

    h.scheduler.run_turn(&key("alice"), "hi").await.unwrap();
    h.scheduler.run_turn(&key("bob"), "hello").await.unwrap();

    let alice = h.store.load(&key("alice")).await.unwrap().unwrap();
    let bob = h.store.load(&key("bob")).await.unwrap().unwrap();

    assert_eq!(alice.executions.len(), 1);
    assert_eq!(bob.executions.len(), 1);
    assert_eq!(alice.executions[0].task_id, TaskId::new("a_1"));
    assert_eq!(bob.executions[0].task_id, TaskId::new("b_1"));
}

#[tokio::test]
async fn test_failed_tool_marks_task_failed() {
    let planner = Arc::new(ScriptedPlanner::new(vec![Plan::new(
        vec![task("step_1", "flaky", "will break", &[])],
        "",
    )]));
    // No scripted replans: the planner abandons and the responder reports
    // what actually happened.
    let h = harness(planner, standard_registry());

    let outcome = h.scheduler.run_turn(&key("user-1"), "go").await.unwrap();
    assert_eq!(outcome, TurnOutcome::Response("ran [flaky:failed]".to_string()));

    let session = h.store.load(&key("user-1")).await.unwrap().unwrap();
    let plan = session.plan.unwrap();
    assert!(matches!(
        plan.task(&TaskId::new("step_1")).unwrap().status,
        TaskStatus::Failed { .. }
    ));
}
