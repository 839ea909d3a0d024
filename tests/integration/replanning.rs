//! Failure routing: replans, the replan cap, and abandoned goals.

use std::sync::Arc;

use relay::adapter::ReplanDecision;
use relay::audit::{AuditEvent, RunStatus};
use relay::core::plan::Plan;
use relay::core::task::{TaskId, TaskStatus};
use relay::store::CheckpointStore;
use relay::{Error, TurnOutcome};

use crate::fixtures::{harness, key, standard_registry, task, ScriptedPlanner};

#[tokio::test]
async fn test_failure_routes_to_revised_plan() {
    let planner = Arc::new(
        ScriptedPlanner::new(vec![Plan::new(
            vec![
                task("step_1", "flaky", "send via the broken channel", &[]),
                task("step_2", "notify", "confirm delivery", &["step_1"]),
            ],
            "",
        )])
        .with_replans(vec![ReplanDecision::Revised(Plan::new(
            vec![
                task("retry_1", "notify", "send via the working channel", &[]),
                task("retry_2", "notify", "confirm delivery", &["retry_1"]),
            ],
            "flaky channel is down, use notify instead",
        ))]),
    );
    let h = harness(planner, standard_registry());

    let outcome = h.scheduler.run_turn(&key("user-1"), "deliver it").await.unwrap();

    assert_eq!(
        outcome,
        TurnOutcome::Response("ran [flaky:failed, notify:ok, notify:ok]".to_string())
    );

    let session = h.store.load(&key("user-1")).await.unwrap().unwrap();
    assert_eq!(session.retry_count, 1);

    // The failed generation is archived; its unfinished task was abandoned,
    // not failed.
    assert_eq!(session.archived_plans.len(), 1);
    let archived = &session.archived_plans[0];
    assert!(matches!(
        archived.task(&TaskId::new("step_1")).unwrap().status,
        TaskStatus::Failed { .. }
    ));
    assert_eq!(
        archived.task(&TaskId::new("step_2")).unwrap().status,
        TaskStatus::Superseded
    );

    // The failed attempt stays on the execution log for audit.
    assert_eq!(session.executions.len(), 3);
    assert!(!session.executions[0].success);
}

#[tokio::test]
async fn test_blocked_plan_triggers_replan() {
    // step_2 depends on a task that fails, so it can never become ready.
    // The checker must route to replanning rather than stall on it.
    let planner = Arc::new(
        ScriptedPlanner::new(vec![Plan::new(
            vec![
                task("step_1", "flaky", "break", &[]),
                task("step_2", "echo", "depends on broken {{step_1}}", &["step_1"]),
            ],
            "",
        )])
        .with_replans(vec![ReplanDecision::Revised(Plan::new(
            vec![task("retry_1", "echo", "standalone fallback", &[])],
            "",
        ))]),
    );
    let h = harness(planner, standard_registry());

    let outcome = h.scheduler.run_turn(&key("user-1"), "go").await.unwrap();
    assert_eq!(
        outcome,
        TurnOutcome::Response("ran [flaky:failed, echo:ok]".to_string())
    );
}

#[tokio::test]
async fn test_persistent_failure_hits_replan_limit() {
    // Default cap is 3 replans. Every generation fails, so the fourth
    // needed replan must surface ReplanLimitExceeded instead of looping.
    let planner = Arc::new(
        ScriptedPlanner::new(vec![Plan::new(vec![task("try_0", "flaky", "x", &[])], "")])
            .with_replans(vec![
                ReplanDecision::Revised(Plan::new(vec![task("try_1", "flaky", "x", &[])], "")),
                ReplanDecision::Revised(Plan::new(vec![task("try_2", "flaky", "x", &[])], "")),
                ReplanDecision::Revised(Plan::new(vec![task("try_3", "flaky", "x", &[])], "")),
                ReplanDecision::Revised(Plan::new(vec![task("try_4", "flaky", "x", &[])], "")),
            ]),
    );
    let h = harness(planner, standard_registry());

    let err = h.scheduler.run_turn(&key("user-1"), "go").await.unwrap_err();
    assert!(matches!(err, Error::ReplanLimitExceeded { limit: 3 }));

    // The run is audited as failed and the session is usable again.
    let events = h.audit.events().await;
    if let Some(AuditEvent::RunFinished { record }) = events.last() {
        assert_eq!(record.status, RunStatus::Failed);
        assert_eq!(record.replans, 3);
        assert!(record.error.as_deref().unwrap_or("").contains("Replan limit"));
    } else {
        panic!("Expected RunFinished last");
    }

    let session = h.store.load(&key("user-1")).await.unwrap().unwrap();
    assert!(!session.turn_in_progress());
}

#[tokio::test]
async fn test_session_recovers_after_fatal_turn() {
    let planner = Arc::new(ScriptedPlanner::new(vec![
        // Turn 1: invalid plan (unknown tool) aborts the turn.
        Plan::new(vec![task("step_1", "no-such-tool", "x", &[])], ""),
        // Turn 2: a well-formed plan completes normally.
        Plan::new(vec![task("step_2", "echo", "works", &[])], ""),
    ]));
    let h = harness(planner, standard_registry());

    let err = h.scheduler.run_turn(&key("user-1"), "first").await.unwrap_err();
    assert!(matches!(err, Error::UnknownTool { .. }));

    let outcome = h.scheduler.run_turn(&key("user-1"), "second").await.unwrap();
    assert_eq!(outcome, TurnOutcome::Response("ran [echo:ok]".to_string()));
}

#[tokio::test]
async fn test_abandon_reports_partial_progress() {
    let planner = Arc::new(
        ScriptedPlanner::new(vec![Plan::new(
            vec![
                task("step_1", "search", "gather", &[]),
                task("step_2", "flaky", "deliver {{step_1.count}}", &["step_1"]),
            ],
            "",
        )])
        .with_replans(vec![ReplanDecision::Abandon {
            reason: "delivery channel unavailable".to_string(),
        }]),
    );
    let h = harness(planner, standard_registry());

    let outcome = h.scheduler.run_turn(&key("user-1"), "go").await.unwrap();

    // The successful step and the failed step are both visible to the
    // responder; nothing unexecuted is.
    assert_eq!(
        outcome,
        TurnOutcome::Response("ran [search:ok, flaky:failed]".to_string())
    );

    let session = h.store.load(&key("user-1")).await.unwrap().unwrap();
    assert_eq!(session.retry_count, 1);
    assert!(session.plan.unwrap().any_failed());
}

#[tokio::test]
async fn test_replanner_receives_failure_context() {
    // The scripted planner's default replan message embeds the failed-task
    // count it was shown, proving failed executions reach the replanner.
    let planner = Arc::new(ScriptedPlanner::new(vec![Plan::new(
        vec![task("step_1", "flaky", "x", &[])],
        "",
    )]));
    let h = harness(planner, standard_registry());

    h.scheduler.run_turn(&key("user-1"), "go").await.unwrap();

    let events = h.audit.events().await;
    let abandoned = events.iter().any(|e| {
        matches!(
            e,
            AuditEvent::Transition { record }
                if record.phase == "responding"
                    && record.detail.as_ref().is_some_and(|d| {
                        d["reason"]
                            .as_str()
                            .is_some_and(|r| r.contains("1 failed task"))
                    })
        )
    });
    assert!(abandoned, "replanner did not see the failed task");
}
