//! The turn scheduler: plan, execute, check, replan, respond.
//!
//! One scheduler instance serves any number of sessions; each call to
//! [`Scheduler::run_turn`] drives a single session turn to completion.
//! Within a turn, task dispatch is strictly sequential (exactly one task
//! per Executing entry, with plan insertion order breaking ties) because a
//! later task's input may reference fresh results. Turns for different
//! sessions may run concurrently; the scheduler holds no per-session state
//! between calls.
//!
//! The session snapshot is checkpointed after every phase transition, so a
//! crash mid-turn resumes from the last completed task instead of restarting
//! the plan. A checkpoint write failure aborts the turn without advancing
//! past the last durable state.

use chrono::Utc;
use serde_json::json;
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::adapter::{
    PlanRequest, Planner, ReplanDecision, ReplanRequest, RespondRequest, Responder, ToolRegistry,
};
use crate::audit::{
    AuditEvent, AuditSink, DecisionRecord, MemoryAuditSink, RunId, RunRecord, RunStatus,
    TransitionRecord,
};
use crate::config::Config;
use crate::core::execution::{Execution, ToolOutcome};
use crate::core::plan::Plan;
use crate::core::resolver::next_ready;
use crate::core::task::TaskId;
use crate::error::{Error, Result};
use crate::orchestration::checker::{self, Verdict};
use crate::orchestration::phase::{TurnPhase, TurnState};
use crate::session::{Session, SessionKey, TurnOutcome};
use crate::store::CheckpointStore;
use crate::template;
use crate::{rlog, rlog_debug, rlog_error, rlog_warn};

const INTERRUPTED_TASK_ERROR: &str = "interrupted before its outcome was recorded";
const FALLBACK_CLARIFICATION: &str = "Could you share more detail about what you need?";

/// Drives session turns against pluggable planner, tools, responder,
/// and checkpoint store.
pub struct Scheduler {
    planner: Arc<dyn Planner>,
    responder: Arc<dyn Responder>,
    tools: ToolRegistry,
    store: Arc<dyn CheckpointStore>,
    audit: Arc<dyn AuditSink>,
    config: Config,
    cancel: CancellationToken,
}

impl Scheduler {
    /// Create a scheduler with default config and an in-memory audit sink.
    pub fn new(
        planner: Arc<dyn Planner>,
        responder: Arc<dyn Responder>,
        tools: ToolRegistry,
        store: Arc<dyn CheckpointStore>,
    ) -> Self {
        Self {
            planner,
            responder,
            tools,
            store,
            audit: Arc::new(MemoryAuditSink::new()),
            config: Config::default(),
            cancel: CancellationToken::new(),
        }
    }

    /// Override the configuration.
    pub fn with_config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    /// Route audit events to a custom sink.
    pub fn with_audit(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = audit;
        self
    }

    /// Use an externally owned cancellation token.
    ///
    /// Cancellation is observed between task dispatches; the last completed
    /// checkpoint stays valid and resumable.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// A handle to this scheduler's cancellation token.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Run one session turn to completion.
    ///
    /// Loads (or creates) the session for `key`, plans, executes until the
    /// checker reaches a terminal verdict, and returns the final response or
    /// clarification question. If the session has a checkpointed turn still
    /// in progress for the same message, the turn resumes from the last
    /// durable transition instead of re-planning.
    pub async fn run_turn(&self, key: &SessionKey, user_message: &str) -> Result<TurnOutcome> {
        let mut session = match self.store.load(key).await? {
            Some(session) => session,
            None => {
                rlog_debug!("creating session key={}", key);
                Session::new(key.clone())
            }
        };

        let resuming = session.turn_in_progress() && session.user_message == user_message;
        let run_id = if resuming {
            let run_id = session.run_id.unwrap_or_default();
            rlog_warn!(
                "resuming interrupted turn session={} run={} phase={:?}",
                key,
                run_id.short(),
                session.turn.as_ref().map(TurnState::phase)
            );
            self.recover_interrupted(&mut session, run_id);
            run_id
        } else {
            if session.turn_in_progress() {
                // A newer message supersedes the stalled turn wholesale.
                rlog_warn!("abandoning stalled turn session={} for new message", key);
                session.abort_turn();
            }
            let run_id = RunId::new();
            rlog!("turn start session={} run={}", key, run_id.short());
            session.begin_turn(run_id, user_message);
            self.checkpoint(&mut session).await?;
            let record = RunRecord::started(run_id, key.clone(), user_message);
            self.emit_audit(AuditEvent::RunStarted { record }).await;
            run_id
        };

        match self.drive(&mut session, run_id).await {
            Ok(outcome) => {
                let status = if outcome.is_clarification() {
                    RunStatus::Clarified
                } else {
                    RunStatus::Completed
                };
                self.finish_run(&session, run_id, status, None).await;
                rlog!(
                    "turn done session={} run={} status={}",
                    key,
                    run_id.short(),
                    status
                );
                Ok(outcome)
            }
            Err(err) => {
                rlog_error!(
                    "turn failed session={} run={} error={}",
                    key,
                    run_id.short(),
                    err
                );
                self.finish_run(&session, run_id, RunStatus::Failed, Some(err.to_string()))
                    .await;
                // Close the turn so the session stays usable; if even this
                // save fails, the previous durable checkpoint stands.
                session.abort_turn();
                session.touch();
                if let Err(save_err) = self.store.save(&session).await {
                    rlog_warn!("could not persist aborted turn: {}", save_err);
                }
                Err(err)
            }
        }
    }

    /// The phase loop. Every arm transitions, checkpoints, and comes back
    /// around until a terminal phase returns.
    async fn drive(&self, session: &mut Session, run_id: RunId) -> Result<TurnOutcome> {
        loop {
            if self.cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }

            let phase = session
                .turn
                .as_ref()
                .map(TurnState::phase)
                .ok_or_else(|| Error::CorruptSnapshot("turn state missing".to_string()))?;

            match phase {
                TurnPhase::Planning => self.run_planning(session, run_id).await?,
                TurnPhase::Checking => self.run_checking(session, run_id).await?,
                TurnPhase::Executing => self.run_executing(session, run_id).await?,
                TurnPhase::Replanning => self.run_replanning(session, run_id).await?,
                TurnPhase::Clarifying => {
                    return self.finish_clarifying(session, run_id).await;
                }
                TurnPhase::Responding => {
                    return self.finish_responding(session, run_id).await;
                }
                TurnPhase::Complete => {
                    // Resumed a turn that had already finished before the
                    // caller saw the outcome.
                    let text = session
                        .final_response
                        .clone()
                        .ok_or_else(|| Error::CorruptSnapshot("completed turn has no response".to_string()))?;
                    let was_clarification = session
                        .plan
                        .as_ref()
                        .map(|p| p.needs_clarification)
                        .unwrap_or(false);
                    return Ok(if was_clarification {
                        TurnOutcome::Clarification(text)
                    } else {
                        TurnOutcome::Response(text)
                    });
                }
            }
        }
    }

    async fn run_planning(&self, session: &mut Session, run_id: RunId) -> Result<()> {
        let plan = {
            let request = PlanRequest {
                user_message: session.user_message.as_str(),
                history: session.history_window(self.config.history_window),
                catalog: self.tools.catalog(),
                now: Utc::now(),
            };
            self.with_timeout(self.planner.plan(request)).await?
        };

        self.emit_audit(AuditEvent::PlannerDecision {
            record: DecisionRecord::new(run_id, &plan),
        })
        .await;

        if plan.needs_clarification {
            rlog!(
                "planner asked for clarification session={} run={}",
                session.key,
                run_id.short()
            );
            session.replace_plan(plan);
            return self
                .advance(session, run_id, TurnPhase::Clarifying, "planner needs input", None)
                .await;
        }

        self.accept_plan(session, &plan)?;
        rlog!(
            "plan accepted session={} run={} tasks={}",
            session.key,
            run_id.short(),
            plan.tasks.len()
        );
        session.replace_plan(plan);
        self.advance(session, run_id, TurnPhase::Checking, "plan accepted", None)
            .await
    }

    async fn run_checking(&self, session: &mut Session, run_id: RunId) -> Result<()> {
        let plan = session
            .plan
            .as_ref()
            .ok_or_else(|| Error::CorruptSnapshot("checking without an active plan".to_string()))?;
        let verdict = checker::evaluate(plan, &session.executions);
        let summary = checker::summarize(plan);
        rlog_debug!(
            "check session={} run={} verdict={} ({})",
            session.key,
            run_id.short(),
            verdict,
            summary
        );

        let detail = Some(json!({ "verdict": verdict.to_string() }));
        match verdict {
            Verdict::AllDone => {
                self.advance(session, run_id, TurnPhase::Responding, &summary, detail)
                    .await
            }
            Verdict::HasPending => {
                self.advance(session, run_id, TurnPhase::Executing, &summary, detail)
                    .await
            }
            Verdict::NeedsReplan => {
                if session.retry_count >= self.config.replan_limit {
                    return Err(Error::ReplanLimitExceeded {
                        limit: self.config.replan_limit,
                    });
                }
                self.advance(session, run_id, TurnPhase::Replanning, &summary, detail)
                    .await
            }
        }
    }

    /// Dispatch exactly one ready task, then hand control back to Checking.
    async fn run_executing(&self, session: &mut Session, run_id: RunId) -> Result<()> {
        let next = {
            let plan = session.plan.as_ref().ok_or_else(|| {
                Error::CorruptSnapshot("executing without an active plan".to_string())
            })?;
            next_ready(&plan.tasks, &session.executions)
                .map(|t| (t.id.clone(), t.tool.clone(), t.description.clone()))
        };

        // The checker only routes here on HasPending; an empty answer means
        // the world changed under us, so just re-check.
        if let Some((task_id, tool_name, description)) = next {
            self.dispatch(session, run_id, task_id, &tool_name, &description)
                .await?;
        }

        self.advance(session, run_id, TurnPhase::Checking, "task settled", None)
            .await
    }

    async fn dispatch(
        &self,
        session: &mut Session,
        run_id: RunId,
        task_id: TaskId,
        tool_name: &str,
        description: &str,
    ) -> Result<()> {
        let resolved = template::resolve_references(&task_id, description, &session.executions)?;

        let executor = self.tools.get(tool_name).ok_or_else(|| Error::UnknownTool {
            task: task_id.clone(),
            tool: tool_name.to_string(),
        })?;

        // Durably mark the task running before the side effect happens, so
        // a crash mid-dispatch is distinguishable from "never started".
        if let Some(task) = session.plan.as_mut().and_then(|p| p.task_mut(&task_id)) {
            task.start();
        }
        self.checkpoint(session).await?;

        rlog!(
            "dispatch session={} run={} task={} tool={}",
            session.key,
            run_id.short(),
            task_id,
            tool_name
        );
        let started = Utc::now();
        let timeout = self.config.adapter_timeout();
        let outcome = match tokio::time::timeout(timeout, executor.execute(&resolved)).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(err)) => {
                rlog_warn!("tool {} errored: {}", tool_name, err);
                ToolOutcome::failure(&err.to_string())
            }
            Err(_) => {
                rlog_warn!("tool {} timed out after {:?}", tool_name, timeout);
                ToolOutcome::failure(&format!("tool '{}' timed out after {:?}", tool_name, timeout))
            }
        };

        let execution = Execution::record(task_id.clone(), tool_name, &resolved, outcome, started);
        self.emit_audit(AuditEvent::Execution {
            run_id,
            execution: execution.clone(),
        })
        .await;

        let success = execution.success;
        let error = execution.error.clone();
        session.record_execution(execution);
        if let Some(task) = session.plan.as_mut().and_then(|p| p.task_mut(&task_id)) {
            if success {
                task.complete();
            } else {
                task.fail(error.as_deref().unwrap_or("tool reported failure"));
            }
        }

        if success {
            rlog!("task {} done", task_id);
        } else {
            rlog_warn!("task {} failed: {}", task_id, error.unwrap_or_default());
        }
        Ok(())
    }

    async fn run_replanning(&self, session: &mut Session, run_id: RunId) -> Result<()> {
        let decision = {
            let plan = session.plan.as_ref().ok_or_else(|| {
                Error::CorruptSnapshot("replanning without an active plan".to_string())
            })?;
            let request = ReplanRequest {
                user_message: session.user_message.as_str(),
                history: session.history_window(self.config.history_window),
                catalog: self.tools.catalog(),
                plan,
                executions: &session.executions,
                now: Utc::now(),
            };
            self.with_timeout(self.planner.replan(request)).await?
        };

        session.retry_count += 1;

        match decision {
            ReplanDecision::Revised(plan) => {
                self.emit_audit(AuditEvent::PlannerDecision {
                    record: DecisionRecord::new(run_id, &plan),
                })
                .await;
                self.accept_plan(session, &plan)?;
                rlog!(
                    "replan {} accepted session={} run={} tasks={}",
                    session.retry_count,
                    session.key,
                    run_id.short(),
                    plan.tasks.len()
                );
                session.replace_plan(plan);
                self.advance(session, run_id, TurnPhase::Checking, "plan revised", None)
                    .await
            }
            ReplanDecision::Abandon { reason } => {
                rlog_warn!(
                    "replan abandoned session={} run={}: {}",
                    session.key,
                    run_id.short(),
                    reason
                );
                // The goal is out of reach; fail what never ran so the final
                // plan reads honestly, then answer from recorded executions.
                if let Some(plan) = session.plan.as_mut() {
                    for task in &mut plan.tasks {
                        if !task.is_terminal() {
                            task.fail(&reason);
                        }
                    }
                }
                self.advance(
                    session,
                    run_id,
                    TurnPhase::Responding,
                    "replan abandoned",
                    Some(json!({ "reason": reason })),
                )
                .await
            }
        }
    }

    async fn finish_clarifying(
        &self,
        session: &mut Session,
        run_id: RunId,
    ) -> Result<TurnOutcome> {
        let question = session
            .plan
            .as_ref()
            .and_then(|p| p.clarification_question.clone())
            .or_else(|| session.final_response.clone())
            .unwrap_or_else(|| FALLBACK_CLARIFICATION.to_string());

        session.final_response = Some(question.clone());
        session.push_assistant(&question);
        self.advance(session, run_id, TurnPhase::Complete, "clarification sent", None)
            .await?;
        Ok(TurnOutcome::Clarification(question))
    }

    async fn finish_responding(&self, session: &mut Session, run_id: RunId) -> Result<TurnOutcome> {
        let text = {
            let plan = session.plan.as_ref().ok_or_else(|| {
                Error::CorruptSnapshot("responding without an active plan".to_string())
            })?;
            // Only what actually ran this turn: the response can never claim
            // actions that did not happen.
            let executions: Vec<Execution> =
                session.run_executions().into_iter().cloned().collect();
            let request = RespondRequest {
                user_message: session.user_message.as_str(),
                history: session.history_window(self.config.history_window),
                executions: &executions,
                plan,
            };
            self.with_timeout(self.responder.respond(request)).await?
        };

        session.final_response = Some(text.clone());
        session.push_assistant(&text);
        self.advance(session, run_id, TurnPhase::Complete, "response sent", None)
            .await?;
        Ok(TurnOutcome::Response(text))
    }

    /// Structural acceptance gate for planner output.
    ///
    /// Plan validation plus two scheduler-level checks: every tool must be
    /// registered, and no task id may collide with an execution from an
    /// earlier plan generation of this session.
    fn accept_plan(&self, session: &Session, plan: &Plan) -> Result<()> {
        plan.validate()?;

        for task in &plan.tasks {
            if !self.tools.contains(&task.tool) {
                return Err(Error::UnknownTool {
                    task: task.id.clone(),
                    tool: task.tool.clone(),
                });
            }
        }

        let executed = session.executed_ids();
        for task in &plan.tasks {
            if executed.contains(&task.id) {
                return Err(Error::ReusedTaskId {
                    id: task.id.clone(),
                });
            }
        }

        Ok(())
    }

    /// Fail any task checkpointed as Running with no recorded outcome.
    ///
    /// The tool may or may not have performed its side effect, so the task
    /// is never re-dispatched; replanning decides whether a retry is safe.
    fn recover_interrupted(&self, session: &mut Session, run_id: RunId) {
        let executed = session
            .executions
            .iter()
            .map(|e| e.task_id.clone())
            .collect::<std::collections::HashSet<_>>();

        if let Some(plan) = session.plan.as_mut() {
            for task in &mut plan.tasks {
                let running = matches!(task.status, crate::core::task::TaskStatus::Running);
                if running && !executed.contains(&task.id) {
                    rlog_warn!(
                        "task {} was running at crash; marking failed run={}",
                        task.id,
                        run_id.short()
                    );
                    task.fail(INTERRUPTED_TASK_ERROR);
                }
            }
        }
    }

    /// Transition the turn, audit the edge, and checkpoint the snapshot.
    ///
    /// A failed checkpoint save aborts the turn here, before any further
    /// side effects can happen.
    async fn advance(
        &self,
        session: &mut Session,
        run_id: RunId,
        target: TurnPhase,
        message: &str,
        detail: Option<serde_json::Value>,
    ) -> Result<()> {
        session
            .turn
            .as_mut()
            .ok_or_else(|| Error::CorruptSnapshot("turn state missing".to_string()))?
            .transition(target)?;

        let mut record = TransitionRecord::new(run_id, &target.to_string(), message);
        if let Some(detail) = detail {
            record = record.with_detail(detail);
        }
        self.emit_audit(AuditEvent::Transition { record }).await;

        self.checkpoint(session).await
    }

    async fn checkpoint(&self, session: &mut Session) -> Result<()> {
        session.touch();
        self.store.save(session).await
    }

    async fn finish_run(
        &self,
        session: &Session,
        run_id: RunId,
        status: RunStatus,
        error: Option<String>,
    ) {
        let run_executions = session.run_executions();
        let mut record = RunRecord::started(run_id, session.key.clone(), &session.user_message);
        record.started_at = session
            .turn
            .as_ref()
            .and_then(|t| t.phase_history().first().map(|e| e.entered_at))
            .unwrap_or(record.started_at);
        record.final_response = session.final_response.clone();
        record.error = error;
        record.tasks_planned = session.plan.as_ref().map(|p| p.tasks.len()).unwrap_or(0);
        record.tasks_executed = run_executions.len();
        record.tasks_failed = run_executions.iter().filter(|e| !e.success).count();
        record.replans = session.retry_count;
        record.finish(status);
        self.emit_audit(AuditEvent::RunFinished { record }).await;
    }

    /// Audit is observability, not the checkpoint: failures are logged and
    /// absorbed.
    async fn emit_audit(&self, event: AuditEvent) {
        if let Err(err) = self.audit.append(event).await {
            rlog_warn!("audit append failed: {}", err);
        }
    }

    async fn with_timeout<T>(&self, fut: impl Future<Output = Result<T>>) -> Result<T> {
        let timeout = self.config.adapter_timeout();
        match tokio::time::timeout(timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout(timeout)),
        }
    }
}
