use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use incident_common::ports::ActionHandler;
use incident_common::{ActionId, ApprovalStatus, ApprovalToken, Config, Error, ExecutionResult, Result, RunMode, SOPCandidate, StepOutcome, StepStatus};
use tokio::sync::oneshot;
use tokio::time::{timeout, Duration};
use tracing::{debug, info, warn};

use crate::SopExecutor;

pub struct DefaultSopExecutor {
    config: Arc<Config>,
    handlers: HashMap<ActionId, Arc<dyn ActionHandler>>,
    pending_steps: DashMap<(String, String), oneshot::Sender<StepOutcome>>,
}

impl DefaultSopExecutor {
    pub fn new(config: Arc<Config>, handlers: HashMap<ActionId, Arc<dyn ActionHandler>>) -> Self {
        Self {
            config,
            handlers,
            pending_steps: DashMap::new(),
        }
    }

    async fn run_step(
        &self,
        sop_id: &str,
        step: &mut incident_common::SOPStep,
        dry: bool,
    ) -> Result<StepOutcome> {
        step.started_at = Some(incident_common::utils::current_timestamp());
        step.status = StepStatus::Running;

        let outcome = if step.auto_executable {
            self.invoke_handler(&step.action_id, &step.parameters, dry).await
        } else {
            self.await_external_completion(sop_id, &step.id).await
        };

        step.ended_at = Some(incident_common::utils::current_timestamp());
        step.status = match &outcome {
            Ok(o) if o.ok => StepStatus::Done,
            Ok(_) => StepStatus::Failed,
            Err(_) => StepStatus::Failed,
        };

        outcome
    }

    async fn invoke_handler(
        &self,
        action_id: &ActionId,
        params: &HashMap<String, serde_json::Value>,
        dry: bool,
    ) -> Result<StepOutcome> {
        let handler = self
            .handlers
            .get(action_id)
            .ok_or_else(|| Error::UnknownAction(action_id.clone()))?;

        let attempt = timeout(
            Duration::from_millis(self.config.executor.step_timeout_ms),
            handler.invoke(params, dry),
        )
        .await;

        match attempt {
            Ok(Ok(outcome)) => Ok(StepOutcome {
                step_id: action_id.clone(),
                ok: outcome.ok,
                output: outcome.output,
                error: outcome.error,
            }),
            Ok(Err(e)) => Err(Error::ActionFailed(e.to_string())),
            Err(_) => Err(Error::Timeout(format!("action {action_id} timed out"))),
        }
    }

    async fn await_external_completion(&self, sop_id: &str, step_id: &str) -> Result<StepOutcome> {
        let (tx, rx) = oneshot::channel();
        let key = (sop_id.to_string(), step_id.to_string());
        self.pending_steps.insert(key.clone(), tx);

        debug!(sop_id, step_id, "executor: awaiting external CompleteStep call");
        let result = timeout(Duration::from_millis(self.config.executor.step_timeout_ms), rx).await;
        self.pending_steps.remove(&key);

        match result {
            Ok(Ok(outcome)) => Ok(outcome),
            Ok(Err(_)) => Err(Error::Execution(format!("step {step_id} sender dropped"))),
            Err(_) => Err(Error::Timeout(format!("step {step_id} never completed externally"))),
        }
    }

    async fn run_rollback(&self, rollback: &incident_common::RollbackSpec) -> Result<()> {
        let handler = self
            .handlers
            .get(&rollback.action_id)
            .ok_or_else(|| Error::UnknownAction(rollback.action_id.clone()))?;

        let attempt = timeout(
            Duration::from_millis(self.config.executor.rollback_timeout_ms),
            handler.invoke(&rollback.parameters, false),
        )
        .await;

        match attempt {
            Ok(Ok(outcome)) if outcome.ok => Ok(()),
            Ok(Ok(outcome)) => Err(Error::RollbackFailed(
                outcome.error.unwrap_or_else(|| "rollback handler reported failure".to_string()),
            )),
            Ok(Err(e)) => Err(Error::RollbackFailed(e.to_string())),
            Err(_) => Err(Error::RollbackFailed("rollback timed out".to_string())),
        }
    }
}

#[async_trait]
impl SopExecutor for DefaultSopExecutor {
    async fn execute(
        &self,
        mut sop: SOPCandidate,
        approval_token: Option<ApprovalToken>,
        mode: RunMode,
    ) -> Result<ExecutionResult> {
        if sop.execution_mode == incident_common::ExecutionMode::ApprovalRequired {
            match &approval_token {
                Some(token) if token.status == ApprovalStatus::Approved => {}
                Some(token) => {
                    return Err(Error::Safety(format!(
                        "approval token {} not in approved state ({:?})",
                        token.token_id, token.status
                    )))
                }
                None => return Err(Error::Safety("approval-required sop has no token".to_string())),
            }
        }

        let dry = mode == RunMode::DryRun;
        info!(sop_id = %sop.sop_id, ?mode, "executor: starting sop execution");

        let mut outcomes = Vec::with_capacity(sop.steps.len());
        let mut rolled_back = false;
        let mut ok = true;

        for idx in 0..sop.steps.len() {
            let step_id = sop.steps[idx].id.clone();
            let rollback = sop.steps[idx].rollback.clone();

            let outcome = self.run_step(&sop.sop_id, &mut sop.steps[idx], dry).await;

            match outcome {
                Ok(step_outcome) if step_outcome.ok => {
                    outcomes.push(step_outcome);
                }
                Ok(step_outcome) => {
                    warn!(sop_id = %sop.sop_id, %step_id, "executor: step reported failure");
                    outcomes.push(step_outcome);
                    ok = false;
                    if let Some(rollback) = rollback {
                        match self.run_rollback(&rollback).await {
                            Ok(()) => {
                                rolled_back = true;
                                debug!(sop_id = %sop.sop_id, %step_id, "executor: rollback succeeded");
                            }
                            Err(e) => {
                                warn!(sop_id = %sop.sop_id, %step_id, "executor: rollback failed: {e}");
                                return Ok(ExecutionResult {
                                    sop_id: sop.sop_id.clone(),
                                    mode,
                                    step_outcomes: outcomes,
                                    rolled_back: false,
                                    ok: false,
                                });
                            }
                        }
                    }
                    break;
                }
                Err(e) => {
                    warn!(sop_id = %sop.sop_id, %step_id, "executor: step errored: {e}");
                    outcomes.push(StepOutcome {
                        step_id: step_id.clone(),
                        ok: false,
                        output: None,
                        error: Some(e.to_string()),
                    });
                    ok = false;
                    if let Some(rollback) = rollback {
                        if self.run_rollback(&rollback).await.is_ok() {
                            rolled_back = true;
                        }
                    }
                    break;
                }
            }
        }

        Ok(ExecutionResult {
            sop_id: sop.sop_id,
            mode,
            step_outcomes: outcomes,
            rolled_back,
            ok,
        })
    }

    async fn complete_step(&self, sop_id: &str, step_id: &str, outcome: StepOutcome) -> Result<()> {
        let key = (sop_id.to_string(), step_id.to_string());
        match self.pending_steps.remove(&key) {
            Some((_, sender)) => {
                let _ = sender.send(outcome);
                Ok(())
            }
            None => Err(Error::InvalidRequest(format!(
                "no pending step {step_id} for sop {sop_id}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use incident_common::ports::ActionOutcome;
    use incident_common::{RollbackSpec, SOPStep};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingHandler {
        calls: Arc<AtomicUsize>,
        ok: bool,
    }

    #[async_trait]
    impl ActionHandler for CountingHandler {
        async fn invoke(&self, _params: &HashMap<String, serde_json::Value>, _dry: bool) -> Result<ActionOutcome> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(ActionOutcome {
                ok: self.ok,
                output: None,
                error: if self.ok { None } else { Some("boom".to_string()) },
            })
        }
    }

    fn step(id: &str, action_id: &str, rollback: Option<RollbackSpec>) -> SOPStep {
        SOPStep {
            id: id.to_string(),
            description: "test step".to_string(),
            action_id: action_id.to_string(),
            parameters: HashMap::new(),
            auto_executable: true,
            rollback,
            status: StepStatus::Pending,
            started_at: None,
            ended_at: None,
        }
    }

    fn candidate(steps: Vec<SOPStep>) -> SOPCandidate {
        SOPCandidate {
            sop_id: "sop-1".to_string(),
            name: "restart".to_string(),
            description: "test".to_string(),
            estimated_duration_seconds: 10,
            steps,
            risk_level: incident_common::RiskLevel::L1,
            execution_mode: incident_common::ExecutionMode::Auto,
            matched_triggers: vec![],
        }
    }

    #[tokio::test]
    async fn all_steps_succeed_in_order() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut handlers: HashMap<ActionId, Arc<dyn ActionHandler>> = HashMap::new();
        handlers.insert(
            "restart_instance".to_string(),
            Arc::new(CountingHandler { calls: calls.clone(), ok: true }),
        );

        let executor = DefaultSopExecutor::new(Arc::new(Config::default()), handlers);
        let result = executor
            .execute(
                candidate(vec![step("s1", "restart_instance", None), step("s2", "restart_instance", None)]),
                None,
                RunMode::Live,
            )
            .await
            .unwrap();

        assert!(result.ok);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(result.step_outcomes.len(), 2);
    }

    #[tokio::test]
    async fn failed_step_triggers_rollback_and_halts() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut handlers: HashMap<ActionId, Arc<dyn ActionHandler>> = HashMap::new();
        handlers.insert(
            "restart_instance".to_string(),
            Arc::new(CountingHandler { calls: calls.clone(), ok: false }),
        );
        handlers.insert(
            "rollback_restart".to_string(),
            Arc::new(CountingHandler { calls: calls.clone(), ok: true }),
        );

        let rollback = RollbackSpec {
            action_id: "rollback_restart".to_string(),
            parameters: HashMap::new(),
        };

        let executor = DefaultSopExecutor::new(Arc::new(Config::default()), handlers);
        let result = executor
            .execute(
                candidate(vec![
                    step("s1", "restart_instance", Some(rollback)),
                    step("s2", "restart_instance", None),
                ]),
                None,
                RunMode::Live,
            )
            .await
            .unwrap();

        assert!(!result.ok);
        assert!(result.rolled_back);
        assert_eq!(result.step_outcomes.len(), 1, "the second step must never run");
    }

    #[tokio::test]
    async fn unknown_action_id_fails_the_step() {
        let handlers: HashMap<ActionId, Arc<dyn ActionHandler>> = HashMap::new();
        let executor = DefaultSopExecutor::new(Arc::new(Config::default()), handlers);

        let result = executor
            .execute(candidate(vec![step("s1", "nonexistent_action", None)]), None, RunMode::Live)
            .await
            .unwrap();

        assert!(!result.ok);
        assert_eq!(result.step_outcomes[0].error.as_deref(), Some("unknown action: nonexistent_action"));
    }

    #[tokio::test]
    async fn non_auto_step_waits_for_external_completion() {
        let handlers: HashMap<ActionId, Arc<dyn ActionHandler>> = HashMap::new();
        let executor = Arc::new(DefaultSopExecutor::new(Arc::new(Config::default()), handlers));

        let mut pending_step = step("s1", "manual_action", None);
        pending_step.auto_executable = false;

        let exec_clone = executor.clone();
        let run = tokio::spawn(async move {
            exec_clone.execute(candidate(vec![pending_step]), None, RunMode::Live).await
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        executor
            .complete_step(
                "sop-1",
                "s1",
                StepOutcome {
                    step_id: "s1".to_string(),
                    ok: true,
                    output: None,
                    error: None,
                },
            )
            .await
            .unwrap();

        let result = run.await.unwrap().unwrap();
        assert!(result.ok);
    }
}
