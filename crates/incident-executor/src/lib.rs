//! SOP Executor: runs a chosen `SOPCandidate`'s steps in order, dispatching
//! `auto_executable` steps to registered action handlers and suspending
//! non-auto steps until an external `complete_step` call arrives. A failed
//! step with a declared rollback triggers that rollback before the remaining
//! steps are skipped (§4.8).

mod executor;

pub use executor::DefaultSopExecutor;

use async_trait::async_trait;
use incident_common::{ApprovalToken, ExecutionResult, Result, RunMode, SOPCandidate, StepOutcome};

#[async_trait]
pub trait SopExecutor: Send + Sync {
    async fn execute(
        &self,
        sop: SOPCandidate,
        approval_token: Option<ApprovalToken>,
        mode: RunMode,
    ) -> Result<ExecutionResult>;

    /// Resolves a non-auto-executable step that is blocked waiting on an
    /// external actor (§4.8: "non-auto steps mark status=pending and wait
    /// for an external CompleteStep call").
    async fn complete_step(&self, sop_id: &str, step_id: &str, outcome: StepOutcome) -> Result<()>;
}
