//! Run driver: executes the state machine to `done` and projects the
//! terminal state into a result.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::core::machine::next_step;
use crate::core::state::{FixRecord, StepRecord, WorkflowState};
use crate::core::types::{
    REASON_CANCELLED, REASON_STEP_CEILING, Step, TerminalReason, terminal_reason,
};
use crate::io::collab::Collaborators;
use crate::io::config::SelfhealConfig;
use crate::io::http::http_collaborators;
use crate::steps;

/// Cooperative cancellation flag, observed between steps only (no step is
/// ever preempted). A cancelled run still drains through archival.
#[derive(Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Terminal projection of one run. The caller can always render attempts,
/// history, and final code regardless of success or give-up.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunResult {
    pub final_code: String,
    pub validated: bool,
    /// Exactly one taxonomy outcome explains every terminal state.
    pub reason: TerminalReason,
    pub errors: Vec<String>,
    pub validation_issues: Vec<String>,
    pub validation_warnings: Vec<String>,
    pub attempts: u32,
    pub max_attempts: u32,
    pub giveup_reason: Option<String>,
    pub program_output: String,
    pub references: BTreeMap<String, Value>,
    pub learned_patterns: BTreeMap<String, u32>,
    pub fix_log: Vec<FixRecord>,
    pub history: Vec<StepRecord>,
}

/// Drives workflow runs against an injected collaborator bundle.
///
/// Re-entrant: each call to [`Driver::run`] owns an independent
/// `WorkflowState`, so one driver may serve concurrent runs.
pub struct Driver {
    collaborators: Collaborators,
    config: SelfhealConfig,
}

impl Driver {
    pub fn new(collaborators: Collaborators, config: SelfhealConfig) -> Self {
        Self {
            collaborators,
            config,
        }
    }

    /// Driver wired to the configured HTTP collaborator services.
    pub fn from_config(config: SelfhealConfig) -> Result<Self> {
        let collaborators = http_collaborators(&config)?;
        Ok(Self::new(collaborators, config))
    }

    pub fn config(&self) -> &SelfhealConfig {
        &self.config
    }

    /// Run one workflow to completion. Never panics, never returns an
    /// error: every outcome is a `RunResult`.
    pub fn run(&self, task: &str, max_attempts: u32) -> RunResult {
        self.run_with_cancel(task, max_attempts, &CancelToken::new())
    }

    /// Like [`Driver::run`], checking `cancel` between steps.
    pub fn run_with_cancel(
        &self,
        task: &str,
        max_attempts: u32,
        cancel: &CancelToken,
    ) -> RunResult {
        // max_attempts must be positive; a zero budget would exhaust before
        // the first repair could run.
        let max_attempts = max_attempts.max(1);
        let mut state = WorkflowState::new(task, max_attempts);
        let mut step = Step::Generate;
        let mut executed = 0u32;
        info!(max_attempts, "starting workflow run");

        while !step.is_terminal() {
            // The drain path (give_up → archive → learn) is exempt from the
            // ceiling and cancellation so partial progress is always
            // recorded; it is loop-free and reaches done in three steps.
            if !on_drain_path(step) {
                if cancel.is_cancelled() {
                    state.give_up(REASON_CANCELLED);
                    step = Step::GiveUp;
                    continue;
                }
                if executed >= self.config.step_limit {
                    warn!(
                        step_limit = self.config.step_limit,
                        "step ceiling reached; forcing give-up"
                    );
                    state.give_up(REASON_STEP_CEILING);
                    step = Step::GiveUp;
                    continue;
                }
            }
            executed += 1;
            debug!(step = %step, executed, "executing step");
            state = steps::execute(step, state, &self.collaborators, &self.config);
            (step, state) = next_step(step, state);
        }

        info!(
            validated = state.validated,
            attempts = state.attempts,
            "workflow run finished"
        );
        project(state)
    }
}

fn on_drain_path(step: Step) -> bool {
    matches!(step, Step::GiveUp | Step::Archive | Step::Learn)
}

fn project(state: WorkflowState) -> RunResult {
    let reason = terminal_reason(state.validated, state.giveup_reason.as_deref());
    RunResult {
        final_code: state.candidate_code,
        validated: state.validated,
        reason,
        errors: state.errors,
        validation_issues: state.validation_issues,
        validation_warnings: state.validation_warnings,
        attempts: state.attempts,
        max_attempts: state.max_attempts,
        giveup_reason: state.giveup_reason,
        program_output: state.program_output,
        references: state.references,
        learned_patterns: state.learned_patterns,
        fix_log: state.fix_log,
        history: state.history,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{ScriptedGenerator, collaborators};

    #[test]
    fn cancel_token_latches() {
        let token = CancelToken::new();
        assert!(!token.is_cancelled());
        token.cancel();
        assert!(token.is_cancelled());
        let clone = token.clone();
        assert!(clone.is_cancelled());
    }

    #[test]
    fn zero_max_attempts_is_clamped_to_one() {
        let driver = Driver::new(
            collaborators(ScriptedGenerator::returning("print('hi')")),
            SelfhealConfig::default(),
        );
        let result = driver.run("print hi", 0);
        assert_eq!(result.max_attempts, 1);
        assert!(result.validated);
    }
}
