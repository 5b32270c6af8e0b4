//! Shared deterministic types for the workflow core.
//!
//! These types define stable contracts between core components. They should
//! not depend on external state or I/O and must remain deterministic across
//! runs.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Give-up reason recorded when the repair step returns byte-identical code.
pub const REASON_NO_CHANGE: &str = "no_change_from_fixer";
/// Give-up reason recorded when the diagnosis-cycle ceiling is exceeded.
pub const REASON_LOOP_GUARD: &str = "loop_guard_tripped";
/// Give-up reason recorded when a run is cancelled between steps.
pub const REASON_CANCELLED: &str = "cancelled";
/// Give-up reason recorded when the driver's hard step ceiling trips.
pub const REASON_STEP_CEILING: &str = "step_ceiling_exceeded";

/// Suffix shared by all infrastructure give-up reasons (`{service}_error: ..`).
const INFRA_MARKER: &str = "_error:";

/// Format the give-up reason for a broken collaborator.
pub fn infra_reason(service: &str, message: &str) -> String {
    format!("{service}{INFRA_MARKER} {message}")
}

/// Orchestrator step. `Generate` is the sole entry step, `Done` the sole
/// terminal step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    Generate,
    Analyze,
    Fix,
    Bump,
    Validate,
    Archive,
    Learn,
    GiveUp,
    Done,
}

impl Step {
    /// Whether the machine has nothing left to run after this step.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done)
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Generate => "generate",
            Self::Analyze => "analyze",
            Self::Fix => "fix",
            Self::Bump => "bump",
            Self::Validate => "validate",
            Self::Archive => "archive",
            Self::Learn => "learn",
            Self::GiveUp => "give_up",
            Self::Done => "done",
        };
        f.write_str(name)
    }
}

/// Three-way classification of a collaborator's raw result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    /// No failure signal present.
    Ok,
    /// A problem with the candidate code; retryable, consumes attempt budget.
    Defect(String),
    /// The collaborator itself is broken; never retried within a run.
    InfraFailure(String),
}

/// Outcome of a single repair attempt, one entry per `fix` step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FixStatus {
    /// The fixer returned changed code.
    Ok,
    /// The fixer returned byte-identical code.
    NoChange,
    /// There was no defect to fix.
    Skipped,
    /// The fixer collaborator failed.
    Failed,
}

/// Exactly one of these explains every terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminalReason {
    /// The candidate passed tests and validation.
    Validated,
    /// Attempts were consumed with no validated result.
    BudgetExhausted,
    /// A collaborator was broken or unreachable.
    InfraFailure,
    /// The repair loop stopped making progress.
    NonConvergence,
    /// The caller cancelled the run between steps.
    Cancelled,
}

/// Map a terminal `WorkflowState` onto the failure taxonomy.
///
/// `giveup_reason` strings are produced exclusively by this crate (the
/// `REASON_*` constants and [`infra_reason`]), so matching on them here is
/// total.
pub fn terminal_reason(validated: bool, giveup_reason: Option<&str>) -> TerminalReason {
    if validated {
        return TerminalReason::Validated;
    }
    match giveup_reason {
        None => TerminalReason::BudgetExhausted,
        Some(REASON_NO_CHANGE | REASON_LOOP_GUARD | REASON_STEP_CEILING) => {
            TerminalReason::NonConvergence
        }
        Some(REASON_CANCELLED) => TerminalReason::Cancelled,
        Some(_) => TerminalReason::InfraFailure,
    }
}
