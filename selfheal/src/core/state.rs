//! The single mutable record threaded through every workflow step.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::types::{FixStatus, Step};

/// One audit record per executed step. Never mutated after append.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepRecord {
    pub step: Step,
    /// Attempt counter at the time the step ran.
    pub attempts: u32,
    pub summary: String,
}

/// One entry per repair attempt, including skipped and failed ones.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixRecord {
    pub status: FixStatus,
    /// Change summary (sizes before/after) or failure detail.
    pub detail: String,
}

/// State owned by exactly one run and threaded through one step at a time.
///
/// `history` and `fix_log` are append-only; `errors` is reset by each
/// analysis pass; `force_giveup` is a one-way latch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowState {
    /// Original request, immutable once set.
    pub task: String,
    /// Current candidate program; overwritten by generation and repair.
    pub candidate_code: String,
    /// Defects found by the last analysis pass; empty means none detected.
    pub errors: Vec<String>,
    /// Blocking validation findings.
    pub validation_issues: Vec<String>,
    /// Advisory validation findings; never block success.
    pub validation_warnings: Vec<String>,
    /// True only after tests and validation both passed with no blocking
    /// issues.
    pub validated: bool,
    /// Repair cycles consumed so far.
    pub attempts: u32,
    /// Budget supplied at start, immutable per run.
    pub max_attempts: u32,
    /// Consecutive repairs that produced byte-identical output.
    pub no_change_streak: u32,
    /// One-way latch; once set no further repair cycles occur.
    pub force_giveup: bool,
    /// Written once, when `force_giveup` is first set.
    pub giveup_reason: Option<String>,
    /// Stdout captured from the last clean sandbox run.
    pub program_output: String,
    /// How many times analysis ran within this run; feeds the loop guard.
    pub analyze_count: u32,
    /// At most one knowledge-lookup query is issued per run.
    pub enrich_queried: bool,
    /// Advisory enrichment payloads keyed by collaborator name. Never
    /// consulted by routing.
    pub references: BTreeMap<String, Value>,
    /// Error-pattern counts aggregated by the learn step.
    pub learned_patterns: BTreeMap<String, u32>,
    /// Append-only audit trail, one record per executed step.
    pub history: Vec<StepRecord>,
    /// Append-only repair log.
    pub fix_log: Vec<FixRecord>,
}

impl WorkflowState {
    /// Fresh state for one run; all counters zeroed, no candidate yet.
    pub fn new(task: impl Into<String>, max_attempts: u32) -> Self {
        Self {
            task: task.into(),
            candidate_code: String::new(),
            errors: Vec::new(),
            validation_issues: Vec::new(),
            validation_warnings: Vec::new(),
            validated: false,
            attempts: 0,
            max_attempts,
            no_change_streak: 0,
            force_giveup: false,
            giveup_reason: None,
            program_output: String::new(),
            analyze_count: 0,
            enrich_queried: false,
            references: BTreeMap::new(),
            learned_patterns: BTreeMap::new(),
            history: Vec::new(),
            fix_log: Vec::new(),
        }
    }

    /// Append an audit record for an executed step.
    pub fn record(&mut self, step: Step, summary: impl Into<String>) {
        self.history.push(StepRecord {
            step,
            attempts: self.attempts,
            summary: summary.into(),
        });
    }

    /// Append a repair-log entry.
    pub fn log_fix(&mut self, status: FixStatus, detail: impl Into<String>) {
        self.fix_log.push(FixRecord {
            status,
            detail: detail.into(),
        });
    }

    /// Latch the give-up flag. The reason is written only by the first
    /// caller; later calls keep the latch set and the original reason.
    pub fn give_up(&mut self, reason: impl Into<String>) {
        self.force_giveup = true;
        if self.giveup_reason.is_none() {
            self.giveup_reason = Some(reason.into());
        }
    }
}
