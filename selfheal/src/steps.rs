//! Step executors: thin adapters between the state machine and the
//! collaborators.
//!
//! Each executor calls one named collaborator, normalizes its result into
//! `WorkflowState` fields, and appends one history record. Executors make no
//! routing decisions and never return errors: a collaborator failure is
//! converted at the step boundary into an infrastructure give-up, so the
//! machine always reaches `done`.

use serde_json::Value;
use tracing::{debug, warn};

use crate::core::classify::{RawResult, classify, truncated};
use crate::core::guard;
use crate::core::state::WorkflowState;
use crate::core::types::{
    Classification, FixStatus, REASON_LOOP_GUARD, REASON_NO_CHANGE, Step, infra_reason,
};
use crate::core::{budget, machine};
use crate::io::collab::{
    ArchiveRequest, ArchivedFix, Collaborators, EnrichRequest, ExecuteRequest, FixRequest,
    GenerateRequest, TestRequest, ValidateRequest, extract_code,
};
use crate::io::config::SelfhealConfig;

/// Bound on the defect excerpt handed to the repair collaborator.
const ERROR_SUMMARY_LIMIT: usize = 2000;
/// Bound on the knowledge-lookup query string.
const ENRICH_QUERY_LIMIT: usize = 160;
/// How many lookup results are kept under `references`.
const ENRICH_RESULTS_KEPT: usize = 3;
/// Bound on learned error-pattern keys.
const PATTERN_KEY_LIMIT: usize = 80;

/// Run one step's executor. Infallible: failures are recorded in the state.
pub fn execute(
    step: Step,
    state: WorkflowState,
    collab: &Collaborators,
    cfg: &SelfhealConfig,
) -> WorkflowState {
    match step {
        Step::Generate => run_generate(state, collab),
        Step::Analyze => run_analyze(state, collab, cfg),
        Step::Fix => run_fix(state, collab),
        Step::Bump => run_bump(state),
        Step::Validate => run_validate(state, collab),
        Step::GiveUp => run_giveup(state),
        Step::Archive => run_archive(state, collab),
        Step::Learn => run_learn(state),
        Step::Done => state,
    }
}

/// Ask the generation collaborator for an initial candidate.
pub fn run_generate(mut state: WorkflowState, collab: &Collaborators) -> WorkflowState {
    let request = GenerateRequest {
        task: state.task.clone(),
    };
    match collab.generator.generate(&request) {
        Ok(response) => {
            state.candidate_code = extract_code(&response.code);
            state.record(
                Step::Generate,
                format!("generated {} bytes", state.candidate_code.len()),
            );
        }
        Err(err) => {
            let reason = infra_reason("generator", &format!("{err:#}"));
            state.errors = vec![reason.clone()];
            state.give_up(reason);
            state.record(Step::Generate, "generator unavailable");
        }
    }
    state
}

/// Test the candidate, then run it to capture output. Each result is
/// classified once; an infrastructure failure latches the give-up flag so
/// the run drains through archival instead of looping on a broken backend.
pub fn run_analyze(
    mut state: WorkflowState,
    collab: &Collaborators,
    cfg: &SelfhealConfig,
) -> WorkflowState {
    if state.force_giveup {
        state.record(Step::Analyze, "skipped: give-up latched");
        return state;
    }
    if state.candidate_code.trim().is_empty() {
        state.errors = vec!["no candidate code; generation must produce code first".to_string()];
        state.record(Step::Analyze, "no candidate code");
        return state;
    }

    state.analyze_count += 1;
    if guard::analyze_ceiling_exceeded(state.analyze_count, cfg.analyze_limit) {
        state.errors = vec!["diagnosis loop guard tripped".to_string()];
        state.give_up(REASON_LOOP_GUARD);
        state.record(Step::Analyze, "loop guard tripped");
        return state;
    }

    let test_request = TestRequest {
        code: state.candidate_code.clone(),
        files: None,
    };
    let raw = match collab.tester.test(&test_request) {
        Ok(raw) => raw,
        Err(err) => RawResult::from_error(format!("{err:#}")),
    };
    match classify(&raw) {
        Classification::InfraFailure(message) => {
            let reason = infra_reason("tester", &message);
            state.errors = vec![reason.clone()];
            state.give_up(reason);
            state.record(Step::Analyze, "tester unavailable");
            return state;
        }
        Classification::Defect(message) => {
            state.errors = vec![message.clone()];
            lookup_references(&mut state, collab, &message);
            state.record(Step::Analyze, "tests failed");
            return state;
        }
        Classification::Ok => {}
    }

    let exec_request = ExecuteRequest {
        code: state.candidate_code.clone(),
        timeout: cfg.sandbox_timeout_secs,
    };
    let raw = match collab.sandbox.execute(&exec_request) {
        Ok(raw) => raw,
        Err(err) => RawResult::from_error(format!("{err:#}")),
    };
    match classify(&raw) {
        Classification::InfraFailure(message) => {
            let reason = infra_reason("sandbox", &message);
            state.errors = vec![reason.clone()];
            state.give_up(reason);
            state.record(Step::Analyze, "sandbox unavailable");
        }
        Classification::Defect(message) => {
            state.errors = vec![message.clone()];
            lookup_references(&mut state, collab, &message);
            state.record(Step::Analyze, "program run failed");
        }
        Classification::Ok => {
            state.errors.clear();
            state.program_output = raw.stdout.unwrap_or_default().trim().to_string();
            state.record(Step::Analyze, "tests passed; program ran clean");
        }
    }
    state
}

/// One knowledge-lookup query per run, advisory only. Failures are ignored.
fn lookup_references(state: &mut WorkflowState, collab: &Collaborators, error_text: &str) {
    let Some(enricher) = collab.enricher.as_deref() else {
        return;
    };
    if state.enrich_queried || error_text.trim().is_empty() {
        return;
    }
    state.enrich_queried = true;
    let query = truncated(
        error_text.lines().next().unwrap_or_default(),
        ENRICH_QUERY_LIMIT,
    );
    match enricher.search(&EnrichRequest { query }) {
        Ok(response) => {
            let kept: Vec<Value> = response
                .results
                .into_iter()
                .take(ENRICH_RESULTS_KEPT)
                .collect();
            if !kept.is_empty() {
                state.references.insert("search".to_string(), Value::Array(kept));
            }
        }
        Err(err) => debug!(err = %err, "reference lookup failed"),
    }
}

/// Ask the repair collaborator for a corrected candidate. Every outcome is
/// logged, including "no defect to fix".
pub fn run_fix(mut state: WorkflowState, collab: &Collaborators) -> WorkflowState {
    if state.errors.is_empty() && state.validation_issues.is_empty() {
        state.log_fix(FixStatus::Skipped, "no defect to fix");
        state.record(Step::Fix, "skipped: no defect to fix");
        return state;
    }

    let error_summary = truncated(
        state.errors.first().map(String::as_str).unwrap_or_default(),
        ERROR_SUMMARY_LIMIT,
    );
    let validation_summary = if state.validation_issues.is_empty() {
        None
    } else {
        Some(state.validation_issues.join("; "))
    };
    let request = FixRequest {
        code: state.candidate_code.clone(),
        error_summary,
        validation_summary,
    };

    let response = match collab.fixer.fix(&request) {
        Ok(response) => response,
        Err(err) => {
            let reason = infra_reason("fixer", &format!("{err:#}"));
            state.log_fix(FixStatus::Failed, reason.clone());
            state.give_up(reason);
            state.record(Step::Fix, "fixer unavailable");
            return state;
        }
    };

    let new_code = extract_code(&response.code);
    if new_code.is_empty() {
        let reason = infra_reason("fixer", "returned empty output");
        state.log_fix(FixStatus::Failed, reason.clone());
        state.give_up(reason);
        state.record(Step::Fix, "fixer returned empty output");
        return state;
    }
    if guard::code_unchanged(&state.candidate_code, &new_code) {
        state.no_change_streak += 1;
        state.log_fix(FixStatus::NoChange, "fixer returned identical code");
        state.give_up(REASON_NO_CHANGE);
        state.record(Step::Fix, "no change from fixer");
        return state;
    }

    let detail = format!(
        "{} -> {} lines",
        state.candidate_code.lines().count(),
        new_code.lines().count()
    );
    state.candidate_code = new_code;
    state.no_change_streak = 0;
    state.log_fix(FixStatus::Ok, detail);
    state.record(Step::Fix, "applied repair");
    state
}

/// Consume one attempt on the edge leaving the repair step.
pub fn run_bump(state: WorkflowState) -> WorkflowState {
    let mut state = budget::bump(state);
    state.record(
        Step::Bump,
        format!("attempt {} of {}", state.attempts, state.max_attempts),
    );
    state
}

/// Ask the validation collaborator for issues and warnings. Soft-issue
/// demotion belongs to the transition function, not here.
pub fn run_validate(mut state: WorkflowState, collab: &Collaborators) -> WorkflowState {
    if state.force_giveup {
        state.record(Step::Validate, "skipped: give-up latched");
        return state;
    }
    let request = ValidateRequest {
        code: state.candidate_code.clone(),
    };
    match collab.validator.validate(&request) {
        Ok(report) => {
            state.validation_issues = report.validation_issues;
            state.validation_warnings = report.validation_warnings;
            state.validated = state.validation_issues.is_empty();
            let hard = state
                .validation_issues
                .iter()
                .filter(|issue| machine::hard_issue(issue))
                .count();
            state.record(
                Step::Validate,
                format!(
                    "{} issues ({hard} hard), {} warnings",
                    state.validation_issues.len(),
                    state.validation_warnings.len()
                ),
            );
        }
        Err(err) => {
            let reason = infra_reason("validator", &format!("{err:#}"));
            state.validated = false;
            state.give_up(reason);
            state.record(Step::Validate, "validator unavailable");
        }
    }
    state
}

/// Record the terminal decision to stop repairing.
pub fn run_giveup(mut state: WorkflowState) -> WorkflowState {
    let summary = state
        .giveup_reason
        .clone()
        .unwrap_or_else(|| "attempt budget exhausted".to_string());
    state.record(Step::GiveUp, summary);
    state
}

/// Persist the (error, fix) pair. Fire-and-forget: a store failure is logged
/// and ignored so it can never abort the run.
pub fn run_archive(mut state: WorkflowState, collab: &Collaborators) -> WorkflowState {
    if state.candidate_code.trim().is_empty() {
        state.record(Step::Archive, "skipped: no code to archive");
        return state;
    }
    let error_summary = if state.errors.is_empty() {
        "no-errors".to_string()
    } else {
        state.errors.join("\n---\n")
    };
    let request = ArchiveRequest {
        error_summary,
        fix: ArchivedFix {
            code: state.candidate_code.clone(),
        },
    };
    match collab.archiver.store(&request) {
        Ok(()) => state.record(Step::Archive, "archived"),
        Err(err) => {
            warn!(err = %err, "archive store failed");
            state.record(Step::Archive, "archive store failed (ignored)");
        }
    }
    state
}

/// Aggregate observed errors into bounded pattern counts.
pub fn run_learn(mut state: WorkflowState) -> WorkflowState {
    for error in &state.errors {
        let mut key = truncated(error.trim(), PATTERN_KEY_LIMIT);
        if key.is_empty() {
            key = "unknown".to_string();
        }
        *state.learned_patterns.entry(key).or_insert(0) += 1;
    }
    state.record(
        Step::Learn,
        format!("{} error patterns", state.learned_patterns.len()),
    );
    state
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{
        RecordingArchiver, ScriptedEnricher, ScriptedFixer, ScriptedGenerator, ScriptedSandbox,
        ScriptedTester, ScriptedValidator, collaborators,
    };
    use std::sync::Arc;

    fn state_with_code(code: &str) -> WorkflowState {
        let mut state = WorkflowState::new("task", 3);
        state.candidate_code = code.to_string();
        state
    }

    #[test]
    fn generate_strips_code_fences() {
        let collab = collaborators(ScriptedGenerator::returning(
            "```python\nprint('hi')\n```",
        ));
        let state = run_generate(WorkflowState::new("task", 3), &collab);
        assert_eq!(state.candidate_code, "print('hi')");
        assert_eq!(state.history.len(), 1);
    }

    #[test]
    fn generate_failure_latches_giveup() {
        let mut collab = collaborators(ScriptedGenerator::returning("x = 1"));
        collab.generator = Box::new(ScriptedGenerator::failing("model overloaded"));
        let state = run_generate(WorkflowState::new("task", 3), &collab);
        assert!(state.force_giveup);
        assert!(
            state
                .giveup_reason
                .as_deref()
                .is_some_and(|r| r.starts_with("generator_error:"))
        );
    }

    #[test]
    fn analyze_records_defect_and_queries_references_once() {
        let mut collab = collaborators(ScriptedGenerator::returning("x = 1"));
        collab.tester = Box::new(ScriptedTester::failing_with("NameError: name 'x'"));
        collab.enricher = Some(Box::new(ScriptedEnricher::returning(vec![
            serde_json::json!({"title": "NameError"}),
        ])));
        let cfg = SelfhealConfig::default();

        let state = run_analyze(state_with_code("x = 1"), &collab, &cfg);
        assert_eq!(state.errors, vec!["NameError: name 'x'".to_string()]);
        assert!(state.enrich_queried);
        assert!(state.references.contains_key("search"));

        // A second analysis must not query again.
        let state = run_analyze(state, &collab, &cfg);
        assert!(state.enrich_queried);
    }

    #[test]
    fn analyze_tester_infra_failure_gives_up() {
        let mut collab = collaborators(ScriptedGenerator::returning("x = 1"));
        collab.tester = Box::new(ScriptedTester::erroring("connection refused"));
        let cfg = SelfhealConfig::default();

        let state = run_analyze(state_with_code("x = 1"), &collab, &cfg);
        assert!(state.force_giveup);
        assert_eq!(
            state.giveup_reason.as_deref(),
            Some("tester_error: connection refused")
        );
    }

    #[test]
    fn analyze_captures_program_output_on_success() {
        let mut collab = collaborators(ScriptedGenerator::returning("print('hello')"));
        collab.sandbox = Box::new(ScriptedSandbox::printing("hello\n"));
        let cfg = SelfhealConfig::default();

        let state = run_analyze(state_with_code("print('hello')"), &collab, &cfg);
        assert!(state.errors.is_empty());
        assert_eq!(state.program_output, "hello");
    }

    #[test]
    fn analyze_trips_loop_guard_above_ceiling() {
        let collab = collaborators(ScriptedGenerator::returning("x = 1"));
        let cfg = SelfhealConfig {
            analyze_limit: 1,
            ..SelfhealConfig::default()
        };

        let state = run_analyze(state_with_code("x = 1"), &collab, &cfg);
        assert!(!state.force_giveup);
        let state = run_analyze(state, &collab, &cfg);
        assert!(state.force_giveup);
        assert_eq!(state.giveup_reason.as_deref(), Some(REASON_LOOP_GUARD));
    }

    #[test]
    fn fix_skips_when_nothing_to_repair() {
        let collab = collaborators(ScriptedGenerator::returning("x = 1"));
        let state = run_fix(state_with_code("x = 1"), &collab);
        assert_eq!(state.fix_log.len(), 1);
        assert_eq!(state.fix_log[0].status, FixStatus::Skipped);
        assert!(!state.force_giveup);
    }

    #[test]
    fn fix_latches_on_identical_output() {
        let mut collab = collaborators(ScriptedGenerator::returning("x = 1"));
        collab.fixer = Box::new(ScriptedFixer::echoing());
        let mut state = state_with_code("x = 1");
        state.errors.push("NameError".to_string());

        let state = run_fix(state, &collab);
        assert_eq!(state.no_change_streak, 1);
        assert_eq!(state.giveup_reason.as_deref(), Some(REASON_NO_CHANGE));
        assert_eq!(state.fix_log[0].status, FixStatus::NoChange);
    }

    #[test]
    fn fix_passes_validation_summary_for_hard_issues() {
        let mut collab = collaborators(ScriptedGenerator::returning("x = 1"));
        let fixer = Arc::new(ScriptedFixer::returning("x = 2"));
        collab.fixer = Box::new(Arc::clone(&fixer));
        let mut state = state_with_code("x = 1");
        state.validation_issues.push("Syntax: bad".to_string());

        let state = run_fix(state, &collab);
        assert_eq!(state.candidate_code, "x = 2");
        let seen = fixer.requests();
        assert_eq!(seen[0].validation_summary.as_deref(), Some("Syntax: bad"));
    }

    #[test]
    fn archive_failures_never_latch_giveup() {
        let mut collab = collaborators(ScriptedGenerator::returning("x = 1"));
        collab.archiver = Box::new(RecordingArchiver::failing());
        let state = run_archive(state_with_code("x = 1"), &collab);
        assert!(!state.force_giveup);
        assert_eq!(state.history.len(), 1);
    }

    #[test]
    fn learn_counts_bounded_patterns() {
        let mut state = state_with_code("x = 1");
        state.errors = vec!["NameError: x".to_string(), "NameError: x".to_string()];
        let state = run_learn(state);
        assert_eq!(state.learned_patterns.get("NameError: x"), Some(&2));
    }

    #[test]
    fn validate_stores_report_fields() {
        let mut collab = collaborators(ScriptedGenerator::returning("x = 1"));
        collab.validator = Box::new(ScriptedValidator::reporting(
            vec!["Syntax: bad".to_string()],
            vec!["Style: print".to_string()],
        ));
        let state = run_validate(state_with_code("x = 1"), &collab);
        assert!(!state.validated);
        assert_eq!(state.validation_issues, vec!["Syntax: bad".to_string()]);
        assert_eq!(state.validation_warnings, vec!["Style: print".to_string()]);
    }
}
