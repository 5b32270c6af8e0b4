//! The orchestrator's transition function.
//!
//! Routing is a pure function of the current step and the workflow state:
//!
//! ```text
//! generate → analyze
//! analyze  → validate | fix
//! fix      → bump
//! bump     → analyze | give_up
//! validate → archive | fix | give_up
//! give_up  → archive
//! archive  → learn
//! learn    → done
//! ```
//!
//! Every exit path runs through `archive`, so failed runs are recorded for
//! learning exactly like successful ones. The `force_giveup` latch takes
//! precedence over every other field.

use crate::core::budget;
use crate::core::state::WorkflowState;
use crate::core::types::Step;

/// Substrings marking a validation issue as blocking: syntax failures and
/// named runtime-error classes. Anything else is a style/policy finding and
/// never blocks success.
const HARD_ISSUE_MARKERS: [&str; 6] = [
    "Syntax",
    "Error",
    "Exception",
    "ImportError",
    "NameError",
    "ModuleNotFoundError",
];

/// Whether a single validation finding blocks success.
pub fn hard_issue(issue: &str) -> bool {
    HARD_ISSUE_MARKERS.iter().any(|marker| issue.contains(marker))
}

fn has_hard_issue(issues: &[String]) -> bool {
    issues.iter().any(|issue| hard_issue(issue))
}

/// Compute the step that runs after `step`, updating the state where the
/// transition itself owns bookkeeping (soft-issue demotion at `validate`).
///
/// Deterministic given its inputs; collaborators are never consulted here.
pub fn next_step(step: Step, mut state: WorkflowState) -> (Step, WorkflowState) {
    let next = match step {
        Step::Generate => Step::Analyze,
        Step::Analyze => {
            // Infra failures route through validate so the give-up path
            // still archives; validate short-circuits on the latch.
            if state.force_giveup || state.errors.is_empty() {
                Step::Validate
            } else {
                Step::Fix
            }
        }
        Step::Fix => Step::Bump,
        Step::Bump => {
            if state.force_giveup || budget::exhausted(&state) {
                Step::GiveUp
            } else {
                Step::Analyze
            }
        }
        Step::Validate => {
            if state.force_giveup {
                Step::GiveUp
            } else if state.validated {
                Step::Archive
            } else if !has_hard_issue(&state.validation_issues) {
                // Style-only findings must never trigger another repair
                // cycle: demote them to warnings and accept the candidate.
                let demoted = std::mem::take(&mut state.validation_issues);
                state.validation_warnings.extend(demoted);
                state.validated = true;
                Step::Archive
            } else if budget::exhausted(&state) {
                Step::GiveUp
            } else {
                Step::Fix
            }
        }
        Step::GiveUp => Step::Archive,
        Step::Archive => Step::Learn,
        Step::Learn => Step::Done,
        Step::Done => Step::Done,
    };
    (next, state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::REASON_NO_CHANGE;

    fn state(max_attempts: u32) -> WorkflowState {
        WorkflowState::new("task", max_attempts)
    }

    #[test]
    fn hard_issue_matches_error_classes_not_style() {
        assert!(hard_issue("Syntax: invalid syntax at line 3"));
        assert!(hard_issue("NameError: name 'x' is not defined"));
        assert!(hard_issue("ModuleNotFoundError: no module named 'requests'"));
        assert!(!hard_issue("Style: found print(); prefer logging"));
        assert!(!hard_issue("Security: avoid eval when possible"));
    }

    #[test]
    fn generate_always_analyzes() {
        let (next, _) = next_step(Step::Generate, state(3));
        assert_eq!(next, Step::Analyze);
    }

    #[test]
    fn analyze_routes_defects_to_fix() {
        let mut s = state(3);
        s.errors.push("NameError: x".to_string());
        let (next, _) = next_step(Step::Analyze, s);
        assert_eq!(next, Step::Fix);
    }

    #[test]
    fn analyze_routes_clean_state_to_validate() {
        let (next, _) = next_step(Step::Analyze, state(3));
        assert_eq!(next, Step::Validate);
    }

    #[test]
    fn analyze_with_giveup_latch_still_reaches_validate() {
        // The latch wins over pending errors so the run drains through the
        // shared archival path.
        let mut s = state(3);
        s.errors.push("tester_error: down".to_string());
        s.give_up("tester_error: down");
        let (next, _) = next_step(Step::Analyze, s);
        assert_eq!(next, Step::Validate);
    }

    #[test]
    fn bump_continues_while_budget_remains() {
        let mut s = state(3);
        s.attempts = 1;
        let (next, _) = next_step(Step::Bump, s);
        assert_eq!(next, Step::Analyze);
    }

    #[test]
    fn bump_gives_up_when_exhausted() {
        let mut s = state(2);
        s.attempts = 2;
        let (next, _) = next_step(Step::Bump, s);
        assert_eq!(next, Step::GiveUp);
    }

    #[test]
    fn bump_gives_up_on_latch_with_budget_remaining() {
        let mut s = state(5);
        s.attempts = 1;
        s.give_up(REASON_NO_CHANGE);
        let (next, _) = next_step(Step::Bump, s);
        assert_eq!(next, Step::GiveUp);
    }

    #[test]
    fn validate_latch_outranks_validated_flag() {
        let mut s = state(3);
        s.validated = true;
        s.give_up("sandbox_error: down");
        let (next, _) = next_step(Step::Validate, s);
        assert_eq!(next, Step::GiveUp);
    }

    #[test]
    fn validated_candidate_archives() {
        let mut s = state(3);
        s.validated = true;
        let (next, _) = next_step(Step::Validate, s);
        assert_eq!(next, Step::Archive);
    }

    #[test]
    fn style_only_issues_are_demoted_and_accepted() {
        let mut s = state(3);
        s.validation_issues
            .push("Style: found print(); prefer logging".to_string());
        s.validation_warnings.push("Security: avoid eval".to_string());

        let (next, s) = next_step(Step::Validate, s);

        assert_eq!(next, Step::Archive);
        assert!(s.validated);
        assert!(s.validation_issues.is_empty());
        assert_eq!(
            s.validation_warnings,
            vec![
                "Security: avoid eval".to_string(),
                "Style: found print(); prefer logging".to_string(),
            ]
        );
    }

    #[test]
    fn hard_issues_route_to_fix_while_budget_remains() {
        let mut s = state(3);
        s.validation_issues.push("Syntax: invalid syntax".to_string());
        let (next, s) = next_step(Step::Validate, s);
        assert_eq!(next, Step::Fix);
        assert!(!s.validated);
        assert_eq!(s.validation_issues.len(), 1);
    }

    #[test]
    fn hard_issues_give_up_when_exhausted() {
        let mut s = state(2);
        s.attempts = 2;
        s.validation_issues.push("Syntax: invalid syntax".to_string());
        let (next, _) = next_step(Step::Validate, s);
        assert_eq!(next, Step::GiveUp);
    }

    #[test]
    fn giveup_path_drains_to_done() {
        let (next, s) = next_step(Step::GiveUp, state(3));
        assert_eq!(next, Step::Archive);
        let (next, s) = next_step(next, s);
        assert_eq!(next, Step::Learn);
        let (next, _) = next_step(next, s);
        assert_eq!(next, Step::Done);
    }
}
