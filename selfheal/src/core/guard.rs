//! Non-convergence guards, independent of the attempt budget.
//!
//! Two signals can stop a run early regardless of attempts remaining: a
//! repair step that returns identical output, and a diagnosis step that
//! re-enters too many times within one run. Both latch
//! `WorkflowState::force_giveup`, which is never cleared.

/// Whether a repair produced no change, compared after trimming leading and
/// trailing whitespace only. Interior whitespace is content: a reformatted
/// body counts as a change.
pub fn code_unchanged(previous: &str, next: &str) -> bool {
    previous.trim() == next.trim()
}

/// Whether the diagnosis step has re-entered more often than the configured
/// ceiling. The ceiling is independent of `max_attempts` because analysis
/// can be re-entered without a repair in between.
pub fn analyze_ceiling_exceeded(analyze_count: u32, limit: u32) -> bool {
    analyze_count > limit
}
