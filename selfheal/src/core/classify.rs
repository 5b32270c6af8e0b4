//! Deterministic classification of collaborator results.
//!
//! Every sandbox/tester reply is reduced to exactly one [`Classification`]
//! before routing sees it. The orchestrator never re-inspects a raw payload
//! after this point.

use serde::{Deserialize, Serialize};

use crate::core::types::Classification;

/// Defect messages are truncated to this many bytes to keep downstream
/// repair prompts bounded.
pub const MAX_DEFECT_LEN: usize = 4000;

/// Generic result record shared by the execute and test collaborators.
///
/// Every field is optional; collaborators populate the subset they know
/// about and unknown fields are ignored. Absence of any failure signal
/// classifies as [`Classification::Ok`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RawResult {
    pub passed: Option<bool>,
    pub returncode: Option<i64>,
    pub timed_out: Option<bool>,
    pub error: Option<String>,
    pub stdout: Option<String>,
    pub stderr: Option<String>,
}

impl RawResult {
    /// Result representing a transport-level failure, mirroring the error
    /// shape collaborators themselves use for one.
    pub fn from_error(message: impl Into<String>) -> Self {
        Self {
            error: Some(message.into()),
            ..Self::default()
        }
    }
}

/// Classify a collaborator result.
///
/// - An explicit `error` field means the collaborator is broken, not the
///   candidate: [`Classification::InfraFailure`].
/// - A timeout, failed test run, or non-zero return code is a property of
///   the candidate: [`Classification::Defect`].
/// - Anything else is [`Classification::Ok`].
pub fn classify(result: &RawResult) -> Classification {
    if let Some(error) = result.error.as_deref()
        && !error.trim().is_empty()
    {
        return Classification::InfraFailure(bounded(error));
    }
    if result.timed_out == Some(true) {
        let mut message = String::from("timed out");
        let detail = failure_output(result);
        if !detail.is_empty() {
            message.push_str(": ");
            message.push_str(&detail);
        }
        return Classification::Defect(bounded(&message));
    }
    if result.passed == Some(false) || result.returncode.is_some_and(|rc| rc != 0) {
        let detail = failure_output(result);
        let message = if detail.is_empty() {
            format!("exited with code {}", result.returncode.unwrap_or(-1))
        } else {
            detail
        };
        return Classification::Defect(bounded(&message));
    }
    Classification::Ok
}

/// Prefer stderr over stdout as the diagnostic excerpt.
fn failure_output(result: &RawResult) -> String {
    let stderr = result.stderr.as_deref().unwrap_or("").trim();
    if !stderr.is_empty() {
        return stderr.to_string();
    }
    result.stdout.as_deref().unwrap_or("").trim().to_string()
}

/// Truncate to [`MAX_DEFECT_LEN`] bytes on a char boundary.
pub fn bounded(message: &str) -> String {
    truncated(message, MAX_DEFECT_LEN)
}

/// Truncate to `limit` bytes without splitting a UTF-8 sequence.
pub fn truncated(message: &str, limit: usize) -> String {
    if message.len() <= limit {
        return message.to_string();
    }
    let mut end = limit;
    while end > 0 && !message.is_char_boundary(end) {
        end -= 1;
    }
    message[..end].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_result_is_ok() {
        let result = RawResult {
            passed: Some(true),
            returncode: Some(0),
            stdout: Some("hello\n".to_string()),
            ..RawResult::default()
        };
        assert_eq!(classify(&result), Classification::Ok);
    }

    #[test]
    fn empty_result_is_ok() {
        // No failure signal at all: the shape was valid, nothing failed.
        assert_eq!(classify(&RawResult::default()), Classification::Ok);
    }

    #[test]
    fn explicit_error_is_infra_failure() {
        let result = RawResult::from_error("connection refused");
        assert_eq!(
            classify(&result),
            Classification::InfraFailure("connection refused".to_string())
        );
    }

    #[test]
    fn error_outranks_defect_signals() {
        let result = RawResult {
            error: Some("boom".to_string()),
            returncode: Some(1),
            stderr: Some("Traceback".to_string()),
            ..RawResult::default()
        };
        assert_eq!(
            classify(&result),
            Classification::InfraFailure("boom".to_string())
        );
    }

    #[test]
    fn timeout_is_a_defect() {
        let result = RawResult {
            timed_out: Some(true),
            returncode: Some(124),
            ..RawResult::default()
        };
        assert!(matches!(classify(&result), Classification::Defect(m) if m.contains("timed out")));
    }

    #[test]
    fn failed_tests_prefer_stderr() {
        let result = RawResult {
            passed: Some(false),
            returncode: Some(1),
            stdout: Some("1 failed".to_string()),
            stderr: Some("NameError: name 'x' is not defined".to_string()),
            ..RawResult::default()
        };
        assert_eq!(
            classify(&result),
            Classification::Defect("NameError: name 'x' is not defined".to_string())
        );
    }

    #[test]
    fn nonzero_returncode_without_output_is_a_defect() {
        let result = RawResult {
            returncode: Some(2),
            ..RawResult::default()
        };
        assert_eq!(
            classify(&result),
            Classification::Defect("exited with code 2".to_string())
        );
    }

    #[test]
    fn defect_messages_are_bounded() {
        let result = RawResult {
            passed: Some(false),
            stderr: Some("x".repeat(MAX_DEFECT_LEN * 2)),
            ..RawResult::default()
        };
        let Classification::Defect(message) = classify(&result) else {
            panic!("expected defect");
        };
        assert_eq!(message.len(), MAX_DEFECT_LEN);
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        // 'é' is two bytes; cutting at byte 3 must back off to byte 2.
        assert_eq!(truncated("ééé", 3), "é");
        assert_eq!(truncated("abc", 3), "abc");
    }

    #[test]
    fn unknown_fields_are_ignored() {
        let raw: RawResult = serde_json::from_str(
            r#"{"passed": true, "returncode": 0, "status_code": 200, "body": "x"}"#,
        )
        .expect("parse");
        assert_eq!(classify(&raw), Classification::Ok);
    }
}
