//! Contracts with the external collaborators.
//!
//! One trait per collaborator, decoupling step execution from the actual
//! backends (HTTP microservices in production, scripted doubles in tests).
//! The orchestrator consumes only these structured results; fields beyond
//! the contracts are ignored.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use anyhow::Result;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::classify::RawResult;

/// Code generators tend to wrap output in a Markdown fence even when asked
/// not to; accept an optional language tag and take the fenced body.
static CODE_FENCE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?si)```(?:[a-z0-9_+-]*\s)?(.*?)```").expect("code fence regex")
});

/// Strip one Markdown code fence if present, otherwise return the text
/// trimmed.
pub fn extract_code(text: &str) -> String {
    match CODE_FENCE_RE.captures(text) {
        Some(captures) => captures[1].trim().to_string(),
        None => text.trim().to_string(),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerateRequest {
    pub task: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerateResponse {
    pub code: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecuteRequest {
    pub code: String,
    /// Wall-clock limit in seconds, enforced by the sandbox.
    pub timeout: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestRequest {
    pub code: String,
    /// Optional extra files (tests, fixtures) laid out next to the code.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub files: Option<BTreeMap<String, String>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidateRequest {
    pub code: String,
}

/// Validator findings. Issues block, warnings never do.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationReport {
    pub validation_issues: Vec<String>,
    pub validation_warnings: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixRequest {
    pub code: String,
    /// Bounded excerpt of the defect being repaired.
    pub error_summary: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub validation_summary: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixResponse {
    pub code: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveRequest {
    pub error_summary: String,
    pub fix: ArchivedFix,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchivedFix {
    pub code: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnrichRequest {
    pub query: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnrichResponse {
    pub results: Vec<Value>,
}

/// Turns a task description into source text.
pub trait Generator: Send + Sync {
    fn generate(&self, request: &GenerateRequest) -> Result<GenerateResponse>;
}

/// Runs untrusted code under time/memory limits.
pub trait Sandbox: Send + Sync {
    fn execute(&self, request: &ExecuteRequest) -> Result<RawResult>;
}

/// Executes the test suite against candidate code.
///
/// A backend with no tests to run reports `passed=true` with
/// `stdout="NO_TESTS"`; absence of tests is not a defect.
pub trait Tester: Send + Sync {
    fn test(&self, request: &TestRequest) -> Result<RawResult>;
}

/// Parses candidate code and reports hard issues vs soft warnings.
pub trait Validator: Send + Sync {
    fn validate(&self, request: &ValidateRequest) -> Result<ValidationReport>;
}

/// Attempts to repair candidate code given a defect summary.
pub trait Fixer: Send + Sync {
    fn fix(&self, request: &FixRequest) -> Result<FixResponse>;
}

/// Persists (error, fix) pairs for later retrieval. Fire-and-forget:
/// failures must never abort a run.
pub trait Archiver: Send + Sync {
    fn store(&self, request: &ArchiveRequest) -> Result<()>;
}

/// Optional knowledge lookup used only to enrich diagnostics.
pub trait Enricher: Send + Sync {
    fn search(&self, request: &EnrichRequest) -> Result<EnrichResponse>;
}

/// The full collaborator bundle injected into the run driver. No globals:
/// every backend is an explicit dependency, replaceable with a double.
pub struct Collaborators {
    pub generator: Box<dyn Generator>,
    pub sandbox: Box<dyn Sandbox>,
    pub tester: Box<dyn Tester>,
    pub validator: Box<dyn Validator>,
    pub fixer: Box<dyn Fixer>,
    pub archiver: Box<dyn Archiver>,
    /// Advisory; a bundle without an enricher skips enrichment entirely.
    pub enricher: Option<Box<dyn Enricher>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_code_strips_tagged_fence() {
        let text = "```python\nprint('hi')\n```";
        assert_eq!(extract_code(text), "print('hi')");
    }

    #[test]
    fn extract_code_strips_bare_fence() {
        let text = "```\nx = 1\n```";
        assert_eq!(extract_code(text), "x = 1");
    }

    #[test]
    fn extract_code_ignores_prose_around_fence() {
        let text = "Here you go:\n```python\nx = 1\n```\nHope that helps!";
        assert_eq!(extract_code(text), "x = 1");
    }

    #[test]
    fn extract_code_passes_plain_text_through() {
        assert_eq!(extract_code("  x = 1\n"), "x = 1");
    }

    #[test]
    fn test_request_omits_absent_files() {
        let request = TestRequest {
            code: "x = 1".to_string(),
            files: None,
        };
        let raw = serde_json::to_string(&request).expect("serialize");
        assert_eq!(raw, r#"{"code":"x = 1"}"#);
    }

    #[test]
    fn validation_report_defaults_missing_fields() {
        let report: ValidationReport = serde_json::from_str("{}").expect("parse");
        assert!(report.validation_issues.is_empty());
        assert!(report.validation_warnings.is_empty());
    }
}
