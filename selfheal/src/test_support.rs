//! Scripted collaborator doubles for driving the workflow in tests.
//!
//! Each double replays a queue of canned responses; the last entry repeats
//! forever, so "always fails" and "always passes" scenarios need only one
//! entry. No double performs I/O.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{Result, anyhow};
use serde_json::Value;

use crate::core::classify::RawResult;
use crate::io::collab::{
    ArchiveRequest, Archiver, Collaborators, EnrichRequest, EnrichResponse, Enricher,
    ExecuteRequest, FixRequest, FixResponse, Fixer, GenerateRequest, GenerateResponse, Generator,
    Sandbox, Tester, TestRequest, ValidateRequest, ValidationReport, Validator,
};

/// Queue of canned responses; the last entry repeats once drained.
struct Script<T> {
    queue: Mutex<VecDeque<T>>,
}

impl<T: Clone> Script<T> {
    fn new(items: Vec<T>) -> Self {
        assert!(!items.is_empty(), "script must not be empty");
        Self {
            queue: Mutex::new(items.into()),
        }
    }

    fn next(&self) -> T {
        let mut queue = self.queue.lock().expect("script lock");
        if queue.len() > 1 {
            queue.pop_front().expect("script drained")
        } else {
            queue.front().cloned().expect("script drained")
        }
    }
}

/// A test-run result for a passing suite (or a suite with no tests).
pub fn passing_tests() -> RawResult {
    RawResult {
        passed: Some(true),
        returncode: Some(0),
        stdout: Some("NO_TESTS".to_string()),
        ..RawResult::default()
    }
}

/// A test-run result for a failing suite with the given stderr.
pub fn failing_tests(stderr: &str) -> RawResult {
    RawResult {
        passed: Some(false),
        returncode: Some(1),
        stderr: Some(stderr.to_string()),
        ..RawResult::default()
    }
}

/// A clean sandbox run printing `stdout`.
pub fn clean_run(stdout: &str) -> RawResult {
    RawResult {
        returncode: Some(0),
        stdout: Some(stdout.to_string()),
        ..RawResult::default()
    }
}

pub struct ScriptedGenerator {
    script: Script<Result<String, String>>,
}

impl ScriptedGenerator {
    pub fn returning(code: &str) -> Self {
        Self {
            script: Script::new(vec![Ok(code.to_string())]),
        }
    }

    pub fn failing(message: &str) -> Self {
        Self {
            script: Script::new(vec![Err(message.to_string())]),
        }
    }
}

impl Generator for ScriptedGenerator {
    fn generate(&self, _request: &GenerateRequest) -> Result<GenerateResponse> {
        self.script
            .next()
            .map(|code| GenerateResponse { code })
            .map_err(|message| anyhow!(message))
    }
}

pub struct ScriptedSandbox {
    script: Script<RawResult>,
}

impl ScriptedSandbox {
    pub fn passing() -> Self {
        Self::sequence(vec![clean_run("")])
    }

    pub fn printing(stdout: &str) -> Self {
        Self::sequence(vec![clean_run(stdout)])
    }

    pub fn erroring(message: &str) -> Self {
        Self::sequence(vec![RawResult::from_error(message)])
    }

    pub fn sequence(results: Vec<RawResult>) -> Self {
        Self {
            script: Script::new(results),
        }
    }
}

impl Sandbox for ScriptedSandbox {
    fn execute(&self, _request: &ExecuteRequest) -> Result<RawResult> {
        Ok(self.script.next())
    }
}

pub struct ScriptedTester {
    script: Script<RawResult>,
    counting: bool,
    calls: AtomicU32,
}

impl ScriptedTester {
    pub fn passing() -> Self {
        Self::sequence(vec![passing_tests()])
    }

    pub fn failing_with(stderr: &str) -> Self {
        Self::sequence(vec![failing_tests(stderr)])
    }

    pub fn erroring(message: &str) -> Self {
        Self::sequence(vec![RawResult::from_error(message)])
    }

    pub fn sequence(results: Vec<RawResult>) -> Self {
        Self {
            script: Script::new(results),
            counting: false,
            calls: AtomicU32::new(0),
        }
    }

    /// Fails every run with a distinct message (`test failure #N`).
    pub fn counting_failures() -> Self {
        Self {
            script: Script::new(vec![failing_tests("unused")]),
            counting: true,
            calls: AtomicU32::new(0),
        }
    }
}

impl Tester for ScriptedTester {
    fn test(&self, _request: &TestRequest) -> Result<RawResult> {
        if self.counting {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            return Ok(failing_tests(&format!("test failure #{n}")));
        }
        Ok(self.script.next())
    }
}

pub struct ScriptedValidator {
    script: Script<Result<ValidationReport, String>>,
}

impl ScriptedValidator {
    pub fn clean() -> Self {
        Self {
            script: Script::new(vec![Ok(ValidationReport::default())]),
        }
    }

    pub fn reporting(issues: Vec<String>, warnings: Vec<String>) -> Self {
        Self {
            script: Script::new(vec![Ok(ValidationReport {
                validation_issues: issues,
                validation_warnings: warnings,
            })]),
        }
    }

    pub fn sequence(reports: Vec<ValidationReport>) -> Self {
        Self {
            script: Script::new(reports.into_iter().map(Ok).collect()),
        }
    }

    pub fn failing(message: &str) -> Self {
        Self {
            script: Script::new(vec![Err(message.to_string())]),
        }
    }
}

impl Validator for ScriptedValidator {
    fn validate(&self, _request: &ValidateRequest) -> Result<ValidationReport> {
        self.script.next().map_err(|message| anyhow!(message))
    }
}

pub struct ScriptedFixer {
    script: Script<Result<Option<String>, String>>,
    counting: bool,
    calls: AtomicU32,
    requests: Mutex<Vec<FixRequest>>,
}

impl ScriptedFixer {
    /// Always returns `code`.
    pub fn returning(code: &str) -> Self {
        Self::with_script(Script::new(vec![Ok(Some(code.to_string()))]))
    }

    /// Replays `codes` in order, repeating the last one.
    pub fn sequence(codes: Vec<&str>) -> Self {
        Self::with_script(Script::new(
            codes.into_iter().map(|c| Ok(Some(c.to_string()))).collect(),
        ))
    }

    /// Echoes the input code back unchanged: a non-converging fixer.
    pub fn echoing() -> Self {
        Self::with_script(Script::new(vec![Ok(None)]))
    }

    /// Returns a distinct program every call: a busy but useless fixer.
    pub fn counting() -> Self {
        let mut fixer = Self::with_script(Script::new(vec![Ok(None)]));
        fixer.counting = true;
        fixer
    }

    pub fn failing(message: &str) -> Self {
        Self::with_script(Script::new(vec![Err(message.to_string())]))
    }

    fn with_script(script: Script<Result<Option<String>, String>>) -> Self {
        Self {
            script,
            counting: false,
            calls: AtomicU32::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Every request seen so far.
    pub fn requests(&self) -> Vec<FixRequest> {
        self.requests.lock().expect("requests lock").clone()
    }
}

impl Fixer for ScriptedFixer {
    fn fix(&self, request: &FixRequest) -> Result<FixResponse> {
        self.requests
            .lock()
            .expect("requests lock")
            .push(request.clone());
        if self.counting {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            return Ok(FixResponse {
                code: format!("print('attempt {n}')"),
            });
        }
        match self.script.next() {
            Ok(Some(code)) => Ok(FixResponse { code }),
            Ok(None) => Ok(FixResponse {
                code: request.code.clone(),
            }),
            Err(message) => Err(anyhow!(message)),
        }
    }
}

impl Fixer for Arc<ScriptedFixer> {
    fn fix(&self, request: &FixRequest) -> Result<FixResponse> {
        self.as_ref().fix(request)
    }
}

#[derive(Default)]
pub struct RecordingArchiver {
    fail: bool,
    requests: Mutex<Vec<ArchiveRequest>>,
}

impl RecordingArchiver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<ArchiveRequest> {
        self.requests.lock().expect("requests lock").clone()
    }
}

impl Archiver for RecordingArchiver {
    fn store(&self, request: &ArchiveRequest) -> Result<()> {
        self.requests
            .lock()
            .expect("requests lock")
            .push(request.clone());
        if self.fail {
            return Err(anyhow!("archive service unavailable"));
        }
        Ok(())
    }
}

impl Archiver for Arc<RecordingArchiver> {
    fn store(&self, request: &ArchiveRequest) -> Result<()> {
        self.as_ref().store(request)
    }
}

pub struct ScriptedEnricher {
    script: Script<Result<Vec<Value>, String>>,
}

impl ScriptedEnricher {
    pub fn returning(results: Vec<Value>) -> Self {
        Self {
            script: Script::new(vec![Ok(results)]),
        }
    }

    pub fn failing(message: &str) -> Self {
        Self {
            script: Script::new(vec![Err(message.to_string())]),
        }
    }
}

impl Enricher for ScriptedEnricher {
    fn search(&self, _request: &EnrichRequest) -> Result<EnrichResponse> {
        self.script
            .next()
            .map(|results| EnrichResponse { results })
            .map_err(|message| anyhow!(message))
    }
}

/// A bundle where everything succeeds: tests pass, the program runs clean,
/// validation is silent, archival records. Swap individual fields to script
/// a failure.
pub fn collaborators(generator: ScriptedGenerator) -> Collaborators {
    Collaborators {
        generator: Box::new(generator),
        sandbox: Box::new(ScriptedSandbox::passing()),
        tester: Box::new(ScriptedTester::passing()),
        validator: Box::new(ScriptedValidator::clean()),
        fixer: Box::new(ScriptedFixer::echoing()),
        archiver: Box::new(RecordingArchiver::new()),
        enricher: None,
    }
}
