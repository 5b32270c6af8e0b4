//! HTTP adapters for the collaborator microservices.
//!
//! Collaborator calls are blocking, bounded-duration operations: every
//! request carries the configured client timeout. Responses are checked
//! against embedded JSON Schemas before deserialization, so a malformed
//! shape surfaces as an error at the boundary (and is classified as an
//! infrastructure failure) instead of a panic deeper in the workflow.

use std::time::Duration;

use anyhow::{Context, Result, bail};
use jsonschema::Draft;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, instrument, warn};

use crate::core::classify::RawResult;
use crate::io::collab::{
    ArchiveRequest, Archiver, Collaborators, EnrichRequest, EnrichResponse, Enricher,
    ExecuteRequest, FixRequest, FixResponse, Fixer, GenerateRequest, GenerateResponse, Generator,
    Sandbox, Tester, TestRequest, ValidateRequest, ValidationReport, Validator,
};
use crate::io::config::SelfhealConfig;

const GENERATE_SCHEMA: &str = include_str!("../../schemas/generate_response.schema.json");
const RAW_RESULT_SCHEMA: &str = include_str!("../../schemas/raw_result.schema.json");
const VALIDATION_SCHEMA: &str = include_str!("../../schemas/validation_report.schema.json");
const FIX_SCHEMA: &str = include_str!("../../schemas/fix_response.schema.json");
const ENRICH_SCHEMA: &str = include_str!("../../schemas/enrich_response.schema.json");

/// Minimal JSON-over-HTTP client for one collaborator service.
pub struct ServiceClient {
    base_url: String,
    client: reqwest::blocking::Client,
}

impl ServiceClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .context("build http client")?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    /// POST a JSON body, check the response against `schema`, deserialize.
    #[instrument(skip_all, fields(path))]
    pub fn post_checked<T: DeserializeOwned>(
        &self,
        path: &str,
        body: &impl Serialize,
        schema: &str,
    ) -> Result<T> {
        let url = self.url(path);
        debug!(url = %url, "posting to collaborator");
        let response = self
            .client
            .post(&url)
            .json(body)
            .send()
            .with_context(|| format!("post {url}"))?
            .error_for_status()
            .with_context(|| format!("post {url}"))?;
        let value: Value = response
            .json()
            .with_context(|| format!("parse response from {url}"))?;
        validate_shape(&value, schema).with_context(|| format!("response shape from {url}"))?;
        serde_json::from_value(value).with_context(|| format!("deserialize response from {url}"))
    }

    /// POST a JSON body and discard whatever comes back (fire-and-forget).
    pub fn post_discard(&self, path: &str, body: &impl Serialize) -> Result<()> {
        let url = self.url(path);
        debug!(url = %url, "posting to collaborator (fire-and-forget)");
        self.client
            .post(&url)
            .json(body)
            .send()
            .with_context(|| format!("post {url}"))?
            .error_for_status()
            .with_context(|| format!("post {url}"))?;
        Ok(())
    }
}

/// Validate a JSON instance against a JSON Schema (Draft 2020-12).
fn validate_shape(instance: &Value, schema_raw: &str) -> Result<()> {
    let schema: Value = serde_json::from_str(schema_raw).context("parse embedded schema")?;
    let compiled = jsonschema::options()
        .with_draft(Draft::Draft202012)
        .build(&schema)
        .context("compile json schema")?;
    let messages: Vec<String> = compiled
        .iter_errors(instance)
        .map(|err| err.to_string())
        .collect();
    if !messages.is_empty() {
        bail!("schema validation failed:\n- {}", messages.join("\n- "));
    }
    Ok(())
}

pub struct HttpGenerator {
    client: ServiceClient,
}

impl Generator for HttpGenerator {
    fn generate(&self, request: &GenerateRequest) -> Result<GenerateResponse> {
        self.client.post_checked("generate", request, GENERATE_SCHEMA)
    }
}

pub struct HttpSandbox {
    client: ServiceClient,
}

impl Sandbox for HttpSandbox {
    /// Transport failures come back as a result with `error` set, the same
    /// shape the sandbox itself uses for one, so classification stays in
    /// one place.
    fn execute(&self, request: &ExecuteRequest) -> Result<RawResult> {
        Ok(self
            .client
            .post_checked("run", request, RAW_RESULT_SCHEMA)
            .unwrap_or_else(|err| {
                warn!(err = %err, "sandbox call failed");
                RawResult::from_error(format!("{err:#}"))
            }))
    }
}

pub struct HttpTester {
    client: ServiceClient,
}

impl Tester for HttpTester {
    fn test(&self, request: &TestRequest) -> Result<RawResult> {
        Ok(self
            .client
            .post_checked("pytest", request, RAW_RESULT_SCHEMA)
            .unwrap_or_else(|err| {
                warn!(err = %err, "tester call failed");
                RawResult::from_error(format!("{err:#}"))
            }))
    }
}

pub struct HttpValidator {
    client: ServiceClient,
}

impl Validator for HttpValidator {
    fn validate(&self, request: &ValidateRequest) -> Result<ValidationReport> {
        self.client.post_checked("validate", request, VALIDATION_SCHEMA)
    }
}

pub struct HttpFixer {
    client: ServiceClient,
}

impl Fixer for HttpFixer {
    fn fix(&self, request: &FixRequest) -> Result<FixResponse> {
        self.client.post_checked("fix", request, FIX_SCHEMA)
    }
}

pub struct HttpArchiver {
    client: ServiceClient,
}

impl Archiver for HttpArchiver {
    fn store(&self, request: &ArchiveRequest) -> Result<()> {
        self.client.post_discard("store", request)
    }
}

pub struct HttpEnricher {
    client: ServiceClient,
}

impl Enricher for HttpEnricher {
    fn search(&self, request: &EnrichRequest) -> Result<EnrichResponse> {
        self.client.post_checked("search", request, ENRICH_SCHEMA)
    }
}

/// Build the production collaborator bundle from configured base URLs.
pub fn http_collaborators(cfg: &SelfhealConfig) -> Result<Collaborators> {
    let timeout = Duration::from_secs(cfg.http_timeout_secs);
    let client = |base_url: &str| ServiceClient::new(base_url, timeout);
    Ok(Collaborators {
        generator: Box::new(HttpGenerator {
            client: client(&cfg.services.generator)?,
        }),
        sandbox: Box::new(HttpSandbox {
            client: client(&cfg.services.sandbox)?,
        }),
        tester: Box::new(HttpTester {
            client: client(&cfg.services.tester)?,
        }),
        validator: Box::new(HttpValidator {
            client: client(&cfg.services.validator)?,
        }),
        fixer: Box::new(HttpFixer {
            client: client(&cfg.services.fixer)?,
        }),
        archiver: Box::new(HttpArchiver {
            client: client(&cfg.services.archive)?,
        }),
        enricher: Some(Box::new(HttpEnricher {
            client: client(&cfg.services.search)?,
        })),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_joining_handles_slashes() {
        let client =
            ServiceClient::new("http://127.0.0.1:8001/", Duration::from_secs(1)).expect("client");
        assert_eq!(client.url("/run"), "http://127.0.0.1:8001/run");
        assert_eq!(client.url("run"), "http://127.0.0.1:8001/run");
    }

    #[test]
    fn raw_result_schema_accepts_partial_shapes() {
        let value = serde_json::json!({"passed": false, "stderr": "NameError"});
        validate_shape(&value, RAW_RESULT_SCHEMA).expect("valid");
        let value = serde_json::json!({});
        validate_shape(&value, RAW_RESULT_SCHEMA).expect("valid");
    }

    #[test]
    fn raw_result_schema_rejects_wrong_types() {
        let value = serde_json::json!({"returncode": "zero"});
        assert!(validate_shape(&value, RAW_RESULT_SCHEMA).is_err());
        let value = serde_json::json!(["not", "an", "object"]);
        assert!(validate_shape(&value, RAW_RESULT_SCHEMA).is_err());
    }

    #[test]
    fn generate_schema_requires_code() {
        let value = serde_json::json!({"code": "x = 1"});
        validate_shape(&value, GENERATE_SCHEMA).expect("valid");
        let value = serde_json::json!({"output": "x = 1"});
        assert!(validate_shape(&value, GENERATE_SCHEMA).is_err());
    }
}
