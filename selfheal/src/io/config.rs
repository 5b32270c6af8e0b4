//! Orchestrator configuration (TOML).

use std::fs;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

/// Workflow configuration.
///
/// This file is intended to be edited by humans and must remain stable and
/// automatable. Missing fields default to sensible values.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SelfhealConfig {
    /// Repair budget used when the caller does not supply one.
    pub max_attempts_default: u32,

    /// Ceiling on diagnosis re-entries within one run, independent of the
    /// attempt budget.
    pub analyze_limit: u32,

    /// Hard ceiling on executed steps per run. A safety valve against
    /// routing bugs, not a tuning knob.
    pub step_limit: u32,

    /// Wall-clock limit passed to the sandbox per program run, in seconds.
    pub sandbox_timeout_secs: u64,

    /// Wall-clock limit passed to the tester per suite run, in seconds.
    pub test_timeout_secs: u64,

    /// Client-side timeout for every collaborator HTTP call, in seconds.
    /// Must cover the sandbox and tester limits above.
    pub http_timeout_secs: u64,

    pub services: ServiceUrls,
}

/// Base URLs of the collaborator services.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ServiceUrls {
    pub sandbox: String,
    pub tester: String,
    pub search: String,
    pub archive: String,
    pub generator: String,
    pub fixer: String,
    pub validator: String,
}

impl Default for ServiceUrls {
    fn default() -> Self {
        Self {
            sandbox: "http://127.0.0.1:8001".to_string(),
            tester: "http://127.0.0.1:8002".to_string(),
            search: "http://127.0.0.1:8003".to_string(),
            archive: "http://127.0.0.1:8005".to_string(),
            generator: "http://127.0.0.1:8006".to_string(),
            fixer: "http://127.0.0.1:8007".to_string(),
            validator: "http://127.0.0.1:8008".to_string(),
        }
    }
}

impl Default for SelfhealConfig {
    fn default() -> Self {
        Self {
            max_attempts_default: 3,
            analyze_limit: 20,
            step_limit: 40,
            sandbox_timeout_secs: 8,
            test_timeout_secs: 30,
            http_timeout_secs: 60,
            services: ServiceUrls::default(),
        }
    }
}

impl SelfhealConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_attempts_default == 0 {
            return Err(anyhow!("max_attempts_default must be > 0"));
        }
        if self.analyze_limit == 0 {
            return Err(anyhow!("analyze_limit must be > 0"));
        }
        if self.step_limit == 0 {
            return Err(anyhow!("step_limit must be > 0"));
        }
        if self.sandbox_timeout_secs == 0 || self.test_timeout_secs == 0 {
            return Err(anyhow!("collaborator timeouts must be > 0"));
        }
        if self.http_timeout_secs < self.sandbox_timeout_secs
            || self.http_timeout_secs < self.test_timeout_secs
        {
            return Err(anyhow!(
                "http_timeout_secs must cover sandbox_timeout_secs and test_timeout_secs"
            ));
        }
        for (name, url) in [
            ("sandbox", &self.services.sandbox),
            ("tester", &self.services.tester),
            ("search", &self.services.search),
            ("archive", &self.services.archive),
            ("generator", &self.services.generator),
            ("fixer", &self.services.fixer),
            ("validator", &self.services.validator),
        ] {
            if url.trim().is_empty() {
                return Err(anyhow!("services.{name} must be a non-empty url"));
            }
        }
        Ok(())
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `SelfhealConfig::default()`.
pub fn load_config(path: &Path) -> Result<SelfhealConfig> {
    if !path.exists() {
        let cfg = SelfhealConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: SelfhealConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &SelfhealConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    let parent = path
        .parent()
        .with_context(|| format!("config path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, &buf)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}
