//! Pluggable execution boundary for the rule language.
//!
//! Rule sources are compiled and evaluated by an external engine; the
//! shipped backend shells out to the `opa` binary the same way the Helm
//! chart support shells out to `helm template`. Tests use the scripted
//! [`StaticBackend`] so the engine itself is never a test dependency.

use crate::error::{Result, ScanError};
use log::debug;
use std::io::Write;
use std::process::Command;

/// Compiles and evaluates rule modules.
pub trait RuleBackend: Send + Sync {
    /// Validate a module's source. Err means the module must not load.
    fn check(&self, name: &str, source: &str) -> Result<()>;

    /// Evaluate `query` over the loaded modules with the given JSON input,
    /// returning the raw result value of the query path.
    fn eval(
        &self,
        modules: &[(String, String)],
        input: &serde_json::Value,
        query: &str,
    ) -> Result<serde_json::Value>;
}

/// Backend that invokes the external `opa` binary.
pub struct OpaExecBackend {
    binary: String,
}

impl OpaExecBackend {
    pub fn new() -> Self {
        Self {
            binary: "opa".to_string(),
        }
    }

    pub fn with_binary(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    /// Probe whether the engine binary is on PATH.
    pub fn is_available(&self) -> bool {
        Command::new(&self.binary)
            .arg("version")
            .output()
            .map(|out| out.status.success())
            .unwrap_or(false)
    }

    fn write_modules(
        &self,
        dir: &std::path::Path,
        modules: &[(String, String)],
    ) -> Result<()> {
        for (i, (name, source)) in modules.iter().enumerate() {
            // Module names may contain path separators; flatten them.
            let safe: String = name
                .chars()
                .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
                .collect();
            let path = dir.join(format!("{:03}_{}.rego", i, safe));
            let mut file = std::fs::File::create(&path)?;
            file.write_all(source.as_bytes())?;
        }
        Ok(())
    }
}

impl Default for OpaExecBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl RuleBackend for OpaExecBackend {
    fn check(&self, name: &str, source: &str) -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("module.rego");
        std::fs::write(&path, source)?;

        let output = Command::new(&self.binary)
            .arg("check")
            .arg(&path)
            .output()
            .map_err(|e| ScanError::RuleCompile {
                module: name.to_string(),
                message: format!("failed to run {}: {}", self.binary, e),
            })?;

        if output.status.success() {
            Ok(())
        } else {
            Err(ScanError::RuleCompile {
                module: name.to_string(),
                message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            })
        }
    }

    fn eval(
        &self,
        modules: &[(String, String)],
        input: &serde_json::Value,
        query: &str,
    ) -> Result<serde_json::Value> {
        let dir = tempfile::tempdir()?;
        self.write_modules(dir.path(), modules)?;

        let input_path = dir.path().join("input.json");
        let encoded = serde_json::to_vec(input)
            .map_err(|e| ScanError::Parse(e.to_string()))?;
        std::fs::write(&input_path, encoded)?;

        debug!("evaluating {} against {} modules", query, modules.len());
        let output = Command::new(&self.binary)
            .arg("eval")
            .arg("--format")
            .arg("json")
            .arg("--data")
            .arg(dir.path())
            .arg("--input")
            .arg(&input_path)
            .arg(query)
            .output()
            .map_err(|e| ScanError::RuleEval {
                resource: query.to_string(),
                message: format!("failed to run {}: {}", self.binary, e),
            })?;

        if !output.status.success() {
            return Err(ScanError::RuleEval {
                resource: query.to_string(),
                message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let parsed: serde_json::Value = serde_json::from_slice(&output.stdout)
            .map_err(|e| ScanError::RuleEval {
                resource: query.to_string(),
                message: format!("unparseable engine output: {}", e),
            })?;

        // Engine output shape: {"result": [{"expressions": [{"value": ...}]}]}.
        // An empty result means the query path is undefined.
        let value = parsed
            .get("result")
            .and_then(|r| r.get(0))
            .and_then(|r| r.get("expressions"))
            .and_then(|e| e.get(0))
            .and_then(|e| e.get("value"))
            .cloned()
            .unwrap_or(serde_json::Value::Null);
        Ok(value)
    }
}

/// Scripted backend for tests. Checks pass unless the source contains the
/// literal `INVALID`; evaluations return the preconfigured value.
pub struct StaticBackend {
    result: serde_json::Value,
}

impl StaticBackend {
    pub fn returning(result: serde_json::Value) -> Self {
        Self { result }
    }

    pub fn empty() -> Self {
        Self::returning(serde_json::Value::Null)
    }
}

impl RuleBackend for StaticBackend {
    fn check(&self, name: &str, source: &str) -> Result<()> {
        if source.contains("INVALID") {
            Err(ScanError::RuleCompile {
                module: name.to_string(),
                message: "scripted compile failure".to_string(),
            })
        } else {
            Ok(())
        }
    }

    fn eval(
        &self,
        _modules: &[(String, String)],
        _input: &serde_json::Value,
        _query: &str,
    ) -> Result<serde_json::Value> {
        Ok(self.result.clone())
    }
}
