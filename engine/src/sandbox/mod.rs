//! Code Validator / Sandbox Gate
//!
//! Generated capability units are Python-family scripts. Before a unit can
//! be registered its source is tokenized and walked structurally against a
//! [`SandboxPolicy`]; only a passing [`ValidationReport`] lets it through.
//! Validation is pure: the same source and policy always produce the same
//! report, with violations sorted and de-duplicated.
//!
//! Rule classes:
//! - **dynamic execution**: `eval`, `exec`, `compile`, `__import__`,
//!   `importlib`, computed `getattr`/`setattr`, `globals`, `vars`, dunder
//!   escape attributes, including references by value (`e = eval`), and
//!   `host.invoke` whose capability name is not a literal
//! - **disallowed import**: modules outside the allowed set, relative imports
//! - **filesystem escape**: path calls whose argument is neither a literal
//!   inside the sandbox root nor routed through `host.sandbox_path`
//! - **unrouted network**: network modules or calls not going through
//!   `host.invoke`
//! - **credential access**: environment reads, keyring, literals naming
//!   credential files
//! - **malformed**: source that cannot be tokenized

mod analyzer;
mod lexer;
pub mod runner;

pub use runner::GeneratedCapability;

use crate::config::SandboxConfig;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;
use tracing::{debug, warn};

/// What generated source may touch
#[derive(Debug, Clone)]
pub struct SandboxPolicy {
    pub allowed_modules: BTreeSet<String>,
    /// Call names rejected on top of the built-in dynamic execution set
    pub forbidden_calls: BTreeSet<String>,
    /// Directory generated units run in; literal paths must stay inside it
    pub sandbox_root: PathBuf,
}

impl SandboxPolicy {
    /// Default policy rooted at `sandbox_root`
    pub fn new(sandbox_root: PathBuf) -> Self {
        Self::from_config(&SandboxConfig::default(), sandbox_root)
    }

    pub fn from_config(config: &SandboxConfig, sandbox_root: PathBuf) -> Self {
        Self {
            allowed_modules: config.allowed_modules.iter().cloned().collect(),
            forbidden_calls: config.forbidden_calls.iter().cloned().collect(),
            sandbox_root,
        }
    }

    /// Comma-separated allowed modules, for prompts
    pub fn describe_modules(&self) -> String {
        self.allowed_modules
            .iter()
            .cloned()
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// Class of a rule violation
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleClass {
    DynamicExecution,
    DisallowedImport,
    FilesystemEscape,
    UnroutedNetwork,
    CredentialAccess,
    Malformed,
}

impl RuleClass {
    pub fn as_str(self) -> &'static str {
        match self {
            RuleClass::DynamicExecution => "dynamic_execution",
            RuleClass::DisallowedImport => "disallowed_import",
            RuleClass::FilesystemEscape => "filesystem_escape",
            RuleClass::UnroutedNetwork => "unrouted_network",
            RuleClass::CredentialAccess => "credential_access",
            RuleClass::Malformed => "malformed",
        }
    }
}

impl fmt::Display for RuleClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One forbidden construct found in the source
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct Violation {
    pub line: usize,
    pub rule: RuleClass,
    pub construct: String,
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {}: [{}] {}", self.line, self.rule, self.construct)
    }
}

/// Side effects the source structurally performs
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct InferredEffects {
    /// Opens a file for writing or calls a mutating filesystem function
    pub writes_files: bool,
    /// Calls `host.invoke`
    pub invokes_host: bool,
    /// Capabilities named by `host.invoke`; only literal names pass validation
    pub invoke_targets: BTreeSet<String>,
}

/// Outcome of validating one source text
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationReport {
    pub passed: bool,
    pub violations: Vec<Violation>,
    /// SHA-256 of the analyzed source, hex encoded
    pub source_hash: String,
    pub effects: InferredEffects,
}

impl ValidationReport {
    /// Violations joined into one line each
    pub fn summary(&self) -> String {
        self.violations
            .iter()
            .map(|v| v.to_string())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

pub fn source_hash(source: &str) -> String {
    hex::encode(Sha256::digest(source.as_bytes()))
}

/// Validate generated source against `policy`
pub fn validate(source: &str, policy: &SandboxPolicy) -> ValidationReport {
    let source_hash = source_hash(source);

    let (mut violations, effects) = match lexer::tokenize(source) {
        Ok(tokens) => {
            debug!("Validating {} tokens ({})", tokens.len(), &source_hash[..12]);
            analyzer::analyze(&tokens, policy)
        }
        Err(e) => (
            vec![Violation {
                line: e.line,
                rule: RuleClass::Malformed,
                construct: e.message,
            }],
            InferredEffects::default(),
        ),
    };

    violations.sort();
    violations.dedup();

    if !violations.is_empty() {
        warn!(
            "Source {} rejected with {} violation(s)",
            &source_hash[..12],
            violations.len()
        );
    }

    ValidationReport {
        passed: violations.is_empty(),
        violations,
        source_hash,
        effects,
    }
}
