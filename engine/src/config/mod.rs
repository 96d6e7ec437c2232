//! Configuration management
//!
//! This module handles loading, validation, and management of the Foreman
//! configuration. Configuration is stored in TOML format at
//! ~/.foreman/config.toml.
//!
//! # Configuration Sections
//!
//! - **core**: Workspace path, log level, data directory
//! - **llm**: Model transport (`ollama` or `command`) and its settings
//! - **executor**: Step bound, call timeout, memory summary budgets
//! - **approval**: Confirmation timeout and auto-approve flag
//! - **sandbox**: Validator policy and the interpreter for generated units
//!
//! # Path Expansion
//!
//! The configuration system automatically:
//! - Expands ~ to the user's home directory
//! - Canonicalizes the workspace path, creating it when missing
//! - Creates the data directory if it doesn't exist
//!
//! # Examples
//!
//! ```no_run
//! use foreman_engine::config::Config;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::load_or_create()?;
//!
//! println!("Workspace: {:?}", config.core.workspace);
//! println!("Provider: {}", config.llm.provider);
//! # Ok(())
//! # }
//! ```

use sdk::errors::EngineError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Core engine settings
    pub core: CoreConfig,

    /// Language-model transport
    pub llm: LLMConfig,

    /// Executor bounds
    #[serde(default)]
    pub executor: ExecutorConfig,

    /// Approval gate settings
    #[serde(default)]
    pub approval: ApprovalConfig,

    /// Sandbox policy for generated capabilities
    #[serde(default)]
    pub sandbox: SandboxConfig,
}

/// Core engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreConfig {
    /// Workspace directory path (supports ~ expansion)
    pub workspace: PathBuf,

    /// Log level (error, warn, info, debug, trace)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Data directory path (supports ~ expansion); generated units live
    /// under `<data_dir>/generated`
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

/// LLM transport configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LLMConfig {
    /// Transport to use (ollama, command)
    #[serde(default = "default_provider")]
    pub provider: String,

    /// Per-call timeout in seconds
    #[serde(default = "default_llm_timeout")]
    pub timeout_secs: u64,

    /// Ollama provider settings
    #[serde(default)]
    pub ollama: OllamaConfig,

    /// Command provider settings
    #[serde(default)]
    pub command: CommandConfig,
}

/// Ollama provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OllamaConfig {
    /// Base URL for Ollama API
    #[serde(default = "default_ollama_base_url")]
    pub base_url: String,

    /// Model name
    #[serde(default = "default_ollama_model")]
    pub model: String,
}

/// Command provider configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CommandConfig {
    /// Program and arguments; the prompt is written to stdin
    #[serde(default)]
    pub argv: Vec<String>,
}

/// Executor configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorConfig {
    /// Maximum number of executed steps per session
    #[serde(default = "default_max_steps")]
    pub max_steps: usize,

    /// Per-invocation timeout in seconds
    #[serde(default = "default_call_timeout")]
    pub call_timeout_secs: u64,

    /// Newest memory entries included in a replanning prompt
    #[serde(default = "default_summary_entries")]
    pub summary_entries: usize,

    /// Character budget per memory entry in a replanning prompt
    #[serde(default = "default_summary_chars")]
    pub summary_chars: usize,

    /// Characters of each result stored in memory
    #[serde(default = "default_result_chars")]
    pub result_chars: usize,

    /// Synthesize missing capabilities instead of failing the session
    #[serde(default = "default_true")]
    pub allow_synthesis: bool,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_steps: default_max_steps(),
            call_timeout_secs: default_call_timeout(),
            summary_entries: default_summary_entries(),
            summary_chars: default_summary_chars(),
            result_chars: default_result_chars(),
            allow_synthesis: true,
        }
    }
}

/// Approval gate configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalConfig {
    /// Seconds to wait for a confirmation before denying
    #[serde(default = "default_approval_timeout")]
    pub timeout_secs: u64,

    /// Approve every request without prompting
    #[serde(default)]
    pub auto_approve: bool,
}

impl Default for ApprovalConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_approval_timeout(),
            auto_approve: false,
        }
    }
}

/// Sandbox configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxConfig {
    /// Modules generated source may import
    #[serde(default = "default_allowed_modules")]
    pub allowed_modules: Vec<String>,

    /// Extra call names rejected on top of the built-in dynamic execution set
    #[serde(default)]
    pub forbidden_calls: Vec<String>,

    /// Interpreter argv for generated units
    #[serde(default = "default_interpreter")]
    pub interpreter: Vec<String>,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            allowed_modules: default_allowed_modules(),
            forbidden_calls: Vec::new(),
            interpreter: default_interpreter(),
        }
    }
}

// Default value functions
fn default_log_level() -> String {
    "info".to_string()
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("~/.foreman")
}

fn default_provider() -> String {
    "ollama".to_string()
}

fn default_llm_timeout() -> u64 {
    120
}

fn default_ollama_base_url() -> String {
    "http://localhost:11434".to_string()
}

fn default_ollama_model() -> String {
    "llama3.1:8b".to_string()
}

fn default_max_steps() -> usize {
    12
}

fn default_call_timeout() -> u64 {
    30
}

fn default_summary_entries() -> usize {
    8
}

fn default_summary_chars() -> usize {
    400
}

fn default_result_chars() -> usize {
    4000
}

fn default_true() -> bool {
    true
}

fn default_approval_timeout() -> u64 {
    120
}

fn default_allowed_modules() -> Vec<String> {
    [
        "json",
        "re",
        "math",
        "datetime",
        "collections",
        "itertools",
        "functools",
        "string",
        "textwrap",
        "typing",
        "dataclasses",
        "host",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_interpreter() -> Vec<String> {
    vec!["python3".to_string(), "-I".to_string()]
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            base_url: default_ollama_base_url(),
            model: default_ollama_model(),
        }
    }
}

impl Default for LLMConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            timeout_secs: default_llm_timeout(),
            ollama: OllamaConfig::default(),
            command: CommandConfig::default(),
        }
    }
}

impl LLMConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl ExecutorConfig {
    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }
}

impl ApprovalConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Config {
    /// Load configuration from the default location (~/.foreman/config.toml)
    ///
    /// If the configuration file doesn't exist, creates a default configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Configuration file cannot be read
    /// - TOML parsing fails
    /// - Validation fails (invalid paths, unknown provider, zero bounds)
    pub fn load_or_create() -> Result<Self, EngineError> {
        let config_path = Self::default_config_path()?;
        Self::load_or_create_at(&config_path)
    }

    /// Load configuration from `path`, writing defaults there first when
    /// the file is missing
    pub fn load_or_create_at(path: &Path) -> Result<Self, EngineError> {
        if path.exists() {
            Self::load_from_path(path)
        } else {
            Self::create_default(path)
        }
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: &Path) -> Result<Self, EngineError> {
        let contents = fs::read_to_string(path)
            .map_err(|e| EngineError::Config(format!("Failed to read config file: {}", e)))?;

        let mut config: Config = toml::from_str(&contents)
            .map_err(|e| EngineError::Config(format!("Failed to parse config: {}", e)))?;

        config.validate_and_process()?;

        Ok(config)
    }

    /// Create default configuration and save to path
    fn create_default(path: &Path) -> Result<Self, EngineError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                EngineError::Config(format!("Failed to create config directory: {}", e))
            })?;
        }

        // Serialize before processing so the file keeps the portable ~ paths
        let config = Self::default_config();
        let toml_string = toml::to_string_pretty(&config)
            .map_err(|e| EngineError::Config(format!("Failed to serialize config: {}", e)))?;

        fs::write(path, toml_string)
            .map_err(|e| EngineError::Config(format!("Failed to write config file: {}", e)))?;

        let mut config = config;
        config.validate_and_process()?;
        Ok(config)
    }

    /// Get the default configuration file path (~/.foreman/config.toml)
    fn default_config_path() -> Result<PathBuf, EngineError> {
        let home = dirs::home_dir()
            .ok_or_else(|| EngineError::Config("Could not determine home directory".to_string()))?;

        Ok(home.join(".foreman").join("config.toml"))
    }

    /// Create a default configuration
    pub fn default_config() -> Self {
        Self {
            core: CoreConfig {
                workspace: PathBuf::from("~/foreman-workspace"),
                log_level: default_log_level(),
                data_dir: default_data_dir(),
            },
            llm: LLMConfig::default(),
            executor: ExecutorConfig::default(),
            approval: ApprovalConfig::default(),
            sandbox: SandboxConfig::default(),
        }
    }

    /// Directory holding generated capability units
    pub fn generated_dir(&self) -> PathBuf {
        self.core.data_dir.join("generated")
    }

    /// Working directory of generated units
    pub fn sandbox_dir(&self) -> PathBuf {
        self.core.data_dir.join("sandbox")
    }

    /// Validate and process configuration
    ///
    /// This method:
    /// - Validates enumerated and bounded fields
    /// - Expands ~ in paths
    /// - Canonicalizes the workspace, creating it if it doesn't exist
    /// - Creates the data directory if it doesn't exist
    pub fn validate_and_process(&mut self) -> Result<(), EngineError> {
        let valid_log_levels = ["error", "warn", "info", "debug", "trace"];
        if !valid_log_levels.contains(&self.core.log_level.as_str()) {
            return Err(EngineError::Config(format!(
                "Invalid log level '{}'. Must be one of: {}",
                self.core.log_level,
                valid_log_levels.join(", ")
            )));
        }

        let valid_providers = ["ollama", "command"];
        if !valid_providers.contains(&self.llm.provider.as_str()) {
            return Err(EngineError::Config(format!(
                "Invalid provider '{}'. Must be one of: {}",
                self.llm.provider,
                valid_providers.join(", ")
            )));
        }

        if self.llm.provider == "command" && self.llm.command.argv.is_empty() {
            return Err(EngineError::Config(
                "llm.command.argv must name a program when provider = \"command\"".to_string(),
            ));
        }

        if self.llm.timeout_secs == 0 || self.executor.call_timeout_secs == 0 {
            return Err(EngineError::Config(
                "timeouts must be at least one second".to_string(),
            ));
        }

        if self.executor.max_steps == 0 {
            return Err(EngineError::Config(
                "executor.max_steps must be at least 1".to_string(),
            ));
        }

        if self.executor.summary_entries == 0 || self.executor.summary_chars == 0 {
            return Err(EngineError::Config(
                "executor summary budgets must be positive".to_string(),
            ));
        }

        if self.sandbox.interpreter.is_empty() {
            return Err(EngineError::Config(
                "sandbox.interpreter must name a program".to_string(),
            ));
        }

        self.core.workspace = expand_path(&self.core.workspace)?;
        self.core.workspace = canonicalize_or_create(&self.core.workspace)?;

        if !self.core.workspace.is_dir() {
            return Err(EngineError::Config(format!(
                "Workspace path is not a directory: {:?}",
                self.core.workspace
            )));
        }

        self.core.data_dir = expand_path(&self.core.data_dir)?;
        self.core.data_dir = canonicalize_or_create(&self.core.data_dir)?;

        Ok(())
    }
}

/// Expand ~ in path to user's home directory
fn expand_path(path: &Path) -> Result<PathBuf, EngineError> {
    let path_str = path
        .to_str()
        .ok_or_else(|| EngineError::Config("Invalid UTF-8 in path".to_string()))?;

    if let Some(rest) = path_str.strip_prefix("~/") {
        let home = dirs::home_dir()
            .ok_or_else(|| EngineError::Config("Could not determine home directory".to_string()))?;

        Ok(home.join(rest))
    } else if path_str == "~" {
        dirs::home_dir()
            .ok_or_else(|| EngineError::Config("Could not determine home directory".to_string()))
    } else {
        Ok(path.to_path_buf())
    }
}

/// Canonicalize path, creating it if it doesn't exist
fn canonicalize_or_create(path: &Path) -> Result<PathBuf, EngineError> {
    if !path.exists() {
        fs::create_dir_all(path).map_err(|e| {
            EngineError::Config(format!("Failed to create directory {:?}: {}", path, e))
        })?;
    }

    path.canonicalize()
        .map_err(|e| EngineError::PathCanonicalization(path.to_path_buf(), e.to_string()))
}
