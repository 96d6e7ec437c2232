//! Error types and handling
//!
//! This module provides the error types used throughout the Foreman engine.
//! All errors implement the `ForemanErrorExt` trait which provides
//! user-friendly hints and indicates whether errors are recoverable.
//!
//! # Security
//!
//! User hints are static strings. They never echo arguments, generated
//! source, or model output, so nothing secret leaks through a hint.

use thiserror::Error;

/// Trait for Foreman error extensions
///
/// This trait provides additional context for errors, including user-friendly
/// hints and recoverability information. All engine errors implement this trait.
pub trait ForemanErrorExt {
    /// Returns a user-friendly hint for the error
    fn user_hint(&self) -> &str;

    /// Returns whether the error is recoverable
    ///
    /// Recoverable errors can be retried or worked around by replanning.
    /// Validation rejections and registry conflicts are never retried
    /// automatically.
    fn is_recoverable(&self) -> bool;
}

/// Main engine error type
///
/// # Error Categories
///
/// - **Configuration**: Invalid or missing configuration
/// - **LLM Provider**: Transport failures, timeouts, unparseable output
/// - **Registry**: Unknown, duplicate or malformed capabilities
/// - **Sandbox**: Generated source rejected by the validator
/// - **File System**: Path validation and access errors
///
/// # Examples
///
/// ```
/// use sdk::errors::{EngineError, ForemanErrorExt};
/// use std::path::PathBuf;
///
/// let error = EngineError::PathDenied(PathBuf::from(".ssh"));
/// println!("Hint: {}", error.user_hint());
/// assert!(error.is_recoverable());
///
/// let fatal_error = EngineError::DuplicateCapability("mail:send".into());
/// assert!(!fatal_error.is_recoverable());
/// ```
#[derive(Debug, Error)]
pub enum EngineError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    // LLM provider errors
    #[error("LLM provider error: {0}")]
    LLMProvider(String),

    #[error("LLM call timed out")]
    LLMTimeout,

    #[error("Could not parse model output: {0}")]
    ModelOutput(String),

    // Registry errors
    #[error("Capability not found: {0}")]
    CapabilityNotFound(String),

    #[error("Capability already registered: {0}")]
    DuplicateCapability(String),

    #[error("Built-in capability cannot be replaced: {0}")]
    BuiltinOverride(String),

    #[error("Capability version conflict for {name}: expected {expected}, found {found}")]
    VersionConflict {
        name: String,
        expected: u32,
        found: u32,
    },

    #[error("Invalid capability schema: {0}")]
    InvalidSchema(String),

    #[error("Invalid arguments for {capability}: {reason}")]
    InvalidArguments { capability: String, reason: String },

    // Sandbox errors
    #[error("Generated source rejected: {0}")]
    ValidationRejected(String),

    #[error("Sandbox execution failed: {0}")]
    SandboxExecution(String),

    #[error("Capability timed out after {0}s")]
    CapabilityTimeout(u64),

    // Command parsing
    #[error("Ambiguous command: {0}")]
    AmbiguousCommand(String),

    // File system security errors
    #[error("Path denied: {0:?}")]
    PathDenied(std::path::PathBuf),

    #[error("Path outside workspace: {0:?}")]
    PathOutsideWorkspace(std::path::PathBuf),

    #[error("Path canonicalization failed for {0:?}: {1}")]
    PathCanonicalization(std::path::PathBuf, String),

    // Generic IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ForemanErrorExt for EngineError {
    fn user_hint(&self) -> &str {
        match self {
            // Configuration errors
            Self::Config(_) => "Check your config.toml file for errors",

            // LLM provider errors
            Self::LLMProvider(_) => "LLM provider unavailable. Check the model endpoint and network",
            Self::LLMTimeout => "LLM provider took too long to respond. Try again",
            Self::ModelOutput(_) => "The model returned an unusable answer. Try rephrasing",

            // Registry errors
            Self::CapabilityNotFound(_) => "The requested capability is not available",
            Self::DuplicateCapability(_) => "A capability with this name already exists",
            Self::BuiltinOverride(_) => "Built-in capabilities cannot be replaced",
            Self::VersionConflict { .. } => "The capability changed while it was being replaced",
            Self::InvalidSchema(_) => "The capability definition is malformed",
            Self::InvalidArguments { .. } => "The arguments do not match the capability",

            // Sandbox errors
            Self::ValidationRejected(_) => "Generated code was rejected for safety reasons",
            Self::SandboxExecution(_) => "Generated capability failed while running",
            Self::CapabilityTimeout(_) => "Capability took too long. Try a narrower request",

            Self::AmbiguousCommand(_) => "The command could not be understood unambiguously",

            // File system security errors
            Self::PathDenied(_) => "Access to this path is not allowed",
            Self::PathOutsideWorkspace(_) => "Operation must be within workspace",
            Self::PathCanonicalization(_, _) => "Invalid path specified",

            // Generic IO error
            Self::Io(_) => "File system operation failed",
        }
    }

    fn is_recoverable(&self) -> bool {
        match self {
            // Non-recoverable errors
            Self::DuplicateCapability(_)
            | Self::BuiltinOverride(_)
            | Self::VersionConflict { .. }
            | Self::InvalidSchema(_)
            | Self::ValidationRejected(_) => false,

            // All other errors are potentially recoverable
            _ => true,
        }
    }
}
