//! Foreman Engine Library
//!
//! This library provides the core functionality of the Foreman engine.
//! It is used by both the main binary and integration tests.

/// Configuration management module
pub mod config;

/// File system security module
pub mod fs_guard;

/// LLM provider abstraction layer
pub mod llm;

/// Capability registry
pub mod registry;

/// Structural validation and execution of generated capabilities
pub mod sandbox;

/// Classification, synthesis, memory and step execution
pub mod conductor;

/// Built-in capabilities
pub mod tools;

/// Telemetry and Observability
pub mod telemetry;

/// CLI interface module
pub mod cli;

/// Command handlers module
pub mod handlers;
