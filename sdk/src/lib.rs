//! Foreman SDK
//!
//! Shared library providing the capability trait, descriptor schema and
//! error types. The engine and every capability handler build on it.

/// Capability trait
pub mod capability;

/// Capability descriptor types
pub mod descriptor;

/// Error types and handling
pub mod errors;

/// Capability input/output types
pub mod types;

// Re-export commonly used types
pub use capability::{Capability, FnCapability};
pub use descriptor::{
    Arguments, ArgumentError, CapabilityDescriptor, Origin, ParamSpec, ParamType, SchemaError,
    SideEffect,
};
pub use errors::{EngineError, ForemanErrorExt};
pub use types::{CapabilityError, CapabilityInput, CapabilityOutput, Identifier};
