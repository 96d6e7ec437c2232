//! Capability input/output types

use crate::descriptor::Arguments;
use serde::{Deserialize, Serialize};

/// Input to a capability invocation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapabilityInput {
    /// Qualified name of the capability being invoked
    pub capability: String,
    pub arguments: Arguments,
}

impl CapabilityInput {
    /// Create a new CapabilityInput
    pub fn new(capability: impl Into<String>) -> Self {
        Self {
            capability: capability.into(),
            arguments: Arguments::new(),
        }
    }

    /// Add an argument
    pub fn with_arg(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.arguments.insert(key.into(), value.into());
        self
    }

    /// Get a required argument
    pub fn arg(&self, key: &str) -> Result<&str, CapabilityError> {
        self.arguments
            .get(key)
            .map(String::as_str)
            .ok_or_else(|| CapabilityError::MissingArgument(key.to_string()))
    }

    /// Get an optional argument
    pub fn arg_opt(&self, key: &str) -> Option<&str> {
        self.arguments.get(key).map(String::as_str)
    }

    /// Get a required integer argument
    pub fn arg_i64(&self, key: &str) -> Result<i64, CapabilityError> {
        let raw = self.arg(key)?;
        raw.trim()
            .parse()
            .map_err(|_| CapabilityError::InvalidArgument(format!("{}={}", key, raw)))
    }
}

/// A reusable identifier produced by an invocation (e.g. a record ID),
/// consumable by later steps through session memory
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Identifier {
    pub kind: String,
    pub value: String,
}

impl Identifier {
    pub fn new(kind: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            value: value.into(),
        }
    }
}

/// Output from a capability invocation
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CapabilityOutput {
    /// Result text shown to the planner
    pub text: String,

    /// Side effects actually performed (e.g. `wrote notes.txt`)
    #[serde(default)]
    pub effects: Vec<String>,

    /// Identifiers later steps may consume
    #[serde(default)]
    pub identifiers: Vec<Identifier>,
}

impl CapabilityOutput {
    /// Create an output with text only
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }

    /// Record a performed side effect
    pub fn with_effect(mut self, effect: impl Into<String>) -> Self {
        self.effects.push(effect.into());
        self
    }

    /// Attach a reusable identifier
    pub fn with_identifier(mut self, kind: impl Into<String>, value: impl Into<String>) -> Self {
        self.identifiers.push(Identifier::new(kind, value));
        self
    }
}

/// Capability-specific errors
#[derive(Debug, thiserror::Error)]
pub enum CapabilityError {
    #[error("Missing argument: {0}")]
    MissingArgument(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Capability unavailable: {0}")]
    Unavailable(String),

    #[error("Capability failed: {0}")]
    Failed(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capability_input_args() {
        let input = CapabilityInput::new("mail:fetch")
            .with_arg("query", "from:bob")
            .with_arg("limit", "5");

        assert_eq!(input.arg("query").unwrap(), "from:bob");
        assert_eq!(input.arg_i64("limit").unwrap(), 5);
        assert_eq!(input.arg_opt("missing"), None);
        assert!(matches!(
            input.arg("missing"),
            Err(CapabilityError::MissingArgument(_))
        ));
    }

    #[test]
    fn test_arg_i64_invalid() {
        let input = CapabilityInput::new("mail:fetch").with_arg("limit", "five");
        assert!(matches!(
            input.arg_i64("limit"),
            Err(CapabilityError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_output_builders() {
        let output = CapabilityOutput::text("2 messages")
            .with_identifier("message_id", "m1")
            .with_identifier("message_id", "m2")
            .with_effect("marked read");

        assert_eq!(output.identifiers.len(), 2);
        assert_eq!(output.identifiers[0], Identifier::new("message_id", "m1"));
        assert_eq!(output.effects, vec!["marked read".to_string()]);
    }

    #[test]
    fn test_output_deserializes_plain_text_shape() {
        let output: CapabilityOutput = serde_json::from_str(r#"{"text": "done"}"#).unwrap();
        assert_eq!(output.text, "done");
        assert!(output.identifiers.is_empty());
    }
}
