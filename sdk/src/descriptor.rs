//! Capability descriptor types
//!
//! A descriptor is the registry's immutable record of an invocable action:
//! its qualified name (`namespace:action`), input schema, side-effect class,
//! example invocations and origin. Descriptors are never mutated in place;
//! a regenerated capability is a new descriptor with a higher version.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use thiserror::Error;

/// Named string arguments bound to a capability invocation.
///
/// A `BTreeMap` keeps argument order stable, which makes approval identities
/// and rendered commands deterministic.
pub type Arguments = BTreeMap<String, String>;

/// Side-effect classification of a capability
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SideEffect {
    /// Pure computation
    None,
    /// Reads external state
    Read,
    /// Writes external state
    Write,
    /// Talks to a remote service
    Network,
    /// Irreversible change
    Destructive,
}

impl SideEffect {
    /// Whether an invocation must pass the approval gate
    pub fn requires_approval(self) -> bool {
        matches!(
            self,
            SideEffect::Write | SideEffect::Network | SideEffect::Destructive
        )
    }

    /// Parse the lowercase wire name
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "none" => Some(SideEffect::None),
            "read" => Some(SideEffect::Read),
            "write" => Some(SideEffect::Write),
            "network" => Some(SideEffect::Network),
            "destructive" => Some(SideEffect::Destructive),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SideEffect::None => "none",
            SideEffect::Read => "read",
            SideEffect::Write => "write",
            SideEffect::Network => "network",
            SideEffect::Destructive => "destructive",
        }
    }
}

impl fmt::Display for SideEffect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a capability came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Origin {
    /// Registered at process start; never overridable
    Builtin,
    /// Produced by the synthesizer after validation
    Generated,
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Origin::Builtin => write!(f, "builtin"),
            Origin::Generated => write!(f, "generated"),
        }
    }
}

/// Scalar type of a declared parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    String,
    Integer,
    Boolean,
}

impl ParamType {
    /// Check that a raw string value parses as this type
    pub fn accepts(self, value: &str) -> bool {
        match self {
            ParamType::String => true,
            ParamType::Integer => value.trim().parse::<i64>().is_ok(),
            ParamType::Boolean => matches!(value.trim(), "true" | "false"),
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "string" | "str" | "text" => Some(ParamType::String),
            "integer" | "int" | "number" => Some(ParamType::Integer),
            "boolean" | "bool" => Some(ParamType::Boolean),
            _ => None,
        }
    }
}

impl fmt::Display for ParamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamType::String => write!(f, "string"),
            ParamType::Integer => write!(f, "integer"),
            ParamType::Boolean => write!(f, "boolean"),
        }
    }
}

/// One declared input parameter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParamSpec {
    pub name: String,

    /// `None` only for malformed schemas; registration rejects it
    #[serde(rename = "type", default)]
    pub param_type: Option<ParamType>,

    #[serde(default = "default_required")]
    pub required: bool,

    #[serde(default)]
    pub description: String,
}

fn default_required() -> bool {
    true
}

impl ParamSpec {
    pub fn new(name: impl Into<String>, param_type: ParamType, required: bool) -> Self {
        Self {
            name: name.into(),
            param_type: Some(param_type),
            required,
            description: String::new(),
        }
    }
}

/// Immutable record of an invocable capability
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilityDescriptor {
    /// Qualified name, `namespace:action`
    pub name: String,
    pub description: String,
    /// Ordered input schema
    pub params: Vec<ParamSpec>,
    pub side_effect: SideEffect,
    #[serde(default)]
    pub examples: Vec<String>,
    pub origin: Origin,
    #[serde(default = "default_version")]
    pub version: u32,
}

fn default_version() -> u32 {
    1
}

/// Schema problems that make a descriptor unregistrable
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchemaError {
    #[error("invalid qualified name '{0}' (expected namespace:action)")]
    InvalidName(String),

    #[error("parameter with empty name")]
    EmptyParameterName,

    #[error("parameter '{0}' declared twice")]
    DuplicateParameter(String),

    #[error("parameter '{0}' has no type")]
    MissingType(String),
}

/// Argument sets that do not fit a descriptor's schema
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ArgumentError {
    #[error("unknown parameter '{0}'")]
    UnknownParameter(String),

    #[error("missing required parameter '{0}'")]
    MissingRequired(String),

    #[error("parameter '{param}' expects {expected}, got '{value}'")]
    InvalidValue {
        param: String,
        expected: ParamType,
        value: String,
    },
}

impl CapabilityDescriptor {
    /// Create a descriptor with an empty schema
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        side_effect: SideEffect,
        origin: Origin,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            params: Vec::new(),
            side_effect,
            examples: Vec::new(),
            origin,
            version: 1,
        }
    }

    /// Append a parameter to the schema
    pub fn with_param(mut self, name: impl Into<String>, param_type: ParamType, required: bool) -> Self {
        self.params.push(ParamSpec::new(name, param_type, required));
        self
    }

    /// Add an example invocation string
    pub fn with_example(mut self, example: impl Into<String>) -> Self {
        self.examples.push(example.into());
        self
    }

    pub fn requires_approval(&self) -> bool {
        self.side_effect.requires_approval()
    }

    pub fn namespace(&self) -> &str {
        split_qualified_name(&self.name)
            .map(|(ns, _)| ns)
            .unwrap_or("")
    }

    pub fn action(&self) -> &str {
        split_qualified_name(&self.name)
            .map(|(_, action)| action)
            .unwrap_or("")
    }

    /// Check the descriptor is well-formed enough to register
    pub fn validate_schema(&self) -> Result<(), SchemaError> {
        if split_qualified_name(&self.name).is_none() {
            return Err(SchemaError::InvalidName(self.name.clone()));
        }

        let mut seen = HashSet::new();
        for param in &self.params {
            if param.name.trim().is_empty() {
                return Err(SchemaError::EmptyParameterName);
            }
            if !seen.insert(param.name.as_str()) {
                return Err(SchemaError::DuplicateParameter(param.name.clone()));
            }
            if param.param_type.is_none() {
                return Err(SchemaError::MissingType(param.name.clone()));
            }
        }

        Ok(())
    }

    /// Check an argument set against the input schema.
    ///
    /// Placeholder values (`{{...}}`) are not type-checked; they are bound
    /// from session memory before the invocation runs.
    pub fn check_arguments(&self, args: &Arguments) -> Result<(), ArgumentError> {
        for key in args.keys() {
            if !self.params.iter().any(|p| &p.name == key) {
                return Err(ArgumentError::UnknownParameter(key.clone()));
            }
        }

        for param in &self.params {
            match args.get(&param.name) {
                None if param.required => {
                    return Err(ArgumentError::MissingRequired(param.name.clone()));
                }
                None => {}
                Some(value) if is_placeholder(value) => {}
                Some(value) => {
                    if let Some(expected) = param.param_type {
                        if !expected.accepts(value) {
                            return Err(ArgumentError::InvalidValue {
                                param: param.name.clone(),
                                expected,
                                value: value.clone(),
                            });
                        }
                    }
                }
            }
        }

        Ok(())
    }

    /// One-line signature used when advertising capabilities to a model,
    /// e.g. `mail:send(to: string, body?: string) [write]`
    pub fn signature(&self) -> String {
        let params = self
            .params
            .iter()
            .map(|p| {
                let ty = p
                    .param_type
                    .map(|t| t.to_string())
                    .unwrap_or_else(|| "?".to_string());
                if p.required {
                    format!("{}: {}", p.name, ty)
                } else {
                    format!("{}?: {}", p.name, ty)
                }
            })
            .collect::<Vec<_>>()
            .join(", ");
        format!("{}({}) [{}]", self.name, params, self.side_effect)
    }
}

/// Split `namespace:action`, validating both halves.
///
/// Each half is non-empty and made of lowercase ASCII letters, digits, `_`
/// or `-`.
pub fn split_qualified_name(name: &str) -> Option<(&str, &str)> {
    let (namespace, action) = name.split_once(':')?;
    let valid = |part: &str| {
        !part.is_empty()
            && part
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-')
    };
    if valid(namespace) && valid(action) {
        Some((namespace, action))
    } else {
        None
    }
}

/// Whether a value is a memory placeholder such as `{{each:message_id}}`
pub fn is_placeholder(value: &str) -> bool {
    let trimmed = value.trim();
    trimmed.starts_with("{{") && trimmed.ends_with("}}")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn send_descriptor() -> CapabilityDescriptor {
        CapabilityDescriptor::new("mail:send", "Send a mail", SideEffect::Write, Origin::Builtin)
            .with_param("to", ParamType::String, true)
            .with_param("count", ParamType::Integer, false)
    }

    #[test]
    fn test_requires_approval_follows_side_effect() {
        assert!(!SideEffect::None.requires_approval());
        assert!(!SideEffect::Read.requires_approval());
        assert!(SideEffect::Write.requires_approval());
        assert!(SideEffect::Network.requires_approval());
        assert!(SideEffect::Destructive.requires_approval());
    }

    #[test]
    fn test_split_qualified_name() {
        assert_eq!(split_qualified_name("label:apply"), Some(("label", "apply")));
        assert_eq!(split_qualified_name("label"), None);
        assert_eq!(split_qualified_name(":apply"), None);
        assert_eq!(split_qualified_name("Label:apply"), None);
        assert_eq!(split_qualified_name("a:b:c"), None);
    }

    #[test]
    fn test_missing_type_is_schema_error() {
        let mut descriptor = send_descriptor();
        descriptor.params[0].param_type = None;
        assert_eq!(
            descriptor.validate_schema(),
            Err(SchemaError::MissingType("to".to_string()))
        );
    }

    #[test]
    fn test_duplicate_parameter_is_schema_error() {
        let descriptor = send_descriptor().with_param("to", ParamType::String, false);
        assert!(matches!(
            descriptor.validate_schema(),
            Err(SchemaError::DuplicateParameter(_))
        ));
    }

    #[test]
    fn test_check_arguments() {
        let descriptor = send_descriptor();

        let mut args = Arguments::new();
        args.insert("to".into(), "bob@example.com".into());
        assert!(descriptor.check_arguments(&args).is_ok());

        args.insert("count".into(), "three".into());
        assert!(matches!(
            descriptor.check_arguments(&args),
            Err(ArgumentError::InvalidValue { .. })
        ));

        args.insert("count".into(), "{{each:message_id}}".into());
        assert!(descriptor.check_arguments(&args).is_ok());

        args.insert("cc".into(), "x".into());
        assert_eq!(
            descriptor.check_arguments(&args),
            Err(ArgumentError::UnknownParameter("cc".to_string()))
        );

        let empty = Arguments::new();
        assert_eq!(
            descriptor.check_arguments(&empty),
            Err(ArgumentError::MissingRequired("to".to_string()))
        );
    }

    #[test]
    fn test_signature() {
        assert_eq!(
            send_descriptor().signature(),
            "mail:send(to: string, count?: integer) [write]"
        );
    }

    #[test]
    fn test_descriptor_json_shape() {
        let json = r#"{
            "name": "label:apply",
            "description": "Apply a label",
            "params": [{"name": "id", "type": "string"}],
            "side_effect": "write",
            "origin": "generated"
        }"#;
        let descriptor: CapabilityDescriptor = serde_json::from_str(json).unwrap();
        assert_eq!(descriptor.version, 1);
        assert!(descriptor.params[0].required);
        assert_eq!(descriptor.origin, Origin::Generated);
    }
}
