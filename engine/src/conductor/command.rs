//! Textual command parsing
//!
//! Commands look like `mail:label id=7 label="follow up"`; `&&` joins
//! invocations of the same capability into a chain. A value with spaces
//! must be quoted. `label=follow up` is rejected instead of guessing where
//! the value ends.

use crate::conductor::types::PlanStep;
use sdk::descriptor::{split_qualified_name, Arguments};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandParseError {
    #[error("empty command")]
    Empty,

    #[error("unbalanced quotes in command")]
    UnbalancedQuotes,

    #[error("'{0}' is not a qualified capability name")]
    InvalidCapability(String),

    #[error("value of '{key}' continues with unquoted '{fragment}'; quote multi-word values")]
    AmbiguousValue { key: String, fragment: String },

    #[error("expected key=value, found '{0}'")]
    ExpectedKeyValue(String),

    #[error("argument '{0}' given twice")]
    DuplicateKey(String),

    #[error("empty invocation in chain")]
    EmptyChainSegment,

    #[error("a chain must apply one capability, found '{first}' and '{other}'")]
    MixedChain { first: String, other: String },
}

/// Parse a command (or `&&` chain) into a plan step
pub fn parse_command(text: &str) -> Result<PlanStep, CommandParseError> {
    if text.trim().is_empty() {
        return Err(CommandParseError::Empty);
    }
    let tokens = shlex::split(text).ok_or(CommandParseError::UnbalancedQuotes)?;

    let mut segments: Vec<Vec<String>> = vec![Vec::new()];
    for token in tokens {
        if token == "&&" {
            segments.push(Vec::new());
        } else if let Some(current) = segments.last_mut() {
            current.push(token);
        }
    }

    let mut capability: Option<String> = None;
    let mut chain = Vec::with_capacity(segments.len());
    for segment in segments {
        let (name, arguments) = parse_invocation(&segment)?;
        match &capability {
            None => capability = Some(name),
            Some(first) if *first != name => {
                return Err(CommandParseError::MixedChain {
                    first: first.clone(),
                    other: name,
                })
            }
            Some(_) => {}
        }
        chain.push(arguments);
    }

    let capability = capability.ok_or(CommandParseError::Empty)?;
    Ok(PlanStep::chain(capability, chain))
}

fn parse_invocation(tokens: &[String]) -> Result<(String, Arguments), CommandParseError> {
    let (name, rest) = tokens
        .split_first()
        .ok_or(CommandParseError::EmptyChainSegment)?;
    if split_qualified_name(name).is_none() {
        return Err(CommandParseError::InvalidCapability(name.clone()));
    }

    let mut arguments = Arguments::new();
    let mut last_key: Option<&str> = None;
    for token in rest {
        match token.split_once('=') {
            Some((key, value)) if is_key(key) => {
                if arguments.insert(key.to_string(), value.to_string()).is_some() {
                    return Err(CommandParseError::DuplicateKey(key.to_string()));
                }
                last_key = Some(key);
            }
            _ => {
                return Err(match last_key {
                    Some(key) => CommandParseError::AmbiguousValue {
                        key: key.to_string(),
                        fragment: token.clone(),
                    },
                    None => CommandParseError::ExpectedKeyValue(token.clone()),
                })
            }
        }
    }
    Ok((name.clone(), arguments))
}

fn is_key(key: &str) -> bool {
    !key.is_empty()
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}
