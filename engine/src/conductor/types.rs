//! Conductor data types

use sdk::descriptor::Arguments;
use sdk::types::Identifier;
use serde::{Deserialize, Serialize};
use std::fmt;

/// One element of a plan.
///
/// A step applies a single capability to one or more argument sets. More
/// than one set makes it a chain: the invocations run in order as one unit
/// and stop at the first failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanStep {
    pub capability: String,
    /// Argument sets, one per invocation. Values may hold `{{each:KIND}}`
    /// placeholders bound from Memory at execution time.
    pub arguments: Vec<Arguments>,
    pub rationale: String,
    /// Appended by replanning rather than present in the first plan
    #[serde(default)]
    pub dynamic: bool,
}

impl PlanStep {
    /// A single-invocation step
    pub fn new(capability: impl Into<String>, arguments: Arguments) -> Self {
        Self {
            capability: capability.into(),
            arguments: vec![arguments],
            rationale: String::new(),
            dynamic: false,
        }
    }

    pub fn chain(capability: impl Into<String>, arguments: Vec<Arguments>) -> Self {
        Self {
            capability: capability.into(),
            arguments,
            rationale: String::new(),
            dynamic: false,
        }
    }

    pub fn with_rationale(mut self, rationale: impl Into<String>) -> Self {
        self.rationale = rationale.into();
        self
    }

    pub fn is_chain(&self) -> bool {
        self.arguments.len() > 1
    }

    /// Textual form, e.g. `mail:label id=7 label="follow up"`
    pub fn render(&self) -> String {
        self.arguments
            .iter()
            .map(|args| render_invocation(&self.capability, args))
            .collect::<Vec<_>>()
            .join(" && ")
    }
}

impl fmt::Display for PlanStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

pub(crate) fn render_invocation(capability: &str, args: &Arguments) -> String {
    let mut out = capability.to_string();
    for (key, value) in args {
        out.push(' ');
        out.push_str(key);
        out.push('=');
        if value.is_empty() || value.contains(char::is_whitespace) || value.contains('"') {
            out.push('"');
            out.push_str(&value.replace('\\', "\\\\").replace('"', "\\\""));
            out.push('"');
        } else {
            out.push_str(value);
        }
    }
    out
}

/// A capability the model asked for that does not exist yet
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilityRequest {
    /// Requested qualified name (`namespace:action`)
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub examples: Vec<String>,
    /// Arguments to run the new capability with once registered
    #[serde(default)]
    pub arguments: Arguments,
    /// Extra constraints a caller adds when re-requesting after a rejection
    #[serde(default)]
    pub constraints: Vec<String>,
}

impl CapabilityRequest {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            examples: Vec::new(),
            arguments: Arguments::new(),
            constraints: Vec::new(),
        }
    }

    pub fn with_constraint(mut self, constraint: impl Into<String>) -> Self {
        self.constraints.push(constraint.into());
        self
    }
}

/// Validated outcome of one classification call.
///
/// Model output never travels further than the classifier; everything past
/// it sees only these variants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClassificationResult {
    DirectAnswer(String),
    /// Steps in order; may be empty when replanning reports nothing left to do
    ExistingPlan(Vec<PlanStep>),
    UnknownCapability(CapabilityRequest),
}

impl ClassificationResult {
    pub fn category(&self) -> &'static str {
        match self {
            ClassificationResult::DirectAnswer(_) => "direct_answer",
            ClassificationResult::ExistingPlan(_) => "existing_plan",
            ClassificationResult::UnknownCapability(_) => "unknown_capability",
        }
    }
}

/// A validated classification and the confidence the model reported,
/// if any (`0.0..=1.0`)
#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub result: ClassificationResult,
    pub confidence: Option<f64>,
}

/// Result of one atomic invocation inside a step
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InvocationResult {
    pub arguments: Arguments,
    pub text: String,
    pub identifiers: Vec<Identifier>,
    pub effects: Vec<String>,
}

/// Where a chain stopped
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChainStop {
    /// Zero-based index of the invocation that failed
    pub index: usize,
    pub error: String,
}

/// Outcome of executing one plan step
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepResult {
    pub step: PlanStep,
    /// Successful invocations in order
    pub results: Vec<InvocationResult>,
    pub stopped: Option<ChainStop>,
}

impl StepResult {
    pub fn success(&self) -> bool {
        self.stopped.is_none()
    }

    /// Results concatenated, followed by the stop marker if any
    pub fn combined_text(&self) -> String {
        let mut parts: Vec<String> = self.results.iter().map(|r| r.text.clone()).collect();
        if let Some(stop) = &self.stopped {
            parts.push(format!(
                "[chain stopped at invocation {}: {}]",
                stop.index + 1,
                stop.error
            ));
        }
        parts.join("\n")
    }
}
