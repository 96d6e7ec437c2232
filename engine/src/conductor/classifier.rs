//! Classifier
//!
//! Asks the model to categorize an instruction and turns its JSON answer
//! into a [`ClassificationResult`]. The answer must:
//!
//! - match one of the three response shapes
//! - name only capabilities the registry resolves, with arguments that fit
//!   their schemas
//! - not request a new capability under a built-in's name
//!
//! A rejected answer earns one corrective re-prompt that quotes the reason.
//! A second rejection is a [`ClassificationError::Rejected`]; nothing is
//! guessed. Transport failures are returned as they are, without a retry.

use crate::conductor::command::parse_command;
use crate::conductor::types::{CapabilityRequest, Classification, ClassificationResult, PlanStep};
use crate::llm::{complete_with_timeout, extract_json_object, LLMError, LLMProvider};
use crate::registry::CapabilityRegistry;
use sdk::descriptor::{split_qualified_name, Arguments, CapabilityDescriptor, Origin};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

const MAX_ATTEMPTS: u8 = 2;

#[derive(Debug, Error)]
pub enum ClassificationError {
    #[error("language model transport failed: {0}")]
    Transport(#[from] LLMError),

    #[error("model output rejected after {attempts} attempts: {reason}")]
    Rejected { attempts: u8, reason: String },
}

/// Wire shape of the model's answer
#[derive(Debug, Deserialize)]
#[serde(tag = "category", rename_all = "snake_case")]
enum RawClassification {
    DirectAnswer {
        answer: String,
    },
    ExistingPlan {
        #[serde(default)]
        steps: Vec<RawStep>,
    },
    UnknownCapability {
        request: RawRequest,
    },
}

#[derive(Debug, Deserialize)]
struct RawStep {
    capability: Option<String>,
    arguments: Option<Map<String, Value>>,
    chain: Option<Vec<Map<String, Value>>>,
    /// Textual form, `ns:action key=value && ...`
    command: Option<String>,
    #[serde(default)]
    rationale: String,
}

#[derive(Debug, Deserialize)]
struct RawRequest {
    name: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    examples: Vec<String>,
    #[serde(default)]
    arguments: Map<String, Value>,
}

pub struct Classifier {
    llm: Arc<dyn LLMProvider>,
    registry: Arc<CapabilityRegistry>,
    timeout: Duration,
}

impl Classifier {
    pub fn new(llm: Arc<dyn LLMProvider>, registry: Arc<CapabilityRegistry>, timeout: Duration) -> Self {
        Self {
            llm,
            registry,
            timeout,
        }
    }

    /// Classify `instruction` given what the session has done so far
    pub async fn classify(
        &self,
        instruction: &str,
        memory_summary: &str,
    ) -> Result<ClassificationResult, ClassificationError> {
        self.classify_detailed(instruction, memory_summary)
            .await
            .map(|c| c.result)
    }

    /// Like `classify`, keeping the confidence the model reported
    pub async fn classify_detailed(
        &self,
        instruction: &str,
        memory_summary: &str,
    ) -> Result<Classification, ClassificationError> {
        let snapshot = self.registry.list(None);
        let base_prompt = build_prompt(instruction, memory_summary, &snapshot);
        let mut prompt = base_prompt.clone();

        for attempt in 1..=MAX_ATTEMPTS {
            debug!("Classification attempt {}/{}", attempt, MAX_ATTEMPTS);
            let raw = complete_with_timeout(self.llm.as_ref(), &prompt, true, self.timeout).await?;

            match self.interpret(&raw) {
                Ok(classification) => {
                    match classification.confidence {
                        Some(confidence) => info!(
                            "Classified as {} (confidence {:.2})",
                            classification.result.category(),
                            confidence
                        ),
                        None => info!("Classified as {}", classification.result.category()),
                    }
                    return Ok(classification);
                }
                Err(reason) if attempt < MAX_ATTEMPTS => {
                    warn!("Rejected model output: {}", reason);
                    prompt = corrective_prompt(&base_prompt, &raw, &reason);
                }
                Err(reason) => {
                    warn!("Rejected model output again: {}", reason);
                    return Err(ClassificationError::Rejected {
                        attempts: attempt,
                        reason,
                    });
                }
            }
        }

        Err(ClassificationError::Rejected {
            attempts: MAX_ATTEMPTS,
            reason: "no attempt made".to_string(),
        })
    }

    /// Parse and validate one raw completion
    fn interpret(&self, raw: &str) -> Result<Classification, String> {
        let json = extract_json_object(raw).ok_or("response contains no JSON object")?;
        let value: Value =
            serde_json::from_str(json).map_err(|e| format!("response is not valid JSON: {}", e))?;
        let confidence = match value.get("confidence") {
            None | Some(Value::Null) => None,
            Some(Value::Number(n)) => match n.as_f64() {
                Some(c) if (0.0..=1.0).contains(&c) => Some(c),
                _ => return Err("confidence must be between 0.0 and 1.0".to_string()),
            },
            Some(_) => return Err("confidence must be a number".to_string()),
        };
        let parsed: RawClassification = serde_json::from_value(value)
            .map_err(|e| format!("response does not match the expected schema: {}", e))?;

        self.validate(parsed)
            .map(|result| Classification { result, confidence })
    }

    fn validate(&self, parsed: RawClassification) -> Result<ClassificationResult, String> {
        match parsed {
            RawClassification::DirectAnswer { answer } => {
                if answer.trim().is_empty() {
                    return Err("direct_answer with an empty answer".to_string());
                }
                Ok(ClassificationResult::DirectAnswer(answer))
            }
            RawClassification::ExistingPlan { steps } => {
                let mut plan = Vec::with_capacity(steps.len());
                for (index, raw_step) in steps.into_iter().enumerate() {
                    let step = self
                        .validate_step(raw_step)
                        .map_err(|reason| format!("step {}: {}", index + 1, reason))?;
                    plan.push(step);
                }
                Ok(ClassificationResult::ExistingPlan(plan))
            }
            RawClassification::UnknownCapability { request } => {
                self.validate_request(request).map(ClassificationResult::UnknownCapability)
            }
        }
    }

    fn validate_step(&self, raw: RawStep) -> Result<PlanStep, String> {
        let step = match (raw.command, raw.capability) {
            (Some(command), _) => parse_command(&command).map_err(|e| e.to_string())?,
            (None, Some(capability)) => {
                let sets = match (raw.chain, raw.arguments) {
                    (Some(chain), _) if !chain.is_empty() => chain,
                    (Some(_), _) => return Err("empty chain".to_string()),
                    (None, Some(arguments)) => vec![arguments],
                    (None, None) => vec![Map::new()],
                };
                let arguments = sets
                    .into_iter()
                    .map(|set| stringify_arguments(&set))
                    .collect::<Result<Vec<_>, _>>()?;
                PlanStep::chain(capability, arguments)
            }
            (None, None) => return Err("step names no capability".to_string()),
        };

        let entry = self
            .registry
            .resolve(&step.capability)
            .map_err(|_| format!("unknown capability '{}'", step.capability))?;
        for arguments in &step.arguments {
            entry
                .descriptor
                .check_arguments(arguments)
                .map_err(|e| format!("{}: {}", step.capability, e))?;
        }

        Ok(step.with_rationale(raw.rationale))
    }

    fn validate_request(&self, raw: RawRequest) -> Result<CapabilityRequest, String> {
        if split_qualified_name(&raw.name).is_none() {
            return Err(format!("'{}' is not a valid namespace:action name", raw.name));
        }
        if let Ok(existing) = self.registry.resolve(&raw.name) {
            if existing.descriptor.origin == Origin::Builtin {
                return Err(format!(
                    "'{}' is a built-in capability; use it or pick another name",
                    raw.name
                ));
            }
        }
        if raw.description.trim().is_empty() {
            return Err(format!("request for '{}' has no description", raw.name));
        }

        Ok(CapabilityRequest {
            name: raw.name,
            description: raw.description,
            examples: raw.examples,
            arguments: stringify_arguments(&raw.arguments)?,
            constraints: Vec::new(),
        })
    }
}

/// Argument values arrive as JSON; scalars become strings
fn stringify_arguments(raw: &Map<String, Value>) -> Result<Arguments, String> {
    raw.iter()
        .map(|(key, value)| {
            let text = match value {
                Value::String(s) => s.clone(),
                Value::Number(n) => n.to_string(),
                Value::Bool(b) => b.to_string(),
                _ => return Err(format!("argument '{}' must be a string, number or boolean", key)),
            };
            Ok((key.clone(), text))
        })
        .collect()
}

fn build_prompt(instruction: &str, memory_summary: &str, capabilities: &[CapabilityDescriptor]) -> String {
    let mut catalog = String::new();
    for descriptor in capabilities {
        catalog.push_str(&format!("- {}: {}\n", descriptor.signature(), descriptor.description));
        for example in &descriptor.examples {
            catalog.push_str(&format!("    e.g. {}\n", example));
        }
    }
    if catalog.is_empty() {
        catalog.push_str("(none)\n");
    }

    format!(
        "You plan work for a local assistant. Decide how to handle the instruction.\n\
        Respond with ONE JSON object and nothing else, in one of these shapes:\n\
        {{\"category\":\"direct_answer\",\"answer\":\"...\"}}\n\
        {{\"category\":\"existing_plan\",\"steps\":[{{\"capability\":\"ns:action\",\"arguments\":{{\"key\":\"value\"}},\"rationale\":\"...\"}}]}}\n\
        {{\"category\":\"unknown_capability\",\"request\":{{\"name\":\"ns:action\",\"description\":\"...\",\"examples\":[\"ns:action key=value\"],\"arguments\":{{\"key\":\"value\"}}}}}}\n\n\
        Rules:\n\
        - Only use capabilities from the list below, with their declared parameters.\n\
        - To apply one capability to several items use \"chain\": [{{...}}, {{...}}] instead of \"arguments\".\n\
        - Use the value \"{{{{each:KIND}}}}\" to run a step once per identifier of KIND found by earlier steps.\n\
        - Ask for a new capability only when nothing listed can do the job; never reuse a listed built-in name.\n\
        - You may add \"confidence\": a number between 0.0 and 1.0.\n\
        - If the steps already executed satisfy the instruction, answer with direct_answer summarizing the result,\n  \
        or existing_plan with an empty steps list.\n\n\
        Available capabilities:\n{}\n\
        Steps executed so far:\n{}\n\n\
        Instruction: {}\n",
        catalog, memory_summary, instruction
    )
}

fn corrective_prompt(base: &str, previous: &str, reason: &str) -> String {
    format!(
        "{}\nYour previous response was rejected.\nResponse: {}\nReason: {}\n\
        Answer again with one corrected JSON object only.\n",
        base,
        previous.trim(),
        reason
    )
}
