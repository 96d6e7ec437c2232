//! Conductor System
//!
//! Turns a natural-language instruction into a sequence of capability
//! invocations: classify, synthesize what is missing, execute step by step
//! behind the approval gate, and replan from memory after every step.

pub mod approval;
pub mod classifier;
pub mod command;
pub mod executor;
pub mod memory;
pub mod synthesizer;
pub mod types;

pub use approval::{ApprovalGate, ApprovalRecord, ApprovalSignal, FixedSignal, TerminalSignal};
pub use classifier::{ClassificationError, Classifier};
pub use command::{parse_command, CommandParseError};
pub use executor::{
    AbortHandle, Executor, ExecutorSettings, SessionError, SessionOutcome, SessionReport,
    SessionState,
};
pub use memory::Memory;
pub use synthesizer::{SynthesisError, SynthesisSettings, Synthesizer};
pub use types::{CapabilityRequest, Classification, ClassificationResult, PlanStep, StepResult};

use crate::config::Config;
use crate::llm::LLMProvider;
use crate::registry::CapabilityRegistry;
use crate::sandbox::SandboxPolicy;
use std::sync::Arc;

/// Wire an executor from configuration around an existing registry.
///
/// The classifier and the synthesizer share `llm`; generated units run
/// inside `config.sandbox_dir()`.
pub fn build_executor(
    config: &Config,
    registry: Arc<CapabilityRegistry>,
    llm: Arc<dyn LLMProvider>,
    signal: Arc<dyn ApprovalSignal>,
) -> Executor {
    let classifier = Classifier::new(Arc::clone(&llm), Arc::clone(&registry), config.llm.timeout());
    let policy = SandboxPolicy::from_config(&config.sandbox, config.sandbox_dir());
    let synthesizer = Synthesizer::new(
        llm,
        Arc::clone(&registry),
        policy,
        SynthesisSettings {
            generated_dir: config.generated_dir(),
            interpreter: config.sandbox.interpreter.clone(),
            llm_timeout: config.llm.timeout(),
            call_timeout: config.executor.call_timeout(),
        },
    );

    Executor::new(
        registry,
        classifier,
        synthesizer,
        signal,
        ExecutorSettings::from_config(config),
    )
}
