//! Shared fixtures for the integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use foreman_engine::conductor::{
    ApprovalSignal, Classifier, Executor, ExecutorSettings, FixedSignal, SynthesisSettings,
    Synthesizer,
};
use foreman_engine::llm::{LLMError, LLMProvider, Result as LLMResult};
use foreman_engine::registry::CapabilityRegistry;
use foreman_engine::sandbox::SandboxPolicy;
use sdk::capability::{Capability, FnCapability};
use sdk::descriptor::{CapabilityDescriptor, Origin, ParamType, SideEffect};
use sdk::types::{CapabilityError, CapabilityInput, CapabilityOutput};
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

/// Language model that answers from a fixed script and records every prompt
#[derive(Default)]
pub struct ScriptedProvider {
    replies: Mutex<VecDeque<String>>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedProvider {
    pub fn new(replies: Vec<Value>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into_iter().map(|v| v.to_string()).collect()),
            prompts: Mutex::new(Vec::new()),
        })
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }

    pub fn remaining(&self) -> usize {
        self.replies.lock().unwrap().len()
    }
}

#[async_trait]
impl LLMProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, prompt: &str, _structured: bool) -> LLMResult<String> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| LLMError::ProviderUnavailable("script exhausted".into()))
    }
}

/// Register a capability backed by a closure
pub fn register_fn<F>(
    registry: &CapabilityRegistry,
    descriptor: CapabilityDescriptor,
    handler: F,
) where
    F: Fn(CapabilityInput) -> Result<CapabilityOutput, CapabilityError> + Send + Sync + 'static,
{
    let handler: Arc<dyn Capability> = Arc::new(FnCapability::new(handler));
    registry.register(descriptor, handler).unwrap();
}

pub fn builtin(name: &str, side_effect: SideEffect) -> CapabilityDescriptor {
    CapabilityDescriptor::new(name, format!("test capability {}", name), side_effect, Origin::Builtin)
}

/// `mail:fetch` (read, yields `message` identifiers), `mail:archive`
/// (write) and `mail:send` (write)
pub fn mail_registry() -> Arc<CapabilityRegistry> {
    let registry = Arc::new(CapabilityRegistry::new());
    register_fn(
        &registry,
        builtin("mail:fetch", SideEffect::Read).with_param("query", ParamType::String, false),
        |_| {
            Ok(CapabilityOutput::text("2 messages")
                .with_identifier("message", "m-1")
                .with_identifier("message", "m-2"))
        },
    );
    register_fn(
        &registry,
        builtin("mail:archive", SideEffect::Write).with_param("id", ParamType::String, true),
        |input| {
            let id = input.arg("id")?;
            if id == "m-bad" {
                return Err(CapabilityError::Failed(format!("{} is locked", id)));
            }
            Ok(CapabilityOutput::text(format!("archived {}", id)).with_effect(format!("archived {}", id)))
        },
    );
    register_fn(
        &registry,
        builtin("mail:send", SideEffect::Write).with_param("to", ParamType::String, true),
        |input| Ok(CapabilityOutput::text(format!("sent to {}", input.arg("to")?))),
    );
    registry
}

/// Executor over `registry` answering from `llm`, with temp-dir storage
pub fn executor(
    temp: &TempDir,
    registry: Arc<CapabilityRegistry>,
    llm: Arc<ScriptedProvider>,
    approve: bool,
    settings: ExecutorSettings,
) -> Executor {
    let signal: Arc<dyn ApprovalSignal> = Arc::new(FixedSignal(approve));
    let classifier = Classifier::new(llm.clone(), registry.clone(), Duration::from_secs(5));
    let synthesizer = Synthesizer::new(
        llm,
        registry.clone(),
        SandboxPolicy::new(temp.path().join("sandbox")),
        SynthesisSettings {
            generated_dir: temp.path().join("generated"),
            interpreter: vec!["python3".to_string(), "-I".to_string()],
            llm_timeout: Duration::from_secs(5),
            call_timeout: Duration::from_secs(5),
        },
    );
    Executor::new(registry, classifier, synthesizer, signal, settings)
}
