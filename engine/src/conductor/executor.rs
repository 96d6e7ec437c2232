//! Sequential Executor
//!
//! Drives one session through classify -> execute -> replan until the
//! instruction is answered, a terminal failure occurs, or the step bound is
//! hit. Steps run strictly one after another: later steps may consume
//! identifiers that earlier ones produced.
//!
//! ```text
//! Idle -> Classifying -> DirectAnswer -> Completed
//!                     -> Synthesizing -> Planning
//!                     -> Planning -> ExecutingStep [-> AwaitingApproval]
//!                                    -> Replanning -> ExecutingStep | Completed | Failed
//! ```
//!
//! A session can be aborted between steps through its [`AbortHandle`]; a
//! pending approval is resolved as denied.

use crate::conductor::approval::{ApprovalGate, ApprovalRecord, ApprovalSignal};
use crate::conductor::classifier::{ClassificationError, Classifier};
use crate::conductor::memory::Memory;
use crate::conductor::synthesizer::{SynthesisError, Synthesizer};
use crate::conductor::types::{
    render_invocation, CapabilityRequest, ChainStop, ClassificationResult, InvocationResult,
    PlanStep, StepResult,
};
use crate::config::Config;
use crate::registry::CapabilityRegistry;
use sdk::descriptor::{is_placeholder, Arguments};
use sdk::types::{CapabilityInput, Identifier};
use serde::Serialize;
use std::collections::{HashSet, VecDeque};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, info, warn};

const EACH_KEYWORD: &str = "each";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    Classifying,
    DirectAnswer,
    Synthesizing,
    Planning,
    ExecutingStep,
    AwaitingApproval,
    Replanning,
    Completed,
    Failed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Idle => "idle",
            SessionState::Classifying => "classifying",
            SessionState::DirectAnswer => "direct_answer",
            SessionState::Synthesizing => "synthesizing",
            SessionState::Planning => "planning",
            SessionState::ExecutingStep => "executing_step",
            SessionState::AwaitingApproval => "awaiting_approval",
            SessionState::Replanning => "replanning",
            SessionState::Completed => "completed",
            SessionState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Why a session failed
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("classification failed: {0}")]
    Classification(#[from] ClassificationError),

    #[error("capability '{0}' does not exist and synthesis is disabled")]
    UnknownCapability(String),

    #[error("synthesis failed: {0}")]
    Synthesis(#[from] SynthesisError),

    #[error("approval denied for {0}")]
    ApprovalDenied(String),

    #[error("{capability} failed: {error}")]
    Execution { capability: String, error: String },

    #[error("step limit of {0} reached")]
    StepLimitExceeded(usize),

    #[error("replanning repeated an executed step: {0}")]
    RepeatedStep(String),

    #[error("session aborted")]
    Aborted,
}

/// Terminal result of a session
#[derive(Debug)]
pub enum SessionOutcome {
    Completed {
        answer: String,
    },
    Failed {
        error: SessionError,
        /// State the executor was in when the failure happened
        state: SessionState,
        /// Last step that completed without error
        last_completed: Option<String>,
        /// Kept only when the step limit was hit, for diagnostics
        memory: Option<Memory>,
    },
}

/// Everything a finished session reports
#[derive(Debug)]
pub struct SessionReport {
    pub instruction: String,
    pub outcome: SessionOutcome,
    /// Executed steps in order, successful or not
    pub steps: Vec<StepResult>,
    pub approvals: Vec<ApprovalRecord>,
}

impl SessionReport {
    pub fn is_completed(&self) -> bool {
        matches!(self.outcome, SessionOutcome::Completed { .. })
    }

    pub fn completed_steps(&self) -> impl Iterator<Item = &StepResult> {
        self.steps.iter().filter(|s| s.success())
    }
}

/// Aborts a running session between steps
#[derive(Debug, Clone)]
pub struct AbortHandle {
    sender: Arc<watch::Sender<bool>>,
}

impl AbortHandle {
    pub fn pair() -> (Self, watch::Receiver<bool>) {
        let (sender, receiver) = watch::channel(false);
        (
            Self {
                sender: Arc::new(sender),
            },
            receiver,
        )
    }

    pub fn abort(&self) {
        let _ = self.sender.send(true);
    }
}

/// Executor bounds
#[derive(Debug, Clone)]
pub struct ExecutorSettings {
    pub max_steps: usize,
    pub call_timeout: Duration,
    pub approval_timeout: Duration,
    pub summary_entries: usize,
    pub summary_chars: usize,
    pub result_chars: usize,
    pub allow_synthesis: bool,
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self {
            max_steps: 12,
            call_timeout: Duration::from_secs(30),
            approval_timeout: Duration::from_secs(120),
            summary_entries: 8,
            summary_chars: 400,
            result_chars: 4000,
            allow_synthesis: true,
        }
    }
}

impl ExecutorSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_steps: config.executor.max_steps,
            call_timeout: config.executor.call_timeout(),
            approval_timeout: config.approval.timeout(),
            summary_entries: config.executor.summary_entries,
            summary_chars: config.executor.summary_chars,
            result_chars: config.executor.result_chars,
            allow_synthesis: config.executor.allow_synthesis,
        }
    }
}

/// How a step went wrong
enum StepFailure {
    ApprovalDenied,
    Execution(String),
}

impl StepFailure {
    /// State the session was in when the step failed
    fn state(&self) -> SessionState {
        match self {
            StepFailure::ApprovalDenied => SessionState::AwaitingApproval,
            StepFailure::Execution(_) => SessionState::ExecutingStep,
        }
    }
}

/// One argument set ready to invoke
struct Bound {
    arguments: Arguments,
    /// Identifier the set was expanded from; consumed once attempted
    identifier: Option<Identifier>,
}

/// Shared across sessions; every `run` owns its own memory and gate
pub struct Executor {
    registry: Arc<CapabilityRegistry>,
    classifier: Classifier,
    synthesizer: Synthesizer,
    signal: Arc<dyn ApprovalSignal>,
    settings: ExecutorSettings,
}

impl Executor {
    pub fn new(
        registry: Arc<CapabilityRegistry>,
        classifier: Classifier,
        synthesizer: Synthesizer,
        signal: Arc<dyn ApprovalSignal>,
        settings: ExecutorSettings,
    ) -> Self {
        Self {
            registry,
            classifier,
            synthesizer,
            signal,
            settings,
        }
    }

    pub fn registry(&self) -> &Arc<CapabilityRegistry> {
        &self.registry
    }

    /// Run `instruction` to completion
    pub async fn run(&self, instruction: &str) -> SessionReport {
        let (_handle, abort) = AbortHandle::pair();
        self.run_with_abort(instruction, abort).await
    }

    /// Run `instruction`, stopping between steps once `abort` is set
    pub async fn run_with_abort(
        &self,
        instruction: &str,
        abort: watch::Receiver<bool>,
    ) -> SessionReport {
        let mut session = Session {
            executor: self,
            instruction,
            state: SessionState::Idle,
            memory: Memory::new(self.settings.result_chars),
            gate: ApprovalGate::new(
                Arc::clone(&self.signal),
                self.settings.approval_timeout,
                abort.clone(),
            ),
            abort,
            queue: VecDeque::new(),
            steps: Vec::new(),
            attempted: HashSet::new(),
            last_completed: None,
        };

        info!("Session started: {}", instruction);
        let outcome = session.drive().await;
        match &outcome {
            SessionOutcome::Completed { .. } => {
                info!("Session completed after {} step(s)", session.steps.len())
            }
            SessionOutcome::Failed { error, state, .. } => {
                warn!("Session failed in {}: {}", state, error)
            }
        }

        SessionReport {
            instruction: instruction.to_string(),
            outcome,
            approvals: session.gate.records().to_vec(),
            steps: session.steps,
        }
    }
}

struct Session<'a> {
    executor: &'a Executor,
    instruction: &'a str,
    state: SessionState,
    memory: Memory,
    gate: ApprovalGate,
    abort: watch::Receiver<bool>,
    queue: VecDeque<PlanStep>,
    steps: Vec<StepResult>,
    /// Bound invocations already attempted, in rendered form
    attempted: HashSet<String>,
    last_completed: Option<String>,
}

impl Session<'_> {
    fn transition(&mut self, next: SessionState) {
        debug!("{} -> {}", self.state, next);
        self.state = next;
    }

    fn fail(&mut self, error: SessionError) -> SessionOutcome {
        let state = self.state;
        self.fail_in(error, state)
    }

    /// Fail with `state` reported as where the failure happened
    fn fail_in(&mut self, error: SessionError, state: SessionState) -> SessionOutcome {
        self.transition(SessionState::Failed);
        let memory = if matches!(error, SessionError::StepLimitExceeded(_)) {
            Some(self.memory.clone())
        } else {
            None
        };
        SessionOutcome::Failed {
            error,
            state,
            last_completed: self.last_completed.clone(),
            memory,
        }
    }

    fn complete(&mut self, answer: String) -> SessionOutcome {
        self.transition(SessionState::Completed);
        SessionOutcome::Completed { answer }
    }

    fn aborted(&self) -> bool {
        *self.abort.borrow()
    }

    async fn drive(&mut self) -> SessionOutcome {
        self.transition(SessionState::Classifying);
        let summary = self.summary();
        let first = match self
            .executor
            .classifier
            .classify(self.instruction, &summary)
            .await
        {
            Ok(result) => result,
            Err(e) => return self.fail(e.into()),
        };

        match first {
            ClassificationResult::DirectAnswer(answer) => {
                self.transition(SessionState::DirectAnswer);
                return self.complete(answer);
            }
            ClassificationResult::ExistingPlan(steps) => {
                if steps.is_empty() {
                    return self.complete("Nothing to do.".to_string());
                }
                self.transition(SessionState::Planning);
                self.queue.extend(steps);
            }
            ClassificationResult::UnknownCapability(request) => {
                if let Err(e) = self.synthesize(request, false).await {
                    return self.fail(e);
                }
            }
        }

        loop {
            if self.aborted() {
                return self.fail(SessionError::Aborted);
            }

            let Some(step) = self.queue.pop_front() else {
                return self.complete("Nothing left to do.".to_string());
            };

            if self.steps.len() >= self.executor.settings.max_steps {
                return self.fail(SessionError::StepLimitExceeded(
                    self.executor.settings.max_steps,
                ));
            }

            self.transition(SessionState::ExecutingStep);
            let (result, failure) = match self.execute_step(step).await {
                Ok(executed) => executed,
                Err(repeated) => return self.fail(repeated),
            };
            let step_text = result.step.render();
            let combined = result.combined_text();
            self.steps.push(result);

            let failure = match failure {
                None => {
                    self.last_completed = Some(step_text);
                    None
                }
                Some(failure) => {
                    let state = failure.state();
                    let error = match failure {
                        StepFailure::ApprovalDenied => SessionError::ApprovalDenied(step_text),
                        StepFailure::Execution(error) => SessionError::Execution {
                            capability: step_text,
                            error,
                        },
                    };
                    Some((error, state))
                }
            };

            if self.aborted() {
                return self.fail(SessionError::Aborted);
            }

            self.transition(SessionState::Replanning);
            let summary = self.summary();
            let next = match self
                .executor
                .classifier
                .classify(self.instruction, &summary)
                .await
            {
                Ok(result) => result,
                Err(e) => return self.fail(e.into()),
            };

            match next {
                ClassificationResult::DirectAnswer(answer) => return self.complete(answer),
                ClassificationResult::ExistingPlan(steps) if steps.is_empty() => {
                    return match failure {
                        None => self.complete(combined),
                        Some((error, state)) => self.fail_in(error, state),
                    };
                }
                ClassificationResult::ExistingPlan(steps) => {
                    self.queue = steps
                        .into_iter()
                        .map(|mut s| {
                            s.dynamic = true;
                            s
                        })
                        .collect();
                }
                ClassificationResult::UnknownCapability(request) => {
                    self.queue.clear();
                    if let Err(e) = self.synthesize(request, true).await {
                        return self.fail(e);
                    }
                }
            }
        }
    }

    fn summary(&self) -> String {
        self.memory.summarize(
            self.executor.settings.summary_entries,
            self.executor.settings.summary_chars,
        )
    }

    /// Synthesis path; on success the new capability is queued
    async fn synthesize(&mut self, request: CapabilityRequest, dynamic: bool) -> Result<(), SessionError> {
        if !self.executor.settings.allow_synthesis {
            return Err(SessionError::UnknownCapability(request.name));
        }
        self.transition(SessionState::Synthesizing);
        let descriptor = self.executor.synthesizer.synthesize(&request).await?;

        let mut step = PlanStep::new(descriptor.name, request.arguments)
            .with_rationale(request.description);
        step.dynamic = dynamic;
        self.queue.push_back(step);
        self.transition(SessionState::Planning);
        Ok(())
    }

    /// Execute one step. `Err` only for the repetition heuristic; step
    /// failures are part of the returned result.
    async fn execute_step(
        &mut self,
        step: PlanStep,
    ) -> Result<(StepResult, Option<StepFailure>), SessionError> {
        let mut result = StepResult {
            step: step.clone(),
            results: Vec::new(),
            stopped: None,
        };

        let entry = match self.executor.registry.resolve(&step.capability) {
            Ok(entry) => entry,
            Err(e) => {
                let error = e.to_string();
                self.memory.record_incident(&step, &error);
                result.stopped = Some(ChainStop { index: 0, error: error.clone() });
                return Ok((result, Some(StepFailure::Execution(error))));
            }
        };

        let bound = match self.bind(&step) {
            Ok(bound) => bound,
            Err(error) => {
                self.memory.record_incident(&step, &error);
                result.stopped = Some(ChainStop { index: 0, error: error.clone() });
                return Ok((result, Some(StepFailure::Execution(error))));
            }
        };

        let rendered: Vec<String> = bound
            .iter()
            .map(|b| render_invocation(&step.capability, &b.arguments))
            .collect();
        if step.dynamic && !rendered.is_empty() && rendered.iter().all(|r| self.attempted.contains(r)) {
            return Err(SessionError::RepeatedStep(rendered.join(" && ")));
        }

        if bound.is_empty() {
            info!("{}: no unprocessed identifiers, nothing to run", step.capability);
            result.results.push(InvocationResult {
                arguments: Arguments::new(),
                text: "no unprocessed items".to_string(),
                identifiers: Vec::new(),
                effects: Vec::new(),
            });
            return Ok((result, None));
        }

        info!("Executing {} ({} invocation(s))", step.capability, bound.len());
        for (index, (binding, text)) in bound.into_iter().zip(rendered).enumerate() {
            self.attempted.insert(text);
            let Bound {
                arguments,
                identifier,
            } = binding;
            // Attempted now; a later {{each:KIND}} must not bind it again
            if let Some(identifier) = &identifier {
                self.memory.consume(&identifier.kind, &identifier.value);
            }

            let single = PlanStep {
                arguments: vec![arguments.clone()],
                ..step.clone()
            };

            if let Err(e) = entry.descriptor.check_arguments(&arguments) {
                let error = e.to_string();
                self.memory.record_incident(&single, &error);
                result.stopped = Some(ChainStop { index, error: error.clone() });
                return Ok((result, Some(StepFailure::Execution(error))));
            }

            if entry.descriptor.requires_approval() {
                self.transition(SessionState::AwaitingApproval);
            }
            let record = self.gate.authorize(&entry.descriptor, &arguments).await;
            self.transition(SessionState::ExecutingStep);
            if !record.approved() {
                let error = "approval denied".to_string();
                self.memory.record_incident(&single, &error);
                result.stopped = Some(ChainStop { index, error });
                return Ok((result, Some(StepFailure::ApprovalDenied)));
            }

            let input = CapabilityInput {
                capability: step.capability.clone(),
                arguments: arguments.clone(),
            };
            let outcome = tokio::time::timeout(
                self.executor.settings.call_timeout,
                entry.handler.invoke(input),
            )
            .await;

            match outcome {
                Ok(Ok(output)) => {
                    let invocation = InvocationResult {
                        arguments,
                        text: output.text,
                        identifiers: output.identifiers,
                        effects: output.effects,
                    };
                    self.memory.record(&step, &invocation);
                    result.results.push(invocation);
                }
                Ok(Err(e)) => {
                    let error = e.to_string();
                    warn!("{} failed: {}", single.render(), error);
                    self.memory.record_incident(&single, &error);
                    result.stopped = Some(ChainStop { index, error: error.clone() });
                    return Ok((result, Some(StepFailure::Execution(error))));
                }
                Err(_) => {
                    let error = format!(
                        "timed out after {}s",
                        self.executor.settings.call_timeout.as_secs()
                    );
                    warn!("{} {}", single.render(), error);
                    self.memory.record_incident(&single, &error);
                    result.stopped = Some(ChainStop { index, error: error.clone() });
                    return Ok((result, Some(StepFailure::Execution(error))));
                }
            }
        }

        Ok((result, None))
    }

    /// Resolve `{{each:KIND}}` placeholders. An argument set holding one
    /// expands to one set per identifier of that kind not yet consumed.
    /// Nothing is consumed here; see `execute_step`.
    fn bind(&self, step: &PlanStep) -> Result<Vec<Bound>, String> {
        let mut bound = Vec::new();
        let mut reserved: HashSet<Identifier> = HashSet::new();
        for arguments in &step.arguments {
            let mut kind: Option<&str> = None;
            for value in arguments.values().filter(|v| is_placeholder(v)) {
                let k = each_kind(value)?;
                match kind {
                    Some(existing) if existing != k => {
                        return Err("one {{each:KIND}} kind per argument set".to_string())
                    }
                    _ => kind = Some(k),
                }
            }

            match kind {
                None => bound.push(Bound {
                    arguments: arguments.clone(),
                    identifier: None,
                }),
                Some(kind) => {
                    for value in self.memory.pending(kind) {
                        let identifier = Identifier::new(kind, value.as_str());
                        if !reserved.insert(identifier.clone()) {
                            continue;
                        }
                        let expanded = arguments
                            .iter()
                            .map(|(name, v)| {
                                let v = if is_placeholder(v) { value.clone() } else { v.clone() };
                                (name.clone(), v)
                            })
                            .collect();
                        bound.push(Bound {
                            arguments: expanded,
                            identifier: Some(identifier),
                        });
                    }
                }
            }
        }
        Ok(bound)
    }
}

/// Kind named by an `{{each:KIND}}` placeholder. Whitespace is allowed
/// around the braces, the keyword, the colon and the kind.
fn each_kind(value: &str) -> Result<&str, String> {
    let trimmed = value.trim();
    let inner = trimmed
        .strip_prefix("{{")
        .and_then(|v| v.strip_suffix("}}"))
        .map(str::trim)
        .ok_or_else(|| format!("malformed placeholder {}", trimmed))?;
    let kind = inner
        .strip_prefix(EACH_KEYWORD)
        .map(str::trim_start)
        .and_then(|v| v.strip_prefix(':'))
        .map(str::trim)
        .ok_or_else(|| format!("unresolved placeholder {}", trimmed))?;
    if kind.is_empty() {
        return Err(format!("placeholder {} names no kind", trimmed));
    }
    Ok(kind)
}
