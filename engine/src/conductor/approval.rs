//! Approval Gate
//!
//! Every invocation passes through [`ApprovalGate::authorize`] before it
//! runs. Capabilities classified `none` or `read` are approved without a
//! prompt. `write`, `network` and `destructive` ones wait for an external
//! [`ApprovalSignal`]; no answer within the timeout counts as a denial.
//! An approval covers the exact capability and argument set it was given
//! for, for the rest of the session.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use regex::Regex;
use sdk::descriptor::{Arguments, CapabilityDescriptor, SideEffect};
use serde::Serialize;
use std::collections::HashSet;
use std::io::Write;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::watch;
use tracing::{info, warn};

const REDACTED: &str = "[REDACTED]";

/// Argument names whose values are never shown
const SECRET_KEYS: &[&str] = &[
    "password",
    "passwd",
    "secret",
    "token",
    "api_key",
    "apikey",
    "authorization",
    "credential",
    "cookie",
    "private_key",
];

static SECRET_PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();

fn secret_patterns() -> &'static Vec<Regex> {
    SECRET_PATTERNS.get_or_init(|| {
        vec![
            Regex::new(r"sk-[a-zA-Z0-9\-_]{20,}").expect("Invalid OpenAI pattern"),
            Regex::new(r"AIza[0-9A-Za-z\-_]{35}").expect("Invalid Google pattern"),
            Regex::new(r"gh[pousr]_[a-zA-Z0-9]{36}").expect("Invalid GitHub pattern"),
            Regex::new(r"xox[abprs]-[a-zA-Z0-9\-]{10,}").expect("Invalid Slack pattern"),
            Regex::new(r"AKIA[0-9A-Z]{16}").expect("Invalid AWS pattern"),
            Regex::new(r"Bearer\s+[^\s]{20,}").expect("Invalid Bearer pattern"),
            Regex::new(r"-----BEGIN [A-Z ]*PRIVATE KEY-----").expect("Invalid key pattern"),
        ]
    })
}

/// Replace secret-looking substrings with `[REDACTED]`
pub fn scrub(text: &str) -> String {
    let mut result = text.to_string();
    for pattern in secret_patterns() {
        result = pattern.replace_all(&result, REDACTED).to_string();
    }
    result
}

/// Arguments safe to show and record
pub fn redact_arguments(arguments: &Arguments) -> Arguments {
    arguments
        .iter()
        .map(|(key, value)| {
            let lower = key.to_ascii_lowercase();
            let value = if SECRET_KEYS.iter().any(|s| lower.contains(s)) {
                REDACTED.to_string()
            } else {
                scrub(value)
            };
            (key.clone(), value)
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    Approved,
    Denied,
}

/// Immutable record of one authorization
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ApprovalRecord {
    pub capability: String,
    /// Redacted copy of the bound arguments
    pub arguments: Arguments,
    pub side_effect: SideEffect,
    pub decision: Decision,
    /// Whether the external signal was consulted
    pub prompted: bool,
    pub timestamp: DateTime<Utc>,
}

impl ApprovalRecord {
    pub fn approved(&self) -> bool {
        self.decision == Decision::Approved
    }
}

/// What the external collaborator is asked to confirm
#[derive(Debug, Clone)]
pub struct ApprovalRequest {
    pub capability: String,
    pub description: String,
    pub side_effect: SideEffect,
    /// Redacted
    pub arguments: Arguments,
}

impl ApprovalRequest {
    pub fn prompt(&self) -> String {
        let args: Vec<String> = self
            .arguments
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect();
        format!(
            "Allow {} [{}] {}? ({})",
            self.capability,
            self.side_effect,
            args.join(" "),
            self.description
        )
    }
}

/// Source of yes/no confirmations
#[async_trait]
pub trait ApprovalSignal: Send + Sync {
    async fn confirm(&self, request: &ApprovalRequest) -> bool;
}

/// Asks on the terminal; anything but `y`/`yes` denies
pub struct TerminalSignal;

#[async_trait]
impl ApprovalSignal for TerminalSignal {
    async fn confirm(&self, request: &ApprovalRequest) -> bool {
        // Prompt goes to stderr so --json output stays clean
        eprint!("{} [y/N]: ", request.prompt());
        let _ = std::io::stderr().flush();

        let mut line = String::new();
        let mut stdin = BufReader::new(tokio::io::stdin());
        match stdin.read_line(&mut line).await {
            Ok(_) => matches!(line.trim().to_ascii_lowercase().as_str(), "y" | "yes"),
            Err(e) => {
                warn!("Failed to read approval answer: {}", e);
                false
            }
        }
    }
}

/// Always gives the same answer (`--yes`, tests)
pub struct FixedSignal(pub bool);

#[async_trait]
impl ApprovalSignal for FixedSignal {
    async fn confirm(&self, _request: &ApprovalRequest) -> bool {
        self.0
    }
}

/// Per-session approval checkpoint
pub struct ApprovalGate {
    signal: Arc<dyn ApprovalSignal>,
    timeout: Duration,
    abort: watch::Receiver<bool>,
    /// capability + exact arguments already approved this session
    approved: HashSet<(String, Arguments)>,
    records: Vec<ApprovalRecord>,
}

impl ApprovalGate {
    pub fn new(
        signal: Arc<dyn ApprovalSignal>,
        timeout: Duration,
        abort: watch::Receiver<bool>,
    ) -> Self {
        Self {
            signal,
            timeout,
            abort,
            approved: HashSet::new(),
            records: Vec::new(),
        }
    }

    /// Authorize one invocation of `descriptor` with `arguments`
    pub async fn authorize(
        &mut self,
        descriptor: &CapabilityDescriptor,
        arguments: &Arguments,
    ) -> ApprovalRecord {
        let key = (descriptor.name.clone(), arguments.clone());
        let redacted = redact_arguments(arguments);

        let (decision, prompted) = if !descriptor.requires_approval() {
            (Decision::Approved, false)
        } else if self.approved.contains(&key) {
            (Decision::Approved, false)
        } else {
            let request = ApprovalRequest {
                capability: descriptor.name.clone(),
                description: descriptor.description.clone(),
                side_effect: descriptor.side_effect,
                arguments: redacted.clone(),
            };
            let decision = if self.ask(&request).await {
                self.approved.insert(key);
                Decision::Approved
            } else {
                Decision::Denied
            };
            (decision, true)
        };

        let record = ApprovalRecord {
            capability: descriptor.name.clone(),
            arguments: redacted,
            side_effect: descriptor.side_effect,
            decision,
            prompted,
            timestamp: Utc::now(),
        };
        if prompted {
            info!("Approval for {}: {:?}", record.capability, record.decision);
        }
        self.records.push(record.clone());
        record
    }

    async fn ask(&mut self, request: &ApprovalRequest) -> bool {
        if *self.abort.borrow() {
            return false;
        }
        let signal = Arc::clone(&self.signal);
        let abort = &mut self.abort;
        tokio::select! {
            answer = tokio::time::timeout(self.timeout, signal.confirm(request)) => match answer {
                Ok(answer) => answer,
                Err(_) => {
                    warn!("Approval for {} timed out", request.capability);
                    false
                }
            },
            _ = wait_for_abort(abort) => {
                warn!("Session aborted while awaiting approval for {}", request.capability);
                false
            }
        }
    }

    pub fn records(&self) -> &[ApprovalRecord] {
        &self.records
    }
}

/// Resolves once the abort flag is set; pends forever if the sender is gone
async fn wait_for_abort(abort: &mut watch::Receiver<bool>) {
    loop {
        if *abort.borrow() {
            return;
        }
        if abort.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}
