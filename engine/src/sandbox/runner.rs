//! Runs a registered generated unit as a confined interpreter process
//!
//! The unit runs with a cleared environment, its working directory set to
//! the sandbox root, and a wall-clock limit per call. The engine and the
//! unit talk line-delimited JSON: the request goes in on stdin, the unit
//! answers on stdout. A unit may call other capabilities through
//! `host.invoke`, which sends an `invoke` message and blocks until the
//! engine writes the reply. Anything the unit prints goes to stderr.
//!
//! Nested calls are limited to the targets the unit named literally when it
//! was validated, and to capabilities whose side effect does not exceed the
//! unit's own. The unit's approval therefore covers everything it can reach.

use crate::registry::CapabilityRegistry;
use async_trait::async_trait;
use sdk::capability::Capability;
use sdk::descriptor::{Arguments, SideEffect};
use sdk::types::{CapabilityError, CapabilityInput, CapabilityOutput, Identifier};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Weak;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::{ChildStdin, Command};
use tracing::{debug, info, warn};

/// Search path handed to the interpreter; nothing else is inherited
const CONFINED_PATH: &str = "/usr/local/bin:/usr/bin:/bin";

const STDERR_LIMIT: usize = 2048;

/// Installs the `host` module and runs the unit's `run(args)`.
/// `sys.argv[1]` is the unit path.
const BOOTSTRAP: &str = r#"
import json, os, sys, types

_channel = sys.stdout
sys.stdout = sys.stderr
_root = os.path.realpath(os.getcwd())


def _send(message):
    _channel.write(json.dumps(message) + "\n")
    _channel.flush()


def _receive():
    line = sys.stdin.readline()
    if not line:
        raise RuntimeError("host closed the channel")
    return json.loads(line)


def _sandbox_path(relative):
    full = os.path.realpath(os.path.join(_root, str(relative)))
    if full != _root and not full.startswith(_root + os.sep):
        raise PermissionError("path escapes the sandbox: %s" % relative)
    return full


def _invoke(name, args=None):
    payload = {str(k): str(v) for k, v in (args or {}).items()}
    _send({"op": "invoke", "name": str(name), "args": payload})
    reply = _receive()
    if not reply.get("ok"):
        raise RuntimeError(reply.get("error", "invocation failed"))
    return reply.get("text", "")


host = types.ModuleType("host")
host.sandbox_path = _sandbox_path
host.invoke = _invoke
sys.modules["host"] = host


def _main(path):
    request = _receive()
    scope = {"__name__": "generated"}
    with open(path, "r", encoding="utf-8") as handle:
        code = compile(handle.read(), path, "exec")
    exec(code, scope)
    try:
        result = scope["run"](request.get("args", {}))
    except Exception as error:
        _send({"op": "error", "message": "%s: %s" % (type(error).__name__, error)})
        return
    identifiers = []
    if isinstance(result, dict):
        text = str(result.get("text", ""))
        for item in result.get("identifiers", []):
            identifiers.append({"kind": str(item["kind"]), "value": str(item["value"])})
    else:
        text = "" if result is None else str(result)
    _send({"op": "result", "text": text, "identifiers": identifiers})


_main(sys.argv[1])
"#;

/// Message written by the unit
#[derive(Debug, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
enum UnitMessage {
    Invoke {
        name: String,
        #[serde(default)]
        args: Arguments,
    },
    Result {
        #[serde(default)]
        text: String,
        #[serde(default)]
        identifiers: Vec<Identifier>,
    },
    Error {
        message: String,
    },
}

#[derive(Debug, Serialize)]
struct InvokeReply {
    ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

/// Handler for a generated capability
pub struct GeneratedCapability {
    name: String,
    unit_path: PathBuf,
    sandbox_root: PathBuf,
    interpreter: Vec<String>,
    timeout: Duration,
    /// Target of `host.invoke`; weak because the registry owns this handler
    registry: Weak<CapabilityRegistry>,
    /// Capabilities `host.invoke` may reach
    targets: BTreeSet<String>,
    /// Highest side effect a nested call may carry
    ceiling: SideEffect,
}

impl GeneratedCapability {
    pub fn new(
        name: impl Into<String>,
        unit_path: PathBuf,
        sandbox_root: PathBuf,
        interpreter: Vec<String>,
        timeout: Duration,
        registry: Weak<CapabilityRegistry>,
    ) -> Self {
        Self {
            name: name.into(),
            unit_path,
            sandbox_root,
            interpreter,
            timeout,
            registry,
            targets: BTreeSet::new(),
            ceiling: SideEffect::None,
        }
    }

    /// Allow `host.invoke` to reach `targets`, none of them above `ceiling`
    pub fn with_targets(mut self, targets: BTreeSet<String>, ceiling: SideEffect) -> Self {
        self.targets = targets;
        self.ceiling = ceiling;
        self
    }

    pub fn unit_path(&self) -> &PathBuf {
        &self.unit_path
    }

    async fn run_unit(&self, input: CapabilityInput) -> Result<CapabilityOutput, CapabilityError> {
        let (program, interpreter_args) = self
            .interpreter
            .split_first()
            .ok_or_else(|| CapabilityError::Unavailable("no interpreter configured".to_string()))?;

        tokio::fs::create_dir_all(&self.sandbox_root)
            .await
            .map_err(|e| CapabilityError::Unavailable(format!("sandbox root: {}", e)))?;

        let mut child = Command::new(program)
            .args(interpreter_args)
            .arg("-c")
            .arg(BOOTSTRAP)
            .arg(&self.unit_path)
            .env_clear()
            .env("PATH", CONFINED_PATH)
            .current_dir(&self.sandbox_root)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| CapabilityError::Unavailable(format!("failed to start {}: {}", program, e)))?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| CapabilityError::Failed("unit stdin unavailable".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| CapabilityError::Failed("unit stdout unavailable".to_string()))?;
        let stderr = child.stderr.take();

        let stderr_task = tokio::spawn(async move {
            let mut collected = String::new();
            if let Some(mut stderr) = stderr {
                let _ = stderr.read_to_string(&mut collected).await;
            }
            collected
        });

        let request = serde_json::json!({ "args": input.arguments });
        send_line(&mut stdin, &request.to_string()).await?;

        let mut lines = BufReader::new(stdout).lines();
        let mut effects = Vec::new();

        while let Some(line) = lines
            .next_line()
            .await
            .map_err(|e| CapabilityError::Failed(format!("reading unit output: {}", e)))?
        {
            let message: UnitMessage = serde_json::from_str(&line)
                .map_err(|e| CapabilityError::Failed(format!("unit protocol error: {}", e)))?;

            match message {
                UnitMessage::Invoke { name, args } => {
                    debug!("{} -> host.invoke {}", self.name, name);
                    let reply = match self.invoke_nested(&name, args).await {
                        Ok(output) => {
                            effects.push(format!("invoked {}", name));
                            InvokeReply {
                                ok: true,
                                text: Some(output.text),
                                error: None,
                            }
                        }
                        Err(e) => InvokeReply {
                            ok: false,
                            text: None,
                            error: Some(e.to_string()),
                        },
                    };
                    let encoded = serde_json::to_string(&reply)
                        .map_err(|e| CapabilityError::Failed(e.to_string()))?;
                    send_line(&mut stdin, &encoded).await?;
                }
                UnitMessage::Result { text, identifiers } => {
                    info!("{} finished ({} identifiers)", self.name, identifiers.len());
                    return Ok(CapabilityOutput {
                        text,
                        effects,
                        identifiers,
                    });
                }
                UnitMessage::Error { message } => {
                    warn!("{} raised: {}", self.name, message);
                    return Err(CapabilityError::Failed(message));
                }
            }
        }

        drop(stdin);
        let status = child
            .wait()
            .await
            .map_err(|e| CapabilityError::Failed(e.to_string()))?;
        let stderr = stderr_task.await.unwrap_or_default();
        let tail: String = stderr.chars().take(STDERR_LIMIT).collect();
        Err(CapabilityError::Failed(format!(
            "unit exited ({}) without a result: {}",
            status,
            tail.trim()
        )))
    }

    async fn invoke_nested(
        &self,
        name: &str,
        args: Arguments,
    ) -> Result<CapabilityOutput, CapabilityError> {
        if name == self.name {
            return Err(CapabilityError::Failed(format!(
                "{} may not invoke itself",
                name
            )));
        }
        if !self.targets.contains(name) {
            warn!("{} tried undeclared host.invoke {}", self.name, name);
            return Err(CapabilityError::Failed(format!(
                "{} did not declare {} as a target",
                self.name, name
            )));
        }
        let registry = self
            .registry
            .upgrade()
            .ok_or_else(|| CapabilityError::Unavailable("registry dropped".to_string()))?;
        let entry = registry
            .resolve(name)
            .map_err(|e| CapabilityError::Unavailable(e.to_string()))?;
        if entry.descriptor.side_effect > self.ceiling {
            warn!(
                "{} refused {} [{}] above its own [{}]",
                self.name, name, entry.descriptor.side_effect, self.ceiling
            );
            return Err(CapabilityError::Failed(format!(
                "{} is {} but {} was approved as {}",
                name, entry.descriptor.side_effect, self.name, self.ceiling
            )));
        }
        entry
            .descriptor
            .check_arguments(&args)
            .map_err(|e| CapabilityError::InvalidArgument(e.to_string()))?;

        entry
            .handler
            .invoke(CapabilityInput {
                capability: name.to_string(),
                arguments: args,
            })
            .await
    }
}

async fn send_line(stdin: &mut ChildStdin, line: &str) -> Result<(), CapabilityError> {
    let mut framed = String::with_capacity(line.len() + 1);
    framed.push_str(line);
    framed.push('\n');
    stdin
        .write_all(framed.as_bytes())
        .await
        .map_err(|e| CapabilityError::Failed(format!("writing to unit: {}", e)))?;
    stdin
        .flush()
        .await
        .map_err(|e| CapabilityError::Failed(format!("writing to unit: {}", e)))
}

#[async_trait]
impl Capability for GeneratedCapability {
    async fn invoke(&self, input: CapabilityInput) -> Result<CapabilityOutput, CapabilityError> {
        match tokio::time::timeout(self.timeout, self.run_unit(input)).await {
            Ok(result) => result,
            Err(_) => {
                warn!("{} timed out after {:?}", self.name, self.timeout);
                Err(CapabilityError::Failed(format!(
                    "timed out after {}s",
                    self.timeout.as_secs()
                )))
            }
        }
    }
}
