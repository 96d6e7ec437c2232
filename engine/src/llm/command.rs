//! Command LLM Provider
//!
//! Pipes the prompt to a configured local CLI (for example `llm -m mistral`
//! or `ollama run llama3.1`) on stdin and returns its stdout as the completion.
//! The program is spawned directly, never through a shell.

use async_trait::async_trait;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use super::{LLMError, LLMProvider, Result};

#[derive(Debug, Clone)]
pub struct CommandProvider {
    program: String,
    args: Vec<String>,
}

impl CommandProvider {
    /// Create a provider from an argv list; the first element is the program
    pub fn new(argv: &[String]) -> Result<Self> {
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| LLMError::InvalidRequest("empty command for LLM provider".into()))?;

        Ok(Self {
            program: program.clone(),
            args: args.to_vec(),
        })
    }
}

#[async_trait]
impl LLMProvider for CommandProvider {
    fn name(&self) -> &str {
        "command"
    }

    async fn complete(&self, prompt: &str, structured: bool) -> Result<String> {
        tracing::debug!(
            "Command request: program={}, structured={}, prompt_chars={}",
            self.program,
            structured,
            prompt.len()
        );

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                LLMError::ProviderUnavailable(format!("Failed to start {}: {}", self.program, e))
            })?;

        if let Some(mut stdin) = child.stdin.take() {
            // A program that exits without reading closes the pipe early;
            // its exit status decides the outcome
            if let Err(e) = stdin.write_all(prompt.as_bytes()).await {
                if e.kind() != std::io::ErrorKind::BrokenPipe {
                    return Err(LLMError::NetworkError(format!(
                        "Failed to write prompt: {}",
                        e
                    )));
                }
            }
            // Dropping stdin closes the pipe so the program sees EOF
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| LLMError::ProviderUnavailable(e.to_string()))?;

        if !output.status.success() {
            return Err(LLMError::ProcessFailed {
                status: output.status.code().unwrap_or(-1),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        String::from_utf8(output.stdout)
            .map(|s| s.trim().to_string())
            .map_err(|_| LLMError::ParseError("completion is not valid UTF-8".into()))
    }
}
