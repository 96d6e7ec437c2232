//! LLM Provider Abstraction Layer
//!
//! The classifier and the synthesizer talk to a language model through the
//! [`LLMProvider`] trait: one prompt in, one completion out. Two transports
//! ship with the engine, an Ollama HTTP provider and a command provider that
//! pipes the prompt to a local CLI.
//!
//! Model output is untrusted. The helpers at the bottom of this module only
//! locate a JSON object inside a completion; callers own the parsing and
//! validation of what they find.

use async_trait::async_trait;
use sdk::errors::EngineError;
use std::sync::Arc;
use std::time::Duration;

use crate::config::LLMConfig;

pub mod command;
pub mod ollama;

pub use command::CommandProvider;
pub use ollama::OllamaProvider;

/// Result type for LLM operations
pub type Result<T> = std::result::Result<T, LLMError>;

/// Errors that can occur during LLM operations
#[derive(Debug, thiserror::Error)]
pub enum LLMError {
    #[error("Provider unavailable: {0}")]
    ProviderUnavailable(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Timeout")]
    Timeout,

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Process exited with status {status}: {stderr}")]
    ProcessFailed { status: i32, stderr: String },
}

impl From<LLMError> for EngineError {
    fn from(err: LLMError) -> Self {
        match err {
            LLMError::Timeout => EngineError::LLMTimeout,
            LLMError::ParseError(msg) => EngineError::ModelOutput(msg),
            other => EngineError::LLMProvider(other.to_string()),
        }
    }
}

/// LLM Provider trait that all transports must implement
#[async_trait]
pub trait LLMProvider: Send + Sync {
    /// Returns the name of the provider (e.g., "ollama", "command")
    fn name(&self) -> &str;

    /// Complete a single prompt
    ///
    /// # Arguments
    /// * `prompt` - Full prompt text
    /// * `structured` - Ask the transport for JSON-only output when it supports it
    async fn complete(&self, prompt: &str, structured: bool) -> Result<String>;
}

/// Run `complete` under a deadline. An elapsed deadline is `LLMError::Timeout`
/// and is never retried here.
pub async fn complete_with_timeout(
    provider: &dyn LLMProvider,
    prompt: &str,
    structured: bool,
    timeout: Duration,
) -> Result<String> {
    match tokio::time::timeout(timeout, provider.complete(prompt, structured)).await {
        Ok(result) => result,
        Err(_) => {
            tracing::warn!(
                "{} did not answer within {}s",
                provider.name(),
                timeout.as_secs()
            );
            Err(LLMError::Timeout)
        }
    }
}

/// Build the transport named by `config.provider`
pub fn provider_from_config(config: &LLMConfig) -> Result<Arc<dyn LLMProvider>> {
    match config.provider.as_str() {
        "ollama" => Ok(Arc::new(OllamaProvider::new(
            config.ollama.base_url.clone(),
            config.ollama.model.clone(),
            config.timeout(),
        )?)),
        "command" => Ok(Arc::new(CommandProvider::new(&config.command.argv)?)),
        other => Err(LLMError::InvalidRequest(format!(
            "unknown provider '{}'",
            other
        ))),
    }
}

/// Locate the JSON object in a model completion.
///
/// Handles, in order:
/// 1. Raw JSON (the whole completion is one object)
/// 2. Fenced JSON, even with prose after the closing fence
/// 3. An object embedded in prose, found by its first `{`
pub fn extract_json_object(content: &str) -> Option<&str> {
    let trimmed = content.trim();

    if trimmed.starts_with('{') {
        if let Some(json) = extract_balanced_json(trimmed) {
            return Some(json);
        }
    }

    if let Some(inner) = extract_fenced_json(trimmed) {
        let inner = inner.trim();
        if let Some(json) = extract_balanced_json(inner) {
            return Some(json);
        }
    }

    let start = trimmed.find('{')?;
    extract_balanced_json(&trimmed[start..])
}

/// Extract the body of the first markdown code fence in the text.
///
/// Works even when there is trailing prose after the closing ```.
/// Returns `None` if no fenced block is found.
fn extract_fenced_json(content: &str) -> Option<&str> {
    let fence_start = content.find("```")?;
    let after_opening = &content[fence_start + 3..];

    // Skip the language tag line (e.g. "json\n")
    let body_start_rel = after_opening.find('\n')? + 1;
    let body_start = fence_start + 3 + body_start_rel;

    let closing = content[body_start..].find("```")?;
    let body_end = body_start + closing;

    if body_start >= body_end {
        return None;
    }

    Some(&content[body_start..body_end])
}

/// Extract a balanced JSON object starting at position 0 of `s`.
///
/// Counts `{` / `}` depth, respecting string literals, to find the
/// matching close brace.
fn extract_balanced_json(s: &str) -> Option<&str> {
    if !s.starts_with('{') {
        return None;
    }
    let mut depth = 0i32;
    let mut in_string = false;
    let mut escape_next = false;

    for (i, ch) in s.char_indices() {
        if escape_next {
            escape_next = false;
            continue;
        }
        match ch {
            '\\' if in_string => escape_next = true,
            '"' => in_string = !in_string,
            '{' if !in_string => depth += 1,
            '}' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    return Some(&s[..=i]);
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    struct SlowProvider;

    #[async_trait]
    impl LLMProvider for SlowProvider {
        fn name(&self) -> &str {
            "slow"
        }

        async fn complete(&self, _prompt: &str, _structured: bool) -> Result<String> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok("late".to_string())
        }
    }

    #[test]
    fn test_extract_raw_json() {
        let content = r#"{"category": "direct_answer", "answer": "4"}"#;
        assert_eq!(extract_json_object(content), Some(content));
    }

    #[test]
    fn test_extract_fenced_json_with_trailing_prose() {
        let content = "Here you go:\n```json\n{\"a\": {\"b\": 1}}\n```\nHope that helps.";
        assert_eq!(extract_json_object(content), Some("{\"a\": {\"b\": 1}}"));
    }

    #[test]
    fn test_extract_embedded_json_respects_strings() {
        let content = r#"Sure! {"answer": "use } carefully", "n": 1} trailing"#;
        assert_eq!(
            extract_json_object(content),
            Some(r#"{"answer": "use } carefully", "n": 1}"#)
        );
    }

    #[test]
    fn test_extract_no_json() {
        assert_eq!(extract_json_object("no object here"), None);
        assert_eq!(extract_json_object("{ unterminated"), None);
    }

    #[tokio::test]
    async fn test_complete_with_timeout_elapses() {
        let result =
            complete_with_timeout(&SlowProvider, "hi", false, Duration::from_millis(20)).await;
        assert!(matches!(result, Err(LLMError::Timeout)));
    }

    #[test]
    fn test_provider_from_config() {
        let mut config = LLMConfig::default();
        let provider = provider_from_config(&config).unwrap();
        assert_eq!(provider.name(), "ollama");

        config.provider = "command".to_string();
        config.command.argv = vec!["llm".to_string(), "-m".to_string(), "local".to_string()];
        assert_eq!(provider_from_config(&config).unwrap().name(), "command");

        config.command.argv.clear();
        assert!(matches!(
            provider_from_config(&config),
            Err(LLMError::InvalidRequest(_))
        ));
    }

    #[test]
    fn test_llm_error_maps_to_engine_error() {
        assert!(matches!(
            EngineError::from(LLMError::Timeout),
            EngineError::LLMTimeout
        ));
        assert!(matches!(
            EngineError::from(LLMError::NetworkError("refused".into())),
            EngineError::LLMProvider(_)
        ));
    }
}
