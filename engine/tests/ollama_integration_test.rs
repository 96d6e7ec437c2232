//! Integration tests for the Ollama transport
//!
//! A wiremock server stands in for Ollama's `/api/chat` endpoint; no model
//! is required.

use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use wiremock::{
    matchers::{body_partial_json, method, path},
    Mock, MockServer, ResponseTemplate,
};

use foreman_engine::conductor::{ClassificationError, ClassificationResult, Classifier};
use foreman_engine::llm::{ollama::OllamaProvider, LLMError, LLMProvider};
use foreman_engine::registry::CapabilityRegistry;
use foreman_engine::tools::register_builtins;

fn chat_response(content: &str) -> serde_json::Value {
    json!({
        "model": "llama3.1:8b",
        "created_at": "2024-05-01T10:00:00Z",
        "message": {"role": "assistant", "content": content},
        "done": true
    })
}

fn provider(server: &MockServer) -> OllamaProvider {
    OllamaProvider::new(server.uri(), "llama3.1:8b", Duration::from_secs(5)).unwrap()
}

#[tokio::test]
async fn test_structured_completion() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .and(body_partial_json(json!({"model": "llama3.1:8b", "stream": false, "format": "json"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(chat_response("{\"ok\":true}")))
        .expect(1)
        .mount(&server)
        .await;

    let reply = provider(&server).complete("answer in json", true).await.unwrap();
    assert_eq!(reply, "{\"ok\":true}");
}

#[tokio::test]
async fn test_server_error_is_unavailable() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(ResponseTemplate::new(500).set_body_string("model not loaded"))
        .mount(&server)
        .await;

    match provider(&server).complete("hi", false).await.unwrap_err() {
        LLMError::ProviderUnavailable(msg) => assert!(msg.contains("model not loaded")),
        other => panic!("expected ProviderUnavailable, got {:?}", other),
    }
}

#[tokio::test]
async fn test_unexpected_body_is_parse_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"unexpected": 1})))
        .mount(&server)
        .await;

    assert!(matches!(
        provider(&server).complete("hi", false).await,
        Err(LLMError::ParseError(_))
    ));
}

#[tokio::test]
async fn test_slow_server_times_out() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(chat_response("late"))
                .set_delay(Duration::from_secs(3)),
        )
        .mount(&server)
        .await;

    let provider =
        OllamaProvider::new(server.uri(), "llama3.1:8b", Duration::from_millis(200)).unwrap();
    assert!(matches!(
        provider.complete("hi", false).await,
        Err(LLMError::Timeout)
    ));
}

#[tokio::test]
async fn test_connection_refused() {
    // Nothing listens on port 9 locally
    let provider =
        OllamaProvider::new("http://127.0.0.1:9", "llama3.1:8b", Duration::from_secs(2)).unwrap();
    match provider.complete("hi", false).await.unwrap_err() {
        LLMError::ProviderUnavailable(msg) => assert!(msg.contains("Cannot connect to Ollama")),
        LLMError::NetworkError(_) => {}
        other => panic!("expected a connection error, got {:?}", other),
    }
}

async fn classifier_over(server: &MockServer, temp: &TempDir) -> Classifier {
    let registry = Arc::new(CapabilityRegistry::new());
    register_builtins(&registry, temp.path().to_path_buf()).unwrap();
    Classifier::new(Arc::new(provider(server)), registry, Duration::from_secs(5))
}

#[tokio::test]
async fn test_classifier_plans_with_builtins() {
    let server = MockServer::start().await;
    let temp = TempDir::new().unwrap();
    let plan = json!({
        "category": "existing_plan",
        "steps": [
            {"capability": "workspace:list_dir", "arguments": {"path": "notes"}, "rationale": "see what is there"},
            {"command": "workspace:read_file path={{each:file}}"}
        ]
    });
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(ResponseTemplate::new(200).set_body_json(chat_response(&plan.to_string())))
        .mount(&server)
        .await;

    let classifier = classifier_over(&server, &temp).await;
    match classifier
        .classify("read every note", "(nothing executed yet)")
        .await
        .unwrap()
    {
        ClassificationResult::ExistingPlan(steps) => {
            assert_eq!(steps.len(), 2);
            assert_eq!(steps[0].render(), "workspace:list_dir path=notes");
            assert_eq!(steps[0].rationale, "see what is there");
            assert_eq!(steps[1].render(), "workspace:read_file path={{each:file}}");
        }
        other => panic!("expected a plan, got {:?}", other),
    }
}

#[tokio::test]
async fn test_classifier_retries_once_after_bad_output() {
    let server = MockServer::start().await;
    let temp = TempDir::new().unwrap();

    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(ResponseTemplate::new(200).set_body_json(chat_response(
            r#"{"category": "existing_plan", "steps": [{"capability": "mail:nuke"}]}"#,
        )))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(ResponseTemplate::new(200).set_body_json(chat_response(
            r#"{"category": "direct_answer", "answer": "There is no such capability."}"#,
        )))
        .mount(&server)
        .await;

    let classifier = classifier_over(&server, &temp).await;
    let result = classifier.classify("nuke my inbox", "").await.unwrap();
    assert!(matches!(result, ClassificationResult::DirectAnswer(_)));

    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 2);
    let retry = String::from_utf8_lossy(&requests[1].body).to_string();
    assert!(retry.contains("previous response was rejected"));
    assert!(retry.contains("unknown capability 'mail:nuke'"));
}

#[tokio::test]
async fn test_classifier_rejects_builtin_collision_twice() {
    let server = MockServer::start().await;
    let temp = TempDir::new().unwrap();
    let request = json!({
        "category": "unknown_capability",
        "request": {"name": "workspace:read_file", "description": "read differently"}
    });
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(ResponseTemplate::new(200).set_body_json(chat_response(&request.to_string())))
        .expect(2)
        .mount(&server)
        .await;

    let classifier = classifier_over(&server, &temp).await;
    match classifier.classify("read a file", "").await.unwrap_err() {
        ClassificationError::Rejected { attempts, reason } => {
            assert_eq!(attempts, 2);
            assert!(reason.contains("built-in"));
        }
        other => panic!("expected rejection, got {:?}", other),
    }
}

#[tokio::test]
async fn test_classifier_surfaces_transport_errors() {
    let server = MockServer::start().await;
    let temp = TempDir::new().unwrap();
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(ResponseTemplate::new(503))
        .expect(1)
        .mount(&server)
        .await;

    let classifier = classifier_over(&server, &temp).await;
    assert!(matches!(
        classifier.classify("anything", "").await,
        Err(ClassificationError::Transport(LLMError::ProviderUnavailable(_)))
    ));
}
