//! Ambiguity resolution for TOC links with several candidate files.
//!
//! The planner only sees the [`AmbiguityResolver`] trait. [`OpenAiResolver`]
//! is the production implementation, talking to any OpenAI-compatible
//! `chat/completions` endpoint.

use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, instrument};

use docimport_shared::{ImportError, Result};

/// Maximum number of candidates shown to the resolver.
pub const MAX_CANDIDATES: usize = 12;

const USER_AGENT: &str = concat!("docimport/", env!("CARGO_PKG_VERSION"));

const SYSTEM_PROMPT: &str = "Resolve markdown TOC link ambiguity. \
Return strict JSON only: {\"selected_path\":\"...\",\"confidence\":0.0,\"reason\":\"...\"}. \
selected_path must be one of candidate_paths, or empty string if unsure.";

/// The resolver's answer for one ambiguous link.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LlmResolution {
    /// Chosen source-relative path, empty when the resolver abstains.
    #[serde(default)]
    pub selected_path: String,
    /// In `[0, 1]`.
    #[serde(default)]
    pub confidence: f64,
    #[serde(default)]
    pub reason: String,
}

/// Picks one path out of an ambiguous candidate set.
#[async_trait]
pub trait AmbiguityResolver: Send + Sync {
    /// `candidates` holds at most [`MAX_CANDIDATES`] entries; `context` is a
    /// few numbered TOC lines around the link.
    async fn resolve(
        &self,
        link_text: &str,
        raw_target: &str,
        candidates: &[String],
        context: &str,
    ) -> Result<LlmResolution>;
}

// ---------------------------------------------------------------------------
// OpenAI-compatible implementation
// ---------------------------------------------------------------------------

/// Resolver backed by an OpenAI-compatible chat completions API.
#[derive(Debug, Clone)]
pub struct OpenAiResolver {
    client: Client,
    endpoint: String,
    api_key: String,
    model: String,
}

impl OpenAiResolver {
    /// Build a resolver. `base_url` may or may not already end in
    /// `/chat/completions`.
    pub fn new(base_url: &str, api_key: &str, model: &str, timeout: Duration) -> Result<Self> {
        let base = base_url.trim().trim_end_matches('/');
        if base.is_empty() || api_key.trim().is_empty() || model.trim().is_empty() {
            return Err(ImportError::config(
                "LLM resolver needs a base URL, an API key, and a model",
            ));
        }
        let endpoint = if base.ends_with("/chat/completions") {
            base.to_string()
        } else {
            format!("{base}/chat/completions")
        };

        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()
            .map_err(|e| ImportError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            endpoint,
            api_key: api_key.trim().to_string(),
            model: model.trim().to_string(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl AmbiguityResolver for OpenAiResolver {
    #[instrument(skip_all, fields(target = raw_target, candidates = candidates.len()))]
    async fn resolve(
        &self,
        link_text: &str,
        raw_target: &str,
        candidates: &[String],
        context: &str,
    ) -> Result<LlmResolution> {
        if candidates.is_empty() {
            return Ok(LlmResolution::default());
        }

        let prompt = json!({
            "link_text": link_text,
            "raw_target": raw_target,
            "candidate_paths": &candidates[..candidates.len().min(MAX_CANDIDATES)],
            "toc_context": context,
        });
        let body = json!({
            "model": self.model,
            "temperature": 0,
            "max_tokens": 120,
            "response_format": { "type": "json_object" },
            "messages": [
                { "role": "system", "content": SYSTEM_PROMPT },
                { "role": "user", "content": prompt.to_string() },
            ],
        });

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| ImportError::Network(format!("{}: {e}", self.endpoint)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ImportError::Network(format!("{}: HTTP {status}", self.endpoint)));
        }

        let payload: Value = response
            .json()
            .await
            .map_err(|e| ImportError::parse(format!("invalid completion response: {e}")))?;

        let content = message_content(&payload);
        debug!(chars = content.len(), "resolver replied");
        Ok(parse_resolution(&content))
    }
}

/// Assistant text of the first choice; array-of-parts content is joined.
fn message_content(payload: &Value) -> String {
    let content = &payload["choices"][0]["message"]["content"];
    match content {
        Value::String(text) => text.clone(),
        Value::Array(parts) => parts
            .iter()
            .filter_map(|part| part.get("text").and_then(Value::as_str))
            .collect(),
        _ => String::new(),
    }
}

/// Parse the first JSON object in model output into a resolution.
///
/// Anything unparseable becomes an empty (abstaining) resolution.
fn parse_resolution(text: &str) -> LlmResolution {
    static OBJECT_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"(?s)\{.*\}").expect("valid regex"));

    let text = text.trim();
    let parsed = serde_json::from_str::<Value>(text)
        .ok()
        .filter(Value::is_object)
        .or_else(|| {
            OBJECT_RE
                .find(text)
                .and_then(|m| serde_json::from_str::<Value>(m.as_str()).ok())
                .filter(Value::is_object)
        });
    let Some(obj) = parsed else {
        return LlmResolution::default();
    };

    let confidence = match &obj["confidence"] {
        Value::Number(n) => n.as_f64().unwrap_or(0.0),
        Value::String(s) => s.trim().parse().unwrap_or(0.0),
        _ => 0.0,
    };

    LlmResolution {
        selected_path: obj["selected_path"].as_str().unwrap_or_default().trim().to_string(),
        confidence: if confidence.is_finite() { confidence.clamp(0.0, 1.0) } else { 0.0 },
        reason: obj["reason"].as_str().unwrap_or_default().trim().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn completion(content: &str) -> Value {
        json!({ "choices": [{ "message": { "role": "assistant", "content": content } }] })
    }

    #[test]
    fn parses_plain_and_wrapped_json() {
        let r = parse_resolution(r#"{"selected_path":"a/x.md","confidence":0.9,"reason":"label"}"#);
        assert_eq!(r.selected_path, "a/x.md");
        assert_eq!(r.confidence, 0.9);

        let r = parse_resolution("Sure!\n```json\n{\"selected_path\": \"b/x.md\", \"confidence\": \"1.7\"}\n```");
        assert_eq!(r.selected_path, "b/x.md");
        assert_eq!(r.confidence, 1.0);

        assert_eq!(parse_resolution("no idea"), LlmResolution::default());
        assert_eq!(parse_resolution("[1, 2]"), LlmResolution::default());
    }

    #[test]
    fn endpoint_suffix_is_added_once() {
        let r = OpenAiResolver::new("https://llm.local/v1/", "k", "m", Duration::from_secs(5)).unwrap();
        assert_eq!(r.endpoint(), "https://llm.local/v1/chat/completions");
        let r = OpenAiResolver::new("https://llm.local/v1/chat/completions", "k", "m", Duration::from_secs(5))
            .unwrap();
        assert_eq!(r.endpoint(), "https://llm.local/v1/chat/completions");
        assert!(OpenAiResolver::new("", "k", "m", Duration::from_secs(5)).is_err());
    }

    #[tokio::test]
    async fn resolves_against_mock_server() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(header("authorization", "Bearer secret"))
            .and(body_partial_json(json!({ "model": "tiny", "temperature": 0 })))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion(
                r#"{"selected_path":"guide/setup.md","confidence":0.8,"reason":"matches section"}"#,
            )))
            .expect(1)
            .mount(&server)
            .await;

        let resolver = OpenAiResolver::new(
            &format!("{}/v1", server.uri()),
            "secret",
            "tiny",
            Duration::from_secs(5),
        )
        .unwrap();
        let candidates = vec!["guide/setup.md".to_string(), "ops/setup.md".to_string()];
        let resolution = resolver
            .resolve("Setup", "setup.md", &candidates, "3: - [Setup](setup.md)")
            .await
            .unwrap();

        assert_eq!(resolution.selected_path, "guide/setup.md");
        assert_eq!(resolution.reason, "matches section");
    }

    #[tokio::test]
    async fn http_error_is_surfaced() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let resolver = OpenAiResolver::new(&server.uri(), "k", "m", Duration::from_secs(5)).unwrap();
        let err = resolver
            .resolve("x", "x.md", &["a/x.md".to_string()], "")
            .await
            .unwrap_err();
        assert!(matches!(err, ImportError::Network(_)));
    }
}
