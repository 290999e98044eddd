//! OpenAI-compatible embedding provider and merge verifier.
//!
//! # Example
//!
//! ```rust,ignore
//! use consolidation::ai::{OpenAIEmbedder, OpenAIVerifier};
//! use consolidation::security::ProviderCredentials;
//!
//! let creds = ProviderCredentials::from_env()?;
//! let embedder = OpenAIEmbedder::new(creds.clone())?;
//! let verifier = OpenAIVerifier::new(creds)?.with_model("gpt-4o-mini");
//! ```

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{ConsolidationError, Result, Service};
use crate::pipeline::prompts::{format_verify_prompt, parse_verdict, VerifyResponse};
use crate::security::ProviderCredentials;
use crate::traits::{
    embedder::Embedder,
    verifier::{MergeVerifier, Verdict},
};
use crate::types::{config::DEFAULT_EMBEDDING_DIM, document::Document, topic::Topic};

/// Default embedding model.
pub const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-3-small";

/// Default chat model for verification.
pub const DEFAULT_CHAT_MODEL: &str = "gpt-4o-mini";

/// Per-request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

const VERIFY_SYSTEM: &str =
    "You are a careful editor deciding whether content belongs in an existing document.";

fn http_client(timeout: Duration) -> Result<Client> {
    Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| ConsolidationError::Config(format!("failed to build HTTP client: {}", e)))
}

/// Map a transport failure. Timeouts and dropped connections are retryable.
fn transport_error(service: Service, e: reqwest::Error) -> ConsolidationError {
    if e.is_timeout() || e.is_connect() || e.is_request() {
        return ConsolidationError::transient(service, e.to_string());
    }
    permanent(service, e.to_string())
}

/// Map a non-success status. 429 and 5xx are retryable.
fn status_error(service: Service, status: StatusCode, body: &str) -> ConsolidationError {
    let message = format!("HTTP {}: {}", status.as_u16(), body.trim());
    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        return ConsolidationError::transient(service, message);
    }
    permanent(service, message)
}

fn permanent(service: Service, message: String) -> ConsolidationError {
    match service {
        Service::Verifier => ConsolidationError::Verifier(message),
        _ => ConsolidationError::Embedding(message),
    }
}

/// POST a JSON body and decode a JSON reply.
async fn post_json<Req: Serialize + ?Sized, Resp: for<'de> Deserialize<'de>>(
    client: &Client,
    creds: &ProviderCredentials,
    service: Service,
    path: &str,
    body: &Req,
) -> Result<Resp> {
    let response = client
        .post(format!("{}/{}", creds.base_url, path))
        .header("Authorization", creds.bearer())
        .json(body)
        .send()
        .await
        .map_err(|e| transport_error(service, e))?;

    let status = response.status();
    if !status.is_success() {
        let text = response.text().await.unwrap_or_default();
        return Err(status_error(service, status, &text));
    }

    response
        .json()
        .await
        .map_err(|e| transport_error(service, e))
}

// =============================================================================
// Embeddings
// =============================================================================

/// Embedding provider for `/embeddings`.
#[derive(Clone)]
pub struct OpenAIEmbedder {
    client: Client,
    creds: ProviderCredentials,
    model: String,
    dimension: usize,
}

impl OpenAIEmbedder {
    /// Create an embedder with the default model and 768 dimensions.
    pub fn new(creds: ProviderCredentials) -> Result<Self> {
        Ok(Self {
            client: http_client(DEFAULT_TIMEOUT)?,
            creds,
            model: DEFAULT_EMBEDDING_MODEL.to_string(),
            dimension: DEFAULT_EMBEDDING_DIM,
        })
    }

    /// Set the embedding model.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Set the requested output dimension.
    pub fn with_dimension(mut self, dimension: usize) -> Self {
        self.dimension = dimension;
        self
    }

    /// Set the request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Result<Self> {
        self.client = http_client(timeout)?;
        Ok(self)
    }

    /// Get the model name.
    pub fn model(&self) -> &str {
        &self.model
    }

    async fn request(&self, input: Vec<&str>) -> Result<Vec<Vec<f32>>> {
        let expected = input.len();
        let request = EmbeddingRequest {
            model: &self.model,
            input,
            dimensions: self.dimension,
        };

        let response: EmbeddingResponse = post_json(
            &self.client,
            &self.creds,
            Service::Embedding,
            "embeddings",
            &request,
        )
        .await?;

        let mut data = response.data;
        data.sort_by_key(|d| d.index);
        if data.len() != expected {
            return Err(ConsolidationError::Embedding(format!(
                "expected {} embeddings, got {}",
                expected,
                data.len()
            )));
        }

        debug!(count = expected, model = %self.model, "Embedded texts");
        Ok(data.into_iter().map(|d| d.embedding).collect())
    }
}

#[async_trait]
impl Embedder for OpenAIEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.request(vec![text])
            .await?
            .pop()
            .ok_or_else(|| ConsolidationError::Embedding("no embedding returned".into()))
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        self.request(texts.to_vec()).await
    }
}

// =============================================================================
// Verifier
// =============================================================================

/// Merge verifier using a structured chat completion.
///
/// The reply is constrained by a JSON schema generated from
/// [`VerifyResponse`]. A refusal or an off-schema reply becomes
/// `Verdict::Unparsable`.
#[derive(Clone)]
pub struct OpenAIVerifier {
    client: Client,
    creds: ProviderCredentials,
    model: String,
    schema: serde_json::Value,
}

impl OpenAIVerifier {
    /// Create a verifier with the default chat model.
    pub fn new(creds: ProviderCredentials) -> Result<Self> {
        Ok(Self {
            client: http_client(DEFAULT_TIMEOUT)?,
            creds,
            model: DEFAULT_CHAT_MODEL.to_string(),
            schema: verify_schema()?,
        })
    }

    /// Set the chat model.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Set the request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Result<Self> {
        self.client = http_client(timeout)?;
        Ok(self)
    }

    /// Get the model name.
    pub fn model(&self) -> &str {
        &self.model
    }

    fn build_request<'a>(&'a self, prompt: &'a str) -> ChatRequest<'a> {
        ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: VERIFY_SYSTEM,
                },
                ChatMessage {
                    role: "user",
                    content: prompt,
                },
            ],
            temperature: 0.0,
            response_format: ResponseFormat {
                format_type: "json_schema",
                json_schema: JsonSchemaFormat {
                    name: "merge_verdict",
                    strict: true,
                    schema: &self.schema,
                },
            },
        }
    }
}

#[async_trait]
impl MergeVerifier for OpenAIVerifier {
    async fn verify(&self, topic: &Topic, candidate: &Document, score: f32) -> Result<Verdict> {
        let prompt = format_verify_prompt(
            &topic.title,
            topic.content.trim(),
            &candidate.title,
            &candidate.content,
            score,
        );

        let response: ChatResponse = post_json(
            &self.client,
            &self.creds,
            Service::Verifier,
            "chat/completions",
            &self.build_request(&prompt),
        )
        .await?;

        let Some(choice) = response.choices.into_iter().next() else {
            return Err(ConsolidationError::Verifier("no choices returned".into()));
        };

        Ok(match (choice.message.content, choice.message.refusal) {
            (Some(content), _) => parse_verdict(&content),
            (None, Some(refusal)) => Verdict::Unparsable { raw: refusal },
            (None, None) => Verdict::Unparsable { raw: String::new() },
        })
    }
}

/// JSON schema for the verifier reply, in the shape strict mode accepts.
fn verify_schema() -> Result<serde_json::Value> {
    let mut schema = serde_json::to_value(schemars::schema_for!(VerifyResponse))?;
    if let Some(obj) = schema.as_object_mut() {
        obj.remove("$schema");
        obj.remove("title");
    }
    Ok(schema)
}

// Request/Response types

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: Vec<&'a str>,
    dimensions: usize,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    #[serde(default)]
    index: usize,
    embedding: Vec<f32>,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    response_format: ResponseFormat<'a>,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ResponseFormat<'a> {
    #[serde(rename = "type")]
    format_type: &'a str,
    json_schema: JsonSchemaFormat<'a>,
}

#[derive(Serialize)]
struct JsonSchemaFormat<'a> {
    name: &'a str,
    strict: bool,
    schema: &'a serde_json::Value,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Deserialize)]
struct ChatResponseMessage {
    content: Option<String>,
    #[serde(default)]
    refusal: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_embedder_builder() {
        let e = OpenAIEmbedder::new(ProviderCredentials::new("sk-test"))
            .unwrap()
            .with_model("text-embedding-3-large")
            .with_dimension(256);
        assert_eq!(e.model(), "text-embedding-3-large");
        assert_eq!(e.dimension(), 256);
    }

    #[test]
    fn test_embedding_request_shape() {
        let req = EmbeddingRequest {
            model: DEFAULT_EMBEDDING_MODEL,
            input: vec!["a", "b"],
            dimensions: 768,
        };
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["dimensions"], 768);
        assert_eq!(json["input"][1], "b");
    }

    #[test]
    fn test_verify_schema_is_strict() {
        let schema = verify_schema().unwrap();
        assert_eq!(schema["additionalProperties"], false);
        assert!(schema["properties"]["merge"].is_object());
        assert!(schema["properties"]["reason"].is_object());
        assert!(schema.get("$schema").is_none());

        let required: Vec<&str> = schema["required"]
            .as_array()
            .unwrap()
            .iter()
            .filter_map(|v| v.as_str())
            .collect();
        assert!(required.contains(&"merge"));
        assert!(required.contains(&"reason"));
    }

    #[test]
    fn test_chat_request_uses_json_schema() {
        let v = OpenAIVerifier::new(ProviderCredentials::new("sk-test")).unwrap();
        let json = serde_json::to_value(v.build_request("prompt")).unwrap();
        assert_eq!(json["response_format"]["type"], "json_schema");
        assert_eq!(json["response_format"]["json_schema"]["strict"], true);
        assert_eq!(json["messages"][1]["content"], "prompt");
        assert_eq!(json["model"], DEFAULT_CHAT_MODEL);
    }

    #[test]
    fn test_status_classification() {
        let e = status_error(Service::Embedding, StatusCode::TOO_MANY_REQUESTS, "slow down");
        assert!(e.is_transient());

        let e = status_error(Service::Verifier, StatusCode::BAD_GATEWAY, "");
        assert!(e.is_transient());
        assert_eq!(e.service(), Some(Service::Verifier));

        let e = status_error(Service::Embedding, StatusCode::UNAUTHORIZED, "bad key");
        assert!(matches!(e, ConsolidationError::Embedding(ref m) if m.contains("401")));
        assert!(!e.is_transient());

        let e = status_error(Service::Verifier, StatusCode::BAD_REQUEST, "too long");
        assert!(matches!(e, ConsolidationError::Verifier(_)));
    }

    #[test]
    fn test_refusal_deserializes() {
        let resp: ChatResponse = serde_json::from_str(
            r#"{"choices":[{"message":{"role":"assistant","content":null,"refusal":"no"}}]}"#,
        )
        .unwrap();
        assert_eq!(resp.choices[0].message.refusal.as_deref(), Some("no"));
        assert!(resp.choices[0].message.content.is_none());
    }
}
