//! OpenAI-compatible HTTP adapter for embeddings and chat completions.

use crate::error::{ProviderError, RagError};
use crate::traits::{EmbeddingProvider, GenerationRequest, LanguageModel};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1/";

#[derive(Debug, Clone)]
pub struct OpenAiSettings {
    pub api_key: String,
    pub base_url: String,
    pub embedding_model: String,
    pub chat_model: String,
    /// Requested output dimension for models that support shortening.
    pub dimensions: Option<usize>,
    pub request_timeout: Duration,
}

pub struct OpenAiClient {
    client: Client,
    embeddings_url: Url,
    chat_url: Url,
    embedding_model: String,
    chat_model: String,
    dimensions: Option<usize>,
}

impl OpenAiClient {
    pub fn new(settings: OpenAiSettings) -> Result<Self, RagError> {
        if settings.api_key.trim().is_empty() {
            return Err(RagError::InvalidArgument("missing OpenAI API key".to_string()));
        }

        let mut base = settings.base_url.trim().to_string();
        if !base.ends_with('/') {
            base.push('/');
        }
        let base = Url::parse(&base)
            .map_err(|error| RagError::InvalidArgument(format!("invalid base url `{base}`: {error}")))?;
        let join = |path: &str| {
            base.join(path)
                .map_err(|error| RagError::InvalidArgument(format!("invalid endpoint {path}: {error}")))
        };

        let mut headers = HeaderMap::new();
        let auth = HeaderValue::from_str(&format!("Bearer {}", settings.api_key.trim()))
            .map_err(|_| RagError::InvalidArgument("API key is not a valid header value".to_string()))?;
        headers.insert(AUTHORIZATION, auth);
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let client = Client::builder()
            .timeout(settings.request_timeout)
            .default_headers(headers)
            .build()
            .map_err(|error| RagError::InvalidArgument(format!("failed to build http client: {error}")))?;

        Ok(Self {
            client,
            embeddings_url: join("embeddings")?,
            chat_url: join("chat/completions")?,
            embedding_model: settings.embedding_model,
            chat_model: settings.chat_model,
            dimensions: settings.dimensions,
        })
    }

    async fn post<B: Serialize + ?Sized, R: DeserializeOwned>(
        &self,
        url: &Url,
        body: &B,
    ) -> Result<R, ProviderError> {
        let response = self.client.post(url.clone()).json(body).send().await?;
        let status = response.status();
        if !status.is_success() {
            let details = response
                .text()
                .await
                .unwrap_or_else(|_| "<body unavailable>".to_string());
            return Err(classify_status(status, &details));
        }

        response
            .json::<R>()
            .await
            .map_err(|error| ProviderError::fatal(format!("unreadable response from {url}: {error}")))
    }
}

/// Rate limits and server errors are worth retrying; everything else is not.
pub fn classify_status(status: StatusCode, details: &str) -> ProviderError {
    let message = format!("{status}: {}", details.trim());
    if status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
        || status.is_server_error()
    {
        ProviderError::retryable(message)
    } else {
        ProviderError::fatal(message)
    }
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
    #[serde(skip_serializing_if = "Option::is_none")]
    dimensions: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    index: usize,
}

#[async_trait]
impl EmbeddingProvider for OpenAiClient {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let request = EmbeddingRequest {
            model: &self.embedding_model,
            input: texts,
            dimensions: self.dimensions,
        };
        let mut parsed: EmbeddingResponse = self.post(&self.embeddings_url, &request).await?;
        parsed.data.sort_by_key(|entry| entry.index);
        Ok(parsed.data.into_iter().map(|entry| entry.embedding).collect())
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: AssistantMessage,
}

#[derive(Debug, Deserialize)]
struct AssistantMessage {
    #[serde(default)]
    content: Option<String>,
}

#[async_trait]
impl LanguageModel for OpenAiClient {
    async fn generate(&self, request: &GenerationRequest) -> Result<String, ProviderError> {
        let body = ChatRequest {
            model: &self.chat_model,
            temperature: request.temperature,
            max_tokens: request.max_tokens,
            response_format: request
                .json_output
                .then_some(ResponseFormat { kind: "json_object" }),
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: &request.system,
                },
                ChatMessage {
                    role: "user",
                    content: &request.user,
                },
            ],
        };

        let parsed: ChatResponse = self.post(&self.chat_url, &body).await?;
        parsed
            .choices
            .into_iter()
            .find_map(|choice| choice.message.content)
            .map(|content| content.trim().to_string())
            .ok_or_else(|| ProviderError::fatal("chat completion returned no content"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(base_url: &str) -> OpenAiSettings {
        OpenAiSettings {
            api_key: "sk-test".to_string(),
            base_url: base_url.to_string(),
            embedding_model: "text-embedding-3-small".to_string(),
            chat_model: "gpt-4o-mini".to_string(),
            dimensions: None,
            request_timeout: Duration::from_secs(5),
        }
    }

    #[test]
    fn endpoints_are_joined_onto_the_base_url() {
        let client = OpenAiClient::new(settings("http://localhost:8080/v1")).unwrap();
        assert_eq!(client.embeddings_url.as_str(), "http://localhost:8080/v1/embeddings");
        assert_eq!(client.chat_url.as_str(), "http://localhost:8080/v1/chat/completions");
    }

    #[test]
    fn missing_api_key_is_rejected() {
        let mut config = settings(DEFAULT_BASE_URL);
        config.api_key = "  ".to_string();
        assert!(matches!(OpenAiClient::new(config), Err(RagError::InvalidArgument(_))));
    }

    #[test]
    fn rate_limits_and_server_errors_are_retryable() {
        assert!(classify_status(StatusCode::TOO_MANY_REQUESTS, "slow down").is_retryable());
        assert!(classify_status(StatusCode::BAD_GATEWAY, "").is_retryable());
        assert!(!classify_status(StatusCode::UNAUTHORIZED, "bad key").is_retryable());
        assert!(!classify_status(StatusCode::BAD_REQUEST, "too long").is_retryable());
    }

    #[test]
    fn chat_request_asks_for_json_when_requested() {
        let body = ChatRequest {
            model: "m",
            temperature: 0.0,
            max_tokens: None,
            response_format: Some(ResponseFormat { kind: "json_object" }),
            messages: vec![ChatMessage {
                role: "user",
                content: "hi",
            }],
        };
        let value = serde_json::to_value(&body).unwrap();
        assert_eq!(value["response_format"]["type"], "json_object");
        assert!(value.get("max_tokens").is_none());
    }
}
