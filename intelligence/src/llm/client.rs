//! HTTP client for an OpenAI-compatible LLM runtime.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{ChatModel, ChatRequest, EmbeddingModel, LlmError};

/// Client over `/v1/chat/completions` and `/v1/embeddings`.
#[derive(Clone)]
pub struct HttpLlmClient {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    chat_model: String,
    embedding_model: String,
    embedding_dim: usize,
}

impl HttpLlmClient {
    pub fn new(
        base_url: &str,
        api_key: Option<String>,
        chat_model: &str,
        embedding_model: &str,
        embedding_dim: usize,
        timeout: Duration,
    ) -> Result<Self, LlmError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            chat_model: chat_model.to_string(),
            embedding_model: embedding_model.to_string(),
            embedding_dim,
        })
    }

    fn request(&self, path: &str, body: &impl Serialize) -> reqwest::RequestBuilder {
        let mut builder = self
            .http
            .post(format!("{}{}", self.base_url, path))
            .json(body);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }
        builder
    }

    async fn send<T: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        body: &impl Serialize,
    ) -> Result<T, LlmError> {
        let response = self.request(path, body).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::Status {
                status: status.as_u16(),
                body: body.chars().take(512).collect(),
            });
        }
        let body = response.text().await?;
        serde_json::from_str(&body).map_err(|e| LlmError::Malformed(e.to_string()))
    }

    /// Cheap reachability probe for the health endpoint.
    pub async fn probe(&self) -> bool {
        let mut builder = self.http.get(format!("{}/v1/models", self.base_url));
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }
        match builder.send().await {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                tracing::debug!(error = %e, "LLM runtime probe failed");
                false
            }
        }
    }
}

#[derive(Serialize)]
struct WireMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Serialize)]
struct ChatCompletionBody<'a> {
    model: &'a str,
    messages: Vec<WireMessage<'a>>,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    seed: Option<u64>,
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}

#[async_trait]
impl ChatModel for HttpLlmClient {
    async fn complete(&self, request: &ChatRequest) -> Result<String, LlmError> {
        let body = ChatCompletionBody {
            model: &self.chat_model,
            messages: vec![
                WireMessage {
                    role: "system",
                    content: &request.system,
                },
                WireMessage {
                    role: "user",
                    content: &request.user,
                },
            ],
            temperature: request.temperature,
            seed: request.seed,
        };

        let response: ChatCompletionResponse = self.send("/v1/chat/completions", &body).await?;
        response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| LlmError::Malformed("completion had no choices".into()))
    }
}

#[derive(Serialize)]
struct EmbeddingsBody<'a> {
    model: &'a str,
    input: &'a str,
}

#[derive(Deserialize)]
struct EmbeddingsResponse {
    data: Vec<EmbeddingRow>,
}

#[derive(Deserialize)]
struct EmbeddingRow {
    embedding: Vec<f32>,
}

#[async_trait]
impl EmbeddingModel for HttpLlmClient {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, LlmError> {
        let body = EmbeddingsBody {
            model: &self.embedding_model,
            input: text,
        };
        let response: EmbeddingsResponse = self.send("/v1/embeddings", &body).await?;
        let vector = response
            .data
            .into_iter()
            .next()
            .map(|row| row.embedding)
            .ok_or_else(|| LlmError::Malformed("embedding response had no data".into()))?;

        if vector.len() != self.embedding_dim {
            return Err(LlmError::Malformed(format!(
                "expected {}-dim embedding, got {}",
                self.embedding_dim,
                vector.len()
            )));
        }
        Ok(vector)
    }

    fn model_id(&self) -> &str {
        &self.embedding_model
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chat_body_omits_absent_seed() {
        let body = ChatCompletionBody {
            model: "m",
            messages: vec![],
            temperature: 0.2,
            seed: None,
        };
        let value = serde_json::to_value(&body).unwrap();
        assert!(value.get("seed").is_none());
    }

    #[test]
    fn test_chat_response_parses_content() {
        let raw = r#"{"choices":[{"message":{"role":"assistant","content":"[]"}}]}"#;
        let parsed: ChatCompletionResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.choices[0].message.content.as_deref(), Some("[]"));
    }

    #[test]
    fn test_transient_classification() {
        let server = LlmError::Status {
            status: 503,
            body: String::new(),
        };
        let client = LlmError::Status {
            status: 400,
            body: String::new(),
        };
        assert!(server.is_transient());
        assert!(!client.is_transient());
        assert!(!LlmError::Malformed("x".into()).is_transient());
    }
}
