//! Text generation capability used for query drafting, correction,
//! result summaries and insights advice.
//!
//! The capability is untrusted and may hang; callers bound every call with
//! their own timeout.

use crate::{config::TranslationConfig, error::TranslationError};
use async_trait::async_trait;
use log::debug;
use serde::{Deserialize, Serialize};

#[async_trait]
pub trait Translator: Send + Sync {
    async fn generate(&self, prompt: &str, model: &str) -> Result<String, TranslationError>;
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f64,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Debug, Deserialize)]
struct ChatReply {
    #[serde(default)]
    content: Option<String>,
}

/// Client for an OpenAI-compatible `/chat/completions` endpoint.
pub struct OpenAiTranslator {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    temperature: f64,
}

impl OpenAiTranslator {
    pub fn new(config: &TranslationConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            temperature: config.temperature,
        }
    }
}

#[async_trait]
impl Translator for OpenAiTranslator {
    async fn generate(&self, prompt: &str, model: &str) -> Result<String, TranslationError> {
        let Some(key) = self.api_key.as_deref() else {
            return Err(TranslationError::Unavailable("no API key configured".into()));
        };

        let request = ChatRequest {
            model,
            messages: vec![ChatMessage {
                role: "user",
                content: prompt,
            }],
            temperature: self.temperature,
        };

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(key)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TranslationError::Status {
                code: status.as_u16(),
                body,
            });
        }

        let reply: ChatResponse = response.json().await?;
        let text = reply
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .ok_or(TranslationError::EmptyResponse)?;
        debug!("{model}: {} chars generated", text.len());
        Ok(text)
    }
}

/// Unwrap a candidate that came back inside ``` or ```sql fences.
pub fn strip_code_fences(text: &str) -> String {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed.to_string();
    };
    // Drop the info string (`sql`, `SQL`, ...) on the opening line.
    let body = match rest.find('\n') {
        Some(nl) => &rest[nl + 1..],
        None => rest,
    };
    let body = body.trim_end();
    body.strip_suffix("```").unwrap_or(body).trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fences_are_removed() {
        assert_eq!(strip_code_fences("```sql\nSELECT 1\n```"), "SELECT 1");
        assert_eq!(strip_code_fences("```\nSELECT 2;\n```\n"), "SELECT 2;");
        assert_eq!(strip_code_fences("  SELECT 3  "), "SELECT 3");
    }

    #[test]
    fn unterminated_fence_keeps_body() {
        assert_eq!(strip_code_fences("```sql\nSELECT 4"), "SELECT 4");
    }

    #[tokio::test]
    async fn missing_key_is_unavailable() {
        let mut cfg = crate::config::AppConfig::default_test().translation;
        cfg.api_key = None;
        let err = OpenAiTranslator::new(&cfg)
            .generate("hi", "m")
            .await
            .unwrap_err();
        assert!(matches!(err, TranslationError::Unavailable(_)));
    }
}
