use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use tracing::debug;

use crate::providers::ProviderError;
use crate::traits::{ModelProvider, ProviderResponse, TokenUsage};

/// Google GenAI (Gemini) — the fallback provider.
pub struct GoogleGenAiProvider {
    client: Client,
    base_url: String,
    api_key: String,
}

impl GoogleGenAiProvider {
    pub fn new(api_key: &str) -> Result<Self, String> {
        let client = crate::providers::build_http_client(Duration::from_secs(120))?;
        Ok(Self {
            client,
            base_url: "https://generativelanguage.googleapis.com/v1beta".to_string(),
            api_key: api_key.to_string(),
        })
    }

    fn parse_response(data: &Value, model: &str) -> anyhow::Result<ProviderResponse> {
        let candidate = data["candidates"]
            .get(0)
            .ok_or_else(|| anyhow::anyhow!("no candidates in Google GenAI response"))?;

        let empty = vec![];
        let parts = candidate["content"]["parts"].as_array().unwrap_or(&empty);
        let mut text = String::new();
        for part in parts {
            if let Some(t) = part.get("text").and_then(|s| s.as_str()) {
                text.push_str(t);
            }
        }

        let usage = data.get("usageMetadata").and_then(|u| {
            Some(TokenUsage {
                input_tokens: u.get("promptTokenCount")?.as_u64()? as u32,
                output_tokens: u.get("candidatesTokenCount")?.as_u64()? as u32,
                model: model.to_string(),
            })
        });

        Ok(ProviderResponse {
            content: if text.is_empty() { None } else { Some(text) },
            usage,
        })
    }
}

#[async_trait]
impl ModelProvider for GoogleGenAiProvider {
    fn name(&self) -> &str {
        "google_genai"
    }

    async fn chat(
        &self,
        model: &str,
        system: &str,
        user: &str,
    ) -> anyhow::Result<ProviderResponse> {
        let body = json!({
            "system_instruction": { "parts": [{ "text": system }] },
            "contents": [{ "role": "user", "parts": [{ "text": user }] }],
            "generationConfig": { "temperature": 0.1, "maxOutputTokens": 2048 },
        });

        // Header-based auth keeps the key out of logged URLs.
        let url = format!("{}/models/{}:generateContent", self.base_url, model);
        debug!(model, "calling Google GenAI");

        let resp = match self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => return Err(ProviderError::network(&e).into()),
        };

        let status = resp.status();
        let text = resp.text().await?;

        if !status.is_success() {
            return Err(ProviderError::from_status(status.as_u16(), &text).into());
        }

        let data: Value = serde_json::from_str(&text)?;
        Self::parse_response(&data, model)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_response_joins_parts() {
        let data = json!({
            "candidates": [{
                "content": { "parts": [{"text": "{\"actions\""}, {"text": ": []}"}] }
            }],
            "usageMetadata": { "promptTokenCount": 100, "candidatesTokenCount": 8 }
        });
        let resp = GoogleGenAiProvider::parse_response(&data, "gemini-2.5-flash").unwrap();
        assert_eq!(resp.content.as_deref(), Some("{\"actions\": []}"));
        assert_eq!(resp.usage.unwrap().output_tokens, 8);
    }

    #[test]
    fn test_parse_response_no_candidates_errors() {
        let data = json!({ "candidates": [] });
        assert!(GoogleGenAiProvider::parse_response(&data, "m").is_err());
    }

    #[test]
    fn test_parse_response_empty_parts_yields_none() {
        let data = json!({ "candidates": [{ "content": { "parts": [] } }] });
        let resp = GoogleGenAiProvider::parse_response(&data, "m").unwrap();
        assert!(resp.content.is_none());
    }
}
