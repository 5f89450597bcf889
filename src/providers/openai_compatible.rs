use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::providers::ProviderError;
use crate::traits::{ModelProvider, ProviderResponse, TokenUsage};

/// Any OpenAI-compatible chat-completions endpoint (Groq in production).
pub struct OpenAiCompatibleProvider {
    client: Client,
    base_url: String,
    api_key: String,
}

/// HTTPS is required for remote URLs to protect API keys in transit;
/// HTTP is allowed only for localhost LLM servers.
fn validate_base_url(base_url: &str) -> Result<(), String> {
    let parsed = reqwest::Url::parse(base_url)
        .map_err(|e| format!("Invalid base_url '{}': {}", base_url, e))?;

    let host = parsed.host_str().unwrap_or("");
    match parsed.scheme() {
        "https" => Ok(()),
        "http" => {
            let is_localhost =
                host == "localhost" || host == "127.0.0.1" || host == "[::1]" || host == "::1";
            if is_localhost {
                warn!("Using unencrypted HTTP for local LLM server at '{}'", base_url);
                Ok(())
            } else {
                Err(format!(
                    "HTTP is not allowed for remote URLs (base_url: '{}'). Use HTTPS.",
                    base_url
                ))
            }
        }
        other => Err(format!(
            "Unsupported URL scheme '{}' in base_url '{}'",
            other, base_url
        )),
    }
}

impl OpenAiCompatibleProvider {
    pub fn new(base_url: &str, api_key: &str) -> Result<Self, String> {
        validate_base_url(base_url)?;
        // The connect/read deadline here is a backstop; the cascade applies
        // its own per-call timeout around chat().
        let client = crate::providers::build_http_client(Duration::from_secs(120))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        })
    }
}

#[async_trait]
impl ModelProvider for OpenAiCompatibleProvider {
    fn name(&self) -> &str {
        "openai_compatible"
    }

    async fn chat(
        &self,
        model: &str,
        system: &str,
        user: &str,
    ) -> anyhow::Result<ProviderResponse> {
        let body = json!({
            "model": model,
            "messages": [
                {"role": "system", "content": system},
                {"role": "user", "content": user},
            ],
            "temperature": 0.1,
            "max_tokens": 2048,
        });

        let url = format!("{}/chat/completions", self.base_url);
        debug!(model, "calling OpenAI-compatible endpoint");

        let resp = match self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
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
        let content = data["choices"][0]["message"]["content"]
            .as_str()
            .map(|s| s.to_string());

        let usage = data.get("usage").and_then(|u| {
            Some(TokenUsage {
                input_tokens: u.get("prompt_tokens")?.as_u64()? as u32,
                output_tokens: u.get("completion_tokens")?.as_u64()? as u32,
                model: model.to_string(),
            })
        });

        Ok(ProviderResponse { content, usage })
    }
}
