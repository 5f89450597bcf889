use async_trait::async_trait;

/// Token usage statistics from an LLM API response.
#[derive(Debug, Clone, Default)]
pub struct TokenUsage {
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub model: String,
}

/// The LLM's response text plus accounting.
#[derive(Debug, Clone)]
pub struct ProviderResponse {
    pub content: Option<String>,
    pub usage: Option<TokenUsage>,
}

/// Model provider — sends a system + user prompt to an LLM, gets back text.
///
/// Each provider is a self-contained variant; the cascade holds an ordered
/// list of them and advances on classified failure (see `providers::error`).
#[async_trait]
pub trait ModelProvider: Send + Sync {
    /// Stable name for logs and the status surface.
    fn name(&self) -> &str;

    async fn chat(&self, model: &str, system: &str, user: &str)
        -> anyhow::Result<ProviderResponse>;
}
