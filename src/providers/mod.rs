mod error;
mod google_genai;
mod openai_compatible;

pub use error::{ProviderError, ProviderErrorKind};
pub use google_genai::GoogleGenAiProvider;
pub use openai_compatible::OpenAiCompatibleProvider;

use std::time::Duration;

/// Shared HTTP client construction for all providers.
pub fn build_http_client(timeout: Duration) -> Result<reqwest::Client, String> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| format!("failed to build HTTP client: {}", e))
}
