//! The ordered LLM provider cascade.
//!
//! Each invocation is wrapped with a hard timeout, the per-provider request
//! budget, response parsing and schema-tolerant decoding. Every recoverable
//! failure advances to the next provider; when the last one fails the
//! cascade reports "no appointment" rather than erroring.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::{debug, info, warn};

use super::parse::{parse_llm_reply, ParsedReply};
use super::prompt::{build_system_prompt, build_user_prompt};
use crate::context::PromptContext;
use crate::providers::{ProviderError, ProviderErrorKind};
use crate::rate_limit::TokenBucket;
use crate::traits::ModelProvider;
use crate::types::IncomingMessage;

pub struct CascadeProvider {
    provider: Arc<dyn ModelProvider>,
    model: String,
    timeout: Duration,
    bucket: Arc<TokenBucket>,
    /// Set on auth failure; the provider stays dark for this process.
    disabled: AtomicBool,
    last_error: Mutex<Option<ProviderErrorKind>>,
}

impl CascadeProvider {
    pub fn new(
        provider: Arc<dyn ModelProvider>,
        model: impl Into<String>,
        timeout: Duration,
        requests_per_minute: u32,
    ) -> Self {
        Self {
            provider,
            model: model.into(),
            timeout,
            bucket: Arc::new(TokenBucket::per_minute(requests_per_minute)),
            disabled: AtomicBool::new(false),
            last_error: Mutex::new(None),
        }
    }

    fn record_error(&self, kind: ProviderErrorKind) {
        *self.last_error.lock().unwrap_or_else(|e| e.into_inner()) = Some(kind);
    }
}

/// Snapshot for the status surface.
#[derive(Debug, Clone)]
pub struct ProviderStatus {
    pub name: String,
    pub model: String,
    pub disabled: bool,
    pub last_error: Option<ProviderErrorKind>,
}

pub struct LlmCascade {
    providers: Vec<CascadeProvider>,
}

impl LlmCascade {
    pub fn new(providers: Vec<CascadeProvider>) -> Self {
        Self { providers }
    }

    pub fn status(&self) -> Vec<ProviderStatus> {
        self.providers
            .iter()
            .map(|p| ProviderStatus {
                name: p.provider.name().to_string(),
                model: p.model.clone(),
                disabled: p.disabled.load(Ordering::Relaxed),
                last_error: *p.last_error.lock().unwrap_or_else(|e| e.into_inner()),
            })
            .collect()
    }

    /// Run the cascade. Empty actions mean "no appointment": either the
    /// model said so or every provider failed.
    pub async fn extract(&self, ctx: &PromptContext, message: &IncomingMessage) -> ParsedReply {
        let system = build_system_prompt(ctx);
        let user = build_user_prompt(ctx, message);

        for entry in &self.providers {
            if entry.disabled.load(Ordering::Relaxed) {
                debug!(provider = entry.provider.name(), "provider disabled, skipping");
                continue;
            }
            if !entry.bucket.try_acquire() {
                // Budget exhaustion behaves exactly like a timeout.
                warn!(provider = entry.provider.name(), "request budget exhausted, advancing");
                entry.record_error(ProviderErrorKind::RateLimit);
                continue;
            }

            let call = entry.provider.chat(&entry.model, &system, &user);
            let response = match tokio::time::timeout(entry.timeout, call).await {
                Err(_) => {
                    warn!(
                        provider = entry.provider.name(),
                        timeout_s = entry.timeout.as_secs(),
                        "LLM call timed out, advancing"
                    );
                    entry.record_error(ProviderErrorKind::Timeout);
                    continue;
                }
                Ok(Err(e)) => {
                    let (kind, fatal) = e
                        .downcast_ref::<ProviderError>()
                        .map(|pe| (pe.kind, pe.is_fatal_for_provider()))
                        .unwrap_or((ProviderErrorKind::Unknown, false));
                    if fatal {
                        warn!(
                            provider = entry.provider.name(),
                            "auth failure, disabling provider for this process"
                        );
                        entry.disabled.store(true, Ordering::Relaxed);
                    } else {
                        warn!(provider = entry.provider.name(), "LLM call failed: {}", e);
                    }
                    entry.record_error(kind);
                    continue;
                }
                Ok(Ok(r)) => r,
            };

            let Some(content) = response.content else {
                warn!(provider = entry.provider.name(), "empty response content, advancing");
                continue;
            };

            match parse_llm_reply(&content, ctx.today) {
                Some(reply) => {
                    info!(
                        provider = entry.provider.name(),
                        model = %entry.model,
                        actions = reply.actions.len(),
                        "extraction response parsed"
                    );
                    debug!(
                        raw = %crate::utils::truncate_str(&content, 500),
                        "raw extraction response"
                    );
                    return reply;
                }
                None => {
                    warn!(
                        provider = entry.provider.name(),
                        raw = %crate::utils::truncate_str(&content, 200),
                        "unparseable response, advancing"
                    );
                    continue;
                }
            }
        }

        info!("all providers exhausted, treating as no appointment");
        ParsedReply::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockProvider;
    use chrono::{NaiveDate, Utc};

    fn ctx() -> PromptContext {
        PromptContext {
            user_name: "Jan".into(),
            partner_name: "Marike".into(),
            today: NaiveDate::from_ymd_opt(2026, 2, 16).unwrap(),
            today_weekday: "Montag".into(),
            ..Default::default()
        }
    }

    fn message() -> IncomingMessage {
        IncomingMessage {
            message_id: "m1".into(),
            chat_id: "c1".into(),
            sender: "Marike".into(),
            text: "Enno hat morgen um 17:00 Training".into(),
            timestamp: Utc::now(),
            reply_to: None,
        }
    }

    const OK_REPLY: &str =
        r#"{"actions": [{"title": "Enno Training", "datetime": "2026-02-17T17:00"}], "reasoning": "x"}"#;

    fn entry(provider: Arc<MockProvider>, timeout_ms: u64) -> CascadeProvider {
        CascadeProvider::new(provider, "mock-model", Duration::from_millis(timeout_ms), 100)
    }

    #[tokio::test]
    async fn test_primary_success_skips_fallback() {
        let primary = Arc::new(MockProvider::with_text(OK_REPLY));
        let fallback = Arc::new(MockProvider::with_text(OK_REPLY));
        let cascade = LlmCascade::new(vec![
            entry(primary.clone(), 1000),
            entry(fallback.clone(), 1000),
        ]);

        let reply = cascade.extract(&ctx(), &message()).await;
        assert_eq!(reply.actions.len(), 1);
        assert_eq!(primary.call_count(), 1);
        assert_eq!(fallback.call_count(), 0);
    }

    #[tokio::test]
    async fn test_primary_error_advances_to_fallback() {
        let primary = Arc::new(MockProvider::with_status_error(500));
        let fallback = Arc::new(MockProvider::with_text(OK_REPLY));
        let cascade = LlmCascade::new(vec![
            entry(primary.clone(), 1000),
            entry(fallback.clone(), 1000),
        ]);

        let reply = cascade.extract(&ctx(), &message()).await;
        assert_eq!(reply.actions.len(), 1);
        assert_eq!(fallback.call_count(), 1);
    }

    #[tokio::test]
    async fn test_primary_timeout_advances() {
        let primary = Arc::new(MockProvider::with_delay(OK_REPLY, Duration::from_millis(300)));
        let fallback = Arc::new(MockProvider::with_text(OK_REPLY));
        let cascade = LlmCascade::new(vec![
            entry(primary.clone(), 50),
            entry(fallback.clone(), 1000),
        ]);

        let started = std::time::Instant::now();
        let reply = cascade.extract(&ctx(), &message()).await;
        assert_eq!(reply.actions.len(), 1);
        assert_eq!(fallback.call_count(), 1);
        // Bounded by primary timeout + fallback latency + ε.
        assert!(started.elapsed() < Duration::from_millis(500));
    }

    #[tokio::test]
    async fn test_all_fail_returns_empty() {
        let primary = Arc::new(MockProvider::with_status_error(503));
        let fallback = Arc::new(MockProvider::with_text("kein JSON hier"));
        let cascade = LlmCascade::new(vec![entry(primary, 1000), entry(fallback, 1000)]);

        let reply = cascade.extract(&ctx(), &message()).await;
        assert!(reply.actions.is_empty());
    }

    #[tokio::test]
    async fn test_auth_failure_disables_provider_for_process() {
        let primary = Arc::new(MockProvider::with_status_error(401));
        let fallback = Arc::new(MockProvider::with_text(OK_REPLY));
        let cascade = LlmCascade::new(vec![
            entry(primary.clone(), 1000),
            entry(fallback.clone(), 1000),
        ]);

        cascade.extract(&ctx(), &message()).await;
        cascade.extract(&ctx(), &message()).await;
        // Primary was only tried once; second run skipped it outright.
        assert_eq!(primary.call_count(), 1);
        assert_eq!(fallback.call_count(), 2);

        let status = cascade.status();
        assert!(status[0].disabled);
        assert_eq!(status[0].last_error, Some(ProviderErrorKind::Auth));
    }

    #[tokio::test]
    async fn test_unparseable_then_fallback_parses() {
        let primary = Arc::new(MockProvider::with_text("Entschuldigung, dazu kann ich nichts sagen."));
        let fallback = Arc::new(MockProvider::with_text(OK_REPLY));
        let cascade = LlmCascade::new(vec![entry(primary, 1000), entry(fallback.clone(), 1000)]);

        let reply = cascade.extract(&ctx(), &message()).await;
        assert_eq!(reply.actions.len(), 1);
        assert_eq!(fallback.call_count(), 1);
    }

    #[tokio::test]
    async fn test_empty_actions_response_stops_cascade() {
        let primary = Arc::new(MockProvider::with_text(r#"{"actions": [], "reasoning": "Alltagschat"}"#));
        let fallback = Arc::new(MockProvider::with_text(OK_REPLY));
        let cascade = LlmCascade::new(vec![entry(primary, 1000), entry(fallback.clone(), 1000)]);

        let reply = cascade.extract(&ctx(), &message()).await;
        assert!(reply.actions.is_empty());
        // A valid "no appointment" answer is final; no fallback call.
        assert_eq!(fallback.call_count(), 0);
    }
}
