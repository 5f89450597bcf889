//! Async client for the external semantic-memory service.
//!
//! Two core operations: `memorize` (fire-and-forget) and `recall`
//! (bounded round-trip). The service is auxiliary; the message store is
//! the durable record, so every failure path here degrades to "no
//! memory" and the pipeline continues.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::Client;
use serde_json::{json, Value};
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use crate::config::MemoryConfig;

/// Recalled knowledge, rendered for prompt inclusion.
#[derive(Debug, Clone, Default)]
pub struct MemoryContext {
    pub episodes: Vec<String>,
    pub profiles: Vec<String>,
    pub facts: Vec<String>,
}

impl MemoryContext {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.episodes.is_empty() && self.profiles.is_empty() && self.facts.is_empty()
    }

    /// Format recalled memories as a prompt block. Empty context renders
    /// to an empty string so the assembler can skip the section.
    pub fn as_prompt_block(&self) -> String {
        if self.is_empty() {
            return String::new();
        }

        let mut parts = vec!["KONTEXT AUS GEDÄCHTNIS:".to_string()];
        if !self.profiles.is_empty() {
            parts.push("Personenprofile:".into());
            for p in self.profiles.iter().take(5) {
                parts.push(format!("- {}", p));
            }
        }
        if !self.episodes.is_empty() {
            parts.push("Relevante Episoden:".into());
            for e in self.episodes.iter().take(10) {
                parts.push(format!("- {}", e));
            }
        }
        if !self.facts.is_empty() {
            parts.push("Bekannte Fakten:".into());
            for f in self.facts.iter().take(10) {
                parts.push(format!("- {}", f));
            }
        }
        parts.join("\n")
    }
}

/// Health snapshot for the status surface.
#[derive(Debug, Clone)]
pub struct MemoryHealth {
    pub connected: bool,
    pub latency_ms: Option<u64>,
}

/// Process-wide singleton client. Holds a pooled HTTP connection and the
/// bounded memorize dispatcher.
pub struct MemoryClient {
    client: Client,
    base_url: String,
    enabled: bool,
    recall_timeout: Duration,
    memorize_slots: Arc<Semaphore>,
    dropped_memorizes: AtomicU64,
}

impl MemoryClient {
    pub fn new(config: &MemoryConfig) -> anyhow::Result<Self> {
        let client = Client::builder()
            .pool_max_idle_per_host(16)
            .timeout(Duration::from_secs(15))
            .build()?;
        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
            enabled: config.enabled,
            recall_timeout: Duration::from_secs(config.recall_timeout_secs),
            memorize_slots: Arc::new(Semaphore::new(config.memorize_inflight_cap)),
            dropped_memorizes: AtomicU64::new(0),
        })
    }

    /// Count of memorize tasks dropped because the in-flight pool was full.
    pub fn dropped_count(&self) -> u64 {
        self.dropped_memorizes.load(Ordering::Relaxed)
    }

    /// Dispatch a memorize as a detached task. Returns immediately; the
    /// caller must not depend on its success. Saturation drops the task.
    pub fn memorize_detached(
        self: &Arc<Self>,
        chat_id: &str,
        sender: &str,
        text: &str,
        timestamp: DateTime<Utc>,
        message_id: &str,
    ) {
        if !self.enabled || text.trim().is_empty() {
            return;
        }

        let permit = match self.memorize_slots.clone().try_acquire_owned() {
            Ok(p) => p,
            Err(_) => {
                self.dropped_memorizes.fetch_add(1, Ordering::Relaxed);
                warn!("memorize pool saturated, dropping task");
                return;
            }
        };

        let this = self.clone();
        let chat_id = chat_id.to_string();
        let sender = sender.to_string();
        let text = text.to_string();
        let message_id = message_id.to_string();
        tokio::spawn(async move {
            let _permit = permit;
            this.memorize_once_with_retry(&chat_id, &sender, &text, timestamp, &message_id)
                .await;
        });
    }

    /// Awaited variant for batch seeding (bootstrap). Returns whether the
    /// service accepted the record.
    pub async fn memorize_now(
        &self,
        chat_id: &str,
        sender: &str,
        text: &str,
        timestamp: DateTime<Utc>,
        message_id: &str,
    ) -> bool {
        if !self.enabled || text.trim().is_empty() {
            return false;
        }
        self.try_memorize(chat_id, sender, text, timestamp, message_id)
            .await
            .is_ok()
    }

    /// One attempt plus a single 250ms-delayed retry on connection-level
    /// errors. Everything else is swallowed and logged.
    async fn memorize_once_with_retry(
        &self,
        chat_id: &str,
        sender: &str,
        text: &str,
        timestamp: DateTime<Utc>,
        message_id: &str,
    ) {
        match self.try_memorize(chat_id, sender, text, timestamp, message_id).await {
            Ok(()) => {}
            Err(e) if e.is_connect() => {
                tokio::time::sleep(Duration::from_millis(250)).await;
                if let Err(e2) = self
                    .try_memorize(chat_id, sender, text, timestamp, message_id)
                    .await
                {
                    debug!("memory service unreachable after retry: {}", e2);
                }
            }
            Err(e) => {
                warn!("memorize error (non-fatal): {}", e);
            }
        }
    }

    async fn try_memorize(
        &self,
        chat_id: &str,
        sender: &str,
        text: &str,
        timestamp: DateTime<Utc>,
        message_id: &str,
    ) -> Result<(), reqwest::Error> {
        let payload = json!({
            "message_id": if message_id.is_empty() {
                format!("{}_{}", chat_id, timestamp.to_rfc3339())
            } else {
                message_id.to_string()
            },
            "create_time": timestamp.to_rfc3339(),
            "sender": sender,
            "sender_name": sender,
            "content": text,
            "group_id": chat_id,
            "scene": "assistant",
        });

        self.client
            .post(format!("{}/api/v3/agentic/memorize", self.base_url))
            .json(&payload)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    /// Recall context for a query. Never raises; on timeout or any error
    /// returns the empty context within `recall_timeout + ε`.
    pub async fn recall(&self, query: &str, chat_id: &str, top_k: usize) -> MemoryContext {
        if !self.enabled || query.trim().is_empty() {
            return MemoryContext::empty();
        }

        let work = async {
            let mut ctx = MemoryContext::empty();
            ctx.episodes = self.retrieve(query, chat_id, "episode", top_k).await;
            ctx.profiles = self.retrieve(query, chat_id, "profile", 5).await;
            ctx.facts = self.retrieve(query, chat_id, "semantic_memory", 5).await;
            ctx
        };

        match tokio::time::timeout(self.recall_timeout, work).await {
            Ok(ctx) => {
                if !ctx.is_empty() {
                    info!(
                        episodes = ctx.episodes.len(),
                        profiles = ctx.profiles.len(),
                        facts = ctx.facts.len(),
                        "memory recall hit"
                    );
                }
                ctx
            }
            Err(_) => {
                debug!("memory recall timed out");
                MemoryContext::empty()
            }
        }
    }

    async fn retrieve(&self, query: &str, chat_id: &str, source: &str, top_k: usize) -> Vec<String> {
        let payload = json!({
            "query": query,
            "data_source": source,
            "retrieval_mode": "rrf",
            "top_k": top_k,
            "memory_scope": "all",
            "group_id": chat_id,
        });

        let resp = match self
            .client
            .post(format!("{}/api/v3/agentic/retrieve_lightweight", self.base_url))
            .json(&payload)
            .send()
            .await
        {
            Ok(r) => r,
            Err(_) => return Vec::new(),
        };

        let data: Value = match resp.json().await {
            Ok(d) => d,
            Err(_) => return Vec::new(),
        };

        data["result"]["memories"]
            .as_array()
            .map(|arr| {
                arr.iter()
                    .filter_map(|m| {
                        m.get("content")
                            .or_else(|| m.get("text"))
                            .and_then(|v| v.as_str())
                            .map(|s| s.to_string())
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Cheap liveness probe; bounded at 1s.
    pub async fn health(&self) -> MemoryHealth {
        if !self.enabled {
            return MemoryHealth { connected: false, latency_ms: None };
        }
        let started = std::time::Instant::now();
        let probe = self.client.get(format!("{}/health", self.base_url)).send();
        match tokio::time::timeout(Duration::from_secs(1), probe).await {
            Ok(Ok(resp)) if resp.status().is_success() => MemoryHealth {
                connected: true,
                latency_ms: Some(started.elapsed().as_millis() as u64),
            },
            _ => MemoryHealth { connected: false, latency_ms: None },
        }
    }
}
