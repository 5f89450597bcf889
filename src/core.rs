//! Process wiring and the daemon loops.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use chrono_tz::Tz;
use tracing::{error, info, warn};

use crate::calendar::{self, CaldavSink};
use crate::config::AppConfig;
use crate::context::ContextAssembler;
use crate::extractor::{CascadeProvider, ExtractionPipeline, LlmCascade, ProviderStatus, Validator};
use crate::feedback::{FeedbackInput, FeedbackLoop};
use crate::memory::{MemoryClient, MemoryHealth};
use crate::persons::PersonStore;
use crate::reflection::ReflectionAgent;
use crate::state::SqliteStateStore;
use crate::traits::store_prelude::*;
use crate::traits::{CalendarSink, ModelProvider};
use crate::types::{ExtractionOutcome, FeedbackRecord, IncomingMessage};

/// How many unprocessed messages one poll tick picks up.
const POLL_BATCH: usize = 16;

/// Suggested appointments older than this are swept to `skipped`.
const STALE_SUGGESTION_DAYS: i64 = 30;

/// Snapshot for the status surface served by the HTTP collaborator.
#[derive(Debug, Clone)]
pub struct StatusReport {
    pub providers: Vec<ProviderStatus>,
    pub memory: Option<MemoryHealth>,
    pub dropped_memorizes: u64,
}

/// The assembled core: everything the message pipeline, the feedback
/// endpoint and the reflection runner share.
pub struct Core {
    pipeline: ExtractionPipeline,
    feedback: FeedbackLoop,
    reflection: ReflectionAgent,
    store: Arc<SqliteStateStore>,
    memory: Option<Arc<MemoryClient>>,
    poll_interval: Duration,
    reflection_interval: Duration,
}

impl Core {
    pub async fn build(config: &AppConfig) -> anyhow::Result<Self> {
        let tz: Tz = config
            .extraction
            .timezone
            .parse()
            .map_err(|_| anyhow::anyhow!("invalid timezone '{}'", config.extraction.timezone))?;

        // 1. State store
        let store = Arc::new(SqliteStateStore::new(&config.state.db_path).await?);
        info!("state store initialized ({})", config.state.db_path);

        // 2. Person profiles
        let persons = Arc::new(PersonStore::new(&config.state.persons_dir));
        let loaded = persons.load();
        info!(count = loaded.len(), dir = %config.state.persons_dir, "person profiles ready");

        // 3. Semantic memory
        let memory = if config.memory.enabled {
            let client = Arc::new(MemoryClient::new(&config.memory)?);
            info!(url = %config.memory.url, "memory client initialized");
            Some(client)
        } else {
            info!("memory disabled");
            None
        };

        // 4. Provider cascade
        let mut providers = vec![CascadeProvider::new(
            Arc::new(
                crate::providers::OpenAiCompatibleProvider::new(
                    &config.provider.base_url,
                    &config.provider.api_key,
                )
                .map_err(|e| anyhow::anyhow!(e))?,
            ),
            config.provider.primary_model.clone(),
            Duration::from_secs(config.provider.primary_timeout_secs),
            config.provider.requests_per_minute,
        )];
        if !config.provider.fallback_api_key.trim().is_empty() {
            providers.push(CascadeProvider::new(
                Arc::new(
                    crate::providers::GoogleGenAiProvider::new(&config.provider.fallback_api_key)
                        .map_err(|e| anyhow::anyhow!(e))?,
                ),
                config.provider.fallback_model.clone(),
                Duration::from_secs(config.provider.fallback_timeout_secs),
                config.provider.requests_per_minute,
            ));
        }
        info!(
            primary = %config.provider.primary_model,
            fallback = %config.provider.fallback_model,
            cascade_len = providers.len(),
            "LLM cascade configured"
        );
        let cascade = LlmCascade::new(providers);

        // 5. Calendar sink
        let sink: Option<Arc<dyn CalendarSink>> =
            CaldavSink::new(&config.caldav, persons.clone())?.map(|s| {
                info!(
                    confirmed = %config.caldav.confirmed_calendar,
                    suggested = %config.caldav.suggested_calendar,
                    "CalDAV sink configured"
                );
                Arc::new(s) as Arc<dyn CalendarSink>
            });
        if sink.is_none() {
            info!("CalDAV not configured, appointments stay local");
        }

        // 6. Pipeline
        let assembler = ContextAssembler::new(
            store.clone() as Arc<dyn StateStore>,
            persons.clone(),
            memory.clone(),
            config.extraction.clone(),
            config.family.clone(),
            tz,
        );
        let validator = Validator::new(
            tz,
            config.family.clone(),
            config.extraction.duplicate_threshold,
            config.extraction.duplicate_suppress_threshold,
        );
        let pipeline = ExtractionPipeline::new(
            store.clone() as Arc<dyn StateStore>,
            assembler,
            cascade,
            validator,
            sink.clone(),
            memory.clone(),
            persons.clone(),
            config.extraction.confidence_auto_threshold,
            config.extraction.conversation_window_size,
            tz,
        );

        // 7. Feedback loop
        let feedback = FeedbackLoop::new(
            store.clone() as Arc<dyn StateStore>,
            sink.clone(),
            persons.clone(),
            tz,
        );

        // 8. Reflection agent (long-context model, fallback provider when
        // available)
        let reflection_provider: Arc<dyn ModelProvider> =
            if !config.provider.fallback_api_key.trim().is_empty() {
                Arc::new(
                    crate::providers::GoogleGenAiProvider::new(&config.provider.fallback_api_key)
                        .map_err(|e| anyhow::anyhow!(e))?,
                )
            } else {
                Arc::new(
                    crate::providers::OpenAiCompatibleProvider::new(
                        &config.provider.base_url,
                        &config.provider.api_key,
                    )
                    .map_err(|e| anyhow::anyhow!(e))?,
                )
            };
        let reflection = ReflectionAgent::new(
            store.clone() as Arc<dyn StateStore>,
            persons,
            reflection_provider,
            config.reflection.model.clone(),
            config.reflection.lock_path.clone(),
            config.reflection.lock_ttl_min,
        );

        Ok(Self {
            pipeline,
            feedback,
            reflection,
            store,
            memory,
            poll_interval: Duration::from_secs(config.state.poll_interval_secs),
            reflection_interval: Duration::from_secs(config.reflection.interval_min * 60),
        })
    }

    /// Entry point for the ingest collaborator's embedded mode.
    pub async fn handle_message(&self, message: &IncomingMessage) -> ExtractionOutcome {
        self.pipeline.handle_message(message).await
    }

    /// Entry point for the dashboard's feedback endpoint.
    pub async fn submit_feedback(&self, input: FeedbackInput) -> anyhow::Result<FeedbackRecord> {
        self.feedback.submit(input).await
    }

    /// Cheap snapshot for `/status`.
    pub async fn status(&self) -> StatusReport {
        let memory = match &self.memory {
            Some(client) => Some(client.health().await),
            None => None,
        };
        StatusReport {
            providers: self.pipeline.provider_status(),
            memory,
            dropped_memorizes: self.memory.as_ref().map(|m| m.dropped_count()).unwrap_or(0),
        }
    }

    /// Drain unprocessed messages once. Returns how many were handled.
    pub async fn poll_once(&self) -> anyhow::Result<usize> {
        let batch = self.store.unprocessed_messages(POLL_BATCH).await?;
        let count = batch.len();
        for message in batch {
            let outcome = self.pipeline.handle_message(&message).await;
            let summary = match outcome {
                ExtractionOutcome::NoOp => "no-op".to_string(),
                ExtractionOutcome::Extracted(n) => format!("extracted: {} appointments", n),
            };
            self.store.mark_processed(&message.message_id, &summary).await?;
        }
        Ok(count)
    }

    async fn sweep_stale_suggestions(&self) {
        let cutoff = Utc::now() - chrono::Duration::days(STALE_SUGGESTION_DAYS);
        match self.store.expire_stale_suggestions(cutoff).await {
            Ok(expired) if !expired.is_empty() => {
                info!(count = expired.len(), "swept stale suggestions to skipped");
            }
            Ok(_) => {}
            Err(e) => warn!("stale-suggestion sweep failed: {}", e),
        }
    }
}

/// The daemon: poll the message store, tick reflection, sweep stale
/// suggestions, until interrupted.
pub async fn run(config: AppConfig) -> anyhow::Result<()> {
    let core = Arc::new(Core::build(&config).await?);
    info!("terminradar {} started", env!("CARGO_PKG_VERSION"));

    // Message poller
    let poller = {
        let core = core.clone();
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(core.poll_interval);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tick.tick().await;
                match core.poll_once().await {
                    Ok(0) => {}
                    Ok(n) => info!("processed {} messages", n),
                    Err(e) => error!("message poll failed: {}", e),
                }
            }
        })
    };

    // Reflection timer
    let reflector = {
        let core = core.clone();
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(core.reflection_interval);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            tick.tick().await; // immediate first tick is skipped
            loop {
                tick.tick().await;
                if let Err(e) = core.reflection.run_cycle().await {
                    warn!("reflection cycle failed, will retry next tick: {}", e);
                }
            }
        })
    };

    // Hourly stale-suggestion sweep
    let sweeper = {
        let core = core.clone();
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(Duration::from_secs(3600));
            loop {
                tick.tick().await;
                core.sweep_stale_suggestions().await;
            }
        })
    };

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");
    poller.abort();
    reflector.abort();
    sweeper.abort();
    Ok(())
}

/// `terminradar reflect`: one cycle, honoring the cross-process lock.
pub async fn run_reflection_once(config: AppConfig) -> anyhow::Result<()> {
    let core = Core::build(&config).await?;
    match core.reflection.run_cycle().await? {
        crate::reflection::ReflectionOutcome::LockHeld => {
            println!("Reflection lock held by another process; nothing done.");
        }
        crate::reflection::ReflectionOutcome::Ran { applied, gaps } => {
            println!("Reflection applied {} profile changes.", applied.len());
            for line in &applied {
                println!("  {}", line);
            }
            if !gaps.is_empty() {
                println!("Identified gaps:");
                for gap in &gaps {
                    println!("  - {}", gap);
                }
            }
        }
    }
    Ok(())
}

/// `terminradar reconcile`: repair drift between rows and remote events.
pub async fn run_reconcile(config: AppConfig) -> anyhow::Result<()> {
    let core = Core::build(&config).await?;
    let persons = Arc::new(PersonStore::new(&config.state.persons_dir));
    let Some(sink) = CaldavSink::new(&config.caldav, persons)? else {
        anyhow::bail!("CalDAV is not configured; nothing to reconcile");
    };
    let report = calendar::reconcile(core.store.as_ref(), &sink).await?;
    println!(
        "Reconcile: {} checked, {} created, {} repaired, {} skipped, {} failed.",
        report.checked, report.created, report.repaired, report.skipped, report.failed
    );
    Ok(())
}
