use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub provider: ProviderConfig,
    #[serde(default)]
    pub state: StateConfig,
    #[serde(default)]
    pub extraction: ExtractionConfig,
    #[serde(default)]
    pub memory: MemoryConfig,
    #[serde(default)]
    pub reflection: ReflectionConfig,
    pub family: FamilyConfig,
    #[serde(default)]
    pub caldav: CaldavConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ProviderConfig {
    /// Primary provider: any OpenAI-compatible chat endpoint.
    pub api_key: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_primary_model")]
    pub primary_model: String,
    /// Fallback provider: Google GenAI. Empty key disables the fallback.
    #[serde(default)]
    pub fallback_api_key: String,
    #[serde(default = "default_fallback_model")]
    pub fallback_model: String,
    #[serde(default = "default_primary_timeout_secs")]
    pub primary_timeout_secs: u64,
    #[serde(default = "default_fallback_timeout_secs")]
    pub fallback_timeout_secs: u64,
    /// Token-bucket budget per provider, requests per minute.
    #[serde(default = "default_requests_per_minute")]
    pub requests_per_minute: u32,
}

fn default_base_url() -> String {
    "https://api.groq.com/openai/v1".to_string()
}
fn default_primary_model() -> String {
    "llama-3.3-70b-versatile".to_string()
}
fn default_fallback_model() -> String {
    "gemini-2.5-flash".to_string()
}
fn default_primary_timeout_secs() -> u64 {
    45
}
fn default_fallback_timeout_secs() -> u64 {
    30
}
fn default_requests_per_minute() -> u32 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct StateConfig {
    #[serde(default = "default_db_path")]
    pub db_path: String,
    #[serde(default = "default_persons_dir")]
    pub persons_dir: String,
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            persons_dir: default_persons_dir(),
            poll_interval_secs: default_poll_interval_secs(),
        }
    }
}

fn default_db_path() -> String {
    "terminradar.db".to_string()
}
fn default_persons_dir() -> String {
    "data/persons".to_string()
}
fn default_poll_interval_secs() -> u64 {
    5
}

#[derive(Debug, Deserialize, Clone)]
pub struct ExtractionConfig {
    #[serde(default = "default_confidence_auto_threshold")]
    pub confidence_auto_threshold: f64,
    #[serde(default = "default_duplicate_threshold")]
    pub duplicate_threshold: f64,
    #[serde(default = "default_duplicate_suppress_threshold")]
    pub duplicate_suppress_threshold: f64,
    #[serde(default = "default_conversation_window_size")]
    pub conversation_window_size: usize,
    #[serde(default = "default_existing_appointments_window_days")]
    pub existing_appointments_window_days: i64,
    #[serde(default = "default_max_existing")]
    pub max_existing: usize,
    #[serde(default = "default_feedback_examples")]
    pub feedback_examples: usize,
    #[serde(default = "default_timezone")]
    pub timezone: String,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            confidence_auto_threshold: default_confidence_auto_threshold(),
            duplicate_threshold: default_duplicate_threshold(),
            duplicate_suppress_threshold: default_duplicate_suppress_threshold(),
            conversation_window_size: default_conversation_window_size(),
            existing_appointments_window_days: default_existing_appointments_window_days(),
            max_existing: default_max_existing(),
            feedback_examples: default_feedback_examples(),
            timezone: default_timezone(),
        }
    }
}

fn default_confidence_auto_threshold() -> f64 {
    0.85
}
fn default_duplicate_threshold() -> f64 {
    0.7
}
fn default_duplicate_suppress_threshold() -> f64 {
    0.9
}
fn default_conversation_window_size() -> usize {
    10
}
fn default_existing_appointments_window_days() -> i64 {
    60
}
fn default_max_existing() -> usize {
    30
}
fn default_feedback_examples() -> usize {
    5
}
fn default_timezone() -> String {
    "Europe/Berlin".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct MemoryConfig {
    #[serde(default = "default_memory_enabled")]
    pub enabled: bool,
    #[serde(default = "default_memory_url")]
    pub url: String,
    #[serde(default = "default_recall_timeout_secs")]
    pub recall_timeout_secs: u64,
    /// In-flight memorize cap; tasks beyond this are dropped, not queued.
    #[serde(default = "default_memorize_inflight_cap")]
    pub memorize_inflight_cap: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            enabled: default_memory_enabled(),
            url: default_memory_url(),
            recall_timeout_secs: default_recall_timeout_secs(),
            memorize_inflight_cap: default_memorize_inflight_cap(),
        }
    }
}

fn default_memory_enabled() -> bool {
    true
}
fn default_memory_url() -> String {
    "http://evermemos:8001".to_string()
}
fn default_recall_timeout_secs() -> u64 {
    3
}
fn default_memorize_inflight_cap() -> usize {
    512
}

#[derive(Debug, Deserialize, Clone)]
pub struct ReflectionConfig {
    #[serde(default = "default_reflection_interval_min")]
    pub interval_min: u64,
    #[serde(default = "default_reflection_lock_ttl_min")]
    pub lock_ttl_min: u64,
    #[serde(default = "default_reflection_model")]
    pub model: String,
    #[serde(default = "default_reflection_lock_path")]
    pub lock_path: String,
}

impl Default for ReflectionConfig {
    fn default() -> Self {
        Self {
            interval_min: default_reflection_interval_min(),
            lock_ttl_min: default_reflection_lock_ttl_min(),
            model: default_reflection_model(),
            lock_path: default_reflection_lock_path(),
        }
    }
}

fn default_reflection_interval_min() -> u64 {
    30
}
fn default_reflection_lock_ttl_min() -> u64 {
    30
}
fn default_reflection_model() -> String {
    "gemini-2.5-pro".to_string()
}
fn default_reflection_lock_path() -> String {
    "data/reflection.lock".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct FamilyConfig {
    pub user_name: String,
    pub partner_name: String,
    #[serde(default)]
    pub children_names: Vec<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CaldavConfig {
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default = "default_confirmed_calendar")]
    pub confirmed_calendar: String,
    #[serde(default = "default_suggested_calendar")]
    pub suggested_calendar: String,
}

impl Default for CaldavConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            username: String::new(),
            password: String::new(),
            confirmed_calendar: default_confirmed_calendar(),
            suggested_calendar: default_suggested_calendar(),
        }
    }
}

fn default_confirmed_calendar() -> String {
    "TerminRadar".to_string()
}
fn default_suggested_calendar() -> String {
    "TerminRadar ?".to_string()
}

impl AppConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("cannot read config {}: {}", path.display(), e))?;
        let config: AppConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Startup-fatal checks. Everything else has a default.
    fn validate(&self) -> anyhow::Result<()> {
        if self.provider.api_key.trim().is_empty() {
            anyhow::bail!("provider.api_key is required");
        }
        if self.family.user_name.trim().is_empty() || self.family.partner_name.trim().is_empty() {
            anyhow::bail!("family.user_name and family.partner_name are required");
        }
        if self.extraction.timezone.parse::<chrono_tz::Tz>().is_err() {
            anyhow::bail!("extraction.timezone '{}' is not a valid IANA zone", self.extraction.timezone);
        }
        Ok(())
    }
}
