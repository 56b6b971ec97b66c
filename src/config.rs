//! Service configuration
//!
//! Loaded from a TOML file with defaults for every field. A handful of
//! environment variables override the file so deployments can inject paths
//! and secrets without editing it.

use crate::error::{QualityError, Result};
use crate::scheduler::CronSchedule;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use tracing::debug;

/// Names of the fixed job registry
pub const DAILY_BATCH: &str = "daily-batch";
pub const WEEKLY_REEVALUATION: &str = "weekly-reevaluation";
pub const MONTHLY_ARCHIVE: &str = "monthly-archive";
pub const HEALTH_CHECK: &str = "health-check";

/// Upper bound for day windows (about a century)
pub const MAX_STALE_DAYS: i64 = 36_500;

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub server: ServerConfig,
    pub cache: CacheConfig,
    pub quality: QualityConfig,
    pub insights: InsightsConfig,
    /// Per-job settings keyed by job name
    pub jobs: BTreeMap<String, JobConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Path of the local libsql database file
    pub path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub addr: SocketAddr,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Disabled caches behave as a permanent miss
    pub enabled: bool,
    /// Maximum number of entries kept by the in-process store
    pub capacity: usize,
}

/// Thresholds used by the confidence lifecycle
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityConfig {
    /// Triples below this confidence are deletion candidates
    pub low_confidence_threshold: f64,
    /// Triples not updated for this many days count as stale
    pub stale_days: i64,
    /// Amount subtracted per decay pass
    pub decay_rate: f64,
    /// Confidence added by an approve
    pub approve_boost: f64,
    /// Maximum number of duplicate groups listed in a report
    pub duplicate_report_limit: usize,
}

/// External text-generation service used for insights
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InsightsConfig {
    pub api_url: String,
    pub model: String,
    /// Empty key disables the provider; insights use the local fallback
    pub api_key: String,
    #[serde(with = "serde_duration")]
    pub timeout: Duration,
    /// Only triples created within this many days feed insight generation
    pub lookback_days: i64,
}

/// Configuration for an individual scheduled job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobConfig {
    /// Initial enabled flag at registration
    pub enabled: bool,

    /// Cron expression (5 fields) or `@daily`/`@weekly`/`@monthly`/`@hourly`
    pub schedule: String,

    /// Maximum duration for job execution (in seconds)
    #[serde(with = "serde_duration")]
    pub max_duration: Duration,
}

impl JobConfig {
    fn new(enabled: bool, schedule: &str) -> Self {
        Self {
            enabled,
            schedule: schedule.to_string(),
            max_duration: Duration::from_secs(600),
        }
    }
}

// Durations are written as whole seconds
mod serde_duration {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: "kg-quality.db".to_string(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: ([127, 0, 0, 1], 3000).into(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            capacity: 1024,
        }
    }
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            low_confidence_threshold: 0.3,
            stale_days: 90,
            decay_rate: 0.1,
            approve_boost: 0.15,
            duplicate_report_limit: 50,
        }
    }
}

impl Default for InsightsConfig {
    fn default() -> Self {
        Self {
            api_url: "https://api.openai.com/v1/chat/completions".to_string(),
            model: "gpt-4o-mini".to_string(),
            api_key: String::new(),
            timeout: Duration::from_secs(20),
            lookback_days: 90,
        }
    }
}

/// Default job registry
pub fn default_jobs() -> BTreeMap<String, JobConfig> {
    let mut jobs = BTreeMap::new();
    jobs.insert(DAILY_BATCH.to_string(), JobConfig::new(true, "0 2 * * *"));
    jobs.insert(
        WEEKLY_REEVALUATION.to_string(),
        JobConfig::new(true, "0 3 * * 0"),
    );
    jobs.insert(MONTHLY_ARCHIVE.to_string(), JobConfig::new(true, "0 4 1 * *"));
    // Ships disabled; operators opt in
    jobs.insert(HEALTH_CHECK.to_string(), JobConfig::new(false, "0 * * * *"));
    jobs
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig::default(),
            server: ServerConfig::default(),
            cache: CacheConfig::default(),
            quality: QualityConfig::default(),
            insights: InsightsConfig::default(),
            jobs: default_jobs(),
        }
    }
}

impl AppConfig {
    /// Load configuration from TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    /// Load configuration from TOML string
    ///
    /// Jobs missing from the file keep their defaults.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let mut config: AppConfig = toml::from_str(toml_str)?;
        for (name, job) in default_jobs() {
            config.jobs.entry(name).or_insert(job);
        }
        config.validate()?;
        Ok(config)
    }

    /// Load from an optional file, then apply environment overrides
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(p) => Self::from_file(p)?,
            None => Self::default(),
        };
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    /// Override selected fields from the environment
    pub fn apply_env(&mut self) {
        if let Ok(path) = std::env::var("KG_QUALITY_DB_PATH") {
            if !path.is_empty() {
                debug!("Using database path from KG_QUALITY_DB_PATH");
                self.database.path = path;
            }
        }
        if let Ok(addr) = std::env::var("KG_QUALITY_ADDR") {
            match addr.parse() {
                Ok(addr) => self.server.addr = addr,
                Err(_) => tracing::warn!("Ignoring unparsable KG_QUALITY_ADDR: {}", addr),
            }
        }
        if let Ok(key) = std::env::var("OPENAI_API_KEY") {
            if !key.is_empty() {
                self.insights.api_key = key;
            }
        }
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        let q = &self.quality;
        for (name, value) in [
            ("low_confidence_threshold", q.low_confidence_threshold),
            ("decay_rate", q.decay_rate),
            ("approve_boost", q.approve_boost),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(QualityError::Config(format!(
                    "quality.{} must be between 0 and 1",
                    name
                )));
            }
        }

        if q.stale_days <= 0 || q.stale_days > MAX_STALE_DAYS {
            return Err(QualityError::Config(format!(
                "quality.stale_days must be between 1 and {}",
                MAX_STALE_DAYS
            )));
        }

        if self.insights.lookback_days <= 0 || self.insights.lookback_days > MAX_STALE_DAYS {
            return Err(QualityError::Config(format!(
                "insights.lookback_days must be between 1 and {}",
                MAX_STALE_DAYS
            )));
        }

        if self.cache.capacity == 0 {
            return Err(QualityError::Config(
                "cache.capacity must be at least 1".to_string(),
            ));
        }

        for (name, job) in &self.jobs {
            CronSchedule::parse(&job.schedule).map_err(|e| {
                QualityError::Config(format!("jobs.{}: {}", name, e))
            })?;
            if job.max_duration.is_zero() {
                return Err(QualityError::Config(format!(
                    "jobs.{}: max_duration must be positive",
                    name
                )));
            }
        }

        Ok(())
    }
}
