//! Configuration management for RevForge services
//!
//! Supports loading configuration from:
//! - Environment variables (prefixed with APP__)
//! - Configuration files (config.toml, config.yaml)
//! - Default values
//!
//! Configuration is validated once at startup; an unknown appraisal tool
//! or an empty exclusion-reason vocabulary is a startup error, never a
//! runtime surprise mid-workflow.

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::errors::{AppError, Result};

/// Main application configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    /// Server configuration
    pub server: ServerConfig,

    /// Database configuration
    pub database: DatabaseConfig,

    /// External bibliographic sources
    #[serde(default = "default_sources")]
    pub sources: Vec<SourceConfig>,

    /// Search stage execution settings
    #[serde(default)]
    pub search: SearchStageConfig,

    /// Capability endpoints (automated decision / extraction services)
    pub capabilities: CapabilityConfig,

    /// Screening configuration
    #[serde(default)]
    pub screening: ScreeningConfig,

    /// Deduplication configuration
    #[serde(default)]
    pub dedup: DedupConfig,

    /// Clustering configuration
    #[serde(default)]
    pub clustering: ClusteringConfig,

    /// Quality appraisal configuration
    #[serde(default)]
    pub appraisal: AppraisalConfig,

    /// Report generation flags (consumed by the manuscript component)
    #[serde(default)]
    pub report: ReportConfig,

    /// Observability configuration
    pub observability: ObservabilityConfig,

    /// Gateway rate limiting configuration
    pub rate_limit: RateLimitConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Host to bind to
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,

    /// Request timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Shutdown timeout in seconds
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    /// Primary database URL (for writes)
    pub url: String,

    /// Read replica URL (optional, falls back to primary)
    pub read_url: Option<String>,

    /// Maximum number of connections
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Minimum number of connections
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,

    /// Connection timeout in seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Idle timeout in seconds
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,
}

/// One external bibliographic database
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SourceConfig {
    /// Source name (e.g. "pubmed", "scopus", "arxiv")
    pub name: String,

    /// Per-source enable flag
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Search endpoint base URL
    pub base_url: String,

    /// Maximum results to request per search
    #[serde(default = "default_max_results")]
    pub max_results: u32,

    /// Documented rate limit, requests per second
    #[serde(default = "default_source_rate_limit")]
    pub rate_limit_per_sec: u32,

    /// Per-request timeout in seconds
    #[serde(default = "default_source_timeout")]
    pub timeout_secs: u64,

    /// Retry attempts for transient failures
    #[serde(default = "default_source_retries")]
    pub max_retries: u32,

    /// Base delay for exponential backoff, in seconds
    #[serde(default = "default_backoff_base")]
    pub backoff_base_secs: u64,
}

/// Search stage execution settings
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct SearchStageConfig {
    /// Optional wall-clock budget for the whole search stage, in
    /// seconds. When exceeded, the stage proceeds with whatever sources
    /// responded and logs the rest as timed out.
    pub stage_budget_secs: Option<u64>,
}

/// Endpoints for the consumed capability contracts
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CapabilityConfig {
    /// Automated screening decision endpoint
    pub decision_url: String,

    /// Evidence extraction endpoint
    pub extraction_url: String,

    /// API key for capability services
    pub api_key: Option<String>,

    /// Request timeout in seconds
    #[serde(default = "default_capability_timeout")]
    pub timeout_secs: u64,

    /// Maximum retries
    #[serde(default = "default_capability_retries")]
    pub max_retries: u32,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ScreeningConfig {
    /// Automated decisions below this confidence require human review
    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: f64,

    /// When false, low-confidence automated decisions stand
    #[serde(default = "default_enabled")]
    pub require_human_review: bool,

    /// Fixed exclusion-reason vocabulary
    #[serde(default = "default_exclusion_reasons")]
    pub exclusion_reasons: Vec<String>,
}

impl Default for ScreeningConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: default_confidence_threshold(),
            require_human_review: default_enabled(),
            exclusion_reasons: default_exclusion_reasons(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DedupConfig {
    /// Normalized-title similarity threshold for a fuzzy match
    #[serde(default = "default_fuzzy_threshold")]
    pub fuzzy_threshold: f64,

    /// Matches below this confidence are routed to human review
    /// instead of auto-merged
    #[serde(default = "default_auto_merge_confidence")]
    pub auto_merge_confidence: f64,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            fuzzy_threshold: default_fuzzy_threshold(),
            auto_merge_confidence: default_auto_merge_confidence(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ClusteringConfig {
    /// Title similarity threshold for topic clustering; must stay below
    /// the dedup threshold
    #[serde(default = "default_topic_threshold")]
    pub topic_threshold: f64,
}

impl Default for ClusteringConfig {
    fn default() -> Self {
        Self {
            topic_threshold: default_topic_threshold(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppraisalConfig {
    /// Registered appraisal tool names; each must resolve in the tool
    /// registry at task start
    #[serde(default = "default_appraisal_tools")]
    pub tools: Vec<String>,
}

impl Default for AppraisalConfig {
    fn default() -> Self {
        Self {
            tools: default_appraisal_tools(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ReportConfig {
    /// Citation style for the downstream manuscript component
    #[serde(default = "default_citation_style")]
    pub citation_style: String,

    /// Output format flag
    #[serde(default = "default_output_format")]
    pub output_format: String,

    /// Audit retention for provenance events, in days. Provenance
    /// retention may outlive task deletion.
    #[serde(default = "default_provenance_retention")]
    pub provenance_retention_days: u32,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            citation_style: default_citation_style(),
            output_format: default_output_format(),
            provenance_retention_days: default_provenance_retention(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ObservabilityConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default = "default_json_logging")]
    pub json_logging: bool,

    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,

    #[serde(default = "default_service_name")]
    pub service_name: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_rate_limit")]
    pub requests_per_second: u32,

    #[serde(default = "default_burst")]
    pub burst: u32,

    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

// Default value functions
fn default_host() -> String { "0.0.0.0".to_string() }
fn default_port() -> u16 { 8080 }
fn default_request_timeout() -> u64 { 30 }
fn default_shutdown_timeout() -> u64 { 30 }
fn default_max_connections() -> u32 { 10 }
fn default_min_connections() -> u32 { 2 }
fn default_connect_timeout() -> u64 { 10 }
fn default_idle_timeout() -> u64 { 600 }
fn default_enabled() -> bool { true }
fn default_max_results() -> u32 { 200 }
fn default_source_rate_limit() -> u32 { 3 }
fn default_source_timeout() -> u64 { 30 }
fn default_source_retries() -> u32 { 5 }
fn default_backoff_base() -> u64 { 2 }
fn default_capability_timeout() -> u64 { 60 }
fn default_capability_retries() -> u32 { 3 }
fn default_confidence_threshold() -> f64 { 0.8 }
fn default_fuzzy_threshold() -> f64 { 0.90 }
fn default_auto_merge_confidence() -> f64 { 0.95 }
fn default_topic_threshold() -> f64 { 0.50 }
fn default_citation_style() -> String { "vancouver".to_string() }
fn default_output_format() -> String { "markdown".to_string() }
fn default_provenance_retention() -> u32 { 3650 }
fn default_log_level() -> String { "info".to_string() }
fn default_json_logging() -> bool { true }
fn default_metrics_port() -> u16 { 9090 }
fn default_service_name() -> String { "revforge".to_string() }
fn default_rate_limit() -> u32 { 50 }
fn default_burst() -> u32 { 100 }

fn default_exclusion_reasons() -> Vec<String> {
    [
        "WRONG_POPULATION",
        "WRONG_INTERVENTION",
        "WRONG_COMPARISON",
        "WRONG_OUTCOME",
        "WRONG_STUDY_DESIGN",
        "NOT_PEER_REVIEWED",
        "LANGUAGE",
        "DUPLICATE",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_appraisal_tools() -> Vec<String> {
    vec!["rob2".to_string()]
}

fn default_sources() -> Vec<SourceConfig> {
    vec![]
}

impl AppConfig {
    /// Load configuration from environment and files
    pub fn load() -> std::result::Result<Self, ConfigError> {
        let env = std::env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());

        let config = Config::builder()
            // Start with defaults
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 8080)?
            // Load base config file
            .add_source(File::with_name("config/default").required(false))
            // Load environment-specific config
            .add_source(File::with_name(&format!("config/{}", env)).required(false))
            // Load local overrides
            .add_source(File::with_name("config/local").required(false))
            // Load from environment variables with APP__ prefix
            // e.g., APP__SERVER__PORT=8081
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Load from a specific TOML file
    pub fn from_file(path: &str) -> std::result::Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(File::with_name(path))
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Validate the loaded configuration. Called once at startup.
    pub fn validate(&self, known_tools: &[&str]) -> Result<()> {
        for threshold in [
            ("screening.confidence_threshold", self.screening.confidence_threshold),
            ("dedup.fuzzy_threshold", self.dedup.fuzzy_threshold),
            ("dedup.auto_merge_confidence", self.dedup.auto_merge_confidence),
            ("clustering.topic_threshold", self.clustering.topic_threshold),
        ] {
            if !(0.0..=1.0).contains(&threshold.1) {
                return Err(AppError::Configuration {
                    message: format!("{} must be within [0, 1], got {}", threshold.0, threshold.1),
                });
            }
        }

        if self.clustering.topic_threshold >= self.dedup.fuzzy_threshold {
            return Err(AppError::Configuration {
                message: "clustering.topic_threshold must stay below dedup.fuzzy_threshold"
                    .to_string(),
            });
        }

        if self.screening.exclusion_reasons.is_empty() {
            return Err(AppError::Configuration {
                message: "screening.exclusion_reasons vocabulary must not be empty".to_string(),
            });
        }

        for tool in &self.appraisal.tools {
            if !known_tools.contains(&tool.as_str()) {
                return Err(AppError::UnknownAppraisalTool { tool: tool.clone() });
            }
        }

        if !self.sources.iter().any(|s| s.enabled) {
            return Err(AppError::Configuration {
                message: "at least one bibliographic source must be enabled".to_string(),
            });
        }

        Ok(())
    }

    /// Get request timeout as Duration
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.server.request_timeout_secs)
    }

    /// Get shutdown timeout as Duration
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.server.shutdown_timeout_secs)
    }

    /// Get the read database URL (falls back to primary)
    pub fn read_database_url(&self) -> &str {
        self.database.read_url.as_deref().unwrap_or(&self.database.url)
    }

    /// Enabled sources only
    pub fn enabled_sources(&self) -> impl Iterator<Item = &SourceConfig> {
        self.sources.iter().filter(|s| s.enabled)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: default_host(),
                port: default_port(),
                request_timeout_secs: default_request_timeout(),
                shutdown_timeout_secs: default_shutdown_timeout(),
            },
            database: DatabaseConfig {
                url: "postgres://localhost/revforge".to_string(),
                read_url: None,
                max_connections: default_max_connections(),
                min_connections: default_min_connections(),
                connect_timeout_secs: default_connect_timeout(),
                idle_timeout_secs: default_idle_timeout(),
            },
            sources: vec![SourceConfig {
                name: "pubmed".to_string(),
                enabled: true,
                base_url: "https://eutils.ncbi.nlm.nih.gov/entrez/eutils".to_string(),
                max_results: default_max_results(),
                rate_limit_per_sec: default_source_rate_limit(),
                timeout_secs: default_source_timeout(),
                max_retries: default_source_retries(),
                backoff_base_secs: default_backoff_base(),
            }],
            search: SearchStageConfig::default(),
            capabilities: CapabilityConfig {
                decision_url: "http://localhost:8090/v1/classify".to_string(),
                extraction_url: "http://localhost:8090/v1/extract".to_string(),
                api_key: None,
                timeout_secs: default_capability_timeout(),
                max_retries: default_capability_retries(),
            },
            screening: ScreeningConfig::default(),
            dedup: DedupConfig::default(),
            clustering: ClusteringConfig::default(),
            appraisal: AppraisalConfig::default(),
            report: ReportConfig::default(),
            observability: ObservabilityConfig {
                log_level: default_log_level(),
                json_logging: default_json_logging(),
                metrics_port: default_metrics_port(),
                service_name: default_service_name(),
            },
            rate_limit: RateLimitConfig {
                requests_per_second: default_rate_limit(),
                burst: default_burst(),
                enabled: default_enabled(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.screening.confidence_threshold, 0.8);
        assert_eq!(config.dedup.fuzzy_threshold, 0.90);
    }

    #[test]
    fn test_read_database_fallback() {
        let config = AppConfig::default();
        assert_eq!(config.read_database_url(), "postgres://localhost/revforge");
    }

    #[test]
    fn test_validate_accepts_defaults() {
        let config = AppConfig::default();
        assert!(config.validate(&["rob2", "robins_i"]).is_ok());
    }

    #[test]
    fn test_validate_rejects_unknown_tool() {
        let mut config = AppConfig::default();
        config.appraisal.tools = vec!["cast_iron".to_string()];
        let err = config.validate(&["rob2"]).unwrap_err();
        assert!(matches!(err, AppError::UnknownAppraisalTool { .. }));
    }

    #[test]
    fn test_validate_rejects_empty_vocabulary() {
        let mut config = AppConfig::default();
        config.screening.exclusion_reasons.clear();
        assert!(config.validate(&["rob2"]).is_err());
    }

    #[test]
    fn test_validate_rejects_inverted_thresholds() {
        let mut config = AppConfig::default();
        config.clustering.topic_threshold = 0.95;
        assert!(config.validate(&["rob2"]).is_err());
    }
}
