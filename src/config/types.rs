use crate::llm::LlmConfig;
use crate::logging::LogConfig;
use crate::orchestrator::OrchestratorConfig;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// HTTP surface
    pub server: ServerConfig,
    /// Credentials, region and endpoint overrides for AWS calls
    pub aws: AwsConfig,
    /// SQL warehouse settings
    pub warehouse: WarehouseConfig,
    /// Log-insights settings
    pub insights: InsightsConfig,
    /// Queryable tables keyed by log type (`cloudtrail`, `guardduty`, ...)
    pub catalog: Catalog,
    /// Profiling and anomaly scanning
    pub analytics: AnalyticsConfig,
    /// Model inference
    pub llm: LlmConfig,
    /// Tool-call server
    pub mcp: McpConfig,
    /// Tool-calling loop
    pub orchestrator: OrchestratorConfig,
    /// Profile store backend
    pub store: StoreConfig,
    /// Logging
    pub log: LogConfig,
}

/// Table catalog wrapper so the defaults are populated
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Catalog(pub BTreeMap<String, TableEntry>);

impl Default for Catalog {
    fn default() -> Self {
        let mut entries = BTreeMap::new();
        entries.insert(
            "cloudtrail".to_string(),
            TableEntry {
                table_name: "cloudtrail_logs".to_string(),
                location: "s3://security-logs/AWSLogs/CloudTrail/".to_string(),
            },
        );
        entries.insert(
            "guardduty".to_string(),
            TableEntry {
                table_name: "guardduty_findings".to_string(),
                location: "s3://security-logs/AWSLogs/GuardDuty/".to_string(),
            },
        );
        Self(entries)
    }
}

/// One queryable table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableEntry {
    pub table_name: String,
    pub location: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address for the HTTP server
    pub bind_addr: String,
    /// Allowed CORS origin; `*` allows any
    pub cors_origin: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8080".to_string(),
            cors_origin: "*".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AwsConfig {
    pub region: String,
    pub access_key_id: Option<String>,
    #[serde(skip_serializing)]
    pub secret_access_key: Option<SecretString>,
    #[serde(skip_serializing)]
    pub session_token: Option<SecretString>,
    /// Request timeout in seconds
    pub timeout_secs: u64,
    /// Per-service endpoint overrides, e.g. `athena = "http://localhost:4566"`
    pub endpoints: BTreeMap<String, String>,
}

impl Default for AwsConfig {
    fn default() -> Self {
        Self {
            region: "us-east-1".to_string(),
            access_key_id: None,
            secret_access_key: None,
            session_token: None,
            timeout_secs: 30,
            endpoints: BTreeMap::new(),
        }
    }
}

impl AwsConfig {
    pub fn has_credentials(&self) -> bool {
        self.access_key_id.is_some()
            && self
                .secret_access_key
                .as_ref()
                .map(|s| !s.expose_secret().is_empty())
                .unwrap_or(false)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WarehouseConfig {
    pub database: String,
    pub output_location: String,
    pub workgroup: Option<String>,
    pub poll_interval_ms: u64,
    /// Caller-imposed deadline for one query; unset polls until terminal
    pub query_timeout_secs: Option<u64>,
}

impl Default for WarehouseConfig {
    fn default() -> Self {
        Self {
            database: "security_logs".to_string(),
            output_location: "s3://security-logs-athena-results/".to_string(),
            workgroup: None,
            poll_interval_ms: 2000,
            query_timeout_secs: None,
        }
    }
}

impl WarehouseConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn query_timeout(&self) -> Option<Duration> {
        self.query_timeout_secs.map(Duration::from_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InsightsConfig {
    pub poll_interval_ms: u64,
    pub default_limit: u32,
    pub log_group_prefix: Option<String>,
    pub max_log_groups: usize,
    pub query_timeout_secs: Option<u64>,
}

impl Default for InsightsConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1000,
            default_limit: 1000,
            log_group_prefix: None,
            max_log_groups: 50,
            query_timeout_secs: None,
        }
    }
}

impl InsightsConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn query_timeout(&self) -> Option<Duration> {
        self.query_timeout_secs.map(Duration::from_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyticsConfig {
    /// Window used when a request does not name one
    pub default_days: u32,
    /// Delay between event lookup pages
    pub page_delay_ms: u64,
    /// Lookup page size (the event service caps this at 50)
    pub page_size: u32,
    /// Hard cap on events fetched for an account-wide scan
    pub account_event_cap: usize,
    /// Anomalies at or above this score trigger an alert
    pub alert_threshold: u8,
    /// Alert topic; when unset alerts go to the log only
    pub alert_topic_arn: Option<String>,
    /// Overrides the built-in sensitive-action set
    pub sensitive_actions: Option<Vec<String>>,
    /// Skip anomalies already recorded by an earlier scan
    pub dedupe_anomalies: bool,
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            default_days: 30,
            page_delay_ms: 200,
            page_size: 50,
            account_event_cap: 5000,
            alert_threshold: 70,
            alert_topic_arn: None,
            sensitive_actions: None,
            dedupe_anomalies: true,
        }
    }
}

impl AnalyticsConfig {
    pub fn page_delay(&self) -> Duration {
        Duration::from_millis(self.page_delay_ms.max(200))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct McpConfig {
    /// Tool server endpoint; the orchestrator runs without tools when unset
    pub endpoint: Option<String>,
    pub timeout_secs: u64,
    pub protocol_version: String,
}

impl Default for McpConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            timeout_secs: 60,
            protocol_version: "2025-03-26".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Memory,
    Sqlite,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    pub sqlite_url: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Memory,
            sqlite_url: "sqlite://cloudlens.db?mode=rwc".to_string(),
        }
    }
}
