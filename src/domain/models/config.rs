use serde::{Deserialize, Serialize};

/// Main configuration structure for trialsync
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Config {
    /// Remote optimization server connection
    #[serde(default)]
    pub server: ServerConfig,

    /// Reconcile loop tuning
    #[serde(default)]
    pub controller: ControllerConfig,

    /// Metric backend settings
    #[serde(default)]
    pub metrics: MetricsConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Remote optimization server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ServerConfig {
    /// Base address, e.g. `https://api.example.com/v1/`
    #[serde(default = "default_server_address")]
    pub address: String,

    /// Bearer token sent with every request
    #[serde(default)]
    pub token: Option<String>,

    /// Per-request timeout in seconds
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Outbound requests per second
    #[serde(default = "default_rate_limit_rps")]
    pub rate_limit_rps: u32,
}

fn default_server_address() -> String {
    "http://localhost:8000/v1/".to_string()
}

const fn default_request_timeout_secs() -> u64 {
    30
}

const fn default_rate_limit_rps() -> u32 {
    10
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: default_server_address(),
            token: None,
            request_timeout_secs: default_request_timeout_secs(),
            rate_limit_rps: default_rate_limit_rps(),
        }
    }
}

/// Controller manager configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ControllerConfig {
    /// Seconds between full resyncs of every experiment
    #[serde(default = "default_resync_interval_secs")]
    pub resync_interval_secs: u64,

    /// Experiments reconciled in parallel
    #[serde(default = "default_max_concurrent_reconciles")]
    pub max_concurrent_reconciles: usize,

    /// First delay after a failed pass
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    /// Upper bound for the error backoff
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,

    /// Delay used for plain requeue directives
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Retry delay for metric captures that are not ready yet
    #[serde(default = "default_capture_retry_secs")]
    pub capture_retry_secs: u64,
}

const fn default_resync_interval_secs() -> u64 {
    30
}

const fn default_max_concurrent_reconciles() -> usize {
    4
}

const fn default_initial_backoff_ms() -> u64 {
    500
}

const fn default_max_backoff_ms() -> u64 {
    60_000
}

const fn default_poll_interval_ms() -> u64 {
    250
}

const fn default_capture_retry_secs() -> u64 {
    5
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            resync_interval_secs: default_resync_interval_secs(),
            max_concurrent_reconciles: default_max_concurrent_reconciles(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            capture_retry_secs: default_capture_retry_secs(),
        }
    }
}

/// Metric collector configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct MetricsConfig {
    #[serde(default)]
    pub datadog: DatadogConfig,

    /// Timeout for collector HTTP requests, in seconds
    #[serde(default = "default_http_timeout_secs")]
    pub http_timeout_secs: u64,
}

const fn default_http_timeout_secs() -> u64 {
    10
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            datadog: DatadogConfig::default(),
            http_timeout_secs: default_http_timeout_secs(),
        }
    }
}

/// Datadog API access
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct DatadogConfig {
    #[serde(default = "default_datadog_address")]
    pub address: String,

    #[serde(default)]
    pub api_key: Option<String>,

    #[serde(default)]
    pub application_key: Option<String>,
}

fn default_datadog_address() -> String {
    "https://api.datadoghq.com".to_string()
}

impl Default for DatadogConfig {
    fn default() -> Self {
        Self {
            address: default_datadog_address(),
            api_key: None,
            application_key: None,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: json or pretty
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Directory for rolling log files; stdout only when unset
    #[serde(default)]
    pub log_dir: Option<String>,

    /// Rotation: daily, hourly or never
    #[serde(default = "default_rotation")]
    pub rotation: String,

    #[serde(default = "default_true")]
    pub enable_stdout: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

fn default_rotation() -> String {
    "daily".to_string()
}

const fn default_true() -> bool {
    true
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            log_dir: None,
            rotation: default_rotation(),
            enable_stdout: default_true(),
        }
    }
}
