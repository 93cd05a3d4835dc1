use std::collections::BTreeMap;
use std::time::Duration;

use serde::Deserialize;

use crate::default::{
    get_default_address, get_default_congestion, get_default_group_timeout,
    get_default_health_interval, get_default_health_path, get_default_health_timeout,
    get_default_healthy_threshold, get_default_idle_timeout, get_default_keep_alive,
    get_default_log_level, get_default_logging, get_default_max_streams, get_default_metrics,
    get_default_metrics_address, get_default_metrics_enabled, get_default_metrics_path,
    get_default_quic, get_default_retry_count, get_default_routing, get_default_strategy,
    get_default_telemetry, get_default_unhealthy_threshold, get_default_weight,
};

#[derive(Debug, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct Config {
    pub server: Server,

    // `backends` is the legacy key for the same list
    #[serde(alias = "backends")]
    pub backend_groups: Vec<BackendGroup>,

    #[serde(default = "get_default_routing")]
    pub routing: Routing,

    #[serde(default = "get_default_telemetry")]
    pub telemetry: Telemetry,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct Server {
    #[serde(default = "get_default_address")]
    pub address: String, // "0.0.0.0:4433"

    pub cert_file: String,
    pub key_file: String,

    // plain-TCP HTTP/1.1 ingress for clients without HTTP/3
    #[serde(default)]
    pub fallback_address: Option<String>,

    #[serde(default = "get_default_quic")]
    pub quic: Quic,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct Quic {
    #[serde(default = "get_default_max_streams")]
    pub max_streams: u32,

    #[serde(default = "get_default_idle_timeout", with = "crate::duration")]
    pub idle_timeout: Duration,

    #[serde(default = "get_default_keep_alive", with = "crate::duration")]
    pub keep_alive: Duration,

    #[serde(default)]
    pub enable_0rtt: bool,

    #[serde(default = "get_default_congestion")]
    pub congestion_algorithm: String, // "cubic", "bbr", "newreno"
}

#[derive(Debug, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct BackendGroup {
    pub name: String, // "api"
    pub targets: Vec<Target>,

    #[serde(default = "get_default_strategy")]
    pub strategy: String, // "round_robin", "least_connections", "weighted"

    #[serde(default)]
    pub health_check: HealthCheck,

    #[serde(default = "get_default_group_timeout", with = "crate::duration")]
    pub timeout: Duration,

    // parsed and validated; the forwarding path does not retry yet
    #[serde(default = "get_default_retry_count")]
    pub retry_count: u32,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct Target {
    pub url: String, // "http://10.0.1.100:8080"

    #[serde(default = "get_default_weight")]
    pub weight: u32,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct HealthCheck {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "get_default_health_path")]
    pub path: String, // "/health"

    #[serde(default = "get_default_health_interval", with = "crate::duration")]
    pub interval: Duration,

    #[serde(default = "get_default_health_timeout", with = "crate::duration")]
    pub timeout: Duration,

    // consecutive probe successes required to recover
    #[serde(default = "get_default_healthy_threshold")]
    pub healthy_threshold: u32,

    // consecutive probe failures required to eject
    #[serde(default = "get_default_unhealthy_threshold")]
    pub unhealthy_threshold: u32,
}

impl Default for HealthCheck {
    fn default() -> Self {
        Self {
            enabled: false,
            path: get_default_health_path(),
            interval: get_default_health_interval(),
            timeout: get_default_health_timeout(),
            healthy_threshold: get_default_healthy_threshold(),
            unhealthy_threshold: get_default_unhealthy_threshold(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(deny_unknown_fields)]
pub struct Routing {
    #[serde(default)]
    pub rules: Vec<RouteRule>,

    #[serde(default)]
    pub default_backend: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct RouteRule {
    // exact or wildcard path pattern ("/api/*", "/api/*/details")
    #[serde(default)]
    pub path: Option<String>,

    #[serde(default)]
    pub path_prefix: Option<String>,

    #[serde(default)]
    pub host: Option<String>,

    #[serde(default)]
    pub methods: Vec<String>,

    #[serde(default)]
    pub headers: BTreeMap<String, String>,

    pub backend: String,

    // higher priority rules match first
    #[serde(default)]
    pub priority: i32,

    #[serde(default)]
    pub strip_prefix: bool,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct Telemetry {
    #[serde(default = "get_default_metrics")]
    pub metrics: Metrics,

    #[serde(default = "get_default_logging")]
    pub logging: Logging,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct Metrics {
    #[serde(default = "get_default_metrics_enabled")]
    pub enabled: bool,

    #[serde(default = "get_default_metrics_address")]
    pub address: String, // "0.0.0.0:9090"

    #[serde(default = "get_default_metrics_path")]
    pub path: String, // "/metrics"
}

#[derive(Debug, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct Logging {
    #[serde(default = "get_default_log_level")]
    pub level: String, // "trace", "debug", "info", "warn", "error", "off"
}
