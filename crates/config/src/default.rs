use std::time::Duration;

use crate::config::{Logging, Metrics, Quic, Routing, Telemetry};

// default values
pub fn get_default_address() -> String {
    String::from("0.0.0.0:4433")
}

pub fn get_default_max_streams() -> u32 {
    1000
}

pub fn get_default_idle_timeout() -> Duration {
    Duration::from_secs(30)
}

pub fn get_default_keep_alive() -> Duration {
    Duration::from_secs(15)
}

pub fn get_default_congestion() -> String {
    String::from("cubic")
}

pub fn get_default_strategy() -> String {
    String::from("round_robin")
}

pub fn get_default_group_timeout() -> Duration {
    Duration::from_secs(10)
}

pub fn get_default_retry_count() -> u32 {
    3
}

pub fn get_default_weight() -> u32 {
    1
}

pub fn get_default_health_path() -> String {
    String::from("/health")
}

pub fn get_default_health_interval() -> Duration {
    Duration::from_secs(30)
}

pub fn get_default_health_timeout() -> Duration {
    Duration::from_secs(5)
}

pub fn get_default_healthy_threshold() -> u32 {
    2
}

pub fn get_default_unhealthy_threshold() -> u32 {
    3
}

pub fn get_default_log_level() -> String {
    String::from("info")
}

pub fn get_default_metrics_enabled() -> bool {
    true
}

pub fn get_default_metrics_address() -> String {
    String::from("0.0.0.0:9090")
}

pub fn get_default_metrics_path() -> String {
    String::from("/metrics")
}

pub fn get_default_quic() -> Quic {
    Quic {
        max_streams: get_default_max_streams(),
        idle_timeout: get_default_idle_timeout(),
        keep_alive: get_default_keep_alive(),
        enable_0rtt: false,
        congestion_algorithm: get_default_congestion(),
    }
}

pub fn get_default_routing() -> Routing {
    Routing::default()
}

pub fn get_default_metrics() -> Metrics {
    Metrics {
        enabled: get_default_metrics_enabled(),
        address: get_default_metrics_address(),
        path: get_default_metrics_path(),
    }
}

pub fn get_default_logging() -> Logging {
    Logging {
        level: get_default_log_level(),
    }
}

pub fn get_default_telemetry() -> Telemetry {
    Telemetry {
        metrics: get_default_metrics(),
        logging: get_default_logging(),
    }
}
