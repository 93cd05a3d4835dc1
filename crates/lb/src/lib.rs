use std::collections::HashMap;
use std::ops::Deref;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use http::Uri;
use log::info;
use rand::Rng;

use wisp_config::config;
use wisp_health::HealthState;
use wisp_transport::UpstreamClient;

/// One upstream origin, owned by exactly one group.
#[derive(Debug)]
pub struct Backend {
    name: String,
    url: Uri,
    authority: String,
    weight: u32,
    in_flight: AtomicI64,
    health: Arc<HealthState>,
    client: UpstreamClient,
}

impl Backend {
    fn new(group_name: &str, target: &config::Target, health: &config::HealthCheck) -> Result<Self, String> {
        let url: Uri = target
            .url
            .parse()
            .map_err(|e| format!("invalid backend URL {}: {}", target.url, e))?;

        if url.scheme_str() != Some("http") {
            return Err(format!(
                "backend URL {} must use the http scheme",
                target.url
            ));
        }

        let authority = url
            .authority()
            .ok_or_else(|| format!("backend URL {} has no host", target.url))?
            .to_string();

        Ok(Self {
            name: format!("{}-{}", group_name, target.url),
            url,
            authority,
            weight: target.weight,
            in_flight: AtomicI64::new(0),
            health: Arc::new(HealthState::new(
                health.healthy_threshold,
                health.unhealthy_threshold,
            )),
            client: UpstreamClient::default(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn url(&self) -> &Uri {
        &self.url
    }

    /// `host:port` of the origin, used as the upstream `Host` header.
    pub fn authority(&self) -> &str {
        &self.authority
    }

    pub fn weight(&self) -> u32 {
        self.weight
    }

    pub fn is_healthy(&self) -> bool {
        self.health.is_healthy()
    }

    pub fn health(&self) -> &HealthState {
        &self.health
    }

    pub fn health_state(&self) -> Arc<HealthState> {
        self.health.clone()
    }

    pub fn in_flight(&self) -> i64 {
        self.in_flight.load(Ordering::Acquire)
    }

    pub fn client(&self) -> &UpstreamClient {
        &self.client
    }
}

/// Pick result; holds the in-flight slot until dropped, so every completion
/// path (success or error) pairs the increment with a decrement.
pub struct PickedBackend {
    backend: Arc<Backend>,
}

impl PickedBackend {
    fn new(backend: Arc<Backend>) -> Self {
        backend.in_flight.fetch_add(1, Ordering::AcqRel);
        Self { backend }
    }

    pub fn backend(&self) -> &Arc<Backend> {
        &self.backend
    }
}

impl Deref for PickedBackend {
    type Target = Backend;

    fn deref(&self) -> &Backend {
        &self.backend
    }
}

impl Drop for PickedBackend {
    fn drop(&mut self) {
        self.backend.in_flight.fetch_sub(1, Ordering::AcqRel);
    }
}

#[derive(Debug)]
pub enum Strategy {
    RoundRobin,
    LeastConnections,
    Weighted,
}

impl Strategy {
    pub fn from_config(value: &str) -> Result<Self, String> {
        match value.trim().to_lowercase().as_str() {
            "round_robin" => Ok(Self::RoundRobin),
            "least_connections" => Ok(Self::LeastConnections),
            "weighted" => Ok(Self::Weighted),
            _ => Err(format!("unsupported load balancing strategy: {value}")),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Strategy::RoundRobin => "round_robin",
            Strategy::LeastConnections => "least_connections",
            Strategy::Weighted => "weighted",
        }
    }
}

/// A named set of backends sharing a strategy and a request deadline.
#[derive(Debug)]
pub struct BackendGroup {
    name: String,
    backends: Vec<Arc<Backend>>,
    strategy: Strategy,
    cursor: AtomicU64,
    timeout: Duration,
}

impl BackendGroup {
    pub fn from_config(cfg: &config::BackendGroup) -> Result<Self, String> {
        let strategy = Strategy::from_config(&cfg.strategy)?;

        let mut backends = Vec::with_capacity(cfg.targets.len());
        for target in &cfg.targets {
            backends.push(Arc::new(Backend::new(&cfg.name, target, &cfg.health_check)?));
        }

        if backends.is_empty() {
            return Err(format!("backend group '{}' has no targets", cfg.name));
        }

        Ok(Self {
            name: cfg.name.clone(),
            backends,
            strategy,
            cursor: AtomicU64::new(0),
            timeout: cfg.timeout,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn backends(&self) -> &[Arc<Backend>] {
        &self.backends
    }

    pub fn strategy(&self) -> &Strategy {
        &self.strategy
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Selects a healthy backend under the group's strategy, or `None` when
    /// the healthy set is empty. Safe for concurrent callers.
    pub fn pick(&self) -> Option<PickedBackend> {
        let healthy: Vec<&Arc<Backend>> =
            self.backends.iter().filter(|b| b.is_healthy()).collect();

        if healthy.is_empty() {
            return None;
        }

        let chosen = match self.strategy {
            Strategy::RoundRobin => self.pick_round_robin(&healthy),
            Strategy::LeastConnections => pick_least_connections(&healthy),
            Strategy::Weighted => self.pick_weighted(&healthy),
        };

        Some(PickedBackend::new(chosen))
    }

    fn pick_round_robin(&self, healthy: &[&Arc<Backend>]) -> Arc<Backend> {
        let cursor = self.cursor.fetch_add(1, Ordering::Relaxed);
        healthy[(cursor % healthy.len() as u64) as usize].clone()
    }

    fn pick_weighted(&self, healthy: &[&Arc<Backend>]) -> Arc<Backend> {
        let total: u64 = healthy.iter().map(|b| b.weight() as u64).sum();
        if total == 0 {
            return self.pick_round_robin(healthy);
        }

        let mut draw = rand::thread_rng().gen_range(0..total);
        for backend in healthy {
            let weight = backend.weight() as u64;
            if draw < weight {
                return (*backend).clone();
            }
            draw -= weight;
        }

        healthy[healthy.len() - 1].clone()
    }
}

// Ties break toward the lowest index in the group's declared order.
fn pick_least_connections(healthy: &[&Arc<Backend>]) -> Arc<Backend> {
    let mut selected = healthy[0];
    let mut min_in_flight = selected.in_flight();

    for backend in &healthy[1..] {
        let in_flight = backend.in_flight();
        if in_flight < min_in_flight {
            min_in_flight = in_flight;
            selected = *backend;
        }
    }

    selected.clone()
}

/// All groups, indexed by name. Built eagerly at startup.
pub struct BackendSet {
    groups: HashMap<String, Arc<BackendGroup>>,
}

impl BackendSet {
    pub fn from_config(group_configs: &[config::BackendGroup]) -> Result<Self, String> {
        let mut groups = HashMap::with_capacity(group_configs.len());
        for group_cfg in group_configs {
            let group = BackendGroup::from_config(group_cfg)?;
            info!(
                "Backend group '{}' initialized: {} targets, strategy {}",
                group.name(),
                group.backends().len(),
                group.strategy().name()
            );
            groups.insert(group_cfg.name.clone(), Arc::new(group));
        }

        Ok(Self { groups })
    }

    pub fn group(&self, name: &str) -> Option<&Arc<BackendGroup>> {
        self.groups.get(name)
    }

    pub fn groups(&self) -> impl Iterator<Item = &Arc<BackendGroup>> {
        self.groups.values()
    }

    pub fn backends(&self) -> impl Iterator<Item = &Arc<Backend>> {
        self.groups.values().flat_map(|g| g.backends().iter())
    }

    /// `(healthy, total)` across all groups, for the proxy's own `/health`.
    pub fn health_summary(&self) -> (usize, usize) {
        let mut healthy = 0;
        let mut total = 0;
        for backend in self.backends() {
            total += 1;
            if backend.is_healthy() {
                healthy += 1;
            }
        }
        (healthy, total)
    }
}
