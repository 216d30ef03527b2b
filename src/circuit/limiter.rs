use dashmap::DashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::timeout;
use tracing::{debug, warn};

use super::backoff::JitterPolicy;
use crate::config::{ExhaustedPolicy, LimiterConfig};
use crate::metrics::metrics;

/// Configuration for one limiter
#[derive(Debug, Clone)]
pub struct LimitConfig {
    /// Permits per resource
    pub max_concurrent: usize,
    /// Time one acquire attempt may wait for a permit
    pub acquire_timeout: Duration,
    pub policy: ExhaustedPolicy,
    /// Attempts after the first one under `ExhaustedPolicy::Backoff`
    pub max_retries: u32,
    /// Pause between attempts
    pub backoff: JitterPolicy,
    pub enabled: bool,
}

impl Default for LimitConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 100,
            acquire_timeout: Duration::from_secs(1),
            policy: ExhaustedPolicy::Backoff,
            max_retries: 3,
            backoff: JitterPolicy::from_millis(500, 3000),
            enabled: true,
        }
    }
}

impl From<&LimiterConfig> for LimitConfig {
    fn from(config: &LimiterConfig) -> Self {
        Self {
            max_concurrent: config.max_concurrent,
            acquire_timeout: Duration::from_millis(config.acquire_timeout_ms),
            policy: config.policy,
            max_retries: config.max_retries,
            backoff: JitterPolicy::from_millis(config.backoff_min_ms, config.backoff_max_ms),
            enabled: config.enabled,
        }
    }
}

/// RAII permit that releases the slot when dropped
pub struct LimitPermit {
    _permit: OwnedSemaphorePermit,
    resource: String,
}

impl LimitPermit {
    /// Resource this permit belongs to
    pub fn resource(&self) -> &str {
        &self.resource
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LimitError {
    #[error("No permit available for {resource}")]
    Exhausted { resource: String },

    #[error("No permit for {resource} after {attempts} attempts")]
    RetriesExhausted { resource: String, attempts: u32 },

    #[error("Limiter is disabled")]
    Disabled,
}

#[derive(Default)]
struct LimiterCounters {
    acquired: AtomicUsize,
    rejected: AtomicUsize,
    backoffs: AtomicUsize,
}

/// Bounded-permit limiter for probes and other local operations
///
/// Each named resource gets its own semaphore. Exhaustion never spins:
/// callers either fail at once or sleep a jittered delay between attempts.
pub struct ProbeLimiter {
    pools: DashMap<String, Arc<Semaphore>>,
    config: LimitConfig,
    counters: LimiterCounters,
}

impl ProbeLimiter {
    pub fn new(config: LimitConfig) -> Self {
        Self {
            pools: DashMap::new(),
            config,
            counters: LimiterCounters::default(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    fn pool(&self, resource: &str) -> Arc<Semaphore> {
        self.pools
            .entry(resource.to_string())
            .or_insert_with(|| Arc::new(Semaphore::new(self.config.max_concurrent)))
            .clone()
    }

    /// Acquire a permit for `resource`, honoring the exhaustion policy
    pub async fn acquire(&self, resource: &str) -> Result<LimitPermit, LimitError> {
        if !self.config.enabled {
            return Err(LimitError::Disabled);
        }
        let semaphore = self.pool(resource);

        if self.config.policy == ExhaustedPolicy::FailFast {
            return match semaphore.try_acquire_owned() {
                Ok(permit) => Ok(self.granted(permit, resource)),
                Err(_) => {
                    self.reject(resource);
                    Err(LimitError::Exhausted {
                        resource: resource.to_string(),
                    })
                }
            };
        }

        let attempts = self.config.max_retries + 1;
        for attempt in 1..=attempts {
            match timeout(self.config.acquire_timeout, semaphore.clone().acquire_owned()).await {
                Ok(Ok(permit)) => return Ok(self.granted(permit, resource)),
                Ok(Err(_)) => break,
                Err(_) if attempt < attempts => {
                    self.counters.backoffs.fetch_add(1, Ordering::Relaxed);
                    debug!(resource = %resource, attempt, "Limiter exhausted, backing off");
                    self.config.backoff.sleep().await;
                }
                Err(_) => {}
            }
        }

        self.reject(resource);
        Err(LimitError::RetriesExhausted {
            resource: resource.to_string(),
            attempts,
        })
    }

    fn granted(&self, permit: OwnedSemaphorePermit, resource: &str) -> LimitPermit {
        self.counters.acquired.fetch_add(1, Ordering::Relaxed);
        LimitPermit {
            _permit: permit,
            resource: resource.to_string(),
        }
    }

    fn reject(&self, resource: &str) {
        self.counters.rejected.fetch_add(1, Ordering::Relaxed);
        metrics().record_limiter_rejected(resource);
        warn!(
            resource = %resource,
            max_concurrent = self.config.max_concurrent,
            "Limiter rejected acquire"
        );
    }

    /// Free permits for a resource
    pub fn available(&self, resource: &str) -> usize {
        self.pools
            .get(resource)
            .map(|s| s.available_permits())
            .unwrap_or(self.config.max_concurrent)
    }

    pub fn stats(&self) -> LimitStats {
        LimitStats {
            total_acquired: self.counters.acquired.load(Ordering::Relaxed),
            total_rejected: self.counters.rejected.load(Ordering::Relaxed),
            total_backoffs: self.counters.backoffs.load(Ordering::Relaxed),
            resources: self.pools.len(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LimitStats {
    pub total_acquired: usize,
    pub total_rejected: usize,
    pub total_backoffs: usize,
    pub resources: usize,
}
