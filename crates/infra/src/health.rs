//! Cached health probe.
//!
//! Health endpoints get hit far more often than the underlying storage should
//! be probed, so one sampled result is served for a TTL before the probe runs
//! again.

use std::sync::RwLock;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::warn;

/// One health probe result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthSample {
    pub healthy: bool,
    pub detail: String,
    pub checked_at: DateTime<Utc>,
}

struct Slot {
    sample: HealthSample,
    sampled_at: Instant,
}

/// TTL cache around an expensive health probe.
pub struct HealthCache {
    ttl: Duration,
    slot: RwLock<Option<Slot>>,
}

impl HealthCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            slot: RwLock::new(None),
        }
    }

    /// Return the cached sample if fresh, otherwise run `probe` and cache it.
    ///
    /// `Ok` details describe the healthy state, `Err` details the failure;
    /// failures are cached too so a down backend is not probed on every call.
    pub fn sample<F>(&self, probe: F) -> HealthSample
    where
        F: FnOnce() -> Result<String, String>,
    {
        if let Ok(guard) = self.slot.read() {
            if let Some(slot) = guard.as_ref() {
                if slot.sampled_at.elapsed() < self.ttl {
                    return slot.sample.clone();
                }
            }
        }

        let sample = match probe() {
            Ok(detail) => HealthSample {
                healthy: true,
                detail,
                checked_at: Utc::now(),
            },
            Err(detail) => {
                warn!(%detail, "health probe failed");
                HealthSample {
                    healthy: false,
                    detail,
                    checked_at: Utc::now(),
                }
            }
        };

        match self.slot.write() {
            Ok(mut guard) => {
                *guard = Some(Slot {
                    sample: sample.clone(),
                    sampled_at: Instant::now(),
                });
            }
            Err(_) => warn!("health cache lock poisoned; serving uncached sample"),
        }
        sample
    }

    /// Drop the cached sample so the next call probes immediately.
    pub fn reset(&self) {
        if let Ok(mut guard) = self.slot.write() {
            *guard = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn fresh_sample_is_served_from_cache() {
        let cache = HealthCache::new(Duration::from_secs(60));
        let probes = AtomicUsize::new(0);

        let probe = || {
            probes.fetch_add(1, Ordering::SeqCst);
            Ok("queue reachable".to_string())
        };

        let first = cache.sample(probe);
        let second = cache.sample(|| {
            probes.fetch_add(1, Ordering::SeqCst);
            Ok("queue reachable".to_string())
        });

        assert!(first.healthy);
        assert_eq!(first, second);
        assert_eq!(probes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn failures_are_cached_like_successes() {
        let cache = HealthCache::new(Duration::from_secs(60));

        let sample = cache.sample(|| Err("connection refused".to_string()));
        assert!(!sample.healthy);

        // A healthy probe is not consulted while the failed sample is fresh.
        let cached = cache.sample(|| Ok("up".to_string()));
        assert!(!cached.healthy);
        assert_eq!(cached.detail, "connection refused");
    }

    #[test]
    fn expired_ttl_and_reset_force_a_new_probe() {
        let cache = HealthCache::new(Duration::ZERO);
        cache.sample(|| Err("down".to_string()));
        let resampled = cache.sample(|| Ok("up".to_string()));
        assert!(resampled.healthy);

        let cache = HealthCache::new(Duration::from_secs(60));
        cache.sample(|| Err("down".to_string()));
        cache.reset();
        let resampled = cache.sample(|| Ok("up".to_string()));
        assert!(resampled.healthy);
    }
}
