//! Fixed-window request limiter keyed by client IP and user id
//!
//! Each counter is created at 1 on its first request and deleted when its
//! window elapses, so the next request starts a fresh window. A denied
//! request increments nothing.

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, info};

/// Default requests per window for one IP
pub const DEFAULT_IP_LIMIT: u32 = 10;

/// Default requests per window for one user id
pub const DEFAULT_USER_LIMIT: u32 = 5;

/// Default window length
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
pub struct RateLimiterConfig {
    pub ip_limit: u32,
    pub user_limit: u32,
    pub window: Duration,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            ip_limit: DEFAULT_IP_LIMIT,
            user_limit: DEFAULT_USER_LIMIT,
            window: DEFAULT_WINDOW,
        }
    }
}

/// Current counts for the identities of a request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RateCounts {
    pub ip: u32,
    #[serde(rename = "id")]
    pub user: u32,
}

/// Outcome of [`RateLimiter::check`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    Allow(RateCounts),
    Deny(RateCounts),
}

impl RateDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, RateDecision::Allow(_))
    }

    pub fn counts(&self) -> RateCounts {
        match self {
            RateDecision::Allow(counts) | RateDecision::Deny(counts) => *counts,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Scope {
    Ip,
    User,
}

#[derive(Debug)]
struct Counter {
    count: u32,
    generation: u64,
}

#[derive(Debug, Default)]
struct Counters {
    counters: HashMap<(Scope, String), Counter>,
    next_generation: u64,
}

impl Counters {
    fn count(&self, scope: Scope, identity: &str) -> u32 {
        self.counters
            .get(&(scope, identity.to_string()))
            .map_or(0, |counter| counter.count)
    }
}

/// Per-IP and per-user fixed-window limiter
#[derive(Debug)]
pub struct RateLimiter {
    counters: Arc<Mutex<Counters>>,
    config: RateLimiterConfig,
}

impl RateLimiter {
    pub fn new(config: RateLimiterConfig) -> Self {
        Self {
            counters: Arc::new(Mutex::new(Counters::default())),
            config,
        }
    }

    pub fn config(&self) -> &RateLimiterConfig {
        &self.config
    }

    /// Admit or reject one request from `ip` on behalf of `user`
    ///
    /// Both counters must be below their limit for the request to pass;
    /// only then are both incremented.
    pub fn check(&self, ip: &str, user: &str) -> RateDecision {
        let mut counters = self.counters.lock();

        let current = RateCounts {
            ip: counters.count(Scope::Ip, ip),
            user: counters.count(Scope::User, user),
        };

        if current.ip >= self.config.ip_limit || current.user >= self.config.user_limit {
            info!(
                "[RateLimiter] Denied ip={} ({}) user={} ({})",
                ip, current.ip, user, current.user
            );
            return RateDecision::Deny(current);
        }

        let counts = RateCounts {
            ip: self.increment(&mut counters, Scope::Ip, ip),
            user: self.increment(&mut counters, Scope::User, user),
        };
        RateDecision::Allow(counts)
    }

    /// Current counts without touching them
    pub fn peek(&self, ip: &str, user: &str) -> RateCounts {
        let counters = self.counters.lock();
        RateCounts {
            ip: counters.count(Scope::Ip, ip),
            user: counters.count(Scope::User, user),
        }
    }

    fn increment(&self, counters: &mut Counters, scope: Scope, identity: &str) -> u32 {
        let key = (scope, identity.to_string());
        if let Some(counter) = counters.counters.get_mut(&key) {
            counter.count += 1;
            return counter.count;
        }

        let generation = counters.next_generation;
        counters.next_generation += 1;
        counters.counters.insert(key.clone(), Counter { count: 1, generation });
        debug!("[RateLimiter] Window opened for {:?} {}", scope, identity);

        self.schedule_reset(key, generation);
        1
    }

    fn schedule_reset(&self, key: (Scope, String), generation: u64) {
        let counters: Weak<Mutex<Counters>> = Arc::downgrade(&self.counters);
        let window = self.config.window;

        tokio::spawn(async move {
            tokio::time::sleep(window).await;
            let Some(counters) = counters.upgrade() else {
                return;
            };
            let mut counters = counters.lock();
            if counters
                .counters
                .get(&key)
                .is_some_and(|counter| counter.generation == generation)
            {
                counters.counters.remove(&key);
                debug!("[RateLimiter] Window reset for {:?} {}", key.0, key.1);
            }
        });
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(RateLimiterConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_user_limit() {
        let limiter = RateLimiter::default();

        for n in 1..=5 {
            assert_eq!(
                limiter.check("1.1.1.1", "42"),
                RateDecision::Allow(RateCounts { ip: n, user: n })
            );
        }
        assert_eq!(
            limiter.check("1.1.1.1", "42"),
            RateDecision::Deny(RateCounts { ip: 5, user: 5 })
        );

        // Another user from the same IP still passes
        assert!(limiter.check("1.1.1.1", "7").is_allowed());
    }

    #[tokio::test]
    async fn test_ip_limit_across_users() {
        let limiter = RateLimiter::default();

        for n in 0..10 {
            assert!(limiter.check("1.1.1.1", &format!("user-{}", n)).is_allowed());
        }
        let decision = limiter.check("1.1.1.1", "fresh");
        assert!(!decision.is_allowed());
        assert_eq!(decision.counts(), RateCounts { ip: 10, user: 0 });
    }

    #[tokio::test]
    async fn test_deny_does_not_increment() {
        let limiter = RateLimiter::new(RateLimiterConfig {
            ip_limit: 1,
            user_limit: 10,
            window: DEFAULT_WINDOW,
        });

        assert!(limiter.check("ip", "u").is_allowed());
        for _ in 0..3 {
            assert!(!limiter.check("ip", "u").is_allowed());
        }
        assert_eq!(limiter.peek("ip", "u"), RateCounts { ip: 1, user: 1 });
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_reset_deletes_counter() {
        let limiter = RateLimiter::default();
        for _ in 0..5 {
            limiter.check("ip", "u");
        }
        assert!(!limiter.check("ip", "u").is_allowed());

        tokio::time::sleep(DEFAULT_WINDOW + Duration::from_secs(1)).await;

        assert_eq!(limiter.peek("ip", "u"), RateCounts { ip: 0, user: 0 });
        assert_eq!(
            limiter.check("ip", "u"),
            RateDecision::Allow(RateCounts { ip: 1, user: 1 })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_measured_from_first_request() {
        let limiter = RateLimiter::default();
        limiter.check("ip", "u");

        tokio::time::sleep(Duration::from_secs(50)).await;
        limiter.check("ip", "u");

        // 61s after the first request the whole counter is gone
        tokio::time::sleep(Duration::from_secs(11)).await;
        assert_eq!(limiter.peek("ip", "u"), RateCounts { ip: 0, user: 0 });
    }
}
