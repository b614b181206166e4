use crate::error::ScrapeError;
use governor::clock::{Clock, DefaultClock};
use governor::state::keyed::DefaultKeyedStateStore;
use governor::{Quota, RateLimiter};
use rand::Rng;
use std::collections::HashMap;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, warn};

type EgressRateLimiter = RateLimiter<String, DefaultKeyedStateStore<String>, DefaultClock>;

/// Period used after a 429 that carried no usable Retry-After
const DEFAULT_THROTTLED_PERIOD: Duration = Duration::from_secs(6);

/// A bucket plus, for buckets tightened after a 429, when it lapses
struct EgressLimiter {
    limiter: Arc<EgressRateLimiter>,
    tightened_until: Option<Instant>,
}

/// Manages token buckets per egress (direct connection or a specific proxy)
pub struct RateLimitManager {
    egress_rate_limiters: Arc<Mutex<HashMap<String, EgressLimiter>>>,
    requests_per_minute: NonZeroU32,
}

impl RateLimitManager {
    pub fn new(requests_per_minute: u32) -> Self {
        Self {
            egress_rate_limiters: Arc::new(Mutex::new(HashMap::new())),
            requests_per_minute: NonZeroU32::new(requests_per_minute).unwrap_or(NonZeroU32::MIN),
        }
    }

    fn default_limiter(&self) -> EgressLimiter {
        EgressLimiter {
            limiter: Arc::new(RateLimiter::keyed(Quota::per_minute(
                self.requests_per_minute,
            ))),
            tightened_until: None,
        }
    }

    /// Get or create a rate limiter for an egress.
    ///
    /// A bucket tightened by [`Self::update_rate_limiter`] is replaced by a
    /// fresh per-minute bucket once its period has passed.
    pub async fn get_or_create_limiter(&self, egress: &str) -> Arc<EgressRateLimiter> {
        let mut limiters = self.egress_rate_limiters.lock().await;
        let entry = limiters
            .entry(egress.to_string())
            .or_insert_with(|| self.default_limiter());

        if entry
            .tightened_until
            .is_some_and(|until| until <= Instant::now())
        {
            debug!("Throttle window on {} expired, restoring default quota", egress);
            *entry = self.default_limiter();
        }
        entry.limiter.clone()
    }

    /// Take a cell for the egress, or report how long until one is available
    pub async fn check_rate_limit(&self, egress: &str) -> Result<(), Duration> {
        let limiter = self.get_or_create_limiter(egress).await;
        let key = egress.to_string();

        match limiter.check_key(&key) {
            Ok(_) => Ok(()),
            Err(not_until) => {
                let wait_time = not_until.wait_time_from(Clock::now(&DefaultClock::default()));
                debug!("Rate limited on egress {}: waiting {:?}", egress, wait_time);
                Err(wait_time)
            }
        }
    }

    /// Tighten the limiter of an egress after the upstream answered 429.
    ///
    /// The replacement allows one request per `retry_after` (or the default
    /// period), starts with its only cell already spent, and lapses back to
    /// the configured quota after one period.
    pub async fn update_rate_limiter(&self, egress: &str, retry_after_seconds: Option<u64>) {
        let period = retry_after_seconds
            .filter(|s| *s > 0)
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_THROTTLED_PERIOD);

        let Some(quota) = Quota::with_period(period) else {
            return;
        };
        let limiter = Arc::new(RateLimiter::keyed(quota));
        let _ = limiter.check_key(&egress.to_string());

        let mut limiters = self.egress_rate_limiters.lock().await;
        limiters.insert(
            egress.to_string(),
            EgressLimiter {
                limiter,
                tightened_until: Some(Instant::now() + period),
            },
        );

        warn!(
            "Updated rate limiter for {}: {}",
            egress,
            retry_after_seconds
                .map(|s| format!("{s}s"))
                .unwrap_or("default".to_string())
        );
    }
}

impl Default for RateLimitManager {
    fn default() -> Self {
        Self::new(30)
    }
}

/// Position of an outbound request inside one sync
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestSlot {
    /// Profile / user id resolution
    Lookup,
    /// The n-th media page fetch, zero based
    Item(usize),
}

/// Fixed delay schedule applied before outbound requests
#[derive(Debug, Clone, PartialEq)]
pub enum PacingPolicy {
    None,
    /// Uniformly random delay in `[min, max]` before every request
    Jittered { min: Duration, max: Duration },
    /// `base + index * step` before every item request, nothing before lookups
    LinearRamp { base: Duration, step: Duration },
}

impl PacingPolicy {
    pub fn delay_for(&self, slot: RequestSlot) -> Duration {
        match (self, slot) {
            (PacingPolicy::None, _) => Duration::ZERO,
            (PacingPolicy::Jittered { min, max }, _) => {
                if max <= min {
                    return *min;
                }
                let (lo, hi) = (min.as_millis() as u64, max.as_millis() as u64);
                Duration::from_millis(rand::rng().random_range(lo..=hi))
            }
            (PacingPolicy::LinearRamp { .. }, RequestSlot::Lookup) => Duration::ZERO,
            (PacingPolicy::LinearRamp { base, step }, RequestSlot::Item(index)) => {
                *base + step.saturating_mul(index as u32)
            }
        }
    }
}

/// Pacing plus token bucket, consulted before each outbound request
pub struct RequestThrottle {
    manager: Arc<RateLimitManager>,
    pacing: PacingPolicy,
    max_wait: Duration,
}

impl RequestThrottle {
    pub fn new(manager: Arc<RateLimitManager>, pacing: PacingPolicy, max_wait: Duration) -> Self {
        Self {
            manager,
            pacing,
            max_wait,
        }
    }

    /// No pacing, generous bucket
    pub fn unpaced() -> Self {
        Self::new(
            Arc::new(RateLimitManager::new(600)),
            PacingPolicy::None,
            Duration::ZERO,
        )
    }

    pub fn pacing(&self) -> &PacingPolicy {
        &self.pacing
    }

    pub fn manager(&self) -> &Arc<RateLimitManager> {
        &self.manager
    }

    /// Wait until a request on `egress` may go out.
    ///
    /// Fails with [`ScrapeError::Throttled`] once waiting for the bucket would
    /// exceed the configured budget.
    pub async fn acquire(&self, egress: &str, slot: RequestSlot) -> Result<(), ScrapeError> {
        let delay = self.pacing.delay_for(slot);
        if !delay.is_zero() {
            debug!("Pacing {:?} on {} for {:?}", slot, egress, delay);
            tokio::time::sleep(delay).await;
        }

        let mut waited = Duration::ZERO;
        loop {
            match self
                .manager
                .check_rate_limit(egress)
                .await
                .map_err(|wait| wait.max(Duration::from_millis(1)))
            {
                Ok(()) => return Ok(()),
                Err(wait) if waited + wait <= self.max_wait => {
                    tokio::time::sleep(wait).await;
                    waited += wait;
                }
                Err(wait) => {
                    return Err(ScrapeError::Throttled {
                        retry_after: Some(wait),
                    })
                }
            }
        }
    }

    pub async fn record_throttled(&self, egress: &str, retry_after_seconds: Option<u64>) {
        self.manager
            .update_rate_limiter(egress, retry_after_seconds)
            .await;
    }
}
