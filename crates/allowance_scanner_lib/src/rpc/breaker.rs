use crate::setup::EndpointSetup;
use serde::Serialize;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// Longest ban is this many times the base ban.
pub const MAX_BAN_MULTIPLIER: u32 = 4;

#[derive(Debug)]
struct EndpointHealth {
    url: String,
    weight: u32,
    banned_until: Option<Instant>,
    /// Duration of the most recent ban; cleared by a success.
    last_ban: Option<Duration>,
    failures: u64,
    successes: u64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EndpointStatus {
    pub url: String,
    pub weight: u32,
    pub banned_for_ms: Option<u128>,
    pub failures: u64,
    pub successes: u64,
}

/// Per-endpoint ban state shared by every request made for one chain.
#[derive(Debug)]
pub struct CircuitBreaker {
    base: Duration,
    endpoints: Mutex<Vec<EndpointHealth>>,
}

impl CircuitBreaker {
    pub fn new(endpoints: &[EndpointSetup], base: Duration) -> Self {
        CircuitBreaker {
            base,
            endpoints: Mutex::new(
                endpoints
                    .iter()
                    .map(|e| EndpointHealth {
                        url: e.url.clone(),
                        weight: e.weight,
                        banned_until: None,
                        last_ban: None,
                        failures: 0,
                        successes: 0,
                    })
                    .collect(),
            ),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<EndpointHealth>> {
        self.endpoints.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn max_ban(&self) -> Duration {
        self.base.saturating_mul(MAX_BAN_MULTIPLIER)
    }

    pub fn is_banned_at(&self, idx: usize, now: Instant) -> bool {
        self.lock()
            .get(idx)
            .and_then(|e| e.banned_until)
            .map(|until| until > now)
            .unwrap_or(false)
    }

    pub fn is_banned(&self, idx: usize) -> bool {
        self.is_banned_at(idx, Instant::now())
    }

    pub fn ban_remaining_at(&self, idx: usize, now: Instant) -> Option<Duration> {
        self.lock()
            .get(idx)
            .and_then(|e| e.banned_until)
            .filter(|until| *until > now)
            .map(|until| until - now)
    }

    pub fn ban_remaining(&self, idx: usize) -> Option<Duration> {
        self.ban_remaining_at(idx, Instant::now())
    }

    /// Endpoints eligible for a request, heaviest first. Banned endpoints
    /// are left out entirely.
    pub fn attempt_order_at(&self, now: Instant) -> Vec<usize> {
        let endpoints = self.lock();
        let mut order: Vec<usize> = (0..endpoints.len())
            .filter(|idx| {
                endpoints[*idx]
                    .banned_until
                    .map(|until| until <= now)
                    .unwrap_or(true)
            })
            .collect();
        order.sort_by(|a, b| endpoints[*b].weight.cmp(&endpoints[*a].weight));
        order
    }

    pub fn attempt_order(&self) -> Vec<usize> {
        self.attempt_order_at(Instant::now())
    }

    pub fn all_banned_at(&self, now: Instant) -> bool {
        self.attempt_order_at(now).is_empty()
    }

    pub fn all_banned(&self) -> bool {
        self.all_banned_at(Instant::now())
    }

    /// Bans the endpoint and returns the ban length. The first failure bans
    /// for the base duration; failures without a success in between double
    /// the previous ban up to [`MAX_BAN_MULTIPLIER`] times the base.
    pub fn record_failure_at(&self, idx: usize, now: Instant) -> Duration {
        let base = self.base;
        let max_ban = self.max_ban();
        let mut endpoints = self.lock();
        let Some(endpoint) = endpoints.get_mut(idx) else {
            return Duration::ZERO;
        };
        let next_ban = match endpoint.last_ban {
            Some(last) => last.saturating_mul(2).min(max_ban),
            None => base,
        };
        endpoint.banned_until = Some(now + next_ban);
        endpoint.last_ban = Some(next_ban);
        endpoint.failures += 1;
        log::warn!(
            "Rpc endpoint {} banned for {} ms",
            endpoint.url,
            next_ban.as_millis()
        );
        next_ban
    }

    pub fn record_failure(&self, idx: usize) -> Duration {
        self.record_failure_at(idx, Instant::now())
    }

    pub fn record_success(&self, idx: usize) {
        let mut endpoints = self.lock();
        if let Some(endpoint) = endpoints.get_mut(idx) {
            if endpoint.last_ban.is_some() {
                log::info!("Rpc endpoint {} recovered, ban cleared", endpoint.url);
            }
            endpoint.banned_until = None;
            endpoint.last_ban = None;
            endpoint.successes += 1;
        }
    }

    pub fn url(&self, idx: usize) -> Option<String> {
        self.lock().get(idx).map(|e| e.url.clone())
    }

    pub fn status_at(&self, now: Instant) -> Vec<EndpointStatus> {
        self.lock()
            .iter()
            .map(|e| EndpointStatus {
                url: e.url.clone(),
                weight: e.weight,
                banned_for_ms: e
                    .banned_until
                    .filter(|until| *until > now)
                    .map(|until| (until - now).as_millis()),
                failures: e.failures,
                successes: e.successes,
            })
            .collect()
    }

    pub fn status(&self) -> Vec<EndpointStatus> {
        self.status_at(Instant::now())
    }
}
