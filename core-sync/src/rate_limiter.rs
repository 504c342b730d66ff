//! # Adaptive Rate Limiter
//!
//! Self-tuning token bucket shared by every outbound call of a sync.
//!
//! ## Overview
//!
//! The remote rate limit is only discovered empirically, so the limiter keeps
//! a target `requests_per_minute` that moves with feedback:
//!
//! - `record_success` nudges the rate up (×`speedup_factor`) after a streak of
//!   `success_threshold` successes, never above the configured rate
//! - `record_error(true)` (429) halves the rate immediately
//! - `record_error(false)` lowers it mildly after `error_threshold`
//!   consecutive server errors
//!
//! A grant is only issued when all of these hold:
//!
//! - a whole token is available (refilled at `rpm / 60` per second, capped at
//!   `burst_size`)
//! - `min_interval` has passed since the previous grant
//! - fewer than `rpm` grants happened in the trailing 60 seconds
//! - no 429 block is in effect
//!
//! ## State Machine
//!
//! ```text
//! Normal ──429──→ Throttled ──success──→ Recovering ──rate restored──→ Normal
//!                     ↑                       │
//!                     └──────────429──────────┘
//! ```

use core_runtime::config::RateLimitConfig;
use core_runtime::events::{CoreEvent, EventBus, RateLimitEvent};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

const WINDOW: Duration = Duration::from_secs(60);
const TOKEN_EPSILON: f64 = 1e-9;

/// Adaptive phase of the limiter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LimiterPhase {
    Normal,
    /// A 429 lowered the rate; no success since
    Throttled,
    /// Successes are raising the rate back toward the configured ceiling
    Recovering,
}

/// Snapshot of limiter counters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateLimiterStats {
    pub total_requests: u64,
    /// Grants that had to wait
    pub total_waits: u64,
    pub total_wait_time: Duration,
    pub rate_limit_hits: u64,
    pub requests_per_minute: f64,
    pub tokens: f64,
    pub phase: LimiterPhase,
}

struct LimiterState {
    tokens: f64,
    requests_per_minute: f64,
    last_refill: Instant,
    last_grant: Option<Instant>,
    blocked_until: Option<Instant>,
    grants: VecDeque<Instant>,
    phase: LimiterPhase,
    consecutive_successes: u32,
    consecutive_errors: u32,
    total_requests: u64,
    total_waits: u64,
    total_wait_time: Duration,
    rate_limit_hits: u64,
}

impl LimiterState {
    fn refill(&mut self, now: Instant, max_tokens: f64) {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.requests_per_minute / 60.0).min(max_tokens);
        self.last_refill = now;
    }

    fn prune(&mut self, now: Instant) {
        while let Some(oldest) = self.grants.front() {
            if now.saturating_duration_since(*oldest) >= WINDOW {
                self.grants.pop_front();
            } else {
                break;
            }
        }
    }

    fn window_capacity(&self) -> usize {
        (self.requests_per_minute.floor() as usize).max(1)
    }

    /// Time until every grant condition holds; zero if they hold now
    fn required_wait(&self, now: Instant, min_interval: Duration) -> Duration {
        let mut wait = Duration::ZERO;

        if let Some(until) = self.blocked_until {
            wait = wait.max(until.saturating_duration_since(now));
        }

        if let Some(last) = self.last_grant {
            wait = wait.max((last + min_interval).saturating_duration_since(now));
        }

        if self.tokens + TOKEN_EPSILON < 1.0 {
            let per_second = self.requests_per_minute / 60.0;
            let secs = (1.0 - self.tokens) / per_second;
            wait = wait.max(Duration::from_secs_f64(secs.max(0.0)));
        }

        if self.grants.len() >= self.window_capacity() {
            if let Some(oldest) = self.grants.front() {
                wait = wait.max((*oldest + WINDOW).saturating_duration_since(now));
            }
        }

        wait
    }
}

/// Self-tuning token bucket
pub struct AdaptiveRateLimiter {
    config: RateLimitConfig,
    state: Mutex<LimiterState>,
    event_bus: Option<Arc<EventBus>>,
}

impl AdaptiveRateLimiter {
    /// Create a limiter with a full bucket
    ///
    /// # Errors
    ///
    /// Returns a config error if `config` does not validate
    pub fn new(config: RateLimitConfig) -> core_runtime::Result<Self> {
        config.validate()?;

        let max_tokens = config.burst_size as f64;
        let state = LimiterState {
            tokens: max_tokens,
            requests_per_minute: config.requests_per_minute,
            last_refill: Instant::now(),
            last_grant: None,
            blocked_until: None,
            grants: VecDeque::new(),
            phase: LimiterPhase::Normal,
            consecutive_successes: 0,
            consecutive_errors: 0,
            total_requests: 0,
            total_waits: 0,
            total_wait_time: Duration::ZERO,
            rate_limit_hits: 0,
        };

        Ok(Self {
            config,
            state: Mutex::new(state),
            event_bus: None,
        })
    }

    /// Emit throttling events on `event_bus`
    pub fn with_event_bus(mut self, event_bus: Arc<EventBus>) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    fn max_tokens(&self) -> f64 {
        self.config.burst_size as f64
    }

    /// Take one token
    ///
    /// With `wait = false` this is a non-blocking probe that returns `false`
    /// when a grant is not possible right now. With `wait = true` it sleeps
    /// until a grant is possible and always returns `true`.
    pub async fn acquire(&self, wait: bool) -> bool {
        let started = Instant::now();
        let mut waited = false;

        loop {
            let wait_for = {
                let mut state = self.state.lock().await;
                let now = Instant::now();
                state.refill(now, self.max_tokens());
                state.prune(now);

                let wait_for = state.required_wait(now, self.config.min_interval());
                if wait_for.is_zero() {
                    state.tokens = (state.tokens - 1.0).max(0.0);
                    state.last_grant = Some(now);
                    state.grants.push_back(now);
                    state.total_requests += 1;
                    if waited {
                        state.total_waits += 1;
                        state.total_wait_time += now.saturating_duration_since(started);
                    }
                    return true;
                }

                if !wait {
                    return false;
                }
                wait_for
            };

            debug!(
                wait_ms = wait_for.as_millis() as u64,
                "Rate limiter waiting for a token"
            );
            waited = true;
            sleep(wait_for).await;
        }
    }

    /// React to a 429 from the remote
    ///
    /// Empties the bucket, blocks grants for `retry_after` (or the configured
    /// fallback), sleeps for that long and restarts at half capacity.
    pub async fn handle_rate_limit_error(&self, retry_after: Option<Duration>) {
        let wait = retry_after.unwrap_or_else(|| self.config.rate_limit_fallback());

        let requests_per_minute = {
            let mut state = self.state.lock().await;
            let now = Instant::now();
            state.tokens = 0.0;
            state.last_refill = now;
            let until = now + wait;
            state.blocked_until = Some(match state.blocked_until {
                Some(existing) if existing > until => existing,
                _ => until,
            });
            state.rate_limit_hits += 1;
            state.requests_per_minute
        };

        warn!(
            wait_secs = wait.as_secs(),
            requests_per_minute, "Rate limited by remote, backing off"
        );
        self.emit(RateLimitEvent::Throttled {
            requests_per_minute,
            retry_after_secs: wait.as_secs(),
        });

        sleep(wait).await;

        let mut state = self.state.lock().await;
        let now = Instant::now();
        state.tokens = self.max_tokens() / 2.0;
        state.last_refill = now;
        if state.blocked_until.is_some_and(|until| until <= now) {
            state.blocked_until = None;
        }
    }

    /// Feed back a successful call
    pub async fn record_success(&self) {
        let recovered = {
            let mut state = self.state.lock().await;
            state.consecutive_errors = 0;
            state.consecutive_successes += 1;

            if state.phase == LimiterPhase::Throttled {
                state.phase = LimiterPhase::Recovering;
            }

            let ceiling = self.config.requests_per_minute;
            if state.consecutive_successes >= self.config.success_threshold {
                state.consecutive_successes = 0;
                if state.requests_per_minute < ceiling {
                    state.requests_per_minute =
                        (state.requests_per_minute * self.config.speedup_factor).min(ceiling);
                    debug!(
                        requests_per_minute = state.requests_per_minute,
                        "Raised request rate after success streak"
                    );
                }
            }

            if state.phase != LimiterPhase::Normal && state.requests_per_minute >= ceiling {
                state.phase = LimiterPhase::Normal;
                Some(state.requests_per_minute)
            } else {
                None
            }
        };

        if let Some(requests_per_minute) = recovered {
            info!(requests_per_minute, "Request rate fully recovered");
            self.emit(RateLimitEvent::Recovered {
                requests_per_minute,
            });
        }
    }

    /// Feed back a failed call
    ///
    /// A rate-limit error halves the target rate immediately. Other errors
    /// lower it by `error_factor` only after `error_threshold` in a row.
    pub async fn record_error(&self, is_rate_limit: bool) {
        let mut state = self.state.lock().await;
        state.consecutive_successes = 0;

        if is_rate_limit {
            state.consecutive_errors = 0;
            let floor = self.config.effective_rate_limit_floor();
            state.requests_per_minute =
                (state.requests_per_minute * self.config.rate_limit_factor).max(floor);
            state.phase = LimiterPhase::Throttled;
            info!(
                requests_per_minute = state.requests_per_minute,
                "Lowered request rate after rate-limit response"
            );
            return;
        }

        state.consecutive_errors += 1;
        if state.consecutive_errors >= self.config.error_threshold {
            state.consecutive_errors = 0;
            let floor = self.config.effective_error_floor();
            state.requests_per_minute =
                (state.requests_per_minute * self.config.error_factor).max(floor);
            info!(
                requests_per_minute = state.requests_per_minute,
                "Lowered request rate after repeated errors"
            );
        }
    }

    pub async fn stats(&self) -> RateLimiterStats {
        let state = self.state.lock().await;
        RateLimiterStats {
            total_requests: state.total_requests,
            total_waits: state.total_waits,
            total_wait_time: state.total_wait_time,
            rate_limit_hits: state.rate_limit_hits,
            requests_per_minute: state.requests_per_minute,
            tokens: state.tokens,
            phase: state.phase,
        }
    }

    pub async fn requests_per_minute(&self) -> f64 {
        self.state.lock().await.requests_per_minute
    }

    pub async fn phase(&self) -> LimiterPhase {
        self.state.lock().await.phase
    }

    fn emit(&self, event: RateLimitEvent) {
        if let Some(bus) = &self.event_bus {
            bus.emit(CoreEvent::RateLimit(event)).ok();
        }
    }
}
