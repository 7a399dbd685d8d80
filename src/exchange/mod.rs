//! Exchange adapters. Both Kalshi and Polymarket implement the same
//! `ExchangeClient` trait so the scanner, tracker and executor never branch
//! on exchange identity except to pick which client to call.

pub mod kalshi;
pub mod polymarket;

use crate::errors::AgentResult;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Market {
    pub id: String,
    pub exchange: &'static str,
    pub question: String,
    pub market_price: f64,
    pub volume_usd: f64,
    pub close_time: Option<chrono::DateTime<chrono::Utc>>,
    pub url: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    Yes,
    No,
}

impl Side {
    pub fn as_str(self) -> &'static str {
        match self {
            Side::Yes => "YES",
            Side::No => "NO",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub order_id: String,
    pub market_id: String,
    pub side: Side,
    pub size: f64,
    pub price: f64,
    pub status: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolvedMarket {
    pub id: String,
    pub outcome: i64,
}

/// Shared contract every exchange adapter implements. An adapter that cannot
/// authenticate (missing credentials) still constructs -- it simply returns
/// empty lists and rejects orders, so the orchestrator never has to treat a
/// disabled exchange as a special case.
#[async_trait]
pub trait ExchangeClient: Send + Sync {
    fn name(&self) -> &'static str;

    async fn list_markets(&self) -> AgentResult<Vec<Market>>;

    async fn market_price(&self, market_id: &str) -> AgentResult<f64>;

    async fn place_order(&self, market_id: &str, side: Side, size: f64, price: f64) -> AgentResult<Order>;

    async fn list_resolved(&self, since: chrono::DateTime<chrono::Utc>) -> AgentResult<Vec<ResolvedMarket>>;
}

/// Token-bucket-of-one rate gate: blocks the caller until at least
/// `1/rps` seconds have elapsed since the previous permit.
pub struct RateLimiter {
    min_interval: Duration,
    last: Mutex<Option<Instant>>,
}

impl RateLimiter {
    pub fn new(rps: f64) -> Self {
        let min_interval = if rps > 0.0 {
            Duration::from_secs_f64(1.0 / rps)
        } else {
            Duration::ZERO
        };
        Self { min_interval, last: Mutex::new(None) }
    }

    pub async fn acquire(&self) {
        let mut last = self.last.lock().await;
        if let Some(prev) = *last {
            let elapsed = prev.elapsed();
            if elapsed < self.min_interval {
                tokio::time::sleep(self.min_interval - elapsed).await;
            }
        }
        *last = Some(Instant::now());
    }
}

/// Exponential backoff retry: doubles the wait after each failed attempt,
/// clamped to [1, 10] seconds, giving up once `max_retries` is reached.
/// A non-transient error (permanent 4xx, auth, parse) returns immediately --
/// retrying it would just waste the rate-limit budget.
pub async fn with_retry<F, Fut, T>(max_retries: u32, f: F) -> AgentResult<T>
where
    F: Fn() -> Fut,
    Fut: Future<Output = AgentResult<T>>,
{
    let mut attempt = 0;
    loop {
        match f().await {
            Ok(v) => return Ok(v),
            Err(e) if !e.is_transient() || attempt + 1 >= max_retries => return Err(e),
            Err(e) => {
                let wait = Duration::from_secs_f64((2u32.pow(attempt) as f64).clamp(1.0, 10.0));
                tracing::warn!(attempt, error = %e, "retrying after backoff");
                tokio::time::sleep(wait).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limiter_zero_rps_has_no_wait() {
        let rl = RateLimiter::new(0.0);
        assert_eq!(rl.min_interval, Duration::ZERO);
    }
}
