//! Polymarket CLOB adapter. Talks to the REST surface directly rather than
//! through a vendor SDK: market discovery and price reads are public, order
//! placement needs L2 auth (API key/secret/passphrase HMAC over
//! timestamp+method+path+body, matching the CLOB's documented scheme).

use super::{with_retry, ExchangeClient, Market, Order, RateLimiter, ResolvedMarket, Side};
use crate::errors::{AgentError, AgentResult};
use async_trait::async_trait;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::time::{SystemTime, UNIX_EPOCH};

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Deserialize)]
struct RawToken {
    outcome: Option<String>,
    price: Option<f64>,
    winner: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct RawMarket {
    condition_id: Option<String>,
    question: Option<String>,
    slug: Option<String>,
    #[serde(rename = "endDate")]
    end_date: Option<String>,
    volume: Option<serde_json::Value>,
    tokens: Option<Vec<RawToken>>,
    closed: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct MarketsResponse {
    data: Option<Vec<RawMarket>>,
}

#[derive(Debug, Serialize)]
struct PostOrderRequest<'a> {
    token_id: &'a str,
    price: f64,
    size: f64,
    side: &'static str,
}

#[derive(Debug, Deserialize)]
struct PostOrderResponse {
    #[serde(rename = "orderID")]
    order_id: Option<String>,
    status: Option<String>,
}

struct PolyCreds {
    api_key: String,
    api_secret: String,
    api_passphrase: String,
}

pub struct PolymarketExchange {
    client: reqwest::Client,
    base_url: String,
    creds: Option<PolyCreds>,
    min_volume_usd: f64,
    min_hours_to_close: i64,
    limiter: RateLimiter,
    max_retries: u32,
}

impl PolymarketExchange {
    pub fn new(
        host: &str,
        api_key: &str,
        api_secret: &str,
        api_passphrase: &str,
        min_volume_usd: f64,
        min_hours_to_close: i64,
        rps: f64,
        max_retries: u32,
    ) -> AgentResult<Self> {
        let creds = if api_key.is_empty() {
            None
        } else {
            Some(PolyCreds {
                api_key: api_key.to_string(),
                api_secret: api_secret.to_string(),
                api_passphrase: api_passphrase.to_string(),
            })
        };
        Ok(Self {
            client: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(10))
                .build()?,
            base_url: host.trim_end_matches('/').to_string(),
            creds,
            min_volume_usd,
            min_hours_to_close,
            limiter: RateLimiter::new(rps),
            max_retries,
        })
    }

    fn l2_headers(&self, method: &str, path: &str, body: &str) -> AgentResult<Vec<(&'static str, String)>> {
        let creds = self
            .creds
            .as_ref()
            .ok_or_else(|| AgentError::Auth("polymarket: no credentials configured".into()))?;
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|e| AgentError::Auth(format!("system clock: {e}")))?
            .as_secs()
            .to_string();
        let message = format!("{timestamp}{}{path}{body}", method.to_uppercase());
        let mut mac = HmacSha256::new_from_slice(creds.api_secret.as_bytes())
            .map_err(|e| AgentError::Auth(format!("hmac key: {e}")))?;
        mac.update(message.as_bytes());
        let signature = hex::encode(mac.finalize().into_bytes());
        Ok(vec![
            ("POLY_API_KEY", creds.api_key.clone()),
            ("POLY_PASSPHRASE", creds.api_passphrase.clone()),
            ("POLY_TIMESTAMP", timestamp),
            ("POLY_SIGNATURE", signature),
        ])
    }

    async fn get_markets_raw(&self, closed: bool) -> AgentResult<Vec<RawMarket>> {
        if self.creds.is_none() {
            return Ok(Vec::new());
        }
        with_retry(self.max_retries, || self.get_markets_raw_once(closed)).await
    }

    async fn get_markets_raw_once(&self, closed: bool) -> AgentResult<Vec<RawMarket>> {
        self.limiter.acquire().await;
        let path = if closed { "/markets?closed=true" } else { "/markets" };
        let url = format!("{}{path}", self.base_url);
        let resp = self.client.get(&url).send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(AgentError::ExchangeApi { exchange: "polymarket", status: status.as_u16(), body });
        }
        let parsed: MarketsResponse = resp.json().await.map_err(|e| AgentError::Parse(e.to_string()))?;
        Ok(parsed.data.unwrap_or_default())
    }

    async fn market_price_once(&self, token_id: &str) -> AgentResult<f64> {
        self.limiter.acquire().await;
        let url = format!("{}/last-trade-price?token_id={token_id}", self.base_url);
        let resp = self.client.get(&url).send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(AgentError::ExchangeApi { exchange: "polymarket", status: status.as_u16(), body });
        }
        #[derive(Deserialize)]
        struct Resp {
            price: Option<f64>,
        }
        let parsed: Resp = resp.json().await.map_err(|e| AgentError::Parse(e.to_string()))?;
        Ok(parsed.price.unwrap_or(0.5))
    }

    async fn place_order_once(&self, body: &str) -> AgentResult<PostOrderResponse> {
        let headers = self.l2_headers("POST", "/order", body)?;
        self.limiter.acquire().await;
        let url = format!("{}/order", self.base_url);
        let mut builder = self.client.post(&url).header("Content-Type", "application/json").body(body.to_string());
        for (k, v) in headers {
            builder = builder.header(k, v);
        }
        let resp = builder.send().await?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(AgentError::ExchangeApi { exchange: "polymarket", status: status.as_u16(), body: text });
        }
        resp.json().await.map_err(|e| AgentError::Parse(e.to_string()))
    }
}

#[async_trait]
impl ExchangeClient for PolymarketExchange {
    fn name(&self) -> &'static str {
        "polymarket"
    }

    async fn list_markets(&self) -> AgentResult<Vec<Market>> {
        let raw = match self.get_markets_raw(false).await {
            Ok(r) => r,
            Err(e) => {
                tracing::error!(error = %e, "polymarket get_markets failed");
                return Ok(Vec::new());
            }
        };

        let now = chrono::Utc::now();
        let cutoff = now + chrono::Duration::hours(self.min_hours_to_close);

        let markets = raw
            .into_iter()
            .filter(|m| m.closed != Some(true))
            .filter_map(|m| {
                let condition_id = m.condition_id?;
                let close_time = m
                    .end_date
                    .as_deref()
                    .and_then(|s| chrono::DateTime::parse_from_rfc3339(s).ok())
                    .map(|dt| dt.with_timezone(&chrono::Utc));
                if let Some(ct) = close_time {
                    if ct < cutoff {
                        return None;
                    }
                }
                let volume: f64 = m
                    .volume
                    .as_ref()
                    .and_then(|v| v.as_str().and_then(|s| s.parse().ok()).or_else(|| v.as_f64()))
                    .unwrap_or(0.0);
                if volume < self.min_volume_usd {
                    return None;
                }
                let tokens = m.tokens?;
                if tokens.len() != 2 {
                    return None;
                }
                let yes = tokens.iter().find(|t| t.outcome.as_deref().map(str::to_uppercase).as_deref() == Some("YES"))?;
                let price = yes.price.unwrap_or(0.5);
                Some(Market {
                    id: format!("polymarket:{condition_id}"),
                    exchange: "polymarket",
                    question: m.question.unwrap_or_default(),
                    market_price: price,
                    volume_usd: volume,
                    close_time,
                    url: format!("https://polymarket.com/event/{}", m.slug.unwrap_or_default()),
                })
            })
            .collect();
        Ok(markets)
    }

    async fn market_price(&self, market_id: &str) -> AgentResult<f64> {
        if self.creds.is_none() {
            return Ok(0.5);
        }
        let token_id = market_id.strip_prefix("polymarket:").unwrap_or(market_id);
        match with_retry(self.max_retries, || self.market_price_once(token_id)).await {
            Ok(p) => Ok(p),
            Err(_) => Ok(0.5),
        }
    }

    async fn place_order(&self, market_id: &str, side: Side, size: f64, price: f64) -> AgentResult<Order> {
        let token_id = market_id.strip_prefix("polymarket:").unwrap_or(market_id).to_string();
        let req = PostOrderRequest {
            token_id: &token_id,
            price,
            size,
            side: side.as_str(),
        };
        let body = serde_json::to_string(&req)?;
        let resp = with_retry(self.max_retries, || self.place_order_once(&body)).await?;
        Ok(Order {
            order_id: resp.order_id.unwrap_or_default(),
            market_id: market_id.to_string(),
            side,
            size,
            price,
            status: resp.status.unwrap_or_else(|| "open".to_string()),
        })
    }

    async fn list_resolved(&self, since: chrono::DateTime<chrono::Utc>) -> AgentResult<Vec<ResolvedMarket>> {
        let raw = match self.get_markets_raw(true).await {
            Ok(r) => r,
            Err(e) => {
                tracing::error!(error = %e, "polymarket get_resolved_markets failed");
                return Ok(Vec::new());
            }
        };
        let resolved = raw
            .into_iter()
            .filter_map(|m| {
                let resolved_at = m
                    .end_date
                    .as_deref()
                    .and_then(|s| chrono::DateTime::parse_from_rfc3339(s).ok())
                    .map(|dt| dt.with_timezone(&chrono::Utc));
                if let Some(r) = resolved_at {
                    if r < since {
                        return None;
                    }
                }
                let condition_id = m.condition_id?;
                let outcome = m.tokens?.into_iter().find(|t| t.winner == Some(true)).map(|t| {
                    if t.outcome.as_deref().map(str::to_uppercase).as_deref() == Some("YES") {
                        1
                    } else {
                        0
                    }
                })?;
                Some(ResolvedMarket { id: format!("polymarket:{condition_id}"), outcome })
            })
            .collect();
        Ok(resolved)
    }
}
