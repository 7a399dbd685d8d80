//! Kalshi adapter: RSA-PKCS1v15 request signing plus the public/authenticated
//! REST surface needed to list markets, read prices, place orders and poll
//! resolutions.

use super::{with_retry, ExchangeClient, Market, Order, RateLimiter, ResolvedMarket, Side};
use crate::errors::{AgentError, AgentResult};
use async_trait::async_trait;
use base64::Engine as _;
use rsa::pkcs1::DecodeRsaPrivateKey;
use rsa::pkcs1v15::SigningKey;
use rsa::signature::{SignatureEncoding, Signer};
use rsa::RsaPrivateKey;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::time::{SystemTime, UNIX_EPOCH};

struct KalshiAuth {
    api_key_id: String,
    signing_key: SigningKey<Sha256>,
}

impl KalshiAuth {
    fn load(api_key_id: &str, private_key_path: &str) -> AgentResult<Option<Self>> {
        if api_key_id.is_empty() {
            return Ok(None);
        }
        let pem = if let Ok(pem_env) = std::env::var("KALSHI_PRIVATE_KEY_PEM") {
            pem_env
        } else if !private_key_path.is_empty() {
            std::fs::read_to_string(private_key_path)
                .map_err(|e| AgentError::Auth(format!("read key {private_key_path}: {e}")))?
        } else {
            return Ok(None);
        };

        let private_key = RsaPrivateKey::from_pkcs1_pem(&pem)
            .map_err(|e| AgentError::Auth(format!("parse RSA PEM: {e}")))?;
        Ok(Some(Self {
            api_key_id: api_key_id.to_string(),
            signing_key: SigningKey::<Sha256>::new(private_key),
        }))
    }

    fn sign(&self, method: &str, path: &str) -> AgentResult<(String, String, String)> {
        let timestamp_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|e| AgentError::Auth(format!("system clock: {e}")))?
            .as_millis()
            .to_string();
        let message = format!("{timestamp_ms}{}{path}", method.to_uppercase());
        let signature = self.signing_key.sign(message.as_bytes());
        let sig_b64 = base64::engine::general_purpose::STANDARD.encode(signature.to_bytes());
        Ok((self.api_key_id.clone(), timestamp_ms, sig_b64))
    }
}

#[derive(Debug, Deserialize)]
struct GetMarketsResponse {
    markets: Option<Vec<RawMarket>>,
}

#[derive(Debug, Deserialize)]
struct RawMarket {
    ticker: Option<String>,
    title: Option<String>,
    status: Option<String>,
    result: Option<String>,
    yes_bid_dollars: Option<String>,
    volume_fp: Option<String>,
    close_time: Option<String>,
}

#[derive(Debug, Serialize)]
struct CreateOrderRequest<'a> {
    ticker: &'a str,
    action: &'static str,
    side: &'static str,
    count: i64,
    r#type: &'static str,
    yes_price: Option<i64>,
    no_price: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct CreateOrderResponse {
    order: RawOrder,
}

#[derive(Debug, Deserialize)]
struct RawOrder {
    order_id: String,
    status: Option<String>,
}

pub struct KalshiExchange {
    client: reqwest::Client,
    base_url: String,
    auth: Option<KalshiAuth>,
    limiter: RateLimiter,
    min_volume_usd: f64,
    min_hours_to_close: i64,
    max_retries: u32,
}

impl KalshiExchange {
    pub fn new(
        host: &str,
        api_key_id: &str,
        private_key_path: &str,
        min_volume_usd: f64,
        min_hours_to_close: i64,
        rps: f64,
        max_retries: u32,
    ) -> AgentResult<Self> {
        Ok(Self {
            client: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(10))
                .build()?,
            base_url: host.trim_end_matches('/').to_string(),
            auth: KalshiAuth::load(api_key_id, private_key_path)?,
            limiter: RateLimiter::new(rps),
            min_volume_usd,
            min_hours_to_close,
            max_retries,
        })
    }

    async fn get<T: serde::de::DeserializeOwned>(&self, path: &str) -> AgentResult<T> {
        with_retry(self.max_retries, || self.get_once(path)).await
    }

    async fn get_once<T: serde::de::DeserializeOwned>(&self, path: &str) -> AgentResult<T> {
        self.limiter.acquire().await;
        let url = format!("{}{path}", self.base_url);
        let mut req = self.client.get(&url);
        if let Some(auth) = &self.auth {
            let (key_id, ts, sig) = auth.sign("GET", path)?;
            req = req
                .header("KALSHI-ACCESS-KEY", key_id)
                .header("KALSHI-ACCESS-TIMESTAMP", ts)
                .header("KALSHI-ACCESS-SIGNATURE", sig);
        }
        let resp = req.send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(AgentError::ExchangeApi { exchange: "kalshi", status: status.as_u16(), body });
        }
        resp.json::<T>().await.map_err(|e| AgentError::Parse(format!("GET {path}: {e}")))
    }

    async fn post<T: serde::de::DeserializeOwned>(&self, path: &str, body: &impl Serialize) -> AgentResult<T> {
        let payload = serde_json::to_string(body)?;
        with_retry(self.max_retries, || self.post_once(path, &payload)).await
    }

    async fn post_once<T: serde::de::DeserializeOwned>(&self, path: &str, payload: &str) -> AgentResult<T> {
        self.limiter.acquire().await;
        let auth = self
            .auth
            .as_ref()
            .ok_or_else(|| AgentError::Auth("kalshi: no credentials configured".into()))?;
        let (key_id, ts, sig) = auth.sign("POST", path)?;
        let url = format!("{}{path}", self.base_url);
        let resp = self
            .client
            .post(&url)
            .header("KALSHI-ACCESS-KEY", key_id)
            .header("KALSHI-ACCESS-TIMESTAMP", ts)
            .header("KALSHI-ACCESS-SIGNATURE", sig)
            .header("Content-Type", "application/json")
            .body(payload.to_string())
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(AgentError::ExchangeApi { exchange: "kalshi", status: status.as_u16(), body: text });
        }
        resp.json::<T>().await.map_err(|e| AgentError::Parse(format!("POST {path}: {e}")))
    }
}

#[async_trait]
impl ExchangeClient for KalshiExchange {
    fn name(&self) -> &'static str {
        "kalshi"
    }

    async fn list_markets(&self) -> AgentResult<Vec<Market>> {
        let resp: GetMarketsResponse = self.get("/markets?status=open&limit=200").await?;
        let now = chrono::Utc::now();
        let cutoff = now + chrono::Duration::hours(self.min_hours_to_close);
        let markets = resp
            .markets
            .unwrap_or_default()
            .into_iter()
            .filter_map(|m| {
                let ticker = m.ticker?;
                let question = m.title.unwrap_or_else(|| ticker.clone());
                let price = m
                    .yes_bid_dollars
                    .as_deref()
                    .and_then(|s| s.parse::<f64>().ok())
                    .unwrap_or(0.5);
                let volume = m
                    .volume_fp
                    .as_deref()
                    .and_then(|s| s.parse::<f64>().ok())
                    .unwrap_or(0.0);
                if volume < self.min_volume_usd {
                    return None;
                }
                let close_time = m
                    .close_time
                    .as_deref()
                    .and_then(|s| chrono::DateTime::parse_from_rfc3339(s).ok())
                    .map(|dt| dt.with_timezone(&chrono::Utc));
                if let Some(ct) = close_time {
                    if ct < cutoff {
                        return None;
                    }
                }
                Some(Market {
                    id: format!("kalshi:{ticker}"),
                    exchange: "kalshi",
                    question,
                    market_price: price,
                    volume_usd: volume,
                    close_time,
                    url: format!("https://kalshi.com/markets/{ticker}"),
                })
            })
            .collect();
        Ok(markets)
    }

    async fn market_price(&self, market_id: &str) -> AgentResult<f64> {
        #[derive(Deserialize)]
        struct Resp {
            market: Option<RawMarket>,
        }
        let ticker = market_id.strip_prefix("kalshi:").unwrap_or(market_id);
        let resp: Resp = self.get(&format!("/markets/{ticker}")).await?;
        Ok(resp
            .market
            .and_then(|m| m.yes_bid_dollars)
            .and_then(|s| s.parse::<f64>().ok())
            .unwrap_or(0.5))
    }

    async fn place_order(&self, market_id: &str, side: Side, size: f64, price: f64) -> AgentResult<Order> {
        let ticker = market_id.strip_prefix("kalshi:").unwrap_or(market_id);
        let cents = (price * 100.0).round() as i64;
        let req = CreateOrderRequest {
            ticker,
            action: "buy",
            side: match side {
                Side::Yes => "yes",
                Side::No => "no",
            },
            count: size.round().max(1.0) as i64,
            r#type: "limit",
            yes_price: matches!(side, Side::Yes).then_some(cents),
            no_price: matches!(side, Side::No).then_some(cents),
        };
        let resp: CreateOrderResponse = self.post("/portfolio/orders", &req).await?;
        Ok(Order {
            order_id: resp.order.order_id,
            market_id: market_id.to_string(),
            side,
            size,
            price,
            status: resp.order.status.unwrap_or_else(|| "unknown".to_string()),
        })
    }

    async fn list_resolved(&self, since: chrono::DateTime<chrono::Utc>) -> AgentResult<Vec<ResolvedMarket>> {
        let min_close_ts = since.timestamp();
        let resp: GetMarketsResponse = self
            .get(&format!("/markets?status=finalized&min_close_ts={min_close_ts}&limit=200"))
            .await?;
        let resolved = resp
            .markets
            .unwrap_or_default()
            .into_iter()
            .filter_map(|m| {
                let ticker = m.ticker?;
                let result = m.result.as_deref()?;
                let outcome = match result {
                    "yes" => 1,
                    "no" => 0,
                    _ => return None,
                };
                Some(ResolvedMarket { id: format!("kalshi:{ticker}"), outcome })
            })
            .collect();
        Ok(resolved)
    }
}
