//! Fans a market question out to every active model concurrently (capped by
//! a semaphore), extracts a probability + entropy from each response, and
//! logs the resulting LLM spend.

use crate::config::AgentConfig;
use crate::store::{self, DbPool};
use std::sync::{Arc, OnceLock};
use tokio::sync::Semaphore;

#[derive(Debug, Clone)]
pub struct ModelConfig {
    pub id: String,
    pub provider: String,
    pub has_logprobs: bool,
    pub weight: f64,
}

pub fn default_models() -> Vec<ModelConfig> {
    vec![
        ModelConfig { id: "claude-sonnet-4-6".into(), provider: "anthropic".into(), has_logprobs: true, weight: 1.0 },
        ModelConfig { id: "gpt-4.1".into(), provider: "openai".into(), has_logprobs: true, weight: 1.0 },
        ModelConfig { id: "deepseek-chat".into(), provider: "deepseek".into(), has_logprobs: true, weight: 0.8 },
    ]
}

#[derive(Debug, Clone)]
pub struct Forecast {
    pub model: String,
    pub prompt_version: String,
    pub raw_probability: f64,
    pub entropy: f64,
    pub confidence: &'static str,
    pub reasoning: Option<String>,
    pub news_used: bool,
}

/// USD per 1M tokens, (input, output). Unknown models fall back to a
/// conservative blended rate.
fn cost_rate(model: &str) -> (f64, f64) {
    match model {
        "claude-sonnet-4-6" => (3.0, 15.0),
        "claude-haiku-4-5-20251001" => (0.25, 1.25),
        "gpt-4.1" => (2.0, 8.0),
        "gpt-4o-mini" => (0.15, 0.60),
        "deepseek-chat" => (0.14, 0.28),
        _ => (1.0, 3.0),
    }
}

fn estimate_cost(model: &str, input_tokens: i64, output_tokens: i64) -> f64 {
    let (in_rate, out_rate) = cost_rate(model);
    (input_tokens as f64 / 1_000_000.0) * in_rate + (output_tokens as f64 / 1_000_000.0) * out_rate
}

/// Runs every weighted model concurrently under `semaphore`, returning one
/// `Forecast` per model that produced a result. A model erroring (missing
/// key, network failure, parse failure) is simply absent from the output --
/// the ensemble handles a partial or empty set.
pub async fn forecast(
    client: &reqwest::Client,
    db: &DbPool,
    config: &AgentConfig,
    semaphore: &Arc<Semaphore>,
    models: &[ModelConfig],
    prompt_version: &str,
    prompt_template: &str,
    question: &str,
    domain: &str,
    news_body: &str,
    news_system_prefix: &str,
    use_news: bool,
    market_price: f64,
) -> Vec<Forecast> {
    let futures: Vec<_> = models
        .iter()
        .filter(|m| m.weight > 0.0)
        .map(|m| {
            let m = m.clone();
            forecast_one(
                client,
                db,
                config,
                semaphore,
                m,
                prompt_version.to_string(),
                prompt_template.to_string(),
                question.to_string(),
                domain.to_string(),
                news_body.to_string(),
                news_system_prefix.to_string(),
                use_news,
                market_price,
            )
        })
        .collect();

    let results = futures_util::future::join_all(futures).await;
    results.into_iter().flatten().collect()
}

#[allow(clippy::too_many_arguments)]
async fn forecast_one(
    client: &reqwest::Client,
    db: &DbPool,
    config: &AgentConfig,
    semaphore: &Arc<Semaphore>,
    model: ModelConfig,
    prompt_version: String,
    prompt_template: String,
    question: String,
    domain: String,
    news_body: String,
    news_system_prefix: String,
    use_news: bool,
    market_price: f64,
) -> Option<Forecast> {
    let _permit = semaphore.acquire().await.ok()?;

    let user_prompt = prompt_template
        .replace("{question}", &question)
        .replace("{domain}", &domain)
        .replace("{news_context}", if use_news { &news_body } else { "" })
        .replace("{market_price}", &format!("{market_price:.2}"));

    let call_result = match model.provider.as_str() {
        "anthropic" => call_anthropic(client, config, &news_system_prefix, &user_prompt).await,
        "openai" => call_openai(client, config, &news_system_prefix, &user_prompt).await,
        "deepseek" => call_deepseek(client, config, &news_system_prefix, &user_prompt).await,
        other => {
            tracing::warn!(provider = other, "unknown model provider");
            None
        }
    }?;

    let cost = estimate_cost(&model.id, call_result.input_tokens, call_result.output_tokens);
    if let Err(e) = store::log_llm_cost(
        db,
        &model.id,
        call_result.input_tokens,
        call_result.output_tokens,
        cost,
        "forecast",
    ) {
        tracing::warn!(error = %e, model = %model.id, "failed to log llm cost");
    }

    let probability = extract_probability(&call_result.text)?;
    let reasoning = extract_reasoning(&call_result.text);
    let entropy = if !call_result.top_k_logprobs.is_empty() {
        super::entropy::compute_distribution_entropy(&call_result.top_k_logprobs)
    } else if call_result.has_logprobs {
        super::entropy::compute_sequence_entropy(&call_result.logprobs)
    } else {
        call_result.sentinel_entropy
    };
    let confidence = super::entropy::confidence_tier(entropy, None);

    Some(Forecast {
        model: model.id,
        prompt_version,
        raw_probability: probability,
        entropy,
        confidence,
        reasoning,
        news_used: use_news,
    })
}

struct ProviderResponse {
    text: String,
    logprobs: Vec<f64>,
    /// Per-token top-k logprobs, when the provider returns them; used to
    /// compute true Shannon entropy instead of the single-logprob approximation.
    top_k_logprobs: Vec<Vec<f64>>,
    has_logprobs: bool,
    sentinel_entropy: f64,
    input_tokens: i64,
    output_tokens: i64,
}

async fn call_anthropic(
    client: &reqwest::Client,
    config: &AgentConfig,
    system: &str,
    user: &str,
) -> Option<ProviderResponse> {
    if config.anthropic_api_key.is_empty() {
        return None;
    }
    #[derive(serde::Serialize)]
    struct Req<'a> {
        model: &'a str,
        max_tokens: u32,
        system: &'a str,
        messages: Vec<Msg<'a>>,
    }
    #[derive(serde::Serialize)]
    struct Msg<'a> {
        role: &'a str,
        content: &'a str,
    }
    #[derive(serde::Deserialize)]
    struct Resp {
        content: Vec<Block>,
        usage: Option<Usage>,
    }
    #[derive(serde::Deserialize)]
    struct Block {
        text: Option<String>,
    }
    #[derive(serde::Deserialize)]
    struct Usage {
        input_tokens: i64,
        output_tokens: i64,
    }

    let resp: Resp = client
        .post("https://api.anthropic.com/v1/messages")
        .header("x-api-key", &config.anthropic_api_key)
        .header("anthropic-version", "2023-06-01")
        .json(&Req {
            model: "claude-sonnet-4-6",
            max_tokens: 1024,
            system,
            messages: vec![Msg { role: "user", content: user }],
        })
        .send()
        .await
        .ok()?
        .json()
        .await
        .ok()?;

    let text = resp.content.into_iter().filter_map(|b| b.text).collect::<Vec<_>>().join("");
    // Anthropic's API doesn't expose logprobs; use a fixed sentinel that
    // favors "high" confidence only when a probability actually parsed.
    let sentinel = if extract_probability(&text).is_some() { 3.5 } else { 6.0 };
    Some(ProviderResponse {
        text,
        logprobs: Vec::new(),
        top_k_logprobs: Vec::new(),
        has_logprobs: false,
        sentinel_entropy: sentinel,
        input_tokens: resp.usage.as_ref().map(|u| u.input_tokens).unwrap_or(0),
        output_tokens: resp.usage.as_ref().map(|u| u.output_tokens).unwrap_or(0),
    })
}

async fn call_openai(
    client: &reqwest::Client,
    config: &AgentConfig,
    system: &str,
    user: &str,
) -> Option<ProviderResponse> {
    if config.openai_api_key.is_empty() {
        return None;
    }
    openai_compatible(client, "https://api.openai.com/v1/chat/completions", &config.openai_api_key, "gpt-4.1", system, user).await
}

async fn call_deepseek(
    client: &reqwest::Client,
    config: &AgentConfig,
    system: &str,
    user: &str,
) -> Option<ProviderResponse> {
    if config.deepseek_api_key.is_empty() {
        return None;
    }
    openai_compatible(
        client,
        "https://api.deepseek.com/v1/chat/completions",
        &config.deepseek_api_key,
        "deepseek-chat",
        system,
        user,
    )
    .await
}

async fn openai_compatible(
    client: &reqwest::Client,
    url: &str,
    api_key: &str,
    model: &str,
    system: &str,
    user: &str,
) -> Option<ProviderResponse> {
    #[derive(serde::Serialize)]
    struct Req<'a> {
        model: &'a str,
        messages: Vec<Msg<'a>>,
        logprobs: bool,
        top_logprobs: u32,
    }
    #[derive(serde::Serialize)]
    struct Msg<'a> {
        role: &'a str,
        content: &'a str,
    }
    #[derive(serde::Deserialize)]
    struct Resp {
        choices: Vec<Choice>,
        usage: Option<Usage>,
    }
    #[derive(serde::Deserialize)]
    struct Choice {
        message: ChoiceMsg,
        logprobs: Option<LogprobsWrap>,
    }
    #[derive(serde::Deserialize)]
    struct ChoiceMsg {
        content: Option<String>,
    }
    #[derive(serde::Deserialize)]
    struct LogprobsWrap {
        content: Option<Vec<TokenLogprob>>,
    }
    #[derive(serde::Deserialize)]
    struct TokenLogprob {
        logprob: f64,
        #[serde(default)]
        top_logprobs: Vec<TopLogprob>,
    }
    #[derive(serde::Deserialize)]
    struct TopLogprob {
        logprob: f64,
    }
    #[derive(serde::Deserialize)]
    struct Usage {
        prompt_tokens: i64,
        completion_tokens: i64,
    }

    let resp: Resp = client
        .post(url)
        .bearer_auth(api_key)
        .json(&Req {
            model,
            messages: vec![
                Msg { role: "system", content: system },
                Msg { role: "user", content: user },
            ],
            logprobs: true,
            top_logprobs: 5,
        })
        .send()
        .await
        .ok()?
        .json()
        .await
        .ok()?;

    let choice = resp.choices.into_iter().next()?;
    let text = choice.message.content.unwrap_or_default();
    let tokens = choice.logprobs.and_then(|l| l.content).unwrap_or_default();
    let logprobs: Vec<f64> = tokens.iter().map(|t| t.logprob).collect();
    let top_k_logprobs: Vec<Vec<f64>> = tokens
        .iter()
        .map(|t| t.top_logprobs.iter().map(|tl| tl.logprob).collect())
        .filter(|v: &Vec<f64>| !v.is_empty())
        .collect();
    let has_logprobs = !logprobs.is_empty();

    Some(ProviderResponse {
        text,
        logprobs,
        top_k_logprobs,
        has_logprobs,
        sentinel_entropy: super::entropy::ENTROPY_THRESHOLD_DEFAULT,
        input_tokens: resp.usage.as_ref().map(|u| u.prompt_tokens).unwrap_or(0),
        output_tokens: resp.usage.as_ref().map(|u| u.completion_tokens).unwrap_or(0),
    })
}

fn probability_json_regex() -> &'static regex::Regex {
    static RE: OnceLock<regex::Regex> = OnceLock::new();
    RE.get_or_init(|| {
        regex::Regex::new(r"(?i)(\d+(?:\.\d+)?)\s*%").expect("static probability pattern")
    })
}

/// Tries the JSON `probability`/`prob`/`p` field first, falling back to a
/// bare percentage in the text. A value > 1 is assumed to be a percentage.
pub fn extract_probability(text: &str) -> Option<f64> {
    if let Ok(v) = serde_json::from_str::<serde_json::Value>(extract_json_block(text)) {
        for key in ["probability", "prob", "p"] {
            if let Some(n) = v.get(key).and_then(|x| x.as_f64()) {
                return Some(normalize_probability(n));
            }
        }
    }
    probability_json_regex()
        .captures(text)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse::<f64>().ok())
        .map(|n| n / 100.0)
}

fn normalize_probability(n: f64) -> f64 {
    if n > 1.0 {
        n / 100.0
    } else {
        n
    }
}

/// Tries the JSON `reasoning`/`explanation`/`rationale` field, else strips
/// any JSON block and returns the remaining text truncated to 500 chars.
pub fn extract_reasoning(text: &str) -> Option<String> {
    if let Ok(v) = serde_json::from_str::<serde_json::Value>(extract_json_block(text)) {
        for key in ["reasoning", "explanation", "rationale"] {
            if let Some(s) = v.get(key).and_then(|x| x.as_str()) {
                return Some(truncate(s, 500));
            }
        }
    }
    let stripped = strip_json_block(text);
    let trimmed = stripped.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(truncate(trimmed, 500))
    }
}

fn extract_json_block(text: &str) -> &str {
    let start = text.find('{');
    let end = text.rfind('}');
    match (start, end) {
        (Some(s), Some(e)) if e >= s => &text[s..=e],
        _ => text,
    }
}

fn strip_json_block(text: &str) -> String {
    let start = text.find('{');
    let end = text.rfind('}');
    match (start, end) {
        (Some(s), Some(e)) if e >= s => format!("{}{}", &text[..s], &text[e + 1..]),
        _ => text.to_string(),
    }
}

fn truncate(s: &str, max_chars: usize) -> String {
    s.chars().take(max_chars).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_probability_from_json() {
        let text = r#"{"probability": 72, "reasoning": "strong trend"}"#;
        assert_eq!(extract_probability(text), Some(0.72));
    }

    #[test]
    fn extracts_fractional_probability_unchanged() {
        let text = r#"{"probability": 0.72}"#;
        assert_eq!(extract_probability(text), Some(0.72));
    }

    #[test]
    fn falls_back_to_percentage_regex() {
        let text = "I estimate this at roughly 65% likely given the polling.";
        assert_eq!(extract_probability(text), Some(0.65));
    }

    #[test]
    fn reasoning_prefers_json_field() {
        let text = r#"{"probability": 0.5, "reasoning": "because X"}"#;
        assert_eq!(extract_reasoning(text).as_deref(), Some("because X"));
    }

    #[test]
    fn reasoning_falls_back_to_stripped_text() {
        let text = r#"Some preamble {"probability": 0.5} trailing note"#;
        assert_eq!(extract_reasoning(text).as_deref(), Some("Some preamble  trailing note"));
    }

    #[test]
    fn cost_estimate_uses_known_rate_table() {
        let cost = estimate_cost("deepseek-chat", 1_000_000, 1_000_000);
        assert!((cost - 0.42).abs() < 1e-9);
    }

    #[test]
    fn cost_estimate_falls_back_for_unknown_model() {
        let cost = estimate_cost("some-future-model", 1_000_000, 1_000_000);
        assert!((cost - 4.0).abs() < 1e-9);
    }
}
