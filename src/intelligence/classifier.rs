//! Domain classification: an LLM call with a keyword fallback when no API
//! key is configured or the call fails. Six domains total; anything the
//! model names outside that set gets mapped to its closest match.

use crate::config::AgentConfig;

pub const DOMAINS: [&str; 6] = [
    "geopolitics",
    "politics",
    "technology",
    "entertainment",
    "finance",
    "sports",
];

pub fn domain_definitions() -> [(&'static str, &'static str); 6] {
    [
        ("geopolitics", "International relations, conflicts, treaties, sanctions, war"),
        ("politics", "Elections, legislation, government, domestic political events"),
        ("technology", "AI, software, hardware, tech company announcements and products"),
        ("entertainment", "Movies, TV, celebrities, awards shows, streaming"),
        ("finance", "Markets, economic indicators, central bank policy, crypto"),
        ("sports", "Games, leagues, championships, athlete performance"),
    ]
}

#[derive(Debug, Clone)]
pub struct Classification {
    pub domain: String,
    pub confidence: f64,
}

/// Classifies a market question, preferring an LLM call over the keyword
/// fallback whenever a usable API key is configured.
pub async fn classify(
    client: &reqwest::Client,
    config: &AgentConfig,
    question: &str,
) -> Classification {
    if !config.anthropic_api_key.is_empty() || !config.openai_api_key.is_empty() {
        match call_classifier(client, config, question).await {
            Ok(c) => return c,
            Err(e) => tracing::debug!(error = %e, "classifier LLM call failed, falling back to keywords"),
        }
    }
    keyword_fallback(question)
}

async fn call_classifier(
    client: &reqwest::Client,
    config: &AgentConfig,
    question: &str,
) -> crate::errors::AgentResult<Classification> {
    let prompt = format!(
        "Classify this prediction market question into exactly one domain: {}.\n\nQuestion: {question}\n\nRespond with JSON: {{\"domain\": \"...\", \"confidence\": 0.0-1.0}}",
        DOMAINS.join(", ")
    );

    let raw = if !config.anthropic_api_key.is_empty() && config.classifier_model.contains("claude") {
        call_anthropic_text(client, config, &prompt).await?
    } else {
        call_openai_text(client, config, &prompt).await?
    };

    Ok(parse_response(&raw))
}

async fn call_anthropic_text(
    client: &reqwest::Client,
    config: &AgentConfig,
    prompt: &str,
) -> crate::errors::AgentResult<String> {
    #[derive(serde::Serialize)]
    struct Req<'a> {
        model: &'a str,
        max_tokens: u32,
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
    }
    #[derive(serde::Deserialize)]
    struct Block {
        text: Option<String>,
    }

    let resp: Resp = client
        .post("https://api.anthropic.com/v1/messages")
        .header("x-api-key", &config.anthropic_api_key)
        .header("anthropic-version", "2023-06-01")
        .json(&Req {
            model: &config.classifier_model,
            max_tokens: 200,
            messages: vec![Msg { role: "user", content: prompt }],
        })
        .send()
        .await?
        .json()
        .await?;
    Ok(resp.content.into_iter().filter_map(|b| b.text).collect::<Vec<_>>().join(""))
}

async fn call_openai_text(
    client: &reqwest::Client,
    config: &AgentConfig,
    prompt: &str,
) -> crate::errors::AgentResult<String> {
    #[derive(serde::Serialize)]
    struct Req<'a> {
        model: &'a str,
        messages: Vec<Msg<'a>>,
    }
    #[derive(serde::Serialize)]
    struct Msg<'a> {
        role: &'a str,
        content: &'a str,
    }
    #[derive(serde::Deserialize)]
    struct Resp {
        choices: Vec<Choice>,
    }
    #[derive(serde::Deserialize)]
    struct Choice {
        message: ChoiceMsg,
    }
    #[derive(serde::Deserialize)]
    struct ChoiceMsg {
        content: Option<String>,
    }

    let resp: Resp = client
        .post("https://api.openai.com/v1/chat/completions")
        .bearer_auth(&config.openai_api_key)
        .json(&Req {
            model: &config.classifier_model,
            messages: vec![Msg { role: "user", content: prompt }],
        })
        .send()
        .await?
        .json()
        .await?;
    Ok(resp.choices.into_iter().next().and_then(|c| c.message.content).unwrap_or_default())
}

fn parse_response(raw: &str) -> Classification {
    if let Ok(v) = serde_json::from_str::<serde_json::Value>(extract_json(raw)) {
        let domain = v.get("domain").and_then(|d| d.as_str()).unwrap_or("politics");
        let confidence = v.get("confidence").and_then(|c| c.as_f64()).unwrap_or(0.3);
        return Classification { domain: closest_domain(domain), confidence };
    }
    Classification { domain: "politics".to_string(), confidence: 0.3 }
}

fn extract_json(raw: &str) -> &str {
    let start = raw.find('{');
    let end = raw.rfind('}');
    match (start, end) {
        (Some(s), Some(e)) if e >= s => &raw[s..=e],
        _ => raw,
    }
}

fn closest_domain(raw: &str) -> String {
    let lower = raw.to_lowercase();
    if DOMAINS.contains(&lower.as_str()) {
        return lower;
    }
    let mapping: [(&str, &str); 15] = [
        ("geo", "geopolitics"),
        ("international", "geopolitics"),
        ("war", "geopolitics"),
        ("election", "politics"),
        ("political", "politics"),
        ("government", "politics"),
        ("tech", "technology"),
        ("ai", "technology"),
        ("crypto", "finance"),
        ("econ", "finance"),
        ("economic", "finance"),
        ("market", "finance"),
        ("sport", "sports"),
        ("athlete", "sports"),
        ("celebrity", "entertainment"),
    ];
    for (needle, domain) in mapping {
        if lower.contains(needle) {
            return domain.to_string();
        }
    }
    "politics".to_string()
}

/// No-LLM substring match against the question text, used when no provider
/// key is configured or the LLM call itself fails.
pub fn keyword_fallback(question: &str) -> Classification {
    let q = question.to_lowercase();
    let checks: [(&[&str], &str, f64); 6] = [
        (&["war", "nato", "sanction", "geopolit", "treaty"], "geopolitics", 0.5),
        (&["election", "president", "congress", "senate", "vote", "poll"], "politics", 0.5),
        (&["stock", "gdp", "fed ", "inflation", "bitcoin", "earnings"], "finance", 0.5),
        (&["nfl", "nba", "mlb", "soccer", "championship", "super bowl"], "sports", 0.5),
        (&["apple", "google", "openai", "ai ", "release", "iphone"], "technology", 0.5),
        (&["oscar", "emmy", "grammy", "celebrity", "netflix", "film"], "entertainment", 0.5),
    ];
    for (keywords, domain, confidence) in checks {
        if keywords.iter().any(|k| q.contains(k)) {
            return Classification { domain: domain.to_string(), confidence };
        }
    }
    Classification { domain: "politics".to_string(), confidence: 0.3 }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keyword_fallback_matches_geopolitics() {
        let c = keyword_fallback("Will NATO invoke Article 5 this year?");
        assert_eq!(c.domain, "geopolitics");
    }

    #[test]
    fn keyword_fallback_defaults_to_politics() {
        let c = keyword_fallback("Will it rain on Tuesday?");
        assert_eq!(c.domain, "politics");
        assert_eq!(c.confidence, 0.3);
    }

    #[test]
    fn closest_domain_maps_unknown_labels() {
        assert_eq!(closest_domain("International Relations"), "geopolitics");
        assert_eq!(closest_domain("Sporting Event"), "sports");
        assert_eq!(closest_domain("gibberish"), "politics");
    }
}
