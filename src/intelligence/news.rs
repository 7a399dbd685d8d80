//! News context assembly: fetch articles for a market's question, tag
//! speculative reporting, extract key terms, and build the system/user
//! prompt fragments the forecaster hands to each model.

use crate::config::AgentConfig;
use std::sync::OnceLock;

const MAX_CONTENT_CHARS: usize = 500;

pub struct Article {
    pub title: String,
    pub url: String,
    pub content: String,
    pub is_speculative: bool,
}

impl Article {
    pub fn to_context_str(&self) -> String {
        let tag = if self.is_speculative { "[SPECULATIVE] " } else { "" };
        let content: String = self.content.chars().take(MAX_CONTENT_CHARS).collect();
        format!("{tag}{}\n{}\n{content}", self.title, self.url)
    }
}

pub struct NewsContext {
    pub use_news: bool,
    pub system_prefix: String,
    pub body: String,
}

fn speculative_regex() -> &'static regex::Regex {
    static RE: OnceLock<regex::Regex> = OnceLock::new();
    RE.get_or_init(|| {
        regex::Regex::new(
            r"(?i)\b(could|may|might|reportedly|sources say|allegedly|rumored|anonymous source|unconfirmed|expected to|likely to|possible that|potentially|it appears|seems to)\b",
        )
        .expect("static speculative pattern")
    })
}

fn quoted_phrase_regex() -> &'static regex::Regex {
    static RE: OnceLock<regex::Regex> = OnceLock::new();
    RE.get_or_init(|| regex::Regex::new(r#""([^"]+)""#).expect("static quoted phrase pattern"))
}

fn title_case_regex() -> &'static regex::Regex {
    static RE: OnceLock<regex::Regex> = OnceLock::new();
    RE.get_or_init(|| {
        regex::Regex::new(r"(?:[A-Z][a-z]+\s){1,3}[A-Z][a-z]+").expect("static title case pattern")
    })
}

pub async fn get_news_context(
    client: &reqwest::Client,
    config: &AgentConfig,
    domain: &str,
    question: &str,
) -> NewsContext {
    if crate::intelligence::NEWS_NOISE_DOMAINS.contains(&domain) {
        return NewsContext {
            use_news: false,
            system_prefix: format!(
                "News for {domain} markets is frequently noisy or speculative; reason from base rates and known patterns instead."
            ),
            body: String::new(),
        };
    }

    let mut articles = fetch_articles(client, config, question).await;
    if articles.is_empty() {
        return NewsContext {
            use_news: true,
            system_prefix: "No recent news found for this question.".to_string(),
            body: String::new(),
        };
    }

    tag_speculative(&mut articles);
    let key_terms = extract_key_terms(question);

    let mut system_prefix = String::from(
        "Use the following news context to inform your forecast. Weigh speculative or unconfirmed reporting (marked [SPECULATIVE]) less heavily than confirmed reporting.",
    );
    if !key_terms.is_empty() {
        system_prefix.push_str(&format!(" Key terms mentioned: {}.", key_terms.join(", ")));
    }

    articles.truncate(config.max_news_articles);
    let body = articles
        .iter()
        .map(Article::to_context_str)
        .collect::<Vec<_>>()
        .join("\n\n---\n\n");

    NewsContext { use_news: true, system_prefix, body }
}

async fn fetch_articles(client: &reqwest::Client, config: &AgentConfig, question: &str) -> Vec<Article> {
    let result = if config.news_search_provider == "tavily" && !config.tavily_api_key.is_empty() {
        fetch_tavily(client, config, question).await
    } else if !config.brave_api_key.is_empty() {
        fetch_brave(client, config, question).await
    } else {
        tracing::warn!("no news search provider configured, returning no articles");
        Ok(Vec::new())
    };

    result.unwrap_or_else(|e| {
        tracing::warn!(error = %e, "news fetch failed");
        Vec::new()
    })
}

async fn fetch_tavily(
    client: &reqwest::Client,
    config: &AgentConfig,
    question: &str,
) -> crate::errors::AgentResult<Vec<Article>> {
    #[derive(serde::Serialize)]
    struct Req<'a> {
        api_key: &'a str,
        query: &'a str,
        max_results: usize,
    }
    #[derive(serde::Deserialize)]
    struct Resp {
        results: Vec<TavilyResult>,
    }
    #[derive(serde::Deserialize)]
    struct TavilyResult {
        title: String,
        url: String,
        content: String,
        #[serde(default)]
        published_date: Option<String>,
    }

    let resp: Resp = client
        .post("https://api.tavily.com/search")
        .json(&Req { api_key: &config.tavily_api_key, query: question, max_results: config.max_news_articles })
        .send()
        .await?
        .json()
        .await?;

    Ok(resp
        .results
        .into_iter()
        .map(|r| Article {
            title: r.title,
            url: r.url,
            content: r.content,
            is_speculative: false,
        })
        .collect())
}

async fn fetch_brave(
    client: &reqwest::Client,
    config: &AgentConfig,
    question: &str,
) -> crate::errors::AgentResult<Vec<Article>> {
    #[derive(serde::Deserialize)]
    struct Resp {
        news: Option<NewsResults>,
    }
    #[derive(serde::Deserialize)]
    struct NewsResults {
        results: Vec<BraveResult>,
    }
    #[derive(serde::Deserialize)]
    struct BraveResult {
        title: String,
        url: String,
        description: String,
    }

    let resp: Resp = client
        .get("https://api.search.brave.com/res/v1/news/search")
        .header("X-Subscription-Token", &config.brave_api_key)
        .query(&[("q", question), ("count", &config.max_news_articles.to_string())])
        .send()
        .await?
        .json()
        .await?;

    Ok(resp
        .news
        .map(|n| n.results)
        .unwrap_or_default()
        .into_iter()
        .map(|r| Article { title: r.title, url: r.url, content: r.description, is_speculative: false })
        .collect())
}

fn tag_speculative(articles: &mut [Article]) {
    let re = speculative_regex();
    for article in articles.iter_mut() {
        let combined = format!("{} {}", article.title, article.content);
        let hits = re.find_iter(&combined).count();
        article.is_speculative = hits >= 2;
    }
}

/// Pulls up to 5 key terms out of the *question* (not the fetched
/// articles) -- quoted phrases first, then runs of 2-4 Title-Case tokens --
/// in order of first appearance, for the definition-drift guard.
fn extract_key_terms(question: &str) -> Vec<String> {
    let mut terms = Vec::new();
    for cap in quoted_phrase_regex().captures_iter(question) {
        if let Some(m) = cap.get(1) {
            push_unique(&mut terms, m.as_str());
        }
    }
    for m in title_case_regex().find_iter(question) {
        push_unique(&mut terms, m.as_str());
    }
    terms.truncate(5);
    terms
}

fn push_unique(terms: &mut Vec<String>, candidate: &str) {
    if terms.len() < 5 && !terms.iter().any(|t| t == candidate) {
        terms.push(candidate.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn speculative_regex_matches_hedge_words() {
        let re = speculative_regex();
        assert!(re.is_match("Sources say the deal may fall through"));
        assert_eq!(re.find_iter("Sources say the deal may fall through").count(), 2);
    }

    #[test]
    fn tag_speculative_requires_two_hits() {
        let mut articles = vec![
            Article {
                title: "a".into(),
                url: "u".into(),
                content: "This could possibly happen".into(),
                is_speculative: false,
            },
            Article {
                title: "b".into(),
                url: "u".into(),
                content: "This is a confirmed fact with no hedging".into(),
                is_speculative: false,
            },
        ];
        tag_speculative(&mut articles);
        assert!(articles[0].is_speculative);
        assert!(!articles[1].is_speculative);
    }

    #[test]
    fn to_context_str_prefixes_speculative_tag() {
        let a = Article { title: "T".into(), url: "U".into(), content: "C".into(), is_speculative: true };
        assert!(a.to_context_str().starts_with("[SPECULATIVE] "));
    }

    #[test]
    fn key_terms_come_from_the_question_not_articles() {
        let terms = extract_key_terms(r#"Will "Project Atlas" succeed before the Federal Reserve meeting?"#);
        assert!(terms.contains(&"Project Atlas".to_string()));
        assert!(terms.contains(&"Federal Reserve".to_string()));
    }

    #[test]
    fn key_terms_capped_at_five() {
        let q = "Will Alpha Beta, Gamma Delta, Epsilon Zeta, Eta Theta, Iota Kappa, or Lambda Mu win?";
        let terms = extract_key_terms(q);
        assert!(terms.len() <= 5);
    }
}
