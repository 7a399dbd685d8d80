//! A/B prompt experiment manager. Seeds two baseline templates, runs a
//! periodic tournament that retires underperformers against outcome Brier
//! scores, and asks an LLM to draft a replacement when a domain's roster
//! drops below its cap.

use crate::config::AgentConfig;
use crate::store::model::PromptExperimentRow;
use crate::store::{self, DbPool};
use sha2::{Digest, Sha256};
use std::collections::HashMap;

/// Brier gap over the best active variant that triggers retirement.
const RETIRE_BRIER_GAP: f64 = 0.05;
/// Max active variants per domain before the evolver stops spawning new ones.
const MAX_VARIANTS_PER_DOMAIN: usize = 3;
const LOOKBACK_DAYS: i64 = 60;

pub const PROMPT_V1: &str = "You are a calibrated forecaster. Given this prediction market question:\n\"{question}\"\n[Domain: {domain}]\n{news_context}\nGuidelines:\n- Weight base rates equally with recent news\n- Distinguish confirmed facts from speculation\n- Consider the specific resolution criteria carefully\n- Current market price: {market_price}\n\nProvide:\n1. Probability (0-100%) that this resolves YES\n2. Your reasoning (2-3 sentences)\n\nJSON only: {{\"probability\": <0-100>, \"reasoning\": \"...\"}}";

pub const PROMPT_V2: &str = "[Forecasting task]\nQuestion: \"{question}\"\nDomain: {domain}\nCurrent market price: {market_price}\n{news_context}\nStep 1: What is the base rate for this type of event?\nStep 2: What does recent evidence add? (flag if speculative)\nStep 3: What is the specific resolution criteria?\nStep 4: What is your calibrated probability?\n\nJSON: {{\"probability\": <0-100>, \"reasoning\": \"...\"}}";

/// Inserts the two baseline variants if the prompt table is empty.
pub fn seed_initial_prompts(db: &DbPool) -> crate::errors::AgentResult<()> {
    if !store::get_active_prompts(db, None)?.is_empty() {
        return Ok(());
    }

    for (version, template) in [("v1-baseline", PROMPT_V1), ("v2-cot", PROMPT_V2)] {
        store::upsert_prompt_experiment(
            db,
            &PromptExperimentRow {
                prompt_version: version.to_string(),
                domain: None,
                prompt_template: template.to_string(),
                n_trials: 0,
                n_wins: 0,
                mean_brier: None,
                active: true,
            },
        )?;
    }
    tracing::info!("prompt evolver: seeded 2 initial variants");
    Ok(())
}

/// Picks a random active prompt for `domain`, falling back to global
/// (domain-less) variants, and finally to the v1 baseline if the table is
/// somehow empty.
pub fn get_active_prompt(db: &DbPool, domain: Option<&str>) -> crate::errors::AgentResult<(String, String)> {
    let mut prompts = store::get_active_prompts(db, domain)?;
    if prompts.is_empty() {
        prompts = store::get_active_prompts(db, None)?;
    }
    if prompts.is_empty() {
        return Ok(("v1-baseline".to_string(), PROMPT_V1.to_string()));
    }

    let idx = rand::random::<usize>() % prompts.len();
    let chosen = prompts.swap_remove(idx);
    Ok((chosen.prompt_version, chosen.prompt_template))
}

/// Evaluates every active variant for `domain` against recent outcomes,
/// retires the ones trailing the best by more than `RETIRE_BRIER_GAP`, and
/// asks the evolver model to draft a replacement if a slot opened up.
pub async fn run_prompt_tournament(
    client: &reqwest::Client,
    db: &DbPool,
    config: &AgentConfig,
    domain: Option<&str>,
) -> crate::errors::AgentResult<()> {
    let since = (chrono::Utc::now() - chrono::Duration::days(LOOKBACK_DAYS)).to_rfc3339();
    let outcomes = store::get_outcomes_since(db, &since)?;

    let mut pv_briers: HashMap<String, Vec<f64>> = HashMap::new();
    for o in &outcomes {
        if domain.is_some_and(|d| d != o.domain) {
            continue;
        }
        pv_briers.entry(o.prompt_version.clone()).or_default().push(o.brier);
    }

    let active = store::get_active_prompts(db, domain)?;
    let mut best_brier: Option<f64> = None;

    for p in &active {
        let Some(briers) = pv_briers.get(&p.prompt_version) else { continue };
        if (briers.len() as i64) < config.prompt_tournament_min_trials {
            continue;
        }
        let mean_b = briers.iter().sum::<f64>() / briers.len() as f64;
        store::upsert_prompt_experiment(
            db,
            &PromptExperimentRow { n_trials: briers.len() as i64, mean_brier: Some(mean_b), ..p.clone() },
        )?;
        if best_brier.is_none_or(|b| mean_b < b) {
            best_brier = Some(mean_b);
            tracing::info!(prompt_version = %p.prompt_version, mean_b, "prompt tournament: best so far");
        }
    }

    let Some(best) = best_brier else {
        tracing::info!(?domain, "prompt tournament: insufficient data for any variant");
        return Ok(());
    };

    for p in &active {
        let Some(briers) = pv_briers.get(&p.prompt_version) else { continue };
        if (briers.len() as i64) < config.prompt_tournament_min_trials {
            continue;
        }
        let mean_b = briers.iter().sum::<f64>() / briers.len() as f64;
        if mean_b - best > RETIRE_BRIER_GAP {
            store::retire_prompt(db, &p.prompt_version)?;
            tracing::info!(prompt_version = %p.prompt_version, mean_b, best, "prompt tournament: retiring variant");
        }
    }

    let remaining = store::get_active_prompts(db, domain)?;
    if remaining.len() < MAX_VARIANTS_PER_DOMAIN {
        if let Some(worst) = worst_prompt(&active, &pv_briers) {
            generate_new_variant(client, db, config, &worst, domain).await?;
        }
    }

    Ok(())
}

fn worst_prompt(active: &[PromptExperimentRow], pv_briers: &HashMap<String, Vec<f64>>) -> Option<PromptExperimentRow> {
    active
        .iter()
        .filter_map(|p| {
            let briers = pv_briers.get(&p.prompt_version)?;
            if briers.is_empty() {
                return None;
            }
            let mean_b = briers.iter().sum::<f64>() / briers.len() as f64;
            Some((mean_b, p))
        })
        .max_by(|a, b| a.0.total_cmp(&b.0))
        .map(|(_, p)| p.clone())
}

async fn generate_new_variant(
    client: &reqwest::Client,
    db: &DbPool,
    config: &AgentConfig,
    worst: &PromptExperimentRow,
    domain: Option<&str>,
) -> crate::errors::AgentResult<()> {
    let system = "You are an expert at writing calibrated forecasting prompts for prediction markets. \
        Your goal is to improve a prompt that has been performing poorly (high Brier score).";
    let user = format!(
        "The following prediction market forecasting prompt has been underperforming:\n\n---\n{}\n---\n\n\
        Mean Brier score: {}\nDomain: {}\n\n\
        Please write an improved version that:\n\
        1. Reduces overconfidence / underconfidence\n\
        2. Better guides the forecaster to consider base rates\n\
        3. Explicitly guards against recency bias and rumor anchoring\n\
        4. Keeps the JSON output format: {{\"probability\": <0-100>, \"reasoning\": \"...\"}}\n\n\
        Output ONLY the new prompt template (no explanation). Use {{question}}, {{domain}}, {{news_context}}, {{market_price}} as placeholders.",
        worst.prompt_template,
        worst.mean_brier.map(|b| format!("{b:.3}")).unwrap_or_else(|| "unknown".to_string()),
        domain.unwrap_or("all"),
    );

    let new_template = match call_evolver(client, config, system, &user).await {
        Some(t) if !t.trim().is_empty() => t,
        _ => return Ok(()),
    };

    let mut hasher = Sha256::new();
    hasher.update(new_template.as_bytes());
    let hash = hex::encode(hasher.finalize());
    let new_version = format!("v-evolved-{}", &hash[..8]);

    store::upsert_prompt_experiment(
        db,
        &PromptExperimentRow {
            prompt_version: new_version.clone(),
            domain: domain.map(str::to_string),
            prompt_template: new_template,
            n_trials: 0,
            n_wins: 0,
            mean_brier: None,
            active: true,
        },
    )?;
    tracing::info!(prompt_version = %new_version, ?domain, "prompt evolver: created new variant");
    Ok(())
}

async fn call_evolver(client: &reqwest::Client, config: &AgentConfig, system: &str, user: &str) -> Option<String> {
    if !config.openai_api_key.is_empty() && config.prompt_evolver_model.contains("gpt") {
        #[derive(serde::Serialize)]
        struct Req<'a> {
            model: &'a str,
            max_tokens: u32,
            temperature: f64,
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
                model: &config.prompt_evolver_model,
                max_tokens: 800,
                temperature: 0.7,
                messages: vec![
                    Msg { role: "system", content: system },
                    Msg { role: "user", content: user },
                ],
            })
            .send()
            .await
            .ok()?
            .json()
            .await
            .ok()?;
        return resp.choices.into_iter().next()?.message.content;
    }

    if !config.anthropic_api_key.is_empty() {
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
        }
        #[derive(serde::Deserialize)]
        struct Block {
            text: Option<String>,
        }

        let model = if config.prompt_evolver_model.contains("claude") {
            config.prompt_evolver_model.as_str()
        } else {
            "claude-sonnet-4-6"
        };
        let resp: Resp = client
            .post("https://api.anthropic.com/v1/messages")
            .header("x-api-key", &config.anthropic_api_key)
            .header("anthropic-version", "2023-06-01")
            .json(&Req { model, max_tokens: 800, system, messages: vec![Msg { role: "user", content: user }] })
            .send()
            .await
            .ok()?
            .json()
            .await
            .ok()?;
        return resp.content.into_iter().find_map(|b| b.text);
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn worst_prompt_picks_highest_mean_brier() {
        let rows = vec![
            PromptExperimentRow {
                prompt_version: "a".into(),
                domain: None,
                prompt_template: String::new(),
                n_trials: 0,
                n_wins: 0,
                mean_brier: None,
                active: true,
            },
            PromptExperimentRow {
                prompt_version: "b".into(),
                domain: None,
                prompt_template: String::new(),
                n_trials: 0,
                n_wins: 0,
                mean_brier: None,
                active: true,
            },
        ];
        let mut briers = HashMap::new();
        briers.insert("a".to_string(), vec![0.1, 0.2]);
        briers.insert("b".to_string(), vec![0.3, 0.3]);
        let worst = worst_prompt(&rows, &briers).unwrap();
        assert_eq!(worst.prompt_version, "b");
    }
}
