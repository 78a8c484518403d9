use std::{collections::HashSet, time::Duration};

use reqwest::Client;
use serde_json::Value;

use crate::{Error, Result};

/// Scores (query, passage) pairs with the configured cross-encoder.
/// Scores are raw model outputs (unbounded); callers sort on them and
/// calibrate separately for display. Output aligns with `passages` by
/// index; batches honor `cfg.batch_size`.
pub async fn rerank(
	cfg: &loom_config::Reranker,
	query: &str,
	passages: &[String],
) -> Result<Vec<f32>> {
	if passages.is_empty() {
		return Ok(Vec::new());
	}
	if cfg.provider == "local" {
		return Ok(local_rerank(query, passages));
	}

	let client = Client::builder().timeout(Duration::from_millis(cfg.timeout_ms)).build()?;
	let mut out = Vec::with_capacity(passages.len());

	for batch in passages.chunks(cfg.batch_size.max(1)) {
		out.extend(rerank_batch_http(cfg, &client, query, batch).await?);
	}

	Ok(out)
}

async fn rerank_batch_http(
	cfg: &loom_config::Reranker,
	client: &Client,
	query: &str,
	docs: &[String],
) -> Result<Vec<f32>> {
	let url = format!("{}/rerank", cfg.api_base.trim_end_matches('/'));
	let body = serde_json::json!({ "model": cfg.model_id, "query": query, "documents": docs });
	let res = client
		.post(url)
		.headers(crate::auth_headers(&cfg.api_key)?)
		.json(&body)
		.send()
		.await?;
	let json: Value = res.error_for_status()?.json().await?;

	parse_rerank_response(json, docs.len())
}

/// Token-overlap scoring: the fraction of query tokens present in the
/// passage. Deterministic stand-in for a cross-encoder in tests.
fn local_rerank(query: &str, docs: &[String]) -> Vec<f32> {
	let query_tokens = tokenize_ascii_alnum(query);

	if query_tokens.is_empty() {
		return vec![0.0; docs.len()];
	}

	let denom = query_tokens.len() as f32;
	let mut scores = Vec::with_capacity(docs.len());

	for doc in docs {
		let doc_tokens = tokenize_ascii_alnum(doc);
		let matched = query_tokens.intersection(&doc_tokens).count() as f32;

		scores.push(matched / denom);
	}

	scores
}

fn tokenize_ascii_alnum(text: &str) -> HashSet<String> {
	let mut normalized = String::with_capacity(text.len());

	for ch in text.chars() {
		if ch.is_ascii_alphanumeric() {
			normalized.push(ch.to_ascii_lowercase());
		} else {
			normalized.push(' ');
		}
	}

	let mut out = HashSet::new();

	for token in normalized.split_whitespace() {
		if token.len() < 2 {
			continue;
		}

		out.insert(token.to_string());
	}

	out
}

fn parse_rerank_response(json: Value, doc_count: usize) -> Result<Vec<f32>> {
	let mut scores = vec![0.0f32; doc_count];
	let results =
		json.get("results").or_else(|| json.get("data")).and_then(|v| v.as_array()).ok_or_else(
			|| Error::InvalidResponse {
				message: "Rerank response is missing results array.".to_string(),
			},
		)?;

	for item in results {
		let index = item.get("index").and_then(|v| v.as_u64()).ok_or_else(|| {
			Error::InvalidResponse { message: "Rerank result missing index.".to_string() }
		})? as usize;
		let score = item
			.get("relevance_score")
			.or_else(|| item.get("score"))
			.and_then(|v| v.as_f64())
			.ok_or_else(|| Error::InvalidResponse {
				message: "Rerank result missing score.".to_string(),
			})? as f32;

		if index < scores.len() {
			scores[index] = score;
		}
	}

	Ok(scores)
}
