use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{Error, Result};

pub const MAX_EXTERNAL_HITS: usize = 5;

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct ExternalHit {
	pub title: String,
	pub url: String,
	pub snippet: String,
}

/// Queries the configured external search provider. At most
/// `MAX_EXTERNAL_HITS` hits are returned; failures bubble up so the
/// retrieval pipeline can degrade to local results.
pub async fn search(cfg: &loom_config::Search, query: &str) -> Result<Vec<ExternalHit>> {
	if cfg.external_provider == "local" {
		return Ok(local_hits(query));
	}

	let client = Client::builder().timeout(Duration::from_secs(cfg.timeout_s)).build()?;
	let url = format!("{}/search", cfg.external_api_base.trim_end_matches('/'));
	let body = serde_json::json!({ "query": query, "limit": MAX_EXTERNAL_HITS });
	let res = client
		.post(url)
		.headers(crate::auth_headers(&cfg.external_api_key)?)
		.json(&body)
		.send()
		.await?;
	let json: Value = res.error_for_status()?.json().await?;

	parse_search_response(json)
}

fn parse_search_response(json: Value) -> Result<Vec<ExternalHit>> {
	let results =
		json.get("results").or_else(|| json.get("items")).and_then(|v| v.as_array()).ok_or_else(
			|| Error::InvalidResponse {
				message: "External search response is missing results array.".to_string(),
			},
		)?;
	let mut hits = Vec::new();

	for item in results.iter().take(MAX_EXTERNAL_HITS) {
		let title = item.get("title").and_then(|v| v.as_str()).unwrap_or_default();
		let url = item
			.get("url")
			.or_else(|| item.get("link"))
			.and_then(|v| v.as_str())
			.unwrap_or_default();
		let snippet = item
			.get("snippet")
			.or_else(|| item.get("description"))
			.and_then(|v| v.as_str())
			.unwrap_or_default();

		if title.is_empty() || url.is_empty() {
			continue;
		}

		hits.push(ExternalHit {
			title: title.to_string(),
			url: url.to_string(),
			snippet: snippet.to_string(),
		});
	}

	Ok(hits)
}

/// Deterministic stand-in used in tests and offline runs.
fn local_hits(query: &str) -> Vec<ExternalHit> {
	let slug: String = query
		.chars()
		.map(|ch| if ch.is_alphanumeric() { ch.to_ascii_lowercase() } else { '-' })
		.collect();

	(1..=3)
		.map(|rank| ExternalHit {
			title: format!("{query}: external result {rank}"),
			url: format!("https://example.com/{slug}/{rank}"),
			snippet: format!("Stub coverage of {query}, entry {rank}."),
		})
		.collect()
}
