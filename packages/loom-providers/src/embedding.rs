use std::time::Duration;

use reqwest::Client;
use serde_json::Value;

use crate::{Error, Result, XorShift64, fnv1a};

/// Embeds a batch of texts, honoring `cfg.batch_size` for the upstream
/// calls. Output order matches input order; every vector has
/// `cfg.dimensions` components. Vectors are NOT normalized; distances in
/// the vector store depend on that.
pub async fn batch_embed(cfg: &loom_config::Embedder, texts: &[String]) -> Result<Vec<Vec<f32>>> {
	if texts.is_empty() {
		return Ok(Vec::new());
	}
	if cfg.provider == "local-hash" {
		return Ok(texts.iter().map(|text| local_hash_embed(text, cfg.dimensions)).collect());
	}

	let client = Client::builder().timeout(Duration::from_millis(cfg.timeout_ms)).build()?;
	let mut out = Vec::with_capacity(texts.len());

	for batch in texts.chunks(cfg.batch_size.max(1)) {
		out.extend(embed_batch_http(cfg, &client, batch).await?);
	}

	if out.len() != texts.len() {
		return Err(Error::InvalidResponse {
			message: format!("Expected {} embeddings, got {}.", texts.len(), out.len()),
		});
	}

	Ok(out)
}

pub async fn embed_one(cfg: &loom_config::Embedder, text: &str) -> Result<Vec<f32>> {
	let vectors = batch_embed(cfg, std::slice::from_ref(&text.to_string())).await?;

	vectors.into_iter().next().ok_or_else(|| Error::InvalidResponse {
		message: "Embedding provider returned no vectors.".to_string(),
	})
}

async fn embed_batch_http(
	cfg: &loom_config::Embedder,
	client: &Client,
	texts: &[String],
) -> Result<Vec<Vec<f32>>> {
	let url = format!("{}/embeddings", cfg.api_base.trim_end_matches('/'));
	let body = serde_json::json!({
		"model": cfg.model_id,
		"input": texts,
		"dimensions": cfg.dimensions,
	});
	let res = client
		.post(url)
		.headers(crate::auth_headers(&cfg.api_key)?)
		.json(&body)
		.send()
		.await?;
	let json: Value = res.error_for_status()?.json().await?;

	parse_embedding_response(json, cfg.dimensions)
}

fn parse_embedding_response(json: Value, dimensions: usize) -> Result<Vec<Vec<f32>>> {
	let data = json.get("data").and_then(|v| v.as_array()).ok_or_else(|| {
		Error::InvalidResponse { message: "Embedding response is missing data array.".to_string() }
	})?;

	let mut indexed: Vec<(usize, Vec<f32>)> = Vec::with_capacity(data.len());
	for (fallback_index, item) in data.iter().enumerate() {
		let index = item
			.get("index")
			.and_then(|v| v.as_u64())
			.map(|v| v as usize)
			.unwrap_or(fallback_index);
		let embedding = item.get("embedding").and_then(|v| v.as_array()).ok_or_else(|| {
			Error::InvalidResponse { message: "Embedding item missing embedding array.".to_string() }
		})?;
		let mut vec = Vec::with_capacity(embedding.len());
		for value in embedding {
			let number = value.as_f64().ok_or_else(|| Error::InvalidResponse {
				message: "Embedding value must be numeric.".to_string(),
			})?;

			vec.push(number as f32);
		}

		if vec.len() != dimensions {
			return Err(Error::InvalidResponse {
				message: format!("Embedding dimension {} does not match {dimensions}.", vec.len()),
			});
		}

		indexed.push((index, vec));
	}

	indexed.sort_by_key(|(index, _)| *index);

	Ok(indexed.into_iter().map(|(_, vec)| vec).collect())
}

/// Deterministic bag-of-tokens embedding. Each token seeds a xorshift
/// stream whose values are summed into the output vector, so texts that
/// share tokens land near each other under L2. Good enough to exercise
/// the whole retrieval path hermetically.
fn local_hash_embed(text: &str, dimensions: usize) -> Vec<f32> {
	let mut vec = vec![0.0_f32; dimensions];
	let mut token_count = 0_usize;

	for token in text.split(|ch: char| !ch.is_alphanumeric()) {
		if token.len() < 2 {
			continue;
		}

		token_count += 1;

		let seed = fnv1a(token.to_lowercase().as_bytes());
		let mut rng = XorShift64::new(seed);

		for slot in vec.iter_mut() {
			*slot += rng.next_f32() * 2.0 - 1.0;
		}
	}

	if token_count > 1 {
		let scale = 1.0 / token_count as f32;

		for slot in vec.iter_mut() {
			*slot *= scale;
		}
	}

	vec
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn parses_embeddings_in_index_order() {
		let json = serde_json::json!({
			"data": [
				{ "index": 1, "embedding": [2.0, 3.0] },
				{ "index": 0, "embedding": [0.5, 1.5] }
			]
		});
		let parsed = parse_embedding_response(json, 2).expect("parse failed");

		assert_eq!(parsed.len(), 2);
		assert_eq!(parsed[0], vec![0.5, 1.5]);
		assert_eq!(parsed[1], vec![2.0, 3.0]);
	}

	#[test]
	fn dimension_mismatch_is_rejected() {
		let json = serde_json::json!({
			"data": [{ "index": 0, "embedding": [1.0, 2.0, 3.0] }]
		});

		assert!(parse_embedding_response(json, 2).is_err());
	}

	#[test]
	fn local_embeddings_are_deterministic() {
		let a = local_hash_embed("cats purr on the windowsill", 384);
		let b = local_hash_embed("cats purr on the windowsill", 384);

		assert_eq!(a.len(), 384);
		assert_eq!(a, b);
	}

	#[test]
	fn local_embeddings_separate_unrelated_texts() {
		let query = local_hash_embed("feline cat whiskers", 384);
		let related = local_hash_embed("the cat sat with feline grace", 384);
		let unrelated = local_hash_embed("quarterly bond yields rose", 384);

		let related_distance = l2(&query, &related);
		let unrelated_distance = l2(&query, &unrelated);

		assert!(related_distance < unrelated_distance);
	}

	fn l2(a: &[f32], b: &[f32]) -> f32 {
		a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum::<f32>().sqrt()
	}
}
