use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Collapses whitespace runs to single spaces, trims, and lowercases.
/// Two articles that differ only in markup whitespace or casing hash
/// identically.
pub fn normalize_content(content: &str) -> String {
	let mut out = String::with_capacity(content.len());
	let mut pending_space = false;

	for ch in content.chars() {
		if ch.is_whitespace() {
			pending_space = !out.is_empty();

			continue;
		}
		if pending_space {
			out.push(' ');

			pending_space = false;
		}

		for lower in ch.to_lowercase() {
			out.push(lower);
		}
	}

	out
}

pub fn content_hash(content: &str) -> String {
	let normalized = normalize_content(content);
	let digest = Sha256::digest(normalized.as_bytes());

	hex::encode(digest)
}

/// Stable per-chunk identifier; the same document always yields the same
/// chunk ids in the same order.
pub fn chunk_id(document_id: Uuid, ordinal: u32) -> String {
	let digest = Sha256::digest(format!("{document_id}:{ordinal}").as_bytes());

	hex::encode(digest)
}
