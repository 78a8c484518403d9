/// Collapses whitespace runs to single spaces without changing case.
pub fn collapse_whitespace(text: &str) -> String {
	let mut out = String::with_capacity(text.len());
	let mut pending_space = false;

	for ch in text.chars() {
		if ch.is_whitespace() {
			pending_space = !out.is_empty();

			continue;
		}
		if pending_space {
			out.push(' ');

			pending_space = false;
		}

		out.push(ch);
	}

	out
}

/// Truncates at a char boundary, appending an ellipsis when cut.
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
	if text.chars().count() <= max_chars {
		return text.to_string();
	}

	let cut: String = text.chars().take(max_chars.saturating_sub(3)).collect();

	format!("{cut}...")
}

/// Case-folded tag normalization; empty or too-short tags are dropped by
/// callers.
pub fn normalize_tag(tag: &str) -> String {
	tag.trim().to_lowercase()
}

const STOP_WORDS: &[&str] = &[
	"the", "a", "an", "and", "or", "but", "in", "on", "at", "to", "for", "of", "with", "by",
	"from", "up", "about", "into", "through", "during", "is", "are", "was", "were", "be", "been",
	"being", "have", "has", "had", "do", "does", "did", "will", "would", "could", "should", "may",
	"might", "this", "that", "these", "those", "it", "its", "his", "her", "their", "our", "your",
];

/// Frequency-based keyword extraction used for auto-tagging crawled
/// articles. Only words seen more than once survive.
pub fn extract_keywords(text: &str, max: usize) -> Vec<String> {
	let mut frequency: Vec<(String, usize)> = Vec::new();

	for raw in text.split(|ch: char| !ch.is_alphanumeric()) {
		if raw.len() < 3 {
			continue;
		}

		let word = raw.to_lowercase();

		if STOP_WORDS.contains(&word.as_str()) {
			continue;
		}
		if let Some(entry) = frequency.iter_mut().find(|(seen, _)| *seen == word) {
			entry.1 += 1;
		} else {
			frequency.push((word, 1));
		}
	}

	frequency.retain(|(_, count)| *count > 1);
	frequency.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

	frequency.into_iter().take(max).map(|(word, _)| word).collect()
}
