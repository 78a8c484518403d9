//! Recursive character splitter. Splits on paragraph breaks first, then
//! line breaks, then spaces, then single characters, and merges the
//! pieces into overlapping chunks. Every input character lands in at
//! least one chunk; no chunk exceeds `target_chars + overlap_chars`.

const SEPARATORS: &[&str] = &["\n\n", "\n", " "];

#[derive(Clone, Debug)]
pub struct ChunkingConfig {
	pub target_chars: usize,
	pub overlap_chars: usize,
}
impl Default for ChunkingConfig {
	fn default() -> Self {
		Self { target_chars: 1_000, overlap_chars: 200 }
	}
}

#[derive(Clone, Debug, PartialEq)]
pub struct Chunk {
	pub ordinal: u32,
	pub text: String,
}

pub fn split_text(text: &str, cfg: &ChunkingConfig) -> Vec<Chunk> {
	if text.is_empty() {
		return Vec::new();
	}

	let target = cfg.target_chars.max(1);
	let overlap = cfg.overlap_chars.min(target.saturating_sub(1));
	let pieces = split_recursive(text, SEPARATORS, target);
	let merged = merge_pieces(&pieces, target, overlap);

	merged
		.into_iter()
		.enumerate()
		.map(|(index, text)| Chunk { ordinal: index as u32, text })
		.collect()
}

/// Splits with the first separator that keeps pieces under the target,
/// recursing into oversized pieces with the remaining separators. The
/// base case splits into single characters, which can never be
/// oversized.
fn split_recursive(text: &str, separators: &[&str], target: usize) -> Vec<String> {
	let Some((separator, rest)) = separators.split_first() else {
		return text.chars().map(|ch| ch.to_string()).collect();
	};
	let mut out = Vec::new();

	for piece in split_keeping_separator(text, separator) {
		if piece.chars().count() <= target {
			out.push(piece);
		} else {
			out.extend(split_recursive(&piece, rest, target));
		}
	}

	out
}

/// Splits on `separator`, keeping the separator attached to the end of
/// the preceding piece so that concatenating all pieces reproduces the
/// input exactly.
fn split_keeping_separator(text: &str, separator: &str) -> Vec<String> {
	let mut out = Vec::new();
	let mut rest = text;

	while let Some(at) = rest.find(separator) {
		let end = at + separator.len();

		out.push(rest[..end].to_string());

		rest = &rest[end..];
	}

	if !rest.is_empty() {
		out.push(rest.to_string());
	}

	out
}

fn merge_pieces(pieces: &[String], target: usize, overlap: usize) -> Vec<String> {
	let mut chunks = Vec::new();
	let mut window: Vec<&str> = Vec::new();
	let mut window_chars = 0_usize;

	for piece in pieces {
		let piece_chars = piece.chars().count();

		if window_chars + piece_chars > target && !window.is_empty() {
			chunks.push(window.concat());

			// Retain a tail of the window as overlap for the next chunk.
			while window_chars > overlap
				|| (window_chars + piece_chars > target && window_chars > 0)
			{
				let front = window.remove(0);

				window_chars -= front.chars().count();
			}
		}

		window.push(piece.as_str());

		window_chars += piece_chars;
	}

	if !window.is_empty() {
		chunks.push(window.concat());
	}

	chunks
}
