pub mod embedding;
pub mod external;
pub mod llm;
pub mod rerank;

mod error;

pub use error::Error;

use reqwest::header::{AUTHORIZATION, HeaderMap};

pub type Result<T, E = Error> = std::result::Result<T, E>;

pub(crate) fn auth_headers(api_key: &str) -> Result<HeaderMap> {
	let mut headers = HeaderMap::new();

	if !api_key.trim().is_empty() {
		headers.insert(
			AUTHORIZATION,
			format!("Bearer {api_key}")
				.parse()
				.map_err(|_| Error::InvalidResponse { message: "Invalid api key.".to_string() })?,
		);
	}

	Ok(headers)
}

/// Deterministic xorshift generator shared by the local providers; keeps
/// hermetic tests free of model downloads.
pub(crate) struct XorShift64 {
	state: u64,
}
impl XorShift64 {
	pub(crate) fn new(seed: u64) -> Self {
		let state = if seed == 0 { 0x4D59_5DF4_D0F3_3173 } else { seed };

		Self { state }
	}

	pub(crate) fn next_u64(&mut self) -> u64 {
		let mut x = self.state;
		x ^= x << 13;
		x ^= x >> 7;
		x ^= x << 17;
		self.state = x;

		x
	}

	pub(crate) fn next_f32(&mut self) -> f32 {
		// Map to [0, 1). Keep 24 bits of precision for a stable f32.
		let bits = (self.next_u64() >> 40) as u32;

		(bits as f32) / ((1u32 << 24) as f32)
	}
}

pub(crate) fn fnv1a(bytes: &[u8]) -> u64 {
	let mut hash = 0xCBF2_9CE4_8422_2325_u64;

	for &byte in bytes {
		hash ^= byte as u64;
		hash = hash.wrapping_mul(0x0000_0100_0000_01B3);
	}

	hash
}
