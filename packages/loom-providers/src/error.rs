#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error("Provider request failed: {0}")]
	Http(#[from] reqwest::Error),
	#[error("Invalid provider response: {message}")]
	InvalidResponse { message: String },
	#[error("Provider timed out after {timeout_ms} ms.")]
	Timeout { timeout_ms: u64 },
}
