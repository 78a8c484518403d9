use std::time::Duration;

use futures_util::{Stream, StreamExt, stream};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

#[derive(Clone, Debug, Serialize)]
pub struct GenerateParams {
	pub temperature: f32,
	pub max_tokens: u32,
	pub stop: Vec<String>,
}
impl GenerateParams {
	pub fn from_config(cfg: &loom_config::Llm) -> Self {
		Self { temperature: cfg.temperature, max_tokens: cfg.max_tokens, stop: Vec::new() }
	}
}

#[derive(Debug, Serialize)]
struct OllamaRequest<'a> {
	model: &'a str,
	prompt: &'a str,
	stream: bool,
	options: OllamaOptions<'a>,
}

#[derive(Debug, Serialize)]
struct OllamaOptions<'a> {
	temperature: f32,
	num_predict: u32,
	#[serde(skip_serializing_if = "Option::is_none")]
	stop: Option<&'a [String]>,
}

#[derive(Debug, Deserialize)]
struct OllamaChunk {
	#[serde(default)]
	response: String,
	#[serde(default)]
	done: bool,
}

pub async fn generate(
	cfg: &loom_config::Llm,
	prompt: &str,
	params: &GenerateParams,
) -> Result<String> {
	let client = build_client(cfg)?;
	let body = request_body(cfg, prompt, params, false);
	let res = client.post(generate_url(cfg)).json(&body).send().await?;
	let chunk: OllamaChunk = res.error_for_status()?.json().await?;

	Ok(chunk.response)
}

/// Token stream over the model's NDJSON output. Dropping the returned
/// stream aborts the underlying request.
pub async fn generate_stream(
	cfg: &loom_config::Llm,
	prompt: &str,
	params: &GenerateParams,
) -> Result<impl Stream<Item = Result<String>> + Send + Unpin + use<>> {
	let client = build_client(cfg)?;
	let body = request_body(cfg, prompt, params, true);
	let res = client.post(generate_url(cfg)).json(&body).send().await?.error_for_status()?;
	let bytes = res.bytes_stream().map(|chunk| chunk.map(|bytes| bytes.to_vec())).boxed();
	let state = StreamState { bytes, buffer: String::new(), pending: Vec::new(), finished: false };

	Ok(Box::pin(stream::unfold(state, |mut state| async move {
		loop {
			if !state.pending.is_empty() {
				let token = state.pending.remove(0);

				return Some((Ok(token), state));
			}
			if state.finished {
				return None;
			}

			match state.bytes.next().await {
				Some(Ok(chunk)) => {
					state.buffer.push_str(&String::from_utf8_lossy(&chunk));

					drain_lines(&mut state);
				},
				Some(Err(err)) => {
					state.finished = true;

					return Some((Err(Error::Http(err)), state));
				},
				None => {
					state.finished = true;

					// A final line without a trailing newline still counts.
					if !state.buffer.trim().is_empty() {
						let line = std::mem::take(&mut state.buffer);

						push_line_tokens(&mut state, line.trim());
					}
				},
			}
		}
	})))
}

struct StreamState {
	bytes: futures_util::stream::BoxStream<'static, reqwest::Result<Vec<u8>>>,
	buffer: String,
	pending: Vec<String>,
	finished: bool,
}

fn drain_lines(state: &mut StreamState) {
	while let Some(pos) = state.buffer.find('\n') {
		let line = state.buffer[..pos].trim().to_string();

		state.buffer.drain(..=pos);

		if line.is_empty() {
			continue;
		}

		push_line_tokens(state, &line);

		if state.finished {
			return;
		}
	}
}

fn push_line_tokens(state: &mut StreamState, line: &str) {
	match serde_json::from_str::<OllamaChunk>(line) {
		Ok(chunk) => {
			if !chunk.response.is_empty() {
				state.pending.push(chunk.response);
			}
			if chunk.done {
				state.finished = true;
			}
		},
		Err(err) => {
			tracing::warn!(error = %err, "Skipping unparsable LLM stream line.");
		},
	}
}

fn build_client(cfg: &loom_config::Llm) -> Result<reqwest::Client> {
	Ok(reqwest::Client::builder().timeout(Duration::from_secs(cfg.timeout_s)).build()?)
}

fn generate_url(cfg: &loom_config::Llm) -> String {
	format!("{}/api/generate", cfg.endpoint.trim_end_matches('/'))
}

fn request_body<'a>(
	cfg: &'a loom_config::Llm,
	prompt: &'a str,
	params: &'a GenerateParams,
	stream: bool,
) -> OllamaRequest<'a> {
	OllamaRequest {
		model: &cfg.model_id,
		prompt,
		stream,
		options: OllamaOptions {
			temperature: params.temperature,
			num_predict: params.max_tokens,
			stop: if params.stop.is_empty() { None } else { Some(&params.stop) },
		},
	}
}
