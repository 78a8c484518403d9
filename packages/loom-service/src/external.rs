use futures_util::StreamExt;
use serde::Serialize;

use loom_providers::{external::ExternalHit, llm::GenerateParams};

use crate::{
	LoomService, Result,
	progress::{EventSink, SearchEvent},
};

/// How many external hits get an LLM synthesis pass.
const MAX_SUMMARIZED_HITS: usize = 3;
const SYNTHESIS_PROMPT: &str = "\
You are summarizing a web search result for a personal news knowledge base.
Write a concise two-sentence summary of what the page covers, based only on
the title and snippet below. Do not speculate beyond them.

Title: {title}
Snippet: {snippet}

Summary:";

#[derive(Clone, Debug, Serialize)]
pub struct ExternalResult {
	pub title: String,
	pub url: String,
	pub snippet: String,
	pub ai_summary: Option<String>,
}

impl LoomService {
	/// Queries the external provider and streams LLM syntheses for the
	/// top hits. Provider failures are reported by the caller as
	/// `external_unavailable`; LLM failures only cost the summary.
	pub(crate) async fn external_search(
		&self,
		query: &str,
		sink: &EventSink<SearchEvent>,
	) -> Result<Vec<ExternalResult>> {
		let hits = self.providers.external.search(&self.cfg.search, query).await?;
		let mut results: Vec<ExternalResult> = hits.into_iter().map(external_result).collect();

		if !results.is_empty() {
			sink.emit(SearchEvent::Progress {
				stage: crate::progress::SearchStage::Summarizing,
				percentage: 90,
				message: "Summarizing external results.".to_string(),
			})
			.await?;
		}

		for (index, result) in results.iter_mut().take(MAX_SUMMARIZED_HITS).enumerate() {
			match self.summarize_hit(index, result, sink).await {
				Ok(summary) => {
					result.ai_summary = Some(summary);
				},
				Err(crate::Error::Canceled) => return Err(crate::Error::Canceled),
				Err(err) => {
					tracing::warn!(url = %result.url, error = %err, "External hit synthesis failed.");
				},
			}

			sink.emit(SearchEvent::SummaryEnd { result_index: index }).await?;
		}

		Ok(results)
	}

	async fn summarize_hit(
		&self,
		index: usize,
		result: &ExternalResult,
		sink: &EventSink<SearchEvent>,
	) -> Result<String> {
		let prompt = SYNTHESIS_PROMPT
			.replace("{title}", &result.title)
			.replace("{snippet}", &result.snippet);
		let params = GenerateParams::from_config(&self.cfg.llm);
		let mut stream = self.providers.llm.generate_stream(&self.cfg.llm, &prompt, &params).await?;
		let mut summary = String::new();

		while let Some(token) = stream.next().await {
			let token = token?;

			summary.push_str(&token);

			sink.emit(SearchEvent::SummaryToken { result_index: index, token, done: false })
				.await?;
		}

		Ok(summary.trim().to_string())
	}
}

fn external_result(hit: ExternalHit) -> ExternalResult {
	ExternalResult { title: hit.title, url: hit.url, snippet: hit.snippet, ai_summary: None }
}
