use std::{
	collections::{HashMap, HashSet},
	time::{Duration, Instant},
};

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use loom_domain::{
	calibrate::calibrate_rerank_scores,
	states::IndexedState,
};
use loom_jobs::Task;
use loom_storage::{documents, models::DocumentRow, search_records, tags, vector::index::SearchHit};

use crate::{
	Error, LoomService, Result,
	documents::parse_datetime_field,
	external::ExternalResult,
	progress::{EventSink, SearchEvent, SearchStage},
};

pub const MAX_LIMIT: usize = 100;

#[derive(Clone, Debug, Deserialize)]
pub struct SearchRequest {
	pub query: String,
	pub limit: Option<usize>,
	#[serde(default)]
	pub include_external: bool,
	#[serde(default)]
	pub filters: SearchFilters,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct SearchFilters {
	pub source_type: Option<String>,
	pub date_from: Option<String>,
	pub date_to: Option<String>,
	#[serde(default)]
	pub tags: Vec<String>,
}
impl SearchFilters {
	fn is_empty(&self) -> bool {
		self.source_type.is_none()
			&& self.date_from.is_none()
			&& self.date_to.is_none()
			&& self.tags.is_empty()
	}
}

#[derive(Clone, Debug, Serialize)]
pub struct SearchResultItem {
	pub document_id: Uuid,
	pub title: String,
	pub summary: Option<String>,
	pub source_url: Option<String>,
	pub source_type: String,
	/// Calibrated display similarity in [0, 1]; ordering follows the raw
	/// reranker scores.
	pub similarity: f32,
	pub tags: Vec<String>,
	#[serde(with = "time::serde::rfc3339::option")]
	pub published_at: Option<OffsetDateTime>,
}

#[derive(Debug, Serialize)]
pub struct SearchMetadata {
	pub request_id: Uuid,
	pub query: String,
	pub results_count: usize,
	pub external_results_count: usize,
	pub elapsed_ms: i64,
}

#[derive(Debug, Serialize)]
pub struct SearchResponse {
	pub results: Vec<SearchResultItem>,
	pub external_results: Vec<ExternalResult>,
	pub metadata: SearchMetadata,
}

impl LoomService {
	/// Runs the full retrieval pipeline, emitting progress into `sink`.
	/// The blocking endpoint passes a discarding sink; the SSE endpoint
	/// passes a channel. Exactly one terminal event is emitted.
	pub async fn search_with_events(
		&self,
		user_id: Uuid,
		req: SearchRequest,
		sink: &EventSink<SearchEvent>,
	) -> Result<SearchResponse> {
		let budget = Duration::from_secs(self.cfg.search.timeout_s);
		let outcome = tokio::time::timeout(budget, self.run_search(user_id, req, sink)).await;
		let outcome = match outcome {
			Ok(inner) => inner,
			Err(_) => Err(Error::Timeout),
		};

		match outcome {
			Ok(response) => Ok(response),
			// The client is gone; nobody is listening for a terminal event.
			Err(Error::Canceled) => Err(Error::Canceled),
			Err(err) => {
				let _ = sink
					.emit(SearchEvent::Error {
						code: err.code().to_string(),
						message: err.to_string(),
					})
					.await;

				Err(err)
			},
		}
	}

	async fn run_search(
		&self,
		user_id: Uuid,
		req: SearchRequest,
		sink: &EventSink<SearchEvent>,
	) -> Result<SearchResponse> {
		let started = Instant::now();
		let query = req.query.trim().to_string();

		if query.is_empty() {
			return Err(Error::validation("query must be non-empty."));
		}

		let limit = req.limit.unwrap_or(self.cfg.search.default_limit);

		if limit == 0 || limit > MAX_LIMIT {
			return Err(Error::validation("limit must be in 1-100."));
		}

		let now = OffsetDateTime::now_utc();
		let search_id =
			search_records::add_search_record(&self.db.pool, user_id, &query, now).await?;

		sink.emit(SearchEvent::Started { query: query.clone(), request_id: search_id }).await?;
		self.progress(sink, SearchStage::Embedding, 10, "Embedding query.").await?;

		let embeddings = self
			.providers
			.embedding
			.batch_embed(&self.cfg.embedder, std::slice::from_ref(&query))
			.await?;
		let query_vec = embeddings.into_iter().next().ok_or_else(|| Error::Dependency {
			message: "Embedding provider returned no vectors.".to_string(),
		})?;

		self.progress(sink, SearchStage::Searching, 30, "Searching vector index.").await?;

		let hits = match self.vectors.search(user_id, &query_vec, limit * 2).await {
			Ok(hits) => hits,
			Err(loom_storage::Error::IndexCorrupt { .. }) => {
				tracing::warn!(%user_id, "Vector index corrupt; scheduling rebuild.");

				self.submit_task(Task::RebuildUserIndex { user_id })?;
				self.progress(
					sink,
					SearchStage::Searching,
					30,
					"Vector index is rebuilding; local results unavailable.",
				)
				.await?;

				Vec::new()
			},
			Err(err) => return Err(err.into()),
		};
		let (candidates, doc_rows, doc_tags) =
			self.filter_candidates(user_id, hits, &req.filters).await?;

		self.progress(sink, SearchStage::Reranking, 55, "Reranking candidates.").await?;

		let ranked = self.rerank_candidates(&query, candidates).await?;
		let collapsed = collapse_by_document(ranked, limit);

		self.progress(sink, SearchStage::Calibrating, 70, "Calibrating scores.").await?;

		let raw_scores: Vec<f32> = collapsed.iter().map(|(_, score)| *score).collect();
		let similarities = calibrate_rerank_scores(&raw_scores, self.cfg.reranker.calibration_k);
		let mut results = Vec::with_capacity(collapsed.len());

		for (index, ((hit, _), similarity)) in collapsed.iter().zip(&similarities).enumerate() {
			let Some(row) = doc_rows.get(&hit.document_id) else {
				continue;
			};
			let item_tags = doc_tags.get(&hit.document_id).cloned().unwrap_or_default();

			sink.emit(SearchEvent::ResultPartial {
				index,
				document_id: row.document_id,
				title: row.title.clone(),
				similarity: *similarity,
				tags: item_tags.clone(),
			})
			.await?;

			results.push(SearchResultItem {
				document_id: row.document_id,
				title: row.title.clone(),
				summary: row.summary.clone(),
				source_url: row.source_url.clone(),
				source_type: row.source_type.clone(),
				similarity: *similarity,
				tags: item_tags,
				published_at: row.published_at,
			});
		}

		let top_similarity = results.first().map(|item| item.similarity).unwrap_or(0.0);
		let trigger_external = req.include_external
			&& (top_similarity < self.cfg.search.external_trigger_threshold
				|| results.len() < self.cfg.search.external_trigger_min_results);
		let mut external_results = Vec::new();

		if trigger_external {
			self.progress(sink, SearchStage::External, 80, "Searching external sources.").await?;

			match self.external_search(&query, sink).await {
				Ok(found) => external_results = found,
				Err(Error::Canceled) => return Err(Error::Canceled),
				Err(err) => {
					tracing::warn!(error = %err, "External search unavailable.");

					sink.emit(SearchEvent::ExternalUnavailable { reason: err.to_string() })
						.await?;
				},
			}
		}

		let elapsed_ms = started.elapsed().as_millis() as i64;

		search_records::finish_search_record(
			&self.db.pool,
			search_id,
			results.len() as i32,
			elapsed_ms,
		)
		.await?;
		sink.emit(SearchEvent::Completed {
			results_count: results.len(),
			external_results_count: external_results.len(),
			elapsed_ms,
		})
		.await?;

		let metadata = SearchMetadata {
			request_id: search_id,
			query,
			results_count: results.len(),
			external_results_count: external_results.len(),
			elapsed_ms,
		};

		Ok(SearchResponse { results, external_results, metadata })
	}

	/// Drops hits whose document is missing, not fully indexed, owned by
	/// another user, or excluded by the post-hoc metadata filters.
	async fn filter_candidates(
		&self,
		user_id: Uuid,
		hits: Vec<SearchHit>,
		filters: &SearchFilters,
	) -> Result<(Vec<SearchHit>, HashMap<Uuid, DocumentRow>, HashMap<Uuid, Vec<String>>)> {
		let doc_ids: Vec<Uuid> = {
			let mut seen = HashSet::new();

			hits.iter().map(|hit| hit.document_id).filter(|id| seen.insert(*id)).collect()
		};
		let rows = documents::load_documents_by_ids(&self.db.pool, user_id, &doc_ids).await?;
		let mut doc_rows: HashMap<Uuid, DocumentRow> =
			rows.into_iter().map(|row| (row.document_id, row)).collect();

		doc_rows.retain(|_, row| row.indexed_state == IndexedState::Indexed.as_str());

		let date_from = parse_datetime_field(filters.date_from.as_deref(), "date_from")?;
		let date_to = parse_datetime_field(filters.date_to.as_deref(), "date_to")?;
		let tag_pairs = tags::tags_for_documents(&self.db.pool, &doc_ids).await?;
		let mut doc_tags: HashMap<Uuid, Vec<String>> = HashMap::new();

		for (doc_id, name) in tag_pairs {
			doc_tags.entry(doc_id).or_default().push(name);
		}

		if !filters.is_empty() {
			let wanted_tags: HashSet<String> =
				filters.tags.iter().map(|tag| tag.trim().to_lowercase()).collect();

			doc_rows.retain(|doc_id, row| {
				if let Some(source_type) = &filters.source_type
					&& &row.source_type != source_type
				{
					return false;
				}

				let effective_date = row.published_at.unwrap_or(row.created_at);

				if let Some(from) = date_from
					&& effective_date < from
				{
					return false;
				}
				if let Some(to) = date_to
					&& effective_date > to
				{
					return false;
				}
				if !wanted_tags.is_empty() {
					let names = doc_tags.get(doc_id);
					let matched = names
						.is_some_and(|names| names.iter().any(|name| wanted_tags.contains(name)));

					if !matched {
						return false;
					}
				}

				true
			});
		}

		let candidates =
			hits.into_iter().filter(|hit| doc_rows.contains_key(&hit.document_id)).collect();

		Ok((candidates, doc_rows, doc_tags))
	}

	async fn rerank_candidates(
		&self,
		query: &str,
		candidates: Vec<SearchHit>,
	) -> Result<Vec<(SearchHit, f32)>> {
		if candidates.is_empty() {
			return Ok(Vec::new());
		}

		let passages: Vec<String> =
			candidates.iter().map(|hit| hit.text_preview.clone()).collect();
		let scores = self.providers.rerank.rerank(&self.cfg.reranker, query, &passages).await?;

		if scores.len() != candidates.len() {
			return Err(Error::Dependency {
				message: "Reranker returned a mismatched score count.".to_string(),
			});
		}

		Ok(candidates.into_iter().zip(scores).collect())
	}

	async fn progress(
		&self,
		sink: &EventSink<SearchEvent>,
		stage: SearchStage,
		percentage: u8,
		message: &str,
	) -> Result<()> {
		sink.emit(SearchEvent::Progress { stage, percentage, message: message.to_string() }).await
	}
}

/// Raw-score descending order with earlier ordinals breaking ties, then
/// one entry per document (its best chunk), truncated to `limit`.
fn collapse_by_document(mut ranked: Vec<(SearchHit, f32)>, limit: usize) -> Vec<(SearchHit, f32)> {
	ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.ordinal.cmp(&b.0.ordinal)));

	let mut seen = HashSet::new();
	let mut out = Vec::with_capacity(limit);

	for (hit, score) in ranked {
		if !seen.insert(hit.document_id) {
			continue;
		}

		out.push((hit, score));

		if out.len() == limit {
			break;
		}
	}

	out
}
